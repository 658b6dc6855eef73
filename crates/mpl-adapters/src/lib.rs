// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reference provider adapters.
//!
//! Each generation modality ships one adapter wrapping its external
//! generator subprocess, plus the two pure composers (character selector and
//! preview builder) and deterministic mock providers for offline runs and
//! tests.  All follow the same skeleton: re-validate, probe the output
//! subdirectory, run the generator with logs under `logs/<modality>.log`,
//! classify failures into the error taxonomy, copy artifacts to canonical
//! filenames, and write a `*_meta.json` beside each main artifact.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Built-in character selector (no subprocess).
pub mod character;
/// Export adapter: zip bundle or composited mp4.
pub mod export;
/// Deterministic mock providers.
pub mod mock;
/// Motion generator adapter.
pub mod motion;
/// Music CLI adapter.
pub mod music;
/// Preview configuration builder.
pub mod preview;
/// Panorama diffusion adapter.
pub mod scene;

mod common;

pub use character::CharacterSelector;
pub use export::ExportAdapter;
pub use mock::{FailingAdapter, HangingAdapter, MockAdapter, register_mock_providers};
pub use motion::MotionAdapter;
pub use music::MusicAdapter;
pub use preview::PreviewBuilder;
pub use scene::SceneAdapter;

use mpl_adapter::{AdapterRegistry, ArtifactSource};
use std::sync::Arc;

/// Register the six reference providers under their default ids.
pub fn register_defaults(registry: &AdapterRegistry, artifacts: Arc<dyn ArtifactSource>) {
    registry.register(Arc::new(SceneAdapter::new()));
    registry.register(Arc::new(MotionAdapter::new()));
    registry.register(Arc::new(MusicAdapter::new()));
    registry.register(Arc::new(CharacterSelector::new()));
    registry.register(Arc::new(PreviewBuilder::new(Arc::clone(&artifacts))));
    registry.register(Arc::new(ExportAdapter::new(artifacts)));
}
