//! # detprep core
//!
//! Prepares object-detection model packages for in-browser inference: downloads a
//! source model and drives it through the two-stage conversion into a graph-model
//! package, or synthesizes placeholder packages with the same layout. Also
//! validates and installs packages under the models root.

pub mod artifact;
pub mod config;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod install;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod synth;

// Re-export commonly used types at the crate root.
pub use artifact::{Issue, ModelArtifact, ValidationReport, validate_package};
pub use config::{PrepConfig, ShardSizing, load_config};
pub use convert::{CommandConverter, Converter, ScriptedConverter, Stage};
pub use error::{PrepError, Result};
pub use fetch::{Fetch, HttpFetcher};
pub use install::{BackupEntry, ModelInstaller, ModelKind};
pub use orchestrator::{Command, Orchestrator, Outcome};
pub use pipeline::{ConversionPipeline, ConversionResult, PipelineState};
pub use synth::{ArtifactSynthesizer, SynthesizedModel};

/// Directory name of a model package under the models root.
pub fn model_dir_name(name: &str) -> String {
    format!("{name}_detection_model")
}
