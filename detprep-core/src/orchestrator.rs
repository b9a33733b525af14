//! Top-level dispatch between the conversion flow and placeholder synthesis.
//!
//! The orchestrator owns no terminal I/O. Callers hand it the raw choice and a
//! confirmation callback; everything it decides comes back as an [`Outcome`].

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PrepConfig;
use crate::convert::Converter;
use crate::error::PrepError;
use crate::fetch::{self, Fetch};
use crate::pipeline::{ConversionPipeline, ConversionResult};
use crate::synth::{ArtifactSynthesizer, SynthesizedModel};

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Download the source model and convert it.
    RunConversion,
    /// Write the face and plate placeholder packages.
    SynthesizePlaceholders,
}

impl Command {
    /// Parse a menu choice (`1` or `2`).
    pub fn from_choice(input: &str) -> Result<Self, PrepError> {
        match input.trim() {
            "1" => Ok(Command::RunConversion),
            "2" => Ok(Command::SynthesizePlaceholders),
            other => Err(PrepError::InvalidChoice(format!(
                "'{other}' (expected 1 or 2)"
            ))),
        }
    }

    /// Whether the command must be confirmed before it runs.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Command::RunConversion)
    }
}

/// Result of handling one choice. Never an error: failures are reported here.
#[derive(Debug)]
pub enum Outcome {
    Converted(ConversionResult),
    Synthesized(Vec<SynthesizedModel>),
    Cancelled,
    Rejected(String),
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        match self {
            Outcome::Converted(result) => result.success,
            Outcome::Synthesized(_) | Outcome::Cancelled => true,
            Outcome::Rejected(_) | Outcome::Failed(_) => false,
        }
    }

    /// One-line human readable summary.
    pub fn message(&self) -> String {
        match self {
            Outcome::Converted(result) if result.success => {
                format!("Model converted into {}", result.output_dir.display())
            }
            Outcome::Converted(result) => match result.failed_stage() {
                Some(stage) => format!(
                    "Conversion failed during the {stage} stage; see {} for partial output",
                    result.output_dir.display()
                ),
                None => "Conversion did not finish".to_string(),
            },
            Outcome::Synthesized(models) => {
                let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                format!(
                    "Placeholder models written: {}. Replace them with trained models before use.",
                    names.join(", ")
                )
            }
            Outcome::Cancelled => "Operation cancelled".to_string(),
            Outcome::Rejected(msg) => msg.clone(),
            Outcome::Failed(msg) => msg.clone(),
        }
    }
}

/// Dispatches commands to the fetcher, pipeline and synthesizer.
pub struct Orchestrator {
    config: PrepConfig,
    fetcher: Arc<dyn Fetch>,
    converter: Arc<dyn Converter>,
}

impl Orchestrator {
    pub fn new(config: PrepConfig, fetcher: Arc<dyn Fetch>, converter: Arc<dyn Converter>) -> Self {
        Self {
            config,
            fetcher,
            converter,
        }
    }

    pub fn config(&self) -> &PrepConfig {
        &self.config
    }

    /// Handle a raw menu choice. `confirm` is asked only for commands that need it.
    pub async fn handle_choice(&self, input: &str, confirm: impl FnOnce() -> bool) -> Outcome {
        let command = match Command::from_choice(input) {
            Ok(command) => command,
            Err(e) => {
                warn!(input, "Rejected menu choice");
                return Outcome::Rejected(e.to_string());
            }
        };
        if command.needs_confirmation() && !confirm() {
            info!(?command, "Cancelled by user");
            return Outcome::Cancelled;
        }
        self.execute(command).await
    }

    /// Run a command to completion.
    pub async fn execute(&self, command: Command) -> Outcome {
        info!(?command, "Executing");
        match command {
            Command::RunConversion => self.run_conversion().await,
            Command::SynthesizePlaceholders => self.synthesize_placeholders(),
        }
    }

    async fn run_conversion(&self) -> Outcome {
        if !self.converter.is_available().await {
            warn!(
                converter = self.converter.name(),
                "Conversion tools did not respond; the stages will likely fail"
            );
        }

        let source = self.config.source_download_path();
        if let Err(e) = self.fetcher.download(&self.config.source.url, &source).await {
            error!(url = %self.config.source.url, error = %e, "Download failed");
            if let Err(cleanup) = fetch::discard_partial(&source) {
                warn!(
                    path = %source.display(),
                    error = %cleanup,
                    "Could not remove partial download"
                );
            }
            return Outcome::Failed(e.to_string());
        }

        let pipeline =
            ConversionPipeline::new(self.converter.clone(), self.config.conversion.clone());
        let result = pipeline
            .convert(&source, &self.config.conversion_output_dir())
            .await;
        Outcome::Converted(result)
    }

    fn synthesize_placeholders(&self) -> Outcome {
        let synthesizer = ArtifactSynthesizer::new(&self.config.models_root)
            .with_sizing(self.config.synthesis.shard_sizing);
        match synthesizer.synthesize_canonical() {
            Ok(models) => Outcome::Synthesized(models),
            Err(e) => {
                error!(error = %e, "Placeholder synthesis failed");
                Outcome::Failed(e.to_string())
            }
        }
    }
}
