//! Two-stage conversion of a source model into a browser graph-model package.
//!
//! ```text
//! Start -> ExportedIntermediate -> Converted
//!   |              |
//!   v              v
//! Failed(Export)  Failed(BrowserConvert)
//! ```
//!
//! Stage errors never escape [`ConversionPipeline::convert`]; they are logged with
//! the command that caused them and folded into a `success = false` result. The
//! intermediate saved-graph directory is removed only after both stages succeed,
//! so a failed run leaves everything on disk for diagnosis.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ConversionConfig;
use crate::convert::{BrowserConvertRequest, Converter, ExportRequest, Stage, ToolExit};
use crate::error::PrepError;
use crate::persistence;

/// Where a conversion run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    ExportedIntermediate,
    Converted,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Converted | PipelineState::Failed(_))
    }
}

/// Outcome of [`ConversionPipeline::convert`].
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub success: bool,
    pub state: PipelineState,
    pub output_dir: PathBuf,
    pub saved_model_dir: PathBuf,
}

impl ConversionResult {
    pub fn failed_stage(&self) -> Option<Stage> {
        match self.state {
            PipelineState::Failed(stage) => Some(stage),
            _ => None,
        }
    }
}

/// Drives the export and browser-convert stages through a [`Converter`].
pub struct ConversionPipeline {
    converter: Arc<dyn Converter>,
    settings: ConversionConfig,
}

impl ConversionPipeline {
    pub fn new(converter: Arc<dyn Converter>, settings: ConversionConfig) -> Self {
        Self {
            converter,
            settings,
        }
    }

    /// Intermediate directory used for a given output directory.
    pub fn saved_model_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.settings.saved_model_dir_name)
    }

    /// Convert `source_model` into a package in `output_dir`.
    ///
    /// The output directory is emptied first unless the source model lives inside
    /// it. Stages run strictly one after the other.
    pub async fn convert(&self, source_model: &Path, output_dir: &Path) -> ConversionResult {
        let saved_model_dir = self.saved_model_dir(output_dir);
        let mut run = Run {
            state: PipelineState::Start,
            output_dir: output_dir.to_path_buf(),
            saved_model_dir: saved_model_dir.clone(),
        };
        info!(
            converter = self.converter.name(),
            source = %source_model.display(),
            output = %output_dir.display(),
            "Starting conversion"
        );

        if let Err(e) = prepare_output_dir(source_model, output_dir) {
            error!(stage = %Stage::Export, error = %e, "Could not prepare output directory");
            return run.fail(Stage::Export);
        }

        // Stage 1: source model -> saved graph
        let export = ExportRequest {
            source_model: source_model.to_path_buf(),
            saved_model_dir: saved_model_dir.clone(),
            input_binding: self.settings.input_binding.clone(),
            output_binding: self.settings.output_binding.clone(),
        };
        let outcome = self.converter.export(&export).await;
        if !stage_succeeded(Stage::Export, outcome) {
            return run.fail(Stage::Export);
        }
        run.advance(PipelineState::ExportedIntermediate);

        // Stage 2: saved graph -> browser package
        let browser = BrowserConvertRequest {
            input_format: self.settings.input_format.clone(),
            output_node_names: self.settings.output_node_names.clone(),
            serving_tag: self.settings.serving_tag.clone(),
            saved_model_dir: saved_model_dir.clone(),
            output_dir: output_dir.to_path_buf(),
        };
        let outcome = self.converter.browser_convert(&browser).await;
        if !stage_succeeded(Stage::BrowserConvert, outcome) {
            return run.fail(Stage::BrowserConvert);
        }
        run.advance(PipelineState::Converted);

        if let Err(e) = std::fs::remove_dir_all(&saved_model_dir) {
            warn!(
                path = %saved_model_dir.display(),
                error = %e,
                "Could not remove intermediate saved model"
            );
        }
        run.finish()
    }
}

struct Run {
    state: PipelineState,
    output_dir: PathBuf,
    saved_model_dir: PathBuf,
}

impl Run {
    fn advance(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "Conversion advanced");
        self.state = next;
    }

    fn fail(mut self, stage: Stage) -> ConversionResult {
        self.advance(PipelineState::Failed(stage));
        self.finish()
    }

    fn finish(self) -> ConversionResult {
        ConversionResult {
            success: self.state == PipelineState::Converted,
            state: self.state,
            output_dir: self.output_dir,
            saved_model_dir: self.saved_model_dir,
        }
    }
}

fn stage_succeeded(stage: Stage, outcome: Result<ToolExit, PrepError>) -> bool {
    match outcome {
        Ok(exit) if exit.success() => {
            info!(%stage, command = %exit.command, "Stage completed");
            true
        }
        Ok(exit) => {
            error!(%stage, command = %exit.command, code = ?exit.code, "Stage exited with failure");
            false
        }
        Err(e) => {
            error!(%stage, error = %e, "Stage could not run");
            false
        }
    }
}

fn prepare_output_dir(source_model: &Path, output_dir: &Path) -> std::io::Result<()> {
    if !source_model.starts_with(output_dir) {
        return persistence::reset_dir(output_dir);
    }
    warn!(
        source = %source_model.display(),
        "Source model is inside the output directory; keeping only the source"
    );
    std::fs::create_dir_all(output_dir)?;
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        if source_model.starts_with(&path) {
            continue;
        }
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
