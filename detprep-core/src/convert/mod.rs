//! Converter capability: the two external tool invocations of a conversion.
//!
//! The pipeline only sees this trait. [`CommandConverter`] runs the real
//! executables; [`ScriptedConverter`] plays back fixed exit codes so the stage
//! ordering and cleanup rules can be exercised without the tools installed.

pub mod command;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::PrepError;

pub use command::CommandConverter;
pub use scripted::{ScriptedConverter, StageScript};

/// Conversion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source model to intermediate saved-graph directory.
    Export,
    /// Saved-graph directory to browser graph-model package.
    BrowserConvert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Export => write!(f, "export"),
            Stage::BrowserConvert => write!(f, "browser-convert"),
        }
    }
}

/// Arguments of the graph-export invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub source_model: PathBuf,
    pub saved_model_dir: PathBuf,
    pub input_binding: String,
    pub output_binding: String,
}

/// Arguments of the browser conversion invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConvertRequest {
    pub input_format: String,
    pub output_node_names: Vec<String>,
    pub serving_tag: String,
    pub saved_model_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExit {
    /// Command line, for logs.
    pub command: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs the external conversion tools.
///
/// `Ok` means the tool ran to completion; its exit code decides success. `Err`
/// means it could not be started at all.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the tools look installed. Informational only.
    async fn is_available(&self) -> bool {
        true
    }

    async fn export(&self, request: &ExportRequest) -> Result<ToolExit, PrepError>;

    async fn browser_convert(
        &self,
        request: &BrowserConvertRequest,
    ) -> Result<ToolExit, PrepError>;
}
