//! Subprocess-backed converter.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{BrowserConvertRequest, Converter, ExportRequest, Stage, ToolExit};
use crate::config::ConversionConfig;
use crate::error::PrepError;

/// Runs the export tool and the browser converter as child processes.
///
/// Tool output goes straight to the terminal. Each call blocks until the child
/// exits; there is no timeout.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    export_program: String,
    export_args: Vec<String>,
    converter_program: String,
    converter_args: Vec<String>,
}

impl CommandConverter {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            export_program: config.export_program.clone(),
            export_args: config.export_args.clone(),
            converter_program: config.converter_program.clone(),
            converter_args: config.converter_args.clone(),
        }
    }

    /// Arguments passed to the export program.
    pub fn export_argv(&self, request: &ExportRequest) -> Vec<String> {
        let mut argv = self.export_args.clone();
        argv.extend([
            "--onnx".to_string(),
            request.source_model.display().to_string(),
            "--output".to_string(),
            request.saved_model_dir.display().to_string(),
            "--inputs".to_string(),
            request.input_binding.clone(),
            "--outputs".to_string(),
            request.output_binding.clone(),
        ]);
        argv
    }

    /// Arguments passed to the browser converter.
    pub fn convert_argv(&self, request: &BrowserConvertRequest) -> Vec<String> {
        let mut argv = self.converter_args.clone();
        argv.extend([
            format!("--input_format={}", request.input_format),
            format!(
                "--output_node_names={}",
                request.output_node_names.join(",")
            ),
            format!("--saved_model_tags={}", request.serving_tag),
            request.saved_model_dir.display().to_string(),
            request.output_dir.display().to_string(),
        ]);
        argv
    }

    /// Each tool's program with the leading arguments every invocation carries.
    fn tool_prefixes(&self) -> [(&str, &[String]); 2] {
        [
            (self.export_program.as_str(), self.export_args.as_slice()),
            (self.converter_program.as_str(), self.converter_args.as_slice()),
        ]
    }

    async fn run(
        &self,
        stage: Stage,
        program: &str,
        argv: &[String],
    ) -> Result<ToolExit, PrepError> {
        let command = render_command(program, argv);
        debug!(%stage, command = %command, "Spawning tool");

        let status = Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                let msg = format!("failed to start `{command}`: {e}");
                match stage {
                    Stage::Export => PrepError::export(msg),
                    Stage::BrowserConvert => PrepError::convert(msg),
                }
            })?;

        Ok(ToolExit {
            command,
            code: status.code(),
        })
    }
}

fn render_command(program: &str, argv: &[String]) -> String {
    std::iter::once(program)
        .chain(argv.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn responds_to_version(program: &str, leading: &[String]) -> bool {
    Command::new(program)
        .args(leading)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

#[async_trait]
impl Converter for CommandConverter {
    fn name(&self) -> &str {
        "command"
    }

    async fn is_available(&self) -> bool {
        for (program, leading) in self.tool_prefixes() {
            if !responds_to_version(program, leading).await {
                return false;
            }
        }
        true
    }

    async fn export(&self, request: &ExportRequest) -> Result<ToolExit, PrepError> {
        let argv = self.export_argv(request);
        self.run(Stage::Export, &self.export_program, &argv).await
    }

    async fn browser_convert(
        &self,
        request: &BrowserConvertRequest,
    ) -> Result<ToolExit, PrepError> {
        let argv = self.convert_argv(request);
        self.run(Stage::BrowserConvert, &self.converter_program, &argv)
            .await
    }
}
