//! Converter that plays back scripted stage results.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{BrowserConvertRequest, Converter, ExportRequest, Stage, ToolExit};
use crate::artifact::{
    AttrValue, GRAPH_MODEL_FORMAT, GraphNode, IDENTITY_OP, ModelArtifact, ModelTopology,
    PLACEHOLDER_OP, WeightEntry, WeightGroup,
};
use crate::error::PrepError;
use crate::persistence;

const SHARD: &str = "group1-shard1of1.bin";

/// Scripted result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageScript {
    /// The tool runs and exits with this code.
    Exit(i32),
    /// The tool cannot be started.
    Missing,
}

/// Deterministic stand-in for the external tools.
///
/// A successful export creates the saved-graph directory. A successful browser
/// conversion writes a small, fully consistent package. A failed browser
/// conversion leaves a lone shard file behind, like a converter that died midway.
#[derive(Debug)]
pub struct ScriptedConverter {
    export: StageScript,
    browser_convert: StageScript,
    calls: Mutex<Vec<Stage>>,
}

impl ScriptedConverter {
    pub fn new(export: StageScript, browser_convert: StageScript) -> Self {
        Self {
            export,
            browser_convert,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(StageScript::Exit(0), StageScript::Exit(0))
    }

    /// Fails `stage` with exit code 1; stages before it succeed.
    pub fn failing_at(stage: Stage) -> Self {
        match stage {
            Stage::Export => Self::new(StageScript::Exit(1), StageScript::Exit(0)),
            Stage::BrowserConvert => Self::new(StageScript::Exit(0), StageScript::Exit(1)),
        }
    }

    /// Stages invoked so far, in order.
    pub fn calls(&self) -> Vec<Stage> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, stage: Stage) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(stage);
        }
    }
}

fn play(stage: Stage, script: StageScript) -> Result<ToolExit, PrepError> {
    let command = format!("scripted {stage}");
    match script {
        StageScript::Exit(code) => Ok(ToolExit {
            command,
            code: Some(code),
        }),
        StageScript::Missing => {
            let msg = format!("failed to start `{command}`: not installed");
            Err(match stage {
                Stage::Export => PrepError::export(msg),
                Stage::BrowserConvert => PrepError::convert(msg),
            })
        }
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn export(&self, request: &ExportRequest) -> Result<ToolExit, PrepError> {
        self.record(Stage::Export);
        let exit = play(Stage::Export, self.export)?;
        if exit.success() {
            std::fs::create_dir_all(request.saved_model_dir.join("variables"))?;
            std::fs::write(request.saved_model_dir.join("saved_model.pb"), b"graph")?;
        }
        Ok(exit)
    }

    async fn browser_convert(
        &self,
        request: &BrowserConvertRequest,
    ) -> Result<ToolExit, PrepError> {
        self.record(Stage::BrowserConvert);
        let exit = play(Stage::BrowserConvert, self.browser_convert)?;
        if exit.success() {
            let (artifact, shard) = converted_package(&request.output_node_names);
            artifact.save(&request.output_dir)?;
            persistence::write_atomic(&request.output_dir.join(SHARD), &shard)?;
        } else {
            std::fs::write(request.output_dir.join(SHARD), [0u8; 16])?;
        }
        Ok(exit)
    }
}

/// A tiny converted package: `images -> conv -> <output names>`.
fn converted_package(output_names: &[String]) -> (ModelArtifact, Vec<u8>) {
    let mut attr = std::collections::BTreeMap::new();
    attr.insert(
        "dtype".to_string(),
        AttrValue {
            dtype: Some("DT_FLOAT".to_string()),
            ..Default::default()
        },
    );
    let node = |name: &str, op: &str, input: &[&str]| GraphNode {
        name: name.to_string(),
        op: op.to_string(),
        input: input.iter().map(|s| s.to_string()).collect(),
        attr: Default::default(),
        extra: Default::default(),
    };

    let mut nodes = vec![
        GraphNode {
            attr,
            ..node("images", PLACEHOLDER_OP, &[])
        },
        node("conv/kernel", "Const", &[]),
        node("conv", "Conv2D", &["images", "conv/kernel"]),
    ];
    nodes.extend(
        output_names
            .iter()
            .map(|name| node(name.as_str(), IDENTITY_OP, &["conv:0"])),
    );

    let kernel = WeightEntry::new("conv/kernel", &[3, 3, 3, 4], "float32");
    let len = kernel.byte_length().unwrap_or_default() as usize;
    let artifact = ModelArtifact {
        format: GRAPH_MODEL_FORMAT.to_string(),
        generated_by: "2.13.0".to_string(),
        converted_by: "scripted".to_string(),
        model_topology: ModelTopology {
            node: nodes,
            extra: Default::default(),
        },
        weights_manifest: vec![WeightGroup {
            paths: vec![SHARD.to_string()],
            weights: vec![kernel],
        }],
        signature: None,
        user_defined_metadata: None,
    };
    (artifact, vec![0u8; len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::validate_package;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_successful_conversion_writes_valid_package() {
        let dir = TempDir::new().unwrap();
        let converter = ScriptedConverter::succeeding();
        let request = BrowserConvertRequest {
            input_format: "tf_saved_model".into(),
            output_node_names: vec!["Identity".into(), "Identity_1".into()],
            serving_tag: "serve".into(),
            saved_model_dir: dir.path().join("saved_model"),
            output_dir: dir.path().to_path_buf(),
        };
        let exit = converter.browser_convert(&request).await.unwrap();
        assert!(exit.success());

        let report = validate_package(dir.path()).unwrap();
        assert!(report.is_valid(), "{:?}", report.issues);
        assert_eq!(converter.calls(), vec![Stage::BrowserConvert]);
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error() {
        let dir = TempDir::new().unwrap();
        let converter = ScriptedConverter::new(StageScript::Missing, StageScript::Exit(0));
        let request = ExportRequest {
            source_model: dir.path().join("m.onnx"),
            saved_model_dir: dir.path().join("saved_model"),
            input_binding: "images:0".into(),
            output_binding: "output0:0".into(),
        };
        assert!(matches!(
            converter.export(&request).await,
            Err(PrepError::Export(_))
        ));
        assert!(!dir.path().join("saved_model").exists());
    }
}
