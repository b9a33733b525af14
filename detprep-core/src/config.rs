//! Configuration management for detprep.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> workspace
//! config -> environment -> explicit overrides. Configuration is loaded from
//! `~/.config/detprep/config.toml` and/or `.detprep/config.toml` in the workspace.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PrepError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Root directory holding one `<name>_detection_model` directory per model.
    pub models_root: PathBuf,
    /// Where downloaded source models are kept.
    pub cache_dir: PathBuf,
    pub source: SourceConfig,
    pub conversion: ConversionConfig,
    pub synthesis: SynthesisConfig,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            models_root: PathBuf::from("public/models"),
            cache_dir: PathBuf::from(".detprep/cache"),
            source: SourceConfig::default(),
            conversion: ConversionConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl PrepConfig {
    /// Anchor relative directories at `workspace`.
    pub fn resolve_paths(&mut self, workspace: &Path) {
        if self.models_root.is_relative() {
            self.models_root = workspace.join(&self.models_root);
        }
        if self.cache_dir.is_relative() {
            self.cache_dir = workspace.join(&self.cache_dir);
        }
    }

    /// Output directory for the converted model.
    pub fn conversion_output_dir(&self) -> PathBuf {
        self.models_root
            .join(crate::model_dir_name(&self.conversion.model_name))
    }

    /// Local path the source model is downloaded to.
    pub fn source_download_path(&self) -> PathBuf {
        self.cache_dir.join(&self.source.file_name)
    }
}

/// Where the source-format model is fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub file_name: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "https://github.com/ultralytics/assets/releases/download/v8.1.0/yolov8n.onnx"
                .to_string(),
            file_name: "yolov8n.onnx".to_string(),
        }
    }
}

/// External tool settings for the two conversion stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Logical name of the converted model; the output goes to `<name>_detection_model`.
    pub model_name: String,
    /// Program running the graph-export stage.
    pub export_program: String,
    /// Leading arguments placed before the stage arguments.
    #[serde(default)]
    pub export_args: Vec<String>,
    pub input_binding: String,
    pub output_binding: String,
    /// Program running the browser conversion stage.
    pub converter_program: String,
    #[serde(default)]
    pub converter_args: Vec<String>,
    pub input_format: String,
    pub output_node_names: Vec<String>,
    pub serving_tag: String,
    /// Name of the intermediate saved-graph directory inside the output directory.
    pub saved_model_dir_name: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model_name: "yolo".to_string(),
            export_program: "python".to_string(),
            export_args: vec!["-m".to_string(), "tf2onnx.convert".to_string()],
            input_binding: "images:0".to_string(),
            output_binding: "output0:0".to_string(),
            converter_program: "tensorflowjs_converter".to_string(),
            converter_args: Vec::new(),
            input_format: "tf_saved_model".to_string(),
            output_node_names: vec![
                "Identity".to_string(),
                "Identity_1".to_string(),
                "Identity_2".to_string(),
            ],
            serving_tag: "serve".to_string(),
            saved_model_dir_name: "saved_model".to_string(),
        }
    }
}

/// How the synthesizer sizes placeholder weight shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardSizing {
    /// Fixed per-model size, `output_channels * 32` bytes.
    #[default]
    Convention,
    /// Size implied by the declared weight shapes and dtypes.
    Manifest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub shard_sizing: ShardSizing,
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".detprep").join("config.toml")
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "detprep", "detprep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from all layers.
///
/// `explicit` is an additional config file (e.g. from `--config`) merged after the
/// workspace file. Relative paths in the result are anchored at `workspace`.
pub fn load_config(workspace: &Path, explicit: Option<&Path>) -> Result<PrepConfig, PrepError> {
    let mut figment = Figment::from(Serialized::defaults(PrepConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    let ws_config = workspace_config_path(workspace);
    if ws_config.exists() {
        figment = figment.merge(Toml::file(&ws_config));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(PrepError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // DETPREP_MODELS_ROOT, DETPREP_CONVERSION__SERVING_TAG, ...
    figment = figment.merge(Env::prefixed("DETPREP_").split("__"));

    let mut config: PrepConfig = figment.extract()?;
    config.resolve_paths(workspace);
    Ok(config)
}
