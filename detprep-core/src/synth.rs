//! Placeholder package synthesis.
//!
//! Produces graph-model packages with the converter's layout and schema so the web
//! app can load *something* before trained weights exist. The packages are not
//! executable: the output node reads a tensor no node produces, and with the
//! default sizing the shard length is a per-model constant rather than what the
//! manifest implies. Both gaps are surfaced by [`crate::artifact::validate_package`].

use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact::{
    AttrValue, GRAPH_MODEL_FORMAT, GraphNode, IDENTITY_OP, ModelArtifact, ModelTopology,
    PLACEHOLDER_OP, TensorShape, WeightEntry, WeightGroup,
};
use crate::config::ShardSizing;
use crate::error::PrepError;
use crate::persistence;

pub const PLACEHOLDER_GENERATED_BY: &str = "1.15.0";
pub const PLACEHOLDER_CONVERTED_BY: &str = "TensorFlow.js Converter v3.18.0";
pub const PLACEHOLDER_SHARD: &str = "group1-shard1of1.bin";
/// Tensor the output node reads; nothing in the placeholder graph produces it.
pub const SYMBOLIC_OUTPUT_TENSOR: &str = "conv_output";
pub const INPUT_SHAPE: [i64; 4] = [1, 640, 640, 3];

/// The two models the web app expects: `(name, output channels)`.
pub const CANONICAL_MODELS: [(&str, u64); 2] = [("face", 32), ("plate", 64)];

/// Largest conv width a placeholder may declare.
pub const MAX_OUTPUT_CHANNELS: u64 = 65_536;

/// Shard size used by the convention policy, `None` on overflow.
pub fn conventional_shard_size(output_channels: u64) -> Option<u64> {
    output_channels.checked_mul(32)
}

/// What a synthesis run wrote.
#[derive(Debug, Clone)]
pub struct SynthesizedModel {
    pub name: String,
    pub dir: PathBuf,
    pub shard_path: PathBuf,
    pub shard_bytes: u64,
    /// Bytes the manifest's shapes and dtypes imply.
    pub manifest_bytes: u64,
}

impl SynthesizedModel {
    pub fn size_matches_manifest(&self) -> bool {
        self.shard_bytes == self.manifest_bytes
    }
}

/// Writes placeholder packages under a models root.
pub struct ArtifactSynthesizer {
    models_root: PathBuf,
    sizing: ShardSizing,
}

impl ArtifactSynthesizer {
    pub fn new(models_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
            sizing: ShardSizing::default(),
        }
    }

    pub fn with_sizing(mut self, sizing: ShardSizing) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    /// Write `<root>/<model_name>_detection_model`, replacing whatever was there.
    pub fn synthesize(
        &self,
        model_name: &str,
        output_channels: u64,
    ) -> Result<SynthesizedModel, PrepError> {
        if model_name.is_empty()
            || model_name
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(PrepError::invalid_input(format!(
                "model name '{model_name}' must be non-empty letters, digits, '_' or '-'"
            )));
        }
        if !(1..=MAX_OUTPUT_CHANNELS).contains(&output_channels) {
            return Err(PrepError::invalid_input(format!(
                "output channels must be in 1..={MAX_OUTPUT_CHANNELS}, got {output_channels}"
            )));
        }

        let artifact = placeholder_artifact(output_channels);
        let manifest_bytes = artifact.weights_manifest[0]
            .expected_byte_length()
            .map_err(|(weight, reason)| {
                let name = &weight.name;
                PrepError::invalid_artifact(format!("cannot size weight '{name}': {reason:?}"))
            })?;
        let shard_bytes = match self.sizing {
            ShardSizing::Convention => conventional_shard_size(output_channels)
                .ok_or_else(|| PrepError::invalid_input("shard size overflows"))?,
            ShardSizing::Manifest => manifest_bytes,
        };

        let dir = self.models_root.join(crate::model_dir_name(model_name));
        persistence::reset_dir(&dir)?;
        artifact.save(&dir)?;

        let shard_path = dir.join(PLACEHOLDER_SHARD);
        persistence::write_zeros_atomic(&shard_path, shard_bytes)?;

        info!(
            model = model_name,
            dir = %dir.display(),
            shard_bytes,
            manifest_bytes,
            "Placeholder model written"
        );
        Ok(SynthesizedModel {
            name: model_name.to_string(),
            dir,
            shard_path,
            shard_bytes,
            manifest_bytes,
        })
    }

    /// Synthesize the face and plate models, in that order.
    pub fn synthesize_canonical(&self) -> Result<Vec<SynthesizedModel>, PrepError> {
        CANONICAL_MODELS
            .iter()
            .map(|&(name, channels)| self.synthesize(name, channels))
            .collect()
    }
}

/// Descriptor of a placeholder package with a single conv layer of `output_channels`.
pub fn placeholder_artifact(output_channels: u64) -> ModelArtifact {
    let mut input_attr = BTreeMap::new();
    input_attr.insert(
        "dtype".to_string(),
        AttrValue {
            dtype: Some("DT_FLOAT".to_string()),
            ..Default::default()
        },
    );
    input_attr.insert(
        "shape".to_string(),
        AttrValue {
            shape: Some(TensorShape::from_sizes(&INPUT_SHAPE)),
            ..Default::default()
        },
    );

    let mut output_attr = BTreeMap::new();
    output_attr.insert(
        "T".to_string(),
        AttrValue {
            dtype: Some("DT_FLOAT".to_string()),
            ..Default::default()
        },
    );

    ModelArtifact {
        format: GRAPH_MODEL_FORMAT.to_string(),
        generated_by: PLACEHOLDER_GENERATED_BY.to_string(),
        converted_by: PLACEHOLDER_CONVERTED_BY.to_string(),
        model_topology: ModelTopology {
            node: vec![
                GraphNode {
                    name: "input".to_string(),
                    op: PLACEHOLDER_OP.to_string(),
                    input: Vec::new(),
                    attr: input_attr,
                    extra: Default::default(),
                },
                GraphNode {
                    name: "output".to_string(),
                    op: IDENTITY_OP.to_string(),
                    input: vec![SYMBOLIC_OUTPUT_TENSOR.to_string()],
                    attr: output_attr,
                    extra: Default::default(),
                },
            ],
            extra: Default::default(),
        },
        weights_manifest: vec![WeightGroup {
            paths: vec![PLACEHOLDER_SHARD.to_string()],
            weights: vec![
                WeightEntry::new("conv/kernel", &[3, 3, 3, output_channels], "float32"),
                WeightEntry::new("conv/bias", &[output_channels], "float32"),
            ],
        }],
        signature: None,
        user_defined_metadata: Some(json!({
            "placeholder": true,
            "note": "zero-filled placeholder; install converted weights first",
        })),
    }
}
