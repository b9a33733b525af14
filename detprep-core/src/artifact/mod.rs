//! Browser graph-model package format.
//!
//! A package is a directory holding a `model.json` descriptor and the binary weight
//! shards it names. The types here mirror the descriptor schema; keys this crate
//! does not interpret are preserved through `extra` maps so a converted package can
//! be loaded and rewritten without losing information.

pub mod dtype;
pub mod validate;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::PrepError;
use crate::persistence;

pub use dtype::dtype_size;
pub use validate::{Issue, ValidationReport, validate_package};

/// File name of the package descriptor.
pub const MODEL_JSON: &str = "model.json";
/// Value of the `format` key for graph-model packages.
pub const GRAPH_MODEL_FORMAT: &str = "graph-model";
pub const PLACEHOLDER_OP: &str = "Placeholder";
pub const IDENTITY_OP: &str = "Identity";

/// The `model.json` descriptor of a graph-model package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub format: String,
    pub generated_by: String,
    pub converted_by: String,
    pub model_topology: ModelTopology,
    pub weights_manifest: Vec<WeightGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defined_metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTopology {
    #[serde(default)]
    pub node: Vec<GraphNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One node of the computation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub op: String,
    /// Tensor references, `node`, `node:1` or `^node`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<String>,
    #[serde(default)]
    pub attr: BTreeMap<String, AttrValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrValue {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<TensorShape>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorShape {
    #[serde(default)]
    pub dim: Vec<Dim>,
    #[serde(
        rename = "unknownRank",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub unknown_rank: Option<bool>,
}

impl TensorShape {
    pub fn from_sizes(sizes: &[i64]) -> Self {
        Self {
            dim: sizes.iter().map(|&size| Dim { size }).collect(),
            unknown_rank: None,
        }
    }

    pub fn sizes(&self) -> Vec<i64> {
        self.dim.iter().map(|d| d.size).collect()
    }
}

/// A dimension. The converter writes sizes as decimal strings; `-1` is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim {
    #[serde(
        serialize_with = "size_as_string",
        deserialize_with = "size_from_string_or_number"
    )]
    pub size: i64,
}

fn size_as_string<S: Serializer>(size: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&size.to_string())
}

fn size_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// One shard group: the files holding a run of weights, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

/// Why a weight's byte length cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeError {
    /// The stored dtype has no fixed width.
    UnsizedDtype,
    /// The declared shape does not fit in 64 bits.
    Overflow,
}

impl WeightGroup {
    /// Bytes the group's files should hold, or the first weight that cannot be sized.
    pub fn expected_byte_length(&self) -> Result<u64, (&WeightEntry, SizeError)> {
        self.weights.iter().try_fold(0u64, |total, weight| {
            let len = weight.byte_length().map_err(|e| (weight, e))?;
            total
                .checked_add(len)
                .ok_or((weight, SizeError::Overflow))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<Quantization>,
}

impl WeightEntry {
    pub fn new(name: &str, shape: &[u64], dtype: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            dtype: dtype.to_string(),
            quantization: None,
        }
    }

    /// `None` when the product overflows.
    pub fn element_count(&self) -> Option<u64> {
        self.shape
            .iter()
            .try_fold(1u64, |count, &dim| count.checked_mul(dim))
    }

    /// dtype the bytes are stored as.
    pub fn stored_dtype(&self) -> &str {
        self.quantization
            .as_ref()
            .map_or(self.dtype.as_str(), |q| q.dtype.as_str())
    }

    pub fn byte_length(&self) -> Result<u64, SizeError> {
        let width = dtype_size(self.stored_dtype()).ok_or(SizeError::UnsizedDtype)?;
        self.element_count()
            .and_then(|count| count.checked_mul(width))
            .ok_or(SizeError::Overflow)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Node name a tensor reference points at.
pub fn tensor_node_name(reference: &str) -> &str {
    let name = reference.strip_prefix('^').unwrap_or(reference);
    match name.rsplit_once(':') {
        Some((node, index)) if index.chars().all(|c| c.is_ascii_digit()) => node,
        _ => name,
    }
}

impl ModelArtifact {
    /// Read `dir/model.json`.
    pub fn load(dir: &Path) -> Result<Self, PrepError> {
        let path = dir.join(MODEL_JSON);
        if !path.exists() {
            return Err(PrepError::not_found(format!(
                "{} is missing",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write `dir/model.json`.
    pub fn save(&self, dir: &Path) -> Result<(), PrepError> {
        persistence::write_json_atomic(&dir.join(MODEL_JSON), self)?;
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.model_topology.node.iter().find(|n| n.name == name)
    }

    pub fn input_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.model_topology
            .node
            .iter()
            .filter(|n| n.op == PLACEHOLDER_OP)
    }

    /// Identity nodes no other node consumes.
    ///
    /// Falls back to every Identity node when all of them are consumed.
    pub fn output_nodes(&self) -> Vec<&GraphNode> {
        let consumed: HashSet<&str> = self
            .model_topology
            .node
            .iter()
            .flat_map(|n| n.input.iter().map(|r| tensor_node_name(r)))
            .collect();
        let identities = self
            .model_topology
            .node
            .iter()
            .filter(|n| n.op == IDENTITY_OP);
        let outputs: Vec<&GraphNode> = identities
            .clone()
            .filter(|n| !consumed.contains(n.name.as_str()))
            .collect();
        if outputs.is_empty() {
            identities.collect()
        } else {
            outputs
        }
    }

    /// Every shard file name, in manifest order.
    pub fn shard_paths(&self) -> impl Iterator<Item = &str> {
        self.weights_manifest
            .iter()
            .flat_map(|g| g.paths.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONVERTED: &str = r#"{
        "format": "graph-model",
        "generatedBy": "2.13.0",
        "convertedBy": "TensorFlow.js Converter v4.10.0",
        "signature": {"inputs": {"images:0": {"name": "images:0"}}},
        "modelTopology": {
            "versions": {"producer": 1482},
            "node": [
                {"name": "images", "op": "Placeholder",
                 "attr": {"dtype": {"type": "DT_FLOAT"},
                          "shape": {"shape": {"dim": [
                              {"size": "-1"}, {"size": 640}, {"size": "640"}, {"size": "3"}
                          ]}}}},
                {"name": "conv", "op": "Conv2D", "input": ["images", "kernel"],
                 "device": "/device:CPU:0"},
                {"name": "kernel", "op": "Const"},
                {"name": "Identity", "op": "Identity", "input": ["conv:0"]}
            ]
        },
        "weightsManifest": [{
            "paths": ["group1-shard1of1.bin"],
            "weights": [
                {"name": "kernel", "shape": [3, 3, 3, 16], "dtype": "float32",
                 "quantization": {"dtype": "uint8", "scale": 0.01, "min": -1.2}}
            ]
        }]
    }"#;

    #[test]
    fn test_parses_converter_output() {
        let artifact: ModelArtifact = serde_json::from_str(CONVERTED).unwrap();
        assert_eq!(artifact.format, GRAPH_MODEL_FORMAT);
        assert_eq!(artifact.model_topology.node.len(), 4);
        assert!(artifact.model_topology.extra.contains_key("versions"));

        let images = artifact.node("images").unwrap();
        let shape = images.attr["shape"].shape.as_ref().unwrap();
        assert_eq!(shape.sizes(), vec![-1, 640, 640, 3]);
        assert_eq!(images.attr["dtype"].dtype.as_deref(), Some("DT_FLOAT"));
        assert_eq!(
            artifact.node("conv").unwrap().extra["device"],
            "/device:CPU:0"
        );
    }

    #[test]
    fn test_unknown_keys_survive_rewrite() {
        let artifact: ModelArtifact = serde_json::from_str(CONVERTED).unwrap();
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["modelTopology"]["versions"]["producer"], 1482);
        let dims = &value["modelTopology"]["node"][0]["attr"]["shape"]["shape"]["dim"];
        assert_eq!(dims[1]["size"], "640");
        assert!(value["signature"]["inputs"].is_object());
        assert!(value.get("userDefinedMetadata").is_none());
    }

    #[test]
    fn test_quantized_weight_uses_stored_width() {
        let artifact: ModelArtifact = serde_json::from_str(CONVERTED).unwrap();
        let group = &artifact.weights_manifest[0];
        assert_eq!(group.weights[0].stored_dtype(), "uint8");
        assert_eq!(group.expected_byte_length().unwrap(), 3 * 3 * 3 * 16);
    }

    #[test]
    fn test_expected_byte_length_reports_unsized_weight() {
        let group = WeightGroup {
            paths: vec!["a.bin".into()],
            weights: vec![
                WeightEntry::new("w", &[2, 2], "float32"),
                WeightEntry::new("labels", &[4], "string"),
            ],
        };
        let (weight, reason) = group.expected_byte_length().unwrap_err();
        assert_eq!(weight.name, "labels");
        assert_eq!(reason, SizeError::UnsizedDtype);
    }

    #[test]
    fn test_huge_shapes_overflow_instead_of_wrapping() {
        let huge = WeightEntry::new("w", &[4_294_967_296, 4_294_967_296, 2], "float32");
        assert_eq!(huge.element_count(), None);
        assert_eq!(huge.byte_length(), Err(SizeError::Overflow));

        // each weight fits, the group total does not
        let big = WeightEntry::new("big", &[u64::MAX / 5], "float32");
        let group = WeightGroup {
            paths: vec!["a.bin".into()],
            weights: vec![
                big.clone(),
                WeightEntry {
                    name: "other".into(),
                    ..big
                },
            ],
        };
        let (weight, reason) = group.expected_byte_length().unwrap_err();
        assert_eq!(weight.name, "other");
        assert_eq!(reason, SizeError::Overflow);
    }

    #[test]
    fn test_scalar_weight_has_one_element() {
        assert_eq!(WeightEntry::new("step", &[], "int32").byte_length(), Ok(4));
    }

    #[test]
    fn test_tensor_node_name() {
        assert_eq!(tensor_node_name("conv"), "conv");
        assert_eq!(tensor_node_name("conv:1"), "conv");
        assert_eq!(tensor_node_name("^conv"), "conv");
        assert_eq!(tensor_node_name("scope/conv:12"), "scope/conv");
        assert_eq!(tensor_node_name("odd:name"), "odd:name");
    }

    #[test]
    fn test_input_and_output_nodes() {
        let artifact: ModelArtifact = serde_json::from_str(CONVERTED).unwrap();
        let inputs: Vec<&str> = artifact.input_nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(inputs, vec!["images"]);
        let outputs: Vec<&str> = artifact
            .output_nodes()
            .into_iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(outputs, vec!["Identity"]);
        assert_eq!(
            artifact.shard_paths().collect::<Vec<_>>(),
            vec!["group1-shard1of1.bin"]
        );
    }
}
