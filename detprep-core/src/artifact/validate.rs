//! Structural validation of graph-model packages on disk.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::{GraphNode, ModelArtifact, PLACEHOLDER_OP, SizeError, tensor_node_name};
use crate::error::PrepError;

/// A single invariant violation found in a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    MissingShard { path: String },
    UnsafeShardPath { path: String },
    NoInputNode,
    NoOutputNode,
    DuplicateNode { name: String },
    UnresolvedInput { node: String, reference: String },
    Cycle { node: String },
    Disconnected { output: String },
    UnsizedDtype { weight: String, dtype: String },
    SizeOverflow { group: usize, weight: String },
    ShardSizeMismatch { group: usize, expected: u64, actual: u64 },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingShard { path } => write!(f, "shard file '{path}' does not exist"),
            Issue::UnsafeShardPath { path } => {
                write!(f, "shard path '{path}' escapes the package directory")
            }
            Issue::NoInputNode => write!(f, "graph has no Placeholder input node"),
            Issue::NoOutputNode => write!(f, "graph has no Identity output node"),
            Issue::DuplicateNode { name } => write!(f, "node name '{name}' is declared twice"),
            Issue::UnresolvedInput { node, reference } => {
                write!(f, "node '{node}' references unknown tensor '{reference}'")
            }
            Issue::Cycle { node } => write!(f, "graph contains a cycle through '{node}'"),
            Issue::Disconnected { output } => {
                write!(f, "output '{output}' does not trace back to an input node")
            }
            Issue::UnsizedDtype { weight, dtype } => {
                write!(f, "weight '{weight}' has dtype '{dtype}' with no fixed width")
            }
            Issue::SizeOverflow { group, weight } => write!(
                f,
                "weight group {group} overflows 64-bit byte counts at '{weight}'"
            ),
            Issue::ShardSizeMismatch {
                group,
                expected,
                actual,
            } => write!(
                f,
                "weight group {group} holds {actual} bytes but its manifest implies {expected}"
            ),
        }
    }
}

/// Result of validating one package directory.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub dir: PathBuf,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Valid apart from shard byte-length mismatches.
    pub fn is_structurally_valid(&self) -> bool {
        self.issues
            .iter()
            .all(|i| matches!(i, Issue::ShardSizeMismatch { .. }))
    }

    pub fn size_mismatches(&self) -> Vec<&Issue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, Issue::ShardSizeMismatch { .. }))
            .collect()
    }
}

/// Load `dir/model.json` and check every package invariant.
///
/// A descriptor that cannot be read or parsed is an error; everything else is
/// collected into the report.
pub fn validate_package(dir: &Path) -> Result<ValidationReport, PrepError> {
    let artifact = ModelArtifact::load(dir)?;
    let mut issues = check_shards(&artifact, dir);
    issues.extend(check_topology(&artifact));

    if issues.is_empty() {
        tracing::debug!(dir = %dir.display(), "Package is valid");
    } else {
        tracing::debug!(dir = %dir.display(), issues = issues.len(), "Package has issues");
    }
    Ok(ValidationReport {
        dir: dir.to_path_buf(),
        issues,
    })
}

fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn check_shards(artifact: &ModelArtifact, dir: &Path) -> Vec<Issue> {
    let mut issues = Vec::new();

    for (index, group) in artifact.weights_manifest.iter().enumerate() {
        let mut actual = 0u64;
        let mut complete = true;
        for path in &group.paths {
            if !is_contained(path) {
                issues.push(Issue::UnsafeShardPath { path: path.clone() });
                complete = false;
                continue;
            }
            match std::fs::metadata(dir.join(path)) {
                Ok(meta) if meta.is_file() => actual = actual.saturating_add(meta.len()),
                _ => {
                    issues.push(Issue::MissingShard { path: path.clone() });
                    complete = false;
                }
            }
        }

        match group.expected_byte_length() {
            Ok(expected) if complete && expected != actual => {
                issues.push(Issue::ShardSizeMismatch {
                    group: index,
                    expected,
                    actual,
                });
            }
            Ok(_) => {}
            Err((weight, SizeError::UnsizedDtype)) => issues.push(Issue::UnsizedDtype {
                weight: weight.name.clone(),
                dtype: weight.stored_dtype().to_string(),
            }),
            Err((weight, SizeError::Overflow)) => issues.push(Issue::SizeOverflow {
                group: index,
                weight: weight.name.clone(),
            }),
        }
    }

    issues
}

fn check_topology(artifact: &ModelArtifact) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut nodes: HashMap<&str, &GraphNode> = HashMap::new();
    for node in &artifact.model_topology.node {
        if nodes.insert(node.name.as_str(), node).is_some() {
            issues.push(Issue::DuplicateNode {
                name: node.name.clone(),
            });
        }
    }

    if artifact.input_nodes().next().is_none() {
        issues.push(Issue::NoInputNode);
    }
    let outputs = artifact.output_nodes();
    if outputs.is_empty() {
        issues.push(Issue::NoOutputNode);
    }

    let mut tracer = Tracer {
        nodes,
        marks: HashMap::new(),
        issues,
    };
    for output in outputs {
        if !tracer.visit(&output.name) {
            tracer.issues.push(Issue::Disconnected {
                output: output.name.clone(),
            });
        }
    }
    tracer.issues
}

enum Mark {
    Active,
    Done { reaches_input: bool },
}

/// Depth-first walk from an output towards the graph inputs.
struct Tracer<'a> {
    nodes: HashMap<&'a str, &'a GraphNode>,
    marks: HashMap<&'a str, Mark>,
    issues: Vec<Issue>,
}

impl<'a> Tracer<'a> {
    fn visit(&mut self, name: &'a str) -> bool {
        match self.marks.get(name) {
            Some(Mark::Active) => {
                let issue = Issue::Cycle {
                    node: name.to_string(),
                };
                if !self.issues.contains(&issue) {
                    self.issues.push(issue);
                }
                return false;
            }
            Some(Mark::Done { reaches_input }) => return *reaches_input,
            None => {}
        }
        let Some(node) = self.nodes.get(name).copied() else {
            return false;
        };

        self.marks.insert(name, Mark::Active);
        let mut reaches_input = node.op == PLACEHOLDER_OP;
        for reference in &node.input {
            let target = tensor_node_name(reference);
            if !self.nodes.contains_key(target) {
                self.issues.push(Issue::UnresolvedInput {
                    node: node.name.clone(),
                    reference: reference.clone(),
                });
                continue;
            }
            if self.visit(target) {
                reaches_input = true;
            }
        }
        self.marks.insert(name, Mark::Done { reaches_input });
        reaches_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ModelTopology, WeightEntry, WeightGroup};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn node(name: &str, op: &str, input: &[&str]) -> GraphNode {
        GraphNode {
            name: name.to_string(),
            op: op.to_string(),
            input: input.iter().map(|s| s.to_string()).collect(),
            attr: BTreeMap::new(),
            extra: Default::default(),
        }
    }

    fn write_package(dir: &Path, nodes: Vec<GraphNode>, shard_bytes: Option<usize>) {
        let artifact = ModelArtifact {
            format: "graph-model".into(),
            generated_by: "2.13.0".into(),
            converted_by: "test".into(),
            model_topology: ModelTopology {
                node: nodes,
                extra: Default::default(),
            },
            weights_manifest: vec![WeightGroup {
                paths: vec!["group1-shard1of1.bin".into()],
                weights: vec![
                    WeightEntry::new("conv/kernel", &[3, 3, 3, 4], "float32"),
                    WeightEntry::new("conv/bias", &[4], "float32"),
                ],
            }],
            signature: None,
            user_defined_metadata: None,
        };
        artifact.save(dir).unwrap();
        if let Some(len) = shard_bytes {
            std::fs::write(dir.join("group1-shard1of1.bin"), vec![0u8; len]).unwrap();
        }
    }

    const WELL_SIZED: usize = (3 * 3 * 3 * 4 + 4) * 4;

    fn connected_graph() -> Vec<GraphNode> {
        vec![
            node("input", "Placeholder", &[]),
            node("conv/kernel", "Const", &[]),
            node("conv", "Conv2D", &["input", "conv/kernel"]),
            node("output", "Identity", &["conv:0"]),
        ]
    }

    #[test]
    fn test_well_formed_package_is_valid() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), connected_graph(), Some(WELL_SIZED));
        let report = validate_package(dir.path()).unwrap();
        assert!(report.is_valid(), "{:?}", report.issues);
    }

    #[test]
    fn test_missing_shard_is_reported() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), connected_graph(), None);
        let report = validate_package(dir.path()).unwrap();
        assert_eq!(
            report.issues,
            vec![Issue::MissingShard {
                path: "group1-shard1of1.bin".into()
            }]
        );
    }

    #[test]
    fn test_size_mismatch_is_surfaced() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), connected_graph(), Some(100));
        let report = validate_package(dir.path()).unwrap();
        assert!(!report.is_valid());
        assert!(report.is_structurally_valid());
        assert_eq!(
            report.size_mismatches(),
            vec![&Issue::ShardSizeMismatch {
                group: 0,
                expected: WELL_SIZED as u64,
                actual: 100
            }]
        );
    }

    #[test]
    fn test_dangling_reference_is_malformed() {
        let dir = TempDir::new().unwrap();
        let nodes = vec![
            node("input", "Placeholder", &[]),
            node("output", "Identity", &["conv_output"]),
        ];
        write_package(dir.path(), nodes, Some(WELL_SIZED));
        let report = validate_package(dir.path()).unwrap();
        assert_eq!(
            report.issues,
            vec![
                Issue::UnresolvedInput {
                    node: "output".into(),
                    reference: "conv_output".into()
                },
                Issue::Disconnected {
                    output: "output".into()
                },
            ]
        );
        assert!(!report.is_structurally_valid());
    }

    #[test]
    fn test_overflowing_shape_is_an_issue() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact {
            format: "graph-model".into(),
            generated_by: "2.13.0".into(),
            converted_by: "test".into(),
            model_topology: ModelTopology {
                node: connected_graph(),
                extra: Default::default(),
            },
            weights_manifest: vec![WeightGroup {
                paths: vec!["group1-shard1of1.bin".into()],
                weights: vec![WeightEntry::new(
                    "conv/kernel",
                    &[4_294_967_296, 4_294_967_296, 2],
                    "float32",
                )],
            }],
            signature: None,
            user_defined_metadata: None,
        };
        artifact.save(dir.path()).unwrap();
        std::fs::write(dir.path().join("group1-shard1of1.bin"), [0u8; 8]).unwrap();

        let report = validate_package(dir.path()).unwrap();
        assert_eq!(
            report.issues,
            vec![Issue::SizeOverflow {
                group: 0,
                weight: "conv/kernel".into()
            }]
        );
    }

    #[test]
    fn test_missing_input_and_output_nodes() {
        let dir = TempDir::new().unwrap();
        write_package(dir.path(), vec![node("c", "Const", &[])], Some(WELL_SIZED));
        let report = validate_package(dir.path()).unwrap();
        assert!(report.issues.contains(&Issue::NoInputNode));
        assert!(report.issues.contains(&Issue::NoOutputNode));
    }

    #[test]
    fn test_cycle_is_reported_once() {
        let dir = TempDir::new().unwrap();
        let nodes = vec![
            node("input", "Placeholder", &[]),
            node("a", "Add", &["b", "input"]),
            node("b", "Mul", &["a"]),
            node("output", "Identity", &["a"]),
        ];
        write_package(dir.path(), nodes, Some(WELL_SIZED));
        let report = validate_package(dir.path()).unwrap();
        let cycles: Vec<_> = report
            .issues
            .iter()
            .filter(|i| matches!(i, Issue::Cycle { .. }))
            .collect();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_unsafe_shard_path() {
        assert!(is_contained("group1-shard1of1.bin"));
        assert!(is_contained("./shards/a.bin"));
        assert!(!is_contained("../escape.bin"));
        assert!(!is_contained("/etc/passwd"));
    }

    #[test]
    fn test_unparseable_descriptor_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.json"), "{not json").unwrap();
        assert!(matches!(
            validate_package(dir.path()),
            Err(PrepError::Json(_))
        ));
    }

    #[test]
    fn test_missing_descriptor_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            validate_package(dir.path()),
            Err(PrepError::NotFound(_))
        ));
    }

    #[test]
    fn test_issue_display_names_the_problem() {
        let issue = Issue::ShardSizeMismatch {
            group: 0,
            expected: 3584,
            actual: 1024,
        };
        assert_eq!(
            issue.to_string(),
            "weight group 0 holds 1024 bytes but its manifest implies 3584"
        );
    }
}
