//! Property-based tests for placeholder synthesis.

use proptest::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

use detprep_core::artifact::MODEL_JSON;
use detprep_core::synth::conventional_shard_size;
use detprep_core::{ArtifactSynthesizer, ShardSizing, validate_package};

const TOP_LEVEL_KEYS: [&str; 5] = [
    "format",
    "generatedBy",
    "convertedBy",
    "modelTopology",
    "weightsManifest",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn descriptor_parses_with_required_keys(
        name in "[a-z][a-z0-9_-]{0,15}",
        channels in 1u64..=256,
    ) {
        let root = TempDir::new().unwrap();
        let model = ArtifactSynthesizer::new(root.path())
            .synthesize(&name, channels)
            .unwrap();

        let text = std::fs::read_to_string(model.dir.join(MODEL_JSON)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        for key in TOP_LEVEL_KEYS {
            prop_assert!(value.get(key).is_some(), "missing {}", key);
        }
        prop_assert_eq!(value["format"].as_str(), Some("graph-model"));
        prop_assert!(value["modelTopology"]["node"].is_array());
        prop_assert!(value["weightsManifest"].is_array());
    }

    #[test]
    fn convention_sizing_follows_channels(channels in 1u64..=256) {
        let root = TempDir::new().unwrap();
        let model = ArtifactSynthesizer::new(root.path())
            .synthesize("m", channels)
            .unwrap();
        prop_assert_eq!(Some(model.shard_bytes), conventional_shard_size(channels));
        prop_assert_eq!(
            std::fs::metadata(&model.shard_path).unwrap().len(),
            channels * 32
        );
    }

    #[test]
    fn manifest_sizing_never_mismatches(channels in 1u64..=256) {
        let root = TempDir::new().unwrap();
        let model = ArtifactSynthesizer::new(root.path())
            .with_sizing(ShardSizing::Manifest)
            .synthesize("m", channels)
            .unwrap();
        let report = validate_package(&model.dir).unwrap();
        prop_assert!(report.size_mismatches().is_empty());
    }
}
