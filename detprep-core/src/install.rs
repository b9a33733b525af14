//! Installing externally produced packages into the models tree.
//!
//! Replacing a model moves the current package aside as a timestamped backup,
//! copies the new package in and writes a `model_info.json` sidecar describing
//! how the web app should pre- and post-process the model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::artifact::{MODEL_JSON, ModelArtifact};
use crate::error::PrepError;
use crate::persistence;

pub const MODEL_INFO_JSON: &str = "model_info.json";
const BACKUP_MARKER: &str = "_backup_";

/// Logical models the web app loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Face,
    Plate,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Face => "face",
            ModelKind::Plate => "plate",
        }
    }

    pub fn dir_name(&self) -> String {
        crate::model_dir_name(self.as_str())
    }

    /// Sidecar written when the source package brings none.
    pub fn default_info(&self) -> Value {
        let mut info = json!({
            "version": "1.0.0",
            "updated_at": Utc::now().to_rfc3339(),
            "input_shape": [1, 640, 640, 3],
            "confidence_threshold": 0.5,
            "iou_threshold": 0.4,
            "preprocessing": {
                "normalize": true,
                "mean": [0, 0, 0],
                "std": [255, 255, 255]
            },
            "postprocessing": {
                "format": "yolo",
                "bbox_format": "xywh_center"
            }
        });
        let specific = match self {
            ModelKind::Face => json!({
                "name": "Custom Face Detection Model",
                "description": "Custom face detection model",
                "classes": ["face"],
                "output_shape": [1, 25200, 6],
                "max_detections": 10,
                "postprocessing": {
                    "format": "yolo",
                    "bbox_format": "xywh_center",
                    "output_format": "[x, y, w, h, confidence, class]"
                }
            }),
            ModelKind::Plate => json!({
                "name": "Custom Food Detection Model",
                "description": "Custom plate and food detection model",
                "classes": ["plate", "bowl", "food", "drink"],
                "output_shape": [1, 25200, 85],
                "max_detections": 20,
                "confidence_threshold": 0.6,
                "price_mapping": {
                    "plate": 0,
                    "bowl": 0,
                    "food": 15.0,
                    "drink": 8.0
                },
                "postprocessing": {
                    "format": "yolo",
                    "bbox_format": "xywh_center",
                    "output_format": "[x, y, w, h, confidence, class1_prob, class2_prob, ...]"
                }
            }),
        };
        merge_shallow(&mut info, specific);
        info
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "face" => Ok(ModelKind::Face),
            "plate" => Ok(ModelKind::Plate),
            other => Err(PrepError::UnsupportedKind(format!(
                "'{other}' (expected 'face' or 'plate')"
            ))),
        }
    }
}

/// Top-level keys of `overlay` replace those of `base`.
fn merge_shallow(base: &mut Value, overlay: Value) {
    if let (Some(base), Value::Object(overlay)) = (base.as_object_mut(), overlay) {
        base.extend(overlay);
    }
}

/// What [`ModelInstaller::replace`] did.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceOutcome {
    pub kind: ModelKind,
    pub target_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub copied_files: Vec<String>,
    pub info: Value,
}

/// A backed-up package directory.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub created: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Manages the packages under a models root.
pub struct ModelInstaller {
    models_root: PathBuf,
}

impl ModelInstaller {
    pub fn new(models_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
        }
    }

    /// Install the package whose descriptor is `model_json` as `kind`.
    ///
    /// `custom_info` keys override the sidecar's; `updated_at` is always set to now.
    pub fn replace(
        &self,
        kind: ModelKind,
        model_json: &Path,
        custom_info: Option<Value>,
    ) -> Result<ReplaceOutcome, PrepError> {
        if !model_json.is_file() {
            return Err(PrepError::not_found(format!(
                "model file {} does not exist",
                model_json.display()
            )));
        }
        let source_dir = model_json
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        check_source_package(source_dir)?;

        let target_dir = self.models_root.join(kind.dir_name());
        // a source inside the target moves along with it when the target is backed up
        let inside_target = if target_dir.exists() {
            source_dir
                .canonicalize()?
                .strip_prefix(target_dir.canonicalize()?)
                .ok()
                .map(Path::to_path_buf)
        } else {
            None
        };
        let backup_dir = self.backup(&target_dir)?;
        if let Some(backup) = &backup_dir {
            info!(backup = %backup.display(), "Existing model backed up");
        }
        let copy_from = match (&backup_dir, inside_target) {
            (Some(backup), Some(relative)) => backup.join(relative),
            _ => source_dir.to_path_buf(),
        };

        std::fs::create_dir_all(&target_dir)?;
        let mut copied_files = Vec::new();
        for entry in std::fs::read_dir(&copy_from)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            std::fs::copy(entry.path(), target_dir.join(entry.file_name()))?;
            copied_files.push(entry.file_name().to_string_lossy().into_owned());
        }
        copied_files.sort();

        let info = self.write_info(kind, &copy_from, &target_dir, custom_info)?;
        info!(
            kind = %kind,
            target = %target_dir.display(),
            files = copied_files.len(),
            "Model replaced"
        );

        Ok(ReplaceOutcome {
            kind,
            target_dir,
            backup_dir,
            copied_files,
            info,
        })
    }

    fn write_info(
        &self,
        kind: ModelKind,
        source_dir: &Path,
        target_dir: &Path,
        custom_info: Option<Value>,
    ) -> Result<Value, PrepError> {
        let source_info = source_dir.join(MODEL_INFO_JSON);
        let mut info = if source_info.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&source_info)?)?
        } else {
            kind.default_info()
        };
        if !info.is_object() {
            info = Value::Object(Map::new());
        }
        if let Some(custom) = custom_info {
            merge_shallow(&mut info, custom);
        }
        merge_shallow(
            &mut info,
            json!({ "updated_at": Utc::now().to_rfc3339() }),
        );

        persistence::write_json_atomic(&target_dir.join(MODEL_INFO_JSON), &info)?;
        Ok(info)
    }

    /// Rename `dir` to a fresh backup name, if it exists.
    fn backup(&self, dir: &Path) -> Result<Option<PathBuf>, PrepError> {
        if !dir.exists() {
            return Ok(None);
        }
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PrepError::invalid_input(format!("{} has no name", dir.display())))?;

        let mut stamp = Utc::now().timestamp_millis();
        let backup = loop {
            let candidate = self.models_root.join(format!("{base}{BACKUP_MARKER}{stamp}"));
            if !candidate.exists() {
                break candidate;
            }
            stamp += 1;
        };
        std::fs::rename(dir, &backup)?;
        Ok(Some(backup))
    }

    /// Backups under the models root, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>, PrepError> {
        if !self.models_root.exists() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.models_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.contains(BACKUP_MARKER) || !entry.file_type()?.is_dir() {
                continue;
            }
            let meta = entry.metadata()?;
            let created = meta.created().or_else(|_| meta.modified())?;
            backups.push(BackupEntry {
                size_bytes: persistence::dir_file_size(&entry.path())?,
                created: DateTime::<Utc>::from(created),
                name,
            });
        }
        backups.sort_by(|a, b| b.created.cmp(&a.created).then(b.name.cmp(&a.name)));
        Ok(backups)
    }

    /// Put backup `name` back in place, backing up the current package first.
    ///
    /// Returns the directory the restored package now lives in.
    pub fn restore(&self, name: &str) -> Result<PathBuf, PrepError> {
        let target_name = match name.split_once(BACKUP_MARKER) {
            Some((target, _)) if !name.contains(['/', '\\']) && !target.is_empty() => target,
            _ => {
                return Err(PrepError::invalid_input(format!(
                    "'{name}' is not a backup name"
                )));
            }
        };
        let backup = self.models_root.join(name);
        if !backup.is_dir() {
            return Err(PrepError::not_found(format!("backup '{name}'")));
        }
        if !backup.join(MODEL_JSON).is_file() {
            return Err(PrepError::invalid_artifact(format!(
                "backup '{name}' has no {MODEL_JSON}"
            )));
        }

        let target = self.models_root.join(target_name);
        if let Some(previous) = self.backup(&target)? {
            info!(backup = %previous.display(), "Current model backed up before restore");
        }
        std::fs::rename(&backup, &target)?;
        info!(restored = name, target = %target.display(), "Backup restored");
        Ok(target)
    }
}

/// Checks a package is complete enough to install: descriptor, at least one
/// `.bin` shard, and the two mandatory descriptor sections.
fn check_source_package(dir: &Path) -> Result<(), PrepError> {
    let has_shard = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .any(|e| e.path().extension().is_some_and(|ext| ext == "bin"));
    if !has_shard {
        return Err(PrepError::invalid_artifact(format!(
            "no weight files (.bin) found in {}",
            dir.display()
        )));
    }

    let text = std::fs::read_to_string(dir.join(MODEL_JSON))?;
    let value: Value = serde_json::from_str(&text)?;
    for key in ["modelTopology", "weightsManifest"] {
        if value.get(key).is_none() {
            return Err(PrepError::invalid_artifact(format!(
                "{MODEL_JSON} is missing {key}"
            )));
        }
    }
    serde_json::from_value::<ModelArtifact>(value)
        .map_err(|e| PrepError::invalid_artifact(format!("{MODEL_JSON} does not parse: {e}")))?;
    Ok(())
}
