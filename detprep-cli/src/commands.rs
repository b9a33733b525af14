//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use std::path::Path;

use detprep_core::config::workspace_config_path;
use detprep_core::{ModelInstaller, ModelKind, PrepConfig, validate_package};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: PrepConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Validate { dir, json } => handle_validate(&dir, json),
        Commands::Replace { kind, model, info } => {
            handle_replace(&config, &kind, &model, info.as_deref())
        }
        Commands::Backups => handle_backups(&config),
        Commands::Restore { name } => handle_restore(&config, &name),
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

fn handle_validate(dir: &Path, json: bool) -> anyhow::Result<()> {
    let report = validate_package(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_valid() {
        println!("{}: valid", dir.display());
    } else {
        println!("{}: {} issue(s)", dir.display(), report.issues.len());
        for issue in &report.issues {
            println!("  - {issue}");
        }
        if report.is_structurally_valid() {
            println!("  Only shard sizes disagree with the manifest (expected for placeholders).");
        }
    }

    if !report.is_valid() {
        anyhow::bail!("package at {} is not valid", dir.display());
    }
    Ok(())
}

/// Parse `--info`; it must be a JSON object.
fn parse_custom_info(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("--info is not valid JSON: {}", e))?;
    if !value.is_object() {
        anyhow::bail!("--info must be a JSON object");
    }
    Ok(Some(value))
}

fn handle_replace(
    config: &PrepConfig,
    kind: &str,
    model: &Path,
    info: Option<&str>,
) -> anyhow::Result<()> {
    let kind: ModelKind = kind.parse()?;
    let custom_info = parse_custom_info(info)?;

    println!("Replacing the {kind} detection model with {}", model.display());
    let installer = ModelInstaller::new(&config.models_root);
    let outcome = installer.replace(kind, model, custom_info)?;

    for file in &outcome.copied_files {
        println!("  copied {file}");
    }
    let field = |key: &str| {
        outcome.info[key]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| "-".to_string())
    };
    println!("\nModel replaced.");
    println!("  Name:    {}", field("name"));
    println!("  Version: {}", field("version"));
    println!("  Target:  {}", outcome.target_dir.display());
    if let Some(backup) = &outcome.backup_dir {
        if let Some(name) = backup.file_name() {
            println!("\nTo roll back, run:");
            println!("  detprep restore {}", name.to_string_lossy());
        }
    }
    println!("\nRestart the app to load the new model.");
    Ok(())
}

fn handle_backups(config: &PrepConfig) -> anyhow::Result<()> {
    let backups = ModelInstaller::new(&config.models_root).list_backups()?;
    if backups.is_empty() {
        println!("No backups found in {}", config.models_root.display());
        return Ok(());
    }

    println!("Model backups ({}):", backups.len());
    for (index, backup) in backups.iter().enumerate() {
        println!("{}. {}", index + 1, backup.name);
        println!("   Created: {}", backup.created.format("%Y-%m-%d %H:%M:%S UTC"));
        println!(
            "   Size:    {:.2} MB",
            backup.size_bytes as f64 / 1024.0 / 1024.0
        );
    }
    Ok(())
}

fn handle_restore(config: &PrepConfig, name: &str) -> anyhow::Result<()> {
    let target = ModelInstaller::new(&config.models_root).restore(name)?;
    println!("Restored {} to {}", name, target.display());
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    config: &PrepConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = toml::to_string_pretty(&PrepConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_custom_info() {
        assert!(parse_custom_info(None).unwrap().is_none());
        let info = parse_custom_info(Some(r#"{"version": "2.0.0"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(info["version"], "2.0.0");
        assert!(parse_custom_info(Some("[1, 2]")).is_err());
        assert!(parse_custom_info(Some("{not json")).is_err());
    }

    #[test]
    fn test_config_init_writes_loadable_defaults() {
        let ws = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, &PrepConfig::default(), ws.path()).unwrap();

        let path = workspace_config_path(ws.path());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("models_root"));
        let loaded = detprep_core::load_config(ws.path(), None).unwrap();
        assert_eq!(loaded.models_root, ws.path().join("public/models"));

        // a second init leaves the file alone
        std::fs::write(&path, "models_root = \"custom\"\n").unwrap();
        handle_config(ConfigAction::Init, &PrepConfig::default(), ws.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "models_root = \"custom\"\n"
        );
    }

    #[test]
    fn test_replace_rejects_unknown_kind() {
        let ws = TempDir::new().unwrap();
        let mut config = PrepConfig::default();
        config.resolve_paths(ws.path());
        let err = handle_replace(&config, "car", &ws.path().join("model.json"), None)
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported model type"));
    }

    #[test]
    fn test_validate_reports_placeholder_gaps() {
        let ws = TempDir::new().unwrap();
        let model = detprep_core::ArtifactSynthesizer::new(ws.path())
            .synthesize("face", 32)
            .unwrap();
        assert!(handle_validate(&model.dir, false).is_err());
    }
}
