//! `skillrt init`: seed a config file and create the directories the runtime reads and writes.
//!
//! Every directory is taken from the config itself, so re-running init after editing
//! `skills.directory`, `skills.scratchDir` or `workspace` creates the new locations.
//! Bundled skills (`crates/lib/config/skills/`) go into the primary skill root once.

use anyhow::{Context, Result};
use include_dir::{include_dir, Dir};
use std::path::{Path, PathBuf};

use crate::config::{self, Config, HandlersConfig, SkillsConfig};

static BUNDLED_SKILLS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/config/skills");

/// Config written on first init. Paths are relative to the config file's directory.
pub fn seed_config() -> Config {
    Config {
        skills: SkillsConfig {
            directory: Some(PathBuf::from("skills")),
            scratch_dir: Some(PathBuf::from("scratch")),
            ..SkillsConfig::default()
        },
        handlers: HandlersConfig::default(),
        workspace: Some(PathBuf::from("workspace")),
    }
}

/// Fail unless init has run: the config file, the primary skill root and the workspace must exist.
pub fn require_initialized(config_path: &Path, config: &Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `skillrt init` first (config file not found: {})",
            config_path.display()
        );
    }
    let required = [
        ("skills directory", config::resolve_skills_dir(config, config_path)),
        ("workspace", config::resolve_workspace_dir(config, config_path)),
    ];
    for (what, dir) in required {
        if !dir.is_dir() {
            anyhow::bail!(
                "configuration not initialized; run `skillrt init` first ({} not found: {})",
                what,
                dir.display()
            );
        }
    }
    Ok(())
}

/// Write the seed config if none exists, then create the workspace, scratch dir and
/// primary skill root named by the (possibly user-edited) config. Returns the config dir.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let text = serde_json::to_string_pretty(&seed_config())?;
        std::fs::write(config_path, text)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }
    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;

    for dir in [
        config::resolve_workspace_dir(&config, config_path),
        config::resolve_scratch_dir(&config, config_path),
    ] {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
            log::info!("created {}", dir.display());
        }
    }

    let skills_dir = config::resolve_skills_dir(&config, config_path);
    if skills_dir.exists() {
        log::debug!("skills directory already exists at {}, skipping", skills_dir.display());
    } else {
        std::fs::create_dir_all(&skills_dir)
            .with_context(|| format!("creating skills directory {}", skills_dir.display()))?;
        BUNDLED_SKILLS.extract(&skills_dir).with_context(|| {
            format!("extracting bundled skills to {}", skills_dir.display())
        })?;
        log::info!("extracted bundled skills to {}", skills_dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillScanner;
    use crate::tools::NativeModules;
    use crate::{RuntimeOptions, SkillRuntime};
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("skillrt-init-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn init_seeds_config_and_extracts_bundled_skills() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert!(require_initialized(&config_path, &config).is_err());

        assert_eq!(init_config_dir(&config_path).unwrap(), dir);
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        require_initialized(&config_path, &config).unwrap();
        assert_eq!(config.handlers.timeout_secs, 30);
        assert_eq!(config::resolve_scratch_dir(&config, &config_path), dir.join("scratch"));
        assert!(dir.join("scratch").is_dir());
        assert!(dir.join("workspace").is_dir());

        let skills: Vec<_> = SkillScanner::new(config::skill_roots(&config, &config_path))
            .scan()
            .collect();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].unit.name, "count-words");
        assert_eq!(skills[0].tools[0].name, "count_words");
        assert!(skills[0].warnings.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rerun_honours_edited_directories() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        init_config_dir(&config_path).unwrap();

        std::fs::write(
            &config_path,
            r#"{"skills": {"directory": "mine", "scratchDir": "tmp"}, "handlers": {"timeoutSecs": 3}}"#,
        )
        .unwrap();
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert_eq!(config.handlers.timeout_secs, 3);
        assert!(dir.join("mine/count-words/SKILL.md").is_file());
        assert!(dir.join("tmp").is_dir());
        require_initialized(&config_path, &config).unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ephemeral_tools_land_in_the_seeded_scratch_dir() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        init_config_dir(&config_path).unwrap();
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        let rt = SkillRuntime::new(
            RuntimeOptions::from_config(&config, &config_path),
            NativeModules::new(),
        );
        let out = rt
            .call_tool(
                crate::tools::meta::DEFINE_TOOL,
                json!({"name": "ping", "description": "Ping", "code": "echo '{}'", "language": "sh"}),
                &dir.join("workspace"),
            )
            .await;
        assert!(!out.is_error(), "{:?}", out);
        let entries = std::fs::read_dir(dir.join("scratch")).unwrap().count();
        assert_eq!(entries, 1);
        let _ = std::fs::remove_dir_all(dir);
    }
}
