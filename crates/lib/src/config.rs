//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.skillrt/config.json`). A missing file
//! means defaults: skills under `~/.skillrt/skills`, 30 second handler timeout, the
//! bundled interpreter table.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::Interpreter;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Skill roots and runtime-authoring directories.
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Handler execution settings.
    #[serde(default)]
    pub handlers: HandlersConfig,

    /// Default working directory passed to handlers as `workDir` (default ~/.skillrt/workspace).
    pub workspace: Option<PathBuf>,
}

/// Skill load config (dirs, disabled list, scratch dir).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfig {
    /// Override the primary skill root. Relative paths are resolved against the config file's parent. Persisted runtime tools are written here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Extra skill roots, scanned after the primary root; later roots win on tool name clashes.
    #[serde(default)]
    pub extra_dirs: Vec<PathBuf>,
    /// Skill names to skip even when found in a root.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Where handlers of non-persistent runtime tools are written (default: a `skillrt-runtime` dir under the system temp dir).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Handler execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlersConfig {
    /// Per-call timeout for subprocess handlers, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Interpreter overrides keyed by handler file extension (e.g. "py" -> python3.12).
    #[serde(default)]
    pub interpreters: BTreeMap<String, Interpreter>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            interpreters: BTreeMap::new(),
        }
    }
}

impl HandlersConfig {
    /// Timeout as a duration; zero is treated as one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SKILLRT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".skillrt").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_against(config_path: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        config_parent(config_path).join(p)
    }
}

/// Default skill root when no override is set: `skills` subdirectory of the config file's parent.
pub fn skills_dir(config_path: &Path) -> PathBuf {
    config_parent(config_path).join("skills")
}

/// Resolve the primary skill root: `config.skills.directory` if set, otherwise the default `skills` subdirectory.
pub fn resolve_skills_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.skills.directory {
        Some(d) if !d.as_os_str().is_empty() => resolve_against(config_path, d),
        _ => skills_dir(config_path),
    }
}

/// All skill roots in scan order: primary root first, then `extraDirs`.
pub fn skill_roots(config: &Config, config_path: &Path) -> Vec<PathBuf> {
    let mut roots = vec![resolve_skills_dir(config, config_path)];
    for d in &config.skills.extra_dirs {
        if d.as_os_str().is_empty() {
            continue;
        }
        let root = resolve_against(config_path, d);
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

/// Scratch directory for non-persistent runtime tools.
pub fn resolve_scratch_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.skills.scratch_dir {
        Some(d) if !d.as_os_str().is_empty() => resolve_against(config_path, d),
        _ => std::env::temp_dir().join("skillrt-runtime"),
    }
}

/// Resolve the workspace directory handed to handlers as `workDir`.
pub fn resolve_workspace_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.workspace {
        Some(w) if !w.as_os_str().is_empty() => resolve_against(config_path, w),
        _ => config_parent(config_path).join("workspace"),
    }
}
