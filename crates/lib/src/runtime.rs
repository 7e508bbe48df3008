//! Skill runtime: scanner, resolver, registry, dispatcher and author wired together.
//!
//! A host builds one [`SkillRuntime`] per process, calls [`SkillRuntime::load`] to
//! populate the registry from the skill roots, then serves `list_tools` / `call_tool`.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Config};
use crate::exec::Interpreter;
use crate::skills::{SkillScanner, SkillUnit, ToolAuthor};
use crate::tools::meta;
use crate::tools::{
    Dispatcher, HandlerResolver, NativeModules, StrategyTable, ToolCallResult, ToolInfo,
    ToolOrigin, ToolRegistry,
};

/// Everything needed to build a runtime without a config file.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Skill roots in scan order. The first one also receives persisted runtime tools.
    pub roots: Vec<PathBuf>,
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
    pub interpreters: BTreeMap<String, Interpreter>,
    /// Skill names skipped during load.
    pub disabled: Vec<String>,
}

impl RuntimeOptions {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            scratch_dir: std::env::temp_dir().join("skillrt-runtime"),
            timeout: Duration::from_secs(30),
            interpreters: BTreeMap::new(),
            disabled: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, config_path: &Path) -> Self {
        Self {
            roots: config::skill_roots(config, config_path),
            scratch_dir: config::resolve_scratch_dir(config, config_path),
            timeout: config.handlers.timeout(),
            interpreters: config.handlers.interpreters.clone(),
            disabled: config.skills.disabled.clone(),
        }
    }
}

/// Outcome of one load pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Skills loaded, in scan order (a name may repeat across roots).
    pub skills: Vec<SkillUnitSummary>,
    /// Tools registered by this pass, in registration order.
    pub tools: Vec<String>,
    /// Skipped entries, unresolvable tools and manifest errors.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillUnitSummary {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub tools: usize,
}

impl SkillUnitSummary {
    fn new(unit: &SkillUnit, tools: usize) -> Self {
        Self {
            name: unit.name.clone(),
            description: unit.description.clone(),
            path: unit.base_path.clone(),
            tools,
        }
    }
}

pub struct SkillRuntime {
    scanner: SkillScanner,
    resolver: HandlerResolver,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    author: Arc<ToolAuthor>,
    disabled: Vec<String>,
}

impl SkillRuntime {
    /// Build a runtime with an empty registry holding only the meta-tools.
    /// `native` supplies the modules `.native` handler files may name.
    pub fn new(options: RuntimeOptions, native: NativeModules) -> Self {
        let strategies = Arc::new(StrategyTable::with_defaults(
            options.timeout,
            native,
            &options.interpreters,
        ));
        let resolver = HandlerResolver::new(strategies.clone());
        let registry = Arc::new(ToolRegistry::new());
        let persist_root = options
            .roots
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("skills"));
        let author = Arc::new(ToolAuthor::new(
            persist_root,
            options.scratch_dir,
            resolver.clone(),
            registry.clone(),
        ));
        meta::install(&registry, &author, strategies.authorable());

        Self {
            scanner: SkillScanner::new(options.roots),
            resolver,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            author,
            disabled: options.disabled,
        }
    }

    pub fn from_config(config: &Config, config_path: &Path, native: NativeModules) -> Self {
        Self::new(RuntimeOptions::from_config(config, config_path), native)
    }

    /// Scan every root and register the tools found. Later roots override earlier ones.
    /// Safe to call again to pick up skills written since the last pass.
    pub fn load(&self) -> LoadReport {
        let mut report = LoadReport::default();
        for skill in self.scanner.scan() {
            if self.disabled.iter().any(|d| d == &skill.unit.name) {
                log::info!("skill {} is disabled, skipping", skill.unit.name);
                continue;
            }
            report.warnings.extend(
                skill
                    .warnings
                    .iter()
                    .map(|w| format!("{}: {}", skill.unit.name, w)),
            );

            let mut registered = 0;
            for decl in &skill.tools {
                let tool = match self
                    .resolver
                    .resolve(decl, &skill.unit.name, &skill.unit.base_path)
                {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!("skill {}: tool {} not loaded: {}", skill.unit.name, decl.name, e);
                        report
                            .warnings
                            .push(format!("{}: {}: {}", skill.unit.name, decl.name, e));
                        continue;
                    }
                };
                match self
                    .registry
                    .register(tool, skill.unit.name.clone(), ToolOrigin::Discovered)
                {
                    Ok(_) => {
                        registered += 1;
                        report.tools.push(decl.name.clone());
                    }
                    Err(e) => {
                        log::warn!("skill {}: {}", skill.unit.name, e);
                        report.warnings.push(format!("{}: {}", skill.unit.name, e));
                    }
                }
            }
            report.skills.push(SkillUnitSummary::new(&skill.unit, registered));
        }
        log::info!(
            "loaded {} skills, {} tools ({} warnings)",
            report.skills.len(),
            report.tools.len(),
            report.warnings.len()
        );
        report
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.dispatcher.list_tools()
    }

    /// Invoke a tool; always yields `{"result"}` or `{"error"}`.
    pub async fn call_tool(&self, name: &str, args: Value, work_dir: &Path) -> ToolCallResult {
        self.dispatcher.call_tool(name, args, work_dir).await
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn author(&self) -> &ToolAuthor {
        &self.author
    }

    pub fn roots(&self) -> &[PathBuf] {
        self.scanner.roots()
    }

    /// Drop every live tool, meta-tools included. Calls made afterwards get `ToolNotFound`.
    pub fn shutdown(&self) {
        self.registry.clear();
        log::debug!("skill runtime shut down");
    }
}
