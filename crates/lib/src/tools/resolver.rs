//! Bind tool declarations to invocable handlers.
//!
//! Resolution never runs a handler; it only checks the script path, picks the
//! strategy for its extension and asks the strategy to prepare an invoke capability.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::strategy::{HandlerError, StrategyTable, ToolHandler};
use crate::skills::{ToolDeclaration, INSTRUCTIONS_FILE};

/// A declaration bound to its handler. Owned by the registry entry holding it.
#[derive(Clone)]
pub struct ResolvedTool {
    pub declaration: ToolDeclaration,
    /// Name of the skill the tool came from (a back-reference, not ownership).
    pub source_skill: String,
    pub handler: Arc<dyn ToolHandler>,
    /// True when the declaration has no script and the handler is the informational stub.
    pub is_stub: bool,
}

impl ResolvedTool {
    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        self.handler.invoke(args).await
    }
}

impl std::fmt::Debug for ResolvedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTool")
            .field("declaration", &self.declaration)
            .field("source_skill", &self.source_skill)
            .field("is_stub", &self.is_stub)
            .finish_non_exhaustive()
    }
}

/// Resolution failure; the tool never becomes callable.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("UnsafeScriptPath: {script} escapes {base}")]
    UnsafeScriptPath { script: String, base: PathBuf },
    #[error("UnsupportedHandlerLanguage: no execution strategy for {0}")]
    UnsupportedHandlerLanguage(String),
    #[error(transparent)]
    HandlerLoad(#[from] HandlerError),
}

/// Handler for tools without a script: points the caller at the skill's instructions.
pub struct StubHandler {
    payload: serde_json::Value,
}

impl StubHandler {
    pub fn new(tool: &str, skill: &str, base_path: &Path) -> Self {
        Self {
            payload: json!({
                "message": format!(
                    "Tool '{}' has no handler script. Follow the instructions in the '{}' skill to carry out this task.",
                    tool, skill
                ),
                "skill": skill,
                "instructions": base_path.join(INSTRUCTIONS_FILE).display().to_string(),
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for StubHandler {
    async fn invoke(&self, _args: serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        Ok(self.payload.clone())
    }
}

/// Chooses and prepares execution strategies for declarations.
#[derive(Clone)]
pub struct HandlerResolver {
    strategies: Arc<StrategyTable>,
}

impl HandlerResolver {
    pub fn new(strategies: Arc<StrategyTable>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn resolve(
        &self,
        declaration: &ToolDeclaration,
        skill_name: &str,
        base_path: &Path,
    ) -> Result<ResolvedTool, ResolveError> {
        let Some(script) = declaration.script.as_deref() else {
            return Ok(ResolvedTool {
                declaration: declaration.clone(),
                source_skill: skill_name.to_string(),
                handler: Arc::new(StubHandler::new(&declaration.name, skill_name, base_path)),
                is_stub: true,
            });
        };

        let path = confined_join(base_path, script)?;
        let strategy = self
            .strategies
            .for_path(&path)
            .ok_or_else(|| ResolveError::UnsupportedHandlerLanguage(script.to_string()))?;
        let handler = strategy.prepare(&path)?;
        log::debug!(
            "resolved tool {} -> {} ({})",
            declaration.name,
            path.display(),
            strategy.language()
        );
        Ok(ResolvedTool {
            declaration: declaration.clone(),
            source_skill: skill_name.to_string(),
            handler,
            is_stub: false,
        })
    }
}

/// Join `relative` onto `base`, refusing anything that lands outside `base`:
/// absolute paths, `..` walking above the base, and (once the file exists) symlinks
/// pointing out of it.
pub fn confined_join(base: &Path, relative: &str) -> Result<PathBuf, ResolveError> {
    let unsafe_path = || ResolveError::UnsafeScriptPath {
        script: relative.to_string(),
        base: base.to_path_buf(),
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(p) => parts.push(p),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(unsafe_path());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(unsafe_path()),
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path());
    }
    let joined: PathBuf = parts.iter().fold(base.to_path_buf(), |acc, p| acc.join(p));

    if let (Ok(real), Ok(real_base)) = (joined.canonicalize(), base.canonicalize()) {
        if !real.starts_with(&real_base) {
            return Err(unsafe_path());
        }
    }
    Ok(joined)
}
