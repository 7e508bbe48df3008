//! Built-in meta-tools for runtime tool authoring: `define_tool` and `remove_tool`.
//!
//! Both are ordinary registry entries (origin `Builtin`, protected from removal). Their
//! handlers hold weak references back to the runtime pieces they drive, so the
//! registry does not keep itself alive through its own entries.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use super::registry::{ToolOrigin, ToolRegistry};
use super::resolver::ResolvedTool;
use super::strategy::{HandlerError, ToolHandler};
use crate::skills::author::{default_language, ToolAuthor, ToolDraft};
use crate::skills::{ParamType, ParameterSet, ParameterSpec, ToolDeclaration};

pub const DEFINE_TOOL: &str = "define_tool";
pub const REMOVE_TOOL: &str = "remove_tool";
pub const BUILTIN_SKILL: &str = "builtin";

/// Register both meta-tools into `registry` and protect their names.
pub fn install(registry: &Arc<ToolRegistry>, author: &Arc<ToolAuthor>, languages: Vec<String>) {
    registry.protect(DEFINE_TOOL);
    registry.protect(REMOVE_TOOL);

    let define = ResolvedTool {
        declaration: define_declaration(languages),
        source_skill: BUILTIN_SKILL.to_string(),
        handler: Arc::new(DefineToolHandler {
            author: Arc::downgrade(author),
        }),
        is_stub: false,
    };
    let remove = ResolvedTool {
        declaration: remove_declaration(),
        source_skill: BUILTIN_SKILL.to_string(),
        handler: Arc::new(RemoveToolHandler {
            registry: Arc::downgrade(registry),
        }),
        is_stub: false,
    };
    for tool in [define, remove] {
        if let Err(e) = registry.register(tool, BUILTIN_SKILL, ToolOrigin::Builtin) {
            log::warn!("installing meta-tool: {}", e);
        }
    }
}

fn spec(ty: ParamType, description: &str, optional: bool) -> ParameterSpec {
    ParameterSpec {
        ty,
        description: description.to_string(),
        allowed: None,
        optional,
    }
}

fn define_declaration(languages: Vec<String>) -> ToolDeclaration {
    let mut parameters: ParameterSet = BTreeMap::new();
    parameters.insert(
        "name".to_string(),
        spec(ParamType::String, "Tool name, lowercase letters, digits and underscores", false),
    );
    parameters.insert(
        "description".to_string(),
        spec(ParamType::String, "What the tool does", false),
    );
    parameters.insert(
        "parameters".to_string(),
        spec(
            ParamType::Object,
            "Parameter name -> {type, description, enum?, optional?}",
            true,
        ),
    );
    parameters.insert(
        "code".to_string(),
        spec(
            ParamType::String,
            "Handler body; receives `args` and returns the JSON result",
            false,
        ),
    );
    parameters.insert(
        "persistent".to_string(),
        spec(
            ParamType::Boolean,
            "Write the tool as a skill directory so it survives restarts",
            true,
        ),
    );
    let mut language = spec(ParamType::String, "Handler language (default js)", true);
    if !languages.is_empty() {
        language.allowed = Some(languages.into_iter().map(Value::String).collect());
    }
    parameters.insert("language".to_string(), language);

    ToolDeclaration {
        name: DEFINE_TOOL.to_string(),
        description: "Create a new tool at runtime, optionally persisted as a skill".to_string(),
        script: None,
        parameters,
    }
}

fn remove_declaration() -> ToolDeclaration {
    let mut parameters: ParameterSet = BTreeMap::new();
    parameters.insert(
        "name".to_string(),
        spec(ParamType::String, "Name of the tool to remove", false),
    );
    ToolDeclaration {
        name: REMOVE_TOOL.to_string(),
        description: "Remove a tool from the live registry".to_string(),
        script: None,
        parameters,
    }
}

#[derive(Debug, Deserialize)]
struct DefineArgs {
    name: String,
    description: String,
    #[serde(default)]
    parameters: Option<ParameterSet>,
    code: String,
    #[serde(default)]
    persistent: Option<bool>,
    #[serde(default)]
    language: Option<String>,
}

struct DefineToolHandler {
    author: Weak<ToolAuthor>,
}

#[async_trait]
impl ToolHandler for DefineToolHandler {
    async fn invoke(&self, args: Value) -> Result<Value, HandlerError> {
        let author = self
            .author
            .upgrade()
            .ok_or_else(|| HandlerError::Execution("runtime is shutting down".to_string()))?;
        let args: DefineArgs = serde_json::from_value(args)
            .map_err(|e| HandlerError::Execution(format!("invalid define_tool arguments: {}", e)))?;
        let draft = ToolDraft {
            name: args.name,
            description: args.description,
            parameters: args.parameters.unwrap_or_default(),
            code: args.code,
            language: args.language.unwrap_or_else(default_language),
        };
        let persistent = args.persistent.unwrap_or(false);

        // Authoring touches the filesystem; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || {
            if persistent {
                author.persist(&draft).map(|unit| {
                    json!({
                        "name": draft.name,
                        "persistent": true,
                        "skill": unit.name,
                        "path": unit.base_path.display().to_string(),
                    })
                })
            } else {
                author.define_ephemeral(&draft).map(|_| {
                    json!({
                        "name": draft.name,
                        "persistent": false,
                    })
                })
            }
        })
        .await
        .map_err(|e| HandlerError::Execution(format!("define_tool task failed: {}", e)))?;
        result.map_err(|e| HandlerError::Execution(e.to_string()))
    }
}

struct RemoveToolHandler {
    registry: Weak<ToolRegistry>,
}

#[async_trait]
impl ToolHandler for RemoveToolHandler {
    async fn invoke(&self, args: Value) -> Result<Value, HandlerError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| HandlerError::Execution("runtime is shutting down".to_string()))?;
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerError::Execution("name must be a string".to_string()))?;
        let removed = registry
            .remove(name)
            .map_err(|e| HandlerError::Execution(e.to_string()))?;
        Ok(json!({ "name": name, "removed": removed }))
    }
}
