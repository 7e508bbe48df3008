//! Dispatch a tool call: look the tool up, check arguments against its parameter
//! specs, inject `workDir`, invoke the handler, normalize the outcome.
//!
//! [`Dispatcher::call_tool`] never fails: the caller always receives either
//! `{"result": ...}` or `{"error": "..."}`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use super::registry::{ToolInfo, ToolRegistry};
use super::strategy::HandlerError;
use crate::skills::ParameterSet;

/// Argument key the dispatcher adds for the caller's working directory.
pub const WORK_DIR_ARG: &str = "workDir";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("ToolNotFound: {0}")]
    ToolNotFound(String),
    #[error("MissingParameter: {0}")]
    MissingParameter(String),
    #[error("InvalidParameterValue: {name}: {reason}")]
    InvalidParameterValue { name: String, reason: String },
    /// Transport-level failure raised by the execution strategy.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The handler ran and reported a failure in its own `{"error": ...}` payload.
    #[error("{0}")]
    HandlerReported(String),
}

/// What a caller of `callTool` receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallResult {
    Result(Value),
    Error(String),
}

impl ToolCallResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolCallResult::Error(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            ToolCallResult::Result(v) => serde_json::json!({ "result": v }),
            ToolCallResult::Error(e) => serde_json::json!({ "error": e }),
        }
    }
}

impl From<Result<Value, DispatchError>> for ToolCallResult {
    fn from(r: Result<Value, DispatchError>) -> Self {
        match r {
            Ok(v) => ToolCallResult::Result(v),
            Err(e) => ToolCallResult::Error(e.to_string()),
        }
    }
}

/// Routes calls to the handlers held by a registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    /// Invoke `name` with `args` (an object, or null for none) and `work_dir` injected.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        work_dir: &Path,
    ) -> Result<Value, DispatchError> {
        let tool = self
            .registry
            .lookup(name)
            .ok_or_else(|| DispatchError::ToolNotFound(name.to_string()))?;

        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(DispatchError::InvalidParameterValue {
                    name: "arguments".to_string(),
                    reason: format!("expected an object, got {}", json_type(&other)),
                })
            }
        };
        check_arguments(&tool.declaration.parameters, &args)?;
        args.insert(
            WORK_DIR_ARG.to_string(),
            Value::String(work_dir.display().to_string()),
        );

        log::debug!("dispatching {} (skill {})", name, tool.source_skill);
        let value = tool.invoke(Value::Object(args)).await?;
        if let Some(message) = reported_error(&value) {
            return Err(DispatchError::HandlerReported(message));
        }
        Ok(value)
    }

    /// `callTool`: like [`Dispatcher::dispatch`] but folds every failure into `{"error"}`.
    pub async fn call_tool(&self, name: &str, args: Value, work_dir: &Path) -> ToolCallResult {
        let outcome = self.dispatch(name, args, work_dir).await;
        match &outcome {
            Err(DispatchError::HandlerReported(msg)) => {
                log::info!("tool {} reported an error: {}", name, msg)
            }
            Err(DispatchError::Handler(e)) => log::warn!("tool {} failed: {}", name, e),
            Err(e) => log::debug!("tool {} rejected: {}", name, e),
            Ok(_) => {}
        }
        outcome.into()
    }
}

/// Required parameters present (null counts as absent), enum membership, declared types.
fn check_arguments(params: &ParameterSet, args: &Map<String, Value>) -> Result<(), DispatchError> {
    for (name, spec) in params {
        let value = match args.get(name) {
            Some(Value::Null) | None => {
                if spec.optional {
                    continue;
                }
                return Err(DispatchError::MissingParameter(name.clone()));
            }
            Some(v) => v,
        };
        if !spec.ty.matches(value) {
            return Err(DispatchError::InvalidParameterValue {
                name: name.clone(),
                reason: format!("expected {}, got {}", spec.ty.as_str(), json_type(value)),
            });
        }
        if let Some(allowed) = &spec.allowed {
            if !allowed.contains(value) {
                return Err(DispatchError::InvalidParameterValue {
                    name: name.clone(),
                    reason: format!("{} is not one of {}", value, Value::Array(allowed.clone())),
                });
            }
        }
    }
    Ok(())
}

/// A handler-level failure payload: an object whose only key is a string `error`.
fn reported_error(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("error").and_then(|e| e.as_str()).map(str::to_string)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{ParamType, ParameterSpec, ToolDeclaration};
    use crate::tools::native::FnHandler;
    use crate::tools::registry::ToolOrigin;
    use crate::tools::resolver::ResolvedTool;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn param(ty: ParamType, optional: bool, allowed: Option<Vec<Value>>) -> ParameterSpec {
        ParameterSpec {
            ty,
            description: "p".to_string(),
            allowed,
            optional,
        }
    }

    fn setup(
        params: Vec<(&str, ParameterSpec)>,
        reply: fn(Value) -> Result<Value, String>,
    ) -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = Arc::new(ToolRegistry::new());
        let tool = ResolvedTool {
            declaration: ToolDeclaration {
                name: "sample".to_string(),
                description: "sample".to_string(),
                script: None,
                parameters: params
                    .into_iter()
                    .map(|(n, p)| (n.to_string(), p))
                    .collect::<BTreeMap<_, _>>(),
            },
            source_skill: "test".to_string(),
            handler: Arc::new(FnHandler::new(move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { reply(args) }
            })),
            is_stub: false,
        };
        registry.register(tool, "test", ToolOrigin::Discovered).unwrap();
        (Dispatcher::new(registry), calls)
    }

    fn wd() -> PathBuf {
        PathBuf::from("/work")
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (d, calls) = setup(vec![], |a| Ok(a));
        let out = d.call_tool("nope", json!({}), &wd()).await;
        assert_eq!(out, ToolCallResult::Error("ToolNotFound: nope".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_required_parameter_short_circuits() {
        let (d, calls) = setup(vec![("text", param(ParamType::String, false, None))], |a| Ok(a));
        let err = d.dispatch("sample", json!({}), &wd()).await.unwrap_err();
        assert_eq!(err, DispatchError::MissingParameter("text".to_string()));
        let err = d.dispatch("sample", json!({"text": null}), &wd()).await.unwrap_err();
        assert_eq!(err.to_string(), "MissingParameter: text");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn optional_parameters_may_be_absent() {
        let (d, calls) = setup(vec![("unit", param(ParamType::String, true, None))], |a| Ok(a));
        let out = d.dispatch("sample", Value::Null, &wd()).await.unwrap();
        assert_eq!(out, json!({"workDir": "/work"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enum_and_type_are_checked_before_invocation() {
        let (d, calls) = setup(
            vec![(
                "unit",
                param(ParamType::String, false, Some(vec![json!("c"), json!("f")])),
            )],
            |a| Ok(a),
        );
        let err = d.dispatch("sample", json!({"unit": "k"}), &wd()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameterValue { .. }));
        let err = d.dispatch("sample", json!({"unit": 3}), &wd()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameterValue { .. }));
        let err = d.dispatch("sample", json!([1, 2]), &wd()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameterValue { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let out = d.dispatch("sample", json!({"unit": "c"}), &wd()).await.unwrap();
        assert_eq!(out["unit"], "c");
    }

    #[tokio::test]
    async fn work_dir_overrides_caller_value() {
        let (d, _) = setup(vec![], |a| Ok(a));
        let out = d
            .dispatch("sample", json!({"workDir": "/elsewhere", "x": 1}), &wd())
            .await
            .unwrap();
        assert_eq!(out, json!({"workDir": "/work", "x": 1}));
    }

    #[tokio::test]
    async fn handler_failures_become_error_values() {
        let (d, _) = setup(vec![], |_| Err("kaboom".to_string()));
        let out = d.call_tool("sample", json!({}), &wd()).await;
        assert_eq!(
            out,
            ToolCallResult::Error("HandlerExecutionError: kaboom".to_string())
        );
        assert_eq!(out.to_json(), json!({"error": "HandlerExecutionError: kaboom"}));
    }

    #[tokio::test]
    async fn handler_reported_errors_share_the_error_shape() {
        let (d, _) = setup(vec![], |_| Ok(json!({"error": "city not found"})));
        let err = d.dispatch("sample", json!({}), &wd()).await.unwrap_err();
        assert_eq!(err, DispatchError::HandlerReported("city not found".to_string()));
        let out = d.call_tool("sample", json!({}), &wd()).await;
        assert_eq!(out.to_json(), json!({"error": "city not found"}));

        // an error key alongside other data is an ordinary result
        let (d, _) = setup(vec![], |_| Ok(json!({"error": "partial", "items": []})));
        assert!(!d.call_tool("sample", json!({}), &wd()).await.is_error());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_subprocess_surfaces_as_timeout_error() {
        use crate::exec::{ArgDelivery, Interpreter, SubprocessStrategy};
        use crate::tools::strategy::HandlerStrategy;
        use std::time::Duration;

        let dir = std::env::temp_dir().join(format!("skillrt-dispatch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("slow.sh");
        std::fs::write(&path, "sleep 5\necho '{}'\n").unwrap();
        let strategy = SubprocessStrategy::new(
            "sh",
            Interpreter::new("sh", ArgDelivery::Stdin),
            Duration::from_millis(200),
        );
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ResolvedTool {
                    declaration: ToolDeclaration {
                        name: "slow".to_string(),
                        description: "sleeps".to_string(),
                        script: Some("slow.sh".to_string()),
                        parameters: BTreeMap::new(),
                    },
                    source_skill: "test".to_string(),
                    handler: strategy.prepare(&path).unwrap(),
                    is_stub: false,
                },
                "test",
                ToolOrigin::Discovered,
            )
            .unwrap();

        let out = Dispatcher::new(registry)
            .call_tool("slow", json!({}), &wd())
            .await;
        match out.to_json()["error"].as_str() {
            Some(msg) => assert!(msg.starts_with("HandlerTimeout:"), "{}", msg),
            None => panic!("expected an error, got {:?}", out),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn call_result_serializes_as_tagged_object() {
        let ok = serde_json::to_value(ToolCallResult::Result(json!({"count": 9}))).unwrap();
        assert_eq!(ok, json!({"result": {"count": 9}}));
        let err = serde_json::to_value(ToolCallResult::Error("x".to_string())).unwrap();
        assert_eq!(err, json!({"error": "x"}));
    }
}
