//! In-process execution strategy.
//!
//! A `.native` handler file names a module the host registered in [`NativeModules`]
//! (first non-empty, non-`#` line). The module is bound once per resolved path and
//! called directly with in-memory JSON values.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use super::strategy::{HandlerError, HandlerStrategy, ToolHandler};

/// Host-side table of in-process handler modules, keyed by module name.
#[derive(Clone, Default)]
pub struct NativeModules {
    modules: Arc<RwLock<HashMap<String, Arc<dyn ToolHandler>>>>,
}

impl NativeModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a module. Already-bound paths keep the handler they loaded.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), handler);
    }

    /// Register an async closure as a module.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

type BoxedFn =
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync;

/// Adapts an async closure to [`ToolHandler`]. Errors become `HandlerExecutionError`.
pub struct FnHandler {
    f: Box<BoxedFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        Self {
            f: Box::new(move |args| -> BoxFuture<'static, Result<serde_json::Value, String>> {
                Box::pin(f(args))
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        (self.f)(args).await.map_err(HandlerError::Execution)
    }
}

/// Strategy for `.native` files; caches the bound handler per resolved path.
pub struct NativeStrategy {
    modules: NativeModules,
    loaded: Mutex<HashMap<PathBuf, Arc<dyn ToolHandler>>>,
}

impl NativeStrategy {
    pub fn new(modules: NativeModules) -> Self {
        Self {
            modules,
            loaded: Mutex::new(HashMap::new()),
        }
    }
}

impl HandlerStrategy for NativeStrategy {
    fn language(&self) -> &str {
        "native"
    }

    fn prepare(&self, script: &Path) -> Result<Arc<dyn ToolHandler>, HandlerError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = loaded.get(script) {
            return Ok(h.clone());
        }
        let content = std::fs::read_to_string(script)
            .map_err(|e| HandlerError::Load(format!("{}: {}", script.display(), e)))?;
        let module = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or_else(|| {
                HandlerError::Load(format!("{}: no module name", script.display()))
            })?;
        let handler = self.modules.get(module).ok_or_else(|| {
            HandlerError::Load(format!(
                "{}: native module {:?} is not registered",
                script.display(),
                module
            ))
        })?;
        log::debug!("bound native module {} for {}", module, script.display());
        loaded.insert(script.to_path_buf(), handler.clone());
        Ok(handler)
    }

    fn wrap_source(&self, _tool_name: &str, _code: &str) -> Option<String> {
        None
    }
}
