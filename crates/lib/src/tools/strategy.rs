//! Execution strategies: how a handler file of a given language is turned into an
//! invocable [`ToolHandler`].
//!
//! Strategies live in a [`StrategyTable`] keyed by file extension. Adding a language is
//! adding a table entry; nothing downstream branches on the language.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::{ArgDelivery, Interpreter, SubprocessStrategy};
use crate::tools::native::{NativeModules, NativeStrategy};

/// Failure raised while loading or invoking a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("HandlerLoadError: {0}")]
    Load(String),
    #[error("HandlerExecutionError: {0}")]
    Execution(String),
    #[error("HandlerOutputError: {0}")]
    Output(String),
    #[error("HandlerTimeout: handler did not finish within {0:?}")]
    Timeout(Duration),
}

/// The one capability a prepared handler exposes.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, HandlerError>;
}

/// A language-specific way of running handler files.
pub trait HandlerStrategy: Send + Sync {
    /// Short language label for logs and listings (e.g. "node").
    fn language(&self) -> &str;

    /// Bind a handler file to an invocable handler without running it.
    /// In-process strategies load (and cache) the unit here; failures are `HandlerError::Load`.
    fn prepare(&self, script: &Path) -> Result<Arc<dyn ToolHandler>, HandlerError>;

    /// Wrap a bare handler body in this strategy's module convention so the result can be
    /// written to disk and later prepared. None when the strategy cannot author from source.
    fn wrap_source(&self, tool_name: &str, code: &str) -> Option<String>;
}

/// Extension (without dot, lowercase) -> strategy.
#[derive(Clone, Default)]
pub struct StrategyTable {
    by_extension: HashMap<String, Arc<dyn HandlerStrategy>>,
}

impl StrategyTable {
    /// Table with the bundled subprocess interpreters and the in-process native strategy.
    /// `overrides` replace or add interpreters by extension.
    pub fn with_defaults(
        timeout: Duration,
        native: NativeModules,
        overrides: &BTreeMap<String, Interpreter>,
    ) -> Self {
        let mut table = Self::default();
        let defaults = [
            ("js", Interpreter::new("node", ArgDelivery::Stdin)),
            ("mjs", Interpreter::new("node", ArgDelivery::Stdin)),
            ("py", Interpreter::new("python3", ArgDelivery::Stdin)),
            ("sh", Interpreter::new("sh", ArgDelivery::Stdin)),
            ("rb", Interpreter::new("ruby", ArgDelivery::Argv)),
        ];
        for (ext, interpreter) in defaults {
            table.insert(ext, Arc::new(SubprocessStrategy::new(ext, interpreter, timeout)));
        }
        for (ext, interpreter) in overrides {
            let ext = normalize_extension(ext);
            table.insert(
                &ext,
                Arc::new(SubprocessStrategy::new(&ext, interpreter.clone(), timeout)),
            );
        }
        table.insert("native", Arc::new(NativeStrategy::new(native)));
        table
    }

    /// Register (or replace) the strategy for an extension.
    pub fn insert(&mut self, extension: &str, strategy: Arc<dyn HandlerStrategy>) {
        self.by_extension
            .insert(normalize_extension(extension), strategy);
    }

    pub fn get(&self, extension: &str) -> Option<&Arc<dyn HandlerStrategy>> {
        self.by_extension.get(&normalize_extension(extension))
    }

    /// Strategy for a handler path, chosen by its extension.
    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn HandlerStrategy>> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.get(e))
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Extensions whose strategy can wrap handler source (languages `define_tool` accepts).
    pub fn authorable(&self) -> Vec<String> {
        self.extensions()
            .into_iter()
            .filter(|ext| {
                self.by_extension
                    .get(ext)
                    .and_then(|s| s.wrap_source("sample", ""))
                    .is_some()
            })
            .collect()
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
