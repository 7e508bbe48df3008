//! Live tool table: name -> active tool, last write wins.
//!
//! Every operation takes the one lock for its whole duration, and entries are shared
//! as `Arc`s, so a concurrent reader sees either the old entry or the new one in full.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::resolver::ResolvedTool;
use crate::skills::ParameterSet;

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolOrigin {
    /// Loaded from a skill directory by a scan.
    Discovered,
    /// Created through `define_tool` while the process runs.
    RuntimeDefined,
    /// Registered by the runtime itself (the meta-tools).
    Builtin,
}

/// One live tool with its provenance.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub tool: Arc<ResolvedTool>,
    pub source_skill: String,
    /// Load sequence number; strictly increasing across registrations.
    pub sequence: u64,
    pub origin: ToolOrigin,
}

/// Presentation shape for callers choosing a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSet,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("ProtectedToolError: {0} is a built-in tool and cannot be removed or replaced")]
    ProtectedTool(String),
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Arc<RegistryEntry>>,
    protected: HashSet<String>,
    next_sequence: u64,
}

/// Process-wide tool table. Starts empty; [`ToolRegistry::clear`] tears it down.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a name as non-removable. Only `Builtin` registrations may replace it.
    pub fn protect(&self, name: impl Into<String>) {
        self.write().protected.insert(name.into());
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.read().protected.contains(name)
    }

    /// Insert `tool`, replacing any live entry of the same name entirely.
    /// Returns the entry that was replaced, if any.
    pub fn register(
        &self,
        tool: ResolvedTool,
        source_skill: impl Into<String>,
        origin: ToolOrigin,
    ) -> Result<Option<Arc<RegistryEntry>>, RegistryError> {
        let name = tool.declaration.name.clone();
        let mut inner = self.write();
        if origin != ToolOrigin::Builtin && inner.protected.contains(&name) {
            return Err(RegistryError::ProtectedTool(name));
        }
        inner.next_sequence += 1;
        let entry = Arc::new(RegistryEntry {
            tool: Arc::new(tool),
            source_skill: source_skill.into(),
            sequence: inner.next_sequence,
            origin,
        });
        let previous = inner.entries.insert(name.clone(), entry);
        if let Some(prev) = &previous {
            log::debug!(
                "tool {} from {} replaces the one from {}",
                name,
                inner.entries[&name].source_skill,
                prev.source_skill
            );
        }
        Ok(previous)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ResolvedTool>> {
        self.read().entries.get(name).map(|e| e.tool.clone())
    }

    /// Entry with provenance (source skill, sequence, origin).
    pub fn entry(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.read().entries.get(name).cloned()
    }

    /// Remove a live tool. `Ok(false)` when absent; protected names are an error.
    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let mut inner = self.write();
        if inner.protected.contains(name) {
            return Err(RegistryError::ProtectedTool(name.to_string()));
        }
        Ok(inner.entries.remove(name).is_some())
    }

    /// All live tools, sorted by name.
    pub fn list(&self) -> Vec<ToolInfo> {
        let inner = self.read();
        let mut out: Vec<ToolInfo> = inner
            .entries
            .values()
            .map(|e| ToolInfo {
                name: e.tool.declaration.name.clone(),
                description: e.tool.declaration.description.clone(),
                parameters: e.tool.declaration.parameters.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and protection (process teardown).
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.protected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::ToolDeclaration;
    use crate::tools::native::FnHandler;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tool(name: &str, description: &str, skill: &str, reply: &'static str) -> ResolvedTool {
        ResolvedTool {
            declaration: ToolDeclaration {
                name: name.to_string(),
                description: description.to_string(),
                script: None,
                parameters: BTreeMap::new(),
            },
            source_skill: skill.to_string(),
            handler: Arc::new(FnHandler::new(move |_| async move {
                Ok::<_, String>(json!(reply))
            })),
            is_stub: false,
        }
    }

    #[tokio::test]
    async fn last_write_wins_without_merging() {
        let reg = ToolRegistry::new();
        reg.register(tool("weather", "from A", "a", "A"), "a", ToolOrigin::Discovered)
            .unwrap();
        let replaced = reg
            .register(tool("weather", "from B", "b", "B"), "b", ToolOrigin::RuntimeDefined)
            .unwrap();
        assert_eq!(replaced.unwrap().source_skill, "a");

        let t = reg.lookup("weather").unwrap();
        assert_eq!(t.declaration.description, "from B");
        assert_eq!(t.invoke(json!({})).await.unwrap(), json!("B"));
        let e = reg.entry("weather").unwrap();
        assert_eq!(e.source_skill, "b");
        assert_eq!(e.origin, ToolOrigin::RuntimeDefined);
        assert_eq!(e.sequence, 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_twice_is_idempotent() {
        let reg = ToolRegistry::new();
        reg.register(tool("a", "d", "s", "x"), "s", ToolOrigin::Discovered).unwrap();
        reg.register(tool("b", "d", "s", "x"), "s", ToolOrigin::Discovered).unwrap();
        assert_eq!(reg.remove("a"), Ok(true));
        let after_first = reg.list();
        assert_eq!(reg.remove("a"), Ok(false));
        assert_eq!(reg.list(), after_first);
        assert!(reg.lookup("a").is_none());
    }

    #[test]
    fn protected_tools_reject_removal_and_shadowing() {
        let reg = ToolRegistry::new();
        reg.protect("define_tool");
        reg.register(tool("define_tool", "meta", "builtin", "x"), "builtin", ToolOrigin::Builtin)
            .unwrap();
        assert_eq!(
            reg.remove("define_tool"),
            Err(RegistryError::ProtectedTool("define_tool".to_string()))
        );
        assert!(reg
            .register(tool("define_tool", "fake", "s", "y"), "s", ToolOrigin::Discovered)
            .is_err());
        assert_eq!(reg.lookup("define_tool").unwrap().declaration.description, "meta");
    }

    #[test]
    fn list_is_sorted_and_clear_empties() {
        let reg = ToolRegistry::new();
        for n in ["zeta", "alpha", "mid"] {
            reg.register(tool(n, "d", "s", "x"), "s", ToolOrigin::Discovered).unwrap();
        }
        let names: Vec<String> = reg.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_registration_keeps_every_name() {
        let reg = Arc::new(ToolRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("t{}_{}", t, i);
                        reg.register(tool(&name, "d", "s", "x"), "s", ToolOrigin::Discovered)
                            .unwrap();
                        assert!(reg.lookup(&name).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 400);
        let mut seqs: Vec<u64> = reg
            .list()
            .iter()
            .map(|t| reg.entry(&t.name).unwrap().sequence)
            .collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 400);
    }
}
