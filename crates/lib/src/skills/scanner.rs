//! Scan skill roots: each skill is a directory with SKILL.md and an optional tools.json.
//!
//! Roots are walked in the order given; within a root, subdirectories are visited in
//! name order. The scanner never deduplicates: a later root's skill with the same name
//! is yielded again and the consumer applies the override policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manifest::{self, ToolDeclaration, MANIFEST_FILE};
use super::metadata::{FrontmatterReader, InstructionsReader, INSTRUCTIONS_FILE};

/// A discovered skill directory. Immutable once scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillUnit {
    pub name: String,
    pub description: String,
    /// Directory the unit was loaded from.
    pub base_path: PathBuf,
    /// Present when the directory contains tools.json.
    pub manifest_path: Option<PathBuf>,
}

/// One scanned skill: its metadata, the tools its manifest declares, and diagnostics.
#[derive(Debug, Clone)]
pub struct DiscoveredSkill {
    pub unit: SkillUnit,
    /// Position of the root this skill came from in the scanned root list.
    pub root_index: usize,
    pub tools: Vec<ToolDeclaration>,
    /// Skipped manifest entries, or the manifest-level error that left the skill instruction-only.
    pub warnings: Vec<String>,
}

/// Unit-level scan failure. The unit is skipped; the scan continues.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("SkillNameMismatch: directory {dir} declares skill name {declared:?}")]
    SkillNameMismatch { dir: PathBuf, declared: String },
    #[error("reading skill metadata in {dir}: {source}")]
    Metadata {
        dir: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Walks an ordered list of skill roots.
#[derive(Clone)]
pub struct SkillScanner {
    roots: Vec<PathBuf>,
    reader: Arc<dyn InstructionsReader>,
}

impl SkillScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self::with_reader(roots, Arc::new(FrontmatterReader))
    }

    pub fn with_reader(roots: Vec<PathBuf>, reader: Arc<dyn InstructionsReader>) -> Self {
        Self { roots, reader }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Start a fresh walk of the filesystem. Each call re-reads everything.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            scanner: self,
            root_index: 0,
            pending: None,
        }
    }
}

/// Lazy iterator over the skills under a scanner's roots.
pub struct Scan<'a> {
    scanner: &'a SkillScanner,
    root_index: usize,
    /// Remaining candidate directories of the current root (reversed, popped from the end).
    pending: Option<Vec<PathBuf>>,
}

impl Iterator for Scan<'_> {
    type Item = DiscoveredSkill;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.root_index >= self.scanner.roots.len() {
                return None;
            }
            let pending = self
                .pending
                .get_or_insert_with(|| list_candidates(&self.scanner.roots[self.root_index]));
            let Some(dir) = pending.pop() else {
                self.pending = None;
                self.root_index += 1;
                continue;
            };
            match load_unit(self.scanner.reader.as_ref(), &dir, self.root_index) {
                Ok(Some(skill)) => return Some(skill),
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("skipping skill: {}", e);
                    continue;
                }
            }
        }
    }
}

/// Immediate, non-hidden subdirectories of `root`, reversed name order so `pop` yields ascending.
fn list_candidates(root: &Path) -> Vec<PathBuf> {
    let read_dir = match std::fs::read_dir(root) {
        Ok(d) => d,
        Err(e) => {
            log::debug!("skill root {} not readable: {}", root.display(), e);
            return Vec::new();
        }
    };
    let mut dirs: Vec<PathBuf> = read_dir
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs.reverse();
    dirs
}

fn load_unit(
    reader: &dyn InstructionsReader,
    dir: &Path,
    root_index: usize,
) -> Result<Option<DiscoveredSkill>, ScanError> {
    if !dir.join(INSTRUCTIONS_FILE).is_file() {
        return Ok(None);
    }
    let meta = reader.read(dir).map_err(|source| ScanError::Metadata {
        dir: dir.to_path_buf(),
        source,
    })?;
    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if meta.name != dir_name {
        return Err(ScanError::SkillNameMismatch {
            dir: dir.to_path_buf(),
            declared: meta.name,
        });
    }

    let mut warnings = Vec::new();
    let mut tools = Vec::new();
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest_path = if manifest_path.is_file() {
        match std::fs::read_to_string(&manifest_path) {
            Ok(raw) => match manifest::validate(&raw) {
                Ok(validated) => {
                    for w in &validated.warnings {
                        log::warn!("{}: {}", manifest_path.display(), w);
                        warnings.push(w.to_string());
                    }
                    tools = validated.tools;
                }
                Err(e) => {
                    log::warn!(
                        "{}: {}; skill {} loads without tools",
                        manifest_path.display(),
                        e,
                        meta.name
                    );
                    warnings.push(e.to_string());
                }
            },
            Err(e) => {
                log::warn!("failed to read {}: {}", manifest_path.display(), e);
                warnings.push(format!("reading manifest: {}", e));
            }
        }
        Some(manifest_path)
    } else {
        None
    };

    Ok(Some(DiscoveredSkill {
        unit: SkillUnit {
            name: meta.name,
            description: meta.description,
            base_path: dir.to_path_buf(),
            manifest_path,
        },
        root_index,
        tools,
        warnings,
    }))
}
