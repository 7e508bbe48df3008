//! Runtime tool authoring: turn a tool defined at runtime into a skill directory with
//! the same layout as a hand-written one, then register it live.
//!
//! Files are written into a hidden staging directory next to the target and renamed
//! into place in one step, so a failed write never leaves a half-built skill behind.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manifest::{self, is_valid_tool_name, ParameterSet, ToolDeclaration, MANIFEST_FILE};
use super::metadata::{render_instructions, SkillMetadata, INSTRUCTIONS_FILE};
use super::scanner::SkillUnit;
use crate::tools::registry::{RegistryError, ToolOrigin, ToolRegistry};
use crate::tools::resolver::{HandlerResolver, ResolveError, ResolvedTool};

/// Longest allowed skill directory name.
pub const MAX_SKILL_NAME_LEN: usize = 64;

/// Skill name used as the source of non-persistent runtime tools.
pub const RUNTIME_SKILL: &str = "runtime";

/// A tool definition supplied at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDraft {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSet,
    /// Handler body; wrapped in the target language's module convention.
    pub code: String,
    /// Handler language, as a strategy-table extension (e.g. "js", "py").
    #[serde(default = "default_language")]
    pub language: String,
}

pub fn default_language() -> String {
    "js".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorError {
    #[error("InvalidToolName: {0:?} must match ^[a-z][a-z0-9_]*$")]
    InvalidToolName(String),
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),
    #[error("InvalidDerivedName: {0:?} is not a valid skill directory name")]
    InvalidDerivedName(String),
    #[error("SkillAlreadyExists: {0}")]
    SkillAlreadyExists(PathBuf),
    #[error("UnsupportedHandlerLanguage: cannot author handlers for {0:?}")]
    UnsupportedLanguage(String),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rendering skill files: {0}")]
    Render(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Skill directory name for a tool: underscores become hyphens.
pub fn derive_skill_name(tool_name: &str) -> String {
    tool_name.replace('_', "-")
}

/// Lowercase letters, digits and single inner hyphens; at most 64 characters.
pub fn is_valid_skill_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SKILL_NAME_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Writes runtime-defined tools to disk and into the live registry.
pub struct ToolAuthor {
    skills_dir: PathBuf,
    scratch_dir: PathBuf,
    resolver: HandlerResolver,
    registry: Arc<ToolRegistry>,
}

impl ToolAuthor {
    /// `skills_dir` receives persisted skills; `scratch_dir` holds non-persistent handlers.
    pub fn new(
        skills_dir: PathBuf,
        scratch_dir: PathBuf,
        resolver: HandlerResolver,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            skills_dir,
            scratch_dir,
            resolver,
            registry,
        }
    }

    /// Persist `draft` as `<skills_dir>/<derived-name>/` and register the tool live.
    pub fn persist(&self, draft: &ToolDraft) -> Result<SkillUnit, AuthorError> {
        self.check_admissible(draft)?;
        let skill_name = derive_skill_name(&draft.name);
        if !is_valid_skill_name(&skill_name) {
            return Err(AuthorError::InvalidDerivedName(skill_name));
        }
        let target = self.skills_dir.join(&skill_name);
        if target.exists() {
            return Err(AuthorError::SkillAlreadyExists(target));
        }
        let (script_rel, source) = self.wrap(draft)?;
        let declaration = ToolDeclaration {
            name: draft.name.clone(),
            description: draft.description.clone(),
            script: Some(script_rel.clone()),
            parameters: draft.parameters.clone(),
        };
        let meta = SkillMetadata {
            name: skill_name.clone(),
            description: draft.description.clone(),
        };
        let instructions = render_instructions(&meta, &instructions_body(&skill_name, &declaration))
            .map_err(|e| AuthorError::Render(e.to_string()))?;
        let manifest_text = manifest::render(std::slice::from_ref(&declaration))
            .map_err(|e| AuthorError::Render(e.to_string()))?;

        create_dir_all(&self.skills_dir)?;
        let staging = self
            .skills_dir
            .join(format!(".staging-{}-{}", skill_name, uuid::Uuid::new_v4()));
        let staged = write_files(
            &staging,
            &[
                (INSTRUCTIONS_FILE, instructions.as_str()),
                (MANIFEST_FILE, manifest_text.as_str()),
                (script_rel.as_str(), source.as_str()),
            ],
        )
        .and_then(|()| {
            if target.exists() {
                return Err(AuthorError::SkillAlreadyExists(target.clone()));
            }
            std::fs::rename(&staging, &target).map_err(|source| AuthorError::Io {
                path: target.clone(),
                source,
            })
        });
        if let Err(e) = staged {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                log::warn!("removing staging dir {}: {}", staging.display(), cleanup);
            }
            return Err(e);
        }
        log::info!("persisted tool {} as skill {}", draft.name, target.display());

        let registered = self
            .resolver
            .resolve(&declaration, &skill_name, &target)
            .map_err(AuthorError::from)
            .and_then(|tool| {
                self.registry
                    .register(tool, skill_name.clone(), ToolOrigin::RuntimeDefined)
                    .map_err(AuthorError::from)
            });
        if let Err(e) = registered {
            // A skill that cannot be registered now would fail every later load too.
            if let Err(cleanup) = std::fs::remove_dir_all(&target) {
                log::warn!("removing unregistered skill {}: {}", target.display(), cleanup);
            }
            return Err(e);
        }

        Ok(SkillUnit {
            name: skill_name,
            description: draft.description.clone(),
            manifest_path: Some(target.join(MANIFEST_FILE)),
            base_path: target,
        })
    }

    /// Register `draft` live without creating a skill; the wrapped handler goes to the scratch dir.
    pub fn define_ephemeral(&self, draft: &ToolDraft) -> Result<Arc<ResolvedTool>, AuthorError> {
        self.check_admissible(draft)?;
        let (script_rel, source) = self.wrap(draft)?;
        let base = self
            .scratch_dir
            .join(format!("{}-{}", derive_skill_name(&draft.name), uuid::Uuid::new_v4()));
        write_files(&base, &[(script_rel.as_str(), source.as_str())])?;

        let declaration = ToolDeclaration {
            name: draft.name.clone(),
            description: draft.description.clone(),
            script: Some(script_rel),
            parameters: draft.parameters.clone(),
        };
        let registered = self
            .resolver
            .resolve(&declaration, RUNTIME_SKILL, &base)
            .map_err(AuthorError::from)
            .and_then(|tool| {
                self.registry
                    .register(tool, RUNTIME_SKILL, ToolOrigin::RuntimeDefined)
                    .map_err(AuthorError::from)
            });
        if let Err(e) = registered {
            if let Err(cleanup) = std::fs::remove_dir_all(&base) {
                log::warn!("removing scratch dir {}: {}", base.display(), cleanup);
            }
            return Err(e);
        }
        log::info!("defined runtime tool {}", draft.name);
        self.registry
            .lookup(&draft.name)
            .ok_or_else(|| AuthorError::Render(format!("{} vanished after registration", draft.name)))
    }

    /// Shape checks plus the registry's protected names, before anything touches disk.
    fn check_admissible(&self, draft: &ToolDraft) -> Result<(), AuthorError> {
        check_draft(draft)?;
        if self.registry.is_protected(&draft.name) {
            return Err(RegistryError::ProtectedTool(draft.name.clone()).into());
        }
        Ok(())
    }

    /// Script path (relative to the skill dir) and wrapped source for the draft's language.
    fn wrap(&self, draft: &ToolDraft) -> Result<(String, String), AuthorError> {
        let ext = draft.language.trim().trim_start_matches('.').to_ascii_lowercase();
        let source = self
            .resolver
            .strategies()
            .get(&ext)
            .and_then(|s| s.wrap_source(&draft.name, &draft.code))
            .ok_or_else(|| AuthorError::UnsupportedLanguage(draft.language.clone()))?;
        Ok((format!("scripts/{}.{}", draft.name, ext), source))
    }
}

fn check_draft(draft: &ToolDraft) -> Result<(), AuthorError> {
    if !is_valid_tool_name(&draft.name) {
        return Err(AuthorError::InvalidToolName(draft.name.clone()));
    }
    if draft.description.trim().is_empty() {
        return Err(AuthorError::InvalidParameter(
            "description must not be empty".to_string(),
        ));
    }
    manifest::check_parameters(&draft.parameters).map_err(AuthorError::InvalidParameter)
}

fn instructions_body(skill_name: &str, declaration: &ToolDeclaration) -> String {
    let mut body = format!(
        "# {}\n\n{}\n\nThis skill was created at runtime with `define_tool`. It provides one tool, `{}`.\n",
        skill_name, declaration.description, declaration.name
    );
    if !declaration.parameters.is_empty() {
        body.push_str("\n## Parameters\n\n");
        for (name, spec) in &declaration.parameters {
            let optional = if spec.optional { ", optional" } else { "" };
            body.push_str(&format!(
                "- `{}` ({}{}): {}\n",
                name,
                spec.ty.as_str(),
                optional,
                spec.description
            ));
        }
    }
    body
}

fn create_dir_all(path: &Path) -> Result<(), AuthorError> {
    std::fs::create_dir_all(path).map_err(|source| AuthorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_files(dir: &Path, files: &[(&str, &str)]) -> Result<(), AuthorError> {
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        std::fs::write(&path, content).map_err(|source| AuthorError::Io { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{ParamType, ParameterSpec, SkillScanner};
    use crate::tools::native::NativeModules;
    use crate::tools::strategy::{HandlerError, HandlerStrategy, StrategyTable};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn author(root: &Path) -> (ToolAuthor, Arc<ToolRegistry>) {
        let registry = Arc::new(ToolRegistry::new());
        let resolver = HandlerResolver::new(Arc::new(StrategyTable::with_defaults(
            Duration::from_secs(10),
            NativeModules::new(),
            &BTreeMap::new(),
        )));
        (
            ToolAuthor::new(root.join("skills"), root.join("scratch"), resolver, registry.clone()),
            registry,
        )
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("skillrt-author-{}", uuid::Uuid::new_v4()))
    }

    fn draft(name: &str, language: &str) -> ToolDraft {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "city".to_string(),
            ParameterSpec {
                ty: ParamType::String,
                description: "City name".to_string(),
                allowed: None,
                optional: false,
            },
        );
        ToolDraft {
            name: name.to_string(),
            description: "Fetch the weather".to_string(),
            parameters,
            code: "return { city: args.city, temp: 21 };".to_string(),
            language: language.to_string(),
        }
    }

    #[test]
    fn derived_names() {
        assert_eq!(derive_skill_name("fetch_weather"), "fetch-weather");
        assert!(is_valid_skill_name("fetch-weather"));
        assert!(!is_valid_skill_name("trailing-"));
        assert!(!is_valid_skill_name("double--hyphen"));
        assert!(!is_valid_skill_name(&"a".repeat(65)));
        assert!(is_valid_skill_name(&"a".repeat(64)));
        assert!(!is_valid_skill_name("Upper"));
    }

    #[test]
    fn persist_writes_a_scannable_skill_and_registers_it() {
        let root = temp_root();
        let (author, registry) = author(&root);
        let unit = author.persist(&draft("fetch_weather", "js")).unwrap();
        assert_eq!(unit.name, "fetch-weather");
        assert!(unit.base_path.join("scripts/fetch_weather.js").is_file());

        let entry = registry.entry("fetch_weather").unwrap();
        assert_eq!(entry.origin, ToolOrigin::RuntimeDefined);
        assert_eq!(entry.source_skill, "fetch-weather");

        let skills: Vec<_> = SkillScanner::new(vec![root.join("skills")]).scan().collect();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].unit.name, "fetch-weather");
        assert_eq!(skills[0].tools.len(), 1);
        assert_eq!(skills[0].tools[0].name, "fetch_weather");
        assert_eq!(
            skills[0].tools[0].script.as_deref(),
            Some("scripts/fetch_weather.js")
        );
        assert_eq!(skills[0].tools[0].parameters["city"].ty, ParamType::String);

        // no staging leftovers
        let leftovers = std::fs::read_dir(root.join("skills"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn persist_refuses_existing_skill() {
        let root = temp_root();
        let (author, _) = author(&root);
        std::fs::create_dir_all(root.join("skills/fetch-weather")).unwrap();
        assert!(matches!(
            author.persist(&draft("fetch_weather", "js")),
            Err(AuthorError::SkillAlreadyExists(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn persist_rejects_bad_names_and_languages() {
        let root = temp_root();
        let (author, registry) = author(&root);
        assert!(matches!(
            author.persist(&draft("trailing_", "js")),
            Err(AuthorError::InvalidDerivedName(_))
        ));
        assert!(matches!(
            author.persist(&draft("a__b", "js")),
            Err(AuthorError::InvalidDerivedName(_))
        ));
        assert!(matches!(
            author.persist(&draft("Bad", "js")),
            Err(AuthorError::InvalidToolName(_))
        ));
        assert!(matches!(
            author.persist(&draft("native_tool", "native")),
            Err(AuthorError::UnsupportedLanguage(_))
        ));
        assert!(matches!(
            author.persist(&draft("cobol_tool", "cob")),
            Err(AuthorError::UnsupportedLanguage(_))
        ));
        assert!(registry.is_empty());
        assert!(!root.join("skills").exists() || std::fs::read_dir(root.join("skills")).unwrap().count() == 0);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn protected_names_are_refused_before_writing() {
        let root = temp_root();
        let (author, registry) = author(&root);
        registry.protect("remove_tool");
        for result in [
            author.persist(&draft("remove_tool", "js")).map(|_| ()),
            author.define_ephemeral(&draft("remove_tool", "js")).map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(AuthorError::Registry(RegistryError::ProtectedTool(_)))
            ));
        }
        assert!(!root.join("skills/remove-tool").exists());
        assert!(!root.join("scratch").exists());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn failed_resolution_removes_the_renamed_skill() {
        let root = temp_root();
        let registry = Arc::new(ToolRegistry::new());
        let mut table = StrategyTable::with_defaults(
            Duration::from_secs(10),
            NativeModules::new(),
            &BTreeMap::new(),
        );
        table.insert("js", Arc::new(RefusingStrategy));
        let author = ToolAuthor::new(
            root.join("skills"),
            root.join("scratch"),
            HandlerResolver::new(Arc::new(table)),
            registry.clone(),
        );
        assert!(matches!(
            author.persist(&draft("fetch_weather", "js")),
            Err(AuthorError::Resolve(_))
        ));
        assert!(!root.join("skills/fetch-weather").exists());
        assert!(registry.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    /// Wraps source like a real language but refuses to load anything.
    struct RefusingStrategy;

    impl HandlerStrategy for RefusingStrategy {
        fn language(&self) -> &str {
            "refusing"
        }

        fn prepare(
            &self,
            script: &Path,
        ) -> Result<Arc<dyn crate::tools::strategy::ToolHandler>, HandlerError> {
            Err(HandlerError::Load(format!("refusing {}", script.display())))
        }

        fn wrap_source(&self, _tool_name: &str, code: &str) -> Option<String> {
            Some(code.to_string())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ephemeral_tool_is_callable_without_a_skill() {
        let root = temp_root();
        let (author, registry) = author(&root);
        let mut d = draft("echo_city", "sh");
        d.code = "cat".to_string();
        let tool = author.define_ephemeral(&d).unwrap();
        assert_eq!(tool.source_skill, RUNTIME_SKILL);
        let out = tool.invoke(serde_json::json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(out["city"], "Oslo");
        assert!(registry.lookup("echo_city").is_some());
        assert!(!root.join("skills").exists());
        let _ = std::fs::remove_dir_all(root);
    }
}
