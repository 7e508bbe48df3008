//! Skills: directories holding a `SKILL.md` and an optional `tools.json` manifest.
//!
//! Skills are scanned from the primary skill root and any `skills.extraDirs`, in that
//! order; when two skills declare the same tool name the later one wins at registration.
//! Runtime-defined tools are written back in the same layout by [`ToolAuthor`].

pub mod author;
mod manifest;
mod metadata;
mod scanner;

pub use author::{AuthorError, ToolAuthor, ToolDraft};
pub use manifest::{
    check_parameters, is_valid_tool_name, render, validate, ParamType, ParameterSet,
    ParameterSpec, SkippableEntry, ToolDeclaration, ValidatedManifest, ValidationError,
    MANIFEST_FILE,
};
pub use metadata::{
    parse_frontmatter, render_instructions, FrontmatterReader, InstructionsReader, SkillMetadata,
    INSTRUCTIONS_FILE,
};
pub use scanner::{DiscoveredSkill, Scan, ScanError, SkillScanner, SkillUnit};
