//! SKILL.md metadata: the `name` and `description` fields of the YAML frontmatter.
//!
//! The instructional body is never interpreted here; the scanner only needs the
//! two header fields. Readers are pluggable via [`InstructionsReader`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the instructions file that marks a directory as a skill.
pub const INSTRUCTIONS_FILE: &str = "SKILL.md";

/// Header fields consumed from a skill's instructions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
}

/// Extracts `{name, description}` from a skill directory's instructions file.
pub trait InstructionsReader: Send + Sync {
    fn read(&self, skill_dir: &Path) -> Result<SkillMetadata>;
}

/// Default reader: YAML frontmatter between `---` fences at the top of SKILL.md.
/// When `name` is absent the directory name is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterReader;

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
}

impl InstructionsReader for FrontmatterReader {
    fn read(&self, skill_dir: &Path) -> Result<SkillMetadata> {
        let path = skill_dir.join(INSTRUCTIONS_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        parse_frontmatter(&content, skill_dir)
    }
}

/// Parse the frontmatter of SKILL.md `content`; `skill_dir` supplies the fallback name.
pub fn parse_frontmatter(content: &str, skill_dir: &Path) -> Result<SkillMetadata> {
    let dir_name = skill_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let mut meta = SkillMetadata {
        name: dir_name,
        description: String::new(),
    };

    let Some(yaml) = frontmatter_block(content) else {
        return Ok(meta);
    };
    let fm: Frontmatter = serde_yaml::from_str(yaml)
        .with_context(|| format!("parsing frontmatter of {}", skill_dir.display()))?;
    if let Some(n) = fm.name {
        meta.name = n.trim().to_string();
    }
    if let Some(d) = fm.description {
        meta.description = d.trim().to_string();
    }
    Ok(meta)
}

fn frontmatter_block(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    Some(rest[..end].trim())
}

/// Render a SKILL.md document: frontmatter with `name` and `description`, then `body`.
pub fn render_instructions(meta: &SkillMetadata, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(meta).context("serializing skill frontmatter")?;
    Ok(format!("---\n{}---\n\n{}", yaml, body))
}
