//! Skill definition and parsing
//!
//! Each skill is a folder containing SKILL.md (or a flat `<id>.md` file)
//! with YAML frontmatter. Only the metadata and a size estimate are kept in
//! memory; the body is read again when a host asks for it.

use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use skillcast_types::{MetadataError, SkillId};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::warn;

use crate::keywords;

/// Maximum recommended name length
const MAX_NAME_LENGTH: usize = 64;
/// Maximum recommended description length
const MAX_DESCRIPTION_LENGTH: usize = 1024;

static FRONTMATTER_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\x{feff}?---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n(.*))?\z").ok()
});

/// Unit the size estimate (and therefore the budget) is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    /// Unicode scalar values of the body
    #[default]
    Chars,
    /// Approximate model tokens (one token per four characters)
    Tokens,
}

impl SizeUnit {
    /// Estimate the size of `body` in this unit
    pub fn measure(self, body: &str) -> usize {
        let chars = body.chars().count();
        match self {
            SizeUnit::Chars => chars,
            SizeUnit::Tokens => chars.div_ceil(4),
        }
    }
}

/// `tags` may be written as a single string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TagList {
    One(String),
    Many(Vec<String>),
}

/// Raw frontmatter fields; required ones are checked after deserializing
#[derive(Debug, Clone, Deserialize)]
struct RawFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Option<TagList>,
}

/// Validated metadata extracted from YAML frontmatter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillMetadata {
    /// Display name
    pub name: String,
    /// One-line summary, the main keyword source
    pub description: String,
    /// Optional extra keywords
    pub tags: Vec<String>,
}

/// A parsed document: metadata plus the body that follows the frontmatter
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Validated frontmatter
    pub metadata: SkillMetadata,
    /// Text after the frontmatter
    pub body: String,
}

/// Failure to load the body of a skill
#[derive(Debug, Error)]
pub enum ContentError {
    /// The backing document could not be read
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The document on disk no longer matches the one the registry measured
    #[error("document {path:?} changed since the last registry refresh")]
    Stale {
        /// Backing document
        path: PathBuf,
    },
}

/// Where the full body of a skill lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    /// A markdown document on disk; the body is everything after the frontmatter
    File(PathBuf),
    /// Body supplied in memory when the skill was registered
    Embedded(Arc<str>),
}

impl ContentRef {
    /// Resolve the body text as it is now, without checking it against the
    /// registry
    pub fn load(&self) -> io::Result<String> {
        match self {
            ContentRef::File(path) => Ok(body_of(fs::read_to_string(path)?)),
            ContentRef::Embedded(body) => Ok(body.to_string()),
        }
    }

    /// Path of the backing document, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ContentRef::File(path) => Some(path),
            ContentRef::Embedded(_) => None,
        }
    }
}

/// One guideline document known to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    id: SkillId,
    display_name: String,
    description: String,
    keywords: BTreeSet<String>,
    size_estimate: usize,
    content_hash: String,
    content: ContentRef,
}

impl Skill {
    /// Build a skill from explicit parts, with an embedded (empty) body.
    ///
    /// Keywords go through the shared normalization, so `"Hooks"` is stored
    /// as `"hook"`.
    pub fn new<'a>(
        id: impl Into<SkillId>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        keyword_list: impl IntoIterator<Item = &'a str>,
        size_estimate: usize,
    ) -> Self {
        let id = id.into();
        let display_name = display_name.into();
        let description = description.into();
        let keywords = keyword_list
            .into_iter()
            .filter_map(keywords::normalize_token)
            .collect();
        let content_hash = content_hash(&format!("{id}\n{display_name}\n{description}"));

        Self {
            id,
            display_name,
            description,
            keywords,
            size_estimate,
            content_hash,
            content: ContentRef::Embedded(Arc::from("")),
        }
    }

    /// Replace the body with in-memory text
    pub fn with_body(mut self, body: impl Into<Arc<str>>) -> Self {
        self.content = ContentRef::Embedded(body.into());
        self
    }

    /// Parse a document read from `path`; the body is measured and dropped
    pub fn from_document(
        id: SkillId,
        path: &Path,
        content: &str,
        unit: SizeUnit,
    ) -> Result<Self, MetadataError> {
        let parsed = parse_skill_content(content)?;
        validate_metadata(&id, &parsed.metadata);

        let mut text = format!("{} {}", parsed.metadata.name, parsed.metadata.description);
        for tag in &parsed.metadata.tags {
            text.push(' ');
            text.push_str(tag);
        }

        Ok(Self {
            id,
            keywords: keywords::keyword_set(&text),
            size_estimate: unit.measure(&parsed.body),
            content_hash: content_hash(content),
            display_name: parsed.metadata.name,
            description: parsed.metadata.description,
            content: ContentRef::File(path.to_path_buf()),
        })
    }

    /// Unique skill id
    pub fn id(&self) -> &SkillId {
        &self.id
    }

    /// Name from the frontmatter
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Description from the frontmatter
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Normalized keyword set
    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    /// Number of distinct keywords
    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    /// Body size in the registry's size unit
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// SHA-256 of the full source document (hex)
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Where the body lives
    pub fn content(&self) -> &ContentRef {
        &self.content
    }

    /// Load the full body (lazy; reads the file for on-disk skills).
    ///
    /// An on-disk document edited after the last refresh is reported as
    /// [`ContentError::Stale`], since its size may no longer match
    /// [`Skill::size_estimate`].
    pub fn load_body(&self) -> Result<String, ContentError> {
        match &self.content {
            ContentRef::File(path) => {
                let content = fs::read_to_string(path)?;
                if content_hash(&content) != self.content_hash {
                    return Err(ContentError::Stale { path: path.clone() });
                }
                Ok(body_of(content))
            }
            ContentRef::Embedded(body) => Ok(body.to_string()),
        }
    }

    /// Generate a concise summary line: "- {id}: {description}"
    pub fn to_summary(&self) -> String {
        format!("- {}: {}", self.id, self.description)
    }
}

/// Body of a full document; documents without frontmatter are all body
fn body_of(content: String) -> String {
    match split_frontmatter(&content) {
        Some((_, body)) => body.to_string(),
        None => content,
    }
}

/// SHA-256 of `content` as lowercase hex
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Split a document into its YAML block and body
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let re = FRONTMATTER_RE.as_ref()?;
    let captures = re.captures(content)?;
    let yaml = captures.get(1).map_or("", |m| m.as_str());
    let body = captures.get(2).map_or("", |m| m.as_str());
    Some((yaml, body))
}

fn required(field: &'static str, value: Option<String>) -> Result<String, MetadataError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(MetadataError::MissingField(field)),
    }
}

/// Parse skill content to extract frontmatter metadata and body
pub fn parse_skill_content(content: &str) -> Result<ParsedDocument, MetadataError> {
    let (yaml, body) = split_frontmatter(content).ok_or(MetadataError::MissingFrontmatter)?;

    if yaml.trim().is_empty() {
        return Err(MetadataError::MissingField("name"));
    }

    let raw: RawFrontmatter =
        serde_yaml::from_str(yaml).map_err(|e| MetadataError::MalformedYaml(e.to_string()))?;

    let name = required("name", raw.name)?;
    let description = required("description", raw.description)?;
    let tags = match raw.tags {
        None => Vec::new(),
        Some(TagList::One(tag)) => tag.split(',').map(|t| t.trim().to_string()).collect(),
        Some(TagList::Many(tags)) => tags,
    };

    Ok(ParsedDocument {
        metadata: SkillMetadata {
            name,
            description,
            tags: tags.into_iter().filter(|t| !t.is_empty()).collect(),
        },
        body: body.to_string(),
    })
}

/// Soft checks; the document is still accepted
fn validate_metadata(id: &SkillId, metadata: &SkillMetadata) {
    if metadata.name.len() > MAX_NAME_LENGTH {
        warn!(
            "Skill '{}' name exceeds {} characters (was {})",
            id,
            MAX_NAME_LENGTH,
            metadata.name.len()
        );
    }

    if metadata.description.len() > MAX_DESCRIPTION_LENGTH {
        warn!(
            "Skill '{}' description exceeds {} characters (was {})",
            id,
            MAX_DESCRIPTION_LENGTH,
            metadata.description.len()
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const REACT_DOC: &str = r#"---
name: react
description: React component patterns with hooks and JSX.
tags: [frontend, ui]
---

# React

Prefer function components.
"#;

    #[test]
    fn test_parse_skill_content() {
        let parsed = parse_skill_content(REACT_DOC).unwrap();
        assert_eq!(parsed.metadata.name, "react");
        assert_eq!(
            parsed.metadata.description,
            "React component patterns with hooks and JSX."
        );
        assert_eq!(parsed.metadata.tags, vec!["frontend", "ui"]);
        assert!(parsed.body.contains("# React"));
    }

    #[test]
    fn test_parse_crlf_and_bom() {
        let content = "\u{feff}---\r\nname: go\r\ndescription: Go services\r\n---\r\nbody";
        let parsed = parse_skill_content(content).unwrap();
        assert_eq!(parsed.metadata.name, "go");
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn test_parse_without_body() {
        let parsed = parse_skill_content("---\nname: a\ndescription: b\n---").unwrap();
        assert_eq!(parsed.body, "");
    }

    #[test]
    fn test_missing_description_is_metadata_error() {
        let err = parse_skill_content("---\nname: react\n---\nbody").unwrap_err();
        assert_eq!(err, MetadataError::MissingField("description"));
    }

    #[test]
    fn test_missing_name_is_metadata_error() {
        let err = parse_skill_content("---\ndescription: \"  \"\nname: \"\"\n---\n").unwrap_err();
        assert_eq!(err, MetadataError::MissingField("name"));

        let err = parse_skill_content("---\n---\nbody").unwrap_err();
        assert_eq!(err, MetadataError::MissingField("name"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = parse_skill_content("---\nname: [unclosed\ndescription: x\n---\n").unwrap_err();
        assert!(matches!(err, MetadataError::MalformedYaml(_)));
    }

    #[test]
    fn test_no_frontmatter() {
        let err = parse_skill_content("# Just markdown\n").unwrap_err();
        assert_eq!(err, MetadataError::MissingFrontmatter);
    }

    #[test]
    fn test_from_document_keywords_and_size() {
        let skill = Skill::from_document(
            SkillId::from("react"),
            Path::new("/corpus/react/SKILL.md"),
            REACT_DOC,
            SizeUnit::Chars,
        )
        .unwrap();

        for keyword in ["react", "component", "hook", "jsx", "frontend", "ui"] {
            assert!(skill.keywords().contains(keyword), "missing {keyword}");
        }
        assert!(!skill.keywords().contains("with"));
        let body = "\n# React\n\nPrefer function components.\n";
        assert_eq!(skill.size_estimate(), body.chars().count());
        assert_eq!(skill.content_hash(), content_hash(REACT_DOC));
        assert_eq!(
            skill.content().path(),
            Some(Path::new("/corpus/react/SKILL.md"))
        );
    }

    #[test]
    fn test_size_units() {
        assert_eq!(SizeUnit::Chars.measure("abcdefghi"), 9);
        assert_eq!(SizeUnit::Tokens.measure("abcdefghi"), 3);
        assert_eq!(SizeUnit::Tokens.measure(""), 0);
    }

    #[test]
    fn test_new_normalizes_keywords() {
        let skill = Skill::new("react", "React", "React", ["React", "JSX", "hooks"], 500)
            .with_body("body text");
        let keywords: Vec<&str> = skill.keywords().iter().map(String::as_str).collect();
        assert_eq!(keywords, vec!["hook", "jsx", "react"]);
        assert_eq!(skill.load_body().unwrap(), "body text");
    }

    #[test]
    fn test_load_body_detects_edit_after_scan() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("react.md");
        std::fs::write(&path, REACT_DOC).unwrap();
        let skill =
            Skill::from_document(SkillId::from("react"), &path, REACT_DOC, SizeUnit::Chars).unwrap();
        assert_eq!(skill.load_body().unwrap(), "\n# React\n\nPrefer function components.\n");

        std::fs::write(&path, format!("{REACT_DOC}\nA much longer body now.\n")).unwrap();
        assert!(matches!(skill.load_body(), Err(ContentError::Stale { .. })));
        // The unchecked read still serves the live file
        assert!(skill.content().load().unwrap().ends_with("longer body now.\n"));
    }
}
