//! Core domain types for the docfill pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{DocfillError, Result};

/// Upper bound on an uploaded document (16 MiB).
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Suffix appended to the source base name to form the artifact name.
pub const FILLED_SUFFIX: &str = "_filled";

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// One fillable field identified in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Field key, shown to the user and used for placeholder matching.
    pub name: String,
    /// Human-readable explanation of what the field holds.
    pub description: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Structured-output shape returned by the variable oracle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableList {
    pub variables: Vec<Variable>,
}

// ---------------------------------------------------------------------------
// SourceFormat
// ---------------------------------------------------------------------------

/// Document formats accepted at upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pdf,
    Docx,
}

impl SourceFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("docx") => Ok(Self::Docx),
            _ => Err(DocfillError::UnsupportedFormat {
                file_name: file_name.to_string(),
            }),
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ---------------------------------------------------------------------------
// SessionToken
// ---------------------------------------------------------------------------

/// Opaque session identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a new random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionToken {
    type Err = DocfillError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(DocfillError::invalid_session(s))
        }
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// Insertion-ordered mapping of variable name to user-supplied value.
///
/// Re-inserting a name replaces its value but keeps its original position,
/// so the last write wins without reordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    entries: Vec<(String, String)>,
}

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Merge `other` into `self`, last write wins.
    pub fn extend(&mut self, other: Answers) {
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Answers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut answers = Self::new();
        for (k, v) in iter {
            answers.insert(k, v);
        }
        answers
    }
}

impl Serialize for Answers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Answers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AnswersVisitor;

        impl<'de> Visitor<'de> for AnswersVisitor {
            type Value = Answers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable name to value")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut answers = Answers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    answers.insert(name, value);
                }
                Ok(answers)
            }
        }

        deserializer.deserialize_map(AnswersVisitor)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Pipeline state of a session. Transitions are not enforced in order:
/// generate may run straight from `Uploaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uploaded,
    Analyzed,
    Filled,
}

/// Reference to a generated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Download name, `<base>_filled.docx`.
    pub file_name: String,
    /// Location on disk.
    pub path: PathBuf,
}

impl ArtifactRef {
    /// Derive the artifact file name from the source file name.
    pub fn file_name_for(source_file_name: &str) -> String {
        let base = Path::new(source_file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        format!("{base}{FILLED_SUFFIX}.{}", SourceFormat::Docx.extension())
    }
}

/// Accumulated state for one uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: SessionToken,
    /// Sanitized file name as stored.
    pub source_filename: String,
    pub source_format: SourceFormat,
    pub stored_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A freshly uploaded session.
    pub fn new(
        token: SessionToken,
        source_filename: impl Into<String>,
        source_format: SourceFormat,
        stored_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            token,
            source_filename: source_filename.into(),
            source_format,
            stored_path: stored_path.into(),
            extracted_text: None,
            variables: None,
            answers: Answers::new(),
            artifact: None,
            state: SessionState::Uploaded,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
