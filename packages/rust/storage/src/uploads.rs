use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use docfill_shared::{DocfillError, MAX_UPLOAD_BYTES, Result, SessionToken};

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex"));

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory components are dropped, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9._-]` is removed and leading or trailing `.`/`_` are
/// trimmed. A name with nothing left is a validation error.
pub fn sanitize_file_name(file_name: &str) -> Result<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let joined = WHITESPACE_RE.replace_all(base, "_");
    let kept = UNSAFE_CHARS_RE.replace_all(&joined, "");
    let trimmed = kept.trim_matches(['.', '_']);

    if trimmed.is_empty() {
        return Err(DocfillError::validation(format!(
            "file name '{file_name}' is empty after sanitization"
        )));
    }
    Ok(trimmed.to_string())
}

/// Upload root holding one directory per session.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<token>`
    pub fn session_dir(&self, token: &SessionToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    /// Store uploaded bytes under the session directory and return the path.
    ///
    /// `file_name` must already be sanitized; it is checked again here.
    pub fn save(&self, token: &SessionToken, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(DocfillError::validation(format!(
                "upload is {} bytes, limit is {MAX_UPLOAD_BYTES}",
                bytes.len()
            )));
        }
        let name = sanitize_file_name(file_name)?;

        let dir = self.session_dir(token);
        std::fs::create_dir_all(&dir).map_err(|e| DocfillError::io(&dir, e))?;
        let path = dir.join(name);
        std::fs::write(&path, bytes).map_err(|e| DocfillError::io(&path, e))?;

        info!(%token, path = %path.display(), bytes = bytes.len(), "upload stored");
        Ok(path)
    }

    /// Where an artifact named `artifact_name` for this session is written.
    pub fn output_path(&self, token: &SessionToken, artifact_name: &str) -> Result<PathBuf> {
        ensure_plain_name(artifact_name)?;
        Ok(self.session_dir(token).join(artifact_name))
    }

    /// Delete a session directory and everything in it.
    pub fn remove_session(&self, token: &SessionToken) -> Result<()> {
        let dir = self.session_dir(token);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DocfillError::io(&dir, e)),
        }
    }
}

/// Reject names that could address anything outside a session directory.
fn ensure_plain_name(file_name: &str) -> Result<()> {
    if file_name.is_empty()
        || file_name.contains(['/', '\\'])
        || file_name == "."
        || file_name == ".."
    {
        return Err(DocfillError::validation(format!(
            "'{file_name}' is not a plain file name"
        )));
    }
    Ok(())
}
