//! Session pipeline: upload → analyze → generate → artifact.
//!
//! Each step is addressed by a [`SessionToken`] returned from
//! [`Pipeline::upload`]. Steps run to completion within one call; no state is
//! shared between sessions apart from the stores themselves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use docfill_filler::{BestEffortSubstitution, SubstitutionStrategy};
use docfill_oracle::{Identification, OracleClient, VariableOracle};
use docfill_shared::{
    AppConfig, Answers, ArtifactRef, DocfillError, Result, Session, SessionState, SessionToken,
    SourceFormat, Variable,
};
use docfill_storage::{InMemorySessionStore, SessionStore, UploadStore, sanitize_file_name};

/// Result of [`Pipeline::analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzeOutcome {
    /// Identified variables (empty when degraded).
    pub variables: Vec<Variable>,
    /// Why identification fell back to an empty set, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    /// The fixed sample set was returned because no API key is configured.
    pub sample: bool,
}

impl From<Identification> for AnalyzeOutcome {
    fn from(identification: Identification) -> Self {
        let degraded = identification.degraded_reason().map(str::to_string);
        let sample = identification.is_sample();
        Self {
            variables: identification.into_variables(),
            degraded,
            sample,
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after variables have been identified.
    fn analyzed(&self, outcome: &AnalyzeOutcome);
    /// Called after a filled document has been written.
    fn generated(&self, artifact: &ArtifactRef);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn analyzed(&self, _outcome: &AnalyzeOutcome) {}
    fn generated(&self, _artifact: &ArtifactRef) {}
}

/// Orchestrates extraction, identification, and filling per session.
pub struct Pipeline {
    sessions: Arc<dyn SessionStore>,
    oracle: Arc<dyn VariableOracle>,
    uploads: UploadStore,
    strategy: Box<dyn SubstitutionStrategy>,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        oracle: Arc<dyn VariableOracle>,
        uploads: UploadStore,
    ) -> Self {
        Self {
            sessions,
            oracle,
            uploads,
            strategy: Box::new(BestEffortSubstitution),
            progress: Arc::new(SilentProgress),
        }
    }

    /// In-memory sessions, the configured oracle, and the configured upload root.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let oracle = OracleClient::from_config(&config.oracle)?;
        if oracle.is_sample() {
            info!(env = %config.oracle.api_key_env, "no API key set, oracle runs in sample mode");
        }
        Ok(Self::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(oracle),
            UploadStore::new(&config.defaults.upload_dir),
        ))
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SubstitutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Store an uploaded document and open a session for it.
    #[instrument(skip_all, fields(file_name = %file_name, bytes = bytes.len()))]
    pub async fn upload(&self, bytes: &[u8], file_name: &str) -> Result<SessionToken> {
        let format = SourceFormat::from_file_name(file_name)?;
        let name = sanitize_file_name(file_name)?;
        let token = SessionToken::new();

        self.progress.phase("Storing upload");
        let stored_path = self.uploads.save(&token, &name, bytes)?;
        self.sessions
            .put(Session::new(token.clone(), name, format, stored_path))
            .await?;

        info!(%token, %format, "session opened");
        Ok(token)
    }

    /// Extract the session's text and identify its variables.
    ///
    /// Re-running replaces the previous text and variables. An extraction
    /// failure leaves the session untouched; an oracle failure does not fail
    /// the call and is reported through [`AnalyzeOutcome::degraded`].
    #[instrument(skip_all, fields(%token))]
    pub async fn analyze(&self, token: &SessionToken) -> Result<AnalyzeOutcome> {
        let start = Instant::now();
        let session = self.sessions.get(token).await?;

        self.progress.phase("Extracting text");
        let text = extract_blocking(session.stored_path, session.source_format).await?;

        self.progress.phase("Identifying variables");
        let outcome = AnalyzeOutcome::from(self.oracle.identify(&text).await);
        if let Some(reason) = &outcome.degraded {
            warn!(%reason, "analysis continues with no variables");
        }

        let variables = outcome.variables.clone();
        self.sessions
            .update(
                token,
                Box::new(move |s| {
                    s.extracted_text = Some(text);
                    s.variables = Some(variables);
                    s.state = SessionState::Analyzed;
                }),
            )
            .await?;

        info!(
            variables = outcome.variables.len(),
            sample = outcome.sample,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis complete"
        );
        self.progress.analyzed(&outcome);
        Ok(outcome)
    }

    /// Fill the session's document with exactly `answers` and record the
    /// artifact.
    ///
    /// The session keeps `answers` merged over any earlier answers, but
    /// earlier answers never reach the document, so a variable left out of a
    /// later call stays unfilled. Does not require a prior
    /// [`analyze`](Self::analyze). On failure the session keeps its previous
    /// answers and artifact.
    #[instrument(skip_all, fields(%token, answers = answers.len()))]
    pub async fn generate(&self, token: &SessionToken, answers: Answers) -> Result<ArtifactRef> {
        let session = self.sessions.get(token).await?;

        let file_name = ArtifactRef::file_name_for(&session.source_filename);
        let output = self.uploads.output_path(token, &file_name)?;

        self.progress.phase("Filling document");
        docfill_filler::fill(
            &session.stored_path,
            session.source_format,
            &answers,
            &output,
            self.strategy.as_ref(),
        )?;

        let artifact = ArtifactRef {
            file_name,
            path: output,
        };
        let stored = artifact.clone();
        let mut merged = session.answers;
        merged.extend(answers);
        self.sessions
            .update(
                token,
                Box::new(move |s| {
                    s.answers = merged;
                    s.artifact = Some(stored);
                    s.state = SessionState::Filled;
                }),
            )
            .await?;

        info!(artifact = %artifact.file_name, "document generated");
        self.progress.generated(&artifact);
        Ok(artifact)
    }

    /// The most recent artifact for a session, if one was generated.
    pub async fn artifact(&self, token: &SessionToken) -> Result<Option<ArtifactRef>> {
        Ok(self.sessions.get(token).await?.artifact)
    }

    /// Path of the session's current artifact when it is named `file_name`.
    ///
    /// Only the session's own artifact is ever returned; another session's
    /// file with the same name is not visible here.
    pub async fn artifact_path(
        &self,
        token: &SessionToken,
        file_name: &str,
    ) -> Result<Option<PathBuf>> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(DocfillError::validation(format!(
                "'{file_name}' is not a plain file name"
            )));
        }
        let session = self.sessions.get(token).await?;
        Ok(session
            .artifact
            .filter(|artifact| artifact.file_name == file_name)
            .map(|artifact| artifact.path))
    }

    /// A snapshot of the session.
    pub async fn session(&self, token: &SessionToken) -> Result<Session> {
        self.sessions.get(token).await
    }

    /// Drop a session and its files.
    #[instrument(skip_all, fields(%token))]
    pub async fn discard(&self, token: &SessionToken) -> Result<()> {
        self.sessions.delete(token).await?;
        self.uploads.remove_session(token)?;
        info!("session discarded");
        Ok(())
    }
}

/// Run text extraction off the async runtime; PDF parsing is CPU-bound.
async fn extract_blocking(path: PathBuf, format: SourceFormat) -> Result<String> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || docfill_extract::extract(&task_path, format))
        .await
        .map_err(|e| DocfillError::extraction(path, format!("extraction task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use docfill_docx::{DocumentBuilder, DocxPackage};

    /// Returns queued identifications in order, then `Degraded`.
    struct ScriptedOracle {
        queue: Mutex<VecDeque<Identification>>,
    }

    impl ScriptedOracle {
        fn new(results: Vec<Identification>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl VariableOracle for ScriptedOracle {
        async fn identify(&self, _text: &str) -> Identification {
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Identification::Degraded {
                    reason: "script exhausted".into(),
                })
        }
    }

    struct Fixture {
        pipeline: Pipeline,
        root: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn fixture(oracle: Arc<dyn VariableOracle>) -> Fixture {
        let root = std::env::temp_dir().join(format!("docfill_pipeline_{}", uuid::Uuid::new_v4()));
        let pipeline = Pipeline::new(
            Arc::new(InMemorySessionStore::new()),
            oracle,
            UploadStore::new(&root),
        );
        Fixture { pipeline, root }
    }

    fn docx_bytes(lines: &[&str]) -> Vec<u8> {
        lines
            .iter()
            .fold(DocumentBuilder::new(), |doc, line| doc.paragraph(line))
            .build()
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    fn vars(names: &[&str]) -> Vec<Variable> {
        names.iter().map(|n| Variable::new(*n, "")).collect()
    }

    fn answers(pairs: &[(&str, &str)]) -> Answers {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn upload_opens_session() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Hello"]), "My Lease.docx")
            .await
            .unwrap();

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.state, SessionState::Uploaded);
        assert_eq!(session.source_filename, "My_Lease.docx");
        assert_eq!(session.source_format, SourceFormat::Docx);
        assert!(session.stored_path.starts_with(fx.pipeline.uploads().session_dir(&token)));
        assert!(session.stored_path.is_file());
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_format() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let err = fx.pipeline.upload(b"plain", "notes.txt").await.unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedFormat { .. }));
        assert!(!fx.root.exists());
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_everywhere() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = SessionToken::new();

        assert!(matches!(
            fx.pipeline.analyze(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
        assert!(matches!(
            fx.pipeline.generate(&token, Answers::new()).await,
            Err(DocfillError::InvalidSession { .. })
        ));
        assert!(matches!(
            fx.pipeline.artifact(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
        assert!(matches!(
            fx.pipeline.session(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn analyze_stores_text_and_variables() {
        let fx = fixture(ScriptedOracle::new(vec![Identification::Identified(vars(&[
            "Date",
        ]))]));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Dated [Date]."]), "nda.docx")
            .await
            .unwrap();

        let outcome = fx.pipeline.analyze(&token).await.unwrap();
        assert_eq!(outcome.variables, vars(&["Date"]));
        assert!(outcome.degraded.is_none());
        assert!(!outcome.sample);

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.state, SessionState::Analyzed);
        assert_eq!(session.extracted_text.as_deref(), Some("Dated [Date]."));
    }

    #[tokio::test]
    async fn analyze_twice_overwrites_variables() {
        let fx = fixture(ScriptedOracle::new(vec![
            Identification::Identified(vars(&["Tenant", "Landlord"])),
            Identification::Identified(vars(&["Rent"])),
        ]));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Lease"]), "lease.docx")
            .await
            .unwrap();

        fx.pipeline.analyze(&token).await.unwrap();
        fx.pipeline.analyze(&token).await.unwrap();

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.variables, Some(vars(&["Rent"])));
    }

    #[tokio::test]
    async fn degraded_oracle_still_analyzes() {
        let fx = fixture(ScriptedOracle::new(vec![Identification::Degraded {
            reason: "HTTP 503".into(),
        }]));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Text"]), "a.docx")
            .await
            .unwrap();

        let outcome = fx.pipeline.analyze(&token).await.unwrap();
        assert!(outcome.variables.is_empty());
        assert_eq!(outcome.degraded.as_deref(), Some("HTTP 503"));

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.state, SessionState::Analyzed);
        assert_eq!(session.variables, Some(vec![]));
    }

    #[tokio::test]
    async fn sample_oracle_is_flagged() {
        let fx = fixture(Arc::new(OracleClient::sample()));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Anything"]), "a.docx")
            .await
            .unwrap();

        let outcome = fx.pipeline.analyze(&token).await.unwrap();
        assert!(outcome.sample);
        assert_eq!(outcome.variables.len(), 3);
    }

    #[tokio::test]
    async fn extraction_failure_leaves_session_unchanged() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(b"%PDF-1.4 garbage", "broken.pdf")
            .await
            .unwrap();

        let err = fx.pipeline.analyze(&token).await.unwrap_err();
        assert!(matches!(err, DocfillError::Extraction { .. }));

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.state, SessionState::Uploaded);
        assert!(session.variables.is_none());
        assert!(session.extracted_text.is_none());
    }

    #[tokio::test]
    async fn generate_without_analyze_fills_docx() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(&docx_bytes(&["Effective [Date].", "Boilerplate."]), "contract.docx")
            .await
            .unwrap();

        let artifact = fx
            .pipeline
            .generate(&token, answers(&[("Date", "2024-01-01")]))
            .await
            .unwrap();

        assert_eq!(artifact.file_name, "contract_filled.docx");
        assert_eq!(
            artifact.path,
            fx.pipeline.uploads().session_dir(&token).join("contract_filled.docx")
        );
        let texts = DocxPackage::open(&artifact.path).unwrap().paragraph_texts().unwrap();
        assert!(texts[0].contains("2024-01-01"));
        assert!(!texts[0].contains("[Date]"));
        assert_eq!(texts[1], "Boilerplate.");

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.state, SessionState::Filled);
        assert_eq!(fx.pipeline.artifact(&token).await.unwrap(), Some(artifact));
    }

    #[tokio::test]
    async fn generate_fills_only_supplied_answers() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(b"%PDF-1.4", "invoice.pdf")
            .await
            .unwrap();

        fx.pipeline
            .generate(&token, answers(&[("Client Name", "Acme"), ("Amount", "100")]))
            .await
            .unwrap();
        let artifact = fx
            .pipeline
            .generate(&token, answers(&[("Amount", "500")]))
            .await
            .unwrap();

        let session = fx.pipeline.session(&token).await.unwrap();
        assert_eq!(session.answers.get("Client Name"), Some("Acme"));
        assert_eq!(session.answers.get("Amount"), Some("500"));

        let texts = DocxPackage::open(&artifact.path).unwrap().paragraph_texts().unwrap();
        assert_eq!(texts, vec!["Filled Variables", "Amount: 500"]);
    }

    #[tokio::test]
    async fn pdf_generate_produces_summary_docx() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(b"%PDF-1.4", "Statement.PDF")
            .await
            .unwrap();

        let artifact = fx
            .pipeline
            .generate(&token, answers(&[("Amount", "500")]))
            .await
            .unwrap();

        assert_eq!(artifact.file_name, "Statement_filled.docx");
        let texts = DocxPackage::open(&artifact.path).unwrap().paragraph_texts().unwrap();
        assert!(texts.iter().any(|t| t.contains("Amount") && t.contains("500")));
    }

    #[tokio::test]
    async fn failed_generate_stores_nothing() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx
            .pipeline
            .upload(b"not a zip", "broken.docx")
            .await
            .unwrap();

        let err = fx
            .pipeline
            .generate(&token, answers(&[("Date", "today")]))
            .await
            .unwrap_err();
        assert!(matches!(err, DocfillError::Fill { .. }));

        let session = fx.pipeline.session(&token).await.unwrap();
        assert!(session.answers.is_empty());
        assert!(session.artifact.is_none());
        assert_eq!(session.state, SessionState::Uploaded);
    }

    #[tokio::test]
    async fn artifact_path_matches_own_artifact_only() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx.pipeline.upload(b"%PDF-1.4", "deed.pdf").await.unwrap();
        assert_eq!(
            fx.pipeline.artifact_path(&token, "deed_filled.docx").await.unwrap(),
            None
        );

        let artifact = fx.pipeline.generate(&token, Answers::new()).await.unwrap();
        assert_eq!(
            fx.pipeline.artifact_path(&token, "deed_filled.docx").await.unwrap(),
            Some(artifact.path)
        );
        assert_eq!(
            fx.pipeline.artifact_path(&token, "other_filled.docx").await.unwrap(),
            None
        );
        assert!(matches!(
            fx.pipeline.artifact_path(&token, "../deed_filled.docx").await,
            Err(DocfillError::Validation { .. })
        ));
        assert!(matches!(
            fx.pipeline.artifact_path(&SessionToken::new(), "deed_filled.docx").await,
            Err(DocfillError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn same_artifact_name_resolves_per_session() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let a = fx.pipeline.upload(b"%PDF-1.4", "intake.pdf").await.unwrap();
        let b = fx.pipeline.upload(b"%PDF-1.4", "intake.pdf").await.unwrap();
        fx.pipeline.generate(&a, answers(&[("SSN", "A-secret")])).await.unwrap();
        fx.pipeline.generate(&b, answers(&[("SSN", "B-own")])).await.unwrap();

        for (token, expected) in [(&b, "SSN: B-own"), (&a, "SSN: A-secret")] {
            let path = fx
                .pipeline
                .artifact_path(token, "intake_filled.docx")
                .await
                .unwrap()
                .unwrap();
            assert!(path.starts_with(fx.pipeline.uploads().session_dir(token)));
            let texts = DocxPackage::open(&path).unwrap().paragraph_texts().unwrap();
            assert_eq!(texts[1], expected);
        }
    }

    #[tokio::test]
    async fn discard_removes_session_and_files() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let token = fx.pipeline.upload(b"%PDF-1.4", "x.pdf").await.unwrap();

        fx.pipeline.discard(&token).await.unwrap();
        assert!(!fx.pipeline.uploads().session_dir(&token).exists());
        assert!(matches!(
            fx.pipeline.session(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let fx = fixture(ScriptedOracle::new(vec![]));
        let a = fx.pipeline.upload(b"%PDF-1.4", "same.pdf").await.unwrap();
        let b = fx.pipeline.upload(b"%PDF-1.4", "same.pdf").await.unwrap();

        let art_a = fx.pipeline.generate(&a, answers(&[("K", "A")])).await.unwrap();
        let art_b = fx.pipeline.generate(&b, answers(&[("K", "B")])).await.unwrap();
        assert_ne!(art_a.path, art_b.path);

        let texts = DocxPackage::open(&art_a.path).unwrap().paragraph_texts().unwrap();
        assert_eq!(texts[1], "K: A");
    }
}
