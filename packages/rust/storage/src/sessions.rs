use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use docfill_shared::{DocfillError, Result, Session, SessionToken};

/// In-place mutation applied to a stored session.
pub type SessionUpdate = Box<dyn FnOnce(&mut Session) + Send>;

/// Keyed storage for [`Session`] records.
///
/// Lookups of unknown tokens fail with [`DocfillError::InvalidSession`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A snapshot of the session.
    async fn get(&self, token: &SessionToken) -> Result<Session>;

    /// Insert or replace a session.
    async fn put(&self, session: Session) -> Result<()>;

    /// Remove a session, returning it.
    async fn delete(&self, token: &SessionToken) -> Result<Session>;

    /// Apply `update` under the store's write lock and return the result.
    /// `updated_at` is bumped afterwards.
    async fn update(&self, token: &SessionToken, update: SessionUpdate) -> Result<Session>;
}

/// Process-local store. Sessions live as long as the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, token: &SessionToken) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| DocfillError::invalid_session(token.as_str()))
    }

    async fn put(&self, session: Session) -> Result<()> {
        debug!(token = %session.token, state = ?session.state, "session stored");
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session);
        Ok(())
    }

    async fn delete(&self, token: &SessionToken) -> Result<Session> {
        self.sessions
            .write()
            .await
            .remove(token)
            .ok_or_else(|| DocfillError::invalid_session(token.as_str()))
    }

    async fn update(&self, token: &SessionToken, update: SessionUpdate) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(token)
            .ok_or_else(|| DocfillError::invalid_session(token.as_str()))?;
        update(session);
        session.touch();
        debug!(%token, state = ?session.state, "session updated");
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfill_shared::{SessionState, SourceFormat, Variable};

    fn sample_session() -> Session {
        Session::new(
            SessionToken::new(),
            "lease.docx",
            SourceFormat::Docx,
            "/tmp/lease.docx",
        )
    }

    #[tokio::test]
    async fn put_then_get_returns_snapshot() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        let token = session.token.clone();
        store.put(session).await.unwrap();

        let got = store.get(&token).await.unwrap();
        assert_eq!(got.source_filename, "lease.docx");
        assert_eq!(got.state, SessionState::Uploaded);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid_session() {
        let store = InMemorySessionStore::new();
        let token = SessionToken::new();

        assert!(matches!(
            store.get(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
        assert!(matches!(
            store.delete(&token).await,
            Err(DocfillError::InvalidSession { .. })
        ));
        let result = store.update(&token, Box::new(|_| {})).await;
        assert!(matches!(result, Err(DocfillError::InvalidSession { .. })));
    }

    #[tokio::test]
    async fn update_mutates_in_place() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        let token = session.token.clone();
        let created = session.updated_at;
        store.put(session).await.unwrap();

        let updated = store
            .update(
                &token,
                Box::new(|s| {
                    s.variables = Some(vec![Variable::new("Date", "Agreement date")]);
                    s.state = SessionState::Analyzed;
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.state, SessionState::Analyzed);
        assert!(updated.updated_at >= created);
        let stored = store.get(&token).await.unwrap();
        assert_eq!(stored.variables.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_detached() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        let token = session.token.clone();
        store.put(session).await.unwrap();

        let mut snapshot = store.get(&token).await.unwrap();
        snapshot.state = SessionState::Filled;
        assert_eq!(store.get(&token).await.unwrap().state, SessionState::Uploaded);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        let token = session.token.clone();
        store.put(session).await.unwrap();

        store.delete(&token).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sessions_do_not_interfere() {
        let store = InMemorySessionStore::new();
        let a = sample_session();
        let b = sample_session();
        let (ta, tb) = (a.token.clone(), b.token.clone());
        store.put(a).await.unwrap();
        store.put(b).await.unwrap();

        store
            .update(&ta, Box::new(|s| s.state = SessionState::Filled))
            .await
            .unwrap();
        assert_eq!(store.get(&tb).await.unwrap().state, SessionState::Uploaded);
    }
}
