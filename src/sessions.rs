//! Conversation sessions: turn history and the selected-file set.
//!
//! Every session belongs to the principal that created it. Sessions owned
//! by someone else are reported as not found. Selected ids are validated
//! when set; documents deleted afterwards are pruned from the set the next
//! time it is read.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use finreport_core::error::{Error, Result};
use finreport_core::models::{ChatSession, ChatTurn, Document, Principal, Role};
use finreport_core::store::SessionStore;

use crate::registry::Registry;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    registry: Registry,
}

fn check_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::Validation(format!(
            "invalid session id {id:?}: use up to {MAX_SESSION_ID_LEN} letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, registry: Registry) -> Self {
        Self { sessions, registry }
    }

    async fn find_owned(&self, principal: &Principal, id: &str) -> Result<Option<ChatSession>> {
        let found = self
            .sessions
            .load_session(id)
            .await
            .map_err(Error::storage)?;
        match found {
            Some(session) if session.owner != principal.as_str() => {
                Err(Error::not_found("session", id))
            }
            other => Ok(other),
        }
    }

    async fn load_owned(&self, principal: &Principal, id: &str) -> Result<ChatSession> {
        self.find_owned(principal, id)
            .await?
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// Load `session_id`, creating it for `principal` if needed. `None`
    /// creates a session with a fresh id.
    pub async fn get_or_create(
        &self,
        principal: &Principal,
        session_id: Option<&str>,
    ) -> Result<ChatSession> {
        let id = match session_id {
            Some(id) => {
                let id = id.trim();
                check_session_id(id)?;
                if let Some(existing) = self.find_owned(principal, id).await? {
                    return Ok(existing);
                }
                id.to_string()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let session = ChatSession::new(id, principal);
        self.sessions
            .create_session(&session)
            .await
            .map_err(Error::storage)?;
        tracing::debug!(id = %session.id, owner = %principal.as_str(), "session created");
        // A concurrent create by another principal wins the insert.
        self.load_owned(principal, &session.id).await
    }

    pub async fn append_turn(
        &self,
        principal: &Principal,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<ChatTurn> {
        self.load_owned(principal, session_id).await?;
        let turn = ChatTurn {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        };
        self.sessions
            .append_turn(session_id, &turn)
            .await
            .map_err(Error::storage)?;
        Ok(turn)
    }

    /// Replace the selection. Every id must name a document visible to
    /// `principal`.
    pub async fn set_selected_files(
        &self,
        principal: &Principal,
        session_id: &str,
        ids: &[String],
    ) -> Result<Vec<Document>> {
        self.load_owned(principal, session_id).await?;
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        let mut docs = Vec::with_capacity(unique.len());
        for id in &unique {
            docs.push(self.registry.get_owned(principal, id).await?);
        }
        self.sessions
            .set_selected_files(session_id, &unique)
            .await
            .map_err(Error::storage)?;
        Ok(docs)
    }

    /// Currently selected documents, in selection order. Ids whose
    /// document no longer exists are dropped and the pruned set is saved.
    pub async fn selected_files(
        &self,
        principal: &Principal,
        session_id: &str,
    ) -> Result<Vec<Document>> {
        let session = self.load_owned(principal, session_id).await?;
        if session.selected_file_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found: HashMap<String, Document> = self
            .registry
            .store()
            .get_documents(&session.selected_file_ids)
            .await
            .map_err(Error::storage)?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        let docs: Vec<Document> = session
            .selected_file_ids
            .iter()
            .filter_map(|id| found.remove(id))
            .collect();

        if docs.len() != session.selected_file_ids.len() {
            let kept: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
            tracing::info!(
                session = session_id,
                pruned = session.selected_file_ids.len() - kept.len(),
                "pruned stale file selection"
            );
            self.sessions
                .set_selected_files(session_id, &kept)
                .await
                .map_err(Error::storage)?;
        }
        Ok(docs)
    }

    pub async fn history(&self, principal: &Principal, session_id: &str) -> Result<ChatSession> {
        self.load_owned(principal, session_id).await
    }

    pub async fn clear(&self, principal: &Principal, session_id: &str) -> Result<()> {
        self.load_owned(principal, session_id).await?;
        let removed = self
            .sessions
            .delete_session(session_id)
            .await
            .map_err(Error::storage)?;
        if !removed {
            return Err(Error::not_found("session", session_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finreport_core::store::memory::{InMemoryBlobStore, InMemoryStore};
    use finreport_core::store::DocumentStore;

    fn manager() -> (SessionManager, Registry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Registry::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryBlobStore::new()),
        );
        (
            SessionManager::new(store.clone(), registry.clone()),
            registry,
            store,
        )
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (m, _, _) = manager();
        let p = Principal::local();
        let a = m.get_or_create(&p, Some("s-1")).await.unwrap();
        m.append_turn(&p, "s-1", Role::User, "hi", None).await.unwrap();
        let b = m.get_or_create(&p, Some("s-1")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.turns.len(), 1);
        assert!(m.get_or_create(&p, Some("../bad")).await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_hidden_from_other_principals() {
        let (m, _, _) = manager();
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        m.get_or_create(&alice, Some("shared")).await.unwrap();
        m.append_turn(&alice, "shared", Role::User, "secret", None)
            .await
            .unwrap();

        let not_found = |r: Result<_>| matches!(r, Err(Error::NotFound { .. }));
        assert!(not_found(m.get_or_create(&bob, Some("shared")).await.map(|_| ())));
        assert!(not_found(m.history(&bob, "shared").await.map(|_| ())));
        assert!(not_found(m.selected_files(&bob, "shared").await.map(|_| ())));
        assert!(not_found(
            m.append_turn(&bob, "shared", Role::User, "x", None).await.map(|_| ())
        ));
        assert!(not_found(m.clear(&bob, "shared").await));

        let session = m.history(&alice, "shared").await.unwrap();
        assert_eq!(session.owner, "alice");
        assert_eq!(session.turns.len(), 1);
    }

    #[tokio::test]
    async fn test_selection_validated_and_pruned() {
        let (m, registry, store) = manager();
        let p = Principal::local();
        let keep = registry.register(&p, "a.csv", 1, "text/csv", "r1").await.unwrap();
        let gone = registry.register(&p, "b.csv", 1, "text/csv", "r2").await.unwrap();
        m.get_or_create(&p, Some("s")).await.unwrap();

        let err = m
            .set_selected_files(&p, "s", &["missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        m.set_selected_files(&p, "s", &[keep.id.clone(), gone.id.clone()])
            .await
            .unwrap();
        store.delete_document(&gone.id).await.unwrap();

        let selected = m.selected_files(&p, "s").await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, keep.id);
        let session = m.history(&p, "s").await.unwrap();
        assert_eq!(session.selected_file_ids, vec![keep.id]);
    }

    #[tokio::test]
    async fn test_clear_unknown_session() {
        let (m, _, _) = manager();
        assert!(matches!(
            m.clear(&Principal::local(), "nope").await,
            Err(Error::NotFound { .. })
        ));
    }
}
