//! Session Manager (C5), spec §4.3.
//!
//! Per spec §9 ("cyclic references between Session ↔ Challenge"), the link
//! is kept one-way: `SigningSession.challenge_id` points at a challenge, the
//! challenge never points back at a live session object, only at
//! `session_id`. Resolution happens at read time via the Challenge Manager.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::GatewayConfig;
use crate::domain::{CeremonyState, SessionStatus, SessionType, SigningSession};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{topics, EventBus};
use crate::store::LedgerStore;

/// The allowed-transition table from spec §4.3. Any transition not listed
/// here fails with `InvalidTransition`; terminal states admit nothing.
fn transition_allowed(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Initiated, ChallengeSent)
            | (Initiated, Failed)
            | (Initiated, Expired)
            | (ChallengeSent, AwaitingSignature)
            | (ChallengeSent, Failed)
            | (ChallengeSent, Expired)
            | (AwaitingSignature, Signing)
            | (AwaitingSignature, Failed)
            | (AwaitingSignature, Expired)
            | (Signing, Completed)
            | (Signing, Failed)
            | (Signing, Expired)
    )
}

#[derive(Clone)]
pub struct SessionManager {
    store: LedgerStore,
    config: GatewayConfig,
    events: Arc<EventBus>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(store: LedgerStore, config: GatewayConfig, events: Arc<EventBus>) -> Self {
        Self {
            store,
            config,
            events,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// `session_id = sha256(user_pubkey || type || canonical_json(intent) || iso_timestamp)`.
    pub fn derive_session_id(
        user_pubkey: &str,
        session_type: SessionType,
        intent: &serde_json::Value,
        iso_timestamp: &str,
    ) -> String {
        let canonical = serde_json::to_string(intent).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(user_pubkey.as_bytes());
        hasher.update(session_type.as_str().as_bytes());
        hasher.update(canonical.as_bytes());
        hasher.update(iso_timestamp.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn create_session(
        &self,
        user_pubkey: &str,
        session_type: SessionType,
        intent: serde_json::Value,
        context: Option<String>,
    ) -> GatewayResult<SigningSession> {
        let now = Utc::now();
        let session_id = Self::derive_session_id(user_pubkey, session_type, &intent, &now.to_rfc3339());

        let session = SigningSession {
            session_id: session_id.clone(),
            user_pubkey: user_pubkey.to_string(),
            session_type,
            status: SessionStatus::Initiated,
            intent,
            challenge_id: None,
            context,
            created_at: now,
            updated_at: now,
            expires_at: now + ChronoDuration::seconds(self.config.session_timeout_secs as i64),
            result: None,
            signed_tx: None,
            error_message: None,
            ceremony: CeremonyState::default(),
        };
        self.store.put_session(&session)?;
        self.publish_status(&session);
        Ok(session)
    }

    /// Auto-transitions a non-terminal expired session to `expired` and
    /// returns the updated row. Callers must treat `expired` as terminal.
    pub async fn get(&self, session_id: &str) -> GatewayResult<SigningSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.get_locked(session_id)
    }

    fn get_locked(&self, session_id: &str) -> GatewayResult<SigningSession> {
        let mut session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("session {session_id}")))?;

        if !session.status.is_terminal() && session.expires_at <= Utc::now() {
            session.status = SessionStatus::Expired;
            session.updated_at = Utc::now();
            self.store.put_session(&session)?;
            self.publish_status(&session);
        }
        Ok(session)
    }

    /// Enforces the allowed-transition table atomically with the state
    /// write (spec §5 "Session state").
    pub async fn transition(&self, session_id: &str, to: SessionStatus) -> GatewayResult<SigningSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.get_locked(session_id)?;
        if session.status.is_terminal() {
            return Err(GatewayError::InvalidTransition {
                from: session.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        if !transition_allowed(session.status, to) {
            return Err(GatewayError::InvalidTransition {
                from: session.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        session.status = to;
        session.updated_at = Utc::now();
        self.store.put_session(&session)?;
        self.publish_status(&session);
        Ok(session)
    }

    pub async fn fail(&self, session_id: &str, reason: &str) -> GatewayResult<SigningSession> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.get_locked(session_id)?;
        if session.status.is_terminal() {
            return Ok(session);
        }
        session.status = SessionStatus::Failed;
        session.error_message = Some(reason.to_string());
        session.updated_at = Utc::now();
        self.store.put_session(&session)?;
        self.publish_status(&session);
        Ok(session)
    }

    pub async fn save(&self, session: &SigningSession) -> GatewayResult<()> {
        self.store.put_session(session)?;
        self.publish_status(session);
        Ok(())
    }

    /// Convergence sweep used by a periodic expiry monitor: every
    /// non-terminal session whose TTL has passed is flipped to `expired`
    /// (spec §8 "Expiry liveness").
    pub async fn sweep_expired_sessions(&self) -> GatewayResult<u64> {
        let now = Utc::now();
        let mut count = 0;
        for session in self.store.list_sessions()? {
            if !session.status.is_terminal() && session.expires_at <= now {
                let _ = self.get(&session.session_id).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn publish_status(&self, session: &SigningSession) {
        self.events.publish(
            topics::SESSION_STATUS,
            serde_json::json!({
                "session_id": session.session_id,
                "status": session.status.as_str(),
                "session_type": session.session_type.as_str(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        let store = LedgerStore::open_temporary().unwrap();
        SessionManager::new(store, GatewayConfig::default(), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn allowed_transitions_follow_the_table() {
        let mgr = manager();
        let session = mgr
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({}), None)
            .await
            .unwrap();

        mgr.transition(&session.session_id, SessionStatus::ChallengeSent)
            .await
            .unwrap();
        mgr.transition(&session.session_id, SessionStatus::AwaitingSignature)
            .await
            .unwrap();
        mgr.transition(&session.session_id, SessionStatus::Signing)
            .await
            .unwrap();
        let completed = mgr
            .transition(&session.session_id, SessionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn disallowed_transition_is_rejected() {
        let mgr = manager();
        let session = mgr
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({}), None)
            .await
            .unwrap();

        let err = mgr
            .transition(&session.session_id, SessionStatus::Signing)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn terminal_state_admits_no_further_transitions() {
        let mgr = manager();
        let session = mgr
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({}), None)
            .await
            .unwrap();
        mgr.fail(&session.session_id, "boom").await.unwrap();

        let err = mgr
            .transition(&session.session_id, SessionStatus::ChallengeSent)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn get_auto_expires_stale_session() {
        let mgr = manager();
        let mut session = mgr
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({}), None)
            .await
            .unwrap();
        session.expires_at = Utc::now() - ChronoDuration::seconds(1);
        mgr.store.put_session(&session).unwrap();

        let fetched = mgr.get(&session.session_id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Expired);
    }
}
