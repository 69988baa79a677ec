//! Signing Orchestrator (C8), spec §4.5 — the six-step ceremony.
//!
//! Ceremony state travels on the session row itself (`CeremonyState`) so a
//! process restart mid-ceremony can resume from `get(session_id)` rather
//! than from orchestrator-local memory — the teacher's `AppState` similarly
//! treats `sled` as the single source of truth instead of caching
//! authoritative state off to the side.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::adapters::ChainAdapter;
use crate::balance::BalanceManager;
use crate::challenge::validate_pubkey_format;
use crate::config::GatewayConfig;
use crate::domain::{SessionStatus, SessionType, SigningSession};
use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionManager;
use crate::store::LedgerStore;
use crate::transaction::TransactionProcessor;

#[derive(Clone)]
pub struct SigningOrchestrator {
    sessions: SessionManager,
    transactions: TransactionProcessor,
    balances: BalanceManager,
    chain: Arc<dyn ChainAdapter>,
    store: LedgerStore,
    config: GatewayConfig,
}

#[derive(Debug, serde::Serialize)]
pub struct CeremonyStatus {
    pub session_status: String,
    pub ceremony_status: String,
    pub current_step: u8,
    pub completed_steps: Vec<String>,
    pub transactions: HashMap<String, String>,
    pub signatures_collected: HashMap<String, String>,
    pub start_time: Option<chrono::DateTime<Utc>>,
    pub time_elapsed_secs: Option<i64>,
    pub time_remaining_secs: Option<i64>,
}

impl SigningOrchestrator {
    pub fn new(
        sessions: SessionManager,
        transactions: TransactionProcessor,
        balances: BalanceManager,
        chain: Arc<dyn ChainAdapter>,
        store: LedgerStore,
        config: GatewayConfig,
    ) -> Self {
        Self { sessions, transactions, balances, chain, store, config }
    }

    /// Drives the session in `awaiting_signature` through all six steps in
    /// order. `signature_data` carries the user's signature over the
    /// challenge bound to this session, if the caller has one in hand
    /// rather than relying on a challenge already marked used.
    pub async fn run_ceremony(
        &self,
        session_id: &str,
        signature_data: Option<String>,
    ) -> GatewayResult<SigningSession> {
        let mut session = self.sessions.get(session_id).await?;
        if session.status != SessionStatus::AwaitingSignature {
            return Err(GatewayError::InvalidTransition {
                from: session.status.as_str().to_string(),
                to: "signing".to_string(),
            });
        }

        session = self.sessions.transition(session_id, SessionStatus::Signing).await?;
        session.ceremony.start_time = Some(Utc::now());
        self.sessions.save(&session).await?;

        let ceremony_timeout = chrono::Duration::seconds(self.config.ceremony_timeout_secs as i64);
        let step_timeout = chrono::Duration::seconds(self.config.step_timeout_secs as i64);

        macro_rules! step {
            ($n:expr, $name:expr, $body:expr) => {{
                let step_start = Utc::now();
                session.ceremony.current_step = $n;
                session.ceremony.step_start_time = Some(step_start);
                self.sessions.save(&session).await?;

                let start = session.ceremony.start_time.unwrap_or(step_start);
                if Utc::now() - start > ceremony_timeout {
                    let err = GatewayError::SigningTimeout(format!("ceremony total budget exceeded before step {}", $name));
                    return self.fail_ceremony(&mut session, &err.to_string()).await;
                }

                let result: GatewayResult<()> = $body;
                if Utc::now() - step_start > step_timeout {
                    let err = GatewayError::SigningTimeout(format!("step {} exceeded its budget", $name));
                    return self.fail_ceremony(&mut session, &err.to_string()).await;
                }
                if let Err(e) = result {
                    return self.fail_ceremony(&mut session, &format!("step {} failed: {e}", $name)).await;
                }
                session.ceremony.completed_steps.push($name.to_string());
                self.sessions.save(&session).await?;
            }};
        }

        step!(1, "intent_verification", self.verify_intent(&session));
        step!(2, "ark_tx_preparation", self.prepare_ark_tx(&mut session).await);
        step!(3, "checkpoint_preparation", self.prepare_checkpoint(&mut session).await);
        step!(4, "signature_collection", self.collect_signatures(&mut session, signature_data.clone()).await);
        step!(5, "protocol_execution", self.execute_protocol(&mut session).await);
        step!(6, "finalization", self.finalize(&mut session).await);

        session = self.sessions.transition(session_id, SessionStatus::Completed).await?;
        Ok(session)
    }

    async fn fail_ceremony(&self, session: &mut SigningSession, reason: &str) -> GatewayResult<SigningSession> {
        tracing::warn!(session_id = %session.session_id, reason, "ceremony step failed");
        self.sessions.fail(&session.session_id, reason).await
    }

    /// Step 1: `{recipient_pubkey, amount, asset_id}` for p2p, `{amount,
    /// asset_id}` for Lightning types. Pubkey format rule per SPEC_FULL.md:
    /// strict secp256k1 hex, not the lenient alphanumeric fallback.
    fn verify_intent(&self, session: &SigningSession) -> GatewayResult<()> {
        let intent = &session.intent;
        let amount = intent
            .get("amount")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| GatewayError::Validation("intent missing amount".to_string()))?;
        if amount == 0 {
            return Err(GatewayError::Validation("intent amount must be > 0".to_string()));
        }
        if intent.get("asset_id").and_then(|v| v.as_str()).is_none() {
            return Err(GatewayError::Validation("intent missing asset_id".to_string()));
        }

        if session.session_type == SessionType::P2pTransfer {
            let recipient = intent
                .get("recipient_pubkey")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GatewayError::Validation("intent missing recipient_pubkey".to_string()))?;
            validate_pubkey_format(recipient)?;
        }
        Ok(())
    }

    /// Step 2: for p2p, delegates to C7; for Lightning, synthesizes a
    /// minimal internal `ark_tx` row.
    async fn prepare_ark_tx(&self, session: &mut SigningSession) -> GatewayResult<()> {
        let amount = session.intent.get("amount").and_then(|v| v.as_u64()).unwrap_or(0) as u128;
        let asset_id = session
            .intent
            .get("asset_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let ark_tx_id = match session.session_type {
            SessionType::P2pTransfer => {
                let recipient = session
                    .intent
                    .get("recipient_pubkey")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let tx = self
                    .transactions
                    .process_p2p_transfer(&session.session_id, &session.user_pubkey, recipient, &asset_id, amount)
                    .await?;
                tx.txid
            }
            SessionType::LightningLift | SessionType::LightningLand => {
                let mut hasher = Sha256::new();
                hasher.update(session.session_id.as_bytes());
                hasher.update(b"ark_tx");
                hex::encode(hasher.finalize())
            }
        };

        session.ceremony.transactions.insert("ark_tx".to_string(), ark_tx_id);
        Ok(())
    }

    /// Step 3: require `{success: true, txid}` from the chain adapter.
    async fn prepare_checkpoint(&self, session: &mut SigningSession) -> GatewayResult<()> {
        let ark_tx_id = session
            .ceremony
            .transactions
            .get("ark_tx")
            .cloned()
            .ok_or_else(|| GatewayError::SigningCeremony {
                step: "checkpoint_preparation".to_string(),
                reason: "no ark_tx recorded".to_string(),
            })?;

        let result = self.chain.create_checkpoint_transaction(&ark_tx_id).await?;
        if !result.success {
            return Err(GatewayError::SigningCeremony {
                step: "checkpoint_preparation".to_string(),
                reason: result.error.unwrap_or_else(|| "checkpoint rejected".to_string()),
            });
        }
        if let Some(txid) = result.txid {
            session.ceremony.transactions.insert("checkpoint_tx".to_string(), txid);
        }
        Ok(())
    }

    /// Step 4: user signature (from `signature_data` or the challenge
    /// already bound to this session), a gateway placeholder signature
    /// `sha256(session_id || iso_now)`, and an optional out-of-band
    /// recipient signature for p2p (never produced here).
    async fn collect_signatures(&self, session: &mut SigningSession, signature_data: Option<String>) -> GatewayResult<()> {
        let user_sig = match signature_data {
            Some(sig) => Some(sig),
            None => session
                .challenge_id
                .as_ref()
                .and_then(|id| self.store.get_challenge(id).ok().flatten())
                .and_then(|challenge| challenge.signature),
        };
        let user_sig = user_sig.ok_or_else(|| GatewayError::SigningCeremony {
            step: "signature_collection".to_string(),
            reason: "no user signature available".to_string(),
        })?;
        session.ceremony.signatures_collected.insert("user".to_string(), user_sig);

        let mut hasher = Sha256::new();
        hasher.update(session.session_id.as_bytes());
        hasher.update(Utc::now().to_rfc3339().as_bytes());
        let gateway_sig = hex::encode(hasher.finalize());
        session
            .ceremony
            .signatures_collected
            .insert("gateway".to_string(), gateway_sig);

        Ok(())
    }

    /// Step 5: `execute_ark_protocol(ark_tx_id, signatures)`, require
    /// `{success: true}`.
    async fn execute_protocol(&self, session: &mut SigningSession) -> GatewayResult<()> {
        let ark_tx_id = session.ceremony.transactions.get("ark_tx").cloned().unwrap_or_default();
        let result = self
            .chain
            .execute_ark_protocol(&ark_tx_id, &session.ceremony.signatures_collected)
            .await?;
        if !result.success {
            return Err(GatewayError::SigningCeremony {
                step: "protocol_execution".to_string(),
                reason: result.error.unwrap_or_else(|| "protocol execution rejected".to_string()),
            });
        }
        Ok(())
    }

    /// Step 6: broadcast `ark_tx_id` via C7; on success, for `p2p_transfer`
    /// confirm the reserved balance move; persist a final result map.
    async fn finalize(&self, session: &mut SigningSession) -> GatewayResult<()> {
        let ark_tx_id = session.ceremony.transactions.get("ark_tx").cloned().unwrap_or_default();
        self.transactions.broadcast(&ark_tx_id, "").await?;

        if session.session_type == SessionType::P2pTransfer {
            let recipient = session
                .intent
                .get("recipient_pubkey")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let asset_id = session.intent.get("asset_id").and_then(|v| v.as_str()).unwrap_or_default();
            self.transactions
                .confirm(&ark_tx_id, &session.user_pubkey, recipient, asset_id, 0)
                .await?;
        }

        session.signed_tx = Some(ark_tx_id.clone());
        session.result = Some(serde_json::json!({
            "txid": ark_tx_id,
            "session_type": session.session_type.as_str(),
            "status": "completed",
            "completed_steps": session.ceremony.completed_steps,
            "transactions": session.ceremony.transactions,
            "broadcast_success": true,
        }));
        Ok(())
    }

    /// `cancel_ceremony(session_id, reason)`: transitions to `failed`
    /// regardless of current step, releasing any reserved funds is the
    /// caller's (C7 compensation's) responsibility via a subsequent
    /// `release` call on the balance manager — kept explicit here rather
    /// than hidden inside `fail` so the release amount is visible at the
    /// call site.
    pub async fn cancel_ceremony(&self, session_id: &str, reason: &str) -> GatewayResult<SigningSession> {
        let session = self.sessions.get(session_id).await?;
        if let (SessionType::P2pTransfer, Some(asset_id), Some(amount)) = (
            session.session_type,
            session.intent.get("asset_id").and_then(|v| v.as_str()),
            session.intent.get("amount").and_then(|v| v.as_u64()),
        ) {
            let _ = self.balances.release(&session.user_pubkey, asset_id, amount as u128).await;
        }
        self.sessions.fail(session_id, reason).await
    }

    pub async fn ceremony_status(&self, session_id: &str) -> GatewayResult<CeremonyStatus> {
        let session = self.sessions.get(session_id).await?;
        let ceremony_status = if session.ceremony.start_time.is_some() {
            "in_progress"
        } else {
            "not_started"
        };
        let now = Utc::now();
        let (elapsed, remaining) = match session.ceremony.start_time {
            Some(start) => (
                Some((now - start).num_seconds()),
                Some(self.config.ceremony_timeout_secs as i64 - (now - start).num_seconds()),
            ),
            None => (None, None),
        };
        Ok(CeremonyStatus {
            session_status: session.status.as_str().to_string(),
            ceremony_status: ceremony_status.to_string(),
            current_step: session.ceremony.current_step,
            completed_steps: session.ceremony.completed_steps,
            transactions: session.ceremony.transactions,
            signatures_collected: session.ceremony.signatures_collected,
            start_time: session.ceremony.start_time,
            time_elapsed_secs: elapsed,
            time_remaining_secs: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChainAdapter;
    use crate::config::GatewayConfig;
    use crate::events::EventBus;
    use crate::store::LedgerStore;
    use std::collections::HashMap as StdHashMap;

    fn orchestrator() -> (SigningOrchestrator, SessionManager, LedgerStore) {
        let store = LedgerStore::open_temporary().unwrap();
        let config = GatewayConfig::default();
        let events = Arc::new(EventBus::new());
        let sessions = SessionManager::new(store.clone(), config.clone(), events);
        let balances = BalanceManager::new(store.clone());
        let chain: Arc<dyn ChainAdapter> = Arc::new(MockChainAdapter::new());
        let transactions = TransactionProcessor::new(
            store.clone(),
            BalanceManager::new(store.clone()),
            chain.clone(),
            config.clone(),
        );

        store
            .put_asset(&crate::domain::Asset {
                asset_id: "BTC".to_string(),
                display_name: "Bitcoin".to_string(),
                ticker: "BTC".to_string(),
                decimals: 8,
                total_supply: 0,
                active: true,
                metadata: StdHashMap::new(),
                rgb_contract_id: None,
            })
            .unwrap();

        let orch = SigningOrchestrator::new(
            sessions.clone(),
            transactions,
            balances,
            chain,
            store.clone(),
            GatewayConfig::default(),
        );
        (orch, sessions, store)
    }

    #[tokio::test]
    async fn full_ceremony_completes_and_moves_balances() {
        let (orch, sessions, store) = orchestrator();
        let balances = BalanceManager::new(store.clone());
        balances.mint("alice", "BTC", 10_000).await.unwrap();

        let session = sessions
            .create_session(
                "alice",
                SessionType::P2pTransfer,
                serde_json::json!({"recipient_pubkey": "02".to_string() + &"11".repeat(32), "amount": 1000, "asset_id": "BTC"}),
                None,
            )
            .await
            .unwrap();
        sessions.transition(&session.session_id, SessionStatus::ChallengeSent).await.unwrap();
        sessions.transition(&session.session_id, SessionStatus::AwaitingSignature).await.unwrap();

        let completed = orch
            .run_ceremony(&session.session_id, Some("deadbeef".to_string()))
            .await
            .unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.signed_tx.is_some());

        assert_eq!(balances.get_balance("alice", "BTC").unwrap().balance, 9000);
    }

    #[tokio::test]
    async fn ceremony_fails_without_required_intent_fields() {
        let (orch, sessions, _store) = orchestrator();
        let session = sessions
            .create_session("alice", SessionType::P2pTransfer, serde_json::json!({"asset_id": "BTC"}), None)
            .await
            .unwrap();
        sessions.transition(&session.session_id, SessionStatus::ChallengeSent).await.unwrap();
        sessions.transition(&session.session_id, SessionStatus::AwaitingSignature).await.unwrap();

        let result = orch.run_ceremony(&session.session_id, Some("sig".to_string())).await.unwrap();
        assert_eq!(result.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_ceremony_fails_session_and_releases_reservation() {
        let (orch, sessions, store) = orchestrator();
        let balances = BalanceManager::new(store.clone());
        balances.mint("alice", "BTC", 5000).await.unwrap();
        balances.reserve("alice", "BTC", 1000).await.unwrap();

        let session = sessions
            .create_session(
                "alice",
                SessionType::P2pTransfer,
                serde_json::json!({"asset_id": "BTC", "amount": 1000}),
                None,
            )
            .await
            .unwrap();

        let cancelled = orch.cancel_ceremony(&session.session_id, "user cancelled").await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Failed);
        assert_eq!(balances.get_balance("alice", "BTC").unwrap().available(), 5000);
    }
}
