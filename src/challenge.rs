//! Challenge Manager (C6), spec §4.3 / §9.
//!
//! Signature scheme decision (SPEC_FULL.md open question): ECDSA over
//! SHA-256 via `secp256k1`, grounded in the teacher's `src/utxo_signing.rs`
//! which signs with exactly this combination.

use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use crate::config::GatewayConfig;
use crate::domain::{SessionStatus, SigningChallenge};
use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionManager;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct ChallengeManager {
    store: LedgerStore,
    config: GatewayConfig,
    sessions: SessionManager,
}

impl ChallengeManager {
    pub fn new(store: LedgerStore, config: GatewayConfig, sessions: SessionManager) -> Self {
        Self { store, config, sessions }
    }

    /// `challenge_bytes = sha256(canonical_json({session_id, issued_at,
    /// nonce, context}))`, per SPEC_FULL.md. `context` carries a
    /// human-readable summary of the intent being authorized so a signer
    /// (or their wallet UI) can render what they're about to sign.
    pub async fn issue_challenge(&self, session_id: &str, context: String) -> GatewayResult<SigningChallenge> {
        let session = self.sessions.get(session_id).await?;
        if session.status != SessionStatus::Initiated && session.status != SessionStatus::ChallengeSent {
            return Err(GatewayError::InvalidTransition {
                from: session.status.as_str().to_string(),
                to: "challenge_sent".to_string(),
            });
        }

        let mut nonce_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);
        let issued_at = Utc::now();

        let canonical = serde_json::json!({
            "session_id": session_id,
            "issued_at": issued_at.to_rfc3339(),
            "nonce": nonce,
            "context": context,
        });
        let canonical_str = serde_json::to_string(&canonical).unwrap_or_default();
        let challenge_bytes = Sha256::digest(canonical_str.as_bytes()).to_vec();
        let challenge_id = hex::encode(&challenge_bytes);

        let challenge = SigningChallenge {
            challenge_id: challenge_id.clone(),
            session_id: session_id.to_string(),
            challenge_bytes,
            context,
            expires_at: issued_at + ChronoDuration::seconds(self.config.challenge_timeout_secs as i64),
            used: false,
            signature: None,
        };
        self.store.put_challenge(&challenge)?;

        let mut session = session;
        session.challenge_id = Some(challenge_id);
        self.sessions.save(&session).await?;
        self.sessions.transition(session_id, SessionStatus::ChallengeSent).await?;

        Ok(challenge)
    }

    /// Loads a challenge, rejecting missing or expired rows before the
    /// caller even attempts verification (spec §4.3 "Challenge validity").
    pub fn get_live_challenge(&self, challenge_id: &str) -> GatewayResult<SigningChallenge> {
        let challenge = self
            .store
            .get_challenge(challenge_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("challenge {challenge_id}")))?;
        if challenge.expires_at <= Utc::now() {
            return Err(GatewayError::ChallengeExpired { challenge_id: challenge_id.to_string() });
        }
        if challenge.used {
            return Err(GatewayError::Validation(format!("challenge {challenge_id} already used")));
        }
        Ok(challenge)
    }

    /// Verifies `signature_hex` over the challenge bytes under
    /// `user_pubkey_hex` (SPEC_FULL.md pubkey-format rule: strict 33/65-byte
    /// compressed/uncompressed secp256k1 hex). On success marks the
    /// challenge used and advances the owning session to
    /// `awaiting_signature`.
    pub async fn validate_response(
        &self,
        challenge_id: &str,
        user_pubkey_hex: &str,
        signature_hex: &str,
    ) -> GatewayResult<()> {
        let mut challenge = self.get_live_challenge(challenge_id)?;

        validate_pubkey_format(user_pubkey_hex)?;

        let secp = Secp256k1::verification_only();
        let pubkey_bytes = hex::decode(user_pubkey_hex)
            .map_err(|e| GatewayError::Validation(format!("bad pubkey hex: {e}")))?;
        let pubkey = PublicKey::from_slice(&pubkey_bytes)
            .map_err(|e| GatewayError::Validation(format!("bad pubkey: {e}")))?;

        let sig_bytes = hex::decode(signature_hex)
            .map_err(|e| GatewayError::Validation(format!("bad signature hex: {e}")))?;
        let signature = Signature::from_compact(&sig_bytes)
            .map_err(|e| GatewayError::Validation(format!("bad signature: {e}")))?;

        let digest = Sha256::digest(&challenge.challenge_bytes);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| GatewayError::Validation(format!("bad digest: {e}")))?;

        secp.verify_ecdsa(&message, &signature, &pubkey)
            .map_err(|_| GatewayError::Validation("signature verification failed".to_string()))?;

        challenge.used = true;
        challenge.signature = Some(signature_hex.to_string());
        self.store.put_challenge(&challenge)?;

        self.sessions
            .transition(&challenge.session_id, SessionStatus::AwaitingSignature)
            .await?;
        Ok(())
    }
}

/// Strict secp256k1 hex pubkey rule: 33-byte compressed (66 hex chars,
/// `02`/`03` prefix) or 65-byte uncompressed (130 hex chars, `04` prefix).
pub fn validate_pubkey_format(pubkey_hex: &str) -> GatewayResult<()> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| GatewayError::Validation("pubkey is not valid hex".to_string()))?;
    match bytes.len() {
        33 if bytes[0] == 0x02 || bytes[0] == 0x03 => Ok(()),
        65 if bytes[0] == 0x04 => Ok(()),
        _ => Err(GatewayError::Validation(
            "pubkey must be 33-byte compressed or 65-byte uncompressed secp256k1".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionType;
    use crate::events::EventBus;
    use std::sync::Arc;

    fn managers() -> (LedgerStore, SessionManager, GatewayConfig) {
        let store = LedgerStore::open_temporary().unwrap();
        let config = GatewayConfig::default();
        let sessions = SessionManager::new(store.clone(), config.clone(), Arc::new(EventBus::new()));
        (store, sessions, config)
    }

    #[tokio::test]
    async fn issue_then_validate_happy_path() {
        let (store, sessions, config) = managers();
        let session = sessions
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({"to": "u2"}), None)
            .await
            .unwrap();

        let challenges = ChallengeManager::new(store.clone(), config, sessions.clone());
        let challenge = challenges
            .issue_challenge(&session.session_id, "transfer 100 sats to u2".to_string())
            .await
            .unwrap();

        let secp = Secp256k1::new();
        let secret = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pubkey = PublicKey::from_secret_key(&secp, &secret);

        let digest = Sha256::digest(&challenge.challenge_bytes);
        let message = Message::from_digest_slice(&digest).unwrap();
        let signature = secp.sign_ecdsa(&message, &secret);

        challenges
            .validate_response(
                &challenge.challenge_id,
                &hex::encode(pubkey.serialize()),
                &hex::encode(signature.serialize_compact()),
            )
            .await
            .unwrap();

        let updated_session = sessions.get(&session.session_id).await.unwrap();
        assert_eq!(updated_session.status, SessionStatus::AwaitingSignature);

        let updated_challenge = store.get_challenge(&challenge.challenge_id).unwrap().unwrap();
        assert!(updated_challenge.used);
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let (store, sessions, config) = managers();
        let session = sessions
            .create_session("u1", SessionType::P2pTransfer, serde_json::json!({}), None)
            .await
            .unwrap();
        let challenges = ChallengeManager::new(store, config, sessions.clone());
        let challenge = challenges
            .issue_challenge(&session.session_id, "ctx".to_string())
            .await
            .unwrap();

        let secp = Secp256k1::new();
        let secret = secp256k1::SecretKey::from_slice(&[9u8; 32]).unwrap();
        let pubkey = PublicKey::from_secret_key(&secp, &secret);
        let other_secret = secp256k1::SecretKey::from_slice(&[3u8; 32]).unwrap();

        let digest = Sha256::digest(&challenge.challenge_bytes);
        let message = Message::from_digest_slice(&digest).unwrap();
        let bad_signature = secp.sign_ecdsa(&message, &other_secret);

        let err = challenges
            .validate_response(
                &challenge.challenge_id,
                &hex::encode(pubkey.serialize()),
                &hex::encode(bad_signature.serialize_compact()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn pubkey_format_rejects_bad_lengths() {
        assert!(validate_pubkey_format(&"02".repeat(33)).is_ok());
        assert!(validate_pubkey_format(&"aa".repeat(20)).is_err());
    }
}
