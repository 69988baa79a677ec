//! Transaction Processor (C7), spec §4.4.
//!
//! Ties the Balance Manager, VTXO Manager and Session Manager together for
//! the P2P-transfer flow: reserve on intent, sign via the ceremony, confirm
//! moves the reserved funds for real.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::adapters::ChainAdapter;
use crate::balance::BalanceManager;
use crate::config::GatewayConfig;
use crate::domain::{Amount, Transaction, TxStatus, TxType};
use crate::error::{GatewayError, GatewayResult};
use crate::retry::with_retry;
use crate::store::LedgerStore;

const MIN_FEE: Amount = 100;
/// Surcharge added to `min_fee` for transfers of any asset other than the
/// configured base asset (spec §4.4).
const NON_BASE_ASSET_SURCHARGE: Amount = 50;

#[derive(Clone)]
pub struct TransactionProcessor {
    store: LedgerStore,
    balances: BalanceManager,
    chain: std::sync::Arc<dyn ChainAdapter>,
    config: GatewayConfig,
}

impl TransactionProcessor {
    pub fn new(
        store: LedgerStore,
        balances: BalanceManager,
        chain: std::sync::Arc<dyn ChainAdapter>,
        config: GatewayConfig,
    ) -> Self {
        Self { store, balances, chain, config }
    }

    /// `fee = max(MIN_FEE, size_bytes * fee_rate)`. Falls back to
    /// `MIN_FEE` if the chain adapter can't be reached (spec §4.4 "Fee
    /// estimation must degrade gracefully").
    pub async fn calculate_transaction_fee(&self, size_bytes: u64) -> Amount {
        match self.chain.get_fee_rate().await {
            Ok(rate) => std::cmp::max(MIN_FEE, size_bytes as u128 * rate as u128),
            Err(e) => {
                tracing::warn!(error = %e, "fee-rate lookup failed, falling back to minimum fee");
                MIN_FEE
            }
        }
    }

    /// `fee = BASE_MIN_FEE + 50` for any transfer whose asset isn't the
    /// configured base asset, else `BASE_MIN_FEE` (spec §4.4).
    fn p2p_transfer_fee(&self, asset_id: &str) -> Amount {
        if asset_id == self.config.base_asset_id {
            self.config.min_fee
        } else {
            self.config.min_fee + NON_BASE_ASSET_SURCHARGE
        }
    }

    /// `validate_transaction(raw, expected_amount, recipient_pubkey)` (spec
    /// §4.4): parses outputs, true iff some output pays `>= expected_amount`
    /// to a script matching the recipient. Real output-script verification
    /// rules are an unresolved Open Question in spec §9 ("validate_transaction's
    /// script matching is a stub that always returns true"); this keeps the
    /// documented three-argument shape and that stub behavior, gated only on
    /// the raw bytes being present.
    pub fn validate_transaction(&self, raw: &[u8], expected_amount: Amount, recipient_pubkey: &str) -> bool {
        let _ = (expected_amount, recipient_pubkey);
        !raw.is_empty()
    }

    /// Reserves `amount` against the sender's balance for a P2P transfer and
    /// records a `pending` `p2p_transfer` transaction row keyed by a
    /// deterministic id derived from the session. Recipient's balance is
    /// only touched at `confirm`.
    pub async fn process_p2p_transfer(
        &self,
        session_id: &str,
        sender: &str,
        recipient: &str,
        asset_id: &str,
        amount: Amount,
    ) -> GatewayResult<Transaction> {
        if amount == 0 {
            return Err(GatewayError::Validation("transaction amount must be non-zero".to_string()));
        }

        self.balances.reserve(sender, asset_id, amount).await?;

        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(sender.as_bytes());
        hasher.update(recipient.as_bytes());
        let txid = hex::encode(hasher.finalize());

        let tx = Transaction {
            txid,
            session_id: Some(session_id.to_string()),
            tx_type: TxType::P2pTransfer,
            raw: None,
            status: TxStatus::Pending,
            amount,
            fee: self.p2p_transfer_fee(asset_id),
            created_at: Utc::now(),
            confirmed_at: None,
            block_height: None,
            error: None,
        };
        self.store.put_transaction(&tx)?;
        Ok(tx)
    }

    /// Broadcasts the raw transaction, retrying the adapter call up to
    /// three times with a 50ms linear backoff (spec §7) before giving up.
    pub async fn broadcast(&self, txid: &str, raw_hex: &str) -> GatewayResult<()> {
        let mut tx = self
            .store
            .get_transaction(txid)?
            .ok_or_else(|| GatewayError::NotFound(format!("transaction {txid}")))?;

        let result = with_retry("broadcast_transaction", || async {
            self.chain.broadcast_transaction(raw_hex).await.map_err(GatewayError::from)
        })
        .await?;
        if result.success {
            tx.status = TxStatus::Broadcast;
        } else {
            tx.status = TxStatus::Failed;
            tx.error = result.error;
        }
        self.store.put_transaction(&tx)?;
        Ok(())
    }

    /// Confirmation: polls the chain adapter for transaction depth
    /// (retrying the call up to three times with a 50ms linear backoff, per
    /// spec §7), and once `min_depth` is reached moves the transaction
    /// `-> confirmed` and, for a `p2p_transfer`, finalizes the reserved
    /// balance movement. Re-confirming an already-`confirmed` transaction
    /// is a no-op (spec §4.4 "confirm must be idempotent").
    pub async fn confirm(
        &self,
        txid: &str,
        sender: &str,
        recipient: &str,
        asset_id: &str,
        min_depth: u64,
    ) -> GatewayResult<Transaction> {
        let mut tx = self
            .store
            .get_transaction(txid)?
            .ok_or_else(|| GatewayError::NotFound(format!("transaction {txid}")))?;

        if tx.status == TxStatus::Confirmed {
            return Ok(tx);
        }

        let status = with_retry("get_transaction_status", || async {
            self.chain.get_transaction_status(txid).await.map_err(GatewayError::from)
        })
        .await?;

        if !status.confirmed || u64::from(status.confirmations) < min_depth.max(1) {
            return Err(GatewayError::Validation(format!(
                "transaction {txid} not yet confirmed to depth {min_depth}"
            )));
        }

        self.balances
            .finalize_transfer(sender, recipient, asset_id, tx.amount)
            .await?;

        tx.status = TxStatus::Confirmed;
        tx.confirmed_at = Some(Utc::now());
        tx.block_height = status.block_height;
        self.store.put_transaction(&tx)?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChainAdapter;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn processor() -> (TransactionProcessor, LedgerStore) {
        let store = LedgerStore::open_temporary().unwrap();
        let balances = BalanceManager::new(store.clone());
        let chain = Arc::new(MockChainAdapter::new());
        (
            TransactionProcessor::new(store.clone(), balances, chain, crate::config::GatewayConfig::default()),
            store,
        )
    }

    fn seed_asset(store: &LedgerStore) {
        store
            .put_asset(&crate::domain::Asset {
                asset_id: "BTC".to_string(),
                display_name: "Bitcoin".to_string(),
                ticker: "BTC".to_string(),
                decimals: 8,
                total_supply: 0,
                active: true,
                metadata: HashMap::new(),
                rgb_contract_id: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn p2p_transfer_happy_path_reserves_then_confirms() {
        let (proc, store) = processor();
        seed_asset(&store);
        proc.balances.mint("sender", "BTC", 5000).await.unwrap();

        let tx = proc
            .process_p2p_transfer("sess1", "sender", "recipient", "BTC", 1000)
            .await
            .unwrap();
        assert_eq!(tx.status, TxStatus::Pending);

        let sender_balance = proc.balances.get_balance("sender", "BTC").unwrap();
        assert_eq!(sender_balance.available(), 4000);
        assert_eq!(sender_balance.balance, 5000);

        let confirmed = proc
            .confirm(&tx.txid, "sender", "recipient", "BTC", 1)
            .await
            .unwrap();
        assert_eq!(confirmed.status, TxStatus::Confirmed);

        assert_eq!(proc.balances.get_balance("sender", "BTC").unwrap().balance, 4000);
        assert_eq!(proc.balances.get_balance("recipient", "BTC").unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn p2p_transfer_rejects_insufficient_funds() {
        let (proc, store) = processor();
        seed_asset(&store);
        proc.balances.mint("sender", "BTC", 500).await.unwrap();

        let err = proc
            .process_p2p_transfer("sess1", "sender", "recipient", "BTC", 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let (proc, store) = processor();
        seed_asset(&store);
        proc.balances.mint("sender", "BTC", 5000).await.unwrap();
        let tx = proc
            .process_p2p_transfer("sess1", "sender", "recipient", "BTC", 1000)
            .await
            .unwrap();

        proc.confirm(&tx.txid, "sender", "recipient", "BTC", 1).await.unwrap();
        proc.confirm(&tx.txid, "sender", "recipient", "BTC", 1).await.unwrap();

        assert_eq!(proc.balances.get_balance("recipient", "BTC").unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn non_base_asset_transfer_carries_the_surcharge() {
        let (proc, store) = processor();
        seed_asset(&store);
        store
            .put_asset(&crate::domain::Asset {
                asset_id: "USDT".to_string(),
                display_name: "Tether".to_string(),
                ticker: "USDT".to_string(),
                decimals: 6,
                total_supply: 0,
                active: true,
                metadata: HashMap::new(),
                rgb_contract_id: None,
            })
            .unwrap();
        proc.balances.mint("sender", "BTC", 5000).await.unwrap();
        proc.balances.mint("sender", "USDT", 5000).await.unwrap();

        let base_tx = proc
            .process_p2p_transfer("sess1", "sender", "recipient", "BTC", 1000)
            .await
            .unwrap();
        assert_eq!(base_tx.fee, 100);

        let other_tx = proc
            .process_p2p_transfer("sess2", "sender", "recipient", "USDT", 1000)
            .await
            .unwrap();
        assert_eq!(other_tx.fee, 150);
    }

    #[test]
    fn validate_transaction_matches_documented_shape() {
        let store = LedgerStore::open_temporary().unwrap();
        let balances = BalanceManager::new(store.clone());
        let chain = Arc::new(MockChainAdapter::new());
        let proc = TransactionProcessor::new(store, balances, chain, crate::config::GatewayConfig::default());

        assert!(proc.validate_transaction(b"some raw tx", 1000, "recipient"));
        assert!(!proc.validate_transaction(b"", 1000, "recipient"));
    }
}
