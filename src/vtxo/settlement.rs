//! Hourly L1 settlement of spent vtxos via a Merkle commitment (spec §4.2
//! "L1 Settlement").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::merkle::merkle_root;
use crate::adapters::ChainAdapter;
use crate::domain::{Amount, Transaction, TxStatus, TxType, VtxoStatus};
use crate::error::GatewayResult;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct SettlementEngine {
    store: LedgerStore,
    chain: Arc<dyn ChainAdapter>,
}

#[derive(Debug, Default)]
pub struct SettlementRunSummary {
    pub groups_settled: u32,
    pub groups_skipped_broadcast_failure: u32,
    pub vtxos_settled: u64,
}

impl SettlementEngine {
    pub fn new(store: LedgerStore, chain: Arc<dyn ChainAdapter>) -> Self {
        Self { store, chain }
    }

    /// One run of the settlement loop: groups all `spent` vtxos by asset,
    /// computes a Merkle root per group, requests a commitment transaction,
    /// persists it as a `settlement_tx`, broadcasts it, and on success moves
    /// the group's vtxos `spent -> settled`. A broadcast failure leaves the
    /// group's vtxos in `spent` for retry next cycle.
    pub async fn run_once(&self) -> GatewayResult<SettlementRunSummary> {
        let mut by_asset: HashMap<String, Vec<crate::domain::Vtxo>> = HashMap::new();
        for vtxo in self.store.list_vtxos()? {
            if vtxo.status == VtxoStatus::Spent {
                by_asset.entry(vtxo.asset_id.clone()).or_default().push(vtxo);
            }
        }

        let mut summary = SettlementRunSummary::default();

        if by_asset.is_empty() {
            tracing::info!("settlement: no spent vtxos this cycle, nothing to commit");
            return Ok(summary);
        }

        for (asset_id, vtxos) in by_asset {
            let vtxo_ids: Vec<String> = vtxos.iter().map(|v| v.vtxo_id.clone()).collect();
            let Some(root) = merkle_root(&vtxo_ids) else {
                continue;
            };
            let total_amount: Amount = vtxos.iter().map(|v| v.amount).sum();
            let fee = 2000u128 + (vtxo_ids.len() as u128) * 100;

            let commitment = self
                .chain
                .create_commitment_transaction(&asset_id, &vtxo_ids, &root, total_amount, fee)
                .await?;

            let now = Utc::now();
            let mut tx = Transaction {
                txid: commitment.txid.clone(),
                session_id: None,
                tx_type: TxType::SettlementTx,
                raw: Some(commitment.raw_tx.clone()),
                status: TxStatus::Pending,
                amount: total_amount,
                fee,
                created_at: now,
                confirmed_at: None,
                block_height: None,
                error: None,
            };
            self.store.put_transaction(&tx)?;

            let broadcast = self
                .chain
                .broadcast_transaction(&hex::encode(&commitment.raw_tx))
                .await?;

            if broadcast.success {
                tx.status = TxStatus::Broadcast;
                self.store.put_transaction(&tx)?;

                for mut vtxo in vtxos {
                    vtxo.status = VtxoStatus::Settled;
                    self.store.put_vtxo(&vtxo)?;
                    summary.vtxos_settled += 1;
                }
                summary.groups_settled += 1;
            } else {
                tx.status = TxStatus::Failed;
                tx.error = broadcast.error.clone();
                self.store.put_transaction(&tx)?;
                summary.groups_skipped_broadcast_failure += 1;
                tracing::warn!(asset_id = %asset_id, error = ?broadcast.error, "settlement broadcast failed, vtxos remain spent for retry");
            }
        }

        Ok(summary)
    }

    /// Confirmation watcher: advances `broadcast -> confirmed` as the chain
    /// reports sufficient depth. Idempotent — a transaction already
    /// `confirmed` is left untouched (spec §8 "Idempotence").
    pub async fn confirm_pending_settlements(&self, min_depth: u32) -> GatewayResult<u32> {
        let mut confirmed = 0;
        let pending: Vec<Transaction> = self
            .store
            .list_transactions()?
            .into_iter()
            .filter(|tx| tx.tx_type == TxType::SettlementTx && tx.status == TxStatus::Broadcast)
            .collect();

        for mut tx in pending {
            let status = self.chain.get_transaction_status(&tx.txid).await?;
            if status.confirmed && status.confirmations >= min_depth {
                tx.status = TxStatus::Confirmed;
                tx.confirmed_at = Some(Utc::now());
                tx.block_height = status.block_height;
                self.store.put_transaction(&tx)?;
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChainAdapter;
    use crate::domain::{Asset, Vtxo};
    use std::collections::HashMap;

    fn seeded_store_with_spent_vtxos(count: usize, asset_id: &str) -> LedgerStore {
        let store = LedgerStore::open_temporary().unwrap();
        store
            .put_asset(&Asset {
                asset_id: asset_id.to_string(),
                display_name: asset_id.to_string(),
                ticker: asset_id.to_string(),
                decimals: 8,
                total_supply: 0,
                active: true,
                metadata: HashMap::new(),
                rgb_contract_id: None,
            })
            .unwrap();

        let now = Utc::now();
        for i in 0..count {
            let vtxo = Vtxo {
                vtxo_id: format!("v{i}"),
                txid: format!("tx{i}"),
                vout: 0,
                amount: 1000,
                script_pubkey: "00".to_string(),
                asset_id: asset_id.to_string(),
                user_pubkey: "user1".to_string(),
                status: VtxoStatus::Spent,
                created_at: now,
                expires_at: now,
                spending_txid: Some(format!("spend{i}")),
                rgb_allocation_id: None,
            };
            store.put_vtxo(&vtxo).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn settles_spent_vtxos_and_advances_them_on_successful_broadcast() {
        let store = seeded_store_with_spent_vtxos(3, "BTC");
        let chain = Arc::new(MockChainAdapter::new());
        let engine = SettlementEngine::new(store.clone(), chain);

        let summary = engine.run_once().await.unwrap();
        assert_eq!(summary.groups_settled, 1);
        assert_eq!(summary.vtxos_settled, 3);

        for i in 0..3 {
            let vtxo = store.get_vtxo(&format!("v{i}")).unwrap().unwrap();
            assert_eq!(vtxo.status, VtxoStatus::Settled);
        }
    }

    #[tokio::test]
    async fn empty_vtxo_set_produces_no_commitment() {
        let store = LedgerStore::open_temporary().unwrap();
        let chain = Arc::new(MockChainAdapter::new());
        let engine = SettlementEngine::new(store, chain);

        let summary = engine.run_once().await.unwrap();
        assert_eq!(summary.groups_settled, 0);
    }

    #[tokio::test]
    async fn failed_broadcast_leaves_vtxos_spent_for_retry() {
        let store = seeded_store_with_spent_vtxos(2, "BTC");
        let chain = Arc::new(MockChainAdapter::new());
        chain.set_fail_broadcast(true);
        let engine = SettlementEngine::new(store.clone(), chain);

        let summary = engine.run_once().await.unwrap();
        assert_eq!(summary.groups_settled, 0);
        assert_eq!(summary.groups_skipped_broadcast_failure, 1);

        let vtxo = store.get_vtxo("v0").unwrap().unwrap();
        assert_eq!(vtxo.status, VtxoStatus::Spent);
    }
}
