//! VTXO Lifecycle Manager (C4), spec §4.2.

pub mod merkle;
pub mod settlement;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::adapters::{ChainAdapter, VtxoMintRequest};
use crate::config::GatewayConfig;
use crate::domain::{Amount, RgbAllocation, Vtxo, VtxoStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::jobs::{JobDescriptor, JobQueue};
use crate::retry::with_retry;
use crate::store::LedgerStore;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssetInventory {
    pub asset_id: String,
    pub available: u64,
    pub assigned: u64,
    pub total: u64,
    pub utilization: f64,
}

#[derive(Clone)]
pub struct VtxoManager {
    store: LedgerStore,
    chain: Arc<dyn ChainAdapter>,
    jobs: Arc<dyn JobQueue>,
    config: GatewayConfig,
}

impl VtxoManager {
    pub fn new(store: LedgerStore, chain: Arc<dyn ChainAdapter>, jobs: Arc<dyn JobQueue>, config: GatewayConfig) -> Self {
        Self {
            store,
            chain,
            jobs,
            config,
        }
    }

    pub fn inventory_for_asset(&self, asset_id: &str) -> GatewayResult<AssetInventory> {
        let vtxos = self.store.list_vtxos_for_asset(asset_id)?;
        let available = vtxos.iter().filter(|v| v.status == VtxoStatus::Available).count() as u64;
        let assigned = vtxos.iter().filter(|v| v.status == VtxoStatus::Assigned).count() as u64;
        let total = vtxos.len() as u64;
        let utilization = if total > 0 { assigned as f64 / total as f64 } else { 0.0 };
        Ok(AssetInventory {
            asset_id: asset_id.to_string(),
            available,
            assigned,
            total,
            utilization,
        })
    }

    /// Decides whether replenishment is needed and, if so, the amount to
    /// request (spec §4.2 "Inventory monitor").
    pub fn replenishment_amount(&self, inventory: &AssetInventory) -> Option<u32> {
        let min = self.config.min_vtxos_per_asset as u64;
        let max = self.config.max_vtxos_per_asset as u64;
        let needs_replenishment = inventory.available < min
            || inventory.utilization > self.config.replenishment_threshold
            || inventory.total < min;

        if !needs_replenishment {
            return None;
        }

        let amount = if inventory.total > 0 {
            let deficit = min.saturating_sub(inventory.available);
            let grown = deficit as f64 + 0.2 * inventory.total as f64;
            (grown.max(0.0) as u64).min(max)
        } else {
            min
        };
        Some(amount.max(1) as u32)
    }

    /// One tick of the inventory monitor (spec default interval 5 minutes).
    /// Does not create vtxos itself; enqueues a replenishment job per asset
    /// that needs it.
    pub async fn run_inventory_tick(&self) -> GatewayResult<()> {
        for asset in self.store.list_assets()? {
            if !asset.active {
                continue;
            }
            let inventory = self.inventory_for_asset(&asset.asset_id)?;
            if let Some(amount) = self.replenishment_amount(&inventory) {
                tracing::info!(asset_id = %asset.asset_id, count = amount, "enqueuing vtxo replenishment job");
                self.jobs.enqueue(JobDescriptor {
                    function_name: "vtxo.create_vtxo_batch".to_string(),
                    args: serde_json::json!({
                        "asset_id": asset.asset_id,
                        "count": amount,
                        "amount": self.config.vtxo_default_amount.to_string(),
                    }),
                    timeout_secs: 60,
                    result_ttl_secs: 3600,
                });
            }
        }
        Ok(())
    }

    /// Requests `count` freshly minted outputs from the chain adapter
    /// (retrying the call up to three times with a 50ms linear backoff,
    /// spec §7) and persists them as `available`.
    pub async fn create_vtxo_batch(&self, asset_id: &str, count: u32, amount: Amount) -> GatewayResult<Vec<Vtxo>> {
        let fee = 1000u128 + (count as u128) * 500;
        let req = VtxoMintRequest {
            asset_id: asset_id.to_string(),
            count,
            amount,
            fee,
        };
        let minted = with_retry("create_vtxo_batch", || async {
            self.chain.create_vtxo_batch(req.clone()).await.map_err(GatewayError::from)
        })
        .await?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.config.vtxo_expiry_secs as i64);
        let mut out = Vec::with_capacity(minted.len());
        for m in minted {
            let vtxo = Vtxo {
                vtxo_id: m.vtxo_id,
                txid: m.txid,
                vout: m.vout,
                amount,
                script_pubkey: m.script_pubkey_hex,
                asset_id: asset_id.to_string(),
                user_pubkey: String::new(),
                status: VtxoStatus::Available,
                created_at: now,
                expires_at,
                spending_txid: None,
                rgb_allocation_id: None,
            };
            self.store.put_vtxo(&vtxo)?;
            out.push(vtxo);
        }
        Ok(out)
    }

    /// Best-fit assignment: the smallest available vtxo with
    /// `amount >= amount_needed` and non-expired.
    pub fn assign_vtxo_to_user(&self, user_pubkey: &str, asset_id: &str, amount_needed: Amount) -> GatewayResult<Vtxo> {
        let now = Utc::now();
        self.store
            .assign_smallest_fitting(asset_id, user_pubkey, amount_needed, now)?
            .ok_or(GatewayError::NoAvailableVtxo {
                asset_id: asset_id.to_string(),
                amount: amount_needed,
            })
    }

    /// `assigned -> spent`, idempotent for identical `spending_txid`.
    pub fn mark_vtxo_spent(&self, vtxo_id: &str, spending_txid: &str) -> GatewayResult<Vtxo> {
        let mut vtxo = self
            .store
            .get_vtxo(vtxo_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("vtxo {vtxo_id}")))?;

        match (&vtxo.status, &vtxo.spending_txid) {
            (VtxoStatus::Spent, Some(existing)) if existing == spending_txid => return Ok(vtxo),
            (VtxoStatus::Spent, _) => {
                return Err(GatewayError::Validation(format!(
                    "vtxo {vtxo_id} already spent by a different transaction"
                )))
            }
            (VtxoStatus::Assigned, _) => {}
            (other, _) => {
                return Err(GatewayError::InvalidTransition {
                    from: other.as_str().to_string(),
                    to: VtxoStatus::Spent.as_str().to_string(),
                })
            }
        }

        vtxo.status = VtxoStatus::Spent;
        vtxo.spending_txid = Some(spending_txid.to_string());
        self.store.put_vtxo(&vtxo)?;
        Ok(vtxo)
    }

    /// Expiry sweep: `available` rows past `expires_at` flip to `expired`.
    /// `assigned` rows are never expired by this sweep — a pending ceremony
    /// keeps them alive (spec §4.2 "Spend and expiry").
    pub fn sweep_expired(&self) -> GatewayResult<u64> {
        let now = Utc::now();
        let mut count = 0u64;
        for mut vtxo in self.store.list_vtxos()? {
            if vtxo.status == VtxoStatus::Available && vtxo.expires_at <= now {
                vtxo.status = VtxoStatus::Expired;
                self.store.put_vtxo(&vtxo)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Splits an assigned vtxo into `amounts.len()` children plus an
    /// optional change output (suppressed when below dust). The parent
    /// transitions `assigned -> spent`. RGB-extended path: if the parent
    /// carries an allocation, the caller must supply `child_allocations`
    /// (one per requested child, created alongside).
    pub fn split(
        &self,
        vtxo_id: &str,
        amounts: &[Amount],
        child_allocations: Option<&[RgbAllocation]>,
    ) -> GatewayResult<Vec<Vtxo>> {
        let parent = self
            .store
            .get_vtxo(vtxo_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("vtxo {vtxo_id}")))?;

        if parent.status != VtxoStatus::Assigned {
            return Err(GatewayError::InvalidTransition {
                from: parent.status.as_str().to_string(),
                to: VtxoStatus::Spent.as_str().to_string(),
            });
        }

        let requested: Amount = amounts.iter().sum();
        if requested > parent.amount {
            return Err(GatewayError::Validation(format!(
                "split total {requested} exceeds parent amount {}",
                parent.amount
            )));
        }

        if parent.rgb_allocation_id.is_some() {
            let allocations = child_allocations.ok_or_else(|| {
                GatewayError::Validation("parent vtxo carries an RGB allocation; child allocations required".to_string())
            })?;
            if allocations.len() != amounts.len() {
                return Err(GatewayError::Validation(
                    "child_allocations length must match amounts length".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let mut children = Vec::with_capacity(amounts.len() + 1);
        for (i, amount) in amounts.iter().enumerate() {
            let allocation_id = child_allocations.map(|allocs| allocs[i].allocation_id.clone());
            if let Some(allocs) = child_allocations {
                self.store.put_rgb_allocation(&allocs[i])?;
            }
            let child = Vtxo {
                vtxo_id: uuid::Uuid::new_v4().to_string(),
                txid: parent.txid.clone(),
                vout: parent.vout,
                amount: *amount,
                script_pubkey: parent.script_pubkey.clone(),
                asset_id: parent.asset_id.clone(),
                user_pubkey: parent.user_pubkey.clone(),
                status: VtxoStatus::Available,
                created_at: now,
                expires_at: parent.expires_at,
                spending_txid: None,
                rgb_allocation_id: allocation_id,
            };
            self.store.put_vtxo(&child)?;
            children.push(child);
        }

        let remainder = parent.amount - requested;
        if remainder > 0 && remainder >= self.config.dust_limit {
            let change = Vtxo {
                vtxo_id: uuid::Uuid::new_v4().to_string(),
                txid: parent.txid.clone(),
                vout: parent.vout,
                amount: remainder,
                script_pubkey: parent.script_pubkey.clone(),
                asset_id: parent.asset_id.clone(),
                user_pubkey: parent.user_pubkey.clone(),
                status: VtxoStatus::Available,
                created_at: now,
                expires_at: parent.expires_at,
                spending_txid: None,
                rgb_allocation_id: None,
            };
            self.store.put_vtxo(&change)?;
            children.push(change);
        }

        let mut spent_parent = parent;
        spent_parent.status = VtxoStatus::Spent;
        self.store.put_vtxo(&spent_parent)?;

        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChainAdapter;
    use crate::domain::Asset;
    use crate::jobs::InProcessJobQueue;
    use std::collections::HashMap;

    fn manager() -> VtxoManager {
        let store = LedgerStore::open_temporary().unwrap();
        let chain = Arc::new(MockChainAdapter::new());
        let (jobs, _rx) = InProcessJobQueue::new();
        VtxoManager::new(store, chain, Arc::new(jobs), GatewayConfig::default())
    }

    fn seed_asset(mgr: &VtxoManager, asset_id: &str) {
        mgr.store
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
    }

    #[tokio::test]
    async fn assignment_picks_smallest_fitting_vtxo() {
        let mgr = manager();
        seed_asset(&mgr, "BTC");
        for amount in [500u128, 1500, 5000] {
            mgr.create_vtxo_batch("BTC", 1, amount).await.unwrap();
        }

        let assigned = mgr.assign_vtxo_to_user("user1", "BTC", 1000).unwrap();
        assert_eq!(assigned.amount, 1500);

        let remaining: Vec<u128> = mgr
            .store
            .list_vtxos_for_asset("BTC")
            .unwrap()
            .into_iter()
            .filter(|v| v.status == VtxoStatus::Available)
            .map(|v| v.amount)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&500));
        assert!(remaining.contains(&5000));
    }

    #[tokio::test]
    async fn assignment_fails_when_nothing_fits() {
        let mgr = manager();
        seed_asset(&mgr, "BTC");
        mgr.create_vtxo_batch("BTC", 1, 500).await.unwrap();

        let err = mgr.assign_vtxo_to_user("user1", "BTC", 1000).unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableVtxo { .. }));
    }

    #[tokio::test]
    async fn mark_spent_is_idempotent_for_same_txid() {
        let mgr = manager();
        seed_asset(&mgr, "BTC");
        mgr.create_vtxo_batch("BTC", 1, 500).await.unwrap();
        let assigned = mgr.assign_vtxo_to_user("user1", "BTC", 500).unwrap();

        mgr.mark_vtxo_spent(&assigned.vtxo_id, "tx1").unwrap();
        let again = mgr.mark_vtxo_spent(&assigned.vtxo_id, "tx1").unwrap();
        assert_eq!(again.status, VtxoStatus::Spent);

        let err = mgr.mark_vtxo_spent(&assigned.vtxo_id, "tx2").unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn expiry_sweep_leaves_assigned_rows_alone() {
        let mgr = manager();
        seed_asset(&mgr, "BTC");
        let mut vtxos = mgr.create_vtxo_batch("BTC", 2, 500).await.unwrap();

        // Force the first vtxo to be already expired, then assign the second.
        vtxos[0].expires_at = Utc::now() - ChronoDuration::seconds(1);
        mgr.store.put_vtxo(&vtxos[0]).unwrap();
        let assigned = mgr.assign_vtxo_to_user("user1", "BTC", 500).unwrap();
        let mut assigned_row = mgr.store.get_vtxo(&assigned.vtxo_id).unwrap().unwrap();
        assigned_row.expires_at = Utc::now() - ChronoDuration::seconds(1);
        mgr.store.put_vtxo(&assigned_row).unwrap();

        let swept = mgr.sweep_expired().unwrap();
        assert_eq!(swept, 1);

        let still_assigned = mgr.store.get_vtxo(&assigned.vtxo_id).unwrap().unwrap();
        assert_eq!(still_assigned.status, VtxoStatus::Assigned);
    }

    #[tokio::test]
    async fn replenishment_triggers_below_minimum() {
        let mgr = manager();
        let inventory = AssetInventory {
            asset_id: "BTC".to_string(),
            available: 2,
            assigned: 0,
            total: 2,
            utilization: 0.0,
        };
        assert!(mgr.replenishment_amount(&inventory).is_some());
    }
}
