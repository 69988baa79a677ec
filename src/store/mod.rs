//! Ledger Store (C1): durable record of every entity in spec §3.
//!
//! Grounded in the teacher's `src/vault/store.rs` (sled-backed store, one
//! tree per concern, `bincode`/fixed-format keys instead of a real SQL
//! schema) and `src/app_state.rs` (holding `Arc<sled::Db>` as the single
//! database handle shared across the process).
//!
//! sled has no secondary indices, so the two documented indices
//! (`(asset_id, status, expires_at)` on vtxos, `expires_at` on sessions) are
//! implemented as full-tree scans filtered in memory — acceptable at the
//! inventory scale this gateway manages (tens to low hundreds of rows per
//! asset); a production deployment backed by a real relational store would
//! push these filters down to SQL `WHERE` clauses instead.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};

use crate::domain::*;
use crate::error::{GatewayError, GatewayResult};

const TREE_ASSETS: &str = "assets";
const TREE_BALANCES: &str = "asset_balances";
const TREE_VTXOS: &str = "vtxos";
const TREE_SESSIONS: &str = "signing_sessions";
const TREE_CHALLENGES: &str = "signing_challenges";
const TREE_TRANSACTIONS: &str = "transactions";
const TREE_INVOICES: &str = "lightning_invoices";
const TREE_RGB_CONTRACTS: &str = "rgb_contracts";
const TREE_RGB_ALLOCATIONS: &str = "rgb_allocations";

#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<Db>,
}

fn put<T: Serialize>(tree: &Tree, key: &str, value: &T) -> GatewayResult<()> {
    let bytes = bincode::serialize(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &str) -> GatewayResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_all<T: DeserializeOwned>(tree: &Tree) -> GatewayResult<Vec<T>> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, bytes) = item?;
        out.push(bincode::deserialize(&bytes)?);
    }
    Ok(out)
}

fn balance_key(user_pubkey: &str, asset_id: &str) -> String {
    format!("{user_pubkey}\0{asset_id}")
}

impl LedgerStore {
    pub fn open(path: &str) -> GatewayResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn open_temporary() -> GatewayResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn tree(&self, name: &str) -> GatewayResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    // -- assets --------------------------------------------------------

    pub fn put_asset(&self, asset: &Asset) -> GatewayResult<()> {
        put(&self.tree(TREE_ASSETS)?, &asset.asset_id, asset)
    }

    pub fn get_asset(&self, asset_id: &str) -> GatewayResult<Option<Asset>> {
        get(&self.tree(TREE_ASSETS)?, asset_id)
    }

    pub fn list_assets(&self) -> GatewayResult<Vec<Asset>> {
        scan_all(&self.tree(TREE_ASSETS)?)
    }

    // -- asset balances --------------------------------------------------

    pub fn get_balance(&self, user_pubkey: &str, asset_id: &str) -> GatewayResult<Option<AssetBalance>> {
        get(&self.tree(TREE_BALANCES)?, &balance_key(user_pubkey, asset_id))
    }

    pub fn put_balance(&self, balance: &AssetBalance) -> GatewayResult<()> {
        put(
            &self.tree(TREE_BALANCES)?,
            &balance_key(&balance.user_pubkey, &balance.asset_id),
            balance,
        )
    }

    pub fn list_balances_for_user(&self, user_pubkey: &str) -> GatewayResult<Vec<AssetBalance>> {
        let prefix = format!("{user_pubkey}\0");
        let tree = self.tree(TREE_BALANCES)?;
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    // -- vtxos -------------------------------------------------------------

    pub fn put_vtxo(&self, vtxo: &Vtxo) -> GatewayResult<()> {
        put(&self.tree(TREE_VTXOS)?, &vtxo.vtxo_id, vtxo)
    }

    pub fn get_vtxo(&self, vtxo_id: &str) -> GatewayResult<Option<Vtxo>> {
        get(&self.tree(TREE_VTXOS)?, vtxo_id)
    }

    pub fn list_vtxos(&self) -> GatewayResult<Vec<Vtxo>> {
        scan_all(&self.tree(TREE_VTXOS)?)
    }

    pub fn list_vtxos_for_asset(&self, asset_id: &str) -> GatewayResult<Vec<Vtxo>> {
        Ok(self
            .list_vtxos()?
            .into_iter()
            .filter(|v| v.asset_id == asset_id)
            .collect())
    }

    /// Atomic select-and-update: selects the smallest available vtxo with
    /// `amount >= amount_needed` and non-expired, stamps it `assigned`, and
    /// persists the change inside a sled transaction keyed on that single
    /// row so two concurrent callers never receive the same vtxo (spec §5
    /// "VTXO assignment").
    pub fn assign_smallest_fitting(
        &self,
        asset_id: &str,
        user_pubkey: &str,
        amount_needed: Amount,
        now: chrono::DateTime<chrono::Utc>,
    ) -> GatewayResult<Option<Vtxo>> {
        let tree = self.tree(TREE_VTXOS)?;
        let mut candidates: Vec<Vtxo> = self
            .list_vtxos_for_asset(asset_id)?
            .into_iter()
            .filter(|v| v.status == VtxoStatus::Available && v.amount >= amount_needed && v.expires_at > now)
            .collect();
        candidates.sort_by_key(|v| v.amount);

        for candidate in candidates {
            let key = candidate.vtxo_id.clone();
            let result = tree.transaction(|tx_tree| {
                let current = tx_tree.get(key.as_bytes())?;
                let current: Vtxo = match current {
                    Some(bytes) => bincode::deserialize(&bytes).map_err(|e| {
                        sled::transaction::ConflictableTransactionError::Abort(e.to_string())
                    })?,
                    None => {
                        return Err(sled::transaction::ConflictableTransactionError::Abort(
                            "vtxo vanished".to_string(),
                        ))
                    }
                };
                if current.status != VtxoStatus::Available {
                    return Err(sled::transaction::ConflictableTransactionError::Abort(
                        "already assigned".to_string(),
                    ));
                }
                let mut updated = current;
                updated.status = VtxoStatus::Assigned;
                updated.user_pubkey = user_pubkey.to_string();
                let bytes = bincode::serialize(&updated).map_err(|e| {
                    sled::transaction::ConflictableTransactionError::Abort(e.to_string())
                })?;
                tx_tree.insert(key.as_bytes(), bytes)?;
                Ok(updated)
            });

            match result {
                Ok(updated) => return Ok(Some(updated)),
                Err(_) => continue, // lost the race (or row vanished); try the next candidate
            }
        }
        Ok(None)
    }

    // -- signing sessions ----------------------------------------------

    pub fn put_session(&self, session: &SigningSession) -> GatewayResult<()> {
        put(&self.tree(TREE_SESSIONS)?, &session.session_id, session)
    }

    pub fn get_session(&self, session_id: &str) -> GatewayResult<Option<SigningSession>> {
        get(&self.tree(TREE_SESSIONS)?, session_id)
    }

    pub fn list_sessions(&self) -> GatewayResult<Vec<SigningSession>> {
        scan_all(&self.tree(TREE_SESSIONS)?)
    }

    // -- signing challenges ----------------------------------------------

    pub fn put_challenge(&self, challenge: &SigningChallenge) -> GatewayResult<()> {
        put(&self.tree(TREE_CHALLENGES)?, &challenge.challenge_id, challenge)
    }

    pub fn get_challenge(&self, challenge_id: &str) -> GatewayResult<Option<SigningChallenge>> {
        get(&self.tree(TREE_CHALLENGES)?, challenge_id)
    }

    // -- transactions --------------------------------------------------

    pub fn put_transaction(&self, tx: &Transaction) -> GatewayResult<()> {
        put(&self.tree(TREE_TRANSACTIONS)?, &tx.txid, tx)
    }

    pub fn get_transaction(&self, txid: &str) -> GatewayResult<Option<Transaction>> {
        get(&self.tree(TREE_TRANSACTIONS)?, txid)
    }

    pub fn list_transactions(&self) -> GatewayResult<Vec<Transaction>> {
        scan_all(&self.tree(TREE_TRANSACTIONS)?)
    }

    // -- lightning invoices ----------------------------------------------

    pub fn put_invoice(&self, invoice: &LightningInvoice) -> GatewayResult<()> {
        put(&self.tree(TREE_INVOICES)?, &invoice.payment_hash, invoice)
    }

    pub fn get_invoice(&self, payment_hash: &str) -> GatewayResult<Option<LightningInvoice>> {
        get(&self.tree(TREE_INVOICES)?, payment_hash)
    }

    pub fn list_invoices(&self) -> GatewayResult<Vec<LightningInvoice>> {
        scan_all(&self.tree(TREE_INVOICES)?)
    }

    // -- RGB extension ---------------------------------------------------

    pub fn put_rgb_contract(&self, contract: &RgbContract) -> GatewayResult<()> {
        put(&self.tree(TREE_RGB_CONTRACTS)?, &contract.contract_id, contract)
    }

    pub fn get_rgb_contract(&self, contract_id: &str) -> GatewayResult<Option<RgbContract>> {
        get(&self.tree(TREE_RGB_CONTRACTS)?, contract_id)
    }

    pub fn put_rgb_allocation(&self, allocation: &RgbAllocation) -> GatewayResult<()> {
        put(&self.tree(TREE_RGB_ALLOCATIONS)?, &allocation.allocation_id, allocation)
    }

    pub fn get_rgb_allocation(&self, allocation_id: &str) -> GatewayResult<Option<RgbAllocation>> {
        get(&self.tree(TREE_RGB_ALLOCATIONS)?, allocation_id)
    }
}

impl From<sled::transaction::TransactionError<String>> for GatewayError {
    fn from(e: sled::transaction::TransactionError<String>) -> Self {
        GatewayError::Storage(e.to_string())
    }
}
