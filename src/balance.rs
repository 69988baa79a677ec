//! Asset/Balance Manager (C3), spec §4.1.
//!
//! Mutations on a given `(user, asset)` pair are serialized on a per-key
//! async mutex, the way `src/vault/store.rs` serializes bucket balance
//! reads/writes through a single sled tree but, since our balances need
//! read-modify-write transfer semantics across two rows (sender +
//! recipient), we add an explicit lock layer on top rather than relying on
//! sled's single-key CAS alone.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::{Amount, Asset, AssetBalance};
use crate::error::{GatewayError, GatewayResult};
use crate::store::LedgerStore;

fn lock_key(user_pubkey: &str, asset_id: &str) -> String {
    format!("{user_pubkey}\0{asset_id}")
}

#[derive(Clone)]
pub struct BalanceManager {
    store: LedgerStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BalanceManager {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, user_pubkey: &str, asset_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(lock_key(user_pubkey, asset_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn create_asset(&self, asset: Asset) -> GatewayResult<Asset> {
        if self.store.get_asset(&asset.asset_id)?.is_some() {
            return Err(GatewayError::Validation(format!(
                "asset {} already exists",
                asset.asset_id
            )));
        }
        self.store.put_asset(&asset)?;
        Ok(asset)
    }

    pub fn get_asset(&self, asset_id: &str) -> GatewayResult<Asset> {
        self.store
            .get_asset(asset_id)?
            .ok_or_else(|| GatewayError::NotFound(format!("asset {asset_id}")))
    }

    pub fn get_balance(&self, user_pubkey: &str, asset_id: &str) -> GatewayResult<AssetBalance> {
        Ok(self
            .store
            .get_balance(user_pubkey, asset_id)?
            .unwrap_or_else(|| AssetBalance {
                user_pubkey: user_pubkey.to_string(),
                asset_id: asset_id.to_string(),
                balance: 0,
                reserved_balance: 0,
            }))
    }

    pub fn list_user_balances(&self, user_pubkey: &str) -> GatewayResult<Vec<AssetBalance>> {
        self.store.list_balances_for_user(user_pubkey)
    }

    /// `required = floor(circulation * ratio)` (spec §4.1 "reserve-ratio
    /// calculation"). Circulation here is read from the asset's own
    /// bookkeeping counter (`metadata["circulation"]`), since sled has no
    /// cheap full-column aggregate; the balance manager is the sole writer
    /// of that counter.
    pub fn reserve_ratio_required(&self, asset_id: &str, ratio: f64) -> GatewayResult<Amount> {
        let asset = self.get_asset(asset_id)?;
        let circulation: u128 = asset
            .metadata
            .get("circulation")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(((circulation as f64) * ratio).floor() as u128)
    }

    async fn with_lock<T>(&self, user_pubkey: &str, asset_id: &str, f: impl FnOnce() -> GatewayResult<T>) -> GatewayResult<T> {
        let lock = self.lock_for(user_pubkey, asset_id);
        let _guard = lock.lock().await;
        f()
    }

    /// Mint supply to a user. Fails if the asset is inactive, unknown, or
    /// capped and `circulation + amount > total_supply`.
    pub async fn mint(&self, user_pubkey: &str, asset_id: &str, amount: Amount) -> GatewayResult<AssetBalance> {
        self.with_lock(user_pubkey, asset_id, || {
            let mut asset = self.get_asset(asset_id)?;
            if !asset.active {
                return Err(GatewayError::Validation(format!("asset {asset_id} is inactive")));
            }
            let circulation: u128 = asset
                .metadata
                .get("circulation")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if asset.total_supply != 0 && circulation + amount > asset.total_supply {
                return Err(GatewayError::Validation(format!(
                    "mint of {amount} would exceed total supply of {asset_id}"
                )));
            }

            let mut balance = self.get_balance(user_pubkey, asset_id)?;
            balance.balance = balance.balance.saturating_add(amount);
            self.store.put_balance(&balance)?;

            asset
                .metadata
                .insert("circulation".to_string(), (circulation + amount).to_string());
            self.store.put_asset(&asset)?;

            Ok(balance)
        })
        .await
    }

    pub async fn available_balance(&self, user_pubkey: &str, asset_id: &str) -> GatewayResult<Amount> {
        Ok(self.get_balance(user_pubkey, asset_id)?.available())
    }

    /// Debit sender, credit recipient, atomically (both mutations applied,
    /// or neither — we lock both keys before writing either row). Recipient
    /// row is created on first credit.
    pub async fn transfer(
        &self,
        sender: &str,
        recipient: &str,
        asset_id: &str,
        amount: Amount,
    ) -> GatewayResult<()> {
        // Always lock in a fixed order (lexicographic on pubkey) to avoid
        // deadlocks between two transfers running in opposite directions.
        let (first, second) = if sender <= recipient {
            (sender, recipient)
        } else {
            (recipient, sender)
        };
        let lock_a = self.lock_for(first, asset_id);
        let lock_b = self.lock_for(second, asset_id);
        let _guard_a = lock_a.lock().await;
        let _guard_b = if first != second { Some(lock_b.lock().await) } else { None };

        let mut sender_balance = self.get_balance(sender, asset_id)?;
        if sender_balance.available() < amount {
            return Err(GatewayError::InsufficientFunds {
                needed: amount,
                available: sender_balance.available(),
            });
        }
        sender_balance.balance -= amount;
        self.store.put_balance(&sender_balance)?;

        let mut recipient_balance = self.get_balance(recipient, asset_id)?;
        recipient_balance.balance = recipient_balance.balance.saturating_add(amount);
        self.store.put_balance(&recipient_balance)?;

        Ok(())
    }

    /// Moves funds `balance -> reserved` for the same user without altering
    /// the total.
    pub async fn reserve(&self, user_pubkey: &str, asset_id: &str, amount: Amount) -> GatewayResult<()> {
        self.with_lock(user_pubkey, asset_id, || {
            let mut balance = self.get_balance(user_pubkey, asset_id)?;
            if balance.available() < amount {
                return Err(GatewayError::InsufficientFunds {
                    needed: amount,
                    available: balance.available(),
                });
            }
            balance.reserved_balance += amount;
            self.store.put_balance(&balance)?;
            Ok(())
        })
        .await
    }

    /// Reverses a reserve: `reserved -> balance` (conceptually; the total
    /// `balance` field already includes the reserved portion, so release
    /// only decrements `reserved_balance`).
    pub async fn release(&self, user_pubkey: &str, asset_id: &str, amount: Amount) -> GatewayResult<()> {
        self.with_lock(user_pubkey, asset_id, || {
            let mut balance = self.get_balance(user_pubkey, asset_id)?;
            balance.reserved_balance = balance.reserved_balance.saturating_sub(amount);
            self.store.put_balance(&balance)?;
            Ok(())
        })
        .await
    }

    /// Finalization after confirmation (spec §4.4 `confirm()`): the amount
    /// was already moved out of sender's *available* balance at
    /// reservation time, so finalize only needs to (1) remove it from
    /// sender's `balance`/`reserved_balance` for good and (2) credit it to
    /// recipient's `balance`. Recipient was never reserved against in this
    /// flow, so their `reserved_balance` is untouched.
    pub async fn finalize_transfer(
        &self,
        sender: &str,
        recipient: &str,
        asset_id: &str,
        amount: Amount,
    ) -> GatewayResult<()> {
        let (first, second) = if sender <= recipient {
            (sender, recipient)
        } else {
            (recipient, sender)
        };
        let lock_a = self.lock_for(first, asset_id);
        let lock_b = self.lock_for(second, asset_id);
        let _guard_a = lock_a.lock().await;
        let _guard_b = if first != second { Some(lock_b.lock().await) } else { None };

        let mut sender_balance = self.get_balance(sender, asset_id)?;
        sender_balance.balance = sender_balance.balance.saturating_sub(amount);
        sender_balance.reserved_balance = sender_balance.reserved_balance.saturating_sub(amount);
        self.store.put_balance(&sender_balance)?;

        let mut recipient_balance = self.get_balance(recipient, asset_id)?;
        recipient_balance.balance = recipient_balance.balance.saturating_add(amount);
        self.store.put_balance(&recipient_balance)?;

        Ok(())
    }

    /// Finalizes a reservation that left the ledger entirely rather than
    /// moving to another user's balance — a Lightning land payout (spec
    /// §4.6): decrements both `balance` and `reserved_balance` for the
    /// paying user, with no corresponding recipient credit.
    pub async fn finalize_debit(&self, user_pubkey: &str, asset_id: &str, amount: Amount) -> GatewayResult<()> {
        self.with_lock(user_pubkey, asset_id, || {
            let mut balance = self.get_balance(user_pubkey, asset_id)?;
            balance.balance = balance.balance.saturating_sub(amount);
            balance.reserved_balance = balance.reserved_balance.saturating_sub(amount);
            self.store.put_balance(&balance)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> BalanceManager {
        let store = LedgerStore::open_temporary().unwrap();
        BalanceManager::new(store)
    }

    fn btc_asset() -> Asset {
        Asset {
            asset_id: "BTC".to_string(),
            display_name: "Bitcoin".to_string(),
            ticker: "BTC".to_string(),
            decimals: 8,
            total_supply: 2_100_000_000_000_000,
            active: true,
            metadata: HashMap::new(),
            rgb_contract_id: None,
        }
    }

    #[tokio::test]
    async fn mint_then_transfer_happy_path() {
        let mgr = manager();
        mgr.create_asset(btc_asset()).unwrap();
        mgr.mint("u1", "BTC", 5000).await.unwrap();
        mgr.transfer("u1", "u2", "BTC", 1000).await.unwrap();

        assert_eq!(mgr.get_balance("u1", "BTC").unwrap().balance, 4000);
        assert_eq!(mgr.get_balance("u2", "BTC").unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn transfer_rejects_insufficient_funds() {
        let mgr = manager();
        mgr.create_asset(btc_asset()).unwrap();
        mgr.mint("u1", "BTC", 5000).await.unwrap();

        let err = mgr.transfer("u1", "u2", "BTC", 6000).await.unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFunds { .. }));
        assert_eq!(mgr.get_balance("u1", "BTC").unwrap().balance, 5000);
    }

    #[tokio::test]
    async fn mint_rejects_over_supply_cap() {
        let mgr = manager();
        let mut asset = btc_asset();
        asset.total_supply = 100;
        mgr.create_asset(asset).unwrap();

        let err = mgr.mint("u1", "BTC", 200).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn reserve_then_release_restores_balance_exactly() {
        let mgr = manager();
        mgr.create_asset(btc_asset()).unwrap();
        mgr.mint("u1", "BTC", 1000).await.unwrap();

        mgr.reserve("u1", "BTC", 400).await.unwrap();
        assert_eq!(mgr.get_balance("u1", "BTC").unwrap().available(), 600);

        mgr.release("u1", "BTC", 400).await.unwrap();
        let balance = mgr.get_balance("u1", "BTC").unwrap();
        assert_eq!(balance.available(), 1000);
        assert_eq!(balance.reserved_balance, 0);
    }

    #[tokio::test]
    async fn finalize_transfer_moves_reserved_funds_to_recipient_balance() {
        let mgr = manager();
        mgr.create_asset(btc_asset()).unwrap();
        mgr.mint("u1", "BTC", 1000).await.unwrap();
        mgr.reserve("u1", "BTC", 400).await.unwrap();

        mgr.finalize_transfer("u1", "u2", "BTC", 400).await.unwrap();

        let sender = mgr.get_balance("u1", "BTC").unwrap();
        assert_eq!(sender.balance, 600);
        assert_eq!(sender.reserved_balance, 0);

        let recipient = mgr.get_balance("u2", "BTC").unwrap();
        assert_eq!(recipient.balance, 400);
    }

    #[tokio::test]
    async fn finalize_debit_removes_funds_from_both_balance_and_reserved() {
        let mgr = manager();
        mgr.create_asset(btc_asset()).unwrap();
        mgr.mint("u1", "BTC", 1000).await.unwrap();
        mgr.reserve("u1", "BTC", 400).await.unwrap();

        mgr.finalize_debit("u1", "BTC", 400).await.unwrap();

        let balance = mgr.get_balance("u1", "BTC").unwrap();
        assert_eq!(balance.balance, 600);
        assert_eq!(balance.reserved_balance, 0);
    }
}
