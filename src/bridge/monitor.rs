//! Lightning monitor loop (spec §4.6 "Monitor loop"), run every 5 seconds:
//! sweeps `pending`/`pending_payment` invoices, advances status on observed
//! settlement, credits lift balances, publishes events, and expires stale
//! pending invoices.

use chrono::Utc;

use crate::balance::BalanceManager;
use crate::domain::{InvoiceStatus, LightningInvoice, LightningInvoiceType};
use crate::error::GatewayResult;
use crate::events::{topics, EventBus};
use crate::store::LedgerStore;

use super::LightningBridge;

impl LightningBridge {
    pub async fn run_monitor_tick(&self) -> GatewayResult<MonitorTickSummary> {
        let mut summary = MonitorTickSummary::default();
        let now = Utc::now();

        for mut invoice in self.store.list_invoices()? {
            match invoice.status {
                InvoiceStatus::Pending => {
                    if invoice.expires_at < now {
                        invoice.status = InvoiceStatus::Expired;
                        self.store.put_invoice(&invoice)?;
                        summary.invoices_expired += 1;
                        continue;
                    }
                    if self.observe_lift_settlement(&mut invoice).await? {
                        summary.invoices_settled += 1;
                    }
                }
                InvoiceStatus::PendingPayment => {
                    if self.observe_land_settlement(&mut invoice).await? {
                        summary.payments_settled += 1;
                    }
                }
                _ => {}
            }
        }

        let balance = self.lightning.get_lightning_balance().await.ok();
        let onchain = self.lightning.get_onchain_balance().await.ok();
        if balance.is_some() || onchain.is_some() {
            self.events.publish(
                topics::LIGHTNING_BALANCE_EVENTS,
                serde_json::json!({ "lightning_balance": balance, "onchain_balance": onchain }),
            );
        }

        Ok(summary)
    }

    /// Lift: `pending -> paid` is idempotent — re-observing an
    /// already-settled upstream invoice is a no-op (spec §5 "Invoice
    /// status" ordering guarantee).
    async fn observe_lift_settlement(&self, invoice: &mut LightningInvoice) -> GatewayResult<bool> {
        let status = self.lightning.lookup_invoice(&invoice.payment_hash).await?;
        if !status.settled {
            return Ok(false);
        }

        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = Some(Utc::now());
        self.store.put_invoice(invoice)?;

        if invoice.invoice_type == LightningInvoiceType::Lift {
            let owner = owner_of(&self.store, invoice)?;
            if let Some(owner) = owner {
                self.balances.mint(&owner, &invoice.asset_id, invoice.amount).await?;
            } else {
                tracing::warn!(payment_hash = %invoice.payment_hash, "settled lift invoice has no recoverable owner, balance not credited");
            }
        }

        self.events.publish(
            topics::LIGHTNING_INVOICE_EVENTS,
            serde_json::json!({ "payment_hash": invoice.payment_hash, "event": "invoice_paid" }),
        );
        Ok(true)
    }

    /// Land payments are driven by an explicit `pay()` call, not by this
    /// sweep; the monitor only re-confirms terminal state for bookkeeping
    /// if a payment was marked paid by a path outside `pay()` (none
    /// currently exists, so this is a no-op today and exists to keep the
    /// sweep's branch coverage complete if a second payment path is added).
    async fn observe_land_settlement(&self, _invoice: &mut LightningInvoice) -> GatewayResult<bool> {
        Ok(false)
    }
}

/// Recovers the balance-holding identity for an invoice via its
/// `session_id`, since `LightningInvoice` carries no `user_pubkey` field.
fn owner_of(store: &LedgerStore, invoice: &LightningInvoice) -> GatewayResult<Option<String>> {
    match &invoice.session_id {
        Some(session_id) => Ok(store.get_session(session_id)?.map(|s| s.user_pubkey)),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct MonitorTickSummary {
    pub invoices_settled: u32,
    pub payments_settled: u32,
    pub invoices_expired: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::lightning::MockLightningAdapter;
    use crate::balance::BalanceManager;
    use crate::config::GatewayConfig;
    use crate::domain::Asset;
    use crate::events::EventBus;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn bridge_with_lightning() -> (LightningBridge, LedgerStore, Arc<MockLightningAdapter>) {
        let store = LedgerStore::open_temporary().unwrap();
        store
            .put_asset(&Asset {
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
        let balances = BalanceManager::new(store.clone());
        let lightning = Arc::new(MockLightningAdapter::new());
        let events = Arc::new(EventBus::new());
        let config = GatewayConfig::default();
        (
            LightningBridge::new(store.clone(), balances, lightning.clone(), events, config),
            store,
            lightning,
        )
    }

    #[tokio::test]
    async fn monitor_credits_user_balance_on_settled_lift_with_session() {
        let (bridge, store, lightning) = bridge_with_lightning();

        let session = crate::domain::SigningSession {
            session_id: "sess1".to_string(),
            user_pubkey: "alice".to_string(),
            session_type: crate::domain::SessionType::LightningLift,
            status: crate::domain::SessionStatus::Initiated,
            intent: serde_json::json!({}),
            challenge_id: None,
            context: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(300),
            result: None,
            signed_tx: None,
            error_message: None,
            ceremony: Default::default(),
        };
        store.put_session(&session).unwrap();

        let raw = lightning.add_invoice(5000, "lift", 3600).await.unwrap();
        let invoice = LightningInvoice {
            payment_hash: raw.payment_hash.clone(),
            bolt11: raw.payment_request,
            session_id: Some("sess1".to_string()),
            amount: 5000,
            asset_id: "BTC".to_string(),
            status: InvoiceStatus::Pending,
            invoice_type: LightningInvoiceType::Lift,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(3600),
            paid_at: None,
            preimage: None,
        };
        store.put_invoice(&invoice).unwrap();
        lightning.settle(&raw.payment_hash);

        let summary = bridge.run_monitor_tick().await.unwrap();
        assert_eq!(summary.invoices_settled, 1);

        let balances = BalanceManager::new(store.clone());
        assert_eq!(balances.get_balance("alice", "BTC").unwrap().balance, 5000);
    }

    #[tokio::test]
    async fn monitor_expires_stale_pending_invoice() {
        let (bridge, store, _lightning) = bridge_with_lightning();
        let invoice = LightningInvoice {
            payment_hash: "ph1".to_string(),
            bolt11: "lnbcmock0ph1".to_string(),
            session_id: None,
            amount: 1000,
            asset_id: "BTC".to_string(),
            status: InvoiceStatus::Pending,
            invoice_type: LightningInvoiceType::Lift,
            created_at: Utc::now() - chrono::Duration::seconds(7200),
            expires_at: Utc::now() - chrono::Duration::seconds(3600),
            paid_at: None,
            preimage: None,
        };
        store.put_invoice(&invoice).unwrap();

        let summary = bridge.run_monitor_tick().await.unwrap();
        assert_eq!(summary.invoices_expired, 1);

        let fetched = store.get_invoice("ph1").unwrap().unwrap();
        assert_eq!(fetched.status, InvoiceStatus::Expired);
    }
}
