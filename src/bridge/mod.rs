//! Lightning Bridge (C9), spec §4.6.

pub mod fees;
pub mod monitor;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::adapters::lightning::LightningAdapter;
use crate::balance::BalanceManager;
use crate::config::GatewayConfig;
use crate::domain::{Amount, InvoiceStatus, LightningInvoice, LightningInvoiceType};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{topics, EventBus};
use crate::retry::with_retry;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct LightningBridge {
    store: LedgerStore,
    balances: BalanceManager,
    lightning: Arc<dyn LightningAdapter>,
    events: Arc<EventBus>,
    config: GatewayConfig,
}

impl LightningBridge {
    pub fn new(
        store: LedgerStore,
        balances: BalanceManager,
        lightning: Arc<dyn LightningAdapter>,
        events: Arc<EventBus>,
        config: GatewayConfig,
    ) -> Self {
        Self { store, balances, lightning, events, config }
    }

    /// `create_lift`: a lift is an on-ramp — the user has no off-chain
    /// balance to check yet, since the whole point is to mint one once the
    /// inbound Lightning payment settles (spec §4.6 step 4, `monitor.rs`'s
    /// `observe_lift_settlement`). No pre-balance guard here: spec §8
    /// scenario 5 starts the user at balance 0 and expects the lift to
    /// succeed.
    pub async fn create_lift(
        &self,
        _user_pubkey: &str,
        asset_id: &str,
        amount: Amount,
        memo: Option<String>,
    ) -> GatewayResult<LightningInvoice> {
        let memo = memo.unwrap_or_else(|| format!("ark-gateway lift {amount} {asset_id}"));
        let invoice_result = with_retry("add_invoice", || async {
            self.lightning
                .add_invoice(amount as u64, &memo, self.config.invoice_expiry_secs)
                .await
                .map_err(GatewayError::from)
        })
        .await?;

        let now = Utc::now();
        let invoice = LightningInvoice {
            payment_hash: invoice_result.payment_hash,
            bolt11: invoice_result.payment_request,
            session_id: None,
            amount,
            asset_id: asset_id.to_string(),
            status: InvoiceStatus::Pending,
            invoice_type: LightningInvoiceType::Lift,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(self.config.invoice_expiry_secs as i64),
            paid_at: None,
            preimage: None,
        };
        self.store.put_invoice(&invoice)?;
        Ok(invoice)
    }

    /// `process_land`: debits nothing yet — `pay` does the actual spend.
    /// Validates the BOLT11 matches the requested amount and persists a
    /// `pending_payment` row (spec §4.6 step 2-3).
    pub async fn process_land(
        &self,
        user_pubkey: &str,
        asset_id: &str,
        amount: Amount,
        bolt11: &str,
    ) -> GatewayResult<LightningInvoice> {
        let available = self.balances.available_balance(user_pubkey, asset_id).await?;
        if available < amount {
            return Err(GatewayError::InsufficientFunds { needed: amount, available });
        }

        let decoded = self.lightning.lookup_invoice_by_request(bolt11).await?;
        if decoded.amount as u128 != amount {
            return Err(GatewayError::Validation(format!(
                "bolt11 amount {} does not match requested amount {amount}",
                decoded.amount
            )));
        }

        self.balances.reserve(user_pubkey, asset_id, amount).await?;

        let now = Utc::now();
        let invoice = LightningInvoice {
            payment_hash: decoded.payment_hash,
            bolt11: bolt11.to_string(),
            session_id: None,
            amount,
            asset_id: asset_id.to_string(),
            status: InvoiceStatus::PendingPayment,
            invoice_type: LightningInvoiceType::Land,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(self.config.invoice_expiry_secs as i64),
            paid_at: None,
            preimage: None,
        };
        self.store.put_invoice(&invoice)?;
        Ok(invoice)
    }

    /// `pay(payment_hash)`: requires status `pending_payment`; attempts
    /// payment with the shared three-attempt/50ms-linear-backoff retry
    /// (spec §7). On failure, releases the reservation `process_land` took;
    /// on success, finalizes it — debiting both `balance` and
    /// `reserved_balance` for good, since the off-chain funds have now
    /// genuinely left the ledger for an external Lightning payout.
    pub async fn pay(&self, payment_hash: &str) -> GatewayResult<LightningInvoice> {
        let mut invoice = self
            .store
            .get_invoice(payment_hash)?
            .ok_or_else(|| GatewayError::InvoiceNotFound(payment_hash.to_string()))?;
        if invoice.status != InvoiceStatus::PendingPayment {
            return Err(GatewayError::Validation(format!(
                "invoice {payment_hash} is not pending_payment (status: {})",
                invoice.status.as_str()
            )));
        }

        let payment = match with_retry("send_payment", || async {
            self.lightning.send_payment(&invoice.bolt11).await.map_err(GatewayError::from)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                if let Some(user_pubkey) = self.land_owner(&invoice)? {
                    self.balances.release(&user_pubkey, &invoice.asset_id, invoice.amount).await?;
                } else {
                    tracing::warn!(payment_hash, "payment failed but no session on invoice to recover the reservation owner");
                }
                return Err(GatewayError::PaymentFailed(e.to_string()));
            }
        };

        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = Some(Utc::now());
        invoice.preimage = Some(payment.payment_preimage);
        self.store.put_invoice(&invoice)?;

        if let Some(user_pubkey) = self.land_owner(&invoice)? {
            self.balances.finalize_debit(&user_pubkey, &invoice.asset_id, invoice.amount).await?;
        } else {
            tracing::warn!(payment_hash, "paid land invoice has no recoverable owner, reservation not finalized");
        }

        self.events.publish(
            topics::LIGHTNING_PAYMENT_EVENTS,
            serde_json::json!({ "payment_hash": payment_hash, "status": "paid" }),
        );
        Ok(invoice)
    }

    /// `LightningInvoice` carries no `user_pubkey` field (spec §3's data
    /// model), only an optional `session_id`; recover the reservation
    /// owner through the session row when one is attached, so a failed
    /// `pay()` can release the hold it took in `process_land`. Without a
    /// session_id (e.g. land initiated outside a ceremony) there is
    /// nothing to compensate automatically.
    fn land_owner(&self, invoice: &LightningInvoice) -> GatewayResult<Option<String>> {
        match &invoice.session_id {
            Some(session_id) => Ok(self.store.get_session(session_id)?.map(|s| s.user_pubkey)),
            None => Ok(None),
        }
    }
}
