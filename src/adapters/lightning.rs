//! Lightning-node adapter (Lnd-equivalent), spec §6. HTTP-backed production
//! implementation plus an in-memory mock used by tests, matching the split
//! already established for `ChainAdapter`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AdapterError;

use super::AdapterResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddInvoiceResult {
    pub payment_hash: String,
    pub payment_request: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPaymentResult {
    pub payment_preimage: String,
    pub fee: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupInvoiceResult {
    pub settled: bool,
    pub value: u64,
    pub creation_date: i64,
    pub expiry: u64,
    pub memo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedInvoice {
    pub payment_hash: String,
    pub amount: u64,
    pub memo: String,
}

#[async_trait]
pub trait LightningAdapter: Send + Sync {
    async fn add_invoice(&self, amount: u64, memo: &str, expiry_secs: u64) -> AdapterResult<AddInvoiceResult>;
    async fn send_payment(&self, payment_request: &str) -> AdapterResult<SendPaymentResult>;
    async fn lookup_invoice(&self, payment_hash: &str) -> AdapterResult<LookupInvoiceResult>;
    async fn lookup_invoice_by_request(&self, bolt11: &str) -> AdapterResult<DecodedInvoice>;
    async fn list_invoices(&self, pending_only: bool) -> AdapterResult<Vec<LookupInvoiceResult>>;
    async fn get_lightning_balance(&self) -> AdapterResult<u64>;
    async fn get_onchain_balance(&self) -> AdapterResult<u64>;
    async fn health(&self) -> bool;
}

pub struct HttpLightningAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLightningAdapter {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("build lightning adapter http client");
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn map_err(e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(e.to_string())
        } else if e.is_connect() {
            AdapterError::Unavailable(e.to_string())
        } else {
            AdapterError::ProtocolError(e.to_string())
        }
    }
}

#[async_trait]
impl LightningAdapter for HttpLightningAdapter {
    async fn add_invoice(&self, amount: u64, memo: &str, expiry_secs: u64) -> AdapterResult<AddInvoiceResult> {
        self.client
            .post(self.url("/v1/invoices"))
            .json(&json!({ "value": amount, "memo": memo, "expiry": expiry_secs }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn send_payment(&self, payment_request: &str) -> AdapterResult<SendPaymentResult> {
        self.client
            .post(self.url("/v1/channels/transactions"))
            .json(&json!({ "payment_request": payment_request }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> AdapterResult<LookupInvoiceResult> {
        self.client
            .get(self.url(&format!("/v1/invoice/{payment_hash}")))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn lookup_invoice_by_request(&self, bolt11: &str) -> AdapterResult<DecodedInvoice> {
        self.client
            .get(self.url(&format!("/v1/payreq/{bolt11}")))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn list_invoices(&self, pending_only: bool) -> AdapterResult<Vec<LookupInvoiceResult>> {
        self.client
            .get(self.url("/v1/invoices"))
            .query(&[("pending_only", pending_only.to_string())])
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn get_lightning_balance(&self) -> AdapterResult<u64> {
        let v: serde_json::Value = self
            .client
            .get(self.url("/v1/balance/channels"))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;
        v.get("balance")
            .and_then(|b| b.as_u64())
            .ok_or_else(|| AdapterError::ProtocolError("missing balance field".to_string()))
    }

    async fn get_onchain_balance(&self) -> AdapterResult<u64> {
        let v: serde_json::Value = self
            .client
            .get(self.url("/v1/balance/blockchain"))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;
        v.get("confirmed_balance")
            .and_then(|b| b.as_u64())
            .ok_or_else(|| AdapterError::ProtocolError("missing confirmed_balance field".to_string()))
    }

    async fn health(&self) -> bool {
        self.client
            .get(self.url("/v1/getinfo"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// In-memory mock, settleable on demand by tests exercising the lift/land
/// flows without a live Lnd.
pub struct MockLightningAdapter {
    invoices: Mutex<HashMap<String, (u64, bool)>>,
    fail: AtomicBool,
}

impl Default for MockLightningAdapter {
    fn default() -> Self {
        Self {
            invoices: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl MockLightningAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Test hook: marks an invoice as settled upstream.
    pub fn settle(&self, payment_hash: &str) {
        if let Some(entry) = self.invoices.lock().get_mut(payment_hash) {
            entry.1 = true;
        }
    }
}

#[async_trait]
impl LightningAdapter for MockLightningAdapter {
    async fn add_invoice(&self, amount: u64, _memo: &str, _expiry_secs: u64) -> AdapterResult<AddInvoiceResult> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("mock lightning adapter down".to_string()));
        }
        let payment_hash = uuid::Uuid::new_v4().to_string();
        self.invoices.lock().insert(payment_hash.clone(), (amount, false));
        Ok(AddInvoiceResult {
            payment_request: format!("lnbcmock{amount}{payment_hash}"),
            payment_hash,
        })
    }

    async fn send_payment(&self, payment_request: &str) -> AdapterResult<SendPaymentResult> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::Unavailable("mock lightning adapter down".to_string()));
        }
        use sha2::Digest;
        let preimage = sha2::Sha256::digest(payment_request.as_bytes());
        Ok(SendPaymentResult {
            payment_preimage: hex::encode(preimage),
            fee: 1,
            status: "SUCCEEDED".to_string(),
        })
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> AdapterResult<LookupInvoiceResult> {
        let invoices = self.invoices.lock();
        let (value, settled) = invoices
            .get(payment_hash)
            .copied()
            .ok_or_else(|| AdapterError::ProtocolError("invoice not found".to_string()))?;
        Ok(LookupInvoiceResult {
            settled,
            value,
            creation_date: 0,
            expiry: 3600,
            memo: String::new(),
        })
    }

    async fn lookup_invoice_by_request(&self, bolt11: &str) -> AdapterResult<DecodedInvoice> {
        if !bolt11.starts_with("lnbcmock") {
            return Err(AdapterError::ProtocolError("malformed bolt11".to_string()));
        }
        let rest = &bolt11["lnbcmock".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let amount: u64 = digits.parse().unwrap_or(0);
        let payment_hash = rest[digits.len()..].to_string();
        Ok(DecodedInvoice {
            payment_hash,
            amount,
            memo: String::new(),
        })
    }

    async fn list_invoices(&self, pending_only: bool) -> AdapterResult<Vec<LookupInvoiceResult>> {
        let invoices = self.invoices.lock();
        Ok(invoices
            .values()
            .filter(|(_, settled)| !pending_only || !settled)
            .map(|(value, settled)| LookupInvoiceResult {
                settled: *settled,
                value: *value,
                creation_date: 0,
                expiry: 3600,
                memo: String::new(),
            })
            .collect())
    }

    async fn get_lightning_balance(&self) -> AdapterResult<u64> {
        Ok(1_000_000)
    }

    async fn get_onchain_balance(&self) -> AdapterResult<u64> {
        Ok(1_000_000)
    }

    async fn health(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}
