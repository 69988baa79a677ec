//! HTTP-backed `ChainAdapter` reaching an Arkd-equivalent daemon. Grounded in
//! the teacher's `static HTTP: Lazy<Client>` pattern in `src/main.rs`,
//! generalized to an owned `reqwest::Client` field instead of a global.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{
    AdapterResult, BroadcastResult, CheckpointResult, ChainAdapter, CommitmentResult, MintedVtxo,
    NetworkInfo, ProtocolResult, TxStatusResult, VtxoMintRequest,
};
use crate::error::AdapterError;

pub struct HttpChainAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainAdapter {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("build chain adapter http client");
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
impl ChainAdapter for HttpChainAdapter {
    async fn get_network_info(&self) -> AdapterResult<NetworkInfo> {
        self.client
            .get(self.url("/network-info"))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn get_fee_rate(&self) -> AdapterResult<u64> {
        let resp: serde_json::Value = self
            .client
            .get(self.url("/fee-rate"))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;
        resp.get("sats_per_byte")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AdapterError::ProtocolError("missing sats_per_byte".to_string()))
    }

    async fn create_checkpoint_transaction(&self, ark_tx_id: &str) -> AdapterResult<CheckpointResult> {
        self.client
            .post(self.url("/checkpoint"))
            .json(&json!({ "ark_tx_id": ark_tx_id }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn execute_ark_protocol(
        &self,
        ark_tx_id: &str,
        signatures: &HashMap<String, String>,
    ) -> AdapterResult<ProtocolResult> {
        self.client
            .post(self.url("/ark-protocol/execute"))
            .json(&json!({ "ark_tx_id": ark_tx_id, "signatures": signatures }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn create_vtxo_batch(&self, req: VtxoMintRequest) -> AdapterResult<Vec<MintedVtxo>> {
        let resp: serde_json::Value = self
            .client
            .post(self.url("/vtxo/batch"))
            .json(&req)
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;
        let vtxos = resp
            .get("vtxos")
            .ok_or_else(|| AdapterError::ProtocolError("missing vtxos field".to_string()))?;
        serde_json::from_value(vtxos.clone())
            .map_err(|e| AdapterError::ProtocolError(e.to_string()))
    }

    async fn create_commitment_transaction(
        &self,
        asset_id: &str,
        vtxo_ids: &[String],
        merkle_root: &str,
        total: u128,
        fee: u128,
    ) -> AdapterResult<CommitmentResult> {
        self.client
            .post(self.url("/commitment"))
            .json(&json!({
                "asset_id": asset_id,
                "vtxo_ids": vtxo_ids,
                "merkle_root": merkle_root,
                "total_amount": total.to_string(),
                "fee": fee.to_string(),
            }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn broadcast_transaction(&self, raw_hex: &str) -> AdapterResult<BroadcastResult> {
        self.client
            .post(self.url("/broadcast"))
            .json(&json!({ "raw_hex": raw_hex }))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn get_transaction_status(&self, txid: &str) -> AdapterResult<TxStatusResult> {
        self.client
            .get(self.url(&format!("/tx/{txid}/status")))
            .send()
            .await
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)
    }

    async fn health(&self) -> bool {
        self.client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
