//! Data model (spec §3): closed tagged variants for every status/type field,
//! per the re-architecture note in spec §9 ("string-typed enums mixed with
//! enum types" is the anti-pattern we replace).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Amount = u128;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: String,
    pub display_name: String,
    pub ticker: String,
    pub decimals: u8,
    /// 0 = uncapped
    pub total_supply: Amount,
    pub active: bool,
    pub metadata: HashMap<String, String>,
    pub rgb_contract_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssetBalance {
    pub user_pubkey: String,
    pub asset_id: String,
    pub balance: Amount,
    pub reserved_balance: Amount,
}

impl AssetBalance {
    pub fn available(&self) -> Amount {
        self.balance.saturating_sub(self.reserved_balance)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VtxoStatus {
    Available,
    Assigned,
    Spent,
    Expired,
    Settled,
}

impl VtxoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VtxoStatus::Available => "available",
            VtxoStatus::Assigned => "assigned",
            VtxoStatus::Spent => "spent",
            VtxoStatus::Expired => "expired",
            VtxoStatus::Settled => "settled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vtxo {
    pub vtxo_id: String,
    pub txid: String,
    pub vout: u32,
    pub amount: Amount,
    pub script_pubkey: String,
    pub asset_id: String,
    /// empty when pooled (not yet assigned to a user)
    pub user_pubkey: String,
    pub status: VtxoStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub spending_txid: Option<String>,
    pub rgb_allocation_id: Option<String>,
}

impl Vtxo {
    pub fn is_pooled(&self) -> bool {
        self.user_pubkey.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    P2pTransfer,
    LightningLift,
    LightningLand,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::P2pTransfer => "p2p_transfer",
            SessionType::LightningLift => "lightning_lift",
            SessionType::LightningLand => "lightning_land",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    ChallengeSent,
    AwaitingSignature,
    Signing,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::ChallengeSent => "challenge_sent",
            SessionStatus::AwaitingSignature => "awaiting_signature",
            SessionStatus::Signing => "signing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CeremonyState {
    pub current_step: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub step_start_time: Option<DateTime<Utc>>,
    pub completed_steps: Vec<String>,
    pub signatures_collected: HashMap<String, String>,
    pub transactions: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSession {
    pub session_id: String,
    pub user_pubkey: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub intent: serde_json::Value,
    pub challenge_id: Option<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub signed_tx: Option<String>,
    pub error_message: Option<String>,
    pub ceremony: CeremonyState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningChallenge {
    pub challenge_id: String,
    pub session_id: String,
    pub challenge_bytes: Vec<u8>,
    pub context: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    ArkTx,
    CheckpointTx,
    SettlementTx,
    P2pTransfer,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::ArkTx => "ark_tx",
            TxType::CheckpointTx => "checkpoint_tx",
            TxType::SettlementTx => "settlement_tx",
            TxType::P2pTransfer => "p2p_transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Broadcast,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Broadcast => "broadcast",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub session_id: Option<String>,
    pub tx_type: TxType,
    pub raw: Option<Vec<u8>>,
    pub status: TxStatus,
    pub amount: Amount,
    pub fee: Amount,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_height: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PendingPayment,
    Paid,
    Expired,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PendingPayment => "pending_payment",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LightningInvoiceType {
    Lift,
    Land,
}

impl LightningInvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightningInvoiceType::Lift => "lift",
            LightningInvoiceType::Land => "land",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightningInvoice {
    pub payment_hash: String,
    pub bolt11: String,
    pub session_id: Option<String>,
    pub amount: Amount,
    pub asset_id: String,
    pub status: InvoiceStatus,
    pub invoice_type: LightningInvoiceType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub preimage: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RgbSchemaType {
    Cfa,
    Nia,
    Ria,
    Uda,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RgbContract {
    pub contract_id: String,
    pub schema: RgbSchemaType,
    pub genesis_proof: String,
    pub state_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RgbAllocation {
    pub allocation_id: String,
    pub contract_id: String,
    pub vtxo_id: String,
    pub owner_pubkey: String,
    pub amount: Amount,
}
