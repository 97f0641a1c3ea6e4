//! Capability interface to the ledger wallet.
//!
//! The faucet never touches UTXO selection, transaction construction or any
//! invoice cryptography itself; everything goes through [`WalletPort`]. The
//! production implementation is a JSON-RPC adapter ([`rpc::WalletRpcClient`])
//! speaking to the wallet daemon; tests substitute a scripted stub.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rpc;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Not enough settled asset units to cover the outgoing batch
    #[error("insufficient spendable assets")]
    InsufficientSpendableAssets,
    /// No free allocation slot on any colorable UTXO
    #[error("insufficient allocation slots")]
    InsufficientAllocationSlots,
    /// The asset's total supply held by the wallet cannot cover the batch
    #[error("insufficient total assets")]
    InsufficientTotalAssets,
    /// UTXO creation was requested but spare allocations already exist
    #[error("allocations already available")]
    AllocationsAlreadyAvailable,
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
    #[error("wallet call timed out")]
    Timeout,
    #[error("wallet error: {0}")]
    Other(String),
}

impl WalletError {
    /// Retryable capacity error class: rows revert to pending and the next
    /// scheduler tick tries again.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpendableAssets
                | Self::InsufficientAllocationSlots
                | Self::InsufficientTotalAssets
        )
    }
}

/// Settled/future/spendable balances of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub settled: u64,
    pub future: u64,
    pub spendable: u64,
}

/// Schema-dependent asset fields, modeled as a closed set of variants
/// instead of optional-attribute probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "UPPERCASE")]
pub enum AssetKind {
    /// Fungible asset identified by a ticker (NIA schema)
    Nia { ticker: String },
    /// Collectible asset with a description and optional media (CFA schema)
    Cfa {
        description: Option<String>,
        media: Option<MediaRef>,
    },
}

impl AssetKind {
    pub fn schema(&self) -> &'static str {
        match self {
            Self::Nia { .. } => "NIA",
            Self::Cfa { .. } => "CFA",
        }
    }

    pub fn ticker(&self) -> Option<&str> {
        match self {
            Self::Nia { ticker } => Some(ticker.as_str()),
            Self::Cfa { .. } => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Nia { .. } => None,
            Self::Cfa { description, .. } => description.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub mime: String,
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub name: String,
    pub precision: u8,
    pub balance: Balance,
    #[serde(flatten)]
    pub kind: AssetKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbAllocation {
    pub asset_id: Option<String>,
    pub amount: u64,
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub outpoint: String,
    pub btc_amount: u64,
    pub colorable: bool,
    #[serde(default)]
    pub allocations: Vec<RgbAllocation>,
}

impl Unspent {
    /// A spare UTXO is colorable and carries no allocation yet, so the wallet
    /// can assign it to a new outgoing transfer without contention.
    pub fn is_spare(&self) -> bool {
        self.colorable && self.allocations.is_empty()
    }
}

/// Parsed invoice details needed by the eligibility and batching paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub recipient_id: String,
    /// Witness transfers need an extra funded on-chain output
    pub is_witness: bool,
    #[serde(default)]
    pub transport_endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub recipient_id: String,
    pub amount: u64,
    pub transport_endpoints: Vec<String>,
}

/// Per-asset recipient lists for one batched send.
pub type RecipientMap = BTreeMap<String, Vec<Recipient>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub status: String,
    pub amount: u64,
    pub incoming: bool,
    pub txid: Option<String>,
    pub recipient_id: Option<String>,
}

#[async_trait::async_trait]
pub trait WalletPort: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<AssetRecord>, WalletError>;

    async fn list_unspents(&self) -> Result<Vec<Unspent>, WalletError>;

    async fn get_asset_balance(&self, asset_id: &str) -> Result<Balance, WalletError>;

    /// Refresh in-flight transfers; returns whether anything changed.
    /// `asset_filter` limits the refresh to one asset.
    async fn refresh(&self, asset_filter: Option<&str>) -> Result<bool, WalletError>;

    /// Create `count` colorable UTXOs of `size_sats` each. Returns the number
    /// actually created; callers treat [`WalletError::AllocationsAlreadyAvailable`]
    /// as a successful no-op.
    async fn create_utxos(&self, count: u8, size_sats: u64, fee_rate: f64)
    -> Result<u8, WalletError>;

    /// Send every recipient list in one batched transaction, returning the
    /// transaction id.
    async fn send(
        &self,
        recipients: &RecipientMap,
        fee_rate: f64,
        min_confirmations: u8,
    ) -> Result<String, WalletError>;

    async fn parse_invoice(&self, invoice: &str) -> Result<InvoiceData, WalletError>;

    async fn list_transfers(&self, asset_id: &str) -> Result<Vec<TransferRecord>, WalletError>;

    /// Fail transfers currently waiting on a counterparty.
    async fn fail_transfers(&self) -> Result<(), WalletError>;

    /// Delete transfers that have already failed.
    async fn delete_transfers(&self) -> Result<(), WalletError>;

    /// Fresh address for topping up the bitcoin reserve.
    async fn new_address(&self) -> Result<String, WalletError>;
}
