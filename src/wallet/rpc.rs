//! JSON-RPC adapter for the wallet daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;

use super::{
    AssetRecord, Balance, InvoiceData, RecipientMap, TransferRecord, Unspent, WalletError,
    WalletPort,
};

// Error codes the wallet daemon uses for classified send/provisioning
// failures. Anything else is surfaced as `WalletError::Other`.
const CODE_INSUFFICIENT_SPENDABLE: i32 = -32050;
const CODE_INSUFFICIENT_ALLOCATION_SLOTS: i32 = -32051;
const CODE_INSUFFICIENT_TOTAL: i32 = -32052;
const CODE_ALLOCATIONS_ALREADY_AVAILABLE: i32 = -32053;
const CODE_INVALID_INVOICE: i32 = -32054;

#[derive(Clone)]
pub struct WalletRpcClient {
    inner: HttpClient,
    timeout: Duration,
}

impl WalletRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "Wallet RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build wallet RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        assert!(
            self.timeout >= Duration::from_millis(100),
            "Timeout invariant broken"
        );
        self.timeout
    }
}

fn classify(err: ClientError) -> WalletError {
    match err {
        ClientError::Call(object) => match object.code() {
            CODE_INSUFFICIENT_SPENDABLE => WalletError::InsufficientSpendableAssets,
            CODE_INSUFFICIENT_ALLOCATION_SLOTS => WalletError::InsufficientAllocationSlots,
            CODE_INSUFFICIENT_TOTAL => WalletError::InsufficientTotalAssets,
            CODE_ALLOCATIONS_ALREADY_AVAILABLE => WalletError::AllocationsAlreadyAvailable,
            CODE_INVALID_INVOICE => WalletError::InvalidInvoice(object.message().to_string()),
            _ => WalletError::Other(object.message().to_string()),
        },
        ClientError::RequestTimeout => WalletError::Timeout,
        other => WalletError::Other(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct CreateUtxosResponse {
    created: u8,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[async_trait::async_trait]
impl WalletPort for WalletRpcClient {
    async fn list_assets(&self) -> Result<Vec<AssetRecord>, WalletError> {
        let assets: Vec<AssetRecord> = self
            .inner
            .request("wallet_listAssets", rpc_params![])
            .await
            .map_err(classify)?;
        assert!(
            assets.len() <= 10_000,
            "Asset listing exceeded defensive limit"
        );
        Ok(assets)
    }

    async fn list_unspents(&self) -> Result<Vec<Unspent>, WalletError> {
        let unspents: Vec<Unspent> = self
            .inner
            .request("wallet_listUnspents", rpc_params![])
            .await
            .map_err(classify)?;
        assert!(
            unspents.len() <= 100_000,
            "Unspent listing exceeded defensive limit"
        );
        Ok(unspents)
    }

    async fn get_asset_balance(&self, asset_id: &str) -> Result<Balance, WalletError> {
        assert!(!asset_id.is_empty(), "Asset id must be provided");
        let balance: Balance = self
            .inner
            .request("wallet_getAssetBalance", rpc_params![asset_id])
            .await
            .map_err(classify)?;
        Ok(balance)
    }

    async fn refresh(&self, asset_filter: Option<&str>) -> Result<bool, WalletError> {
        let response: RefreshResponse = self
            .inner
            .request("wallet_refresh", rpc_params![asset_filter])
            .await
            .map_err(classify)?;
        Ok(response.changed)
    }

    async fn create_utxos(
        &self,
        count: u8,
        size_sats: u64,
        fee_rate: f64,
    ) -> Result<u8, WalletError> {
        assert!(count > 0, "UTXO count must be positive");
        assert!(size_sats > 0, "UTXO size must be positive");

        let mut params = ObjectParams::new();
        params
            .insert("count", count)
            .map_err(|err| WalletError::Other(err.to_string()))?;
        params
            .insert("size_sats", size_sats)
            .map_err(|err| WalletError::Other(err.to_string()))?;
        params
            .insert("fee_rate", fee_rate)
            .map_err(|err| WalletError::Other(err.to_string()))?;

        let response: CreateUtxosResponse = self
            .inner
            .request("wallet_createUtxos", params)
            .await
            .map_err(classify)?;
        Ok(response.created)
    }

    async fn send(
        &self,
        recipients: &RecipientMap,
        fee_rate: f64,
        min_confirmations: u8,
    ) -> Result<String, WalletError> {
        assert!(!recipients.is_empty(), "Recipient map must not be empty");
        assert!(
            recipients.values().all(|list| !list.is_empty()),
            "Recipient map contains an empty recipient list"
        );

        let mut params = ObjectParams::new();
        params
            .insert("recipient_map", recipients)
            .map_err(|err| WalletError::Other(err.to_string()))?;
        params
            .insert("fee_rate", fee_rate)
            .map_err(|err| WalletError::Other(err.to_string()))?;
        params
            .insert("min_confirmations", min_confirmations)
            .map_err(|err| WalletError::Other(err.to_string()))?;

        let response: SendResponse = self
            .inner
            .request("wallet_send", params)
            .await
            .map_err(classify)?;
        assert!(!response.txid.is_empty(), "Wallet returned empty txid");
        Ok(response.txid)
    }

    async fn parse_invoice(&self, invoice: &str) -> Result<InvoiceData, WalletError> {
        if invoice.trim().is_empty() {
            return Err(WalletError::InvalidInvoice("empty invoice".to_string()));
        }
        let data: InvoiceData = self
            .inner
            .request("wallet_parseInvoice", rpc_params![invoice])
            .await
            .map_err(classify)?;
        assert!(
            !data.recipient_id.is_empty(),
            "Parsed invoice has empty recipient id"
        );
        Ok(data)
    }

    async fn list_transfers(&self, asset_id: &str) -> Result<Vec<TransferRecord>, WalletError> {
        assert!(!asset_id.is_empty(), "Asset id must be provided");
        let transfers: Vec<TransferRecord> = self
            .inner
            .request("wallet_listTransfers", rpc_params![asset_id])
            .await
            .map_err(classify)?;
        Ok(transfers)
    }

    async fn fail_transfers(&self) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .inner
            .request("wallet_failTransfers", rpc_params![])
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_transfers(&self) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .inner
            .request("wallet_deleteTransfers", rpc_params![])
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn new_address(&self) -> Result<String, WalletError> {
        let response: AddressResponse = self
            .inner
            .request("wallet_newAddress", rpc_params![])
            .await
            .map_err(classify)?;
        assert!(!response.address.is_empty(), "Wallet returned empty address");
        Ok(response.address)
    }
}
