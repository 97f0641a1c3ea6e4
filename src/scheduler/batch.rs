//! Batched send execution.
//!
//! Takes the candidate requests selected for this tick, turns their invoices
//! into a per-asset recipient map and hands the whole thing to the wallet in
//! one transaction. Requests sit in `Processing` only for the duration of the
//! awaited send; any failure leaves them there for the next tick's recovery
//! sweep to put back to `Pending`.

use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};

use crate::config::FaucetConfig;
use crate::entities::request::{Model, RequestStatus};
use crate::store;
use crate::wallet::{Recipient, RecipientMap, WalletError, WalletPort};

const MIN_CONFIRMATIONS: u8 = 1;

struct BatchPlan {
    idxs: Vec<i64>,
    recipients: RecipientMap,
    witness_count: usize,
}

/// Execute one batched send. Failures are logged, never propagated; the
/// candidate rows either all become `Served` or all stay recoverable.
pub async fn send_next_batch(
    database: &DatabaseConnection,
    wallet: &dyn WalletPort,
    config: &FaucetConfig,
    candidates: Vec<Model>,
) {
    assert!(!candidates.is_empty(), "Batch must contain candidates");

    let plan = match build_plan(wallet, &candidates).await {
        Ok(plan) => plan,
        Err(err) => {
            error!("could not build batch plan: {err}");
            return;
        }
    };

    if plan.witness_count > 0 {
        provision_witness_outputs(wallet, config, plan.witness_count).await;
    }

    if let Err(err) = store::set_status(database, &plan.idxs, RequestStatus::Processing).await {
        error!("could not mark batch as processing: {err}");
        return;
    }

    let asset_count = plan.recipients.len();
    let recipient_count = plan.idxs.len();
    match wallet
        .send(&plan.recipients, config.utxos.fee_rate, MIN_CONFIRMATIONS)
        .await
    {
        Ok(txid) => {
            match store::set_status(database, &plan.idxs, RequestStatus::Served).await {
                Ok(served) => info!(
                    txid = %txid,
                    asset_count,
                    recipient_count,
                    witness_count = plan.witness_count,
                    served,
                    "batch sent"
                ),
                Err(err) => error!(txid = %txid, "batch sent but status update failed: {err}"),
            }
        }
        Err(err) if err.is_capacity() => {
            warn!(
                asset_count,
                recipient_count, "batch deferred, wallet capacity exhausted: {err}"
            );
        }
        Err(err) => {
            error!(
                asset_count,
                recipient_count,
                witness_count = plan.witness_count,
                "batch send failed: {err}"
            );
        }
    }
}

/// Re-parse each candidate's invoice and assemble the per-asset recipient
/// lists. One unparsable invoice aborts the whole batch.
async fn build_plan(wallet: &dyn WalletPort, candidates: &[Model]) -> Result<BatchPlan, WalletError> {
    let mut idxs = Vec::with_capacity(candidates.len());
    let mut recipients = RecipientMap::new();
    let mut witness_count = 0usize;

    for request in candidates {
        let asset_id = request
            .asset_id
            .as_deref()
            .ok_or_else(|| WalletError::Other(format!("request {} has no asset id", request.idx)))?;
        let amount = request
            .amount
            .ok_or_else(|| WalletError::Other(format!("request {} has no amount", request.idx)))?;
        assert!(amount > 0, "Admitted request carries non-positive amount");

        let invoice_data = wallet.parse_invoice(&request.invoice).await?;
        if invoice_data.is_witness {
            witness_count += 1;
        }

        idxs.push(request.idx);
        recipients
            .entry(asset_id.to_string())
            .or_default()
            .push(Recipient {
                recipient_id: invoice_data.recipient_id,
                amount: amount as u64,
                transport_endpoints: invoice_data.transport_endpoints,
            });
    }

    Ok(BatchPlan {
        idxs,
        recipients,
        witness_count,
    })
}

/// Witness transfers consume an on-chain output per recipient on top of the
/// colorable allocations. Top up when the spare pool cannot fund them all.
async fn provision_witness_outputs(
    wallet: &dyn WalletPort,
    config: &FaucetConfig,
    witness_count: usize,
) {
    let utxo_config = &config.utxos;
    let spare_value: u64 = match wallet.list_unspents().await {
        Ok(unspents) => unspents
            .iter()
            .filter(|u| u.is_spare())
            .map(|u| u.btc_amount)
            .sum(),
        Err(err) => {
            warn!("could not list unspents before witness send: {err}");
            return;
        }
    };

    let needed = utxo_config.utxo_size * witness_count as u64;
    if spare_value >= needed {
        return;
    }

    match wallet
        .create_utxos(
            witness_utxo_count(witness_count),
            utxo_config.utxo_size,
            utxo_config.fee_rate,
        )
        .await
    {
        Ok(created) => info!(created, witness_count, "provisioned witness outputs"),
        Err(WalletError::AllocationsAlreadyAvailable) => {}
        Err(err) => warn!("witness output provisioning failed: {err}"),
    }
}

/// UTXO creation takes a u8 count; an oversized witness batch is provisioned
/// at the wallet maximum and topped up again on the next pass.
fn witness_utxo_count(witness_count: usize) -> u8 {
    u8::try_from(witness_count).unwrap_or(u8::MAX)
}
