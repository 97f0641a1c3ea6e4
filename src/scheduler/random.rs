//! Random-window resolution.
//!
//! Groups in random mode collect requests as `Waiting` while their intake
//! window is open. Once the window closes, this pass runs a lottery per
//! asset: it promotes randomly drawn candidates to `Pending` as long as the
//! asset's future balance covers them and marks everyone else `Unmet`. Both
//! transitions commit in one transaction, so a crash mid-lottery reruns it on
//! the remaining `Waiting` rows next tick.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, warn};

use crate::config::{DistributionMode, FaucetConfig};
use crate::entities::request::RequestStatus;
use crate::rng::RandomSource;
use crate::store;
use crate::wallet::WalletPort;

pub async fn resolve_closed_windows(
    database: &DatabaseConnection,
    wallet: &dyn WalletPort,
    config: &FaucetConfig,
    rng: &RandomSource,
) -> Result<()> {
    let now = Utc::now().naive_utc();
    for (group_name, group) in &config.assets {
        if group.distribution.mode != DistributionMode::Random {
            continue;
        }
        let window = group
            .distribution
            .window()
            .expect("random group window resolved during config validation");
        if !window.closed(now) {
            continue;
        }

        for asset in &group.assets {
            resolve_asset(database, wallet, rng, group_name, &asset.asset_id).await?;
        }
    }
    Ok(())
}

/// Run the lottery for one asset's waiting requests.
async fn resolve_asset(
    database: &DatabaseConnection,
    wallet: &dyn WalletPort,
    rng: &RandomSource,
    group_name: &str,
    asset_id: &str,
) -> Result<()> {
    let mut pool = store::waiting_for_asset(database, asset_id)
        .await
        .with_context(|| format!("Failed to load waiting requests for asset {asset_id}"))?;
    if pool.is_empty() {
        return Ok(());
    }

    // Future balance includes incoming but unsettled units, so requests
    // covered by an in-flight top-up still win a slot.
    let mut balance = match wallet.get_asset_balance(asset_id).await {
        Ok(balance) => balance.future,
        Err(err) => {
            warn!(group = group_name, asset_id, "skipping lottery, balance unavailable: {err}");
            return Ok(());
        }
    };

    let mut promoted = Vec::new();
    while !pool.is_empty() {
        let choice = rng.pick_index(pool.len());
        let amount = pool[choice].amount.unwrap_or(0).max(0) as u64;
        if amount == 0 || amount > balance {
            break;
        }
        let winner = pool.swap_remove(choice);
        balance -= amount;
        promoted.push(winner.idx);
    }
    let unmet: Vec<i64> = pool.iter().map(|row| row.idx).collect();

    let txn = database.begin().await?;
    store::set_status(&txn, &promoted, RequestStatus::Pending).await?;
    store::set_status(&txn, &unmet, RequestStatus::Unmet).await?;
    txn.commit().await?;

    info!(
        group = group_name,
        asset_id,
        promoted = promoted.len(),
        unmet = unmet.len(),
        "resolved closed request window"
    );
    Ok(())
}
