//! Asset migration engine.
//!
//! A migration re-points distribution from a retired asset id to its
//! configured successor. At boot the engine rebuilds the migration cache (who
//! is still owed a successor asset) from served history and rewrites any
//! request still in flight for a retired asset. At runtime the cache is the
//! single source of truth for migration eligibility and shrinks monotonically
//! as requesters claim their migrated asset.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{AssetEntry, FaucetConfig};
use crate::identity::normalize_requester_id;
use crate::store;

/// group name -> requester digest -> asset still owed
type CacheMap = BTreeMap<String, BTreeMap<String, AssetEntry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Group has no cache entry at all: migration fully completed
    GroupAbsent,
    /// Group is still migrating but this requester is not in the list
    WalletAbsent,
    /// Requester is owed an asset from this group
    Owed,
}

/// Materialized view of outstanding migrations. Deterministically
/// reconstructible from the store, so it is rebuilt at every boot rather than
/// persisted.
pub struct MigrationCache {
    inner: Mutex<CacheMap>,
}

impl Default for MigrationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheMap::new()),
        }
    }

    /// Replace the whole cache content. Boot-time only.
    pub async fn rebuild(&self, entries: CacheMap) {
        let mut cache = self.inner.lock().await;
        *cache = entries;
    }

    pub async fn lookup(&self, group: &str, wallet_id: &str) -> CacheLookup {
        let cache = self.inner.lock().await;
        match cache.get(group) {
            None => CacheLookup::GroupAbsent,
            Some(wallets) => {
                if wallets.contains_key(wallet_id) {
                    CacheLookup::Owed
                } else {
                    CacheLookup::WalletAbsent
                }
            }
        }
    }

    /// Start claiming the asset owed to `wallet_id` in `group`. The returned
    /// claim holds the cache lock, so concurrent claims for the same pair
    /// serialize here; exactly one of two racers sees `Owed`. The entry is
    /// only removed once [`MigrationClaim::commit`] is called, after the
    /// durable write succeeded; dropping the claim leaves the cache untouched.
    pub async fn begin_claim(
        &self,
        group: &str,
        wallet_id: &str,
    ) -> Result<MigrationClaim<'_>, CacheLookup> {
        let guard = self.inner.lock().await;
        let asset = match guard.get(group) {
            None => return Err(CacheLookup::GroupAbsent),
            Some(wallets) => match wallets.get(wallet_id) {
                None => return Err(CacheLookup::WalletAbsent),
                Some(asset) => asset.clone(),
            },
        };
        Ok(MigrationClaim {
            guard,
            group: group.to_string(),
            wallet_id: wallet_id.to_string(),
            asset,
        })
    }

    /// Number of requesters still owed a migration, across all groups.
    pub async fn outstanding_wallets(&self) -> usize {
        let cache = self.inner.lock().await;
        let mut wallets: Vec<&str> = cache
            .values()
            .flat_map(|group| group.keys().map(String::as_str))
            .collect();
        wallets.sort_unstable();
        wallets.dedup();
        wallets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// In-progress migration claim; see [`MigrationCache::begin_claim`].
pub struct MigrationClaim<'a> {
    guard: MutexGuard<'a, CacheMap>,
    group: String,
    wallet_id: String,
    pub asset: AssetEntry,
}

impl MigrationClaim<'_> {
    /// Delete the claimed entry; the group entry goes with it once it drains.
    pub fn commit(mut self) {
        if let Some(wallets) = self.guard.get_mut(&self.group) {
            wallets.remove(&self.wallet_id);
            let drained = wallets.is_empty();
            if drained {
                self.guard.remove(&self.group);
            }
            info!(
                group = %self.group,
                wallet_id = %self.wallet_id,
                group_drained = drained,
                "migration cache entry claimed"
            );
        }
    }
}

/// Boot-time reconciliation. Runs exactly once per process start, before the
/// scheduler and the HTTP surface are up, so it has exclusive access to the
/// store.
pub async fn run_boot_migration(
    database: &DatabaseConnection,
    config: &FaucetConfig,
    cache: &MigrationCache,
) -> Result<()> {
    let Some(map) = config.asset_migration_map.as_ref() else {
        debug!("no asset migration map configured");
        return Ok(());
    };

    // old asset id -> new asset id
    let reverse_map: BTreeMap<&str, &str> = map
        .iter()
        .map(|(new, old)| (old.as_str(), new.as_str()))
        .collect();
    assert_eq!(
        reverse_map.len(),
        map.len(),
        "Migration map maps two new assets to the same old asset"
    );

    let entries = build_cache_entries(database, config, &reverse_map).await?;
    let outstanding = entries
        .values()
        .map(|wallets| wallets.len())
        .sum::<usize>();
    cache.rebuild(entries).await;

    rewrite_in_flight(database, &reverse_map).await?;

    if outstanding > 0 {
        info!(outstanding, "wallets are still not fully migrated");
    } else {
        warn!("all wallets are migrated; the asset migration map can be dropped from the config");
    }
    Ok(())
}

/// Scan served history and collect, per migrating group, the requesters that
/// received a retired asset but never its successor.
async fn build_cache_entries(
    database: &DatabaseConnection,
    config: &FaucetConfig,
    reverse_map: &BTreeMap<&str, &str>,
) -> Result<CacheMap> {
    let served = store::served_by_wallet(database)
        .await
        .context("Failed to scan served requests for migration state")?;

    let mut entries = CacheMap::new();
    let mut index = 0usize;
    while index < served.len() {
        let wallet_id = served[index].wallet_id.clone();
        let mut wallet_rows = Vec::new();
        while index < served.len() && served[index].wallet_id == wallet_id {
            wallet_rows.push(&served[index]);
            index += 1;
        }

        for row in &wallet_rows {
            let Some(old_asset_id) = row.asset_id.as_deref() else {
                continue;
            };
            let Some(new_asset_id) = reverse_map.get(old_asset_id) else {
                continue;
            };
            let already_migrated = wallet_rows
                .iter()
                .any(|r| r.asset_id.as_deref() == Some(new_asset_id));
            if already_migrated {
                continue;
            }

            let (group_name, asset) = config
                .group_of_asset(new_asset_id)
                .expect("migration map was validated against the catalog");
            let digest = normalize_requester_id(&wallet_id);
            entries
                .entry(group_name.to_string())
                .or_default()
                .entry(digest)
                .or_insert_with(|| asset.clone());
        }
    }
    Ok(entries)
}

/// Re-point queued requests for retired assets at their successors, in one
/// transaction. Running this twice is a no-op the second time: rewritten rows
/// no longer reference any retired id.
async fn rewrite_in_flight(
    database: &DatabaseConnection,
    reverse_map: &BTreeMap<&str, &str>,
) -> Result<()> {
    let old_ids: Vec<String> = reverse_map.keys().map(|id| id.to_string()).collect();
    let stale = store::in_flight_with_assets(database, &old_ids)
        .await
        .context("Failed to query in-flight requests for retired assets")?;
    if stale.is_empty() {
        return Ok(());
    }

    let txn = database.begin().await?;
    for row in &stale {
        let old_asset_id = row
            .asset_id
            .as_deref()
            .expect("in-flight query only returns rows with an asset id");
        let new_asset_id = reverse_map[old_asset_id];
        store::rewrite_asset_id(&txn, row.idx, new_asset_id).await?;
        info!(
            idx = row.idx,
            old_asset_id, new_asset_id, "rewrote in-flight request to migrated asset"
        );
    }
    txn.commit().await?;
    Ok(())
}
