//! Request eligibility engine.
//!
//! Decides, per (requester, asset group), whether a new request may be
//! admitted and which asset it is entitled to, then writes the request
//! through its `New -> Pending` (or `New -> Waiting`) transition.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr, IsolationLevel, TransactionTrait};
use thiserror::Error;
use tracing::{debug, info};

use crate::asset_migration::{CacheLookup, MigrationCache, MigrationClaim};
use crate::config::{AssetEntry, DistributionMode, FaucetConfig};
use crate::entities::request::RequestStatus;
use crate::rng::RandomSource;
use crate::store;

/// Abandoned `New` rows older than this are swept on the next eligibility
/// check for their requester.
pub const NEW_REQUEST_GRACE_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    AlreadyRequested,
    OutsideWindow,
    MigrationComplete,
    NotInMigrationList,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyRequested => "already requested from group",
            Self::OutsideWindow => "outside the request window",
            Self::MigrationComplete => "migration complete",
            Self::NotInMigrationList => "not in migration list",
        }
    }
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("request for group {group} denied: {}", reason.as_str())]
    Denied { group: String, reason: DenialReason },
    #[error("unknown asset group {0}")]
    UnknownGroup(String),
    #[error("storage failure during admission")]
    Storage(#[from] DbErr),
}

/// Successfully admitted request.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub idx: i64,
    pub group: String,
    pub asset: AssetEntry,
    pub status: RequestStatus,
}

pub struct EligibilityEngine {
    database: DatabaseConnection,
    config: Arc<FaucetConfig>,
    migration_cache: Arc<MigrationCache>,
    rng: Arc<RandomSource>,
    non_migration_groups: Vec<String>,
}

impl EligibilityEngine {
    pub fn new(
        database: DatabaseConnection,
        config: Arc<FaucetConfig>,
        migration_cache: Arc<MigrationCache>,
        rng: Arc<RandomSource>,
    ) -> Self {
        let non_migration_groups: Vec<String> =
            config.non_migration_groups().into_iter().collect();
        assert!(
            !config.assets.is_empty(),
            "Eligibility engine needs a non-empty asset catalog"
        );
        Self {
            database,
            config,
            migration_cache,
            rng,
            non_migration_groups,
        }
    }

    /// Admit a request or return why it is denied.
    ///
    /// `group_name` is optional; without it a group is chosen uniformly at
    /// random among the non-migration groups. `recipient_id` and `invoice`
    /// come from the already-parsed invoice.
    pub async fn try_admit(
        &self,
        wallet_id: &str,
        group_name: Option<&str>,
        recipient_id: &str,
        invoice: &str,
    ) -> Result<Admitted, AdmissionError> {
        self.sweep_stale(wallet_id).await?;

        let group_name = self.resolve_group(group_name)?;
        let group = &self.config.assets[&group_name];

        self.check_history_and_window(wallet_id, &group_name).await?;

        // Migration targets serve the asset recorded in the cache; everything
        // else draws a random asset from the group. The claim holds the cache
        // lock until after the durable write commits, so two concurrent
        // admits for the same migrating requester cannot both succeed.
        let claim = if self.is_migration_group(&group_name) {
            Some(self.begin_migration_claim(wallet_id, &group_name).await?)
        } else {
            None
        };
        let asset = match &claim {
            Some(claim) => claim.asset.clone(),
            None => {
                let choice = self.rng.pick_index(group.assets.len());
                group.assets[choice].clone()
            }
        };

        let status = match group.distribution.mode {
            DistributionMode::Random => RequestStatus::Waiting,
            DistributionMode::Standard => RequestStatus::Pending,
        };

        let idx = self
            .write_admitted(wallet_id, &group_name, recipient_id, invoice, &asset, status)
            .await?;

        if let Some(claim) = claim {
            claim.commit();
        }

        info!(
            wallet_id,
            group = %group_name,
            asset_id = %asset.asset_id,
            amount = asset.amount,
            status = status.as_str(),
            "request admitted"
        );
        Ok(Admitted {
            idx,
            group: group_name,
            asset,
            status,
        })
    }

    /// Denial-only variant of the admission checks, used to report how many
    /// requests a wallet has left per group without writing anything.
    pub async fn check_allowed(
        &self,
        wallet_id: &str,
        group_name: &str,
    ) -> Result<Option<DenialReason>, DbErr> {
        if store::count_for_wallet_and_group(&self.database, wallet_id, group_name).await? > 0 {
            return Ok(Some(DenialReason::AlreadyRequested));
        }
        if let Some(reason) = self.window_denial(group_name) {
            return Ok(Some(reason));
        }
        if self.is_migration_group(group_name) {
            match self.migration_cache.lookup(group_name, wallet_id).await {
                CacheLookup::GroupAbsent => return Ok(Some(DenialReason::MigrationComplete)),
                CacheLookup::WalletAbsent => return Ok(Some(DenialReason::NotInMigrationList)),
                CacheLookup::Owed => {}
            }
        }
        Ok(None)
    }

    /// Sweep abandoned `New` rows for this requester: the client received a
    /// recipient id but never completed the subsequent step, or the insert
    /// raced another request.
    pub async fn sweep_stale(&self, wallet_id: &str) -> Result<(), DbErr> {
        let cutoff = store::current_timestamp() - NEW_REQUEST_GRACE_SECS;
        let swept = store::sweep_stale_new(&self.database, wallet_id, cutoff).await?;
        if swept > 0 {
            debug!(wallet_id, swept, "swept stale new requests");
        }
        Ok(())
    }

    fn resolve_group(&self, group_name: Option<&str>) -> Result<String, AdmissionError> {
        match group_name {
            Some(name) => {
                if self.config.assets.contains_key(name) {
                    Ok(name.to_string())
                } else {
                    Err(AdmissionError::UnknownGroup(name.to_string()))
                }
            }
            None => {
                assert!(
                    !self.non_migration_groups.is_empty(),
                    "No non-migration group available for random choice"
                );
                let choice = self.rng.pick_index(self.non_migration_groups.len());
                Ok(self.non_migration_groups[choice].clone())
            }
        }
    }

    async fn check_history_and_window(
        &self,
        wallet_id: &str,
        group_name: &str,
    ) -> Result<(), AdmissionError> {
        if store::count_for_wallet_and_group(&self.database, wallet_id, group_name).await? > 0 {
            return Err(self.deny(wallet_id, group_name, DenialReason::AlreadyRequested));
        }
        if let Some(reason) = self.window_denial(group_name) {
            return Err(self.deny(wallet_id, group_name, reason));
        }
        Ok(())
    }

    fn window_denial(&self, group_name: &str) -> Option<DenialReason> {
        let group = &self.config.assets[group_name];
        if group.distribution.mode != DistributionMode::Random {
            return None;
        }
        let window = group
            .distribution
            .window()
            .expect("random group window resolved during config validation");
        if window.contains(Utc::now().naive_utc()) {
            None
        } else {
            Some(DenialReason::OutsideWindow)
        }
    }

    fn is_migration_group(&self, group_name: &str) -> bool {
        !self
            .non_migration_groups
            .iter()
            .any(|name| name == group_name)
    }

    async fn begin_migration_claim(
        &self,
        wallet_id: &str,
        group_name: &str,
    ) -> Result<MigrationClaim<'_>, AdmissionError> {
        self.migration_cache
            .begin_claim(group_name, wallet_id)
            .await
            .map_err(|lookup| match lookup {
                CacheLookup::GroupAbsent => {
                    self.deny(wallet_id, group_name, DenialReason::MigrationComplete)
                }
                CacheLookup::WalletAbsent | CacheLookup::Owed => {
                    self.deny(wallet_id, group_name, DenialReason::NotInMigrationList)
                }
            })
    }

    /// Durable admission write: insert the `New` row, re-read it to confirm
    /// this attempt is the only live one for (wallet, group), then resolve it
    /// to its admitted status. The transaction runs serializable: under read
    /// committed two racers can each miss the other's uncommitted row in the
    /// re-read and both win. A serialization conflict is retried once; the
    /// retry sees the winner's committed row and loses the re-read.
    async fn write_admitted(
        &self,
        wallet_id: &str,
        group_name: &str,
        recipient_id: &str,
        invoice: &str,
        asset: &AssetEntry,
        status: RequestStatus,
    ) -> Result<i64, AdmissionError> {
        for attempt in 0..2 {
            match self
                .admit_txn(wallet_id, group_name, recipient_id, invoice, asset, status)
                .await
            {
                Ok(Some(idx)) => return Ok(idx),
                Ok(None) => {
                    return Err(self.deny(wallet_id, group_name, DenialReason::AlreadyRequested));
                }
                Err(err) if is_serialization_conflict(&err) => {
                    debug!(
                        wallet_id,
                        group = group_name,
                        attempt,
                        "admission transaction conflict, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        // Two conflicts in a row: somebody else is writing this pair.
        Err(self.deny(wallet_id, group_name, DenialReason::AlreadyRequested))
    }

    /// One serializable admission attempt. `Ok(None)` means the uniqueness
    /// re-read lost to a racer and the row was rolled back.
    async fn admit_txn(
        &self,
        wallet_id: &str,
        group_name: &str,
        recipient_id: &str,
        invoice: &str,
        asset: &AssetEntry,
        status: RequestStatus,
    ) -> Result<Option<i64>, DbErr> {
        let txn = self
            .database
            .begin_with_config(Some(IsolationLevel::Serializable), None)
            .await?;
        let idx = store::insert_new(&txn, wallet_id, recipient_id, invoice, group_name).await?;
        let rows = store::find_for_group(&txn, wallet_id, group_name).await?;
        assert!(!rows.is_empty(), "Just-inserted request row must be visible");
        // A racing admit shows up either as an already-resolved row or as a
        // lower-idx `New` row; either way this attempt loses and rolls its
        // own row back.
        let lost = rows
            .iter()
            .any(|row| row.idx != idx && (row.status != RequestStatus::New || row.idx < idx));
        if lost {
            txn.rollback().await?;
            return Ok(None);
        }
        store::assign_asset(&txn, idx, &asset.asset_id, asset.amount, status).await?;
        txn.commit().await?;
        Ok(Some(idx))
    }

    fn deny(&self, wallet_id: &str, group_name: &str, reason: DenialReason) -> AdmissionError {
        info!(
            wallet_id,
            group = group_name,
            reason = reason.as_str(),
            "request denied"
        );
        AdmissionError::Denied {
            group: group_name.to_string(),
            reason,
        }
    }

    pub fn non_migration_groups(&self) -> BTreeSet<&str> {
        self.non_migration_groups
            .iter()
            .map(String::as_str)
            .collect()
    }
}

/// Serialization failure of a concurrent admission transaction. Postgres
/// reports SQLSTATE 40001 ("could not serialize access"); surfaced through
/// the driver as message text only, so this matches on it.
fn is_serialization_conflict(err: &DbErr) -> bool {
    let text = err.to_string();
    text.contains("40001") || text.contains("could not serialize") || text.contains("deadlock")
}
