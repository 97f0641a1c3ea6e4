use std::sync::Arc;
use std::time::Instant;

use sea_orm::DatabaseConnection;

use crate::asset_migration::MigrationCache;
use crate::config::FaucetConfig;
use crate::eligibility::EligibilityEngine;
use crate::scheduler::SchedulerHandle;
use crate::wallet::WalletPort;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub config: Arc<FaucetConfig>,
    pub wallet: Arc<dyn WalletPort>,
    pub migration_cache: Arc<MigrationCache>,
    pub eligibility: Arc<EligibilityEngine>,
    pub scheduler: SchedulerHandle,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        config: Arc<FaucetConfig>,
        wallet: Arc<dyn WalletPort>,
        migration_cache: Arc<MigrationCache>,
        eligibility: Arc<EligibilityEngine>,
        scheduler: SchedulerHandle,
    ) -> Self {
        assert!(
            !config.assets.is_empty(),
            "Application state needs a non-empty asset catalog"
        );
        Self {
            database,
            config,
            wallet,
            migration_cache,
            eligibility,
            scheduler,
            start_time: Instant::now(),
        }
    }
}
