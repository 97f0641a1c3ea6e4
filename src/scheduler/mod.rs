//! Distribution scheduler.
//!
//! One periodic task drives the whole outbound side: transfer refresh,
//! crash recovery, spare UTXO provisioning, batch composition and the
//! random-window resolver. Scheduler failures are absorbed and logged; there
//! is no caller to propagate them to.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::FaucetConfig;
use crate::rng::RandomSource;
use crate::store;
use crate::wallet::{WalletError, WalletPort};

pub mod batch;
pub mod random;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Paused,
    Stopped,
}

/// Control handle for the scheduler task, owned by the process that spawned
/// it. Pausing skips tick bodies without tearing the task down.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: watch::Sender<SchedulerState>,
}

impl SchedulerHandle {
    pub fn pause(&self) {
        self.state.send(SchedulerState::Paused).ok();
    }

    pub fn resume(&self) {
        self.state.send(SchedulerState::Running).ok();
    }

    pub fn stop(&self) {
        self.state.send(SchedulerState::Stopped).ok();
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }
}

pub struct DistributionScheduler {
    database: DatabaseConnection,
    wallet: Arc<dyn WalletPort>,
    config: Arc<FaucetConfig>,
    rng: Arc<RandomSource>,
    state: watch::Sender<SchedulerState>,
}

impl DistributionScheduler {
    pub fn new(
        database: DatabaseConnection,
        wallet: Arc<dyn WalletPort>,
        config: Arc<FaucetConfig>,
        rng: Arc<RandomSource>,
    ) -> Self {
        assert!(
            config.scheduler.min_requests > 0,
            "Scheduler needs a positive batch threshold"
        );
        let (state, _) = watch::channel(SchedulerState::Running);
        Self {
            database,
            wallet,
            config,
            rng,
            state,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: self.state.clone(),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("starting distribution scheduler loop");
        let mut state_rx = self.state.subscribe();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("scheduler shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("shutdown channel closed unexpectedly, exiting scheduler loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.config.scheduler.tick_interval()) => {
                    let state = *state_rx.borrow_and_update();
                    match state {
                        SchedulerState::Stopped => {
                            info!("scheduler stopped via handle");
                            break;
                        }
                        SchedulerState::Paused => {
                            debug!("scheduler paused, skipping tick");
                        }
                        SchedulerState::Running => self.tick().await,
                    }
                }
            }
        }
    }

    /// One full scheduler pass. Public so tests can drive ticks without the
    /// timer. Every failure is logged and swallowed; requests left in
    /// `Processing` are recovered at the start of the next pass.
    pub async fn tick(&self) {
        if let Err(err) = self.resolve_random_windows().await {
            error!("random window resolution failed: {err:#}");
        }
        if let Err(err) = self.batch_pass().await {
            error!("batch pass failed: {err:#}");
        }
    }

    async fn resolve_random_windows(&self) -> anyhow::Result<()> {
        random::resolve_closed_windows(
            &self.database,
            self.wallet.as_ref(),
            &self.config,
            &self.rng,
        )
        .await
    }

    async fn batch_pass(&self) -> anyhow::Result<()> {
        // Refresh is best-effort; a wallet hiccup must not block recovery.
        match self.wallet.refresh(None).await {
            Ok(changed) => debug!(changed, "refreshed in-flight transfers"),
            Err(err) => warn!("error refreshing transfers: {err}"),
        }

        // Recovery must commit before the new candidate batch is computed so
        // a row from an aborted attempt cannot be counted twice.
        let recovered = store::reset_processing(&self.database).await?;
        if recovered > 0 {
            warn!(recovered, "reset stuck processing requests to pending");
        }

        self.ensure_spare_utxos().await;

        let Some(candidates) = self.candidate_batch().await? else {
            return Ok(());
        };

        batch::send_next_batch(&self.database, self.wallet.as_ref(), &self.config, candidates)
            .await;
        Ok(())
    }

    /// Keep a pool of colorable, unallocated UTXOs ready so batch sends never
    /// stall waiting for allocation slots.
    async fn ensure_spare_utxos(&self) {
        let utxo_config = &self.config.utxos;
        let spare = match self.wallet.list_unspents().await {
            Ok(unspents) => unspents.iter().filter(|u| u.is_spare()).count(),
            Err(err) => {
                warn!("could not list unspents for spare check: {err}");
                return;
            }
        };
        if spare >= utxo_config.spare_utxo_thresh as usize {
            return;
        }

        let missing = utxo_config.spare_utxo_num as usize - spare;
        assert!(missing > 0, "Spare UTXO shortfall must be positive");
        match self
            .wallet
            .create_utxos(missing as u8, utxo_config.utxo_size, utxo_config.fee_rate)
            .await
        {
            Ok(created) => info!(created, spare, "provisioned spare utxos"),
            Err(WalletError::AllocationsAlreadyAvailable) => {
                debug!("spare allocations already available")
            }
            Err(err) => warn!("spare utxo provisioning failed: {err}"),
        }
    }

    /// Candidate batch for this tick, or `None` when the send thresholds are
    /// not met. Composition is oldest first; the single-asset policy follows
    /// the globally oldest pending row.
    async fn candidate_batch(
        &self,
    ) -> anyhow::Result<Option<Vec<crate::entities::request::Model>>> {
        let scheduler_config = &self.config.scheduler;
        let pending = store::by_status_oldest_first(
            &self.database,
            crate::entities::request::RequestStatus::Pending,
        )
        .await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let asset_filter = scheduler_config
            .single_asset_send
            .then(|| pending[0].asset_id.clone())
            .flatten();
        let candidates = store::pending_batch(
            &self.database,
            asset_filter.as_deref(),
            scheduler_config.min_requests,
        )
        .await?;
        assert!(
            !candidates.is_empty(),
            "Filtered batch cannot be empty when pending rows exist"
        );

        let count_reached = candidates.len() as u64 >= scheduler_config.min_requests;
        let oldest_age = store::current_timestamp() - candidates[0].timestamp;
        let waited_enough = oldest_age >= scheduler_config.max_wait_secs();

        if count_reached || waited_enough {
            debug!(
                candidates = candidates.len(),
                oldest_age, "batch thresholds met"
            );
            Ok(Some(candidates))
        } else {
            debug!(
                candidates = candidates.len(),
                oldest_age, "batch thresholds not met, waiting"
            );
            Ok(None)
        }
    }
}
