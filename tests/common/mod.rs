//! Shared test harness: in-memory database, scripted wallet stub and config
//! builders.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use chroma_faucet::asset_migration::MigrationCache;
use chroma_faucet::config::{
    AssetEntry, AssetGroup, DEFAULT_DATE_FORMAT, DatabaseConfig, DistributionConfig, FaucetConfig,
    FaucetSection, SchedulerConfig, ServerConfig, UtxoConfig, WalletConfig,
};
use chroma_faucet::eligibility::EligibilityEngine;
use chroma_faucet::entities::request::RequestStatus;
use chroma_faucet::rng::RandomSource;
use chroma_faucet::scheduler::DistributionScheduler;
use chroma_faucet::state::AppState;
use chroma_faucet::store;
use chroma_faucet::wallet::{
    AssetKind, AssetRecord, Balance, InvoiceData, RecipientMap, TransferRecord, Unspent,
    WalletError, WalletPort,
};

/// Valid 64-hex requester id derived from a small integer.
pub fn wallet_id(n: u64) -> String {
    format!("{n:064x}")
}

/// Window bound string offset from now by `offset_secs`.
pub fn window_bound(offset_secs: i64) -> String {
    (Utc::now() + chrono::Duration::seconds(offset_secs))
        .naive_utc()
        .format(DEFAULT_DATE_FORMAT)
        .to_string()
}

pub fn standard_group(label: &str, asset_id: &str, amount: i64) -> AssetGroup {
    AssetGroup {
        label: label.to_string(),
        distribution: DistributionConfig::standard(),
        assets: vec![AssetEntry {
            asset_id: asset_id.to_string(),
            amount,
        }],
    }
}

pub fn random_group(
    label: &str,
    asset_id: &str,
    amount: i64,
    open_offset_secs: i64,
    close_offset_secs: i64,
) -> AssetGroup {
    AssetGroup {
        label: label.to_string(),
        distribution: DistributionConfig::random(
            window_bound(open_offset_secs),
            window_bound(close_offset_secs),
        ),
        assets: vec![AssetEntry {
            asset_id: asset_id.to_string(),
            amount,
        }],
    }
}

/// Validated config over the given asset catalog. Mutate scheduler or UTXO
/// settings before handing it to [`Harness::new`].
pub fn test_config(assets: BTreeMap<String, AssetGroup>) -> FaucetConfig {
    let mut config = FaucetConfig {
        faucet: FaucetSection {
            name: "test faucet".to_string(),
            api_key: "user-key".to_string(),
            operator_api_key: "operator-key".to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        },
        server: ServerConfig {
            host: None,
            port: 8080,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: None,
        },
        wallet: WalletConfig {
            rpc_url: "http://127.0.0.1:7000".to_string(),
            request_timeout_ms: None,
            network: "regtest".to_string(),
            witness_allowed_networks: vec!["regtest".to_string()],
            transport_endpoints: vec![],
        },
        scheduler: SchedulerConfig {
            interval_secs: 60,
            min_requests: 10,
            max_wait_minutes: 10,
            single_asset_send: true,
        },
        utxos: UtxoConfig {
            spare_utxo_num: 10,
            spare_utxo_thresh: 5,
            utxo_size: 1_000,
            fee_rate: 1.5,
        },
        assets,
        asset_migration_map: None,
    };
    config.validate().expect("test config must be valid");
    config
}

/// Scripted in-process wallet double.
#[derive(Default)]
pub struct StubWallet {
    pub assets: Mutex<Vec<AssetRecord>>,
    pub unspents: Mutex<Vec<Unspent>>,
    pub balances: Mutex<BTreeMap<String, Balance>>,
    /// Results popped front-first by `send`; empty means success.
    pub send_script: Mutex<VecDeque<Result<String, WalletError>>>,
    pub sends: Mutex<Vec<RecipientMap>>,
    pub created_utxos: Mutex<Vec<(u8, u64)>>,
    pub witness_invoices: Mutex<BTreeSet<String>>,
}

impl StubWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, asset_id: &str, future: u64) {
        self.balances.lock().unwrap().insert(
            asset_id.to_string(),
            Balance {
                settled: future,
                future,
                spendable: future,
            },
        );
    }

    pub fn set_spare_unspents(&self, count: usize) {
        let mut unspents = self.unspents.lock().unwrap();
        *unspents = (0..count)
            .map(|i| Unspent {
                outpoint: format!("txid:{i}"),
                btc_amount: 1_000,
                colorable: true,
                allocations: vec![],
            })
            .collect();
    }

    pub fn script_send_error(&self, err: WalletError) {
        self.send_script.lock().unwrap().push_back(Err(err));
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl WalletPort for StubWallet {
    async fn list_assets(&self) -> Result<Vec<AssetRecord>, WalletError> {
        Ok(self.assets.lock().unwrap().clone())
    }

    async fn list_unspents(&self) -> Result<Vec<Unspent>, WalletError> {
        Ok(self.unspents.lock().unwrap().clone())
    }

    async fn get_asset_balance(&self, asset_id: &str) -> Result<Balance, WalletError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(asset_id)
            .copied()
            .unwrap_or(Balance {
                settled: 0,
                future: 0,
                spendable: 0,
            }))
    }

    async fn refresh(&self, _asset_filter: Option<&str>) -> Result<bool, WalletError> {
        Ok(false)
    }

    async fn create_utxos(
        &self,
        count: u8,
        size_sats: u64,
        _fee_rate: f64,
    ) -> Result<u8, WalletError> {
        self.created_utxos.lock().unwrap().push((count, size_sats));
        Ok(count)
    }

    async fn send(
        &self,
        recipients: &RecipientMap,
        _fee_rate: f64,
        _min_confirmations: u8,
    ) -> Result<String, WalletError> {
        if let Some(scripted) = self.send_script.lock().unwrap().pop_front() {
            return scripted;
        }
        let mut sends = self.sends.lock().unwrap();
        sends.push(recipients.clone());
        Ok(format!("txid-{}", sends.len()))
    }

    async fn parse_invoice(&self, invoice: &str) -> Result<InvoiceData, WalletError> {
        if invoice.is_empty() {
            return Err(WalletError::InvalidInvoice("empty invoice".to_string()));
        }
        Ok(InvoiceData {
            recipient_id: format!("rcpt-{invoice}"),
            is_witness: self.witness_invoices.lock().unwrap().contains(invoice),
            transport_endpoints: vec![],
        })
    }

    async fn list_transfers(&self, _asset_id: &str) -> Result<Vec<TransferRecord>, WalletError> {
        Ok(vec![])
    }

    async fn fail_transfers(&self) -> Result<(), WalletError> {
        Ok(())
    }

    async fn delete_transfers(&self) -> Result<(), WalletError> {
        Ok(())
    }

    async fn new_address(&self) -> Result<String, WalletError> {
        Ok("bcrt1qstubaddress".to_string())
    }
}

pub fn nia_record(asset_id: &str, name: &str, ticker: &str) -> AssetRecord {
    AssetRecord {
        asset_id: asset_id.to_string(),
        name: name.to_string(),
        precision: 0,
        balance: Balance {
            settled: 1_000,
            future: 1_000,
            spendable: 1_000,
        },
        kind: AssetKind::Nia {
            ticker: ticker.to_string(),
        },
    }
}

pub struct Harness {
    pub database: DatabaseConnection,
    pub config: Arc<FaucetConfig>,
    pub wallet: Arc<StubWallet>,
    pub cache: Arc<MigrationCache>,
    pub rng: Arc<RandomSource>,
    pub engine: Arc<EligibilityEngine>,
}

impl Harness {
    pub async fn new(config: FaucetConfig) -> Self {
        // One pooled connection keeps all queries on the same in-memory
        // database and serializes transactions the way the store expects.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let database = Database::connect(options)
            .await
            .expect("in-memory database");
        migration::Migrator::up(&database, None)
            .await
            .expect("migrations");

        let config = Arc::new(config);
        let wallet = Arc::new(StubWallet::new());
        let cache = Arc::new(MigrationCache::new());
        let rng = Arc::new(RandomSource::seeded(42));
        let engine = Arc::new(EligibilityEngine::new(
            database.clone(),
            Arc::clone(&config),
            Arc::clone(&cache),
            Arc::clone(&rng),
        ));
        Self {
            database,
            config,
            wallet,
            cache,
            rng,
            engine,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.database.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.wallet) as Arc<dyn WalletPort>,
            Arc::clone(&self.cache),
            Arc::clone(&self.engine),
            self.scheduler().handle(),
        )
    }

    pub fn scheduler(&self) -> DistributionScheduler {
        DistributionScheduler::new(
            self.database.clone(),
            Arc::clone(&self.wallet) as Arc<dyn WalletPort>,
            Arc::clone(&self.config),
            Arc::clone(&self.rng),
        )
    }

    /// Admit through the engine with a synthetic invoice.
    pub async fn admit(
        &self,
        wallet_id: &str,
        group: &str,
    ) -> Result<chroma_faucet::eligibility::Admitted, chroma_faucet::eligibility::AdmissionError>
    {
        let invoice = format!("inv-{wallet_id}-{group}");
        self.engine
            .try_admit(wallet_id, Some(group), &format!("rcpt-{invoice}"), &invoice)
            .await
    }

    /// Seed a request row directly in the given status.
    pub async fn seed_request(
        &self,
        wallet_id: &str,
        group: &str,
        asset_id: &str,
        amount: i64,
        status: RequestStatus,
    ) -> i64 {
        let invoice = format!("inv-{wallet_id}-{group}-{asset_id}");
        let idx = store::insert_new(
            &self.database,
            wallet_id,
            &format!("rcpt-{invoice}"),
            &invoice,
            group,
        )
        .await
        .expect("insert");
        if status == RequestStatus::New {
            return idx;
        }
        let admitted_status = if status == RequestStatus::Waiting {
            RequestStatus::Waiting
        } else {
            RequestStatus::Pending
        };
        store::assign_asset(&self.database, idx, asset_id, amount, admitted_status)
            .await
            .expect("assign");
        if status != admitted_status {
            store::set_status(&self.database, &[idx], status)
                .await
                .expect("set status");
        }
        idx
    }

    pub async fn statuses_for(&self, group: &str) -> Vec<(String, RequestStatus)> {
        let mut rows = Vec::new();
        for status in [
            RequestStatus::New,
            RequestStatus::Pending,
            RequestStatus::Waiting,
            RequestStatus::Processing,
            RequestStatus::Served,
            RequestStatus::Unmet,
        ] {
            for row in store::by_status_oldest_first(&self.database, status)
                .await
                .expect("query")
            {
                if row.asset_group == group {
                    rows.push((row.wallet_id, status));
                }
            }
        }
        rows
    }

    pub async fn count_in_status(&self, status: RequestStatus) -> usize {
        store::by_status_oldest_first(&self.database, status)
            .await
            .expect("query")
            .len()
    }
}
