use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fatal boot-time configuration problem. Carries every issue detected, not
/// just the first one.
#[derive(Debug, Error)]
#[error("configuration errors detected: {}", errors.join("; "))]
pub struct ConfigurationError {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    pub faucet: FaucetSection,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub wallet: WalletConfig,
    pub scheduler: SchedulerConfig,
    pub utxos: UtxoConfig,
    /// Asset catalog: group name -> group definition
    pub assets: BTreeMap<String, AssetGroup>,
    /// Declarative migration map: new asset id -> old asset id
    pub asset_migration_map: Option<BTreeMap<String, String>>,
}

impl FaucetConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FAUCET_CONFIG").unwrap_or_else(|_| "config/faucet.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FAUCET_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/faucet.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize faucet configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration, resolving request windows in place.
    /// All detected problems are reported together so an operator can fix a
    /// config file in one pass.
    pub fn validate(&mut self) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();

        if self.faucet.name.trim().is_empty() {
            errors.push("faucet name must not be empty".to_string());
        }
        if self.faucet.api_key.is_empty() {
            errors.push("user API key must be configured".to_string());
        }
        if self.faucet.operator_api_key.is_empty() {
            errors.push("operator API key must be configured".to_string());
        }
        if self.database.url.is_empty() {
            errors.push("database URL must be specified".to_string());
        }
        if self.server.port == 0 {
            errors.push("server port must be greater than zero".to_string());
        }
        if self.scheduler.min_requests == 0 {
            errors.push("scheduler min_requests must be positive".to_string());
        }
        if self.scheduler.interval_secs == 0 {
            errors.push("scheduler interval must be positive".to_string());
        }
        if self.utxos.spare_utxo_thresh > self.utxos.spare_utxo_num {
            errors.push(format!(
                "spare UTXO threshold {} exceeds target count {}",
                self.utxos.spare_utxo_thresh, self.utxos.spare_utxo_num
            ));
        }
        if self.utxos.utxo_size == 0 {
            errors.push("UTXO size must be positive".to_string());
        }
        if !(self.utxos.fee_rate > 0.0) {
            errors.push("fee rate must be positive".to_string());
        }

        if self.assets.is_empty() {
            errors.push("at least one asset group must be configured".to_string());
        }
        let date_format = self.faucet.date_format.clone();
        for (group_name, group) in &mut self.assets {
            if group.label.trim().is_empty() {
                errors.push(format!("group {group_name}: label must not be empty"));
            }
            if group.assets.is_empty() {
                errors.push(format!("group {group_name}: no assets configured"));
            }
            for asset in &group.assets {
                if asset.asset_id.is_empty() {
                    errors.push(format!("group {group_name}: asset with empty asset id"));
                }
                if asset.amount <= 0 {
                    errors.push(format!(
                        "group {group_name}: asset {} has non-positive amount {}",
                        asset.asset_id, asset.amount
                    ));
                }
            }
            if let Err(mut window_errors) =
                group.distribution.resolve_window(group_name, &date_format)
            {
                errors.append(&mut window_errors);
            }
        }

        if let Some(map_errors) = self.validate_migration_map() {
            errors.extend(map_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError { errors })
        }
    }

    /// Check the migration map against the asset catalog: every new asset id
    /// must belong to a configured group, and a group containing one mapped
    /// asset must be mapped in full.
    fn validate_migration_map(&self) -> Option<Vec<String>> {
        let map = self.asset_migration_map.as_ref()?;
        let mut errors = Vec::new();

        let mut groups_to = BTreeSet::new();
        for new_asset_id in map.keys() {
            match self.group_of_asset(new_asset_id) {
                Some((group_name, _)) => {
                    groups_to.insert(group_name.to_string());
                }
                None => errors.push(format!(
                    "migration map: asset {new_asset_id} is not defined in any group"
                )),
            }
        }

        for group_name in &groups_to {
            let group = &self.assets[group_name];
            for asset in &group.assets {
                if !map.contains_key(&asset.asset_id) {
                    errors.push(format!(
                        "migration map: asset {} in group {group_name} is not a migration \
                         destination while other assets in the same group are",
                        asset.asset_id
                    ));
                }
            }
        }

        if errors.is_empty() { None } else { Some(errors) }
    }

    /// Groups that are not the destination of any asset migration. Requests
    /// without an explicit group are drawn from this set.
    pub fn non_migration_groups(&self) -> BTreeSet<String> {
        let all: BTreeSet<String> = self.assets.keys().cloned().collect();
        let Some(map) = self.asset_migration_map.as_ref() else {
            return all;
        };
        let mut migrating = BTreeSet::new();
        for new_asset_id in map.keys() {
            if let Some((group_name, _)) = self.group_of_asset(new_asset_id) {
                migrating.insert(group_name.to_string());
            }
        }
        all.difference(&migrating).cloned().collect()
    }

    pub fn group_of_asset(&self, asset_id: &str) -> Option<(&str, &AssetEntry)> {
        for (group_name, group) in &self.assets {
            for asset in &group.assets {
                if asset.asset_id == asset_id {
                    return Some((group_name.as_str(), asset));
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetSection {
    pub name: String,
    pub api_key: String,
    pub operator_api_key: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub rpc_url: String,
    pub request_timeout_ms: Option<u64>,
    pub network: String,
    /// Networks on which witness-type transfers are accepted
    #[serde(default)]
    pub witness_allowed_networks: Vec<String>,
    /// Consignment transport endpoints handed to recipients
    #[serde(default)]
    pub transport_endpoints: Vec<String>,
}

impl WalletConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(30_000);
        assert!(millis >= 100, "Wallet RPC timeout must be at least 100ms");
        assert!(
            millis <= 120_000,
            "Wallet RPC timeout cannot exceed 2 minutes"
        );
        Duration::from_millis(millis)
    }

    pub fn witness_allowed(&self) -> bool {
        self.witness_allowed_networks
            .iter()
            .any(|network| network.eq_ignore_ascii_case(&self.network))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// Batch is sent once at least this many requests are pending
    pub min_requests: u64,
    /// ... or once the oldest pending request has waited this long
    pub max_wait_minutes: i64,
    /// Restrict each batch to the asset of the oldest pending request
    #[serde(default = "default_true")]
    pub single_asset_send: bool,
}

fn default_true() -> bool {
    true
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        assert!(self.interval_secs > 0, "Tick interval must be positive");
        assert!(
            self.interval_secs <= 3_600,
            "Tick interval must be <= one hour"
        );
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait_secs(&self) -> i64 {
        assert!(self.max_wait_minutes >= 0, "Max wait cannot be negative");
        self.max_wait_minutes * 60
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtxoConfig {
    /// Target number of spare colorable UTXOs to keep available
    pub spare_utxo_num: u8,
    /// Provision more spare UTXOs once fewer than this remain
    pub spare_utxo_thresh: u8,
    /// Size in sats of each provisioned UTXO
    pub utxo_size: u64,
    /// Fee rate in sat/vB for provisioning and batch sends
    pub fee_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetGroup {
    pub label: String,
    pub distribution: DistributionConfig,
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub asset_id: String,
    /// Amount served per request
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    Standard,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    pub mode: DistributionMode,
    /// Intake window bounds, `date_format` strings; required in random mode
    pub request_window_open: Option<String>,
    pub request_window_close: Option<String>,
    /// Parsed window, populated during validation
    #[serde(skip)]
    window: Option<RequestWindow>,
}

impl DistributionConfig {
    pub fn standard() -> Self {
        Self {
            mode: DistributionMode::Standard,
            request_window_open: None,
            request_window_close: None,
            window: None,
        }
    }

    pub fn random(open: String, close: String) -> Self {
        Self {
            mode: DistributionMode::Random,
            request_window_open: Some(open),
            request_window_close: Some(close),
            window: None,
        }
    }

    pub fn window(&self) -> Option<RequestWindow> {
        self.window
    }

    fn resolve_window(&mut self, group_name: &str, date_format: &str) -> Result<(), Vec<String>> {
        if self.mode == DistributionMode::Standard {
            return Ok(());
        }

        let mut errors = Vec::new();
        let open = parse_window_bound(
            group_name,
            "request_window_open",
            self.request_window_open.as_deref(),
            date_format,
            &mut errors,
        );
        let close = parse_window_bound(
            group_name,
            "request_window_close",
            self.request_window_close.as_deref(),
            date_format,
            &mut errors,
        );

        if let (Some(open), Some(close)) = (open, close) {
            if close <= open {
                errors.push(format!(
                    "group {group_name}: request window close {close} is not after open {open}"
                ));
            } else {
                self.window = Some(RequestWindow { open, close });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn parse_window_bound(
    group_name: &str,
    field: &str,
    value: Option<&str>,
    date_format: &str,
    errors: &mut Vec<String>,
) -> Option<NaiveDateTime> {
    let Some(raw) = value else {
        errors.push(format!(
            "group {group_name}: random distribution requires {field}"
        ));
        return None;
    };
    match NaiveDateTime::parse_from_str(raw, date_format) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            errors.push(format!(
                "group {group_name}: cannot parse {field} {raw:?} with format {date_format:?}: \
                 {err}"
            ));
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestWindow {
    pub open: NaiveDateTime,
    pub close: NaiveDateTime,
}

impl RequestWindow {
    /// Half-open interval: `open` is in, `close` is out.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        now >= self.open && now < self.close
    }

    pub fn closed(&self, now: NaiveDateTime) -> bool {
        now >= self.close
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
