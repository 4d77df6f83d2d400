//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Upstream keys are never stored in the TOML: each credential names an
//! env var (`key_env`) or a file (`key_file`) holding its key. The storage
//! signing secret comes from `GATEWAY_SIGNING_KEY`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use dispatch::{FallbackLists, GatewaySettings};
use provider::{EditBody, ModelCredential, Supplier};
use rotation::{LivenessPolicy, PoolKind, PoolSet, RotationPool};
use serde::Deserialize;

pub const SIGNING_KEY_ENV: &str = "GATEWAY_SIGNING_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub suppliers: Vec<SupplierConfig>,
    /// Keyed by pool kind label (`chat`, `deep_search`, `fast_edit`, ...).
    #[serde(default)]
    pub pools: BTreeMap<String, PoolConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    pub storage: StorageConfig,
    pub history: HistoryConfig,
}

/// Admin listener for `/health`, `/metrics` and signed object URLs
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_ban_secs")]
    pub ban_secs: u64,
    #[serde(default)]
    pub liveness: LivenessPolicy,
}

#[derive(Debug, Deserialize)]
pub struct SupplierConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub edit_body: EditBody,
}

/// Priority tiers of one rotation pool, highest priority first
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub tiers: Vec<Vec<CredentialConfig>>,
}

/// Ordered credential lists for the families without a pool
#[derive(Debug, Default, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub gemini: Vec<CredentialConfig>,
    #[serde(default)]
    pub gpt_image: Vec<CredentialConfig>,
    #[serde(default)]
    pub volc: Vec<CredentialConfig>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialConfig {
    pub supplier: String,
    pub descriptor: String,
    pub model: String,
    #[serde(default)]
    pub key_env: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(skip)]
    pub key: Option<Secret<String>>,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
    #[serde(skip)]
    pub signing_key: Option<Secret<String>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    pub path: PathBuf,
}

fn default_max_connections() -> usize {
    64
}

fn default_timeout() -> u64 {
    300
}

fn default_poll_delay() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    50
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_ban_secs() -> u64 {
    600
}

fn default_url_ttl() -> u64 {
    86_400
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            poll_delay_ms: default_poll_delay(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            ban_secs: default_ban_secs(),
            liveness: LivenessPolicy::default(),
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn require_positive(value: u64, name: &str) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, validate it and resolve every
    /// credential key.
    ///
    /// Key resolution order per credential:
    /// 1. env var named by `key_env`
    /// 2. contents of `key_file`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_positive(config.dispatch.timeout_secs, "dispatch.timeout_secs")?;
        require_positive(config.scheduler.queue_capacity as u64, "scheduler.queue_capacity")?;
        require_positive(config.scheduler.workers as u64, "scheduler.workers")?;
        require_positive(
            config.rotation.sweep_interval_secs,
            "rotation.sweep_interval_secs",
        )?;
        require_positive(config.server.max_connections as u64, "server.max_connections")?;

        let mut names = HashSet::new();
        for supplier in &config.suppliers {
            if !has_http_scheme(&supplier.base_url) {
                return Err(common::Error::Config(format!(
                    "supplier {}: base_url must start with http:// or https://, got: {}",
                    supplier.name, supplier.base_url
                )));
            }
            if !names.insert(supplier.name.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate supplier name: {}",
                    supplier.name
                )));
            }
        }

        if !has_http_scheme(&config.storage.public_base_url) {
            return Err(common::Error::Config(format!(
                "storage.public_base_url must start with http:// or https://, got: {}",
                config.storage.public_base_url
            )));
        }

        for (name, pool) in &config.pools {
            name.parse::<PoolKind>()
                .map_err(|e| common::Error::Config(format!("pools.{name}: {e}")))?;
            if pool.tiers.iter().all(Vec::is_empty) {
                return Err(common::Error::Config(format!(
                    "pools.{name} has no credentials"
                )));
            }
        }

        let known: HashSet<String> = config.suppliers.iter().map(|s| s.name.clone()).collect();
        for credential in config.credentials_mut() {
            if !known.contains(&credential.supplier) {
                return Err(common::Error::Config(format!(
                    "credential {} references unknown supplier {}",
                    credential.descriptor, credential.supplier
                )));
            }
            credential.key = Some(resolve_key(credential)?);
        }

        match std::env::var(SIGNING_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => {
                config.storage.signing_key = Some(Secret::new(key.trim().to_owned()));
            }
            _ => {
                return Err(common::Error::Config(format!(
                    "{SIGNING_KEY_ENV} must be set to sign object URLs"
                )));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gateway.toml")
    }

    fn credentials_mut(&mut self) -> impl Iterator<Item = &mut CredentialConfig> {
        let pooled = self
            .pools
            .values_mut()
            .flat_map(|pool| pool.tiers.iter_mut().flatten());
        let fallback = self
            .fallback
            .gemini
            .iter_mut()
            .chain(self.fallback.gpt_image.iter_mut())
            .chain(self.fallback.volc.iter_mut());
        pooled.chain(fallback)
    }

    fn suppliers(&self) -> HashMap<&str, Arc<Supplier>> {
        self.suppliers
            .iter()
            .map(|s| {
                let supplier = Supplier::new(&s.name, &s.base_url).with_edit_body(s.edit_body);
                (s.name.as_str(), Arc::new(supplier))
            })
            .collect()
    }

    /// Build one rotation pool per `[pools.<kind>]` section.
    pub fn pool_set(&self) -> common::Result<PoolSet> {
        let suppliers = self.suppliers();
        let mut set = PoolSet::new();
        for (name, pool) in &self.pools {
            let kind: PoolKind = name
                .parse()
                .map_err(|e| common::Error::Config(format!("pools.{name}: {e}")))?;
            let tiers = pool
                .tiers
                .iter()
                .map(|tier| build_list(tier, &suppliers))
                .collect::<common::Result<Vec<_>>>()?;
            set.insert(
                kind,
                Arc::new(RotationPool::new(kind.label(), tiers, self.rotation.liveness)),
            );
        }
        Ok(set)
    }

    pub fn fallback_lists(&self) -> common::Result<FallbackLists> {
        let suppliers = self.suppliers();
        Ok(FallbackLists {
            gemini: build_list(&self.fallback.gemini, &suppliers)?,
            gpt_image: build_list(&self.fallback.gpt_image, &suppliers)?,
            volc: build_list(&self.fallback.volc, &suppliers)?,
        })
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            ban_duration: Duration::from_secs(self.rotation.ban_secs),
            poll_delay: Duration::from_millis(self.dispatch.poll_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rotation.sweep_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.drain_timeout_secs)
    }

    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.storage.url_ttl_secs)
    }
}

fn resolve_key(credential: &CredentialConfig) -> common::Result<Secret<String>> {
    let missing = |reason: String| common::Error::MissingKey {
        descriptor: credential.descriptor.clone(),
        reason,
    };

    if let Some(var) = &credential.key_env
        && let Ok(key) = std::env::var(var)
        && !key.trim().is_empty()
    {
        return Ok(Secret::new(key.trim().to_owned()));
    }

    if let Some(path) = &credential.key_file {
        let key = std::fs::read_to_string(path)
            .map_err(|e| missing(format!("failed to read key_file {}: {e}", path.display())))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(missing(format!("key_file {} is empty", path.display())));
        }
        return Ok(Secret::new(key.to_owned()));
    }

    match &credential.key_env {
        Some(var) => Err(missing(format!("env var {var} not set"))),
        None => Err(missing("neither key_env nor key_file given".into())),
    }
}

fn build_list(
    entries: &[CredentialConfig],
    suppliers: &HashMap<&str, Arc<Supplier>>,
) -> common::Result<Vec<ModelCredential>> {
    entries
        .iter()
        .map(|entry| {
            let supplier = suppliers.get(entry.supplier.as_str()).ok_or_else(|| {
                common::Error::Config(format!(
                    "credential {} references unknown supplier {}",
                    entry.descriptor, entry.supplier
                ))
            })?;
            let key = entry.key.as_ref().ok_or_else(|| common::Error::MissingKey {
                descriptor: entry.descriptor.clone(),
                reason: "key not resolved".into(),
            })?;
            Ok(ModelCredential::new(
                Arc::clone(supplier),
                &entry.descriptor,
                key.expose().clone(),
                &entry.model,
            ))
        })
        .collect()
}
