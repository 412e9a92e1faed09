use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use dagchain_core::consensus::{Checkpoint, Network, NetworkParams};
use dagchain_core::dag::DagConfig;
use dagchain_core::hash::hex_to_hash;
use dagchain_core::script::SigCache;
use dagchain_core::storage::{KvStore, MemoryStore, SledConfig, SledStore, StorageError};

/// Prefix of environment variables overriding file settings, e.g.
/// `DAGCHAIN_STORAGE__DB_PATH`
pub const ENV_PREFIX: &str = "DAGCHAIN";

#[derive(Debug, Error)]
pub enum NodeConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid checkpoint at height {height}: {reason}")]
    InvalidCheckpoint { height: u64, reason: String },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeConfig {
    pub storage: StorageConfig,
    pub chain: ChainConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Keep all state in memory; nothing survives the process
    pub in_memory: bool,
    /// sled page cache in bytes
    pub cache_size: u64,
    /// Background flush interval; 0 flushes only on shutdown
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChainConfig {
    pub network: Network,
    pub checkpoints: Vec<CheckpointEntry>,
}

/// A checkpoint as written in the config file, hash in hex
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CheckpointEntry {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ValidationConfig {
    pub max_orphans: usize,
    #[serde(with = "duration_serde")]
    pub orphan_expiry: Duration,
    pub sig_cache_size: usize,
    pub outcome_cache_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for the dagchain crates; `RUST_LOG` takes precedence
    pub level: String,
    pub ansi: bool,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/dag"),
            in_memory: false,
            cache_size: 256 * 1024 * 1024,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            checkpoints: Vec::new(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_orphans: 100,
            orphan_expiry: Duration::from_secs(60 * 60),
            sig_cache_size: 50_000,
            outcome_cache_size: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        if !self.in_memory && self.db_path.as_os_str().is_empty() {
            return Err(NodeConfigError::InvalidValue(
                "storage.db_path cannot be empty".to_string(),
            ));
        }
        if self.cache_size < 1024 * 1024 {
            return Err(NodeConfigError::InvalidValue(
                "storage.cache_size must be at least 1 MiB".to_string(),
            ));
        }
        Ok(())
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.parsed_checkpoints().map(|_| ())
    }

    fn parsed_checkpoints(&self) -> Result<Vec<Checkpoint>, NodeConfigError> {
        let mut checkpoints = Vec::with_capacity(self.checkpoints.len());
        for entry in &self.checkpoints {
            let hash = hex_to_hash(&entry.hash).map_err(|e| NodeConfigError::InvalidCheckpoint {
                height: entry.height,
                reason: e.to_string(),
            })?;
            if checkpoints.iter().any(|c: &Checkpoint| c.height == entry.height) {
                return Err(NodeConfigError::InvalidCheckpoint {
                    height: entry.height,
                    reason: "height listed twice".to_string(),
                });
            }
            checkpoints.push(Checkpoint {
                height: entry.height,
                hash,
            });
        }
        Ok(checkpoints)
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        if self.outcome_cache_size == 0 {
            return Err(NodeConfigError::InvalidValue(
                "validation.outcome_cache_size must be > 0".to_string(),
            ));
        }
        if self.orphan_expiry.as_secs() < 1 {
            return Err(NodeConfigError::InvalidValue(
                "validation.orphan_expiry must be >= 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), NodeConfigError> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(NodeConfigError::InvalidValue(format!(
                "logging.level '{other}' is not one of trace, debug, info, warn, error, off"
            ))),
        }
    }
}

impl NodeConfig {
    /// Defaults, then `path` if given, then `DAGCHAIN_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, NodeConfigError> {
        Self::load_from(path, None)
    }

    /// Like `load`, reading overrides from `env` instead of the process
    /// environment when given
    pub fn load_from(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, NodeConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!("Loading configuration from: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NodeConfigError> {
        self.storage.validate()?;
        self.chain.validate()?;
        self.validation.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Consensus parameters of the configured network with any configured
    /// checkpoints applied
    pub fn network_params(&self) -> Result<NetworkParams, NodeConfigError> {
        let checkpoints = self.chain.parsed_checkpoints()?;
        Ok(self.chain.network.params().with_checkpoints(checkpoints))
    }

    pub fn open_store(&self) -> Result<Arc<dyn KvStore>, StorageError> {
        if self.storage.in_memory {
            return Ok(Arc::new(MemoryStore::new()));
        }
        let flush_ms = self.storage.flush_interval.as_millis() as u64;
        let sled_config = SledConfig {
            cache_capacity: self.storage.cache_size,
            flush_every_ms: (flush_ms > 0).then_some(flush_ms),
        };
        Ok(Arc::new(SledStore::open(&self.storage.db_path, &sled_config)?))
    }

    /// Engine configuration over `store`
    pub fn dag_config(&self, store: Arc<dyn KvStore>) -> Result<DagConfig, NodeConfigError> {
        let mut dag_config = DagConfig::new(self.network_params()?, store)
            .with_sig_cache(Arc::new(SigCache::new(self.validation.sig_cache_size)));
        dag_config.max_orphans = self.validation.max_orphans;
        dag_config.orphan_expiry = self.validation.orphan_expiry;
        dag_config.outcome_cache_size = self.validation.outcome_cache_size;
        Ok(dag_config)
    }

    /// Render as TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String, NodeConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
