// Dagchain node library
// Configuration, logging and offline block import around the DAG engine

pub mod config;
pub mod import;
pub mod logging;

pub use crate::config::{NodeConfig, NodeConfigError};
pub use crate::import::{BlockImporter, ImportError, ImportStats};
pub use crate::logging::init_logging;
