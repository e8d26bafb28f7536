use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ChainError, ChainResult};

/// How commit quorum is evaluated against the previous epoch's participants.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRule {
    /// At least ⌊2n/3⌋ + 1 valid signers.
    #[default]
    Count,
    /// Valid signer weight strictly above 2/3 of the total weight.
    Weight,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    pub false_positive_rate: f64,
    pub min_ramp_up_measurements: u64,
    pub consecutive_failure_limit: u64,
    /// Significance level for the one-sided invalidation test.
    pub invalidation_alpha: f64,
    /// Cap handed to the sample-size floor.
    pub max_measurements: u64,
    pub slash_fraction_invalid: f64,
    pub quorum_rule: QuorumRule,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            false_positive_rate: 0.05,
            min_ramp_up_measurements: 100,
            consecutive_failure_limit: 20,
            invalidation_alpha: 0.05,
            max_measurements: 100,
            slash_fraction_invalid: 0.10,
            quorum_rule: QuorumRule::Count,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub chain_id: String,
    pub admin_listen: SocketAddr,
    /// Default archive endpoint for proof recovery; overridable per request.
    #[serde(default)]
    pub archive_rpc: Option<String>,
    #[serde(default)]
    pub validation: ValidationParams,
}

impl NodeConfig {
    pub fn load(path: &Path) -> ChainResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| ChainError::Config(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> ChainResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ChainError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> ChainResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            chain_id: "inference-local".to_string(),
            admin_listen: "127.0.0.1:9200".parse().expect("valid socket addr"),
            archive_rpc: None,
            validation: ValidationParams::default(),
        }
    }
}
