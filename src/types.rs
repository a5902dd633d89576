// src/types.rs
use crate::miner::algorithm::EthashParams;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte hash (header hashes, seed hashes, boundaries, digests)
pub type H256 = [u8; 32];

/// How devices generate their datasets after an epoch change
///
/// This is a process-wide setting: it is chosen once in the configuration
/// and shared by every worker.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagLoadMode {
    /// All devices rebuild concurrently
    ///
    /// Fastest, but every device hits host memory and the bus at once.
    #[default]
    #[clap(name = "parallel")]
    Parallel,

    /// Devices rebuild one at a time
    ///
    /// Bounds peak host memory and PCIe bandwidth on large rigs.
    #[clap(name = "serial")]
    Serial,
}

impl fmt::Display for DagLoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DagLoadMode::Parallel => write!(f, "parallel"),
            DagLoadMode::Serial => write!(f, "serial"),
        }
    }
}

/// Dataset size schedule selected in the configuration
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamsPreset {
    /// Production sizes (gigabyte-scale datasets)
    #[default]
    #[clap(name = "mainnet")]
    Mainnet,

    /// Kilobyte-scale datasets for smoke runs
    #[clap(name = "test")]
    Test,
}

impl ParamsPreset {
    /// Concrete size schedule for this preset
    pub fn params(self) -> EthashParams {
        match self {
            ParamsPreset::Mainnet => EthashParams::MAINNET,
            ParamsPreset::Test => EthashParams::TEST,
        }
    }
}

impl fmt::Display for ParamsPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsPreset::Mainnet => write!(f, "mainnet"),
            ParamsPreset::Test => write!(f, "test"),
        }
    }
}

/// Formats a hash as 0x-prefixed hex
pub fn hash_hex(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parses a 0x-prefixed (or bare) hex string into a 32-byte hash
pub fn parse_hash(s: &str) -> Result<H256, hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip() {
        let hash = [0x5a; 32];
        assert_eq!(parse_hash(&hash_hex(&hash)).unwrap(), hash);
        assert!(parse_hash("0x1234").is_err());
    }
}
