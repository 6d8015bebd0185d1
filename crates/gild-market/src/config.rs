use anyhow::Result;
use gild_disputes::{ClaimConfig, DisputeConfig};
use gild_escrow::EscrowConfig;
use gild_reputation::ReputationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Reputation floor for panel eligibility.
    pub reviewer_floor: f64,
    /// Cadence of the expiry sweeper.
    pub sweep_interval_secs: u64,
    pub escrow: EscrowConfig,
    pub disputes: DisputeConfig,
    pub claims: ClaimConfig,
    pub reputation: ReputationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty", "compact", or "json".
    pub format: String,
    pub file_output: Option<PathBuf>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            reviewer_floor: 60.0,
            sweep_interval_secs: 300,
            escrow: EscrowConfig::default(),
            disputes: DisputeConfig::default(),
            claims: ClaimConfig::default(),
            reputation: ReputationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
        }
    }
}

impl MarketConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.escrow.fee.bps > 10_000 {
            anyhow::bail!("fee basis points cannot exceed 10000");
        }
        if self.escrow.max_active_escrows == 0 {
            anyhow::bail!("max_active_escrows must be at least 1");
        }
        if self.disputes.panel_size == 0 || self.claims.panel_size == 0 {
            anyhow::bail!("panel sizes must be at least 1");
        }
        if self.disputes.min_votes > self.disputes.panel_size {
            anyhow::bail!("dispute quorum cannot exceed the panel size");
        }
        if self.claims.min_votes > self.claims.panel_size {
            anyhow::bail!("claim quorum cannot exceed the panel size");
        }
        if !(0.0..=100.0).contains(&self.reviewer_floor) {
            anyhow::bail!("reviewer_floor must be within 0..=100");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        MarketConfig::default().validate().unwrap();
    }

    #[test]
    fn test_quorum_larger_than_panel_rejected() {
        let mut config = MarketConfig::default();
        config.disputes.min_votes = config.disputes.panel_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MarketConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: MarketConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.escrow.fee.bps, config.escrow.fee.bps);
        assert_eq!(back.disputes.panel_size, config.disputes.panel_size);
        assert_eq!(back.reviewer_floor, config.reviewer_floor);
        assert_eq!(back.logging.level, config.logging.level);
    }
}
