//! Protocol configuration, loadable from TOML or built in code.
//!
//! Ratios are written in basis points (TOML integers have no 128-bit WAD
//! representation) and converted to WAD on the way into the model crates.
//! `validate` runs on load and again on `Protocol` construction.

use crate::error::CoreError;
use crate::CoreResult;
use serde::{Deserialize, Serialize};
use vault_model::{RiskParams, WaterfallConfig};
use wad_math::WAD;

const BPS_DENOM: u128 = 10_000;

fn bps_to_wad(bps: u64) -> u128 {
    bps as u128 * WAD / BPS_DENOM
}

/// Risk-gate knobs. `lambda_bps` scales vault NAV into the base liquidity
/// bound; `k_bps` scales drawdown into a haircut on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub lambda_bps: u64,
    pub k_bps: u64,
    pub enforce: bool,
}

impl RiskConfig {
    pub fn params(&self) -> RiskParams {
        RiskParams {
            lambda_wad: bps_to_wad(self.lambda_bps),
            k_wad: bps_to_wad(self.k_bps),
            enforce: self.enforce,
        }
    }
}

/// Fee waterfall knobs. `drawdown_floor_bps` is the magnitude of the
/// per-batch floor (3000 keeps NAV at >= 70% of the pre-batch value);
/// the three share weights must sum to exactly 10_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeWaterfallConfig {
    pub drawdown_floor_bps: u64,
    pub backstop_fill_bps: u64,
    pub lp_share_bps: u64,
    pub backstop_share_bps: u64,
    pub treasury_share_bps: u64,
}

impl FeeWaterfallConfig {
    pub fn params(&self) -> WaterfallConfig {
        WaterfallConfig {
            pdd_wad: -(bps_to_wad(self.drawdown_floor_bps) as i128),
            rho_wad: bps_to_wad(self.backstop_fill_bps),
            phi_lp_wad: bps_to_wad(self.lp_share_bps),
            phi_backstop_wad: bps_to_wad(self.backstop_share_bps),
            phi_treasury_wad: bps_to_wad(self.treasury_share_bps),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Minimum first deposit, micro units.
    pub min_seed_amount: u64,
    /// Batches a withdrawal waits past its request batch before claiming.
    pub withdrawal_lag_batches: u64,
    /// Earliest spacing between consecutive batch processings, seconds.
    pub batch_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTiming {
    /// Seconds after `settlement_time` during which candidates are accepted.
    pub submit_window_secs: u64,
    /// Seconds after the submit window for finalize / mark-failed operations.
    pub ops_window_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub vault: VaultConfig,
    pub risk: RiskConfig,
    pub waterfall: FeeWaterfallConfig,
    pub settlement: SettlementTiming,
}

impl ProtocolConfig {
    pub fn from_toml_str(s: &str) -> CoreResult<Self> {
        let cfg: ProtocolConfig = toml::from_str(s)
            .map_err(|_| CoreError::InvalidConfig("malformed TOML"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.waterfall.drawdown_floor_bps > BPS_DENOM as u64 {
            return Err(CoreError::InvalidConfig("drawdown floor above 100%"));
        }
        if self.waterfall.backstop_fill_bps > BPS_DENOM as u64 {
            return Err(CoreError::InvalidConfig("backstop fill share above 100%"));
        }
        let phi_sum = self.waterfall.lp_share_bps as u128
            + self.waterfall.backstop_share_bps as u128
            + self.waterfall.treasury_share_bps as u128;
        if phi_sum != BPS_DENOM {
            return Err(CoreError::InvalidConfig("fee shares must sum to 10000 bps"));
        }
        if self.settlement.submit_window_secs == 0 || self.settlement.ops_window_secs == 0 {
            return Err(CoreError::InvalidConfig("settlement windows must be non-zero"));
        }
        if self.vault.min_seed_amount == 0 {
            return Err(CoreError::InvalidConfig("minimum seed must be non-zero"));
        }
        Ok(())
    }

    /// Sensible defaults for tests and local runs.
    pub fn sample() -> Self {
        ProtocolConfig {
            vault: VaultConfig {
                min_seed_amount: 1_000_000, // one whole unit
                withdrawal_lag_batches: 1,
                batch_interval_secs: 3600,
            },
            risk: RiskConfig {
                lambda_bps: 1_000, // 10% of NAV
                k_bps: 20_000,     // drawdown bites twice over
                enforce: true,
            },
            waterfall: FeeWaterfallConfig {
                drawdown_floor_bps: 3_000,
                backstop_fill_bps: 1_000,
                lp_share_bps: 5_000,
                backstop_share_bps: 2_500,
                treasury_share_bps: 2_500,
            },
            settlement: SettlementTiming {
                submit_window_secs: 600,
                ops_window_secs: 3600,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
[vault]
min_seed_amount = 1000000
withdrawal_lag_batches = 1
batch_interval_secs = 3600

[risk]
lambda_bps = 1000
k_bps = 20000
enforce = true

[waterfall]
drawdown_floor_bps = 3000
backstop_fill_bps = 1000
lp_share_bps = 5000
backstop_share_bps = 2500
treasury_share_bps = 2500

[settlement]
submit_window_secs = 600
ops_window_secs = 3600
"#;

    #[test]
    fn test_toml_roundtrip() {
        let cfg = ProtocolConfig::from_toml_str(SAMPLE_TOML).unwrap();
        assert_eq!(cfg, ProtocolConfig::sample());
        let serialized = toml::to_string(&cfg).unwrap();
        let back = ProtocolConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_bps_conversion() {
        let cfg = ProtocolConfig::sample();
        let w = cfg.waterfall.params();
        assert_eq!(w.pdd_wad, -(3 * WAD as i128) / 10);
        assert_eq!(w.rho_wad, WAD / 10);
        assert_eq!(w.phi_lp_wad + w.phi_backstop_wad + w.phi_treasury_wad, WAD);
        w.validate().unwrap();
        let r = cfg.risk.params();
        assert_eq!(r.lambda_wad, WAD / 10);
        assert_eq!(r.k_wad, 2 * WAD);
    }

    #[test]
    fn test_bad_shares_rejected() {
        let mut cfg = ProtocolConfig::sample();
        cfg.waterfall.treasury_share_bps += 1;
        assert_eq!(
            cfg.validate(),
            Err(CoreError::InvalidConfig("fee shares must sum to 10000 bps"))
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut cfg = ProtocolConfig::sample();
        cfg.settlement.submit_window_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert_eq!(
            ProtocolConfig::from_toml_str("not toml ["),
            Err(CoreError::InvalidConfig("malformed TOML"))
        );
    }
}
