//! Gateway configuration (spec §6 "Configuration").
//!
//! Mirrors the teacher's `config/network.rs` pattern: a plain serde struct
//! with a hand-written `Default`, overlaid by an optional `config.toml` and
//! then by `VISION_GW_*` environment variables, in that priority order.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub session_timeout_secs: u64,
    pub challenge_timeout_secs: u64,
    pub ceremony_timeout_secs: u64,
    pub step_timeout_secs: u64,
    pub vtxo_expiry_secs: u64,
    pub vtxo_default_amount: u128,
    pub min_vtxos_per_asset: u32,
    pub max_vtxos_per_asset: u32,
    pub replenishment_threshold: f64,
    pub inventory_monitor_interval_secs: u64,
    pub settlement_interval_secs: u64,
    pub lightning_monitor_interval_secs: u64,
    pub invoice_expiry_secs: u64,
    pub reserve_ratio: f64,
    pub min_fee: u128,
    pub dust_limit: u128,
    /// The asset_id treated as the chain's native unit; p2p transfers of any
    /// other asset carry a `+50` surcharge on top of `min_fee` (spec §4.4).
    pub base_asset_id: String,
    pub data_dir: String,
    pub admin_bind_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 300,
            challenge_timeout_secs: 180,
            ceremony_timeout_secs: 300,
            step_timeout_secs: 60,
            vtxo_expiry_secs: 24 * 3600,
            vtxo_default_amount: 100_000,
            min_vtxos_per_asset: 10,
            max_vtxos_per_asset: 100,
            replenishment_threshold: 0.3,
            inventory_monitor_interval_secs: 5 * 60,
            settlement_interval_secs: 3600,
            lightning_monitor_interval_secs: 5,
            invoice_expiry_secs: 3600,
            reserve_ratio: 0.1,
            min_fee: 100,
            dust_limit: 546,
            base_asset_id: "BTC".to_string(),
            data_dir: "./gateway-data".to_string(),
            admin_bind_addr: "127.0.0.1:7080".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Loads defaults, overlays an optional `config.toml` next to the data
    /// dir, then overlays `VISION_GW_*` environment variables.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = config_path {
            if let Ok(text) = std::fs::read_to_string(path) {
                cfg = toml::from_str(&text)?;
            }
        }

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! env_u64 {
            ($field:ident, $name:expr) => {
                if let Ok(v) = env::var($name) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }
        macro_rules! env_f64 {
            ($field:ident, $name:expr) => {
                if let Ok(v) = env::var($name) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }

        env_u64!(session_timeout_secs, "VISION_GW_SESSION_TIMEOUT_SECS");
        env_u64!(challenge_timeout_secs, "VISION_GW_CHALLENGE_TIMEOUT_SECS");
        env_u64!(ceremony_timeout_secs, "VISION_GW_CEREMONY_TIMEOUT_SECS");
        env_u64!(step_timeout_secs, "VISION_GW_STEP_TIMEOUT_SECS");
        env_f64!(replenishment_threshold, "VISION_GW_REPLENISH_RATIO");
        env_f64!(reserve_ratio, "VISION_GW_RESERVE_RATIO");

        if let Ok(v) = env::var("VISION_GW_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = env::var("VISION_GW_ADMIN_BIND") {
            self.admin_bind_addr = v;
        }
        if let Ok(v) = env::var("VISION_GW_BASE_ASSET") {
            self.base_asset_id = v;
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }
    pub fn ceremony_timeout(&self) -> Duration {
        Duration::from_secs(self.ceremony_timeout_secs)
    }
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
    pub fn vtxo_expiry(&self) -> Duration {
        Duration::from_secs(self.vtxo_expiry_secs)
    }
    pub fn inventory_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.inventory_monitor_interval_secs)
    }
    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement_interval_secs)
    }
    pub fn lightning_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.lightning_monitor_interval_secs)
    }
    pub fn invoice_expiry(&self) -> Duration {
        Duration::from_secs(self.invoice_expiry_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.min_vtxos_per_asset, 10);
        assert_eq!(cfg.max_vtxos_per_asset, 100);
        assert_eq!(cfg.dust_limit, 546);
        assert!((cfg.reserve_ratio - 0.1).abs() < f64::EPSILON);
    }
}
