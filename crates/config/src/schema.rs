//! Config schema for the furrow gateway: transports, update handling,
//! implement profile, and the route simulator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FurrowConfig {
    pub gateway: GatewayConfig,
    pub update: UpdateConfig,
    pub implement: ImplementConfig,
    pub simulator: SimulatorConfig,
}

/// Transport and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the TCP listener binds to.
    pub tcp_bind: String,
    pub tcp_port: u16,
    /// Per-frame ceiling; frames over this close the session.
    pub max_frame_bytes: usize,
    /// Sessions with no inbound traffic for this long are dropped.
    /// `0` disables the idle check.
    pub idle_timeout_secs: u64,
    pub bluetooth: BluetoothConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp_bind: "0.0.0.0".into(),
            tcp_port: 7777,
            max_frame_bytes: 8 * 1024 * 1024,
            idle_timeout_secs: 300,
            bluetooth: BluetoothConfig::default(),
        }
    }
}

/// Bluetooth RFCOMM listener settings. The transport is optional: a missing
/// radio or BlueZ stack only disables this listener, never the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub enabled: bool,
    pub channel: u8,
    pub service_name: String,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: 1,
            service_name: "FurrowGateway".into(),
        }
    }
}

/// Software update staging and activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Where promoted packages land. Defaults to the deployment updates dir.
    pub updates_dir: Option<PathBuf>,
    /// Service unit asked to restart once a package is staged.
    pub service_unit: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            updates_dir: None,
            service_unit: "furrow-agent.service".into(),
        }
    }
}

/// Implement profile source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementConfig {
    /// Explicit profile file; falls back to the deployment path, then to the
    /// bundled default.
    pub profile_path: Option<PathBuf>,
}

/// Serpentine-route telemetry simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    pub field_length_m: f64,
    pub headland_length_m: f64,
    pub speed_mps: f64,
    pub sample_rate_hz: f64,
    pub base_lat: f64,
    pub base_lon: f64,
    pub altitude_m: f64,
    pub accuracy_m: f64,
    pub passes_per_cycle: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            field_length_m: 300.0,
            headland_length_m: 20.0,
            speed_mps: 2.5,
            sample_rate_hz: 10.0,
            base_lat: -22.0,
            base_lon: -47.0,
            altitude_m: 550.0,
            accuracy_m: 0.05,
            passes_per_cycle: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = FurrowConfig::default();
        assert_eq!(cfg.gateway.tcp_port, 7777);
        assert!(cfg.gateway.bluetooth.enabled);
        assert!(!cfg.simulator.enabled);
        assert_eq!(cfg.update.service_unit, "furrow-agent.service");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: FurrowConfig = toml::from_str(
            r#"
            [gateway]
            tcp_port = 9000

            [simulator]
            enabled = true
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.gateway.tcp_port, 9000);
        assert_eq!(cfg.gateway.tcp_bind, "0.0.0.0");
        assert!(cfg.simulator.enabled);
        assert_eq!(cfg.simulator.passes_per_cycle, 80);
    }
}
