//! Seams to the gateway's external collaborators: the host process manager
//! and the GNSS hardware integration. The core never terminates the
//! process or touches the radio itself — it asks through these traits.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

// ── Host process manager ─────────────────────────────────────────────────────

/// Restart/reboot requests are handed to the host supervisor rather than
/// exiting the process directly, so a failed handoff is reportable.
#[async_trait]
pub trait HostControl: Send + Sync {
    /// Restart the gateway service (used after an update is staged).
    async fn restart_service(&self) -> anyhow::Result<()>;

    /// Reboot the whole machine (the `REBOOT` command).
    async fn reboot(&self) -> anyhow::Result<()>;
}

/// Production impl: asks systemd.
pub struct SystemdControl {
    pub unit: String,
}

async fn run_systemctl(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new("systemctl").args(args).status().await?;
    anyhow::ensure!(status.success(), "systemctl {args:?} exited with {status}");
    Ok(())
}

#[async_trait]
impl HostControl for SystemdControl {
    async fn restart_service(&self) -> anyhow::Result<()> {
        info!(unit = %self.unit, "requesting service restart");
        run_systemctl(&["restart", &self.unit]).await
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        info!("requesting system reboot");
        run_systemctl(&["reboot"]).await
    }
}

/// Records calls instead of touching the host. Used in tests and on dev
/// machines where no supervisor is present.
#[derive(Default)]
pub struct NoopControl {
    restarts: AtomicUsize,
    reboots: AtomicUsize,
}

impl NoopControl {
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HostControl for NoopControl {
    async fn restart_service(&self) -> anyhow::Result<()> {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        self.reboots.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ── GNSS corrections ─────────────────────────────────────────────────────────

/// Where inbound NTRIP/RTCM corrections and fix acknowledgements go.
#[async_trait]
pub trait CorrectionsSink: Send + Sync {
    /// Forward correction bytes to the GNSS hardware.
    async fn handle_correction(
        &self,
        sequence: u64,
        payload: &[u8],
        format: &str,
        timestamp: Option<f64>,
    );

    /// The monitor acknowledged a fix we pushed.
    async fn acknowledge_fix(&self, sequence: u64, status: &str, timestamp: Option<f64>);
}

/// Discards corrections. Stands in when no GNSS integration is wired up.
pub struct NullCorrections;

#[async_trait]
impl CorrectionsSink for NullCorrections {
    async fn handle_correction(
        &self,
        sequence: u64,
        payload: &[u8],
        format: &str,
        _timestamp: Option<f64>,
    ) {
        debug!(sequence, format, bytes = payload.len(), "dropping correction (no GNSS sink)");
    }

    async fn acknowledge_fix(&self, sequence: u64, status: &str, _timestamp: Option<f64>) {
        debug!(sequence, status, "fix acknowledged (no GNSS sink)");
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────────

/// Collaborator handles shared by every session.
#[derive(Clone)]
pub struct GatewayServices {
    pub host: Arc<dyn HostControl>,
    pub corrections: Arc<dyn CorrectionsSink>,
}

impl GatewayServices {
    /// Everything recorded/discarded. The default for tests.
    pub fn noop() -> Self {
        Self {
            host: Arc::new(NoopControl::default()),
            corrections: Arc::new(NullCorrections),
        }
    }

    /// Production wiring: systemd supervision, no GNSS sink until the
    /// hardware integration registers one.
    pub fn production(service_unit: &str) -> Self {
        Self {
            host: Arc::new(SystemdControl {
                unit: service_unit.to_string(),
            }),
            corrections: Arc::new(NullCorrections),
        }
    }
}
