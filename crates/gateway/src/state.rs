use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};

use furrow_config::FurrowConfig;
use furrow_protocol::{Message, capabilities};

use crate::{services::GatewayServices, session::FixTracker};

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Idle,
    Running,
    Stopping,
}

/// One field operation (e.g. a planting run). At most one non-idle job
/// exists across the whole gateway at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Unix seconds when the job was accepted.
    pub started_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job {0} is already active")]
    AlreadyActive(String),
    #[error("no job is running")]
    NotRunning,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Connected client ─────────────────────────────────────────────────────────

/// A monitor session that completed the handshake, as seen by the rest of
/// the gateway (broadcast, status reporting).
pub struct ConnectedClient {
    pub conn_id: String,
    pub peer: String,
    /// Capability set agreed during the handshake.
    pub capabilities: Vec<String>,
    /// Channel into this session's write loop.
    pub sender: mpsc::UnboundedSender<Message>,
    pub fixes: Arc<FixTracker>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Queue a message for this client. `false` when its session is gone.
    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

// ── Update guard ─────────────────────────────────────────────────────────────

/// Exclusive hold on the update staging directory. Released on drop.
pub struct UpdateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Process-wide shared state. Exactly one instance exists; it outlives all
/// sessions and is only reached through an explicit `Arc`, never ambiently.
pub struct GatewayState {
    pub version: String,
    pub supported_capabilities: &'static [&'static str],
    /// Opaque implement description embedded in `INFO` responses.
    pub implement_profile: serde_json::Value,
    pub max_frame_bytes: usize,
    pub idle_timeout_secs: u64,
    pub updates_dir: PathBuf,
    pub services: GatewayServices,
    /// All handshaken sessions, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    started_at: Instant,
    job: Mutex<Option<Job>>,
    conn_seq: AtomicU64,
    update_in_flight: AtomicBool,
}

impl GatewayState {
    pub fn new(
        version: impl Into<String>,
        implement_profile: serde_json::Value,
        config: &FurrowConfig,
        services: GatewayServices,
    ) -> Arc<Self> {
        let updates_dir = config
            .update
            .updates_dir
            .clone()
            .unwrap_or_else(furrow_config::paths::updates_dir);

        Arc::new(Self {
            version: version.into(),
            supported_capabilities: capabilities::SUPPORTED,
            implement_profile,
            max_frame_bytes: config.gateway.max_frame_bytes,
            idle_timeout_secs: config.gateway.idle_timeout_secs,
            updates_dir,
            services,
            clients: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            job: Mutex::new(None),
            conn_seq: AtomicU64::new(0),
            update_in_flight: AtomicBool::new(false),
        })
    }

    pub fn next_conn_id(&self, peer: &str) -> String {
        let seq = self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{peer}#{seq}")
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    // ── Client registry ──────────────────────────────────────────────────

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    // ── Job state machine ────────────────────────────────────────────────
    //
    // The read-check-write of each transition runs under one lock hold, so
    // two sessions racing the same command can never both succeed. Nothing
    // fallible happens inside the critical section.

    /// Accept a new job if none is active. Uses `requested_id` when the
    /// monitor named one, else mints a fresh id.
    pub async fn start_job(&self, requested_id: Option<String>) -> Result<Job, JobError> {
        let mut slot = self.job.lock().await;
        if let Some(job) = slot.as_ref()
            && job.status != JobStatus::Idle
        {
            return Err(JobError::AlreadyActive(job.id.clone()));
        }
        let job = Job {
            id: requested_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            status: JobStatus::Running,
            started_at: unix_now(),
        };
        *slot = Some(job.clone());
        Ok(job)
    }

    /// Stop the running job. The job record is kept with `IDLE` status so
    /// `GET_STATUS` can still report the last run.
    pub async fn stop_job(&self) -> Result<Job, JobError> {
        let mut slot = self.job.lock().await;
        match slot.as_mut() {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Idle;
                Ok(job.clone())
            },
            _ => Err(JobError::NotRunning),
        }
    }

    /// Consistent copy of the current job record, if any.
    pub async fn job_snapshot(&self) -> Option<Job> {
        self.job.lock().await.clone()
    }

    // ── Update staging exclusivity ───────────────────────────────────────

    /// Claim the staging directory for one in-flight update. `None` when
    /// another update holds it.
    pub fn begin_update(&self) -> Option<UpdateGuard<'_>> {
        self.update_in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .ok()
            .map(|_| UpdateGuard {
                flag: &self.update_in_flight,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> Arc<GatewayState> {
        GatewayState::new(
            "test",
            serde_json::Value::Null,
            &FurrowConfig::default(),
            GatewayServices::noop(),
        )
    }

    #[tokio::test]
    async fn start_then_stop_walks_the_documented_edges() {
        let state = test_state();
        assert!(state.job_snapshot().await.is_none());

        let job = state.start_job(Some("run-1".into())).await.expect("start");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.id, "run-1");

        let stopped = state.stop_job().await.expect("stop");
        assert_eq!(stopped.status, JobStatus::Idle);

        // The record survives with IDLE status.
        let snap = state.job_snapshot().await.expect("snapshot");
        assert_eq!(snap.id, "run-1");
        assert_eq!(snap.status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn second_start_conflicts_while_running() {
        let state = test_state();
        state.start_job(None).await.expect("start");
        let err = state.start_job(None).await.expect_err("conflict");
        assert!(matches!(err, JobError::AlreadyActive(_)));
    }

    #[tokio::test]
    async fn start_accepted_again_after_stop() {
        let state = test_state();
        state.start_job(None).await.expect("start");
        state.stop_job().await.expect("stop");
        state.start_job(None).await.expect("restart");
    }

    #[tokio::test]
    async fn stop_without_running_job_conflicts() {
        let state = test_state();
        assert_eq!(state.stop_job().await, Err(JobError::NotRunning));

        state.start_job(None).await.expect("start");
        state.stop_job().await.expect("stop");
        assert_eq!(state.stop_job().await, Err(JobError::NotRunning));
    }

    #[tokio::test]
    async fn concurrent_starts_admit_exactly_one_job() {
        let state = test_state();
        let (a, b) = tokio::join!(state.start_job(None), state.start_job(None));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let snap = state.job_snapshot().await.expect("one job exists");
        assert_eq!(snap.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn update_guard_is_exclusive_until_dropped() {
        let state = test_state();
        let guard = state.begin_update().expect("first claim");
        assert!(state.begin_update().is_none());
        drop(guard);
        assert!(state.begin_update().is_some());
    }

    #[test]
    fn job_status_serializes_to_wire_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::Running).expect("serialize"),
            serde_json::json!("RUNNING")
        );
        assert_eq!(
            serde_json::to_value(JobStatus::Stopping).expect("serialize"),
            serde_json::json!("STOPPING")
        );
    }
}
