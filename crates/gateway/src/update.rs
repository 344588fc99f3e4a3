//! In-band software update application.
//!
//! The package arrives as base64 inside an `UPDATE` frame. Every write
//! happens at a temporary path invisible to the rest of the system until
//! the atomic promotion, so an interrupted update never leaves a partial
//! artifact at the canonical path.

use std::{io::Write, path::PathBuf};

use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use furrow_protocol::error_codes;

use crate::state::GatewayState;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("another update is already in progress")]
    Busy,
    #[error("package staged but activation failed: {0}")]
    Activation(String),
}

impl UpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => error_codes::DECODE_ERROR,
            Self::Integrity(_) => error_codes::INTEGRITY_ERROR,
            Self::Io(_) | Self::Activation(_) => error_codes::IO_ERROR,
            Self::Busy => error_codes::UPDATE_BUSY,
        }
    }
}

/// Validated `UPDATE` payload.
pub struct UpdateRequest {
    pub name: String,
    pub content_b64: String,
    pub declared_size: Option<u64>,
    pub declared_sha256: Option<String>,
}

/// A package promoted to the canonical update path.
#[derive(Debug)]
pub struct StagedUpdate {
    pub path: PathBuf,
    pub bytes: u64,
}

/// The package lands inside the updates dir under its own name; anything
/// that could escape it is rejected before any decoding work.
pub fn is_safe_package_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Run the update pipeline: decode, stage, verify, promote, activate.
///
/// Failure points, in order: base64 decode (no disk I/O yet), staging
/// write, declared size/checksum verification (staging file removed),
/// atomic promotion, and activation — where the promoted package is kept
/// for manual recovery.
pub async fn apply_update(
    state: &GatewayState,
    request: UpdateRequest,
) -> Result<StagedUpdate, UpdateError> {
    let _guard = state.begin_update().ok_or(UpdateError::Busy)?;

    let data = base64::engine::general_purpose::STANDARD.decode(request.content_b64.as_bytes())?;

    let dir = state.updates_dir.clone();
    let staged = tokio::task::spawn_blocking(move || {
        stage_package(
            &dir,
            &request.name,
            &data,
            request.declared_size,
            request.declared_sha256.as_deref(),
        )
    })
    .await
    .map_err(|e| UpdateError::Io(std::io::Error::other(e)))??;

    info!(path = %staged.path.display(), bytes = staged.bytes, "update package promoted");

    if let Err(e) = state.services.host.restart_service().await {
        return Err(UpdateError::Activation(e.to_string()));
    }
    Ok(staged)
}

fn stage_package(
    dir: &std::path::Path,
    name: &str,
    data: &[u8],
    declared_size: Option<u64>,
    declared_sha256: Option<&str>,
) -> Result<StagedUpdate, UpdateError> {
    std::fs::create_dir_all(dir)?;

    // The NamedTempFile removes itself on drop, covering every early return
    // below.
    let mut staging = tempfile::NamedTempFile::new_in(dir)?;
    staging.write_all(data)?;
    staging.as_file().sync_all()?;

    if let Some(declared) = declared_size
        && declared != data.len() as u64
    {
        return Err(UpdateError::Integrity(format!(
            "size mismatch: declared {declared}, received {}",
            data.len()
        )));
    }
    if let Some(declared) = declared_sha256 {
        let actual = hex_digest(data);
        if !actual.eq_ignore_ascii_case(declared) {
            return Err(UpdateError::Integrity(format!(
                "sha256 mismatch: declared {declared}, computed {actual}"
            )));
        }
    }

    let path = dir.join(name);
    staging.persist(&path).map_err(|e| UpdateError::Io(e.error))?;
    Ok(StagedUpdate {
        path,
        bytes: data.len() as u64,
    })
}

fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
