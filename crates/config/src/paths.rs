//! Deployment filesystem locations.
//!
//! Defaults match the production field-computer image; every path can be
//! overridden through `FURROW_*` environment variables, which is handy when
//! running the gateway locally.

use std::path::{Path, PathBuf};

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(format!("FURROW_{name}")).map_or(default, PathBuf::from)
}

/// Root of the deployed agent tree.
pub fn agent_root() -> PathBuf {
    env_path("ROOT", PathBuf::from("/opt/furrow"))
}

/// Where promoted update packages land.
pub fn updates_dir() -> PathBuf {
    env_path("UPDATES_DIR", agent_root().join("updates"))
}

/// Marker file holding the deployed version string.
pub fn version_file() -> PathBuf {
    env_path("VERSION_FILE", agent_root().join("VERSION"))
}

/// Default implement profile location.
pub fn implement_profile_file() -> PathBuf {
    env_path("IMPLEMENT_CONFIG", agent_root().join("implement.json"))
}

/// Read the deployed version marker, falling back to a dev placeholder.
pub fn read_version(path: Option<&Path>) -> String {
    let target = path.map_or_else(version_file, Path::to_path_buf);
    match std::fs::read_to_string(&target) {
        Ok(raw) => raw.trim().to_string(),
        Err(_) => "0.0.1-dev".to_string(),
    }
}
