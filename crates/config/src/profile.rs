//! Implement profile: the structured description of the tool attached to
//! the gateway (row counts, geometry, section groups).
//!
//! The gateway itself treats the profile as an opaque blob to embed in
//! `INFO` responses; the typed model exists so deployments can validate
//! their profile files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::paths;

const DEFAULT_PROFILE: &str = include_str!("data/implement_default.json");

/// Metadata for a group of implement sections (e.g., seed, fertilizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionProfile {
    pub kind: String,
    pub count: u32,
    #[serde(default)]
    pub supports_variable_rate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_m: Option<f64>,
}

/// Structured description of the implement attached to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementProfile {
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub row_count: u32,
    pub row_spacing_m: f64,
    pub hitch_to_tool_m: f64,
    #[serde(default)]
    pub articulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antenna_to_articulation_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub articulation_to_tool_m: Option<f64>,
    #[serde(default)]
    pub sections: Vec<SectionProfile>,
}

impl ImplementProfile {
    /// Working width derived from row geometry.
    pub fn working_width_m(&self) -> f64 {
        f64::from(self.row_count) * self.row_spacing_m
    }

    /// The profile as the opaque JSON blob embedded in `INFO` responses.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn load_file(path: &Path) -> anyhow::Result<ImplementProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load the implement profile, falling back to the bundled default.
///
/// Candidates, in order: the explicit path (if any), the deployment path,
/// the profile compiled into the binary. A present-but-broken file is
/// logged and skipped rather than taking the gateway down.
pub fn load_implement_profile(explicit: Option<&Path>) -> anyhow::Result<ImplementProfile> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(paths::implement_profile_file());

    for candidate in &candidates {
        if !candidate.exists() {
            continue;
        }
        match load_file(candidate) {
            Ok(profile) => {
                info!(path = %candidate.display(), "using implement profile");
                return Ok(profile);
            },
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "skipping unreadable implement profile");
            },
        }
    }

    warn!("implement profile not found; using bundled default");
    serde_json::from_str(DEFAULT_PROFILE).context("bundled default implement profile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_default_parses() {
        let profile: ImplementProfile = serde_json::from_str(DEFAULT_PROFILE).expect("bundled");
        assert_eq!(profile.role, "planter");
        assert!(profile.row_count > 0);
        assert!(profile.working_width_m() > 0.0);
    }

    #[test]
    fn explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        use std::io::Write;
        write!(
            file,
            r#"{{"role":"sprayer","name":"Test","row_count":8,"row_spacing_m":0.75,"hitch_to_tool_m":3.0}}"#
        )
        .expect("write");
        let profile = load_implement_profile(Some(file.path())).expect("profile");
        assert_eq!(profile.role, "sprayer");
        assert_eq!(profile.sections, vec![]);
        assert!(!profile.articulated);
    }

    #[test]
    fn broken_file_falls_through_to_default() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        use std::io::Write;
        write!(file, "not json").expect("write");
        let profile = load_implement_profile(Some(file.path())).expect("profile");
        assert_eq!(profile.role, "planter");
    }

    #[test]
    fn payload_round_trips() {
        let profile = load_implement_profile(None).expect("profile");
        let payload = profile.to_payload();
        let back: ImplementProfile = serde_json::from_value(payload).expect("round trip");
        assert_eq!(back, profile);
    }
}
