use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::schema::FurrowConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["furrow.toml", "furrow.yaml", "furrow.yml", "furrow.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks there —
/// project-local and user-global paths are skipped. Tests call this to stay
/// isolated from the machine they run on.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<FurrowConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = expand_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./furrow.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/furrow/` (user-global)
///
/// Returns `FurrowConfig::default()` if no config file is found.
pub fn discover_and_load() -> FurrowConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return FurrowConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            FurrowConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        // Override is set — don't fall through to other locations.
        return first_existing(&dir);
    }

    if let Some(path) = first_existing(Path::new(".")) {
        return Some(path);
    }

    let dirs = directories::ProjectDirs::from("", "", "furrow")?;
    first_existing(dirs.config_dir())
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<FurrowConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let cfg = match ext {
        "toml" => toml::from_str(raw)?,
        "yaml" | "yml" => serde_yaml::from_str(raw)?,
        "json" => serde_json::from_str(raw)?,
        other => anyhow::bail!("unsupported config format: .{other}"),
    };
    Ok(cfg)
}

/// Expand `${VAR}` placeholders in the raw config text. Unresolvable or
/// malformed placeholders are left as-is.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                out.push_str("${");
                rest = after;
            },
        }
    }
    out.push_str(rest);
    out
}
