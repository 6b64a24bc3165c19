//! Settings loading with layered sources.
//!
//! Loading flow (later layers win):
//! 1. Compiled [`HeraldSettings::default()`]
//! 2. The JSON settings file, if it exists
//! 3. `HERALD_*` environment variables, `__` separating nested keys
//!    (`HERALD_SERVER__WS_PATH=/stomp` sets `server.wsPath`)
//!
//! The merged result is validated before it is returned.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use figment::value::{Uncased, UncasedStr};
use tracing::debug;

use crate::errors::Result;
use crate::types::HeraldSettings;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HERALD_";

/// Resolve the path to the settings file (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file contributes nothing. A file that is not valid JSON, or
/// values of the wrong type in any layer, are errors.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    debug!(?path, exists = path.exists(), "loading settings");
    let settings: HeraldSettings = figment(path).extract()?;
    settings.validate()?;
    Ok(settings)
}

/// The provider stack used by [`load_settings_from_path`].
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(HeraldSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).lowercase(false).map(env_key))
}

/// Map `SERVER__WS_PATH` to `server.wsPath`.
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    key.as_str()
        .split("__")
        .map(camel_case)
        .collect::<Vec<_>>()
        .join(".")
        .into()
}

fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
        let word = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}
