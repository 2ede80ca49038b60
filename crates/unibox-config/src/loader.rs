// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./unibox.toml` > `~/.config/unibox/unibox.toml` > `/etc/unibox/unibox.toml`
//! with environment variable overrides via `UNIBOX_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::UniboxConfig;

/// Config sections addressable from environment variables.
const SECTIONS: &[&str] = &["server", "storage", "broker", "sync", "delivery"];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/unibox/unibox.toml` (system-wide)
/// 3. `~/.config/unibox/unibox.toml` (user XDG config)
/// 4. `./unibox.toml` (local directory)
/// 5. `UNIBOX_*` environment variables
pub fn load_config() -> Result<UniboxConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<UniboxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(UniboxConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<UniboxConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(UniboxConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// TOML files consulted by [`load_config`], lowest precedence first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/unibox/unibox.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("unibox").join("unibox.toml"));
    }
    paths.push(PathBuf::from("unibox.toml"));
    paths
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    config_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(UniboxConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Environment provider with explicit section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` so that
/// `UNIBOX_BROKER_WORKSPACE_SECRET` maps to `broker.workspace_secret`,
/// not `broker.workspace.secret`.
fn env_provider() -> Env {
    Env::prefixed("UNIBOX_").map(|key| map_env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name to a dotted config path.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(
            map_env_key("broker_workspace_secret"),
            "broker.workspace_secret"
        );
        assert_eq!(map_env_key("sync_stale_after_secs"), "sync.stale_after_secs");
        assert_eq!(
            map_env_key("delivery_max_message_length"),
            "delivery.max_message_length"
        );
        assert_eq!(map_env_key("server_port"), "server.port");
    }

    #[test]
    fn unknown_sections_pass_through() {
        assert_eq!(map_env_key("something_else"), "something_else");
        assert_eq!(map_env_key("syncx_value"), "syncx_value");
    }
}
