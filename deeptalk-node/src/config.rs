//! Load config from file and environment.

use std::path::{Path, PathBuf};

use deeptalk_core::{ResyncPolicy, SyncMode};
use serde::Deserialize;

/// Which transport adapter carries the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Multicast discovery plus TCP links on the local network.
    #[default]
    Lan,
    /// In-process hub; only useful for a single process hosting both players.
    Memory,
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lan" => Ok(TransportKind::Lan),
            "memory" => Ok(TransportKind::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "transport",
                value: other.to_owned(),
            }),
        }
    }
}

/// Node configuration. File: ~/.config/deeptalk/config.toml or /etc/deeptalk/config.toml.
/// Env overrides: DEEPTALK_DISCOVERY_PORT, DEEPTALK_TRANSPORT_PORT, DEEPTALK_INVITE_BASE,
/// DEEPTALK_DECKS, DEEPTALK_RESYNC, DEEPTALK_SYNC_MODE, DEEPTALK_TRANSPORT.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Link TCP port (default 0, any free port).
    #[serde(default)]
    pub transport_port: u16,
    /// Base URL for invite links.
    #[serde(default = "default_invite_base")]
    pub invite_base: String,
    /// TOML deck file; built-in decks when absent.
    #[serde(default)]
    pub deck_file: Option<PathBuf>,
    #[serde(default)]
    pub resync: ResyncPolicy,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub transport: TransportKind,
    /// Used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_discovery_port() -> u16 {
    45680
}
fn default_invite_base() -> String {
    "https://deeptalk.app/".to_owned()
}
fn default_log_filter() -> String {
    "info".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: 0,
            invite_base: default_invite_base(),
            deck_file: None,
            resync: ResyncPolicy::default(),
            sync_mode: SyncMode::default(),
            transport: TransportKind::default(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Load config: merge default, then config file (if present), then env vars.
/// An explicit `path` must exist; the standard locations are optional.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/deeptalk/config.toml"));
    }
    out.push(PathBuf::from("/etc/deeptalk/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// Apply DEEPTALK_* overrides. `var` looks up one variable.
fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    if let Some(s) = var("DEEPTALK_DISCOVERY_PORT") {
        c.discovery_port = parse_port("discovery_port", &s)?;
    }
    if let Some(s) = var("DEEPTALK_TRANSPORT_PORT") {
        c.transport_port = parse_port("transport_port", &s)?;
    }
    if let Some(s) = var("DEEPTALK_INVITE_BASE") {
        c.invite_base = s;
    }
    if let Some(s) = var("DEEPTALK_DECKS") {
        c.deck_file = Some(PathBuf::from(s));
    }
    if let Some(s) = var("DEEPTALK_RESYNC") {
        c.resync = parse_enum("resync", &s)?;
    }
    if let Some(s) = var("DEEPTALK_SYNC_MODE") {
        c.sync_mode = parse_enum("sync_mode", &s)?;
    }
    if let Some(s) = var("DEEPTALK_TRANSPORT") {
        c.transport = s.parse()?;
    }
    Ok(())
}

fn parse_port(key: &'static str, s: &str) -> Result<u16, ConfigError> {
    s.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: s.to_owned(),
    })
}

/// Parse a kebab-case enum value the same way the config file does.
fn parse_enum<T: serde::de::DeserializeOwned>(key: &'static str, s: &str) -> Result<T, ConfigError> {
    use serde::de::IntoDeserializer;
    let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        s.trim().into_deserializer();
    T::deserialize(de).map_err(|_| ConfigError::InvalidValue {
        key,
        value: s.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.discovery_port, 45680);
        assert_eq!(c.transport_port, 0);
        assert_eq!(c.invite_base, "https://deeptalk.app/");
        assert_eq!(c.resync, ResyncPolicy::EveryJoin);
        assert_eq!(c.sync_mode, SyncMode::Snapshot);
        assert_eq!(c.transport, TransportKind::Lan);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "discovery_port = 50000\nresync = \"presence-edge\"\nsync_mode = \"delta\"\ntransport = \"memory\""
        )
        .unwrap();
        let c = load_file(f.path()).unwrap();
        assert_eq!(c.discovery_port, 50000);
        assert_eq!(c.resync, ResyncPolicy::PresenceEdge);
        assert_eq!(c.sync_mode, SyncMode::Delta);
        assert_eq!(c.transport, TransportKind::Memory);
        assert_eq!(c.log_filter, "info");
    }

    #[test]
    fn unknown_key_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "proxy_port = 3128").unwrap();
        assert!(matches!(
            load_file(f.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config {
            discovery_port: 50000,
            ..Config::default()
        };
        apply_env(
            &mut c,
            env(&[
                ("DEEPTALK_DISCOVERY_PORT", "50001"),
                ("DEEPTALK_RESYNC", "presence-edge"),
                ("DEEPTALK_DECKS", "/tmp/decks.toml"),
                ("DEEPTALK_TRANSPORT", "memory"),
            ]),
        )
        .unwrap();
        assert_eq!(c.discovery_port, 50001);
        assert_eq!(c.resync, ResyncPolicy::PresenceEdge);
        assert_eq!(c.deck_file, Some(PathBuf::from("/tmp/decks.toml")));
        assert_eq!(c.transport, TransportKind::Memory);
    }

    #[test]
    fn bad_env_value_rejected() {
        let mut c = Config::default();
        let err = apply_env(&mut c, env(&[("DEEPTALK_SYNC_MODE", "eventual")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "sync_mode", .. }));
        let err = apply_env(&mut c, env(&[("DEEPTALK_TRANSPORT_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "transport_port", .. }));
    }
}
