//! Replica Configuration Management
//!
//! Loads the server settings file. The format is one `Section::Key = value`
//! pair per line, with `#` comments:
//!
//! ```text
//! # Network
//! Server::ListenAddress = 0.0.0.0
//! Server::ListenPort = 11595
//! Server::MaximumClientCount = 32
//! ```
//!
//! Missing keys keep their defaults. A value that does not parse is logged
//! and ignored, so a typo never stops the server from starting.

use replica_core::{EngineVersion, NetError};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Errors raised while loading settings
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<ConfigError> for NetError {
    fn from(err: ConfigError) -> Self {
        NetError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How strictly a server compares a client's handshake with its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionPolicy {
    /// Accept every client
    AcceptAll,
    /// Require the same protocol revision
    #[default]
    MatchProtocol,
    /// Require the same protocol revision and engine version
    Strict,
}

impl VersionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "acceptall" | "any" => Some(Self::AcceptAll),
            "matchprotocol" | "protocol" => Some(Self::MatchProtocol),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    /// Decide whether a remote peer may connect
    ///
    /// # Arguments
    /// * `local` - Engine version and protocol revision of this build
    /// * `remote` - Engine version and protocol revision from the peer's handshake
    pub fn accepts(&self, local: (EngineVersion, u32), remote: (EngineVersion, u32)) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::MatchProtocol => local.1 == remote.1,
            Self::Strict => local == remote,
        }
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Address to bind (`Server::ListenAddress`)
    pub listen_address: String,
    /// Port to bind (`Server::ListenPort`)
    pub listen_port: u16,
    /// Connected clients allowed at once (`Server::MaximumClientCount`)
    pub maximum_client_count: usize,
    /// Messages processed per peer per tick, 0 for no limit (`Server::MessagesPerTick`)
    pub messages_per_tick: usize,
    /// Undecoded streams queued per peer before it is dropped, 0 for no limit
    /// (`Server::MaxQueuedStreams`)
    pub max_queued_streams: usize,
    /// Milliseconds between server updates (`Server::TickRateMs`)
    pub tick_rate_ms: u64,
    /// Handshake version check (`Server::VersionPolicy`)
    pub version_policy: VersionPolicy,
    /// Protocol revision announced in the handshake (`Server::ProtocolVersion`)
    pub protocol_version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            listen_port: 11595,
            maximum_client_count: 32,
            messages_per_tick: 32,
            max_queued_streams: 16,
            tick_rate_ms: 32,
            version_policy: VersionPolicy::default(),
            protocol_version: replica_core::PROTOCOL_VERSION,
        }
    }
}

impl Settings {
    /// Load settings from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::parse(&content);
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings text, starting from the defaults
    pub fn parse(content: &str) -> Self {
        let mut settings = Self::default();

        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => settings.parse_option(key.trim(), value.trim()),
                None => tracing::warn!("Ignoring malformed settings line: {}", line),
            }
        }

        settings
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key {
            "Server::ListenAddress" => {
                if value.parse::<std::net::IpAddr>().is_ok() {
                    self.listen_address = value.into();
                } else {
                    invalid(key, value);
                }
            }
            "Server::ListenPort" => parse_into(key, value, &mut self.listen_port),
            "Server::MaximumClientCount" => parse_into(key, value, &mut self.maximum_client_count),
            "Server::MessagesPerTick" => parse_into(key, value, &mut self.messages_per_tick),
            "Server::MaxQueuedStreams" => parse_into(key, value, &mut self.max_queued_streams),
            "Server::TickRateMs" => parse_into(key, value, &mut self.tick_rate_ms),
            "Server::ProtocolVersion" => parse_into(key, value, &mut self.protocol_version),
            "Server::VersionPolicy" => match VersionPolicy::parse(value) {
                Some(policy) => self.version_policy = policy,
                None => invalid(key, value),
            },
            _ => {
                tracing::debug!("Unknown setting: {} = {}", key, value);
            }
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.maximum_client_count == 0 {
            return Err(ConfigError::Invalid {
                key: "Server::MaximumClientCount",
                reason: "must allow at least one client".into(),
            });
        }
        if self.tick_rate_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "Server::TickRateMs",
                reason: "must be at least 1".into(),
            });
        }
        self.bind_address().map(|_| ())
    }

    /// Address for the TCP listener
    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.listen_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "Server::ListenAddress",
                reason: e.to_string(),
            })
    }

    /// Display settings summary
    pub fn display(&self) {
        tracing::info!("Server settings:");
        tracing::info!("    Bind: {}:{}", self.listen_address, self.listen_port);
        tracing::info!("    Max Clients: {}", self.maximum_client_count);
        tracing::info!("    Messages Per Tick: {}", self.messages_per_tick);
        tracing::info!("    Max Queued Streams: {}", self.max_queued_streams);
        tracing::info!("    Tick Rate: {}ms", self.tick_rate_ms);
        tracing::info!("    Version Policy: {:?} (protocol {})", self.version_policy, self.protocol_version);
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => invalid(key, value),
    }
}

fn invalid(key: &str, value: &str) {
    tracing::warn!("Failed to parse {} ('{}'), using default value", key, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.listen_port, 11595);
        assert_eq!(settings.listen_address, "0.0.0.0");
        assert_eq!(settings.maximum_client_count, 32);
        assert_eq!(settings.version_policy, VersionPolicy::MatchProtocol);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_simple_settings() {
        let text = r#"
# Network
Server::ListenAddress = 127.0.0.1
Server::ListenPort = 9999
Server::MaximumClientCount = 8
Server::VersionPolicy = strict
"#;
        let settings = Settings::parse(text);
        assert_eq!(settings.listen_address, "127.0.0.1");
        assert_eq!(settings.listen_port, 9999);
        assert_eq!(settings.maximum_client_count, 8);
        assert_eq!(settings.version_policy, VersionPolicy::Strict);
        assert_eq!(settings.bind_address().unwrap().to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let text = "Server::ListenPort = eleven\nServer::ListenAddress = localhost:80\nnonsense";
        let settings = Settings::parse(text);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Server::MessagesPerTick = 4").unwrap();
        writeln!(file, "Server::MaxQueuedStreams = 0").unwrap();

        let settings = Settings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.messages_per_tick, 4);
        assert_eq!(settings.max_queued_streams, 0);
    }

    #[test]
    fn test_load_rejects_invalid_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Server::TickRateMs = 0").unwrap();
        assert!(matches!(
            Settings::load_from_file(file.path()),
            Err(ConfigError::Invalid { key: "Server::TickRateMs", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load_from_file(dir.path().join("server.cfg")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(matches!(NetError::from(err), NetError::Config(_)));
    }

    #[test]
    fn test_version_policy() {
        let local = (EngineVersion::new(1, 2, 3, 4), 1);
        let same_protocol = (EngineVersion::new(9, 9, 9, 9), 1);
        let other_protocol = (EngineVersion::new(1, 2, 3, 4), 2);

        assert!(VersionPolicy::AcceptAll.accepts(local, other_protocol));
        assert!(VersionPolicy::MatchProtocol.accepts(local, same_protocol));
        assert!(!VersionPolicy::MatchProtocol.accepts(local, other_protocol));
        assert!(!VersionPolicy::Strict.accepts(local, same_protocol));
        assert!(VersionPolicy::Strict.accepts(local, local));
        assert_eq!(VersionPolicy::parse("AcceptAll"), Some(VersionPolicy::AcceptAll));
        assert_eq!(VersionPolicy::parse("loose"), None);
    }
}
