//! Server Configuration
//!
//! Options are read from a plain-text file of whitespace-delimited
//! `key value` lines (`#` starts a comment, the last occurrence of a key
//! wins), optionally overridden by command-line flags in `main`. The parsed
//! value is frozen into an `Arc<ServerConfig>` and injected into every
//! constructor; nothing reads configuration through a global.

use std::io;
use std::path::Path;

/// The default port the server listens on (same as Redis).
pub const DEFAULT_PORT: u16 = 6379;

/// The default host the server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// All server options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind (`bind`).
    pub bind: String,
    /// Port to listen on (`port`).
    pub port: u16,
    /// Whether mutations are appended to the AOF (`appendOnly`).
    pub append_only: bool,
    /// AOF file path (`appendFilename`).
    pub append_filename: String,
    /// Maximum simultaneous client connections; 0 = unlimited
    /// (`maxclients`).
    pub max_clients: usize,
    /// Shared password; empty = no authentication (`requirepass`).
    pub require_pass: String,
    /// Number of logical databases (`databases`).
    pub databases: usize,
    /// RDB file name (`dbfilename`); parsed for compatibility, unused.
    pub db_filename: String,
    /// Peer node addresses, comma-separated `host:port` (`peers`).
    pub peers: Vec<String>,
    /// This node's own `host:port` (`self`). Cluster mode is enabled when
    /// both `self` and `peers` are non-empty.
    pub self_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            append_only: true,
            append_filename: "aof.txt".to_string(),
            max_clients: 0,
            require_pass: String::new(),
            databases: 16,
            db_filename: String::new(),
            peers: Vec::new(),
            self_addr: String::new(),
        }
    }
}

impl ServerConfig {
    /// Parses configuration text, starting from the defaults.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            let mut parts = line.split_whitespace();
            let key = match parts.next() {
                Some(k) => k.to_ascii_lowercase(),
                None => continue,
            };
            let value = match parts.next() {
                Some(v) => v,
                None => continue,
            };

            match key.as_str() {
                "bind" => config.bind = value.to_string(),
                "port" => {
                    if let Ok(port) = value.parse() {
                        config.port = port;
                    }
                }
                "appendonly" => config.append_only = parse_bool(value),
                "appendfilename" => config.append_filename = value.to_string(),
                "maxclients" => {
                    if let Ok(n) = value.parse() {
                        config.max_clients = n;
                    }
                }
                "requirepass" => config.require_pass = value.to_string(),
                "databases" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n > 0 {
                            config.databases = n;
                        }
                    }
                }
                "dbfilename" => config.db_filename = value.to_string(),
                "peers" => {
                    config.peers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "self" => config.self_addr = value.to_string(),
                _ => {}
            }
        }

        config
    }

    /// Loads configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// The `host:port` string to bind the listener to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// True when this node should run as a cluster member.
    pub fn cluster_enabled(&self) -> bool {
        !self.self_addr.is_empty() && !self.peers.is_empty()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert!(config.append_only);
        assert_eq!(config.append_filename, "aof.txt");
        assert_eq!(config.databases, 16);
        assert!(!config.cluster_enabled());
    }

    #[test]
    fn parses_keys_case_insensitively() {
        let config = ServerConfig::parse(
            "bind 0.0.0.0\n\
             PORT 6380\n\
             appendOnly no\n\
             appendFilename data.aof\n\
             requirepass sekret\n\
             databases 4\n",
        );
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6380);
        assert!(!config.append_only);
        assert_eq!(config.append_filename, "data.aof");
        assert_eq!(config.require_pass, "sekret");
        assert_eq!(config.databases, 4);
    }

    #[test]
    fn last_occurrence_wins() {
        let config = ServerConfig::parse("port 6380\nport 7000\n");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let config = ServerConfig::parse("# a comment\n\nport 6390 # trailing\n");
        assert_eq!(config.port, 6390);
    }

    #[test]
    fn peers_and_self_enable_cluster() {
        let config =
            ServerConfig::parse("peers 10.0.0.1:6379,10.0.0.2:6379\nself 10.0.0.3:6379\n");
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.self_addr, "10.0.0.3:6379");
        assert!(config.cluster_enabled());
    }

    #[test]
    fn bad_numeric_values_keep_defaults() {
        let config = ServerConfig::parse("port notaport\ndatabases 0\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.databases, 16);
    }
}
