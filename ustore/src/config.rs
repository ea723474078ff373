//! `Config` loading (§6.4): a line-based `key: value` text file, not a
//! TOML/YAML document — the spec's own text describes a plain config
//! file in that shape (mirroring the original `include/utils/env.h`
//! loader), unlike the teacher's YAML/JSON `config.json`. Unknown keys
//! are rejected rather than silently ignored.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ustore_primitives::UError;

/// Lucene wrapper set/list dedup flag (§9 Open Question #2): modeled and
/// surfaced as a config option even though no Lucene adapter exists in
/// this workspace — Lucene integration itself is out of scope (§1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display)]
pub enum Dedup {
    Set,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Path to the file listing worker node addresses (§4.10 partitioner
    /// host list).
    pub worker_file: PathBuf,
    /// Path to the file listing chunk-server addresses this node's
    /// partitioner fetch client dials.
    pub chunk_server_file: PathBuf,
    /// Threads dedicated to receiving inbound wire-protocol connections.
    pub recv_threads: usize,
    /// Threads dedicated to servicing dispatched requests.
    pub service_threads: usize,
    /// Directory holding the segment file and the head-version
    /// `rocksdb` database.
    pub data_dir: PathBuf,
    /// Port the operator-facing HTTP status/metrics endpoint listens on.
    pub http_port: u16,
    /// Expected concurrent client count, sized for connection-pool
    /// pre-allocation.
    pub n_clients: usize,
    /// Number of pre-allocated segments in a fresh segment file (§4.1).
    pub num_segments: usize,
    pub dedup: Dedup,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_file: PathBuf::from("workers.txt"),
            chunk_server_file: PathBuf::from("chunk_servers.txt"),
            recv_threads: 4,
            service_threads: 4,
            data_dir: PathBuf::from("./data"),
            http_port: 8080,
            n_clients: 64,
            num_segments: 64,
            dedup: Dedup::Set,
        }
    }
}

impl Config {
    /// Parse a `key: value`-per-line config file. Blank lines and lines
    /// starting with `#` are skipped. Every other line must match a
    /// known key or the whole load fails — matching §6.4's text ("the
    /// option list below"; nothing else is accepted).
    pub fn load(path: impl AsRef<Path>) -> Result<Config, UError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, UError> {
        let mut config = Config::default();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                UError::InvalidCommandArgument(format!(
                    "config line {}: expected `key: value`, got {raw_line:?}",
                    lineno + 1
                ))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "worker_file" => config.worker_file = PathBuf::from(value),
                "chunk_server_file" => config.chunk_server_file = PathBuf::from(value),
                "recv_threads" => config.recv_threads = parse_field(key, value)?,
                "service_threads" => config.service_threads = parse_field(key, value)?,
                "data_dir" => config.data_dir = PathBuf::from(value),
                "http_port" => config.http_port = parse_field(key, value)?,
                "n_clients" => config.n_clients = parse_field(key, value)?,
                "num_segments" => config.num_segments = parse_field(key, value)?,
                "dedup" => {
                    config.dedup = Dedup::from_str(value).map_err(|_| {
                        UError::InvalidCommandArgument(format!(
                            "config line {}: unknown dedup value {value:?}",
                            lineno + 1
                        ))
                    })?
                }
                other => {
                    return Err(UError::InvalidCommandArgument(format!(
                        "config line {}: unknown key {other:?}",
                        lineno + 1
                    )));
                }
            }
        }
        Ok(config)
    }

    /// Read the partitioner's static host list out of `worker_file`: one
    /// `host:port` per line.
    pub fn load_hosts(&self) -> Result<Vec<String>, UError> {
        Self::load_lines(&self.worker_file)
    }

    /// Read the chunk-fetch server addresses out of `chunk_server_file`,
    /// one `host:port` per line — the partitioner's ownership list
    /// (§4.10). A single-entry or missing list means this node never
    /// needs to fetch a chunk remotely.
    pub fn load_chunk_servers(&self) -> Result<Vec<String>, UError> {
        Self::load_lines(&self.chunk_server_file)
    }

    fn load_lines(path: &Path) -> Result<Vec<String>, UError> {
        let text = std::fs::read_to_string(path)?;
        Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}

fn parse_field<T: FromStr>(key: &str, value: &str) -> Result<T, UError> {
    value
        .parse()
        .map_err(|_| UError::InvalidCommandArgument(format!("config key {key:?}: invalid value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys() {
        let text = "data_dir: /var/ustore\nhttp_port: 9000\ndedup: List\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/ustore"));
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.dedup, Dedup::List);
    }

    #[test]
    fn rejects_unknown_key() {
        let text = "bogus_option: 1\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let text = "# a comment\n\nhttp_port: 1234\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.http_port, 1234);
    }
}
