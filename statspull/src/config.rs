//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::{Path, PathBuf},
};

use netstats::Transport;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::atom::Atom;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// The atom list names the same atom twice
    #[error("Duplicate atom found: {0}")]
    DuplicateAtom(&'static str),
    /// History would be evicted before accumulators fold it into their
    /// snapshots
    #[error(
        "Retention of {retention}ms must exceed twice the bucket duration of {bucket_duration}ms"
    )]
    RetentionTooShort {
        /// Configured retention, milliseconds
        retention: u64,
        /// Configured bucket duration, milliseconds
        bucket_duration: u32,
    },
}

fn default_bucket_duration() -> NonZeroU32 {
    NonZeroU32::new(3_600_000).unwrap_or(NonZeroU32::MIN)
}

fn default_retention() -> NonZeroU64 {
    // 14 days
    NonZeroU64::new(14 * 24 * 3_600_000).unwrap_or(NonZeroU64::MIN)
}

fn default_sample_period() -> NonZeroU64 {
    NonZeroU64::new(1_000).unwrap_or(NonZeroU64::MIN)
}

fn default_pull_period() -> NonZeroU64 {
    NonZeroU64::new(60_000).unwrap_or(NonZeroU64::MIN)
}

fn default_atoms() -> Vec<Atom> {
    Atom::ALL.to_vec()
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Duration of a history bucket. Accumulators compact at this
    /// granularity.
    #[serde(default = "default_bucket_duration")]
    pub bucket_duration_milliseconds: NonZeroU32,
    /// How much history the recorder keeps.
    #[serde(default = "default_retention")]
    pub retention_milliseconds: NonZeroU64,
    /// The period on which interface counters are sampled.
    #[serde(default = "default_sample_period")]
    pub sample_period_milliseconds: NonZeroU64,
    /// The period on which atoms are pulled.
    #[serde(default = "default_pull_period")]
    pub pull_period_milliseconds: NonZeroU64,
    /// Transport of specific interfaces, overriding name-based detection.
    #[serde(default)]
    pub interfaces: FxHashMap<String, Transport>,
    /// The atoms to pull.
    #[serde(default = "default_atoms")]
    pub atoms: Vec<Atom>,
    /// The method by which to express telemetry
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub telemetry: Option<Telemetry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_duration_milliseconds: default_bucket_duration(),
            retention_milliseconds: default_retention(),
            sample_period_milliseconds: default_sample_period(),
            pull_period_milliseconds: default_pull_period(),
            interfaces: FxHashMap::default(),
            atoms: default_atoms(),
            telemetry: None,
        }
    }
}

impl Config {
    /// Parse a configuration from YAML.
    ///
    /// # Errors
    ///
    /// Function will error if the YAML is malformed, names an atom twice or
    /// keeps no more than two buckets of history.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        for (idx, atom) in config.atoms.iter().enumerate() {
            if config.atoms[..idx].contains(atom) {
                return Err(Error::DuplicateAtom(atom.name()));
            }
        }
        // an accumulator's snapshot trails `now` by up to two buckets
        let bucket_duration = config.bucket_duration_milliseconds.get();
        let retention = config.retention_milliseconds.get();
        if retention <= 2 * u64::from(bucket_duration) {
            return Err(Error::RetentionTooShort {
                retention,
                bucket_duration,
            });
        }
        Ok(config)
    }

    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or does not parse, see
    /// [`Config::from_yaml`].
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }
}

/// Defines the manner of statspull's telemetry.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum Telemetry {
    /// Emit internal telemetry for scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}
