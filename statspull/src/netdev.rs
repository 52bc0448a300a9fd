//! Interface counters from `/proc/net/dev`
//!
//! The kernel reports cumulative per-interface counters since boot. These
//! carry no uid, set or tag, so every entry is keyed as uid-all, untagged and
//! set-all. Meteredness follows the interface transport: cellular is
//! metered.

use std::path::Path;

use netstats::{
    CounterSet, Counters, Key, Set, Transport, Tristate,
    counters::{TAG_NONE, UID_ALL},
};
use rustc_hash::FxHashMap;

/// The usual location of the interface counters.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

#[derive(thiserror::Error, Debug)]
/// Errors produced by functions in this module
pub enum Error {
    /// Wrapper for [`std::io::Error`]
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Unable to parse /proc/net/dev
    #[error("/proc/net/dev malformed: {0}")]
    Malformed(&'static str),
    /// Unable to parse integer
    #[error("Integer Parsing: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

/// Maps interface names to transports.
///
/// Explicit entries win; otherwise the transport is guessed from the
/// interface name prefix.
#[derive(Debug, Clone, Default)]
pub struct Interfaces {
    overrides: FxHashMap<String, Transport>,
}

impl Interfaces {
    /// Create a new `Interfaces` with explicit `overrides`.
    #[must_use]
    pub fn new(overrides: FxHashMap<String, Transport>) -> Self {
        Self { overrides }
    }

    /// The transport of `iface`, if known.
    #[must_use]
    pub fn transport(&self, iface: &str) -> Option<Transport> {
        if let Some(transport) = self.overrides.get(iface) {
            return Some(*transport);
        }
        const PREFIXES: [(&str, Transport); 7] = [
            ("wlan", Transport::Wifi),
            ("rmnet", Transport::Mobile),
            ("ccmni", Transport::Mobile),
            ("wwan", Transport::Mobile),
            ("bt-pan", Transport::Bluetooth),
            ("eth", Transport::Ethernet),
            ("en", Transport::Ethernet),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| iface.starts_with(prefix))
            .map(|(_, transport)| *transport)
    }
}

/// One reading of the interface counters.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Since-boot counters, one entry per interface.
    pub counters: CounterSet,
    /// Transport of each interface with a known transport.
    pub transports: Vec<(String, Transport)>,
}

/// Read interface counters from `path`, normally [`PROC_NET_DEV`].
///
/// # Errors
///
/// Function errors if the file cannot be read or is malformed.
pub async fn poll(path: &Path, interfaces: &Interfaces) -> Result<Snapshot, Error> {
    let buf = tokio::fs::read_to_string(path).await?;
    snapshot(&buf, interfaces)
}

/// Build a [`Snapshot`] from the contents of `/proc/net/dev`. The loopback
/// interface is skipped.
///
/// # Errors
///
/// Function errors if the contents are malformed.
pub fn snapshot(contents: &str, interfaces: &Interfaces) -> Result<Snapshot, Error> {
    let mut snapshot = Snapshot::default();
    for (iface, counters) in proc_net_dev_inner(contents)? {
        if iface == "lo" {
            continue;
        }
        let transport = interfaces.transport(iface);
        let key = Key::new(iface, UID_ALL)
            .with_set(Set::All)
            .with_tag(TAG_NONE)
            .with_metered(Tristate::from(transport == Some(Transport::Mobile)));
        snapshot.counters.combine(key, counters);
        if let Some(transport) = transport {
            snapshot.transports.push((iface.to_string(), transport));
        }
    }
    Ok(snapshot)
}

/// Parse `/proc/net/dev`.
///
/// After two header lines each line reads `iface: <8 receive fields> <8
/// transmit fields>`; bytes and packets lead each group.
fn proc_net_dev_inner(contents: &str) -> Result<Vec<(&str, Counters)>, Error> {
    let mut ret = Vec::new();
    for line in contents.lines().skip(2) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (iface, fields) = line
            .split_once(':')
            .ok_or(Error::Malformed("line does not contain interface name"))?;
        let fields: Vec<&str> = fields.split_whitespace().collect();
        if fields.len() < 16 {
            return Err(Error::Malformed("line contains fewer than sixteen fields"));
        }

        let counters = Counters::new(
            fields[0].parse()?,
            fields[1].parse()?,
            fields[8].parse()?,
            fields[9].parse()?,
        );
        ret.push((iface.trim(), counters));
    }
    Ok(ret)
}
