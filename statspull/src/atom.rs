//! Network atoms
//!
//! An [`Atom`] names one kind of pulled metric. It knows which template and
//! tag slicing its cumulative counters come from and how to slice those
//! counters into [`Row`]s.

use netstats::{
    CounterSet, Counters, Key, Set, Template, Tristate,
    counters::{IFACE_ALL, TAG_NONE, UID_ALL},
};
use serde::{Deserialize, Serialize, ser::SerializeMap};

/// The network atoms this puller knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atom {
    /// Wi-Fi traffic per uid.
    WifiBytesTransfer,
    /// Wi-Fi traffic per uid and foreground state.
    WifiBytesTransferByFgBg,
    /// Cellular traffic per uid.
    MobileBytesTransfer,
    /// Cellular traffic per uid and foreground state.
    MobileBytesTransferByFgBg,
    /// Traffic on every network per uid, tag and meteredness.
    BytesTransferByTagAndMetered,
    /// Total cellular traffic of the device.
    DataUsageBytesTransfer,
}

impl Atom {
    /// Every atom.
    pub const ALL: [Atom; 6] = [
        Atom::WifiBytesTransfer,
        Atom::WifiBytesTransferByFgBg,
        Atom::MobileBytesTransfer,
        Atom::MobileBytesTransferByFgBg,
        Atom::BytesTransferByTagAndMetered,
        Atom::DataUsageBytesTransfer,
    ];

    /// Name used in output and telemetry labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Atom::WifiBytesTransfer => "wifi_bytes_transfer",
            Atom::WifiBytesTransferByFgBg => "wifi_bytes_transfer_by_fg_bg",
            Atom::MobileBytesTransfer => "mobile_bytes_transfer",
            Atom::MobileBytesTransferByFgBg => "mobile_bytes_transfer_by_fg_bg",
            Atom::BytesTransferByTagAndMetered => "bytes_transfer_by_tag_and_metered",
            Atom::DataUsageBytesTransfer => "data_usage_bytes_transfer",
        }
    }

    /// The template the atom's counters are accumulated under.
    #[must_use]
    pub fn template(self) -> Template {
        match self {
            Atom::WifiBytesTransfer | Atom::WifiBytesTransferByFgBg => Template::wifi(),
            Atom::MobileBytesTransfer
            | Atom::MobileBytesTransferByFgBg
            | Atom::DataUsageBytesTransfer => Template::mobile(),
            Atom::BytesTransferByTagAndMetered => Template::default(),
        }
    }

    /// Whether the atom slices by socket tag.
    #[must_use]
    pub fn include_tags(self) -> bool {
        matches!(self, Atom::BytesTransferByTagAndMetered)
    }

    /// Slice cumulative `stats` into rows, ordered by key.
    #[must_use]
    pub fn rows(self, stats: &CounterSet) -> Vec<Row> {
        match self {
            Atom::WifiBytesTransfer | Atom::MobileBytesTransfer => stats
                .grouped_by_uid()
                .sorted()
                .into_iter()
                .map(|(key, value)| self.row(vec![("uid", i64::from(key.uid))], *value))
                .collect(),
            Atom::WifiBytesTransferByFgBg | Atom::MobileBytesTransferByFgBg => stats
                .rollup_by_set()
                .sorted()
                .into_iter()
                .map(|(key, value)| {
                    self.row(
                        vec![
                            ("uid", i64::from(key.uid)),
                            ("is_foreground", i64::from(key.set == Set::Foreground)),
                        ],
                        *value,
                    )
                })
                .collect(),
            Atom::BytesTransferByTagAndMetered => slice(stats, |key| Key {
                iface: IFACE_ALL.to_string(),
                uid: key.uid,
                set: Set::All,
                tag: key.tag,
                metered: key.metered,
                roaming: Tristate::All,
                default_network: Tristate::All,
            })
            .sorted()
            .into_iter()
            .map(|(key, value)| {
                self.row(
                    vec![
                        ("uid", i64::from(key.uid)),
                        ("is_metered", i64::from(key.metered == Tristate::Yes)),
                        ("tag", i64::from(key.tag)),
                    ],
                    *value,
                )
            })
            .collect(),
            Atom::DataUsageBytesTransfer => {
                let total = stats.filter(|key| key.tag == TAG_NONE).total();
                vec![self.row(vec![("uid", i64::from(UID_ALL))], total)]
            }
        }
    }

    fn row(self, mut fields: Vec<(&'static str, i64)>, value: Counters) -> Row {
        fields.extend([
            ("rx_bytes", value.rx_bytes),
            ("rx_packets", value.rx_packets),
            ("tx_bytes", value.tx_bytes),
            ("tx_packets", value.tx_packets),
        ]);
        Row { atom: self, fields }
    }
}

fn slice(stats: &CounterSet, project: impl Fn(&Key) -> Key) -> CounterSet {
    stats
        .iter()
        .map(|(key, value)| (project(key), *value))
        .collect()
}

/// One pulled metric row: an atom and its ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    atom: Atom,
    fields: Vec<(&'static str, i64)>,
}

impl Row {
    /// The atom this row belongs to.
    #[must_use]
    pub fn atom(&self) -> Atom {
        self.atom
    }

    /// Fields in write order.
    #[must_use]
    pub fn fields(&self) -> &[(&'static str, i64)] {
        &self.fields
    }

    /// The value of field `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("atom", self.atom.name())?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
