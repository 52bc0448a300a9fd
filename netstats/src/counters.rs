//! Counter value types
//!
//! A [`CounterSet`] is an unordered collection of [`Counters`] keyed by
//! [`Key`]. Sets are plain values: addition merges by key and sums,
//! subtraction takes the entry-wise difference. Subtraction never clamps.
//! A negative entry is a meaningful correction and must survive until it is
//! folded into a snapshot.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Uid sentinel meaning "every uid".
pub const UID_ALL: i32 = -1;
/// Tag sentinel meaning "untagged". Untagged entries already include the
/// traffic of every tag.
pub const TAG_NONE: u32 = 0;
/// Interface sentinel meaning "every interface".
pub const IFACE_ALL: &str = "*";

/// Foreground/background slicing of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Set {
    /// Every set.
    All,
    /// Background traffic.
    Default,
    /// Foreground traffic.
    Foreground,
}

impl Set {
    /// The integer written into pulled rows.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Set::All => -1,
            Set::Default => 0,
            Set::Foreground => 1,
        }
    }
}

/// A yes/no dimension that may also be aggregated over.
///
/// Used for meteredness, roaming and default-network status, both on entry
/// keys and as a template filter where [`Tristate::All`] matches anything.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tristate {
    /// Both values.
    #[default]
    All,
    /// Only `false`.
    No,
    /// Only `true`.
    Yes,
}

impl Tristate {
    /// The integer written into pulled rows.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Tristate::All => -1,
            Tristate::No => 0,
            Tristate::Yes => 1,
        }
    }

    /// Whether a filter of `self` admits a value of `other`.
    #[must_use]
    pub fn admits(self, other: Tristate) -> bool {
        self == Tristate::All || self == other
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value { Tristate::Yes } else { Tristate::No }
    }
}

/// Identity of one counter entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    /// Interface name, or [`IFACE_ALL`].
    pub iface: String,
    /// Owning uid, or [`UID_ALL`].
    pub uid: i32,
    /// Foreground/background slice.
    pub set: Set,
    /// Socket tag, or [`TAG_NONE`].
    pub tag: u32,
    /// Whether the network was metered.
    pub metered: Tristate,
    /// Whether the network was roaming.
    pub roaming: Tristate,
    /// Whether the network was the default network.
    pub default_network: Tristate,
}

impl Key {
    /// Untagged, background, unmetered, non-roaming traffic of `uid` on
    /// `iface`. Adjust the remaining dimensions with the `with_*` methods.
    #[must_use]
    pub fn new(iface: impl Into<String>, uid: i32) -> Self {
        Self {
            iface: iface.into(),
            uid,
            set: Set::Default,
            tag: TAG_NONE,
            metered: Tristate::No,
            roaming: Tristate::No,
            default_network: Tristate::No,
        }
    }

    /// Replace the set.
    #[must_use]
    pub fn with_set(mut self, set: Set) -> Self {
        self.set = set;
        self
    }

    /// Replace the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    /// Replace the meteredness.
    #[must_use]
    pub fn with_metered(mut self, metered: Tristate) -> Self {
        self.metered = metered;
        self
    }

    /// Replace the roaming state.
    #[must_use]
    pub fn with_roaming(mut self, roaming: Tristate) -> Self {
        self.roaming = roaming;
        self
    }

    /// Replace the default-network status.
    #[must_use]
    pub fn with_default_network(mut self, default_network: Tristate) -> Self {
        self.default_network = default_network;
        self
    }
}

/// The four accumulating fields of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counters {
    /// Bytes received.
    pub rx_bytes: i64,
    /// Packets received.
    pub rx_packets: i64,
    /// Bytes transmitted.
    pub tx_bytes: i64,
    /// Packets transmitted.
    pub tx_packets: i64,
}

impl Counters {
    /// All fields zero.
    pub const ZERO: Counters = Counters {
        rx_bytes: 0,
        rx_packets: 0,
        tx_bytes: 0,
        tx_packets: 0,
    };

    /// Create a new instance of `Counters`
    #[must_use]
    pub fn new(rx_bytes: i64, rx_packets: i64, tx_bytes: i64, tx_packets: i64) -> Self {
        Self {
            rx_bytes,
            rx_packets,
            tx_bytes,
            tx_packets,
        }
    }

    /// Whether every field is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Whether any field is negative.
    #[must_use]
    pub fn any_negative(&self) -> bool {
        self.rx_bytes < 0 || self.rx_packets < 0 || self.tx_bytes < 0 || self.tx_packets < 0
    }

    /// Every field raised to at least zero.
    #[must_use]
    pub fn clamp_negative(self) -> Self {
        self.map(|v| v.max(0))
    }

    /// Every field multiplied by `numerator / denominator`, rounding toward
    /// zero. `denominator` must be non-zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn scale(self, numerator: i64, denominator: i64) -> Self {
        debug_assert!(denominator != 0);
        // i128 intermediate; the quotient fits back in i64 when numerator <= denominator
        self.map(|v| (i128::from(v) * i128::from(numerator) / i128::from(denominator)) as i64)
    }

    fn map(self, f: impl Fn(i64) -> i64) -> Self {
        Self {
            rx_bytes: f(self.rx_bytes),
            rx_packets: f(self.rx_packets),
            tx_bytes: f(self.tx_bytes),
            tx_packets: f(self.tx_packets),
        }
    }
}

impl Add for Counters {
    type Output = Counters;

    fn add(self, rhs: Counters) -> Counters {
        Counters {
            rx_bytes: self.rx_bytes + rhs.rx_bytes,
            rx_packets: self.rx_packets + rhs.rx_packets,
            tx_bytes: self.tx_bytes + rhs.tx_bytes,
            tx_packets: self.tx_packets + rhs.tx_packets,
        }
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, rhs: Counters) {
        *self = *self + rhs;
    }
}

impl Sub for Counters {
    type Output = Counters;

    fn sub(self, rhs: Counters) -> Counters {
        self + (-rhs)
    }
}

impl SubAssign for Counters {
    fn sub_assign(&mut self, rhs: Counters) {
        *self = *self - rhs;
    }
}

impl Neg for Counters {
    type Output = Counters;

    fn neg(self) -> Counters {
        self.map(|v| -v)
    }
}

/// An unordered collection of counter entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSet {
    entries: FxHashMap<Key, Counters>,
}

impl CounterSet {
    /// Create an empty `CounterSet`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The counters stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Counters> {
        self.entries.get(key).copied()
    }

    /// Iterate entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Counters)> {
        self.entries.iter()
    }

    /// Entries ordered by key.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&Key, &Counters)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Fold `counters` into the entry for `key`, creating it if absent.
    pub fn combine(&mut self, key: Key, counters: Counters) {
        *self.entries.entry(key).or_default() += counters;
    }

    /// Entry-wise difference. Keys only in `self` keep their value, keys
    /// only in `other` are dropped, negative differences are kept.
    #[must_use]
    pub fn subtract(&self, other: &CounterSet) -> CounterSet {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| {
                let rhs = other.entries.get(key).copied().unwrap_or_default();
                (key.clone(), *value - rhs)
            })
            .collect();
        CounterSet { entries }
    }

    /// Sum of every entry.
    #[must_use]
    pub fn total(&self) -> Counters {
        self.entries
            .values()
            .fold(Counters::ZERO, |acc, counters| acc + *counters)
    }

    /// The entries whose key satisfies `predicate`.
    #[must_use]
    pub fn filter(&self, mut predicate: impl FnMut(&Key) -> bool) -> CounterSet {
        let entries = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        CounterSet { entries }
    }

    /// One entry per uid. Tagged entries are skipped since their traffic is
    /// already counted under [`TAG_NONE`].
    #[must_use]
    pub fn grouped_by_uid(&self) -> CounterSet {
        self.rollup(|key| Key {
            iface: IFACE_ALL.to_string(),
            uid: key.uid,
            set: Set::All,
            tag: TAG_NONE,
            metered: Tristate::All,
            roaming: Tristate::All,
            default_network: Tristate::All,
        })
    }

    /// One entry per uid and foreground/background set. Tagged entries are
    /// skipped.
    #[must_use]
    pub fn rollup_by_set(&self) -> CounterSet {
        self.rollup(|key| Key {
            iface: IFACE_ALL.to_string(),
            uid: key.uid,
            set: key.set,
            tag: TAG_NONE,
            metered: Tristate::All,
            roaming: Tristate::All,
            default_network: Tristate::All,
        })
    }

    fn rollup(&self, project: impl Fn(&Key) -> Key) -> CounterSet {
        let mut ret = CounterSet::new();
        for (key, value) in &self.entries {
            if key.tag != TAG_NONE {
                continue;
            }
            ret.combine(project(key), *value);
        }
        ret
    }
}

impl Add<&CounterSet> for &CounterSet {
    type Output = CounterSet;

    fn add(self, rhs: &CounterSet) -> CounterSet {
        let mut ret = self.clone();
        ret += rhs;
        ret
    }
}

impl Sub<&CounterSet> for &CounterSet {
    type Output = CounterSet;

    fn sub(self, rhs: &CounterSet) -> CounterSet {
        self.subtract(rhs)
    }
}

impl AddAssign<&CounterSet> for CounterSet {
    fn add_assign(&mut self, rhs: &CounterSet) {
        for (key, value) in &rhs.entries {
            self.combine(key.clone(), *value);
        }
    }
}

impl FromIterator<(Key, Counters)> for CounterSet {
    fn from_iter<I: IntoIterator<Item = (Key, Counters)>>(iter: I) -> Self {
        let mut ret = CounterSet::new();
        ret.extend(iter);
        ret
    }
}

impl Extend<(Key, Counters)> for CounterSet {
    fn extend<I: IntoIterator<Item = (Key, Counters)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.combine(key, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn wlan(uid: i32) -> Key {
        Key::new("wlan0", uid)
    }

    #[test]
    fn add_merges_by_key() {
        let a: CounterSet = [
            (wlan(1), Counters::new(10, 1, 20, 2)),
            (wlan(2), Counters::new(5, 1, 0, 0)),
        ]
        .into_iter()
        .collect();
        let b: CounterSet = [
            (wlan(1), Counters::new(1, 1, 1, 1)),
            (wlan(3), Counters::new(7, 0, 0, 0)),
        ]
        .into_iter()
        .collect();

        let sum = &a + &b;
        assert_eq!(sum.len(), 3);
        assert_eq!(sum.get(&wlan(1)), Some(Counters::new(11, 2, 21, 3)));
        assert_eq!(sum.get(&wlan(2)), Some(Counters::new(5, 1, 0, 0)));
        assert_eq!(sum.get(&wlan(3)), Some(Counters::new(7, 0, 0, 0)));
    }

    #[test]
    fn subtract_keeps_negative_and_minuend_only_keys() {
        let a: CounterSet = [
            (wlan(1), Counters::new(10, 1, 20, 2)),
            (wlan(2), Counters::new(5, 1, 0, 0)),
        ]
        .into_iter()
        .collect();
        let b: CounterSet = [
            (wlan(1), Counters::new(15, 1, 5, 3)),
            (wlan(9), Counters::new(100, 100, 100, 100)),
        ]
        .into_iter()
        .collect();

        let diff = &a - &b;
        assert_eq!(diff.len(), 2, "subtrahend-only keys are dropped");
        assert_eq!(diff.get(&wlan(1)), Some(Counters::new(-5, 0, 15, -1)));
        assert_eq!(diff.get(&wlan(2)), Some(Counters::new(5, 1, 0, 0)));
        assert!(diff.get(&wlan(9)).is_none());
    }

    #[test]
    fn combine_accumulates_same_key() {
        let mut set = CounterSet::new();
        set.combine(wlan(1), Counters::new(1, 1, 1, 1));
        set.combine(wlan(1), Counters::new(2, 2, 2, 2));
        assert_eq!(set.len(), 1);
        assert_eq!(set.total(), Counters::new(3, 3, 3, 3));
    }

    #[test]
    fn grouped_by_uid_skips_tags_and_merges_interfaces() {
        let set: CounterSet = [
            (wlan(1), Counters::new(10, 1, 10, 1)),
            (Key::new("rmnet0", 1).with_set(Set::Foreground), Counters::new(5, 1, 5, 1)),
            (wlan(1).with_tag(0xf00d), Counters::new(1000, 1000, 1000, 1000)),
            (wlan(2), Counters::new(3, 3, 3, 3)),
        ]
        .into_iter()
        .collect();

        let grouped = set.grouped_by_uid();
        assert_eq!(grouped.len(), 2);
        let sorted = grouped.sorted();
        assert_eq!(sorted[0].0.uid, 1);
        assert_eq!(*sorted[0].1, Counters::new(15, 2, 15, 2));
        assert_eq!(sorted[0].0.iface, IFACE_ALL);
        assert_eq!(sorted[0].0.set, Set::All);
        assert_eq!(sorted[1].0.uid, 2);
    }

    #[test]
    fn rollup_by_set_keeps_foreground_slicing() {
        let set: CounterSet = [
            (wlan(1), Counters::new(10, 1, 10, 1)),
            (wlan(1).with_set(Set::Foreground), Counters::new(5, 1, 5, 1)),
            (Key::new("eth0", 1).with_set(Set::Foreground), Counters::new(1, 1, 1, 1)),
        ]
        .into_iter()
        .collect();

        let rolled = set.rollup_by_set();
        assert_eq!(rolled.len(), 2);
        let fg = rolled
            .iter()
            .find(|(key, _)| key.set == Set::Foreground)
            .map(|(_, value)| *value);
        assert_eq!(fg, Some(Counters::new(6, 2, 6, 2)));
    }

    #[test]
    fn scale_rounds_toward_zero() {
        let c = Counters::new(10, 3, -10, 7);
        assert_eq!(c.scale(1, 3), Counters::new(3, 1, -3, 2));
        assert_eq!(c.scale(3, 3), c);
    }

    #[test]
    fn tristate_admits() {
        assert!(Tristate::All.admits(Tristate::Yes));
        assert!(Tristate::All.admits(Tristate::No));
        assert!(Tristate::Yes.admits(Tristate::Yes));
        assert!(!Tristate::Yes.admits(Tristate::No));
    }
}
