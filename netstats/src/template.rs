//! Network templates
//!
//! A [`Template`] selects which counter entries a query aggregates. Together
//! with the include-tags flag it forms the identity of an
//! [`crate::Accumulator`].

use serde::{Deserialize, Serialize};

use crate::counters::{Key, Tristate};

/// The kind of network an interface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Wi-Fi.
    Wifi,
    /// Cellular.
    Mobile,
    /// Wired ethernet.
    Ethernet,
    /// Bluetooth tethering.
    Bluetooth,
}

/// Which transport a [`Template`] selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Every interface, including those with no known transport.
    #[default]
    All,
    /// Wi-Fi interfaces.
    Wifi,
    /// Cellular interfaces.
    Mobile,
    /// Ethernet interfaces.
    Ethernet,
    /// Bluetooth interfaces.
    Bluetooth,
}

impl MatchRule {
    /// Whether an interface of `transport` is selected. Interfaces of unknown
    /// transport are selected only by [`MatchRule::All`].
    #[must_use]
    pub fn matches(self, transport: Option<Transport>) -> bool {
        match (self, transport) {
            (MatchRule::All, _) => true,
            (MatchRule::Wifi, Some(Transport::Wifi))
            | (MatchRule::Mobile, Some(Transport::Mobile))
            | (MatchRule::Ethernet, Some(Transport::Ethernet))
            | (MatchRule::Bluetooth, Some(Transport::Bluetooth)) => true,
            _ => false,
        }
    }
}

/// Filter over counter entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    /// Transport selection.
    #[serde(default)]
    pub rule: MatchRule,
    /// Meteredness filter.
    #[serde(default)]
    pub metered: Tristate,
    /// Roaming filter.
    #[serde(default)]
    pub roaming: Tristate,
    /// Default-network filter.
    #[serde(default)]
    pub default_network: Tristate,
}

impl Template {
    /// A template selecting every entry of `rule`'s transport.
    #[must_use]
    pub fn new(rule: MatchRule) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    /// Every Wi-Fi entry.
    #[must_use]
    pub fn wifi() -> Self {
        Self::new(MatchRule::Wifi)
    }

    /// Every cellular entry.
    #[must_use]
    pub fn mobile() -> Self {
        Self::new(MatchRule::Mobile)
    }

    /// Replace the meteredness filter.
    #[must_use]
    pub fn with_metered(mut self, metered: Tristate) -> Self {
        self.metered = metered;
        self
    }

    /// Whether the entry under `key`, carried on an interface of `transport`,
    /// is selected.
    #[must_use]
    pub fn matches(&self, key: &Key, transport: Option<Transport>) -> bool {
        self.rule.matches(transport)
            && self.metered.admits(key.metered)
            && self.roaming.admits(key.roaming)
            && self.default_network.admits(key.default_network)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_transport_only_matches_all() {
        assert!(MatchRule::All.matches(None));
        assert!(!MatchRule::Wifi.matches(None));
        assert!(!MatchRule::Mobile.matches(Some(Transport::Wifi)));
        assert!(MatchRule::Mobile.matches(Some(Transport::Mobile)));
    }

    #[test]
    fn filters_apply_to_key_dimensions() {
        let metered = Key::new("rmnet0", 10).with_metered(Tristate::Yes);
        let unmetered = Key::new("rmnet0", 10);

        let template = Template::mobile().with_metered(Tristate::Yes);
        assert!(template.matches(&metered, Some(Transport::Mobile)));
        assert!(!template.matches(&unmetered, Some(Transport::Mobile)));
        assert!(Template::mobile().matches(&unmetered, Some(Transport::Mobile)));
    }
}
