//! Switch port eligibility classification.
//!
//! A cable is only ever created onto an `Access` port. Every other
//! classification short-circuits the correlator before it reaches the
//! state store.

use regex::Regex;

/// Default uplink-name/description patterns, used when the operator does
/// not override `UPLINK_PATTERNS`.
pub const DEFAULT_UPLINK_PATTERNS: &[&str] = &[
    "uplink",
    "to[-_]?spine",
    "trunk",
    "peer",
    "mlag",
    "lag",
    "^po\\d+",
    "port[-_]?channel",
];

/// Port classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Connected to a single end host; eligible for cabling.
    Access,
    /// Connected to another switch.
    Uplink,
    /// Member of a link aggregation group.
    LagMember,
}

/// Result of classifying a single port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub port_type: PortType,
    pub reason: String,
    pub is_allowed: bool,
}

/// Classifies switch ports using an explicit uplink-port list plus a
/// compiled case-insensitive alternation over uplink name/description
/// patterns.
pub struct PortClassifier {
    uplink_ports: Vec<String>,
    uplink_pattern: Regex,
}

impl PortClassifier {
    /// Builds a classifier from an explicit uplink-port allowlist and a
    /// set of regex fragments, combined into a single case-insensitive
    /// alternation (mirrors `Config.get_uplink_pattern`).
    ///
    /// Panics if any pattern fails to compile; patterns are operator
    /// configuration, validated at startup.
    pub fn new(uplink_ports: Vec<String>, uplink_patterns: &[String]) -> Self {
        let combined = uplink_patterns
            .iter()
            .map(|p| format!("({p})"))
            .collect::<Vec<_>>()
            .join("|");
        let uplink_pattern = Regex::new(&format!("(?i){combined}"))
            .expect("uplink pattern configuration must compile");

        Self {
            uplink_ports,
            uplink_pattern,
        }
    }

    /// Classifies a single port. Rules are evaluated in order; the first
    /// match wins.
    pub fn classify(
        &self,
        port_name: &str,
        description: Option<&str>,
        is_lag_member: bool,
        lldp_neighbor_is_switch: bool,
    ) -> Classification {
        if self.uplink_ports.iter().any(|p| p == port_name) {
            return Classification {
                port_type: PortType::Uplink,
                reason: format!("port in uplink list: {port_name}"),
                is_allowed: false,
            };
        }

        if let Some(description) = description.filter(|d| !d.is_empty()) {
            if let Some(m) = self.uplink_pattern.find(description) {
                return Classification {
                    port_type: PortType::Uplink,
                    reason: format!("description matches uplink pattern: '{}'", m.as_str()),
                    is_allowed: false,
                };
            }
        }

        if let Some(m) = self.uplink_pattern.find(port_name) {
            return Classification {
                port_type: PortType::Uplink,
                reason: format!("port name matches uplink pattern: '{}'", m.as_str()),
                is_allowed: false,
            };
        }

        if is_lag_member {
            return Classification {
                port_type: PortType::LagMember,
                reason: "port is LAG member".to_string(),
                is_allowed: false,
            };
        }

        if lldp_neighbor_is_switch {
            return Classification {
                port_type: PortType::Uplink,
                reason: "LLDP neighbor is a switch".to_string(),
                is_allowed: false,
            };
        }

        Classification {
            port_type: PortType::Access,
            reason: "no uplink/trunk indicators found".to_string(),
            is_allowed: true,
        }
    }

    /// Convenience wrapper returning only [`Classification::is_allowed`].
    pub fn is_access_port(
        &self,
        port_name: &str,
        description: Option<&str>,
        is_lag_member: bool,
        lldp_neighbor_is_switch: bool,
    ) -> bool {
        self.classify(port_name, description, is_lag_member, lldp_neighbor_is_switch)
            .is_allowed
    }
}

fn default_patterns() -> Vec<String> {
    DEFAULT_UPLINK_PATTERNS.iter().map(|s| s.to_string()).collect()
}

impl Default for PortClassifier {
    fn default() -> Self {
        Self::new(Vec::new(), &default_patterns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classifier() -> PortClassifier {
        PortClassifier::new(
            vec![
                "Ethernet49".to_string(),
                "Ethernet50".to_string(),
                "Ethernet51".to_string(),
                "Ethernet52".to_string(),
            ],
            &default_patterns(),
        )
    }

    #[test]
    fn access_port() {
        let result = classifier().classify("Ethernet1", None, false, false);
        assert_eq!(result.port_type, PortType::Access);
        assert!(result.is_allowed);
    }

    #[test]
    fn uplink_by_name() {
        let result = classifier().classify("Ethernet49", None, false, false);
        assert_eq!(result.port_type, PortType::Uplink);
        assert!(!result.is_allowed);
        assert!(result.reason.contains("uplink list"));
    }

    #[test]
    fn uplink_by_description() {
        let result = classifier().classify("Ethernet10", Some("uplink to spine01"), false, false);
        assert_eq!(result.port_type, PortType::Uplink);
        assert!(result.reason.to_lowercase().contains("uplink"));
    }

    #[test]
    fn trunk_by_description() {
        let result = classifier().classify("Ethernet10", Some("trunk port"), false, false);
        assert_eq!(result.port_type, PortType::Uplink);
    }

    #[test]
    fn lag_member() {
        let result = classifier().classify("Ethernet10", None, true, false);
        assert_eq!(result.port_type, PortType::LagMember);
        assert!(!result.is_allowed);
    }

    #[test]
    fn lldp_neighbor_switch() {
        let result = classifier().classify("Ethernet10", None, false, true);
        assert_eq!(result.port_type, PortType::Uplink);
        assert!(result.reason.contains("LLDP"));
    }

    #[test]
    fn port_channel_name() {
        let result = classifier().classify("Po1", None, false, false);
        assert_eq!(result.port_type, PortType::Uplink);
    }

    #[test]
    fn mlag_description() {
        let result = classifier().classify("Ethernet10", Some("mlag peer-link"), false, false);
        assert_eq!(result.port_type, PortType::Uplink);
    }

    #[test]
    fn is_access_port_helper() {
        let c = classifier();
        assert!(c.is_access_port("Ethernet1", None, false, false));
        assert!(!c.is_access_port("Ethernet49", None, false, false));
        assert!(!c.is_access_port("Ethernet10", Some("uplink"), false, false));
    }

    #[test]
    fn rule_order_name_wins_over_description_indicators() {
        // An explicit uplink_ports entry matches even with an access-looking description.
        let result = classifier().classify("Ethernet49", Some("server nic"), false, false);
        assert_eq!(result.port_type, PortType::Uplink);
    }
}
