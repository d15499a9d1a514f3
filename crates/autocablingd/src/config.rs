//! Environment-variable configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("NETBOX_URL and NETBOX_TOKEN are required")]
    MissingNetboxCredentials,
}

/// Application configuration, assembled from environment variables with
/// defaults matching the original implementation's `Config.from_env`.
#[derive(Debug, Clone)]
pub struct Config {
    pub netbox_url: String,
    pub netbox_token: String,
    pub netbox_verify_ssl: bool,

    pub switches_role: Option<String>,

    /// Candidate OOB interface name hints. Currently informational only;
    /// OOB discovery keys off NetBox's `has_oob_ip` flag rather than name.
    pub ipmi_interface_names: Vec<String>,

    pub snmp_community: String,
    pub snmp_version: String,
    pub snmp_timeout_secs: u64,
    pub snmp_retries: u32,

    pub uplink_ports: Vec<String>,
    pub uplink_patterns: Vec<String>,

    pub stability_runs: i64,
    pub state_db_path: String,

    pub poll_interval_secs: u64,
    pub dry_run: bool,
    pub cable_status: String,

    pub mlag_groups: Vec<(String, String)>,
}

impl Config {
    /// Loads configuration from environment variables. Does not validate
    /// required fields; call [`Config::validate`] before using it.
    pub fn from_env() -> Self {
        let ipmi_interface_names = std::env::var("IPMI_INTERFACE_NAMES")
            .ok()
            .map(|v| split_csv(&v))
            .unwrap_or_else(|| vec!["IPMI", "BMC", "MGMT", "iLO", "iDRAC", "CIMC"].into_iter().map(String::from).collect());

        let uplink_ports = std::env::var("UPLINK_PORTS").ok().map(|v| split_csv(&v)).unwrap_or_default();

        let uplink_patterns = std::env::var("UPLINK_PATTERNS")
            .ok()
            .map(|v| split_csv(&v))
            .unwrap_or_else(|| autocabling_portclass::DEFAULT_UPLINK_PATTERNS.iter().map(|s| s.to_string()).collect());

        let mlag_groups = std::env::var("MLAG_GROUPS")
            .ok()
            .map(|v| parse_mlag_groups(&v))
            .unwrap_or_default();

        Config {
            netbox_url: std::env::var("NETBOX_URL").unwrap_or_default(),
            netbox_token: std::env::var("NETBOX_TOKEN").unwrap_or_default(),
            netbox_verify_ssl: env_bool("NETBOX_VERIFY_SSL", false),

            switches_role: std::env::var("SWITCHES_ROLE").ok().filter(|s| !s.is_empty()),

            ipmi_interface_names,

            snmp_community: std::env::var("SNMP_COMMUNITY").unwrap_or_else(|_| "public".to_string()),
            snmp_version: std::env::var("SNMP_VERSION").unwrap_or_else(|_| "2c".to_string()),
            snmp_timeout_secs: env_parse("SNMP_TIMEOUT", 5),
            snmp_retries: env_parse("SNMP_RETRIES", 2),

            uplink_ports,
            uplink_patterns,

            stability_runs: env_parse("STABILITY_RUNS", 2),
            state_db_path: std::env::var("STATE_DB_PATH").unwrap_or_else(|_| "state.db".to_string()),

            poll_interval_secs: env_parse("POLL_INTERVAL", 0),
            dry_run: env_bool("DRY_RUN", false),
            // The dataclass default is "planned", but the env-read default
            // observed at runtime is "connected" -- that is what ships.
            cable_status: std::env::var("CABLE_STATUS").unwrap_or_else(|_| "connected".to_string()),

            mlag_groups,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.netbox_url.is_empty() || self.netbox_token.is_empty() {
            return Err(ConfigError::MissingNetboxCredentials);
        }
        Ok(())
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses `"switch1:switch2,switch3:switch4"` into peer pairs, skipping
/// any group that doesn't split into exactly two parts.
fn parse_mlag_groups(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|group| {
            let parts: Vec<&str> = group.trim().split(':').collect();
            if parts.len() == 2 {
                Some((parts[0].trim().to_string(), parts[1].trim().to_string()))
            } else {
                if !group.trim().is_empty() {
                    tracing::warn!(group = group.trim(), "ignoring malformed MLAG_GROUPS entry");
                }
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_valid_mlag_pairs() {
        let groups = parse_mlag_groups("sw1:sw2,sw3:sw4");
        assert_eq!(groups, vec![("sw1".to_string(), "sw2".to_string()), ("sw3".to_string(), "sw4".to_string())]);
    }

    #[test]
    fn skips_malformed_groups() {
        let groups = parse_mlag_groups("sw1:sw2:sw3,sw4:sw5,onlyone");
        assert_eq!(groups, vec![("sw4".to_string(), "sw5".to_string())]);
    }

    #[test]
    fn split_csv_trims_and_drops_empty() {
        assert_eq!(split_csv(" a, b ,,c"), vec!["a", "b", "c"]);
    }
}
