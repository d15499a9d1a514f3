//! SNMP FDB (MAC-forwarding table) collector.
//!
//! Walks a switch across three MIB families, Huawei-specific first, then
//! Q-Bridge, then plain Bridge MIB, stopping at the first one that
//! yields entries. SNMP failures are never fatal to a run; a switch that
//! cannot be reached simply contributes no entries.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use snmp::{SyncSession, Value};
use thiserror::Error;

const IF_NAME: &[u32] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1];
const HW_MAC_FWD_PORT: &[u32] = &[1, 3, 6, 1, 4, 1, 2011, 5, 25, 42, 2, 1, 3, 1, 4];
const DOT1Q_TP_FDB_PORT: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 7, 1, 2, 2, 1, 2];
const DOT1D_TP_FDB_PORT: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2];

#[derive(Debug, Error)]
pub enum FdbError {
    #[error("failed to open SNMP session to {switch_ip}: {source}")]
    Session {
        switch_ip: String,
        #[source]
        source: std::io::Error,
    },
}

/// SNMPv2c parameters shared by every walk against a switch.
#[derive(Debug, Clone)]
pub struct SnmpParams {
    pub community: String,
    pub timeout: Duration,
    pub retries: u32,
}

/// A single (MAC, switch, port) sighting from a switch's FDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdbEntry {
    pub mac: String,
    pub switch_name: String,
    pub switch_ip: String,
    pub port_name: String,
    pub port_index: i64,
    pub vlan: Option<i64>,
    pub seen_at: DateTime<Utc>,
}

/// Walks a switch's FDB, trying Huawei, then Q-Bridge, then Bridge MIB in
/// order and returning the first non-empty result. Never returns an
/// error: any SNMP failure is logged and yields an empty vector so one
/// unreachable switch never aborts a run.
pub fn collect_fdb(switch_name: &str, switch_ip: &str, params: &SnmpParams) -> Vec<FdbEntry> {
    if switch_ip.is_empty() {
        tracing::warn!(switch = switch_name, "skipping FDB collection: no IP address");
        return Vec::new();
    }

    tracing::info!(switch = switch_name, ip = switch_ip, "collecting FDB");

    let mut session = match open_session(switch_ip, params) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(switch = switch_name, error = %e, "failed to open SNMP session");
            return Vec::new();
        }
    };

    let if_names = match walk(&mut session, IF_NAME, params.retries) {
        Ok(raw) => build_if_name_map(&raw),
        Err(e) => {
            tracing::warn!(switch = switch_name, error = ?e, "ifName walk failed, port names will fall back to port<ifindex>");
            HashMap::new()
        }
    };

    let huawei = walk(&mut session, HW_MAC_FWD_PORT, params.retries)
        .map(|raw| huawei_entries(&raw, switch_name, switch_ip, &if_names))
        .unwrap_or_default();
    if !huawei.is_empty() {
        tracing::debug!(switch = switch_name, count = huawei.len(), "collected via Huawei MIB");
        return huawei;
    }

    let q_bridge = walk(&mut session, DOT1Q_TP_FDB_PORT, params.retries)
        .map(|raw| q_bridge_entries(&raw, switch_name, switch_ip, &if_names))
        .unwrap_or_default();
    if !q_bridge.is_empty() {
        tracing::debug!(switch = switch_name, count = q_bridge.len(), "collected via Q-Bridge MIB");
        return q_bridge;
    }

    let bridge = walk(&mut session, DOT1D_TP_FDB_PORT, params.retries)
        .map(|raw| bridge_entries(&raw, switch_name, switch_ip, &if_names))
        .unwrap_or_default();
    tracing::info!(switch = switch_name, count = bridge.len(), "collected FDB entries");
    bridge
}

fn open_session(switch_ip: &str, params: &SnmpParams) -> Result<SyncSession, FdbError> {
    SyncSession::new(
        (switch_ip, 161),
        params.community.as_bytes(),
        Some(params.timeout),
        0,
    )
    .map_err(|source| FdbError::Session { switch_ip: switch_ip.to_string(), source })
}

/// A decoded varbind: OID sub-IDs after the request root, plus the scalar
/// value we care about (interface/port index, or a display string).
enum WalkValue {
    Index(i64),
    Text(String),
}

/// GETNEXTs `base_oid` to exhaustion, retrying each hop up to
/// `retries` times, and returns every varbind whose OID still starts
/// with `base_oid`.
fn walk(session: &mut SyncSession, base_oid: &[u32], retries: u32) -> Result<Vec<(Vec<u32>, WalkValue)>, ()> {
    let mut results = Vec::new();
    let mut current: Vec<u32> = base_oid.to_vec();
    let mut buf = [0u32; 128];

    loop {
        let mut attempt = 0;
        let hop = loop {
            match session.getnext(&current) {
                Ok(response) => {
                    let Some((oid, value)) = response.varbinds.clone().next() else {
                        break None;
                    };
                    let name = match oid.read_name(&mut buf) {
                        Ok(name) => name.to_vec(),
                        Err(_) => break None,
                    };
                    let decoded = match value {
                        Value::Integer(n) => WalkValue::Index(n),
                        Value::Unsigned32(n) => WalkValue::Index(n as i64),
                        Value::OctetString(bytes) => WalkValue::Text(String::from_utf8_lossy(bytes).to_string()),
                        _ => break None,
                    };
                    break Some((name, decoded));
                }
                Err(e) => {
                    if attempt >= retries {
                        tracing::debug!(error = ?e, "SNMP getnext exhausted retries");
                        return Err(());
                    }
                    attempt += 1;
                }
            }
        };

        let Some((name, decoded)) = hop else {
            break;
        };

        if !name.starts_with(base_oid) || name.len() <= base_oid.len() {
            break;
        }

        let suffix = name[base_oid.len()..].to_vec();
        results.push((suffix, decoded));
        current = name;
    }

    Ok(results)
}

fn build_if_name_map(raw: &[(Vec<u32>, WalkValue)]) -> HashMap<i64, String> {
    let mut map = HashMap::new();
    for (suffix, value) in raw {
        if let (Some(&if_index), WalkValue::Text(name)) = (suffix.first(), value) {
            map.insert(if_index as i64, name.clone());
        }
    }
    map
}

fn port_name(if_names: &HashMap<i64, String>, port_index: i64) -> String {
    if_names
        .get(&port_index)
        .cloned()
        .unwrap_or_else(|| format!("port{port_index}"))
}

/// Parses a single Huawei `hwMacFwdPort` OID suffix (6 MAC octets, 1 VLAN
/// octet, 1 trailing zero) into `(mac, vlan)`.
fn parse_huawei_suffix(suffix: &[u32]) -> Option<(String, i64)> {
    if suffix.len() < 8 {
        return None;
    }
    let mac_octets: Vec<String> = suffix[..6].iter().map(|o| o.to_string()).collect();
    let mac = autocabling_mac::oid_suffix_to_mac(&mac_octets.join(".")).ok()?;
    let vlan = suffix[6] as i64;
    Some((mac, vlan))
}

fn huawei_entries(
    raw: &[(Vec<u32>, WalkValue)],
    switch_name: &str,
    switch_ip: &str,
    if_names: &HashMap<i64, String>,
) -> Vec<FdbEntry> {
    raw.iter()
        .filter_map(|(suffix, value)| {
            let WalkValue::Index(port_index) = value else { return None };
            let (mac, vlan) = parse_huawei_suffix(suffix)?;
            Some(FdbEntry {
                mac,
                switch_name: switch_name.to_string(),
                switch_ip: switch_ip.to_string(),
                port_name: port_name(if_names, *port_index),
                port_index: *port_index,
                vlan: Some(vlan),
                seen_at: Utc::now(),
            })
        })
        .collect()
}

/// Parses a single Q-Bridge `dot1qTpFdbPort` OID suffix (1 VLAN
/// component, 6 MAC octets) into `(mac, vlan)`.
fn parse_q_bridge_suffix(suffix: &[u32]) -> Option<(String, i64)> {
    if suffix.len() < 7 {
        return None;
    }
    let vlan = suffix[0] as i64;
    let mac_octets: Vec<String> = suffix[1..7].iter().map(|o| o.to_string()).collect();
    let mac = autocabling_mac::oid_suffix_to_mac(&mac_octets.join(".")).ok()?;
    Some((mac, vlan))
}

fn q_bridge_entries(
    raw: &[(Vec<u32>, WalkValue)],
    switch_name: &str,
    switch_ip: &str,
    if_names: &HashMap<i64, String>,
) -> Vec<FdbEntry> {
    raw.iter()
        .filter_map(|(suffix, value)| {
            let WalkValue::Index(port_index) = value else { return None };
            let (mac, vlan) = parse_q_bridge_suffix(suffix)?;
            Some(FdbEntry {
                mac,
                switch_name: switch_name.to_string(),
                switch_ip: switch_ip.to_string(),
                port_name: port_name(if_names, *port_index),
                port_index: *port_index,
                vlan: Some(vlan),
                seen_at: Utc::now(),
            })
        })
        .collect()
}

/// Parses a single Bridge MIB `dot1dTpFdbPort` OID suffix (6 MAC octets,
/// no VLAN) into a MAC address.
fn parse_bridge_suffix(suffix: &[u32]) -> Option<String> {
    if suffix.len() < 6 {
        return None;
    }
    let mac_octets: Vec<String> = suffix[..6].iter().map(|o| o.to_string()).collect();
    autocabling_mac::oid_suffix_to_mac(&mac_octets.join(".")).ok()
}

fn bridge_entries(
    raw: &[(Vec<u32>, WalkValue)],
    switch_name: &str,
    switch_ip: &str,
    if_names: &HashMap<i64, String>,
) -> Vec<FdbEntry> {
    // Only one entry per MAC is kept, matching the last-seen port.
    let mut mac_to_port: HashMap<String, i64> = HashMap::new();
    for (suffix, value) in raw {
        let WalkValue::Index(port_index) = value else { continue };
        if let Some(mac) = parse_bridge_suffix(suffix) {
            mac_to_port.insert(mac, *port_index);
        }
    }

    mac_to_port
        .into_iter()
        .map(|(mac, port_index)| FdbEntry {
            mac,
            switch_name: switch_name.to_string(),
            switch_ip: switch_ip.to_string(),
            port_name: port_name(if_names, port_index),
            port_index,
            vlan: None,
            seen_at: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn huawei_suffix_decodes_mac_and_vlan() {
        // hwMacFwdPort.<mac 6 octets>.<vlan>.0
        let suffix = vec![0, 224, 237, 219, 143, 82, 10, 0];
        let (mac, vlan) = parse_huawei_suffix(&suffix).unwrap();
        assert_eq!(mac, "00:e0:ed:db:8f:52");
        assert_eq!(vlan, 10);
    }

    #[test]
    fn huawei_suffix_too_short_is_skipped() {
        assert!(parse_huawei_suffix(&[0, 1, 2]).is_none());
    }

    #[test]
    fn q_bridge_suffix_decodes_vlan_first() {
        let suffix = vec![100, 170, 187, 204, 221, 238, 255];
        let (mac, vlan) = parse_q_bridge_suffix(&suffix).unwrap();
        assert_eq!(mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(vlan, 100);
    }

    #[test]
    fn bridge_suffix_has_no_vlan() {
        let suffix = vec![170, 187, 204, 221, 238, 255];
        let mac = parse_bridge_suffix(&suffix).unwrap();
        assert_eq!(mac, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn port_name_falls_back_when_unmapped() {
        let mut map = HashMap::new();
        map.insert(5, "Ethernet5".to_string());
        assert_eq!(port_name(&map, 5), "Ethernet5");
        assert_eq!(port_name(&map, 99), "port99");
    }

    #[test]
    fn huawei_entries_skip_unparseable_suffixes() {
        let raw = vec![
            (vec![0, 224, 237, 219, 143, 82, 10, 0], WalkValue::Index(7)),
            (vec![1, 2], WalkValue::Index(8)),
        ];
        let entries = huawei_entries(&raw, "sw1", "10.0.0.1", &HashMap::new());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mac, "00:e0:ed:db:8f:52");
        assert_eq!(entries[0].vlan, Some(10));
        assert_eq!(entries[0].port_name, "port7");
    }

    #[test]
    fn bridge_entries_dedupe_by_mac() {
        let raw = vec![
            (vec![170, 187, 204, 221, 238, 255], WalkValue::Index(3)),
            (vec![170, 187, 204, 221, 238, 255], WalkValue::Index(4)),
        ];
        let entries = bridge_entries(&raw, "sw1", "10.0.0.1", &HashMap::new());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].port_index, 4);
    }

    #[test]
    fn collect_fdb_returns_empty_for_blank_ip() {
        let params = SnmpParams { community: "public".to_string(), timeout: Duration::from_millis(50), retries: 0 };
        assert!(collect_fdb("sw1", "", &params).is_empty());
    }
}
