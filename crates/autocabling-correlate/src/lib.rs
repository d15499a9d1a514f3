//! Correlation and stability engine.
//!
//! Joins OOB-interface records against the union of per-switch FDB
//! entries, resolves ambiguity (including MLAG peer collapse), classifies
//! the destination port, and enforces the N-of-N stability rule through
//! the state store before a decision is handed to the orchestrator.

use std::collections::{HashMap, HashSet};

use autocabling_fdb::FdbEntry;
use autocabling_netbox::{NetboxClient, NetboxError, OobInterface, Switch};
use autocabling_portclass::PortClassifier;
use autocabling_statestore::{MacStatus, StateStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelateError {
    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("inventory error: {0}")]
    Netbox(#[from] NetboxError),
}

type Result<T> = std::result::Result<T, CorrelateError>;

/// Outcome bucket for a single OOB interface, aligned with `MacStatus`
/// plus `Created`, which only the orchestrator assigns after a
/// successful cable creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStatus {
    Exists,
    Mismatch,
    NotFound,
    Ambiguous,
    Error,
    SkipNonAccess,
    Pending,
}

/// One correlation outcome for one OOB interface.
#[derive(Debug, Clone)]
pub struct Decision {
    pub mac: String,
    pub device_name: String,
    pub interface_id: i64,
    pub interface_name: String,
    pub status: DecisionStatus,
    pub reason: String,

    pub switch_name: Option<String>,
    pub switch_id: Option<i64>,
    pub port_name: Option<String>,
    pub port_id: Option<i64>,
    pub vlan: Option<i64>,

    pub stability_count: i64,
    pub is_stable: bool,

    pub expected_mac: Option<String>,
    pub actual_mac: Option<String>,
}

/// Trait at the state-store boundary the correlator reaches through;
/// lets tests substitute an in-memory double without pulling in sqlite.
pub trait StabilityStore {
    fn mark_not_found(&self, mac: &str) -> std::result::Result<(), StateStoreError>;
    fn update_observation(
        &self,
        mac: &str,
        switch: &str,
        port: &str,
        vlan: Option<i64>,
        threshold: i64,
    ) -> std::result::Result<(i64, bool), StateStoreError>;
    fn update_status(
        &self,
        mac: &str,
        status: MacStatus,
        cable_id: Option<i64>,
    ) -> std::result::Result<(), StateStoreError>;
}

impl StabilityStore for autocabling_statestore::StateStore {
    fn mark_not_found(&self, mac: &str) -> std::result::Result<(), StateStoreError> {
        autocabling_statestore::StateStore::mark_not_found(self, mac)
    }

    fn update_observation(
        &self,
        mac: &str,
        switch: &str,
        port: &str,
        vlan: Option<i64>,
        threshold: i64,
    ) -> std::result::Result<(i64, bool), StateStoreError> {
        autocabling_statestore::StateStore::update_observation(self, mac, switch, port, vlan, threshold)
    }

    fn update_status(
        &self,
        mac: &str,
        status: MacStatus,
        cable_id: Option<i64>,
    ) -> std::result::Result<(), StateStoreError> {
        autocabling_statestore::StateStore::update_status(self, mac, status, cable_id)
    }
}

pub struct Correlator<'a> {
    stability_runs: i64,
    mlag_peers: HashMap<String, String>,
    /// Configured `(switch1, switch2)` pairs in their original order, so
    /// the ambiguity tie-break can deterministically pick `switch1`.
    mlag_groups: Vec<(String, String)>,
    netbox: &'a NetboxClient,
    state: &'a dyn StabilityStore,
    classifier: &'a PortClassifier,
}

impl<'a> Correlator<'a> {
    /// `mlag_groups` is a list of `(switch1, switch2)` pairs; the map is
    /// built symmetrically so either name resolves to its peer.
    pub fn new(
        stability_runs: i64,
        mlag_groups: &[(String, String)],
        netbox: &'a NetboxClient,
        state: &'a dyn StabilityStore,
        classifier: &'a PortClassifier,
    ) -> Self {
        let mut mlag_peers = HashMap::new();
        for (a, b) in mlag_groups {
            mlag_peers.insert(a.clone(), b.clone());
            mlag_peers.insert(b.clone(), a.clone());
        }
        Self { stability_runs, mlag_peers, mlag_groups: mlag_groups.to_vec(), netbox, state, classifier }
    }

    fn are_mlag_peers(&self, switch1: &str, switch2: &str) -> bool {
        self.mlag_peers.get(switch1).map(String::as_str) == Some(switch2)
    }

    /// Returns the switch that should win the tie-break for an MLAG
    /// pair, i.e. `switch1` as configured in `mlag_groups` regardless of
    /// which order `switch1`/`switch2` were observed in.
    fn mlag_winner(&self, switch1: &str, switch2: &str) -> Option<&str> {
        if !self.are_mlag_peers(switch1, switch2) {
            return None;
        }
        self.mlag_groups
            .iter()
            .find(|(a, b)| (a == switch1 && b == switch2) || (a == switch2 && b == switch1))
            .map(|(a, _)| a.as_str())
    }

    /// Resolves ambiguity across sightings of the same MAC.
    ///
    /// One unique `(switch, port)` endpoint accepts outright. Two unique
    /// endpoints sharing a port name on configured MLAG peers collapse
    /// to the first switch in the pair (a deterministic tie-break: MLAG
    /// peers are one logical endpoint). Anything else is ambiguous.
    fn resolve_ambiguity<'e>(&self, entries: &'e [&'e FdbEntry]) -> Option<&'e FdbEntry> {
        if entries.len() == 1 {
            return Some(entries[0]);
        }

        let unique: HashSet<(&str, &str)> =
            entries.iter().map(|e| (e.switch_name.as_str(), e.port_name.as_str())).collect();

        if unique.len() == 1 {
            return Some(entries[0]);
        }

        if unique.len() == 2 {
            let mut endpoints: Vec<(&str, &str)> = unique.into_iter().collect();
            endpoints.sort_unstable();
            let (sw1, port1) = endpoints[0];
            let (sw2, port2) = endpoints[1];
            if port1 == port2 {
                if let Some(winner) = self.mlag_winner(sw1, sw2) {
                    return entries.iter().find(|e| e.switch_name == winner).copied();
                }
            }
        }

        None
    }

    fn check_mismatch(&self, oob: &OobInterface, port_to_mac: &HashMap<(String, String), String>) -> Option<Decision> {
        let peer_switch = oob.cable_peer_switch.as_ref()?;
        let peer_port = oob.cable_peer_port.as_ref()?;

        let expected_mac = oob.mac_address.clone();
        let key = (peer_switch.clone(), peer_port.clone());
        let actual_mac = port_to_mac.get(&key)?;

        if actual_mac == &expected_mac {
            return None;
        }

        tracing::warn!(
            device = %oob.device_name,
            interface = %oob.interface_name,
            expected = %expected_mac,
            actual = %actual_mac,
            switch = %peer_switch,
            port = %peer_port,
            "MAC mismatch on cabled port"
        );

        Some(Decision {
            mac: expected_mac.clone(),
            device_name: oob.device_name.clone(),
            interface_id: oob.interface_id,
            interface_name: oob.interface_name.clone(),
            status: DecisionStatus::Mismatch,
            reason: format!("MAC mismatch: expected {expected_mac}, found {actual_mac} on port"),
            switch_name: Some(peer_switch.clone()),
            switch_id: None,
            port_name: Some(peer_port.clone()),
            port_id: None,
            vlan: None,
            stability_count: 0,
            is_stable: false,
            expected_mac: Some(expected_mac),
            actual_mac: Some(actual_mac.clone()),
        })
    }

    /// Correlates every OOB interface against the merged FDB and switch
    /// set, applying the full per-interface decision pipeline.
    pub async fn correlate(
        &self,
        oob_interfaces: &[OobInterface],
        fdb_entries: &[FdbEntry],
        switches: &[Switch],
    ) -> Result<Vec<Decision>> {
        let switch_by_name: HashMap<&str, &Switch> = switches.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut mac_to_fdb: HashMap<String, Vec<&FdbEntry>> = HashMap::new();
        for entry in fdb_entries {
            mac_to_fdb.entry(entry.mac.clone()).or_default().push(entry);
        }

        let mut port_to_mac: HashMap<(String, String), String> = HashMap::new();
        for entry in fdb_entries {
            port_to_mac.insert((entry.switch_name.clone(), entry.port_name.clone()), entry.mac.clone());
        }

        let mut decisions = Vec::with_capacity(oob_interfaces.len());
        for oob in oob_interfaces {
            decisions.push(self.correlate_one(oob, &mac_to_fdb, &switch_by_name, &port_to_mac).await?);
        }
        Ok(decisions)
    }

    async fn correlate_one(
        &self,
        oob: &OobInterface,
        mac_to_fdb: &HashMap<String, Vec<&FdbEntry>>,
        switch_by_name: &HashMap<&str, &Switch>,
        port_to_mac: &HashMap<(String, String), String>,
    ) -> Result<Decision> {
        let mac = oob.mac_address.clone();

        if oob.has_cable {
            if let Some(mismatch) = self.check_mismatch(oob, port_to_mac) {
                return Ok(mismatch);
            }
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::Exists,
                reason: "OOB interface already has cable".to_string(),
                switch_name: None,
                switch_id: None,
                port_name: None,
                port_id: None,
                vlan: None,
                stability_count: 0,
                is_stable: false,
                expected_mac: None,
                actual_mac: None,
            });
        }

        let sightings = mac_to_fdb.get(&mac).cloned().unwrap_or_default();
        if sightings.is_empty() {
            self.state.mark_not_found(&mac)?;
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::NotFound,
                reason: "MAC not found in any FDB".to_string(),
                switch_name: None,
                switch_id: None,
                port_name: None,
                port_id: None,
                vlan: None,
                stability_count: 0,
                is_stable: false,
                expected_mac: None,
                actual_mac: None,
            });
        }

        let Some(best) = self.resolve_ambiguity(&sightings) else {
            let locations: Vec<String> = sightings.iter().map(|e| format!("{}:{}", e.switch_name, e.port_name)).collect();
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::Ambiguous,
                reason: format!("MAC found on multiple endpoints: {}", locations.join(", ")),
                switch_name: None,
                switch_id: None,
                port_name: None,
                port_id: None,
                vlan: None,
                stability_count: 0,
                is_stable: false,
                expected_mac: None,
                actual_mac: None,
            });
        };

        let Some(switch) = switch_by_name.get(best.switch_name.as_str()) else {
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::Error,
                reason: format!("switch {} unknown to inventory", best.switch_name),
                switch_name: Some(best.switch_name.clone()),
                switch_id: None,
                port_name: Some(best.port_name.clone()),
                port_id: None,
                vlan: best.vlan,
                stability_count: 0,
                is_stable: false,
                expected_mac: None,
                actual_mac: None,
            });
        };

        let classification = self.classifier.classify(&best.port_name, None, false, false);
        if !classification.is_allowed {
            self.state.update_status(&mac, MacStatus::SkipNonAccess, None)?;
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::SkipNonAccess,
                reason: classification.reason,
                switch_name: Some(best.switch_name.clone()),
                switch_id: Some(switch.id),
                port_name: Some(best.port_name.clone()),
                port_id: None,
                vlan: best.vlan,
                stability_count: 0,
                is_stable: false,
                expected_mac: None,
                actual_mac: None,
            });
        }

        let (stability_count, is_stable) = self.state.update_observation(
            &mac,
            &best.switch_name,
            &best.port_name,
            best.vlan,
            self.stability_runs,
        )?;

        let switch_port = self.netbox.get_switch_port(switch.id, &best.port_name).await?;
        let Some(switch_port) = switch_port else {
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::Error,
                reason: format!("interface {} not found on {}", best.port_name, best.switch_name),
                switch_name: Some(best.switch_name.clone()),
                switch_id: Some(switch.id),
                port_name: Some(best.port_name.clone()),
                port_id: None,
                vlan: best.vlan,
                stability_count,
                is_stable,
                expected_mac: None,
                actual_mac: None,
            });
        };

        if switch_port.has_cable {
            return Ok(Decision {
                mac,
                device_name: oob.device_name.clone(),
                interface_id: oob.interface_id,
                interface_name: oob.interface_name.clone(),
                status: DecisionStatus::SkipNonAccess,
                reason: format!("switch port {} already has cable", best.port_name),
                switch_name: Some(best.switch_name.clone()),
                switch_id: Some(switch.id),
                port_name: Some(best.port_name.clone()),
                port_id: Some(switch_port.id),
                vlan: best.vlan,
                stability_count,
                is_stable,
                expected_mac: None,
                actual_mac: None,
            });
        }

        Ok(Decision {
            mac,
            device_name: oob.device_name.clone(),
            interface_id: oob.interface_id,
            interface_name: oob.interface_name.clone(),
            status: DecisionStatus::Pending,
            reason: if is_stable {
                "ready for cable creation".to_string()
            } else {
                format!("waiting for stability ({stability_count}/{})", self.stability_runs)
            },
            switch_name: Some(best.switch_name.clone()),
            switch_id: Some(switch.id),
            port_name: Some(best.port_name.clone()),
            port_id: Some(switch_port.id),
            vlan: best.vlan,
            stability_count,
            is_stable,
            expected_mac: None,
            actual_mac: None,
        })
    }
}
