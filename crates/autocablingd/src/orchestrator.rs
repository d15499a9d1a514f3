//! Run orchestration: ties the inventory client, FDB collector,
//! correlator and state store into a single poll.

use std::collections::HashSet;
use std::time::Duration;

use autocabling_correlate::{Correlator, DecisionStatus};
use autocabling_fdb::SnmpParams;
use autocabling_netbox::{NetboxClient, NetboxConfig, NetboxError};
use autocabling_portclass::PortClassifier;
use autocabling_statestore::{MacStatus, RunCounters, StateStore, StateStoreError};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Netbox(#[from] NetboxError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Correlate(#[from] autocabling_correlate::CorrelateError),
}

/// Tally of decisions from one run, mirroring `RunSummary` in the
/// original implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub total: i64,
    pub created: i64,
    pub exists: i64,
    pub skipped: i64,
    pub ambiguous: i64,
    pub not_found: i64,
    pub pending: i64,
    pub errors: i64,
    pub mismatch: i64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run summary: total={} created={} exists={} skipped={} ambiguous={} not_found={} pending={} errors={}",
            self.total, self.created, self.exists, self.skipped, self.ambiguous, self.not_found, self.pending, self.errors
        )?;
        if self.mismatch > 0 {
            write!(f, " MISMATCH={}", self.mismatch)?;
        }
        Ok(())
    }
}

pub struct Orchestrator {
    config: Config,
    netbox: NetboxClient,
    state: StateStore,
    classifier: PortClassifier,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, OrchestratorError> {
        let netbox = NetboxClient::new(NetboxConfig {
            url: config.netbox_url.clone(),
            token: config.netbox_token.clone(),
            verify_ssl: config.netbox_verify_ssl,
            switches_role: config.switches_role.clone(),
            cable_status: config.cable_status.clone(),
            dry_run: config.dry_run,
        })?;
        let state = StateStore::open(&config.state_db_path)?;
        let classifier = PortClassifier::new(config.uplink_ports.clone(), &config.uplink_patterns);

        Ok(Self { config, netbox, state, classifier })
    }

    /// Runs a single discovery + correlation pass and returns its
    /// summary. List OOB interfaces -> derive site set -> list switches
    /// -> collect FDB per switch -> correlate -> act on each decision.
    pub async fn run_once(&self) -> Result<RunSummary, OrchestratorError> {
        tracing::info!("starting OOB auto-cabling run");
        let mut summary = RunSummary::default();

        let oob_interfaces = self.netbox.list_oob_interfaces().await?;
        summary.total = oob_interfaces.len() as i64;
        tracing::info!(count = summary.total, "found devices with OOB IP");

        if oob_interfaces.is_empty() {
            tracing::warn!("no devices with OOB IP found, nothing to do");
            return Ok(summary);
        }

        let sites: Vec<String> = oob_interfaces
            .iter()
            .filter_map(|o| o.site_slug.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tracing::info!(sites = ?sites, "devices found on sites");

        let switches = self.netbox.list_switches(&sites).await?;
        tracing::info!(count = switches.len(), "found switches to poll");

        if switches.is_empty() {
            tracing::warn!("no switches found, cannot collect FDB");
            return Ok(summary);
        }

        let snmp_params = SnmpParams {
            community: self.config.snmp_community.clone(),
            timeout: Duration::from_secs(self.config.snmp_timeout_secs),
            retries: self.config.snmp_retries,
        };

        let mut all_fdb_entries = Vec::new();
        for switch in &switches {
            let ip = switch.primary_ip.clone().unwrap_or_default();
            let entries = tokio::task::block_in_place(|| {
                autocabling_fdb::collect_fdb(&switch.name, &ip, &snmp_params)
            });
            all_fdb_entries.extend(entries);
        }
        tracing::info!(count = all_fdb_entries.len(), "collected FDB entries total");

        let correlator = Correlator::new(
            self.config.stability_runs,
            &self.config.mlag_groups,
            &self.netbox,
            &self.state,
            &self.classifier,
        );
        let decisions = correlator.correlate(&oob_interfaces, &all_fdb_entries, &switches).await?;

        for decision in decisions {
            self.process_decision(decision, &mut summary).await;
        }

        self.state.record_run(RunCounters {
            total_macs: summary.total,
            created: summary.created,
            exists: summary.exists,
            skipped: summary.skipped,
            ambiguous: summary.ambiguous,
            not_found: summary.not_found,
            errors: summary.errors,
        })?;

        tracing::info!(%summary, "run complete");
        Ok(summary)
    }

    async fn process_decision(&self, decision: autocabling_correlate::Decision, summary: &mut RunSummary) {
        let device = decision.device_name.as_str();
        let iface = decision.interface_name.as_str();

        match decision.status {
            DecisionStatus::Mismatch => {
                summary.mismatch += 1;
                tracing::warn!(
                    device, iface,
                    expected = ?decision.expected_mac, actual = ?decision.actual_mac,
                    switch = ?decision.switch_name, port = ?decision.port_name,
                    "MAC mismatch"
                );
            }
            DecisionStatus::Exists => {
                summary.exists += 1;
                tracing::info!(device, iface, "cable already exists");
            }
            DecisionStatus::NotFound => {
                summary.not_found += 1;
                tracing::info!(device, iface, "MAC not found in FDB");
            }
            DecisionStatus::Ambiguous => {
                summary.ambiguous += 1;
                tracing::warn!(device, iface, reason = %decision.reason, "ambiguous MAC sighting");
            }
            DecisionStatus::SkipNonAccess => {
                summary.skipped += 1;
                tracing::info!(device, iface, reason = %decision.reason, "skipped");
            }
            DecisionStatus::Error => {
                summary.errors += 1;
                tracing::error!(device, iface, reason = %decision.reason, "correlation error");
            }
            DecisionStatus::Pending => {
                if decision.is_stable {
                    if let Some(port_id) = decision.port_id {
                        match self.netbox.create_cable(decision.interface_id, port_id, decision.vlan, None).await {
                            Ok(Some(cable)) => {
                                summary.created += 1;
                                if let Err(e) = self.state.update_status(&decision.mac, MacStatus::Created, Some(cable.id)) {
                                    tracing::error!(error = %e, "failed to persist CREATED status");
                                }
                                tracing::info!(
                                    device, iface, cable_id = cable.id,
                                    switch = ?decision.switch_name, port = ?decision.port_name,
                                    "cable created"
                                );
                            }
                            Ok(None) => {
                                // dry-run: no cable record, but not an error.
                                summary.created += 1;
                            }
                            Err(e) => {
                                summary.errors += 1;
                                tracing::error!(error = %e, "failed to create cable");
                                if let Err(e) = self.state.update_status(&decision.mac, MacStatus::Error, None) {
                                    tracing::error!(error = %e, "failed to persist ERROR status");
                                }
                            }
                        }
                    } else {
                        summary.errors += 1;
                    }
                } else {
                    summary.pending += 1;
                    tracing::info!(
                        device, iface,
                        count = decision.stability_count, threshold = self.config.stability_runs,
                        "waiting for stability"
                    );
                }
            }
        }
    }

    /// Loops `run_once` on the configured interval, logging and
    /// continuing past any per-run error so the daemon survives
    /// transient failures.
    pub async fn run_daemon(&self) -> ! {
        tracing::info!(interval = self.config.poll_interval_secs, "starting daemon mode");
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "run failed");
            }
            tracing::info!(seconds = self.config.poll_interval_secs, "sleeping");
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }
}
