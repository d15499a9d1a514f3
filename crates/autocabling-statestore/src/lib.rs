//! Durable per-MAC observation store.
//!
//! Backed by an embedded SQLite database. The store is the sole owner of
//! the on-disk observations; the correlator only ever reaches the state
//! store through the operations below, never by touching the file
//! directly, so a test substitute only needs to honor these contracts.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Errors returned by state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored status '{0}' is not a recognized MACStatus")]
    UnknownStatus(String),
}

type Result<T> = std::result::Result<T, StateStoreError>;

/// Status of a single correlation decision, persisted as `last_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacStatus {
    Created,
    Exists,
    SkipNonAccess,
    Ambiguous,
    NotFound,
    Pending,
    Error,
    Mismatch,
}

impl MacStatus {
    fn as_str(self) -> &'static str {
        match self {
            MacStatus::Created => "created",
            MacStatus::Exists => "exists",
            MacStatus::SkipNonAccess => "skip_non_access",
            MacStatus::Ambiguous => "ambiguous",
            MacStatus::NotFound => "not_found",
            MacStatus::Pending => "pending",
            MacStatus::Error => "error",
            MacStatus::Mismatch => "mismatch",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "created" => MacStatus::Created,
            "exists" => MacStatus::Exists,
            "skip_non_access" => MacStatus::SkipNonAccess,
            "ambiguous" => MacStatus::Ambiguous,
            "not_found" => MacStatus::NotFound,
            "pending" => MacStatus::Pending,
            "error" => MacStatus::Error,
            "mismatch" => MacStatus::Mismatch,
            other => return Err(StateStoreError::UnknownStatus(other.to_string())),
        })
    }
}

/// Full persisted state of a single MAC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacState {
    pub mac: String,
    pub last_switch: Option<String>,
    pub last_port: Option<String>,
    pub last_vlan: Option<i64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub stability_count: i64,
    pub last_status: Option<MacStatus>,
    pub last_action_at: Option<DateTime<Utc>>,
    pub cable_created: bool,
    pub cable_id: Option<i64>,
}

/// Counters for a single run, appended to `run_history`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub total_macs: i64,
    pub created: i64,
    pub exists: i64,
    pub skipped: i64,
    pub ambiguous: i64,
    pub not_found: i64,
    pub errors: i64,
}

/// SQLite-backed implementation of the state store.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Opens (creating if absent) the state database at `path`, creating
    /// the schema if it does not already exist. Parent directories are
    /// created on demand.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StateStoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "state database initialized");
        Ok(Self { conn })
    }

    /// Opens an in-memory database; used by tests and by anything that
    /// wants a disposable store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mac_observations (
                mac TEXT PRIMARY KEY,
                switch_name TEXT,
                port_name TEXT,
                vlan INTEGER,
                seen_at TEXT,
                stability_count INTEGER NOT NULL DEFAULT 0,
                last_status TEXT,
                last_action_at TEXT,
                cable_created INTEGER NOT NULL DEFAULT 0,
                cable_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_at TEXT NOT NULL,
                total_macs INTEGER NOT NULL,
                cnt_created INTEGER NOT NULL,
                cnt_exists INTEGER NOT NULL,
                cnt_skipped INTEGER NOT NULL,
                cnt_ambiguous INTEGER NOT NULL,
                cnt_not_found INTEGER NOT NULL,
                cnt_errors INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Returns the current state for `mac`, or `None` if never observed.
    pub fn get_state(&self, mac: &str) -> Result<Option<MacState>> {
        let mut stmt = self.conn.prepare(
            "SELECT mac, switch_name, port_name, vlan, seen_at, stability_count,
                    last_status, last_action_at, cable_created, cable_id
             FROM mac_observations WHERE mac = ?1",
        )?;

        stmt.query_row(params![mac], Self::row_to_state)
            .optional()
            .map_err(StateStoreError::from)?
            .transpose()
    }

    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<Result<MacState>> {
        let seen_at: Option<String> = row.get(4)?;
        let last_status: Option<String> = row.get(6)?;
        let last_action_at: Option<String> = row.get(7)?;

        Ok((|| -> Result<MacState> {
            Ok(MacState {
                mac: row.get(0)?,
                last_switch: row.get(1)?,
                last_port: row.get(2)?,
                last_vlan: row.get(3)?,
                last_seen: seen_at
                    .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|e| StateStoreError::Sqlite(rusqlite::Error::InvalidColumnName(e.to_string())))?,
                stability_count: row.get(5)?,
                last_status: last_status.map(|s| MacStatus::from_str(&s)).transpose()?,
                last_action_at: last_action_at
                    .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|e| StateStoreError::Sqlite(rusqlite::Error::InvalidColumnName(e.to_string())))?,
                cable_created: row.get::<_, i64>(8)? != 0,
                cable_id: row.get(9)?,
            })
        })())
    }

    /// Records a new observation of `mac` on `(switch, port[, vlan])` and
    /// returns `(stability_count, is_stable)`.
    ///
    /// This is the stability invariant: consecutive observations of the
    /// identical `(switch, port)` accrue a count; any deviation resets it
    /// to `1`. `is_stable` holds once the count reaches `threshold`.
    pub fn update_observation(
        &self,
        mac: &str,
        switch: &str,
        port: &str,
        vlan: Option<i64>,
        threshold: i64,
    ) -> Result<(i64, bool)> {
        let now = Utc::now().to_rfc3339();
        let prior = self.get_state(mac)?;

        let new_count = match &prior {
            Some(state)
                if state.last_switch.as_deref() == Some(switch)
                    && state.last_port.as_deref() == Some(port) =>
            {
                state.stability_count + 1
            }
            _ => 1,
        };

        if prior.is_none() {
            self.conn.execute(
                "INSERT INTO mac_observations
                    (mac, switch_name, port_name, vlan, seen_at, stability_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![mac, switch, port, vlan, now, new_count],
            )?;
        } else {
            self.conn.execute(
                "UPDATE mac_observations
                 SET switch_name = ?2, port_name = ?3, vlan = ?4, seen_at = ?5, stability_count = ?6
                 WHERE mac = ?1",
                params![mac, switch, port, vlan, now, new_count],
            )?;
        }

        Ok((new_count, new_count >= threshold))
    }

    /// Resets stability for `mac` after it disappeared from every FDB.
    /// A MAC that stops being observed must re-qualify from scratch.
    pub fn mark_not_found(&self, mac: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let exists = self.get_state(mac)?.is_some();

        if exists {
            self.conn.execute(
                "UPDATE mac_observations
                 SET stability_count = 0, last_status = ?2, last_action_at = ?3
                 WHERE mac = ?1",
                params![mac, MacStatus::NotFound.as_str(), now],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO mac_observations (mac, stability_count, last_status, last_action_at)
                 VALUES (?1, 0, ?2, ?3)",
                params![mac, MacStatus::NotFound.as_str(), now],
            )?;
        }

        Ok(())
    }

    /// Records the outcome of processing `mac` in the current run.
    pub fn update_status(&self, mac: &str, status: MacStatus, cable_id: Option<i64>) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        if status == MacStatus::Created {
            self.conn.execute(
                "UPDATE mac_observations
                 SET last_status = ?2, last_action_at = ?3, cable_created = 1, cable_id = ?4
                 WHERE mac = ?1",
                params![mac, status.as_str(), now, cable_id],
            )?;
        } else {
            self.conn.execute(
                "UPDATE mac_observations SET last_status = ?2, last_action_at = ?3 WHERE mac = ?1",
                params![mac, status.as_str(), now],
            )?;
        }

        Ok(())
    }

    /// Appends a run summary row to `run_history`.
    pub fn record_run(&self, counters: RunCounters) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO run_history
                (run_at, total_macs, cnt_created, cnt_exists, cnt_skipped, cnt_ambiguous, cnt_not_found, cnt_errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                now,
                counters.total_macs,
                counters.created,
                counters.exists,
                counters.skipped,
                counters.ambiguous,
                counters.not_found,
                counters.errors,
            ],
        )?;
        Ok(())
    }

    /// Returns every MAC for which a cable was created, for audit tooling.
    pub fn get_all_with_cables(&self) -> Result<Vec<MacState>> {
        let mut stmt = self.conn.prepare(
            "SELECT mac, switch_name, port_name, vlan, seen_at, stability_count,
                    last_status, last_action_at, cable_created, cable_id
             FROM mac_observations WHERE cable_created = 1",
        )?;

        let rows = stmt.query_map([], Self::row_to_state)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_observation_starts_at_one() {
        let store = StateStore::open_in_memory().unwrap();
        let (count, stable) = store
            .update_observation("aa:bb:cc:dd:ee:01", "sw1", "Ethernet5", Some(10), 2)
            .unwrap();
        assert_eq!(count, 1);
        assert!(!stable);
    }

    #[test]
    fn stability_monotonicity() {
        let store = StateStore::open_in_memory().unwrap();
        let mac = "aa:bb:cc:dd:ee:01";

        for expected in 1..=4 {
            let (count, is_stable) = store
                .update_observation(mac, "sw1", "Ethernet5", None, 3)
                .unwrap();
            assert_eq!(count, expected);
            assert_eq!(is_stable, expected >= 3);
        }
    }

    #[test]
    fn flap_resets_count() {
        let store = StateStore::open_in_memory().unwrap();
        let mac = "aa:bb:cc:dd:ee:01";

        store.update_observation(mac, "sw1", "Eth5", None, 2).unwrap();
        let (count, stable) = store.update_observation(mac, "sw1", "Eth6", None, 2).unwrap();
        assert_eq!(count, 1);
        assert!(!stable);
    }

    #[test]
    fn mark_not_found_resets_stability() {
        let store = StateStore::open_in_memory().unwrap();
        let mac = "aa:bb:cc:dd:ee:01";

        store.update_observation(mac, "sw1", "Eth5", None, 2).unwrap();
        store.update_observation(mac, "sw1", "Eth5", None, 2).unwrap();
        store.mark_not_found(mac).unwrap();

        let state = store.get_state(mac).unwrap().unwrap();
        assert_eq!(state.stability_count, 0);
        assert_eq!(state.last_status, Some(MacStatus::NotFound));

        let (count, _) = store.update_observation(mac, "sw1", "Eth5", None, 2).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn mark_not_found_on_unknown_mac_creates_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.mark_not_found("aa:bb:cc:dd:ee:02").unwrap();
        let state = store.get_state("aa:bb:cc:dd:ee:02").unwrap().unwrap();
        assert_eq!(state.stability_count, 0);
        assert_eq!(state.last_status, Some(MacStatus::NotFound));
    }

    #[test]
    fn update_status_created_sets_cable_fields() {
        let store = StateStore::open_in_memory().unwrap();
        let mac = "aa:bb:cc:dd:ee:01";
        store.update_observation(mac, "sw1", "Eth5", None, 1).unwrap();
        store.update_status(mac, MacStatus::Created, Some(42)).unwrap();

        let state = store.get_state(mac).unwrap().unwrap();
        assert!(state.cable_created);
        assert_eq!(state.cable_id, Some(42));
        assert_eq!(state.last_status, Some(MacStatus::Created));
    }

    #[test]
    fn get_all_with_cables_filters() {
        let store = StateStore::open_in_memory().unwrap();
        store.update_observation("aa:bb:cc:dd:ee:01", "sw1", "Eth5", None, 1).unwrap();
        store.update_status("aa:bb:cc:dd:ee:01", MacStatus::Created, Some(1)).unwrap();
        store.update_observation("aa:bb:cc:dd:ee:02", "sw1", "Eth6", None, 1).unwrap();
        store.update_status("aa:bb:cc:dd:ee:02", MacStatus::Pending, None).unwrap();

        let cabled = store.get_all_with_cables().unwrap();
        assert_eq!(cabled.len(), 1);
        assert_eq!(cabled[0].mac, "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn record_run_appends_history() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .record_run(RunCounters {
                total_macs: 5,
                created: 1,
                exists: 2,
                skipped: 1,
                ambiguous: 0,
                not_found: 1,
                errors: 0,
            })
            .unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM run_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_mac_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_state("00:00:00:00:00:00").unwrap().is_none());
    }
}
