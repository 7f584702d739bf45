use crate::warehouse::{
    Warehouse,
    WarehouseError,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    sync::{
        PoisonError,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
    },
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

/// A logged change of availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    BecameUnavailable,
    Recovered,
}

#[derive(Debug)]
struct State {
    availability: Availability,
    /// The last definitive answer was "table not found". Transient errors leave it alone.
    missing: bool,
    scrapes_since_check: u32,
    last_checked: Option<DateTime<Utc>>,
}

/// Tracks whether an optional system table exists, re-probing a missing table every `interval` scrapes.
///
/// Transitions happen under the write lock. Log lines are only written on [`Edge`]s, so a table that stays
/// missing is reported once no matter how many rechecks find it missing again.
#[derive(Debug)]
pub struct TableAvailabilityTracker {
    table: &'static str,
    probe_sql: &'static str,
    interval: u32,
    state: RwLock<State>,
}

impl TableAvailabilityTracker {
    pub fn new(table: &'static str, probe_sql: &'static str, interval: u32) -> Self {
        Self {
            table,
            probe_sql,
            interval: interval.max(1),
            state: RwLock::new(State {
                availability: Availability::Unknown,
                missing: false,
                scrapes_since_check: 0,
                last_checked: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn availability(&self) -> Availability {
        self.read().availability
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.read().last_checked
    }

    /// True before the first probe, and once a missing table has sat out `interval` scrapes.
    pub fn should_recheck(&self) -> bool {
        let state = self.read();
        match state.availability {
            Availability::Unknown => true,
            Availability::Unavailable => state.scrapes_since_check >= self.interval,
            Availability::Available => false,
        }
    }

    /// Runs the existence query and records the outcome. Returns the edge that was logged, if any.
    pub async fn probe(&self, warehouse: &dyn Warehouse, timeout: Duration) -> Option<Edge> {
        {
            let mut state = self.write();
            state.last_checked = Some(Utc::now());
            state.scrapes_since_check = 0;
        }

        let outcome = warehouse.query(self.probe_sql, timeout).await;

        let mut state = self.write();
        match outcome {
            Ok(_) => {
                state.availability = Availability::Available;
                if std::mem::take(&mut state.missing) {
                    info!(table = self.table, "Table is available again, resuming collection");
                    return Some(Edge::Recovered);
                }
                debug!(table = self.table, "Verified table is available");
                None
            }
            Err(e) if e.is_table_not_found() => {
                debug!(table = self.table, will_retry_in_scrapes = self.interval, "Verified table is unavailable");
                self.mark_missing(&mut state)
            }
            Err(e) => {
                debug!(table = self.table, error = %e, "Failed to check table availability, assuming unavailable");
                state.availability = Availability::Unavailable;
                None
            }
        }
    }

    /// Current availability. Counts the call as one scrape towards the next recheck.
    pub fn is_available_and_advance(&self) -> bool {
        let mut state = self.write();
        state.scrapes_since_check = state.scrapes_since_check.saturating_add(1);
        state.availability == Availability::Available
    }

    /// Records a missing-table error seen by a regular query. Other errors leave the state untouched.
    pub fn record_query_error(&self, stage: &str, error: &WarehouseError) -> Option<Edge> {
        if !error.is_table_not_found() {
            return None;
        }
        let mut state = self.write();
        state.scrapes_since_check = 0;
        debug!(table = self.table, stage, "Table became unavailable during collection");
        self.mark_missing(&mut state)
    }

    /// Records a confirmed missing table. Warns only on the first confirmation since the table was last seen.
    fn mark_missing(&self, state: &mut State) -> Option<Edge> {
        state.availability = Availability::Unavailable;
        if std::mem::replace(&mut state.missing, true) {
            return None;
        }
        warn!(
            table = self.table,
            note = "This is expected in some Databricks environments. All other metrics are collected normally.",
            "Table not available, its metrics will not be collected"
        );
        Some(Edge::BecameUnavailable)
    }
}
