//! # Last known state of every watched peer.
//!
//! [`PeerTracker`] is fed by the watchdog's fleet subscription and by its recovery
//! tasks. It decides when a lost peer gets an incident (at most one open per peer)
//! and records every probe made while the incident is open.
//!
//! ```text
//! $state messages ──► observe(peer, state)
//!                          │ state == lost
//!                          ▼
//!                     open_incident(peer) ── false ──► already recovering, ignore
//!                          │ true
//!                          ▼
//!                     recovery task ──► record_probe() … close_incident()
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::job::JobState;

/// What the watchdog knows about one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub last_state: JobState,
    pub last_seen: Instant,
    pub last_probe_at: Option<Instant>,
    /// Probes made during the open incident.
    pub recovery_attempts: u32,
    pub incident_open: bool,
}

impl PeerRecord {
    fn new(state: JobState) -> Self {
        Self {
            last_state: state,
            last_seen: Instant::now(),
            last_probe_at: None,
            recovery_attempts: 0,
            incident_open: false,
        }
    }
}

/// Shared, cloneable peer table.
#[derive(Clone, Default, Debug)]
pub struct PeerTracker {
    inner: Arc<RwLock<HashMap<String, PeerRecord>>>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a state report.
    pub async fn observe(&self, peer: &str, state: JobState) {
        let mut g = self.inner.write().await;
        let rec = g
            .entry(peer.to_string())
            .or_insert_with(|| PeerRecord::new(state));
        rec.last_state = state;
        rec.last_seen = Instant::now();
    }

    /// Opens an incident unless one is already open. Returns true if opened.
    pub async fn open_incident(&self, peer: &str) -> bool {
        let mut g = self.inner.write().await;
        let rec = g
            .entry(peer.to_string())
            .or_insert_with(|| PeerRecord::new(JobState::Lost));
        if rec.incident_open {
            return false;
        }
        rec.incident_open = true;
        rec.recovery_attempts = 0;
        true
    }

    /// Counts one probe of the open incident.
    pub async fn record_probe(&self, peer: &str) -> u32 {
        let mut g = self.inner.write().await;
        match g.get_mut(peer) {
            Some(rec) => {
                rec.recovery_attempts += 1;
                rec.last_probe_at = Some(Instant::now());
                rec.recovery_attempts
            }
            None => 0,
        }
    }

    /// Closes the incident with the state the probe saw.
    pub async fn close_incident(&self, peer: &str, state: JobState) {
        let mut g = self.inner.write().await;
        if let Some(rec) = g.get_mut(peer) {
            rec.incident_open = false;
            rec.last_state = state;
            rec.last_seen = Instant::now();
        }
    }

    pub async fn get(&self, peer: &str) -> Option<PeerRecord> {
        self.inner.read().await.get(peer).cloned()
    }

    /// Peers with an open incident, sorted.
    pub async fn lost_peers(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut lost: Vec<String> = g
            .iter()
            .filter(|(_, r)| r.incident_open)
            .map(|(p, _)| p.clone())
            .collect();
        lost.sort();
        lost
    }
}
