//! Network detection: connectivity snapshots and debounced change events.
//!
//! The platform side (browser events, OS signals) lives behind the
//! [`ConnectivitySource`] capability trait so the core stays
//! platform-agnostic. Platform glue calls [`NetworkDetector::report_change`]
//! on every raw connectivity event; the detector collapses rapid flapping
//! into a single notification of the final state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::listeners::{ListenerSet, Unsubscribe};

// ============================================================================
// NetworkInfo
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Unknown,
}

/// Connection-quality hint. Metadata only — never gates a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Best-effort connectivity snapshot. Always derived fresh from the
/// source; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub is_online: bool,
    pub connection_type: ConnectionType,
    pub effective_type: EffectiveType,
}

impl NetworkInfo {
    /// Degraded snapshot when quality APIs are unavailable: only the
    /// navigator-level online boolean is known.
    pub fn basic(is_online: bool) -> Self {
        Self {
            is_online,
            connection_type: ConnectionType::Unknown,
            effective_type: EffectiveType::Unknown,
        }
    }
}

// ============================================================================
// ConnectivitySource — platform boundary
// ============================================================================

/// Platform-implemented connectivity probe.
///
/// `sample` returns the current best-effort state. Fields the platform
/// cannot determine degrade to `Unknown`.
pub trait ConnectivitySource: Send + Sync {
    fn sample(&self) -> NetworkInfo;
}

// ============================================================================
// Change events
// ============================================================================

/// A debounced connectivity transition.
#[derive(Debug, Clone)]
pub struct NetworkChange {
    pub previous: NetworkInfo,
    pub current: NetworkInfo,
}

impl NetworkChange {
    pub fn came_online(&self) -> bool {
        !self.previous.is_online && self.current.is_online
    }

    pub fn went_offline(&self) -> bool {
        self.previous.is_online && !self.current.is_online
    }
}

pub type NetworkListener = Arc<dyn Fn(&NetworkChange) + Send + Sync>;

// ============================================================================
// NetworkDetector
// ============================================================================

/// Observes a [`ConnectivitySource`] and broadcasts debounced transitions.
///
/// Must be used within a Tokio runtime: `report_change` spawns the
/// debounce timer.
pub struct NetworkDetector {
    shared: Arc<DetectorShared>,
    debounce: Duration,
}

struct DetectorShared {
    source: Arc<dyn ConnectivitySource>,
    /// Last state listeners were told about.
    last_emitted: Mutex<NetworkInfo>,
    /// Bumped on every raw event; a debounce timer only fires for the
    /// newest generation, collapsing flapping into one notification.
    generation: AtomicU64,
    listeners: ListenerSet<NetworkListener>,
}

impl NetworkDetector {
    pub fn new(source: Arc<dyn ConnectivitySource>, debounce: Duration) -> Self {
        let initial = source.sample();
        Self {
            shared: Arc::new(DetectorShared {
                source,
                last_emitted: Mutex::new(initial),
                generation: AtomicU64::new(0),
                listeners: ListenerSet::new(),
            }),
            debounce,
        }
    }

    /// Current snapshot, sampled fresh from the source.
    pub fn network_info(&self) -> NetworkInfo {
        self.shared.source.sample()
    }

    pub fn is_online(&self) -> bool {
        self.network_info().is_online
    }

    /// Register a transition listener; returns an unsubscribe closure.
    pub fn subscribe(&self, listener: NetworkListener) -> Unsubscribe {
        self.shared.listeners.subscribe(listener)
    }

    /// Called by platform glue on every raw connectivity event.
    ///
    /// Starts (or restarts) the debounce window; only the final state at
    /// the end of a quiet window is compared and broadcast, so N rapid
    /// transitions produce at most one notification.
    pub fn report_change(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(&self.shared);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a newer event
            }
            shared.emit_if_changed();
        });
    }
}

impl DetectorShared {
    fn emit_if_changed(&self) {
        let current = self.source.sample();
        let previous = {
            let mut last = self.last_emitted.lock();
            if *last == current {
                return;
            }
            std::mem::replace(&mut *last, current)
        };
        debug!(online = current.is_online, "network state changed");
        let change = NetworkChange { previous, current };
        self.listeners.notify(|l| l(&change));
    }
}

// ============================================================================
// Tests
// ============================================================================
