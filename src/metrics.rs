//! Registry metrics for monitoring and observability.
//!
//! Counters are plain atomics so recording never contends with the handle
//! table lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Handles currently registered
    pub live_handles: u64,

    /// Handles issued since creation
    pub total_registered: u64,

    /// Handles released since creation
    pub total_forgotten: u64,

    /// `forget` calls on handles that were not registered
    pub ignored_forgets: u64,

    /// Highest number of simultaneously live handles
    pub peak_live_handles: u64,

    /// Casts that produced a value
    pub casts_succeeded: u64,

    /// Casts rejected as not convertible
    pub casts_failed: u64,
}

/// Metrics collector for a single registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    registered: AtomicU64,
    forgotten: AtomicU64,
    ignored_forgets: AtomicU64,
    peak_live: AtomicU64,
    casts_succeeded: AtomicU64,
    casts_failed: AtomicU64,
}

impl RegistryMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration; `live` is the table size afterwards
    pub fn record_register(&self, live: usize) {
        self.registered.fetch_add(1, Ordering::Relaxed);
        self.peak_live.fetch_max(live as u64, Ordering::Relaxed);
    }

    /// Record a successful release
    pub fn record_forget(&self) {
        self.forgotten.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release of an unknown handle that was ignored
    pub fn record_ignored_forget(&self) {
        self.ignored_forgets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a cast
    pub fn record_cast(&self, succeeded: bool) {
        if succeeded {
            self.casts_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.casts_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total registrations
    pub fn total_registered(&self) -> u64 {
        self.registered.load(Ordering::Relaxed)
    }

    /// Total releases
    pub fn total_forgotten(&self) -> u64 {
        self.forgotten.load(Ordering::Relaxed)
    }

    /// Snapshot the counters together with the current table size
    pub fn snapshot(&self, live: usize) -> RegistryStats {
        RegistryStats {
            live_handles: live as u64,
            total_registered: self.total_registered(),
            total_forgotten: self.total_forgotten(),
            ignored_forgets: self.ignored_forgets.load(Ordering::Relaxed),
            peak_live_handles: self.peak_live.load(Ordering::Relaxed),
            casts_succeeded: self.casts_succeeded.load(Ordering::Relaxed),
            casts_failed: self.casts_failed.load(Ordering::Relaxed),
        }
    }
}

impl RegistryStats {
    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP nexus_bridge_live_handles Handles currently registered\n");
        output.push_str("# TYPE nexus_bridge_live_handles gauge\n");
        output.push_str(&format!("nexus_bridge_live_handles {}\n", self.live_handles));

        output.push_str("\n# HELP nexus_bridge_peak_live_handles Peak simultaneously live handles\n");
        output.push_str("# TYPE nexus_bridge_peak_live_handles gauge\n");
        output.push_str(&format!(
            "nexus_bridge_peak_live_handles {}\n",
            self.peak_live_handles
        ));

        output.push_str("\n# HELP nexus_bridge_handles_total Handle lifecycle events\n");
        output.push_str("# TYPE nexus_bridge_handles_total counter\n");
        output.push_str(&format!(
            "nexus_bridge_handles_total{{event=\"registered\"}} {}\n",
            self.total_registered
        ));
        output.push_str(&format!(
            "nexus_bridge_handles_total{{event=\"forgotten\"}} {}\n",
            self.total_forgotten
        ));
        output.push_str(&format!(
            "nexus_bridge_handles_total{{event=\"ignored_forget\"}} {}\n",
            self.ignored_forgets
        ));

        output.push_str("\n# HELP nexus_bridge_casts_total Cast outcomes\n");
        output.push_str("# TYPE nexus_bridge_casts_total counter\n");
        output.push_str(&format!(
            "nexus_bridge_casts_total{{status=\"success\"}} {}\n",
            self.casts_succeeded
        ));
        output.push_str(&format!(
            "nexus_bridge_casts_total{{status=\"not_convertible\"}} {}\n",
            self.casts_failed
        ));

        output
    }
}
