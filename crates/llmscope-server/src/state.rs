use chrono::{DateTime, Utc};
use llmscope_detect::rule::RuleKind;
use llmscope_detect::security::SecurityMonitor;
use llmscope_storage::{ControlStore, TelemetryStore};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ServerConfig;
use crate::pipeline::cycle::{CycleSummary, DetectionCycle};
use crate::pipeline::dispatcher::Dispatcher;

/// Outcome of the most recent detection cycle, shown on the status endpoint.
#[derive(Debug, Clone)]
pub struct LastCycle {
    pub finished_at: DateTime<Utc>,
    pub kind: Option<RuleKind>,
    pub summary: CycleSummary,
}

/// Shared application state for all HTTP handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlStore>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub security: Arc<SecurityMonitor>,
    pub dispatcher: Arc<Dispatcher>,
    pub cycle: Arc<DetectionCycle>,
    pub last_cycle: Arc<Mutex<Option<LastCycle>>>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Lock the last-cycle record, recovering from a poisoned Mutex if
    /// necessary.
    pub fn lock_last_cycle(&self) -> MutexGuard<'_, Option<LastCycle>> {
        self.last_cycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_cycle(&self, kind: Option<RuleKind>, summary: CycleSummary) {
        *self.lock_last_cycle() = Some(LastCycle {
            finished_at: Utc::now(),
            kind,
            summary,
        });
    }
}
