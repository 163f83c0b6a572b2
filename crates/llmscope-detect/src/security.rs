//! Windowed counting of security events.
//!
//! The parallel variant of the detection pattern: instead of numeric
//! aggregates, same-typed events are counted per subject inside a short
//! sliding window and checked against a per-type threshold table. The
//! buffer is owned by one [`SecurityMonitor`] instance constructed at
//! startup and injected where it is needed.

use chrono::Duration;
use llmscope_common::types::{SecurityEvent, SecurityEventKind, Severity};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Per-type event-count thresholds for aggregate breaches.
#[derive(Debug, Clone)]
pub struct SecurityThresholds {
    map: HashMap<SecurityEventKind, u32>,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(SecurityEventKind::PromptInjection, 3);
        map.insert(SecurityEventKind::ReplayAttack, 2);
        map.insert(SecurityEventKind::FailedAuth, 5);
        map.insert(SecurityEventKind::PiiDetected, 5);
        map.insert(SecurityEventKind::RateLimitExceeded, 10);
        Self { map }
    }
}

impl SecurityThresholds {
    /// Builds the default table with per-type overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending key if an override refers to
    /// an unknown event type, so a config typo fails at startup instead
    /// of silently never matching.
    pub fn with_overrides(overrides: &HashMap<String, u32>) -> Result<Self, String> {
        let mut thresholds = Self::default();
        for (name, value) in overrides {
            let kind: SecurityEventKind = name.parse()?;
            thresholds.map.insert(kind, *value);
        }
        Ok(thresholds)
    }

    pub fn get(&self, kind: SecurityEventKind) -> u32 {
        self.map.get(&kind).copied().unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct SecurityMonitorConfig {
    /// Counting window for same-subject, same-type events.
    pub window_minutes: u32,
    /// Events older than this are pruned from the buffer.
    pub horizon_hours: u32,
    /// Hard cap on buffered events; oldest are dropped past it.
    pub max_events: usize,
    pub thresholds: SecurityThresholds,
}

impl Default for SecurityMonitorConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            horizon_hours: 24,
            max_events: 10_000,
            thresholds: SecurityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationKind {
    /// Same-type event count for one subject reached its threshold.
    AggregateBreach,
    /// A single critical-severity event; raised regardless of counts.
    CriticalEvent,
}

/// A verdict the caller turns into an alert and notifications.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub kind: EscalationKind,
    pub severity: Severity,
    pub subject: String,
    pub count: u32,
    pub message: String,
    pub event: SecurityEvent,
}

/// Buffer occupancy snapshot for the status surface.
#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct SecurityBufferStats {
    pub buffered: usize,
    pub capacity: usize,
    pub window_minutes: u32,
}

pub struct SecurityMonitor {
    config: SecurityMonitorConfig,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl SecurityMonitor {
    pub fn new(config: SecurityMonitorConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Lock the buffer, recovering from a poisoned Mutex if necessary.
    fn lock_events(&self) -> MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends an event and returns any escalations it raised.
    ///
    /// An aggregate breach is raised exactly when the same-subject,
    /// same-type count inside the window reaches the threshold, so the
    /// crossing event escalates once and later events in the same window
    /// do not re-raise. A critical event additionally escalates on its
    /// own, independent of the count.
    pub fn log_event(&self, event: SecurityEvent) -> Vec<Escalation> {
        let now = event.timestamp;
        let subject = subject_of(&event);
        let threshold = self.config.thresholds.get(event.kind);

        let count = {
            let mut events = self.lock_events();

            let horizon_cutoff = now - Duration::hours(self.config.horizon_hours as i64);
            while let Some(front) = events.front() {
                if front.timestamp < horizon_cutoff {
                    events.pop_front();
                } else {
                    break;
                }
            }
            while events.len() >= self.config.max_events {
                events.pop_front();
            }
            events.push_back(event.clone());

            let window_start = now - Duration::minutes(self.config.window_minutes as i64);
            events
                .iter()
                .filter(|e| {
                    e.kind == event.kind
                        && e.timestamp >= window_start
                        && e.timestamp <= now
                        && subject_of(e) == subject
                })
                .count() as u32
        };

        let mut escalations = Vec::new();

        if count == threshold {
            let severity = event.severity.max(Severity::Warning);
            tracing::warn!(
                kind = %event.kind,
                subject = %subject,
                count,
                threshold,
                "Security event threshold reached"
            );
            escalations.push(Escalation {
                kind: EscalationKind::AggregateBreach,
                severity,
                subject: subject.clone(),
                count,
                message: format!(
                    "{count} {} events for {subject} within {}m (threshold {threshold})",
                    event.kind, self.config.window_minutes,
                ),
                event: event.clone(),
            });
        }

        if event.severity == Severity::Critical {
            let mut message = format!("critical security event: {} for {subject}", event.kind);
            if let Some(detail) = &event.detail {
                message.push_str(&format!(" ({detail})"));
            }
            tracing::warn!(
                kind = %event.kind,
                subject = %subject,
                "Critical security event escalated"
            );
            escalations.push(Escalation {
                kind: EscalationKind::CriticalEvent,
                severity: Severity::Critical,
                subject,
                count: 1,
                message,
                event,
            });
        }

        escalations
    }

    pub fn stats(&self) -> SecurityBufferStats {
        SecurityBufferStats {
            buffered: self.lock_events().len(),
            capacity: self.config.max_events,
            window_minutes: self.config.window_minutes,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.lock_events().len()
    }
}

/// Counting subject: user first, then source IP, else process-global.
fn subject_of(event: &SecurityEvent) -> String {
    if let Some(user_id) = &event.user_id {
        format!("user:{user_id}")
    } else if let Some(ip) = &event.ip {
        format!("ip:{ip}")
    } else {
        "global".to_string()
    }
}
