use chrono::Utc;
use llmscope_detect::rule::RuleKind;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration};

use crate::pipeline::DetectionCycle;
use crate::state::LastCycle;

/// Drives detection cycles on a fixed cadence: threshold rules on a short
/// tick, anomaly rules on a longer one. Both ticks run the same cycle,
/// filtered by rule kind, so a slow anomaly pass never delays threshold
/// evaluation.
pub struct DetectionScheduler {
    cycle: Arc<DetectionCycle>,
    last_cycle: Arc<Mutex<Option<LastCycle>>>,
    rule_interval_secs: u64,
    anomaly_interval_secs: u64,
}

impl DetectionScheduler {
    pub fn new(
        cycle: Arc<DetectionCycle>,
        last_cycle: Arc<Mutex<Option<LastCycle>>>,
        rule_interval_secs: u64,
        anomaly_interval_secs: u64,
    ) -> Self {
        Self {
            cycle,
            last_cycle,
            rule_interval_secs: rule_interval_secs.max(1),
            anomaly_interval_secs: anomaly_interval_secs.max(1),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            rule_interval_secs = self.rule_interval_secs,
            anomaly_interval_secs = self.anomaly_interval_secs,
            "Detection scheduler started"
        );

        let mut rule_tick = interval(Duration::from_secs(self.rule_interval_secs));
        let mut anomaly_tick = interval(Duration::from_secs(self.anomaly_interval_secs));
        loop {
            tokio::select! {
                _ = rule_tick.tick() => {
                    self.run_kind(RuleKind::Threshold).await;
                }
                _ = anomaly_tick.tick() => {
                    self.run_kind(RuleKind::Anomaly).await;
                }
            }
        }
    }

    async fn run_kind(&self, kind: RuleKind) {
        match self.cycle.run(Some(kind)).await {
            Ok(summary) => {
                tracing::info!(
                    kind = %kind,
                    rules_evaluated = summary.rules_evaluated,
                    triggered = summary.triggered,
                    resolved = summary.resolved,
                    notified = summary.notified,
                    errors = summary.errors.len(),
                    "Scheduled detection cycle completed"
                );
                let mut guard = self
                    .last_cycle
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *guard = Some(LastCycle {
                    finished_at: Utc::now(),
                    kind: Some(kind),
                    summary,
                });
            }
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "Scheduled detection cycle failed");
            }
        }
    }
}
