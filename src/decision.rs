//! silencing decision engine
//!
//! Classifies an incoming alert against the resolved history of the same
//! `(alert_name, pod_name, namespace)` triple. The thresholds come from
//! [`DecisionSettings`] and the clock is pinned to a configured utc offset,
//! so [`classify`] is a pure function over its inputs.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

use crate::{
    alert::AlertRecord,
    store::{AlertStore, StoreError},
};

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionSettings {
    /// below this many resolved records the engine never silences
    pub min_historical_alerts: usize,
    /// how many resolved records are fetched per decision
    pub history_limit: usize,
    /// resolutions faster than this count as quick
    #[serde_as(as = "DurationSeconds<f64>")]
    pub quick_resolution: Duration,
    /// quick resolutions needed before the weekday rule applies
    pub quick_resolution_hits: usize,
    /// records sharing today's weekday needed for the weekday rule
    pub same_weekday_hits: usize,
    /// records sharing the current hour needed for the hour rule
    pub same_hour_hits: usize,
    /// the hour rule additionally requires every record to resolve faster
    /// than this
    #[serde_as(as = "DurationSeconds<f64>")]
    pub max_silence_duration: Duration,
    /// utc offset (whole hours) for the weekday/hour comparisons
    pub utc_offset_hours: i8,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            min_historical_alerts: 5,
            history_limit: 20,
            quick_resolution: Duration::from_secs(600),
            quick_resolution_hits: 3,
            same_weekday_hits: 2,
            same_hour_hits: 3,
            max_silence_duration: Duration::from_secs(900),
            utc_offset_hours: 0,
        }
    }
}

/// outcome of a silencing decision together with its justification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceDecision {
    pub silenced: bool,
    pub reason: String,
}

impl SilenceDecision {
    fn silence(reason: String) -> Self {
        Self {
            silenced: true,
            reason,
        }
    }

    fn keep(reason: &str) -> Self {
        Self {
            silenced: false,
            reason: reason.to_string(),
        }
    }
}

pub struct DecisionEngine {
    store: Arc<dyn AlertStore>,
    settings: DecisionSettings,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn AlertStore>, settings: DecisionSettings) -> Self {
        Self { store, settings }
    }

    /// Fetches the alert's history and classifies it. A store failure
    /// propagates; there is no fallback decision.
    pub async fn evaluate(&self, alert: &AlertRecord) -> Result<SilenceDecision, StoreError> {
        let history = self
            .store
            .recent_resolved(
                &alert.alert_name,
                &alert.pod_name,
                &alert.namespace,
                self.settings.history_limit,
            )
            .await?;

        let now = Utc::now().with_timezone(&self.offset());

        Ok(classify(alert, &history, now, &self.settings))
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(i32::from(self.settings.utc_offset_hours) * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

/// Applies the silencing rules in fixed order, first match wins:
///
/// 1. thin history never silences
/// 2. enough quick resolutions plus a same-weekday recurrence silences
/// 3. a same-hour recurrence silences if the whole history resolves fast
fn classify(
    alert: &AlertRecord,
    history: &[AlertRecord],
    now: DateTime<FixedOffset>,
    settings: &DecisionSettings,
) -> SilenceDecision {
    if history.len() < settings.min_historical_alerts {
        return SilenceDecision::keep("Insufficient historical data");
    }

    let offset = *now.offset();
    let resolves_within = |record: &AlertRecord, limit: Duration| {
        record
            .duration_secs
            .map_or(false, |duration| duration < limit.as_secs_f64())
    };

    let quick_resolutions = history
        .iter()
        .filter(|record| resolves_within(record, settings.quick_resolution))
        .count();

    if quick_resolutions >= settings.quick_resolution_hits {
        let same_weekday = history
            .iter()
            .filter(|record| record.starts_at.with_timezone(&offset).weekday() == now.weekday())
            .count();

        if same_weekday >= settings.same_weekday_hits {
            return SilenceDecision::silence(format!(
                "Pattern detected: {} on {} regularly self-resolves on this day of week within {} minutes",
                alert.alert_name,
                alert.pod_name,
                settings.quick_resolution.as_secs() / 60,
            ));
        }
    }

    let same_hour = history
        .iter()
        .filter(|record| record.starts_at.with_timezone(&offset).hour() == now.hour())
        .count();

    if same_hour >= settings.same_hour_hits
        && history
            .iter()
            .all(|record| resolves_within(record, settings.max_silence_duration))
    {
        return SilenceDecision::silence(format!(
            "Pattern detected: {} regularly self-resolves during this hour of the day",
            alert.alert_name,
        ));
    }

    SilenceDecision::keep("No silencing pattern detected")
}
