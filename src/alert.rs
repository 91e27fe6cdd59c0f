//! data structures for deserializing incoming alerts and the normalized
//! record the pipeline enriches and persists
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// opaque record id, assigned by the store on insert
pub type AlertId = u64;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
/// data from prometheus received by the alertmanager webhook receiver.
/// the grouping fields are optional so that minimal bodies containing only
/// `alerts` are accepted as well
#[allow(clippy::missing_docs_in_private_items)]
pub struct Data {
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub group_key: String,

	#[serde(default)]
	pub receiver: String,
	#[serde(default)]
	pub status: String,
	pub alerts: Vec<WebhookAlert>,
	#[serde(default)]
	pub group_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_annotations: HashMap<String, String>,
	#[serde(default, rename = "externalURL")]
	pub external_url: String,
}

/// status of a single alert as reported by alertmanager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
	Firing,
	Resolved,
}

impl AlertStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Firing => "firing",
			Self::Resolved => "resolved",
		}
	}
}

impl std::fmt::Display for AlertStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct WebhookAlert {
	pub status: AlertStatus,
	#[serde(default)]
	pub labels: HashMap<String, String>,
	#[serde(default)]
	pub annotations: HashMap<String, String>,
	pub starts_at: DateTime<Utc>,
	#[serde(default)]
	pub ends_at: Option<DateTime<Utc>>,
	#[serde(default, rename = "generatorURL")]
	pub generator_url: String,
}

/// reviewer verdict on a silencing decision, attached after the fact via the
/// api, never by the pipeline itself
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Feedback {
	pub correct: bool,
	#[serde(default)]
	pub comments: String,
}

/// a single webhook alert normalized for the processing pipeline.
/// `silenced`/`silence_reason` come from the decision engine, `llm_analysis`
/// and `debug_steps` from the llm service, `id` and `created_at` from the
/// store at persistence time
#[derive(Clone, Debug, Deserialize, Serialize)]
#[allow(clippy::missing_docs_in_private_items)]
pub struct AlertRecord {
	pub id: Option<AlertId>,
	pub alert_name: String,
	pub status: AlertStatus,
	pub severity: String,
	pub labels: HashMap<String, String>,
	pub annotations: HashMap<String, String>,
	pub starts_at: DateTime<Utc>,
	pub ends_at: Option<DateTime<Utc>>,
	pub duration_secs: Option<f64>,
	pub pod_name: String,
	pub namespace: String,
	pub cluster: String,
	pub silenced: bool,
	pub silence_reason: String,
	pub llm_analysis: String,
	pub debug_steps: Vec<String>,
	pub feedback: Option<Feedback>,
	pub created_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
	/// Normalizes a raw webhook alert. Missing pod/namespace/cluster labels
	/// default to `"unknown"`, a missing severity label to `"warning"`. The
	/// duration is computed only for resolved alerts with a usable `endsAt`.
	pub fn from_webhook(raw: WebhookAlert) -> Self {
		let label = |key: &str| {
			raw.labels
				.get(key)
				.cloned()
				.unwrap_or_else(|| String::from("unknown"))
		};

		let alert_name = label("alertname");
		let pod_name = label("pod");
		let namespace = label("namespace");
		let cluster = label("cluster");
		let severity = raw
			.labels
			.get("severity")
			.cloned()
			.unwrap_or_else(|| String::from("warning"));

		// alertmanager reports a zero endsAt while an alert is still firing
		let ends_at = raw.ends_at.filter(|end| *end > raw.starts_at);

		let duration_secs = match (raw.status, ends_at) {
			(AlertStatus::Resolved, Some(end)) => {
				Some((end - raw.starts_at).num_milliseconds() as f64 / 1000.)
			}
			_ => None,
		};

		Self {
			id: None,
			alert_name,
			status: raw.status,
			severity,
			labels: raw.labels,
			annotations: raw.annotations,
			starts_at: raw.starts_at,
			ends_at,
			duration_secs,
			pod_name,
			namespace,
			cluster,
			silenced: false,
			silence_reason: String::new(),
			llm_analysis: String::new(),
			debug_steps: Vec::new(),
			feedback: None,
			created_at: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	fn raw_alert(status: AlertStatus, labels: &[(&str, &str)]) -> WebhookAlert {
		WebhookAlert {
			status,
			labels: labels
				.iter()
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect(),
			annotations: HashMap::new(),
			starts_at: Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap(),
			ends_at: None,
			generator_url: String::new(),
		}
	}

	#[test]
	fn defaults_for_missing_labels() {
		let record = AlertRecord::from_webhook(raw_alert(
			AlertStatus::Firing,
			&[("alertname", "KubePodCrashLooping")],
		));

		assert_eq!(record.alert_name, "KubePodCrashLooping");
		assert_eq!(record.pod_name, "unknown");
		assert_eq!(record.namespace, "unknown");
		assert_eq!(record.cluster, "unknown");
		assert_eq!(record.severity, "warning");
	}

	#[test]
	fn severity_from_labels() {
		let record =
			AlertRecord::from_webhook(raw_alert(AlertStatus::Firing, &[("severity", "critical")]));

		assert_eq!(record.severity, "critical");
	}

	#[test]
	fn duration_for_resolved_alert() {
		let mut raw = raw_alert(AlertStatus::Resolved, &[]);
		raw.ends_at = Some(raw.starts_at + chrono::Duration::milliseconds(125_000));

		let record = AlertRecord::from_webhook(raw);

		assert_eq!(record.duration_secs, Some(125.));
	}

	#[test]
	fn no_duration_while_firing() {
		let mut raw = raw_alert(AlertStatus::Firing, &[]);
		raw.ends_at = Some(raw.starts_at + chrono::Duration::seconds(60));

		let record = AlertRecord::from_webhook(raw);

		assert_eq!(record.duration_secs, None);
	}

	#[test]
	fn zero_ends_at_is_discarded() {
		let mut raw = raw_alert(AlertStatus::Resolved, &[]);
		raw.ends_at = Some(Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap());

		let record = AlertRecord::from_webhook(raw);

		assert_eq!(record.ends_at, None);
		assert_eq!(record.duration_secs, None);
	}

	#[test]
	fn deserializes_full_alertmanager_payload() {
		let body = serde_json::json!({
			"version": "4",
			"groupKey": "{}:{alertname=\"HighCPU\"}",
			"receiver": "muzzle",
			"status": "firing",
			"alerts": [{
				"status": "firing",
				"labels": { "alertname": "HighCPU", "pod": "api-0", "namespace": "prod" },
				"annotations": { "summary": "cpu is high" },
				"startsAt": "2024-04-02T10:00:00Z",
				"generatorURL": "http://prometheus/graph"
			}],
			"groupLabels": {},
			"commonLabels": {},
			"commonAnnotations": {},
			"externalURL": "http://alertmanager"
		});

		let data: Data = serde_json::from_value(body).unwrap();
		assert_eq!(data.alerts.len(), 1);
		assert_eq!(data.alerts[0].status, AlertStatus::Firing);
		assert_eq!(data.alerts[0].labels["pod"], "api-0");
	}

	#[test]
	fn deserializes_minimal_payload() {
		let body = serde_json::json!({
			"alerts": [{
				"status": "resolved",
				"labels": {},
				"annotations": {},
				"startsAt": "2024-04-02T10:00:00Z",
				"endsAt": "2024-04-02T10:05:00Z"
			}]
		});

		let data: Data = serde_json::from_value(body).unwrap();
		assert_eq!(data.alerts[0].status, AlertStatus::Resolved);
		assert!(data.alerts[0].ends_at.is_some());
	}
}
