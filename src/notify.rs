//! slack notification sink
//!
//! Non-silenced alerts are posted to a slack incoming webhook as a block
//! kit message. If building or delivering the rich message fails, one
//! minimal plain-text message is attempted before giving up. Delivery
//! failures are reported as `false`, never as errors, so a broken webhook
//! cannot stall the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::alert::AlertRecord;

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    /// slack incoming webhook; notifications are disabled when unset
    pub slack_webhook_url: Option<Url>,
    /// base url of the dashboard linked from the "View Details" button
    #[serde(default = "default_app_url")]
    pub app_url: Url,
    #[serde_as(as = "DurationSeconds<f64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_app_url() -> Url {
    #[allow(clippy::expect_used)]
    Url::parse("http://localhost:3000").expect("static url is valid")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// a fully processed alert handed to the notification sink
pub struct AlertNotification<'a> {
    pub alert: &'a AlertRecord,
    pub analysis: &'a str,
    pub debug_steps: &'a [String],
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the notification was delivered.
    async fn notify(&self, notification: &AlertNotification<'_>) -> bool;
}

pub struct SlackNotifier {
    webhook_url: Option<Url>,
    app_url: Url,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(settings: &NotificationSettings) -> Result<Self, reqwest::Error> {
        if settings.slack_webhook_url.is_none() {
            tracing::warn!("no slack webhook url configured, notifications are disabled");
        }

        Ok(Self {
            webhook_url: settings.slack_webhook_url.clone(),
            app_url: settings.app_url.clone(),
            client: reqwest::Client::builder()
                .timeout(settings.request_timeout)
                .build()?,
        })
    }

    async fn post(&self, webhook_url: &Url, payload: &Value) -> Result<bool, reqwest::Error> {
        let response = self.client.post(webhook_url.clone()).json(payload).send().await?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, notification: &AlertNotification<'_>) -> bool {
        let Some(webhook_url) = &self.webhook_url else {
            return false;
        };

        let alert = notification.alert;
        let payload = build_payload(notification, &self.app_url);

        match self.post(webhook_url, &payload).await {
            Ok(delivered) => delivered,
            Err(err) => {
                tracing::warn!(
                    alert_name = alert.alert_name.as_str(),
                    "slack notification failed, retrying with plain text: {err:#}"
                );

                // minimal fallback message, nothing left to get wrong
                let fallback = json!({ "text": fallback_text(alert) });

                match self.post(webhook_url, &fallback).await {
                    Ok(delivered) => delivered,
                    Err(err) => {
                        tracing::error!(
                            alert_name = alert.alert_name.as_str(),
                            "slack fallback notification failed: {err:#}"
                        );
                        false
                    }
                }
            }
        }
    }
}

fn severity_emoji(severity: &str) -> &'static str {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => "🔥",
        "warning" => "⚠️",
        "info" => "ℹ️",
        _ => "⚠️",
    }
}

/// first sentence of the analysis, which is all that fits a context block
fn short_analysis(analysis: &str) -> String {
    match analysis.split('.').next() {
        Some(sentence) if !sentence.trim().is_empty() => format!("{}.", sentence.trim()),
        _ => String::from("No analysis available."),
    }
}

fn fallback_text(alert: &AlertRecord) -> String {
    format!(
        "🚨 ALERT: {} - {}/{} - Severity: {}",
        alert.alert_name, alert.namespace, alert.pod_name, alert.severity
    )
}

fn build_payload(notification: &AlertNotification<'_>, app_url: &Url) -> Value {
    let alert = notification.alert;

    let status = match alert.status {
        crate::alert::AlertStatus::Firing => "🔴 Firing",
        crate::alert::AlertStatus::Resolved => "✅ Resolved",
    };

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("🚨 Alert: {}", alert.alert_name),
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Status:* {status}") },
                {
                    "type": "mrkdwn",
                    "text": format!(
                        "*Severity:* {} {}",
                        severity_emoji(&alert.severity),
                        alert.severity.to_uppercase()
                    )
                }
            ]
        }),
    ];

    if let Some(summary) = alert.annotations.get("summary") {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Summary:* {summary}") }
        }));
    }

    blocks.push(json!({ "type": "divider" }));
    blocks.push(json!({
        "type": "section",
        "fields": [
            { "type": "mrkdwn", "text": format!("*Pod:* `{}`", alert.pod_name) },
            { "type": "mrkdwn", "text": format!("*Namespace:* `{}`", alert.namespace) },
            { "type": "mrkdwn", "text": format!("*Cluster:* `{}`", alert.cluster) },
            {
                "type": "mrkdwn",
                "text": format!(
                    "*Started:* <!date^{}^{{date_short_pretty}} at {{time}}|{}>",
                    alert.starts_at.timestamp(),
                    alert.starts_at.to_rfc3339()
                )
            }
        ]
    }));

    blocks.push(json!({
        "type": "context",
        "elements": [
            {
                "type": "mrkdwn",
                "text": format!("*Alert Analysis*: {}", short_analysis(notification.analysis))
            }
        ]
    }));

    if !notification.debug_steps.is_empty() {
        let steps = notification
            .debug_steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Debug Steps:*\n{steps}") }
        }));
    }

    blocks.push(json!({ "type": "divider" }));

    let details_url = alert
        .id
        .and_then(|id| app_url.join(&format!("alerts/{id}")).ok())
        .map(String::from);

    if let Some(details_url) = details_url {
        blocks.push(json!({
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": { "type": "plain_text", "text": "🔍 View Details", "emoji": true },
                    "style": "primary",
                    "url": details_url,
                    "value": "view_details"
                }
            ]
        }));
    }

    json!({ "blocks": blocks })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::alert::AlertStatus;

    fn alert() -> AlertRecord {
        AlertRecord {
            id: Some(3),
            alert_name: String::from("KubePodCrashLooping"),
            status: AlertStatus::Firing,
            severity: String::from("critical"),
            labels: HashMap::new(),
            annotations: HashMap::from([(
                String::from("summary"),
                String::from("pod keeps restarting"),
            )]),
            starts_at: Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap(),
            ends_at: None,
            duration_secs: None,
            pod_name: String::from("api-0"),
            namespace: String::from("prod"),
            cluster: String::from("eu-west"),
            silenced: false,
            silence_reason: String::new(),
            llm_analysis: String::new(),
            debug_steps: Vec::new(),
            feedback: None,
            created_at: None,
        }
    }

    #[test]
    fn emoji_per_severity() {
        assert_eq!(severity_emoji("critical"), "🔥");
        assert_eq!(severity_emoji("Warning"), "⚠️");
        assert_eq!(severity_emoji("info"), "ℹ️");
        assert_eq!(severity_emoji("page"), "⚠️");
    }

    #[test]
    fn analysis_is_shortened_to_first_sentence() {
        assert_eq!(
            short_analysis("The pod is crash looping. Check the image tag."),
            "The pod is crash looping."
        );
        assert_eq!(short_analysis(""), "No analysis available.");
    }

    #[test]
    fn fallback_text_names_the_alert() {
        assert_eq!(
            fallback_text(&alert()),
            "🚨 ALERT: KubePodCrashLooping - prod/api-0 - Severity: critical"
        );
    }

    #[test]
    fn payload_contains_blocks_and_details_link() {
        let alert = alert();
        let steps = vec![String::from("Check pod logs")];
        let payload = build_payload(
            &AlertNotification {
                alert: &alert,
                analysis: "Something broke. Details follow.",
                debug_steps: &steps,
            },
            &Url::parse("http://dashboard.local/").unwrap(),
        );

        let rendered = payload.to_string();
        assert!(rendered.contains("🚨 Alert: KubePodCrashLooping"));
        assert!(rendered.contains("*Summary:* pod keeps restarting"));
        assert!(rendered.contains("Something broke."));
        assert!(!rendered.contains("Details follow."));
        assert!(rendered.contains("http://dashboard.local/alerts/3"));
        assert!(rendered.contains("Check pod logs"));
    }

    #[tokio::test]
    async fn notify_without_webhook_reports_failure() {
        let notifier = SlackNotifier::new(&NotificationSettings {
            slack_webhook_url: None,
            app_url: default_app_url(),
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();

        let alert = alert();
        let delivered = notifier
            .notify(&AlertNotification {
                alert: &alert,
                analysis: "",
                debug_steps: &[],
            })
            .await;

        assert!(!delivered);
    }
}
