//! llm service: turns an alert record into an analysis string and a list of
//! debug steps, insulating the pipeline from provider failures
//!
//! Provider errors never escape this module. [`LlmService::analyze_alert`]
//! and [`LlmService::generate_debug_steps`] always return usable content,
//! falling back to fixed values when the backend is unreachable.

use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::alert::AlertRecord;

pub mod provider;

use provider::{build_provider, CompletionProvider, ProviderConfig, ProviderError};

/// returned by [`LlmService::analyze_alert`] when the provider fails
pub const ANALYSIS_FALLBACK: &str = "Unable to generate analysis due to error with LLM service.";

/// returned by [`LlmService::generate_debug_steps`] when the provider fails
pub const DEBUG_STEP_FALLBACK: [&str; 3] =
    ["Check pod logs", "Check pod events", "Check node status"];

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// provider name, case-insensitive: openai, groq, ollama or localai
    pub provider: String,
    /// api key for the hosted backends; falls back to the provider's
    /// conventional environment variable
    pub api_key: Option<String>,
    /// base url for the self-hosted backends
    pub endpoint: Option<Url>,
    pub model: Option<String>,
    #[serde_as(as = "DurationSeconds<f64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// how long transient provider errors are retried before the fallback
    /// content is used
    #[serde_as(as = "DurationSeconds<f64>")]
    #[serde(default = "default_retry_window")]
    pub retry_window: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_window() -> Duration {
    Duration::from_secs(10)
}

impl LlmSettings {
    /// Resolution order per field: explicit config value, then the
    /// provider's conventional environment variable, then the provider's
    /// built-in default.
    fn resolve(&self) -> ProviderConfig {
        let provider = self.provider.to_ascii_lowercase();

        let env = |key: &str| std::env::var(key).ok();

        let api_key = self.api_key.clone().or_else(|| match provider.as_str() {
            "openai" => env("OPENAI_API_KEY"),
            "groq" => env("GROQ_API_KEY"),
            _ => None,
        });

        let endpoint = self.endpoint.clone().or_else(|| {
            let raw = match provider.as_str() {
                "ollama" => env("OLLAMA_ENDPOINT"),
                "localai" => env("LOCALAI_ENDPOINT"),
                _ => None,
            };
            raw.and_then(|raw| Url::parse(&raw).ok())
        });

        let model = self.model.clone().or_else(|| match provider.as_str() {
            "openai" => env("OPENAI_MODEL"),
            "groq" => env("GROQ_MODEL"),
            "ollama" => env("OLLAMA_MODEL"),
            "localai" => env("LOCALAI_MODEL"),
            _ => None,
        });

        ProviderConfig {
            api_key,
            endpoint,
            model,
            request_timeout: self.request_timeout,
        }
    }
}

pub struct LlmService {
    provider: Box<dyn CompletionProvider>,
    retry_window: Duration,
}

impl LlmService {
    /// Resolves the settings and builds the configured provider. Fails on
    /// unknown provider names and missing credentials, so misconfiguration
    /// surfaces at startup instead of on the first alert.
    pub fn new(settings: &LlmSettings) -> Result<Self, ProviderError> {
        let config = settings.resolve();
        let provider = build_provider(&settings.provider, &config)?;

        tracing::info!(
            provider = settings.provider.as_str(),
            model = config.model.as_deref().unwrap_or("provider default"),
            "llm service initialized"
        );

        Ok(Self {
            provider,
            retry_window: settings.retry_window,
        })
    }

    /// Bypasses the registry; used to inject mock providers in tests.
    #[cfg(test)]
    pub fn with_provider(provider: Box<dyn CompletionProvider>, retry_window: Duration) -> Self {
        Self {
            provider,
            retry_window,
        }
    }

    /// Returns the provider's analysis of the alert or
    /// [`ANALYSIS_FALLBACK`]. Never fails.
    pub async fn analyze_alert(&self, alert: &AlertRecord) -> String {
        match self.complete_with_retry(&analysis_prompt(alert)).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(
                    alert_name = alert.alert_name.as_str(),
                    "llm analysis failed: {err:#}"
                );
                ANALYSIS_FALLBACK.to_string()
            }
        }
    }

    /// Returns one debug step per non-blank response line or the fixed
    /// [`DEBUG_STEP_FALLBACK`] list. Never fails.
    pub async fn generate_debug_steps(&self, alert: &AlertRecord) -> Vec<String> {
        match self.complete_with_retry(&debug_prompt(alert)).await {
            Ok(response) => response
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) => {
                tracing::warn!(
                    alert_name = alert.alert_name.as_str(),
                    "llm debug step generation failed: {err:#}"
                );
                DEBUG_STEP_FALLBACK.iter().map(|s| s.to_string()).collect()
            }
        }
    }

    /// One bounded retry window for transient errors, permanent errors fail
    /// immediately.
    async fn complete_with_retry(&self, prompt: &str) -> Result<String, ProviderError> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_window),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            self.provider.complete(prompt).await.map_err(|err| {
                if err.is_transient() {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await
    }
}

fn alert_context(alert: &AlertRecord) -> String {
    format!(
        "Alert Name: {}\n\
         Status: {}\n\
         Pod: {}\n\
         Namespace: {}\n\
         Cluster: {}\n\
         Labels: {}\n\
         Annotations: {}",
        alert.alert_name,
        alert.status,
        alert.pod_name,
        alert.namespace,
        alert.cluster,
        serde_json::to_string(&alert.labels).unwrap_or_default(),
        serde_json::to_string(&alert.annotations).unwrap_or_default(),
    )
}

fn analysis_prompt(alert: &AlertRecord) -> String {
    format!(
        "You are an expert Kubernetes administrator. Analyze the following alert and provide a \
         concise explanation of what it means and its potential impact.\n\n{}\n\nYour analysis:",
        alert_context(alert)
    )
}

fn debug_prompt(alert: &AlertRecord) -> String {
    format!(
        "You are an expert Kubernetes administrator. Provide a list of debugging steps for the \
         following alert.\n\n{}\n\nList specific debugging steps, one per line:",
        alert_context(alert)
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::alert::{AlertRecord, AlertStatus};

    #[derive(Debug)]
    struct StaticProvider(Result<String, ()>);

    #[async_trait]
    impl CompletionProvider for StaticProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                // permanent so the retry policy doesn't slow tests down
                Err(()) => Err(ProviderError::Config(String::from("provider down"))),
            }
        }
    }

    fn service(result: Result<&str, ()>) -> LlmService {
        LlmService::with_provider(
            Box::new(StaticProvider(result.map(str::to_string))),
            Duration::ZERO,
        )
    }

    fn alert() -> AlertRecord {
        AlertRecord {
            id: None,
            alert_name: String::from("KubePodCrashLooping"),
            status: AlertStatus::Firing,
            severity: String::from("critical"),
            labels: HashMap::from([(String::from("pod"), String::from("api-0"))]),
            annotations: HashMap::new(),
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

    #[tokio::test]
    async fn analysis_passes_provider_text_through() {
        let analysis = service(Ok("The pod is crash looping."))
            .analyze_alert(&alert())
            .await;

        assert_eq!(analysis, "The pod is crash looping.");
    }

    #[tokio::test]
    async fn analysis_falls_back_on_provider_error() {
        let analysis = service(Err(())).analyze_alert(&alert()).await;

        assert_eq!(analysis, ANALYSIS_FALLBACK);
    }

    #[tokio::test]
    async fn debug_steps_split_per_line_and_drop_blanks() {
        let steps = service(Ok("kubectl logs api-0\n\n  kubectl describe pod api-0  \n"))
            .generate_debug_steps(&alert())
            .await;

        assert_eq!(
            steps,
            vec!["kubectl logs api-0", "kubectl describe pod api-0"]
        );
    }

    #[tokio::test]
    async fn debug_steps_fall_back_on_provider_error() {
        let steps = service(Err(())).generate_debug_steps(&alert()).await;

        assert_eq!(steps, DEBUG_STEP_FALLBACK.to_vec());
    }

    #[test]
    fn prompts_embed_alert_fields() {
        let prompt = analysis_prompt(&alert());

        assert!(prompt.contains("Alert Name: KubePodCrashLooping"));
        assert!(prompt.contains("Status: firing"));
        assert!(prompt.contains("Namespace: prod"));
        assert!(prompt.contains("\"pod\":\"api-0\""));

        assert!(debug_prompt(&alert()).contains("one per line"));
    }
}
