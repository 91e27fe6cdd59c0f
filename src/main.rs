//! prometheus alertmanager receiver that auto-silences recurring alerts
//!
//! Features:
//! - rule-based silencing from historical recurrence patterns per
//!   (alert, pod, namespace)
//! - llm analysis and debugging steps via openai, groq, ollama or localai
//! - slack notifications for alerts that are not silenced
//! - per-alert failure isolation: one bad alert never aborts a batch

use std::sync::Arc;

use anyhow::{Context, Result};
use decision::DecisionEngine;
use llm::LlmService;
use notify::{Notifier, SlackNotifier};
use processor::AlertProcessor;
use settings::Settings;
use store::{AlertStore, MemoryStore};

mod alert;
mod alertmanager_webhook_receiver;
mod decision;
mod llm;
mod log;
mod notify;
mod processor;
mod settings;
mod store;
mod telemetry_endpoint;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
	let default_panic = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		default_panic(info);
		std::process::exit(1);
	}));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	setup_panic_handler();

	log::setup_logging().context("could not setup logging")?;

	let settings = Settings::global();

	let store: Arc<dyn AlertStore> = Arc::new(MemoryStore::new());

	let llm = LlmService::new(&settings.llm).context("failed to construct llm service")?;

	let decision = DecisionEngine::new(Arc::clone(&store), settings.decision.clone());

	let notifier: Arc<dyn Notifier> = Arc::new(
		SlackNotifier::new(&settings.notification)
			.context("failed to construct slack notifier")?,
	);

	let processor = AlertProcessor::new(Arc::clone(&store), decision, llm, notifier);

	tokio::spawn(async move {
		#[allow(clippy::expect_used)]
		alertmanager_webhook_receiver::run_webhook_receiver(processor, store)
			.await
			.expect("alertmanager webhook receiver failed to start or crashed");
	});

	telemetry_endpoint::run_telemetry_endpoint().await;

	Ok(())
}
