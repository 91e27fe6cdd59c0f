use anyhow::{Context, Result};
use clap::{Arg, Command};
use config::Config;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
    alertmanager_webhook_receiver::AlertReceiverSettings, decision::DecisionSettings,
    llm::LlmSettings, log::LogSettings, notify::NotificationSettings,
    telemetry_endpoint::TelemetryEndpointSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub alert_webhook_receiver: AlertReceiverSettings,
    pub telemetry_endpoint: TelemetryEndpointSettings,
    pub log: LogSettings,
    pub llm: LlmSettings,
    #[serde(default)]
    pub decision: DecisionSettings,
    pub notification: NotificationSettings,
}

impl Settings {
    pub fn global() -> &'static Self {
        SETTINGS.get_or_init(|| {
            match Self::load().context("failed to load config and command line arguments") {
                Ok(settings) => settings,
                Err(err) => {
                    // tracing wasn't setup yet
                    panic!("{:#?}", err);
                }
            }
        })
    }

    fn load() -> Result<Self> {
        let opts = Command::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .args(&[
                Arg::new("config")
                    .help("path of config file")
                    .takes_value(true)
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
                Arg::new("level")
                    .help("log level")
                    .possible_values(["Error", "Warn", "Info", "Debug", "Trace"])
                    .ignore_case(true)
                    .takes_value(true)
                    .long("log"),
            ])
            .get_matches();

        let config_path = opts.value_of("config").unwrap_or("./config.yaml");

        // secrets like llm.api_key can come from the environment, e.g.
        // MUZZLE__LLM__API_KEY
        let conf = Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix("MUZZLE").separator("__"))
            .build()
            .context("can't load config")?;

        let mut settings: Settings = conf.try_deserialize().context("can't load config")?;

        if let Some(level) = opts.value_of("level") {
            settings.log.level = level.to_string();
        }

        Ok(settings)
    }
}
