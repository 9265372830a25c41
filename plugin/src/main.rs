mod config;
mod display;
mod engine;
mod error;
mod services;

use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result};
use streamdeck::{CommandSink, RegistrationParams};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::PluginConfig;
use crate::engine::{ActionDispatch, Registration};
use crate::services::{
    FastmailService, GitLabService, GmailService, MarvinService, TodoistService, YnabService,
};

/// The host owns this process's stdio, so all logging goes to a timestamped
/// file in `logs/` next to the working directory.
fn init_logging() -> Result<()> {
    fs::create_dir_all("logs").context("could not create logs directory")?;
    let file_name = format!(
        "logs/streamdeck-inboxes-{}.log",
        chrono::Local::now().format("%Y-%m-%dt%Hh%Mm%Ss")
    );
    let file = fs::File::create(&file_name)
        .with_context(|| format!("could not create log file {file_name}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamdeck_inboxes=debug,streamdeck=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();

    Ok(())
}

fn build_actions(
    config: &PluginConfig,
    http: reqwest::Client,
    sink: CommandSink,
) -> Vec<Box<dyn ActionDispatch>> {
    vec![
        Box::new(Registration::new(
            FastmailService::new(http.clone(), config.fastmail_refresh),
            sink.clone(),
        )),
        Box::new(Registration::new(
            GitLabService::new(http.clone(), config.gitlab_refresh),
            sink.clone(),
        )),
        Box::new(Registration::new(
            GmailService::new(config.gmail_refresh, config.http_timeout),
            sink.clone(),
        )),
        Box::new(Registration::new(
            MarvinService::new(http.clone(), config.marvin_refresh),
            sink.clone(),
        )),
        Box::new(Registration::new(
            TodoistService::new(http.clone(), config.todoist_refresh),
            sink.clone(),
        )),
        Box::new(Registration::new(
            YnabService::new(http, config.ynab_refresh),
            sink,
        )),
    ]
}

async fn run(params: RegistrationParams, config: PluginConfig) -> Result<()> {
    let connection = streamdeck::connect(&params)
        .await
        .context("could not register with the Stream Deck host")?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("could not build http client")?;

    let actions = build_actions(&config, http, connection.commands.clone());
    tracing::info!(actions = actions.len(), "plugin registered");

    let mut events = connection.events;
    while let Some(event) = events.recv().await {
        let Some(action) = event.action.as_deref() else {
            tracing::debug!(event = %event.event, "ignoring action-less event");
            continue;
        };
        match actions.iter().find(|a| a.action_uuid() == action) {
            Some(dispatch) => dispatch.dispatch(event).await,
            None => tracing::debug!(action, "no handler for action"),
        }
    }

    tracing::info!("host closed the connection, shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    dotenvy::dotenv().ok();

    let config = PluginConfig::from_env()?;
    let params = RegistrationParams::from_args(std::env::args())?;

    if let Err(err) = run(params, config).await {
        tracing::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}
