//! Dispatches one message through a locally configured agent.
//!
//! ```text
//! cargo run -p basic-dispatch -- --api-key demo-key "What is the weather in Oslo?"
//! cargo run -p basic-dispatch -- --stream "Tell me a story"
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agent_runtime::adapters::echo::EchoModel;
use agent_runtime::config;
use agent_runtime::kernel::{AppContext, CapabilityContext, Dispatcher, ManifestProvider};
use agent_runtime::policy::{Credentials, with_auth};
use agent_runtime::primitives::{Capability, CapabilityError, CapabilityId, PluginManifest, Task};
use agent_runtime::telemetry::{TelemetryConfig, init_tracing};
use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Send one message through the capability dispatcher")]
struct Args {
    /// Agent configuration file.
    #[arg(long, default_value = "demos/basic-dispatch/agent.yml")]
    config: PathBuf,
    /// API key to authenticate with; omitted means unauthenticated.
    #[arg(long)]
    api_key: Option<String>,
    /// Print the reply as it is generated.
    #[arg(long)]
    stream: bool,
    /// Conversation to continue.
    #[arg(long, default_value = "demo-conversation")]
    conversation: String,
    /// Message to send.
    message: String,
}

fn city(context: &CapabilityContext) -> String {
    context
        .arguments()
        .get("city")
        .and_then(Value::as_str)
        .unwrap_or("your area")
        .to_owned()
}

fn weather_plugin() -> Result<ManifestProvider> {
    let forecast = Capability::builder(CapabilityId::new("forecast")?)
        .name("Forecast")?
        .description("Forecast for a city")
        .build()?;
    let alerts = Capability::builder(CapabilityId::new("alerts")?)
        .name("Alerts")?
        .description("Active weather alerts for a city")
        .build()?;
    let manifest = PluginManifest::builder("weather")
        .name("Weather")
        .version("1.0.0")
        .capability(forecast)
        .capability(alerts)
        .build()?;

    Ok(ManifestProvider::new(manifest)
        .with_executor("forecast", |context: CapabilityContext| async move {
            let city = city(&context);
            Ok::<_, CapabilityError>(format!("Clear skies expected in {city}"))
        })
        .with_executor("alerts", |context: CapabilityContext| async move {
            let city = city(&context);
            Ok::<_, CapabilityError>(format!("No active alerts for {city}"))
        }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_tracing(&TelemetryConfig::from_parts(
        config.logging.level.clone(),
        &config.logging.format,
    )?)?;

    let app = AppContext::builder(config)
        .provider(Arc::new(weather_plugin()?))
        .build()
        .await?;
    info!(capabilities = ?app.capabilities().list(), "agent ready");

    let app = Arc::new(app);
    let dispatcher = Dispatcher::new(Arc::clone(&app), Arc::new(EchoModel::new()))?;
    let task = Task::from_user_text(args.message).with_context_id(args.conversation);

    let auth = match args.api_key {
        Some(key) => {
            let auth = app.authenticate(&Credentials::ApiKey(key)).await?;
            info!(user_id = auth.user_id(), "authenticated");
            let forecast = app.capabilities().execute("forecast", &task);
            let forecast = with_auth(auth.clone(), forecast).await?;
            info!(%forecast, "direct capability call");
            Some(auth)
        }
        None => None,
    };

    if args.stream {
        let turn = dispatcher.process_task_stream(task);
        let mut chunks = match auth {
            Some(auth) => with_auth(auth, turn).await,
            None => turn.await,
        };
        let mut stdout = std::io::stdout();
        while let Some(chunk) = chunks.next().await {
            write!(stdout, "{chunk}")?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let turn = dispatcher.process_task(task);
        let reply = match auth {
            Some(auth) => with_auth(auth, turn).await,
            None => turn.await,
        };
        println!("{reply}");
    }

    app.reset().await;
    Ok(())
}
