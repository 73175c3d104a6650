use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use concierge::wiring;
use concierge_core::capability::CapabilityContext;
use concierge_core::ids::RunId;
use concierge_core::messages::CapabilityCall;
use concierge_engine::IntentAnalyzer;
use concierge_peers::PeerServerConfig;

#[derive(Parser)]
#[command(name = "concierge", about = "Travel orchestrator and specialist peer agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the peer agent server.
    Serve {
        /// Overrides `server.port` from settings.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective settings after file and environment layering.
    Config,
    /// Print the intent analysis of a request as JSON.
    Analyze { text: String },
    /// Delegate one request to a peer agent and print the outcome.
    Delegate {
        /// Peer name, e.g. `flight_agent`.
        peer: String,
        /// Request arguments as a JSON object.
        #[arg(long)]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = concierge_settings::load_settings().context("loading settings")?;
    concierge_telemetry::init_telemetry(&wiring::telemetry_config(&settings))?;

    match cli.command {
        Command::Serve { port } => {
            let config = PeerServerConfig {
                port: port.unwrap_or(settings.server.port),
                request_timeout_secs: settings.server.request_timeout_secs,
                thread_ttl_secs: settings.server.thread_ttl_secs,
            };
            let handle = concierge_peers::start(config).await?;
            tracing::info!(port = handle.port, "peer agents ready");

            tokio::signal::ctrl_c()
                .await
                .context("listening for ctrl+c")?;
            tracing::info!("shutting down");
            handle.shutdown();
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Analyze { text } => {
            let analysis = wiring::analyzer().analyze(&text);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Delegate { peer, args } => {
            let arguments: Value = serde_json::from_str(&args).context("--args is not JSON")?;
            let registry = wiring::registry(&settings);
            let capability = format!("delegate_to_{peer}");
            if !registry.contains(&capability) {
                bail!("no delegation capability for peer '{peer}'");
            }

            let call = CapabilityCall::new(capability, arguments);
            let ctx = CapabilityContext {
                run_id: RunId::new(),
                call_id: call.id.clone(),
                cancel: CancellationToken::new(),
            };
            let result = registry.invoke(&call, &ctx).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
