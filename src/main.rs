use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use webrtc_kit::KitConfig;
use webrtc_kit::WebRtcKit;
use webrtc_kit::call::{CallState, CallUiEvent, CallViewModel};
use webrtc_kit::signaling::{SignalingRepository, TransportSignalingRepository};
use webrtc_kit::turn::{SharedSecretTurnCredentialService, TurnCredentialService};
use webrtc_kit_tokio_transport::TokioWebSocketTransportFactory;
use webrtc_kit_ureq_http_client::UreqHttpClient;

// Demo of a one-to-one call over a WebSocket signaling server.
//
// Usage:
//   cargo run -- --user alice call bob                 # place a call
//   cargo run -- --user bob answer                     # answer the next call
//   cargo run -- credentials bob --secret s3cret       # mint TURN REST credentials
//   cargo run -- credentials bob                       # fetch them from the TURN API

#[derive(Parser)]
#[command(name = "webrtc-kit", version = webrtc_kit::VERSION_STRING, about = "WebRTCKit call demo")]
struct Cli {
    /// Local user id
    #[arg(short, long, env = "WEBRTCKIT_USER_ID")]
    user: Option<String>,

    /// JSON config file; environment variables apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, env = "SIGNALING_URL")]
    signaling_url: Option<String>,

    #[arg(long, env = "TURN_API_URL")]
    turn_api_url: Option<String>,

    /// Retry dropped connections instead of ending the call.
    #[arg(long)]
    auto_reconnect: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call another user.
    Call { target: String },
    /// Wait for an incoming call and answer it.
    Answer,
    /// Print TURN credentials for a user.
    Credentials {
        user: String,
        /// Shared secret of the TURN server; fetches from the TURN API when
        /// absent.
        #[arg(long, env = "TURN_SHARED_SECRET")]
        secret: Option<String>,
        #[arg(long, default_value = "localhost")]
        server: String,
        #[arg(long, default_value_t = 3478)]
        port: u16,
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    if let Err(e) = rt.block_on(run(cli)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<KitConfig> {
    let mut config = match &cli.config {
        Some(path) => KitConfig::from_json_file(path)?,
        None => KitConfig::from_env(),
    };
    if let Some(user) = &cli.user {
        config.user_id = user.clone();
    }
    if let Some(url) = &cli.signaling_url {
        config.signaling_url = url.clone();
    }
    if let Some(url) = &cli.turn_api_url {
        config.turn_api_url = url.clone();
    }
    config.auto_reconnect |= cli.auto_reconnect;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    if let Command::Credentials {
        user,
        secret,
        server,
        port,
        ttl,
    } = &cli.command
    {
        let credential = match secret {
            Some(secret) => {
                SharedSecretTurnCredentialService::new(secret.clone(), server.clone(), *port)?
                    .with_ttl(*ttl)
                    .get_credentials(user)
                    .await?
            }
            None => {
                let kit = WebRtcKit::builder()
                    .with_config(config)
                    .with_signaling(Arc::new(
                        webrtc_kit::signaling::MemorySignalingStore::new().repository(),
                    ))
                    .with_http_client(UreqHttpClient::new())
                    .build()?;
                kit.credentials().get_credentials(user).await?
            }
        };
        println!("{}", serde_json::to_string_pretty(&credential)?);
        return Ok(());
    }

    info!("Connecting to signaling server at {}", config.signaling_url);
    let factory = TokioWebSocketTransportFactory::new(config.signaling_url.clone());
    let transport = TransportSignalingRepository::connect(&factory).await?;
    let signaling: Arc<dyn SignalingRepository> = transport.clone();

    let kit = WebRtcKit::builder()
        .with_config(config)
        .with_signaling(signaling)
        .with_http_client(UreqHttpClient::new())
        .build()?;
    let vm = kit.view_model();

    match cli.command {
        Command::Call { target } => {
            vm.on_event(CallUiEvent::StartCall(target)).await;
        }
        Command::Answer => {
            let mut incoming = vm.watch_incoming_calls().await?;
            info!("Waiting for a call to {}", vm.user_id());
            let Some(offer) = incoming.recv().await else {
                warn!("Signaling closed before a call arrived");
                return Ok(());
            };
            info!("Incoming call from {}", offer.caller_id);
            vm.on_event(CallUiEvent::AnswerCall(offer)).await;
        }
        Command::Credentials { .. } => {}
    }

    follow_call(&vm).await;
    kit.shutdown().await;
    transport.disconnect().await;
    Ok(())
}

/// Prints state changes until the call is over; Ctrl-C hangs up.
async fn follow_call(vm: &CallViewModel) {
    let mut states = vm.subscribe();
    let mut last = states.borrow().call.clone();
    info!("Call state: {last:?}");
    if last.is_terminal() {
        return;
    }

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.call != last {
                    info!("Call state: {:?}", state.call);
                    last = state.call.clone();
                }
                if last.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                vm.on_event(CallUiEvent::EndCall).await;
                let state = vm.state();
                info!(
                    "Call state: {:?} after {}",
                    state.call,
                    state.controls.formatted_duration()
                );
                break;
            }
        }
    }

    if let CallState::Error(message) = &last {
        error!("Call failed: {message}");
    }
}
