//! Recall Relay CLI - talks to a word-recall experiment server.
//!
//! This is the main binary entry point. See the `recall_relay` library
//! for the core functionality.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use recall_relay::participant::{
    FreeForAllSubmission, MessageSink, RecallDisplay, SubmitsWords, TurnBasedSubmission,
    TurnClock, WordOrigin, WordSender,
};
use recall_relay::relay::{
    kind, Connect, ConnectionState, Dispatch, DispatchOutcome, DispatchTable, Message,
};
use recall_relay::{PubSubSocket, Relay, RelayConfig, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// How long to wait for the first handshake before giving up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

// CLI
#[derive(Parser)]
#[command(name = "recall-relay")]
#[command(version)]
#[command(about = "Channel-multiplexed websocket relay client for word-recall experiments")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Config file (defaults to relay.json in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Experiment server URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Channel to listen on
    #[arg(long, global = true)]
    broadcast: Option<String>,

    /// Channel to write to
    #[arg(long, global = true)]
    control: Option<String>,

    /// Lag tolerance advertised to the server
    #[arg(long, global = true)]
    tolerance: Option<f64>,
}

impl ConnectionArgs {
    /// File, then environment, then flags.
    fn load_config(&self) -> Result<RelayConfig> {
        let mut config = RelayConfig::load(self.config.as_deref())?;
        if let Some(server_url) = &self.server_url {
            config.server_url.clone_from(server_url);
        }
        if let Some(broadcast) = &self.broadcast {
            config.broadcast.clone_from(broadcast);
        }
        if let Some(control) = &self.control {
            config.control.clone_from(control);
        }
        if let Some(tolerance) = self.tolerance {
            config.lag_tolerance = tolerance;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect as a participant and print every message received
    Listen {
        /// Participant id announced with `connect`
        #[arg(long)]
        player_id: String,
    },
    /// Send a single message and exit
    Send {
        /// Message type
        #[arg(long = "type")]
        kind: String,

        /// Payload fields as a JSON object
        #[arg(long, default_value = "{}")]
        json: String,

        /// Send on the broadcast channel instead of the control channel
        #[arg(long)]
        broadcast: bool,
    },
    /// Join a game, reading words from stdin
    Play {
        /// Participant id
        #[arg(long)]
        player_id: String,

        /// Everyone may submit at any time; no turns
        #[arg(long)]
        free_for_all: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Prints each inbound message as one JSON line.
struct PrintMessages;

impl Dispatch for PrintMessages {
    fn dispatch(&mut self, message: &Message) -> DispatchOutcome {
        match serde_json::to_string(message) {
            Ok(json) => println!("{}", json),
            Err(e) => log::warn!("[Relay] Could not print '{}': {}", message.kind, e),
        }
        DispatchOutcome::Delivered(1)
    }
}

/// Log reconnects and other state changes until the relay goes away.
fn spawn_state_logger(mut state: watch::Receiver<ConnectionState>) {
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            match current {
                ConnectionState::Reconnecting {
                    attempt,
                    next_retry_ms,
                } => log::warn!(
                    "[Relay] Connection lost, retry {} in {}ms",
                    attempt,
                    next_retry_ms
                ),
                other => log::info!("[Relay] Connection state: {:?}", other),
            }
        }
    });
}

async fn run_listen(config: &RelayConfig, player_id: String) -> Result<()> {
    let relay = Relay::connect(&config.to_settings(), PrintMessages);
    spawn_state_logger(relay.watch_state());

    relay
        .open_timeout(OPEN_TIMEOUT)
        .await
        .context("Relay did not open")?;
    relay.send(&Connect { player_id })?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("[Relay] Interrupted, closing");
    relay.close_gracefully().await;
    Ok(())
}

async fn run_send(config: &RelayConfig, kind: String, json: &str, broadcast: bool) -> Result<()> {
    let mut payload: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(json).context("--json must be a JSON object")?;
    payload.shift_remove("type");
    let mut message = Message::new(kind);
    message.payload = payload;

    let relay = Relay::connect(&config.to_settings(), DispatchTable::new());
    relay
        .open_timeout(OPEN_TIMEOUT)
        .await
        .context("Relay did not open")?;
    if broadcast {
        relay.broadcast(&message)?;
    } else {
        relay.send(&message)?;
    }
    relay.close_gracefully().await;
    Ok(())
}

async fn run_play(config: &RelayConfig, player_id: String, free_for_all: bool) -> Result<()> {
    let socket = Arc::new(PubSubSocket::connect(&config.to_settings()));
    spawn_state_logger(socket.relay().watch_state());
    let session = Session::new(player_id.clone()).shared();

    let clock = Arc::new(TurnClock::new(player_id.clone(), |remaining| {
        if remaining == 0 {
            println!("Time's up.");
        } else {
            println!("{} seconds remaining...", remaining);
        }
    }));
    clock.bind_events(socket.registry());
    // Registered after the clock, so the indicator is already updated.
    socket.subscribe_with(kind::CHANGE_OF_TURN, &clock, |clock, _| {
        println!("{}", clock.indicator());
    });

    let display = Arc::new(RecallDisplay::new(session.clone(), |entry| {
        match &entry.origin {
            WordOrigin::Mine => println!("  {} (you)", entry.word),
            WordOrigin::Peer(author) => println!("  {} (from {})", entry.word, author),
        }
    }));
    display.bind_events(socket.registry());

    let sender = WordSender::new(session.clone(), Arc::clone(&socket) as Arc<dyn MessageSink>);
    let submission: Arc<dyn SubmitsWords> = if free_for_all {
        Arc::new(FreeForAllSubmission::new(sender))
    } else {
        Arc::new(TurnBasedSubmission::new(sender))
    };
    Arc::clone(&submission).bind_events(socket.registry());

    socket
        .open_timeout(OPEN_TIMEOUT)
        .await
        .context("Relay did not open")?;
    socket.send(&Connect {
        player_id: player_id.clone(),
    })?;
    println!("Type a word and press Enter. ':skip' passes your turn, ':quit' leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    ":quit" => break,
                    ":skip" => {
                        if !submission.skip_turn() {
                            println!("You can only pass on your own turn.");
                        }
                    }
                    raw => {
                        if submission.submit(raw).is_some() {
                            log::debug!("[Play] Submitted '{}'", raw);
                        } else if submission.is_enabled() {
                            println!("'{}' was not accepted.", raw);
                        } else {
                            println!("Wait for your turn.");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    submission.leave();
    clock.stop();
    socket.close_gracefully().await;

    let words = session.lock().words.retrieve();
    println!("{} recalled {} word(s): {}", player_id, words.len(), words.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.connection.load_config()?;

    match cli.command {
        Commands::Listen { player_id } => run_listen(&config, player_id).await?,
        Commands::Send {
            kind,
            json,
            broadcast,
        } => run_send(&config, kind, &json, broadcast).await?,
        Commands::Play {
            player_id,
            free_for_all,
        } => run_play(&config, player_id, free_for_all).await?,
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = match cli.connection.config {
                    Some(path) => path,
                    None => RelayConfig::default_path()?,
                };
                config.save(&path)?;
                println!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}
