//! # Courier
//!
//! Terminal client for the Courier realtime backend.
//!
//! ## Usage
//!
//! ```bash
//! # Chat as customer 1, opening conversation 42
//! courier chat --user 1 --conversation 42
//!
//! # Drive as driver 7, reporting a fixed position
//! courier drive --user 7 --lat 10.77 --lon 106.70
//!
//! # Point at another backend
//! COURIER__SERVER_URL=https://api.example.com courier chat --user 1
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_client::{metrics, ChatSession, ClientConfig, DriverTracker, FixedLocation};
use courier_core::SessionStore;
use courier_protocol::{
    ChatEvent, ChatEventKind, ConversationId, Location, Role, TrackingEvent, TrackingEventKind,
    UserId,
};
use courier_transport::WebSocketConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "courier", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the configuration
    #[arg(short, long)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat from the terminal; lines read from stdin are sent
    Chat {
        /// Authenticated user id
        #[arg(short, long)]
        user: UserId,
        /// Role announced to the backend
        #[arg(short, long, default_value = "customer")]
        role: Role,
        /// Conversation to open on start
        #[arg(long)]
        conversation: Option<ConversationId>,
    },
    /// Go online as a driver and answer order requests
    Drive {
        /// Authenticated driver id
        #[arg(short, long)]
        user: UserId,
        /// Latitude to report
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        /// Longitude to report
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_layered(Some(path.as_path()))?,
        None => ClientConfig::load()?,
    };
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    tracing::info!("Using backend {}", config.server_url);

    match cli.command {
        Commands::Chat {
            user,
            role,
            conversation,
        } => run_chat(&config, user, role, conversation).await,
        Commands::Drive { user, lat, lon } => {
            let location = lat.zip(lon).map(|(lat, lon)| Location::new(lat, lon));
            run_drive(&config, user, location).await
        }
    }
}

async fn run_chat(
    config: &ClientConfig,
    user: UserId,
    role: Role,
    conversation: Option<ConversationId>,
) -> Result<()> {
    let session = ChatSession::new(config, user, role, Arc::new(WebSocketConnector::default()))?;
    let channel = session.channel();

    channel.observe(ChatEventKind::ConversationsLoaded, |event, _| {
        if let ChatEvent::ConversationsLoaded { conversations } = event {
            for conv in conversations {
                println!(
                    "#{} ({} unread) {}",
                    conv.id,
                    conv.unread_count,
                    conv.last_message_text.as_deref().unwrap_or("")
                );
            }
        }
    });
    channel.observe(ChatEventKind::NewMessage, |event, _| {
        if let ChatEvent::NewMessage { message } = event {
            println!(
                "[{}] #{} <{}> {}",
                message.created_at.format("%H:%M"),
                message.conversation_id,
                message.sender_id,
                message.message
            );
        }
    });
    channel.observe(ChatEventKind::MessagesLoaded, |event, _| {
        if let ChatEvent::MessagesLoaded { messages, .. } = event {
            for message in messages {
                println!("  <{}> {}", message.sender_id, message.message);
            }
        }
    });
    channel.observe(ChatEventKind::Error, |event, _| {
        if let ChatEvent::Error { message } = event {
            eprintln!("error: {message}");
        }
    });

    session
        .connect()
        .await
        .context("Failed to connect to the conversation namespace")?;

    if let Some(conversation_id) = conversation {
        session.join_conversation(conversation_id);
        session.load_messages(conversation_id, config.chat.history_page_size, 0);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = session.watch_state();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();

                if line == "/quit" {
                    break;
                } else if line == "/list" {
                    session.request_conversations();
                } else if let Some(id) = line.strip_prefix("/join ") {
                    match id.trim().parse() {
                        Ok(conversation_id) => {
                            session.join_conversation(conversation_id);
                            let limit = config.chat.history_page_size;
                            session.load_messages(conversation_id, limit, 0);
                        }
                        Err(_) => eprintln!("usage: /join <conversation id>"),
                    }
                } else if let Some(id) = line.strip_prefix("/start ") {
                    match id.trim().parse() {
                        Ok(other_user_id) => session.start_conversation(other_user_id),
                        Err(_) => eprintln!("usage: /start <user id>"),
                    }
                } else if !line.is_empty() {
                    match session.read(|s| s.active_conversation()) {
                        Some(conversation_id) => {
                            session.send_message(conversation_id, line);
                        }
                        None => eprintln!("join a conversation first: /join <id>"),
                    }
                }
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("-- {state}");
                if let Some(error) = session.read(|s| s.error().map(str::to_string)) {
                    eprintln!("-- {error}");
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.dispose().await;
    Ok(())
}

async fn run_drive(config: &ClientConfig, user: UserId, location: Option<Location>) -> Result<()> {
    let tracker = DriverTracker::new(
        config,
        user,
        Role::Driver,
        Arc::new(WebSocketConnector::default()),
    )?;

    tracker
        .channel()
        .observe(TrackingEventKind::NewOrderRequest, |event, _| {
            if let TrackingEvent::NewOrderRequest { request } = event {
                println!(
                    "order #{}: {} -> {} (fee {:.2}, {}s to answer)",
                    request.order_id,
                    request.pickup_address,
                    request.delivery_address,
                    request.delivery_fee,
                    request.expires_in_seconds.unwrap_or(30)
                );
            }
        });
    tracker
        .channel()
        .observe(TrackingEventKind::OrderAccepted, |event, _| {
            if let TrackingEvent::OrderAccepted { order_id } = event {
                println!("order #{order_id} assigned");
            }
        });

    tracker
        .connect()
        .await
        .context("Failed to connect to the tracking namespace")?;
    tracker.go_online();

    if let Some(location) = location {
        tracker.start_location_updates(Arc::new(FixedLocation(location)));
    }

    println!("online; commands: a(ccept), r(eject), s(tatus), q(uit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let current = tracker.current_request();

                match (line.trim(), current) {
                    ("q", _) => break,
                    ("a", Some((request, _))) => {
                        tracker.accept_order(request.order_id);
                    }
                    ("r", Some((request, _))) => {
                        tracker.reject_order(request.order_id);
                    }
                    ("s", Some((request, secs))) => {
                        println!("order #{} waiting, {secs}s left", request.order_id);
                    }
                    ("a" | "r" | "s", None) => println!("no pending request"),
                    _ => {}
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracker.go_offline();
    tracker.dispose().await;
    Ok(())
}
