//! touchlink CLI — drive the discovery-and-session core from a terminal.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio::sync::mpsc;
use touchlink_client::{Config, ManagerCommand, Notification, SessionManager};
use touchlink_discovery::{Candidate, DiscoveryDirectory, MdnsBrowser};
use touchlink_protocol::{PadConnection, QuicTransport};
use touchlink_types::{Heartbeat, HeartbeatDirection, PadMessage, RawContact, CONTROL_TOKEN};

#[derive(Parser)]
#[command(
    name = "touchlink",
    about = "Control a remote touchpad server over the local network",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse for touchpad servers and print candidate changes.
    Discover {
        /// Override the configured service type.
        #[arg(long)]
        service_type: Option<String>,

        /// Stop after this many seconds (default: run until Ctrl-C).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Connect to a server and hold the session until Ctrl-C.
    Connect {
        /// Server address.
        address: IpAddr,

        /// Server port.
        #[arg(short, long)]
        port: u16,

        /// Instance name for the session identity.
        #[arg(long, default_value = "manual")]
        name: String,

        /// Send a short synthetic swipe once the session is active.
        #[arg(long)]
        swipe: bool,
    },

    /// Run a test peer that accepts sessions, answers heartbeats, and logs
    /// touch batches.
    EchoServer {
        /// UDP port to listen on (0 picks an ephemeral one).
        #[arg(short, long, default_value_t = 0)]
        port: u16,

        /// Announce the server over mDNS.
        #[arg(long)]
        announce: bool,

        /// Instance name used for the announcement.
        #[arg(long, default_value = "echo-pad")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = touchlink_client::setup::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Discover {
            service_type,
            timeout,
        } => discover(&config, service_type, timeout).await,
        Commands::Connect {
            address,
            port,
            name,
            swipe,
        } => connect(config, address, port, name, swipe).await,
        Commands::EchoServer {
            port,
            announce,
            name,
        } => echo_server(&config, port, announce, &name).await,
    }
}

async fn discover(
    config: &Config,
    service_type: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let browser = Arc::new(
        MdnsBrowser::new()?.with_resolve_timeout(config.discovery.resolve_timeout()),
    );
    let mut directory = DiscoveryDirectory::new(browser);
    let mut status = directory.status_receiver();

    let ty = service_type.unwrap_or_else(|| config.discovery.service_type.clone());
    directory.start(&ty).await?;
    println!("browsing for {ty} (Ctrl-C to stop)");

    let deadline = timeout.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut known: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                for candidate in snapshot.candidates.values() {
                    if known.insert(candidate.service_name.clone()) {
                        println!(
                            "+ {} at {}:{}",
                            candidate.service_name, candidate.address, candidate.port
                        );
                    }
                }
                known.retain(|name| {
                    let present = snapshot.candidates.contains_key(name);
                    if !present {
                        println!("- {name}");
                    }
                    present
                });
                if let Some(error) = &snapshot.error {
                    println!("search failed: {error}");
                    break;
                }
            }
        }
    }

    directory.stop().await;
    Ok(())
}

async fn connect(
    config: Config,
    address: IpAddr,
    port: u16,
    name: String,
    swipe: bool,
) -> anyhow::Result<()> {
    let browser = Arc::new(MdnsBrowser::new()?);
    let directory = DiscoveryDirectory::new(browser);
    let transport = QuicTransport::client()?;
    let (mut manager, mut notifications) = SessionManager::new(config, transport, directory);
    let commands = manager.command_sender();
    let run = tokio::spawn(async move {
        let _ = manager.run().await;
    });

    let candidate = Candidate {
        service_name: name,
        full_name: String::new(),
        address,
        port,
    };
    commands
        .send(ManagerCommand::SelectDevice(candidate))
        .await?;

    let mut swipe_pending = swipe;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = commands.send(ManagerCommand::Shutdown).await;
                break;
            }
            notification = notifications.recv() => match notification {
                Some(Notification::SessionState { device, state }) => {
                    println!("{device}: {state}");
                    if swipe_pending && state.accepts_touches() {
                        swipe_pending = false;
                        send_swipe(&commands).await;
                    }
                }
                Some(Notification::SessionClosed { device, reason, message }) => {
                    println!("{device}: {message} ({reason})");
                    let _ = commands.send(ManagerCommand::Shutdown).await;
                    break;
                }
                Some(Notification::SearchFailed { reason }) => {
                    println!("search failed: {reason}");
                }
                None => break,
            }
        }
    }

    let _ = run.await;
    Ok(())
}

/// A half-second diagonal swipe, one contact, then lift.
async fn send_swipe(commands: &mpsc::Sender<ManagerCommand>) {
    for step in 0..30i32 {
        let frame = vec![RawContact::new(
            1,
            f64::from(100 + step * 8),
            f64::from(300 + step * 4),
        )];
        let _ = commands.send(ManagerCommand::SubmitTouchFrame(frame)).await;
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
    let _ = commands
        .send(ManagerCommand::SubmitTouchFrame(Vec::new()))
        .await;
}

async fn echo_server(
    config: &Config,
    port: u16,
    announce: bool,
    name: &str,
) -> anyhow::Result<()> {
    let cert = touchlink_certgen::generate_certificate(name)?;
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let transport = QuicTransport::bind(bind, &cert.cert_pem, &cert.key_pem)?;
    let addr = transport.local_addr()?;
    println!("echo server on {addr} ({})", cert.fingerprint);

    let _daemon = if announce {
        Some(announce_service(
            &config.discovery.service_type,
            name,
            addr.port(),
            &cert.fingerprint,
        )?)
    } else {
        None
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = transport.accept() => match accepted {
                Ok(conn) => {
                    tokio::spawn(serve_session(conn));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    transport.close();
    Ok(())
}

async fn serve_session(conn: PadConnection) {
    let remote = conn.remote_address();
    tracing::info!(remote = %remote, "client connected");
    let Ok((mut tx, mut rx)) = conn.accept_session_stream().await else {
        return;
    };

    let mut batches: u64 = 0;
    while let Ok(Some(msg)) = rx.recv::<PadMessage>().await {
        match msg {
            PadMessage::ControlRequest { token, device_name } => {
                if token == CONTROL_TOKEN {
                    tracing::info!(device = %device_name, "control request accepted");
                } else {
                    let _ = tx
                        .send(&PadMessage::Reject {
                            reason: format!("unknown token {token:?}"),
                        })
                        .await;
                }
            }
            PadMessage::Heartbeat(hb) if hb.direction == HeartbeatDirection::Ping => {
                let _ = tx
                    .send(&PadMessage::Heartbeat(Heartbeat::pong_for(&hb, now_ms())))
                    .await;
            }
            PadMessage::Touch(batch) => {
                batches += 1;
                tracing::info!(
                    seq = batch.seq,
                    points = batch.points.len(),
                    total = batches,
                    "touch batch"
                );
            }
            PadMessage::Tune(setting) => tracing::info!(?setting, "tune setting"),
            PadMessage::Bye => {
                tracing::info!(remote = %remote, "client said goodbye");
                break;
            }
            _ => {}
        }
    }
}

fn announce_service(
    service_type: &str,
    name: &str,
    port: u16,
    fingerprint: &str,
) -> anyhow::Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()?;
    let host = format!("{name}.local.");
    let mut properties = HashMap::new();
    properties.insert("fingerprint".to_string(), fingerprint.to_string());
    let info = ServiceInfo::new(service_type, name, &host, "", port, properties)?
        .enable_addr_auto();
    daemon.register(info)?;
    tracing::info!(name, service_type, port, "announced over mdns");
    Ok(daemon)
}

/// Local wall clock in milliseconds for heartbeat observability fields.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
