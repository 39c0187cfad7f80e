use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;

use pulse_client::{ClientConfig, ClientEvent, NetworkClient};

const FRAME_RATE: u32 = 60;
const POSITION_SEND_RATE: u32 = 20;

#[derive(Parser)]
#[command(name = "pulse-client")]
#[command(about = "Headless pulse client that joins a server and walks in circles")]
struct Args {
    #[arg(long, help = "Server host (defaults to the config value)")]
    host: Option<String>,

    #[arg(short, long, help = "Server port (defaults to the config value)")]
    port: Option<u16>,

    #[arg(short, long, help = "TOML file with client settings")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "player")]
    username: String,

    #[arg(long, default_value = "#33aaff")]
    color: String,

    #[arg(short, long, default_value_t = 0, help = "Seconds to run, 0 runs until killed")]
    duration: u64,

    #[arg(long, help = "Always use the full handshake when reconnecting")]
    no_session_reconnect: bool,

    #[arg(long, help = "Stay disconnected after the connection drops")]
    no_auto_reconnect: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(host) = args.host.clone() {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.no_session_reconnect {
        config.session_reconnect = false;
    }
    if args.no_auto_reconnect {
        config.auto_reconnect = false;
    }

    let mut client = NetworkClient::new(config)?;
    if !client.connect() {
        log::error!(
            "Could not start connecting to {}:{}",
            client.config().host,
            client.config().port
        );
        return Ok(());
    }

    run(&mut client, &args);

    client.disconnect();
    log::info!(
        "Sent {} packets, received {}, dropped {} malformed",
        client.stats().packets_sent,
        client.stats().packets_received,
        client.stats().malformed_dropped
    );
    Ok(())
}

fn run(client: &mut NetworkClient, args: &Args) {
    let frame = Duration::from_secs_f64(1.0 / FRAME_RATE as f64);
    let send_every = (FRAME_RATE / POSITION_SEND_RATE).max(1) as u64;
    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));

    let mut last = Instant::now();
    let mut frame_index: u64 = 0;
    let mut attempt = 0;

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        let dt = (now - last).as_secs_f32();
        last = now;

        client.tick(now, dt);

        for event in client.drain_events().collect::<Vec<_>>() {
            handle_event(client, event, args, &mut attempt);
        }

        if client.is_connected() {
            let angle = frame_index as f32 / FRAME_RATE as f32;
            let input = Vec3::new(angle.cos(), 0.0, angle.sin());
            let position = client.apply_local_input(input, dt);
            if frame_index % send_every == 0 {
                client.send_position(position, client.predicted_velocity());
            }
        }

        frame_index += 1;
        let elapsed = now.elapsed();
        if elapsed < frame {
            thread::sleep(frame - elapsed);
        }
    }
}

fn handle_event(client: &mut NetworkClient, event: ClientEvent, args: &Args, attempt: &mut u32) {
    match event {
        ClientEvent::UsernamePrompt { message } => {
            log::info!("Server asks: {}", message);
            *attempt = 0;
            client.submit_username(&args.username);
        }
        ClientEvent::UsernameRejected {
            message,
            suggestions,
        } => {
            log::warn!("Username rejected: {}", message);
            *attempt += 1;
            let next = suggestions
                .into_iter()
                .next()
                .unwrap_or_else(|| format!("{}{}", args.username, attempt));
            client.submit_username(&next);
        }
        ClientEvent::Connected {
            private_id,
            public_id,
        } => {
            log::info!("Connected (private {}, public {})", private_id, public_id);
            client.send_lobby_join(&args.color);
        }
        ClientEvent::Disconnected { reason } => log::warn!("Disconnected: {}", reason),
        ClientEvent::StateChanged { from, to } => log::debug!("{:?} -> {:?}", from, to),
        ClientEvent::ServerMessage { message, .. } => log::info!("[server] {}", message),
        ClientEvent::ChatMessage { client_id, message } => {
            log::info!("[{}] {}", client_id, message);
        }
        ClientEvent::LobbyJoined {
            public_id,
            color_hex,
            is_local_player,
            ..
        } => {
            if !is_local_player {
                log::info!("{} joined with color {}", public_id, color_hex);
            }
        }
        ClientEvent::PacketReceived(envelope) => {
            log::trace!("Packet {} ({:?})", envelope.seq, envelope.kind());
        }
    }
}
