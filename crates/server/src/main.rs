mod config;
mod events;
mod registry;
mod server;
mod simulation;
mod username;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use events::ServerEvent;
use server::DevServer;

#[derive(Parser)]
#[command(name = "pulse-server")]
#[command(about = "Development server for the pulse protocol")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = pulse::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 15, help = "Seconds of silence before a client is dropped")]
    connection_timeout: u64,

    #[arg(long, default_value_t = 30, help = "Seconds a dropped client can resume its session")]
    session_timeout: u64,

    #[arg(long, default_value_t = 50.0, help = "Half width of the square play area")]
    world_half_extent: f32,

    #[arg(short, long, default_value_t = 0, help = "Seconds to run, 0 runs until killed")]
    duration: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        connection_timeout: Duration::from_secs(args.connection_timeout),
        session_timeout: Duration::from_secs(args.session_timeout),
        world_half_extent: args.world_half_extent,
        ..Default::default()
    };

    let mut server = DevServer::new(&bind_addr, config)?;
    log::info!("Server started on {}", server.local_addr());

    let deadline = run_deadline(args.duration, Instant::now());
    while keep_running(deadline, Instant::now()) {
        server.tick_once();
        for event in server.drain_events() {
            log_event(event);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    log::info!("Server shutting down");
    Ok(())
}

/// `None` runs until the process is killed.
fn run_deadline(duration_secs: u64, start: Instant) -> Option<Instant> {
    (duration_secs > 0).then(|| start + Duration::from_secs(duration_secs))
}

fn keep_running(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_none_or(|d| now < d)
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::debug!("Handshake request from {}", addr);
        }
        ServerEvent::ClientConnected {
            public_id,
            username,
            addr,
        } => {
            log::info!("{} connected from {} as {}", username, addr, public_id);
        }
        ServerEvent::ClientResumed {
            public_id,
            username,
            addr,
        } => {
            log::info!("{} resumed session {} from {}", username, public_id, addr);
        }
        ServerEvent::ClientDisconnected { public_id, reason } => {
            log::info!("Client {} {}", public_id, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::Error { message } => log::error!("{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_duration_runs_indefinitely() {
        let start = Instant::now();
        let deadline = run_deadline(0, start);
        assert_eq!(deadline, None);
        assert!(keep_running(deadline, start + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_duration_stops_the_loop() {
        let start = Instant::now();
        let deadline = run_deadline(5, start);
        assert!(keep_running(deadline, start + Duration::from_secs(4)));
        assert!(!keep_running(deadline, start + Duration::from_secs(5)));
    }
}
