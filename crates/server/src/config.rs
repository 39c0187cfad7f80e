use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub connection_timeout: Duration,
    pub session_timeout: Duration,
    pub world_half_extent: f32,
    pub status_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_clients: 32,
            connection_timeout: Duration::from_secs(15),
            session_timeout: Duration::from_secs(30),
            world_half_extent: 50.0,
            status_interval: Duration::from_secs(10),
        }
    }
}
