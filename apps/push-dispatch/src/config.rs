use std::time::Duration;

/// Push-dispatch configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL.
    pub nats_url: String,
    /// JetStream stream holding outbound push records.
    pub queue_stream: String,
    /// Subject the stream captures.
    pub queue_subject: String,
    /// Durable consumer name (one consumer group per dispatcher fleet).
    pub queue_consumer: String,
    /// Registry node base URLs, tried in order.
    pub discovery_nodes: Vec<String>,
    /// Deployment region (informational, logged at startup).
    pub region: String,
    /// Zone used to scope gateway membership.
    pub zone: String,
    /// How long to wait for the first discovery snapshot before starting
    /// with an empty backend set.
    pub startup_timeout: Duration,
    pub room: RoomConfig,
    pub rpc: RpcConfig,
}

/// Per-room aggregation knobs.
#[derive(Debug, Clone, Copy)]
pub struct RoomConfig {
    /// Buffered message count that triggers an immediate flush.
    pub batch: usize,
    /// Interval of the timed flush.
    pub signal: Duration,
    /// Idle duration after which an inactive room is evicted.
    pub idle: Duration,
}

/// Gateway RPC client knobs.
#[derive(Debug, Clone, Copy)]
pub struct RpcConfig {
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
    /// TCP connections kept per gateway endpoint.
    pub pool_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            nats_url: required_var("NATS_URL"),
            queue_stream: var_or("QUEUE_STREAM", "plume-push"),
            queue_subject: var_or("QUEUE_SUBJECT", "plume.push"),
            queue_consumer: var_or("QUEUE_CONSUMER", "push-dispatch"),
            discovery_nodes: required_var("DISCOVERY_NODES")
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            region: var_or("REGION", "default"),
            zone: required_var("ZONE"),
            startup_timeout: millis_or("DISCOVERY_STARTUP_TIMEOUT_MS", 10_000),
            room: RoomConfig {
                batch: parse_or("ROOM_BATCH", 20),
                signal: millis_or("ROOM_SIGNAL_MS", 1_000),
                idle: millis_or("ROOM_IDLE_MS", 15 * 60 * 1_000),
            },
            rpc: RpcConfig {
                dial_timeout: millis_or("RPC_DIAL_TIMEOUT_MS", 1_000),
                call_timeout: millis_or("RPC_CALL_TIMEOUT_MS", 1_000),
                pool_size: parse_or("RPC_POOL_SIZE", 4),
            },
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn millis_or(name: &str, default: u64) -> Duration {
    Duration::from_millis(
        std::env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}
