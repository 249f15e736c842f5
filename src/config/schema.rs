//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for (de)serialization from TOML files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct NetConfig {
    /// Process-level settings.
    pub server: ServerConfig,

    /// Byte-stream listener settings.
    pub stream: StreamConfig,

    /// Reliable-message listener settings.
    pub message: MessageConfig,

    /// Task offload pool settings.
    pub task_pool: TaskPoolConfig,

    /// I/O backend selection.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Pid of the process that last opened the game port.
    pub run_pid: Option<u32>,

    /// Host every listener binds to.
    pub bind_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            run_pid: None,
            bind_host: "0.0.0.0".to_string(),
        }
    }
}

/// Byte-stream listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Primary game port.
    pub port: u16,

    /// First auxiliary port (inclusive). A range with start > end is empty.
    pub aux_start_port: u16,

    /// Last auxiliary port (inclusive).
    pub aux_end_port: u16,

    /// Acceptor threads.
    pub acceptor_threads: usize,

    /// Worker threads; 0 means one per host core.
    pub worker_threads: usize,

    /// Maximum concurrently accepted connections per bind (backpressure).
    pub max_connections: usize,

    /// Listen backlog passed to the OS.
    pub backlog: i32,

    /// Decoded frames buffered between a socket reader and its handler.
    pub inbound_queue: usize,

    /// Outbound writes buffered per connection.
    pub outbound_queue: usize,

    /// Largest accepted frame in bytes.
    pub max_frame_length: usize,

    /// Grace period for in-flight work when the groups shut down, in seconds.
    pub shutdown_grace_secs: u64,
}

impl StreamConfig {
    /// Worker thread count with 0 resolved to the host core count.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: 5123,
            aux_start_port: 1,
            aux_end_port: 0,
            acceptor_threads: 4,
            worker_threads: 0,
            max_connections: 10_000,
            backlog: 1024,
            inbound_queue: 64,
            outbound_queue: 64,
            max_frame_length: 50 * 1024 * 1024,
            shutdown_grace_secs: 5,
        }
    }
}

/// Reliable-message listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MessageConfig {
    /// Start the listener from the binary.
    pub enabled: bool,

    /// Listening port.
    pub port: u16,

    /// Endpoint poll interval in milliseconds.
    pub tick_ms: u64,

    /// Initial retransmission timeout in milliseconds.
    pub retransmit_ms: u64,

    /// Retransmissions before a virtual connection is declared dead.
    pub max_retries: u32,

    /// Unacknowledged messages allowed in flight per connection.
    pub window: usize,

    /// Out-of-order messages buffered per connection.
    pub reorder_buffer: usize,

    /// Pending virtual connections waiting for `accept`.
    pub backlog: usize,

    /// Outbound writes buffered per virtual connection.
    pub outbound_queue: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5200,
            tick_ms: 20,
            retransmit_ms: 200,
            max_retries: 10,
            window: 256,
            reorder_buffer: 1024,
            backlog: 128,
            outbound_queue: 64,
        }
    }
}

/// Task offload pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TaskPoolConfig {
    /// Executor threads.
    pub threads: usize,

    /// Tasks queued or running before submission is refused.
    pub queue_capacity: usize,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            threads: 32,
            queue_capacity: 8192,
        }
    }
}

/// I/O backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Use the portable backend even when a native one is available.
    pub force_portable: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
