//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread counts > 0, queues > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NetConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::IpAddr;

use crate::config::schema::NetConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &NetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_host",
            format!("'{}' is not an IP address", config.server.bind_host),
        ));
    }

    let stream = &config.stream;
    if stream.acceptor_threads == 0 {
        errors.push(ValidationError::new("stream.acceptor_threads", "must be at least 1"));
    }
    if stream.max_connections == 0 {
        errors.push(ValidationError::new("stream.max_connections", "must be at least 1"));
    }
    if stream.backlog <= 0 {
        errors.push(ValidationError::new("stream.backlog", "must be positive"));
    }
    if stream.inbound_queue == 0 {
        errors.push(ValidationError::new("stream.inbound_queue", "must be at least 1"));
    }
    if stream.outbound_queue == 0 {
        errors.push(ValidationError::new("stream.outbound_queue", "must be at least 1"));
    }
    if stream.max_frame_length < 8 {
        errors.push(ValidationError::new("stream.max_frame_length", "must fit a frame header (8 bytes)"));
    }
    if stream.aux_start_port <= stream.aux_end_port
        && (stream.aux_start_port..=stream.aux_end_port).contains(&stream.port)
    {
        errors.push(ValidationError::new(
            "stream.aux_start_port",
            format!("auxiliary range includes the primary port {}", stream.port),
        ));
    }

    let message = &config.message;
    if message.tick_ms == 0 {
        errors.push(ValidationError::new("message.tick_ms", "must be positive"));
    }
    if message.retransmit_ms == 0 {
        errors.push(ValidationError::new("message.retransmit_ms", "must be positive"));
    }
    if message.window == 0 {
        errors.push(ValidationError::new("message.window", "must be at least 1"));
    }
    if message.backlog == 0 {
        errors.push(ValidationError::new("message.backlog", "must be at least 1"));
    }

    if config.task_pool.threads == 0 {
        errors.push(ValidationError::new("task_pool.threads", "must be at least 1"));
    }
    if config.task_pool.queue_capacity == 0 {
        errors.push(ValidationError::new("task_pool.queue_capacity", "must be at least 1"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
