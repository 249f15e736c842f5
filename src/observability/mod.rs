//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`port`, `connection`, `backend`) instead of formatted strings
//! - Metric updates are no-ops until a recorder is installed, so the library
//!   never requires the exporter

pub mod logging;
pub mod metrics;
