//! Predictive preheating for scheduled heating zones.
//!
//! Learns each zone's thermal inertia from observed heating sessions,
//! resolves the next scheduled setpoint increase, and raises the setpoint
//! early enough that the zone reaches its target on time. Arrival accuracy
//! feeds back into the safety margin; an optional advisor contributes a
//! bounded adjustment from weather context.

pub mod advisor;
pub mod anticipation;
pub mod config;
pub mod error;
pub mod feedback;
pub mod hub;
pub mod schedule;
pub mod thermal;
pub mod zone;

pub use error::HeatwiseError;

/// Initialize tracing with the `RUST_LOG` filter, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
