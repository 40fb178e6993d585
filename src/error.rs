use thiserror::Error;

/// Error taxonomy for the preheating engine.
///
/// None of these abort a running zone. Every failure path degrades to the
/// last known good value: missing sensor data deactivates anticipation,
/// a failed actuator command is retried through the normal resend rules,
/// a failed advisor call keeps the previous margin adjustment, and a failed
/// persistence write leaves the in-memory state authoritative.
#[derive(Debug, Error)]
pub enum HeatwiseError {
    #[error("missing data: {0}")]
    MissingData(String),

    #[error("schedule parse error: {0}")]
    ScheduleParse(String),

    #[error("advisor error: {0}")]
    Advisor(String),

    #[error("actuator command error: {0}")]
    ActuatorCommand(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("hub error: {0}")]
    Hub(String),

    #[error("config error: {0}")]
    Config(String),
}
