//! Zone task runtime.
//!
//! One tokio task per zone. The task body is a `select!` over the fixed
//! tick, the next daily advisor slot and the command channel, so the
//! control loop is naturally serialized: a cycle always runs to completion
//! before the next trigger is processed, and a trigger arriving mid-cycle
//! waits instead of stacking. Zones share nothing with each other.

use chrono::{Days, Local, NaiveDateTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::advisor::{AdvisorContext, WeatherReport};
use crate::config::ZoneConfig;
use crate::error::HeatwiseError;
use crate::hub::HubClient;
use crate::schedule::ScheduleSnapshot;

use super::{CycleInputs, ZoneCoordinator, ADVISOR_SLOTS, SCAN_INTERVAL};

/// Operational triggers accepted by a running zone.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneCommand {
    /// Call the advisor now with the given context slot.
    ForceAdvisorCall(AdvisorContext),
    /// Clear the thermal model history.
    ResetSessions,
    /// Run a control cycle immediately.
    Recalculate,
    SetEnabled(bool),
    SetAdvisorEnabled(bool),
    /// Base safety margin as a multiplier (e.g. 1.15).
    SetBaseMargin(f64),
    SetWarmupIgnore(f64),
    /// Final persistence flush, then the task exits.
    Shutdown,
}

/// Handle to a spawned zone: the command sender plus the task itself.
/// Dropping the sender (or sending `Shutdown`) ends the task after a final
/// persistence flush.
pub struct ZoneHandle {
    name: String,
    tx: mpsc::Sender<ZoneCommand>,
    task: JoinHandle<()>,
}

impl ZoneHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, command: ZoneCommand) -> Result<(), HeatwiseError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| HeatwiseError::MissingData(format!("zone '{}' is gone", self.name)))
    }

    /// Request shutdown and wait for the final flush.
    pub async fn shutdown(self) {
        let _ = self.tx.send(ZoneCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("[{}] zone task panicked: {e}", self.name);
        }
    }
}

/// Spawn the control loop for one zone.
pub fn spawn_zone(coordinator: ZoneCoordinator, hub: HubClient) -> ZoneHandle {
    let (tx, rx) = mpsc::channel(16);
    let name = coordinator.name().to_string();
    info!("[{}] zone task starting", name);
    let task = tokio::spawn(run_zone(coordinator, hub, rx));
    ZoneHandle { name, tx, task }
}

async fn run_zone(
    mut coordinator: ZoneCoordinator,
    hub: HubClient,
    mut rx: mpsc::Receiver<ZoneCommand>,
) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let now = Local::now().naive_local();
        let (slot_at, slot_context) = next_advisor_slot(now);
        let slot_wait = (slot_at - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = ticker.tick() => {
                run_one_cycle(&mut coordinator, &hub).await;
            }
            _ = tokio::time::sleep(slot_wait) => {
                let inputs = fetch_inputs(&hub, coordinator.config()).await;
                if coordinator.refresh_advice(slot_context, &inputs).await {
                    persist(&coordinator);
                    run_one_cycle(&mut coordinator, &hub).await;
                }
            }
            command = rx.recv() => {
                match command {
                    None | Some(ZoneCommand::Shutdown) => {
                        persist(&coordinator);
                        info!("[{}] zone task stopped", coordinator.name());
                        break;
                    }
                    Some(command) => {
                        handle_command(&mut coordinator, &hub, command).await;
                    }
                }
            }
        }
    }
}

async fn handle_command(coordinator: &mut ZoneCoordinator, hub: &HubClient, command: ZoneCommand) {
    match command {
        ZoneCommand::ForceAdvisorCall(context) => {
            let inputs = fetch_inputs(hub, coordinator.config()).await;
            if coordinator.refresh_advice(context, &inputs).await {
                persist(coordinator);
                run_one_cycle(coordinator, hub).await;
            }
        }
        ZoneCommand::ResetSessions => {
            coordinator.reset_sessions();
            persist(coordinator);
            run_one_cycle(coordinator, hub).await;
        }
        ZoneCommand::Recalculate => {
            run_one_cycle(coordinator, hub).await;
        }
        ZoneCommand::SetEnabled(enabled) => {
            coordinator.set_enabled(enabled);
        }
        ZoneCommand::SetAdvisorEnabled(enabled) => {
            coordinator.set_advisor_enabled(enabled);
        }
        ZoneCommand::SetBaseMargin(margin) => {
            coordinator.set_base_margin(margin);
            run_one_cycle(coordinator, hub).await;
        }
        ZoneCommand::SetWarmupIgnore(minutes) => {
            coordinator.set_warmup_ignore(minutes);
        }
        ZoneCommand::Shutdown => {}
    }
}

/// One full control cycle: snapshot inputs, evaluate, deliver the command,
/// persist if needed. A failed command send is logged and not reported to
/// the engine, which retries through its normal resend rules next cycle.
async fn run_one_cycle(coordinator: &mut ZoneCoordinator, hub: &HubClient) {
    let inputs = if coordinator.enabled() {
        fetch_inputs(hub, coordinator.config()).await
    } else {
        CycleInputs::default()
    };

    let now = Local::now().naive_local();
    let outcome = coordinator.run_cycle(&inputs, now);

    if let Some(command) = outcome.command {
        let climate_entity = coordinator.config().climate_entity.clone();
        match hub
            .set_target_temperature(&climate_entity, command.temperature)
            .await
        {
            Ok(()) => {
                info!(
                    "[{}] setpoint {:.1}C sent to {}",
                    coordinator.name(),
                    command.temperature,
                    climate_entity,
                );
                coordinator.note_command_sent(command, Local::now().naive_local());
            }
            Err(e) => {
                error!("[{}] {e}", coordinator.name());
            }
        }
    }

    if outcome.persist {
        persist(coordinator);
    }
}

fn persist(coordinator: &ZoneCoordinator) {
    if let Err(e) = coordinator.save() {
        error!("[{}] {e}", coordinator.name());
    }
}

/// Snapshot every hub entity the cycle needs. Read failures degrade to
/// absent values; the cycle continues with reduced functionality.
async fn fetch_inputs(hub: &HubClient, config: &ZoneConfig) -> CycleInputs {
    let temp_indoor = read_numeric(hub, &config.indoor_sensor).await;
    let temp_outdoor = read_numeric(hub, &config.outdoor_sensor).await;

    let climate = match hub.entity_state(&config.climate_entity).await {
        Ok(entity) => Some(entity),
        Err(e) => {
            warn!("[{}] {e}", config.name);
            None
        }
    };
    let hvac_action = climate
        .as_ref()
        .and_then(|e| e.attr_str(&["hvac_action"]))
        .map(String::from);
    let reported_setpoint = climate.as_ref().and_then(|e| e.attr_f64(&["temperature"]));

    let schedule = match &config.schedule_entity {
        Some(entity_id) => match hub.entity_state(entity_id).await {
            Ok(entity) => Some(ScheduleSnapshot::from_parts(&entity.state, &entity.attributes)),
            Err(e) => {
                warn!("[{}] {e}", config.name);
                None
            }
        },
        None => None,
    };

    let weather = match &config.weather_entity {
        Some(entity_id) => match hub.entity_state(entity_id).await {
            Ok(entity) => {
                let temperature = entity.attr_f64(&["temperature"]);
                let forecast = entity
                    .attr(&["forecast"])
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                WeatherReport {
                    current: Some(entity.state),
                    temperature,
                    forecast,
                }
            }
            Err(e) => {
                warn!("[{}] {e}", config.name);
                WeatherReport::default()
            }
        },
        None => WeatherReport::default(),
    };

    CycleInputs {
        temp_indoor,
        temp_outdoor,
        hvac_action,
        reported_setpoint,
        schedule,
        weather,
    }
}

async fn read_numeric(hub: &HubClient, entity_id: &str) -> Option<f64> {
    match hub.numeric_state(entity_id).await {
        Ok(value) => value,
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}

/// Next upcoming advisor slot after `now`.
fn next_advisor_slot(now: NaiveDateTime) -> (NaiveDateTime, AdvisorContext) {
    for (hour, context) in ADVISOR_SLOTS {
        if let Some(at) = now.date().and_hms_opt(hour, 0, 0) {
            if at > now {
                return (at, context);
            }
        }
    }
    let tomorrow = now
        .date()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| now.date());
    let (hour, context) = ADVISOR_SLOTS[0];
    (tomorrow.and_hms_opt(hour, 0, 0).unwrap_or(now), context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date_time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(date_time, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_next_advisor_slot_morning() {
        let (slot, context) = next_advisor_slot(at("2026-01-05 07:00"));
        assert_eq!(slot, at("2026-01-05 09:00"));
        assert_eq!(context, AdvisorContext::Morning);
    }

    #[test]
    fn test_next_advisor_slot_evening() {
        let (slot, context) = next_advisor_slot(at("2026-01-05 10:30"));
        assert_eq!(slot, at("2026-01-05 16:00"));
        assert_eq!(context, AdvisorContext::Evening);
    }

    #[test]
    fn test_next_advisor_slot_wraps_to_tomorrow() {
        let (slot, context) = next_advisor_slot(at("2026-01-05 20:00"));
        assert_eq!(slot, at("2026-01-06 09:00"));
        assert_eq!(context, AdvisorContext::Morning);
    }
}
