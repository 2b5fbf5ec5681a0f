use super::{Context, EntityState, Optimistic, Platform};
use crate::api::Error;
use crate::hub::Hub;
use crate::model::EnergyMode;
use serde_json::Value;

pub const ENERGY_MODE_ID: &str = "ha_ems_energy_mode";

const MODE_KEYS: [&str; 3] = ["energyMode", "mode", "workMode"];

pub fn options() -> Vec<&'static str> {
    EnergyMode::ALL.iter().map(|m| m.label()).collect()
}

/// Mode reported by the cloud. The first key present decides, even when its value is unknown.
fn reported(ctx: &Context<'_>) -> Option<EnergyMode> {
    let ai = ctx.ai_settings()?;
    let value = MODE_KEYS
        .iter()
        .filter_map(|k| ai.get(*k))
        .find(|v| !v.is_null())?;
    EnergyMode::from_value(value)
}

pub fn state(ctx: &Context<'_>) -> EntityState {
    let mut state = EntityState::new(ENERGY_MODE_ID.to_string(), "Energy Mode", Platform::Select);
    state.translation_key = Some("energy_mode");
    state.icon = Some("mdi:lightning-bolt-circle");
    state.available = ctx.slow.last_update_success;

    state.state = match ctx.optimistic(ENERGY_MODE_ID) {
        Some(Optimistic::Option(option)) => Value::from(option.clone()),
        _ => reported(ctx)
            .map(|m| Value::from(m.label()))
            .unwrap_or(Value::Null),
    };
    state
        .attributes
        .insert("options".to_string(), Value::from(options()));
    state
}

pub async fn select_option(hub: &Hub, option: &str) -> Result<(), Error> {
    let mode = EnergyMode::from_label(option).ok_or_else(|| {
        log::warn!("Unknown energy mode option: {}", option);
        Error::InvalidRequest(format!("unknown energy mode option: {}", option))
    })?;
    hub.write_ai_field("energyMode", Value::from(mode as u8))
        .await?;
    hub.set_optimistic(ENERGY_MODE_ID, Optimistic::Option(option.to_string()))
        .await;
    hub.refresh_slow().await;
    Ok(())
}
