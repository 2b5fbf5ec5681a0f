use super::{Context, EntityState, Optimistic, Platform, UNIQUE_ID_PREFIX};
use crate::api::Error;
use crate::hub::Hub;
use crate::model::{truthy, IconType};
use serde_json::Value;

pub const SMART_LINK_MODE_ID: &str = "ha_ems_smart_link_mode";

/// Keys the cloud has been seen to report smart link mode under, in lookup order.
const SMART_LINK_KEYS: [&str; 4] = ["linkage", "aiMode", "flag", "smartMode"];

/// A boolean field of the AI settings exposed as a switch.
#[derive(Debug, PartialEq)]
pub struct AiSwitch {
    pub field_key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub translation_key: &'static str,
}

pub const AI_SWITCHES: &[AiSwitch] = &[
    AiSwitch {
        field_key: "basicDisChargeEnable",
        name: "Basic Discharge",
        icon: "mdi:battery-arrow-down-outline",
        translation_key: "basic_discharge",
    },
    AiSwitch {
        field_key: "antiRefluxSet",
        name: "Anti-Reflux (Zero Feed-in)",
        icon: "mdi:transmission-tower-off",
        translation_key: "anti_reflux",
    },
    AiSwitch {
        field_key: "ctEnable",
        name: "CT Clamp Enable",
        icon: "mdi:current-ac",
        translation_key: "ct_enable",
    },
];

pub fn ai_switch_id(switch: &AiSwitch) -> String {
    format!("{}ai_{}", UNIQUE_ID_PREFIX, switch.field_key)
}

pub fn device_switch_id(device_sn: &str) -> String {
    format!("{}device_{}", UNIQUE_ID_PREFIX, device_sn)
}

fn optimistic_bool(ctx: &Context<'_>, unique_id: &str) -> Option<bool> {
    match ctx.optimistic(unique_id) {
        Some(Optimistic::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn on_off(value: Option<bool>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

pub fn states(ctx: &Context<'_>) -> Vec<EntityState> {
    let mut states = Vec::new();
    if ctx.main_control_device_id.is_some() {
        states.push(smart_link_mode(ctx));
        states.extend(AI_SWITCHES.iter().map(|s| ai_switch(ctx, s)));
    }
    if let Some(data) = ctx.slow.data.as_ref() {
        states.extend(
            data.device_list
                .iter()
                .filter(|d| d.icon().is_some())
                .map(|d| device_switch(ctx, &d.device_sn)),
        );
    }
    states
}

fn smart_link_mode(ctx: &Context<'_>) -> EntityState {
    let mut state = EntityState::new(
        SMART_LINK_MODE_ID.to_string(),
        "Smart Link Mode",
        Platform::Switch,
    );
    state.translation_key = Some("smart_link_mode");
    state.icon = Some("mdi:brain");
    state.available = ctx.slow.last_update_success;

    let reported = ctx.ai_settings().and_then(|ai| {
        SMART_LINK_KEYS
            .iter()
            .filter_map(|k| ai.get(*k))
            .find(|v| !v.is_null())
            .map(truthy)
    });
    state.state = on_off(optimistic_bool(ctx, SMART_LINK_MODE_ID).or(reported));
    state
}

fn ai_switch(ctx: &Context<'_>, switch: &AiSwitch) -> EntityState {
    let unique_id = ai_switch_id(switch);
    let ai = ctx.ai_settings();
    let reported = ai
        .and_then(|ai| ai.get(switch.field_key))
        .filter(|v| !v.is_null())
        .map(truthy);

    let mut state = EntityState::new(unique_id, switch.name, Platform::Switch);
    state.translation_key = Some(switch.translation_key);
    state.icon = Some(switch.icon);
    state.available = ctx.slow.last_update_success
        && ai.map_or(false, |ai| ai.contains_key(switch.field_key));
    state.state = on_off(optimistic_bool(ctx, &state.unique_id).or(reported));
    state
}

fn device_switch(ctx: &Context<'_>, device_sn: &str) -> EntityState {
    let device = ctx.slow.data.as_ref().and_then(|d| d.device(device_sn));
    let name = device.map_or(device_sn, |d| d.display_name());

    let mut state = EntityState::new(device_switch_id(device_sn), name, Platform::Switch);
    state.icon = Some(match device.and_then(|d| d.icon()) {
        Some(IconType::Charger) => "mdi:ev-station",
        _ => "mdi:power-socket",
    });
    state.available = ctx.slow.last_update_success;
    state.state = on_off(
        optimistic_bool(ctx, &state.unique_id).or_else(|| device.and_then(|d| d.is_on())),
    );
    if let Some(device) = device {
        state
            .attributes
            .insert("device_sn".to_string(), Value::from(device.device_sn.clone()));
    }
    state
}

pub async fn turn_smart_link_mode(hub: &Hub, on: bool) -> Result<(), Error> {
    let datalog_sn = hub
        .main_control_device_id()
        .await
        .ok_or(Error::NoMainControlDevice)?;
    hub.set_ai_link_mode(&datalog_sn, if on { 1 } else { 0 })
        .await?;
    hub.set_optimistic(SMART_LINK_MODE_ID, Optimistic::Bool(on))
        .await;
    Ok(())
}

/// Show the new state right away and keep it until the cloud confirms; a rejected write drops
/// it again.
pub async fn turn_ai_switch(hub: &Hub, switch: &AiSwitch, on: bool) -> Result<(), Error> {
    let unique_id = ai_switch_id(switch);
    hub.set_optimistic(&unique_id, Optimistic::Bool(on)).await;
    let result = hub
        .write_ai_field(switch.field_key, Value::from(if on { 1 } else { 0 }))
        .await;
    if result.is_err() {
        hub.clear_optimistic(&unique_id).await;
    }
    result
}

pub async fn turn_device(hub: &Hub, device_sn: &str, on: bool) -> Result<(), Error> {
    hub.switch(device_sn, on).await?;
    hub.set_optimistic(&device_switch_id(device_sn), Optimistic::Bool(on))
        .await;
    Ok(())
}
