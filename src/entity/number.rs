use super::{Context, DeviceClass, EntityState, Optimistic, Platform, PERCENTAGE, UNIQUE_ID_PREFIX, WATT};
use crate::api::Error;
use crate::hub::Hub;
use serde_json::Value;

/// A numeric AI setting, written back with read-modify-write.
#[derive(Debug, PartialEq)]
pub struct AiNumber {
    pub field_key: &'static str,
    pub translation_key: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub device_class: Option<DeviceClass>,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub icon: &'static str,
}

pub const AI_NUMBERS: &[AiNumber] = &[
    AiNumber {
        field_key: "maxChargePower",
        translation_key: "max_charge_power",
        name: "Max Charge Power",
        unit: WATT,
        device_class: Some(DeviceClass::Power),
        min: 10.0,
        max: 2400.0,
        step: 10.0,
        icon: "mdi:battery-arrow-up",
    },
    AiNumber {
        field_key: "maxFeedPower",
        translation_key: "max_feed_power",
        name: "Max Feed-in Power",
        unit: WATT,
        device_class: Some(DeviceClass::Power),
        min: 10.0,
        max: 2400.0,
        step: 10.0,
        icon: "mdi:transmission-tower-export",
    },
    AiNumber {
        field_key: "batBasicDisChargePower",
        translation_key: "discharge_power",
        name: "Discharge Power",
        unit: WATT,
        device_class: Some(DeviceClass::Power),
        min: 0.0,
        max: 800.0,
        step: 10.0,
        icon: "mdi:battery-arrow-down",
    },
    AiNumber {
        field_key: "minDischargeSOC",
        translation_key: "min_discharge_soc",
        name: "Min Discharge SOC",
        unit: PERCENTAGE,
        device_class: None,
        min: 0.0,
        max: 100.0,
        step: 1.0,
        icon: "mdi:battery-low",
    },
    AiNumber {
        field_key: "maxChargeSOC",
        translation_key: "max_charge_soc",
        name: "Max Charge SOC",
        unit: PERCENTAGE,
        device_class: None,
        min: 0.0,
        max: 100.0,
        step: 1.0,
        icon: "mdi:battery-high",
    },
];

impl AiNumber {
    pub fn unique_id(&self) -> String {
        format!("{}ai_{}", UNIQUE_ID_PREFIX, self.field_key)
    }

    pub fn validate(&self, value: f64) -> Result<(), Error> {
        if !value.is_finite() || value < self.min || value > self.max {
            return Err(Error::InvalidRequest(format!(
                "{} must be within {}-{}, got {}",
                self.field_key, self.min, self.max, value
            )));
        }
        Ok(())
    }

    /// Value as stored by the cloud, which only takes integers.
    pub fn to_cloud(&self, value: f64) -> i64 {
        value.trunc() as i64
    }
}

pub fn states(ctx: &Context<'_>) -> Vec<EntityState> {
    AI_NUMBERS.iter().map(|n| state(ctx, n)).collect()
}

fn state(ctx: &Context<'_>, number: &AiNumber) -> EntityState {
    let ai = ctx.ai_settings();
    let mut state = EntityState::new(number.unique_id(), number.name, Platform::Number);
    state.translation_key = Some(number.translation_key);
    state.unit_of_measurement = Some(number.unit);
    state.device_class = number.device_class;
    state.icon = Some(number.icon);
    state.available = ctx.slow.last_update_success
        && ai.map_or(false, |ai| ai.contains_key(number.field_key));

    let value = match ctx.optimistic(&state.unique_id) {
        Some(Optimistic::Number(n)) => Some(*n),
        _ => ai
            .and_then(|ai| ai.get(number.field_key))
            .and_then(crate::model::as_f64),
    };
    state.state = value.map(Value::from).unwrap_or(Value::Null);

    for (key, v) in &[("min", number.min), ("max", number.max), ("step", number.step)] {
        state.attributes.insert(key.to_string(), Value::from(*v));
    }
    state
        .attributes
        .insert("mode".to_string(), Value::from("box"));
    state
}

pub async fn set_value(hub: &Hub, number: &AiNumber, value: f64) -> Result<(), Error> {
    number.validate(value)?;
    let written = number.to_cloud(value);
    let unique_id = number.unique_id();
    hub.set_optimistic(&unique_id, Optimistic::Number(written as f64))
        .await;
    let result = hub
        .write_ai_field(number.field_key, Value::from(written))
        .await;
    if result.is_err() {
        hub.clear_optimistic(&unique_id).await;
    }
    result
}
