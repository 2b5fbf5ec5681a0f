use super::{
    Context, DeviceClass, EntityCategory, EntityState, Platform, StateClass, KILOGRAMS,
    KILO_WATT_HOUR, PERCENTAGE, UNIQUE_ID_PREFIX, WATT,
};
use crate::model::EnergyPeriod;
use crate::schedule;
use serde_json::{Map, Value};

/// Leading number of values such as "112W", "-131W", "21%" or "0.00kWh". A digit must come
/// first, after an optional minus sign.
fn numeric_prefix(s: &str) -> Option<&str> {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let sign = s.len() - unsigned.len();
    let int_len = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or_else(|| unsigned.len());
    if int_len == 0 {
        return None;
    }
    let frac_len = match unsigned[int_len..].strip_prefix('.') {
        Some(frac) => 1 + frac.find(|c: char| !c.is_ascii_digit()).unwrap_or_else(|| frac.len()),
        None => 0,
    };
    Some(&s[..sign + int_len + frac_len])
}

/// Parse a cloud value that may carry a unit suffix.
pub fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => numeric_prefix(s.trim()).and_then(|n| n.parse().ok()),
        _ => None,
    }
}

/// A sensor reading one field of the real-time energy flow.
#[derive(Debug, PartialEq)]
pub struct RealtimeSensor {
    pub field_key: &'static str,
    pub translation_key: &'static str,
    pub name: &'static str,
    pub unit: &'static str,
    pub device_class: Option<DeviceClass>,
    pub state_class: StateClass,
    pub icon: Option<&'static str>,
}

const fn power(
    field_key: &'static str,
    translation_key: &'static str,
    name: &'static str,
    icon: &'static str,
) -> RealtimeSensor {
    RealtimeSensor {
        field_key,
        translation_key,
        name,
        unit: WATT,
        device_class: Some(DeviceClass::Power),
        state_class: StateClass::Measurement,
        icon: Some(icon),
    }
}

const fn energy(
    field_key: &'static str,
    translation_key: &'static str,
    name: &'static str,
    icon: &'static str,
) -> RealtimeSensor {
    RealtimeSensor {
        field_key,
        translation_key,
        name,
        unit: KILO_WATT_HOUR,
        device_class: Some(DeviceClass::Energy),
        state_class: StateClass::TotalIncreasing,
        icon: Some(icon),
    }
}

pub const REALTIME_SENSORS: &[RealtimeSensor] = &[
    power("solarPower", "solar_power", "Solar Power", "mdi:solar-power"),
    power("pv1Power", "pv1_power", "PV1 Power", "mdi:solar-panel"),
    power("pv2Power", "pv2_power", "PV2 Power", "mdi:solar-panel"),
    power("gridPower", "grid_power", "Grid Power", "mdi:transmission-tower"),
    power("batPower", "battery_power", "Battery Power", "mdi:battery-charging"),
    power("acPower", "ac_charge_power", "AC Charge Power", "mdi:transmission-tower-import"),
    power("homePower", "home_power", "Home Power", "mdi:home-lightning-bolt"),
    power("loadPower", "load_power", "Load Power", "mdi:lightning-bolt"),
    power(
        "totalLoadPower",
        "total_load_power",
        "Total Load Power",
        "mdi:home-lightning-bolt-outline",
    ),
    RealtimeSensor {
        field_key: "batSoc",
        translation_key: "battery_soc",
        name: "Battery SOC",
        unit: PERCENTAGE,
        device_class: Some(DeviceClass::Battery),
        state_class: StateClass::Measurement,
        icon: None,
    },
    RealtimeSensor {
        field_key: "batRemainingEnergy",
        translation_key: "battery_remaining_energy",
        name: "Battery Remaining Energy",
        unit: KILO_WATT_HOUR,
        device_class: None,
        state_class: StateClass::Measurement,
        icon: Some("mdi:battery-charging"),
    },
    energy("solarDayElec", "solar_today", "Solar Today", "mdi:solar-power"),
    energy(
        "gridDayBuyElec",
        "grid_import_today",
        "Grid Import Today",
        "mdi:transmission-tower-import",
    ),
    energy(
        "gridDayElec",
        "grid_export_today",
        "Grid Export Today",
        "mdi:transmission-tower-export",
    ),
    energy(
        "batteryDayElec",
        "battery_charge_today",
        "Battery Charge Today",
        "mdi:battery-plus",
    ),
    energy(
        "batteryDayDischargeElec",
        "battery_discharge_today",
        "Battery Discharge Today",
        "mdi:battery-minus",
    ),
    energy(
        "loadDayElec",
        "load_today",
        "Load Today",
        "mdi:home-lightning-bolt-outline",
    ),
    energy("todayEnergy", "today_energy", "Today Energy", "mdi:calendar-today"),
    energy("monthEnergy", "month_energy", "Month Energy", "mdi:calendar-month"),
    energy("yearEnergy", "year_energy", "Year Energy", "mdi:calendar"),
    energy("totalEnergy", "total_energy", "Total Energy", "mdi:sigma"),
    RealtimeSensor {
        field_key: "co2",
        translation_key: "co2_savings",
        name: "CO2 Savings",
        unit: KILOGRAMS,
        device_class: Some(DeviceClass::Weight),
        state_class: StateClass::TotalIncreasing,
        icon: Some("mdi:molecule-co2"),
    },
];

/// A sensor reading one field of a statistics period.
#[derive(Debug, PartialEq)]
pub struct StatisticsSensor {
    pub period: EnergyPeriod,
    pub field_key: &'static str,
    pub translation_key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
}

const fn stat(
    period: EnergyPeriod,
    field_key: &'static str,
    translation_key: &'static str,
    name: &'static str,
    icon: &'static str,
) -> StatisticsSensor {
    StatisticsSensor {
        period,
        field_key,
        translation_key,
        name,
        icon,
    }
}

const IMPORT: &str = "mdi:transmission-tower-import";
const EXPORT: &str = "mdi:transmission-tower-export";

pub const STATISTICS_SENSORS: &[StatisticsSensor] = &[
    stat(EnergyPeriod::Month, "solarTotal", "solar_this_month", "Solar This Month", "mdi:solar-power"),
    stat(EnergyPeriod::Month, "gridBuyTotal", "grid_import_this_month", "Grid Import This Month", IMPORT),
    stat(EnergyPeriod::Month, "gridTotal", "grid_export_this_month", "Grid Export This Month", EXPORT),
    stat(EnergyPeriod::Month, "batTotal", "battery_charge_this_month", "Battery Charge This Month", "mdi:battery-plus"),
    stat(EnergyPeriod::Month, "batDischargeTotal", "battery_discharge_this_month", "Battery Discharge This Month", "mdi:battery-minus"),
    stat(EnergyPeriod::Year, "solarTotal", "solar_this_year", "Solar This Year", "mdi:solar-power"),
    stat(EnergyPeriod::Year, "gridBuyTotal", "grid_import_this_year", "Grid Import This Year", IMPORT),
    stat(EnergyPeriod::Year, "gridTotal", "grid_export_this_year", "Grid Export This Year", EXPORT),
    stat(EnergyPeriod::Year, "batTotal", "battery_charge_this_year", "Battery Charge This Year", "mdi:battery-plus"),
    stat(EnergyPeriod::Year, "batDischargeTotal", "battery_discharge_this_year", "Battery Discharge This Year", "mdi:battery-minus"),
    stat(EnergyPeriod::Total, "solarTotal", "solar_all_time", "Solar All Time", "mdi:solar-power"),
    stat(EnergyPeriod::Total, "gridBuyTotal", "grid_import_all_time", "Grid Import All Time", IMPORT),
    stat(EnergyPeriod::Total, "gridTotal", "grid_export_all_time", "Grid Export All Time", EXPORT),
    stat(EnergyPeriod::Total, "batTotal", "battery_charge_all_time", "Battery Charge All Time", "mdi:battery-plus"),
    stat(EnergyPeriod::Total, "batDischargeTotal", "battery_discharge_all_time", "Battery Discharge All Time", "mdi:battery-minus"),
];

pub const RAW_REALTIME_ID: &str = "ha_ems_raw_home_count";
pub const RAW_SLOW_ID: &str = "ha_ems_raw_slow_data";
pub const SCHEDULE_ID: &str = "ha_ems_battery_schedule";

pub fn states(ctx: &Context<'_>) -> Vec<EntityState> {
    let mut states = vec![raw_realtime(ctx), raw_slow(ctx)];
    states.extend(REALTIME_SENSORS.iter().map(|d| realtime(ctx, d)));
    states.extend(STATISTICS_SENSORS.iter().map(|d| statistics(ctx, d)));
    if ctx.main_control_device_id.is_some() {
        states.push(battery_schedule(ctx));
    }
    states
}

fn realtime(ctx: &Context<'_>, description: &RealtimeSensor) -> EntityState {
    let mut state = EntityState::new(
        format!("{}{}", UNIQUE_ID_PREFIX, description.field_key),
        description.name,
        Platform::Sensor,
    );
    state.translation_key = Some(description.translation_key);
    state.unit_of_measurement = Some(description.unit);
    state.device_class = description.device_class;
    state.state_class = Some(description.state_class);
    state.icon = description.icon;

    let home_count = ctx.realtime.data.as_ref().map(|d| &d.home_count);
    if let Some(raw) = home_count.and_then(|h| h.get(description.field_key)) {
        state.state = parse_value(raw).map(Value::from).unwrap_or(Value::Null);
    }
    state.available = ctx
        .realtime
        .available()
        .map_or(false, |d| d.home_count.contains_key(description.field_key));
    state
}

fn statistics(ctx: &Context<'_>, description: &StatisticsSensor) -> EntityState {
    let mut state = EntityState::new(
        format!(
            "{}{}_{}",
            UNIQUE_ID_PREFIX,
            description.period.as_str(),
            description.field_key
        ),
        description.name,
        Platform::Sensor,
    );
    state.translation_key = Some(description.translation_key);
    state.unit_of_measurement = Some(KILO_WATT_HOUR);
    state.device_class = Some(DeviceClass::Energy);
    state.state_class = Some(StateClass::TotalIncreasing);
    state.icon = Some(description.icon);

    let period = ctx.slow.data.as_ref().map(|d| d.period(description.period));
    if let Some(raw) = period.and_then(|p| p.get(description.field_key)) {
        state.state = crate::model::as_f64(raw)
            .map(Value::from)
            .unwrap_or(Value::Null);
    }
    state.available = ctx.slow.available().map_or(false, |d| {
        d.period(description.period)
            .contains_key(description.field_key)
    });
    state
}

fn scalars<'a>(map: &'a Map<String, Value>) -> impl Iterator<Item = (&'a String, &'a Value)> {
    map.iter().filter(|(_, v)| !v.is_array() && !v.is_object())
}

fn raw_realtime(ctx: &Context<'_>) -> EntityState {
    let mut state = EntityState::new(
        RAW_REALTIME_ID.to_string(),
        "API Discovery (realtime)",
        Platform::Sensor,
    );
    state.translation_key = Some("api_discovery_realtime");
    state.entity_category = Some(EntityCategory::Diagnostic);
    state.icon = Some("mdi:code-json");
    state.available = ctx.realtime.last_update_success;

    if let Some(data) = ctx.realtime.data.as_ref() {
        state.state = Value::from(if data.home_count.is_empty() {
            "no data"
        } else {
            "available"
        });
        state.attributes = data
            .home_count
            .iter()
            .filter(|(k, v)| {
                (!v.is_array() && !v.is_object()) || k.as_str() == "pvPowerMap" || k.as_str() == "batDataMap"
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    state
}

fn raw_slow(ctx: &Context<'_>) -> EntityState {
    let mut state = EntityState::new(
        RAW_SLOW_ID.to_string(),
        "API Discovery (slow data)",
        Platform::Sensor,
    );
    state.translation_key = Some("api_discovery_slow");
    state.entity_category = Some(EntityCategory::Diagnostic);
    state.icon = Some("mdi:database-eye");
    state.available = ctx.slow.last_update_success;

    if let Some(data) = ctx.slow.data.as_ref() {
        state.state = Value::from("available");
        for period in &[
            EnergyPeriod::Day,
            EnergyPeriod::Month,
            EnergyPeriod::Year,
            EnergyPeriod::Total,
        ] {
            for (k, v) in scalars(data.period(*period)) {
                state
                    .attributes
                    .insert(format!("{}.{}", period.as_str(), k), v.clone());
            }
        }
        if let Some(ai) = data.ai_settings.as_ref() {
            for (k, v) in scalars(ai) {
                state.attributes.insert(format!("ai.{}", k), v.clone());
            }
        }
    }
    state
}

fn battery_schedule(ctx: &Context<'_>) -> EntityState {
    let mut state = EntityState::new(
        SCHEDULE_ID.to_string(),
        "Battery Schedule",
        Platform::Sensor,
    );
    state.translation_key = Some("battery_schedule");
    state.entity_category = Some(EntityCategory::Diagnostic);
    state.icon = Some("mdi:calendar-clock");
    state.available = ctx.slow.last_update_success;

    if let Some(ai) = ctx.ai_settings() {
        state.state = Value::from(schedule::active_slots(ai));
        for i in 1..=schedule::MAX_SLOTS {
            let slot = ai
                .get(&schedule::control_time_key(i))
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::from(""));
            state.attributes.insert(format!("slot_{}", i), slot);
        }
        state.attributes.insert(
            "energy_mode".to_string(),
            ai.get("energyMode").cloned().unwrap_or(Value::Null),
        );
    }
    state
}
