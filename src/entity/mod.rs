//! Home Assistant style entities derived from the coordinators' data.
//!
//! Entity states are recomputed on every read from the latest snapshots; the only state kept
//! between reads is the optimistic value of entities that were just written.

pub mod number;
pub mod select;
pub mod sensor;
pub mod switch;

use crate::api::Error;
use crate::coordinator::{RealtimeData, SlowData, Snapshot};
use crate::hub::Hub;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const UNIQUE_ID_PREFIX: &str = "ha_ems_";

pub const WATT: &str = "W";
pub const KILO_WATT_HOUR: &str = "kWh";
pub const PERCENTAGE: &str = "%";
pub const KILOGRAMS: &str = "kg";

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<&'static str>,
    pub name: &'static str,
    pub manufacturer: &'static str,
}

pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        identifiers: vec!["ha_ems_main"],
        name: "Sunpura S2400",
        manufacturer: "Sunpura",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Sensor,
    Switch,
    Number,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Power,
    Energy,
    Battery,
    Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityState {
    pub unique_id: String,
    pub name: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_key: Option<&'static str>,
    pub state: Value,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<EntityCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    fn new(unique_id: String, name: impl Into<String>, platform: Platform) -> Self {
        EntityState {
            unique_id,
            name: name.into(),
            platform,
            translation_key: None,
            state: Value::Null,
            available: false,
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
            entity_category: None,
            icon: None,
            attributes: Map::new(),
        }
    }

    /// Numeric value of the state, if any.
    pub fn numeric(&self) -> Option<f64> {
        if self.available {
            self.state.as_f64()
        } else {
            None
        }
    }
}

/// Value shown by a written entity until the cloud reflects the write.
#[derive(Debug, Clone, PartialEq)]
pub enum Optimistic {
    Bool(bool),
    Number(f64),
    Option(String),
}

/// Everything an entity needs to render its state.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub realtime: &'a Snapshot<RealtimeData>,
    pub slow: &'a Snapshot<SlowData>,
    pub main_control_device_id: Option<&'a str>,
    pub optimistic: &'a HashMap<String, Optimistic>,
}

impl<'a> Context<'a> {
    /// Cached AI settings, regardless of the last refresh outcome.
    pub fn ai_settings(&self) -> Option<&'a Map<String, Value>> {
        self.slow.data.as_ref().and_then(|d| d.ai_settings.as_ref())
    }

    fn optimistic(&self, unique_id: &str) -> Option<&'a Optimistic> {
        self.optimistic.get(unique_id)
    }
}

/// The entity a write command is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    SmartLinkMode,
    AiSwitch(&'static switch::AiSwitch),
    DeviceSwitch(String),
    Number(&'static number::AiNumber),
    EnergyMode,
}

pub fn resolve(unique_id: &str) -> Option<Target> {
    if unique_id == switch::SMART_LINK_MODE_ID {
        return Some(Target::SmartLinkMode);
    }
    if unique_id == select::ENERGY_MODE_ID {
        return Some(Target::EnergyMode);
    }
    let rest = unique_id.strip_prefix(UNIQUE_ID_PREFIX)?;
    if let Some(field) = rest.strip_prefix("ai_") {
        if let Some(s) = switch::AI_SWITCHES.iter().find(|s| s.field_key == field) {
            return Some(Target::AiSwitch(s));
        }
        return number::AI_NUMBERS
            .iter()
            .find(|n| n.field_key == field)
            .map(Target::Number);
    }
    rest.strip_prefix("device_")
        .map(|sn| Target::DeviceSwitch(sn.to_string()))
}

/// All entities for the current snapshots. Controls only exist once a main control device is
/// known.
pub fn all(ctx: &Context<'_>) -> Vec<EntityState> {
    let mut entities = sensor::states(ctx);
    entities.extend(switch::states(ctx));
    if ctx.main_control_device_id.is_some() {
        entities.extend(number::states(ctx));
        entities.push(select::state(ctx));
    }
    entities
}

/// Drop or keep optimistic values after a statistics refresh. AI switches and numbers hold
/// their value until the cloud returns it; everything else falls back to reported state.
pub fn reconcile(optimistic: &mut HashMap<String, Optimistic>, data: &SlowData) {
    optimistic.retain(|unique_id, value| match resolve(unique_id) {
        Some(Target::AiSwitch(s)) => !confirmed(data, s.field_key, value),
        Some(Target::Number(n)) => !confirmed(data, n.field_key, value),
        _ => false,
    });
}

fn confirmed(data: &SlowData, field_key: &str, value: &Optimistic) -> bool {
    let reported = match data.ai_settings.as_ref().and_then(|s| s.get(field_key)) {
        Some(v) if !v.is_null() => v,
        _ => {
            log::debug!("{} not reported yet, holding optimistic state", field_key);
            return false;
        }
    };
    let confirmed = match value {
        Optimistic::Bool(b) => crate::model::truthy(reported) == *b,
        Optimistic::Number(n) => match crate::model::as_f64(reported) {
            Some(r) => (r - n).abs() < f64::EPSILON,
            /* unparsable value: nothing to compare against */
            None => true,
        },
        Optimistic::Option(_) => true,
    };
    if !confirmed {
        log::debug!(
            "API returned {}={}, holding optimistic state={:?}",
            field_key,
            reported,
            value
        );
    }
    confirmed
}

pub async fn turn(hub: &Hub, unique_id: &str, on: bool) -> Result<(), Error> {
    match resolve(unique_id) {
        Some(Target::SmartLinkMode) => switch::turn_smart_link_mode(hub, on).await,
        Some(Target::AiSwitch(s)) => switch::turn_ai_switch(hub, s, on).await,
        Some(Target::DeviceSwitch(sn)) => switch::turn_device(hub, &sn, on).await,
        _ => Err(Error::UnknownEntity(unique_id.to_string())),
    }
}

pub async fn set_value(hub: &Hub, unique_id: &str, value: f64) -> Result<(), Error> {
    match resolve(unique_id) {
        Some(Target::Number(n)) => number::set_value(hub, n, value).await,
        _ => Err(Error::UnknownEntity(unique_id.to_string())),
    }
}

pub async fn select_option(hub: &Hub, unique_id: &str, option: &str) -> Result<(), Error> {
    match resolve(unique_id) {
        Some(Target::EnergyMode) => select::select_option(hub, option).await,
        _ => Err(Error::UnknownEntity(unique_id.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    pub fn read_obj(filename: &str) -> Map<String, Value> {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        let value: Value = serde_json::from_str(&fs::read_to_string(d.as_path()).unwrap()).unwrap();
        crate::api::response::obj_map(&value)
    }

    pub fn realtime() -> Snapshot<RealtimeData> {
        Snapshot {
            data: Some(RealtimeData::from_home_count(read_obj("getHomeCountData.json"))),
            last_update_success: true,
            last_updated: None,
            last_error: None,
        }
    }

    pub fn slow() -> Snapshot<SlowData> {
        let devices = read_obj("getDevicePage.json")["dataList"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| serde_json::from_value(d.clone()).unwrap())
            .collect();
        Snapshot {
            data: Some(SlowData {
                device_list: devices,
                ai_settings: Some(read_obj("getAiSystemBySnWithEnergyMode.json")),
                month: read_obj("getEnergyDataMonth.json"),
                ..SlowData::default()
            }),
            last_update_success: true,
            last_updated: None,
            last_error: None,
        }
    }

    pub fn find<'a>(entities: &'a [EntityState], unique_id: &str) -> &'a EntityState {
        entities
            .iter()
            .find(|e| e.unique_id == unique_id)
            .unwrap_or_else(|| panic!("no entity {}", unique_id))
    }

    #[test]
    fn resolve_targets() {
        assert_eq!(Some(Target::SmartLinkMode), resolve("ha_ems_smart_link_mode"));
        assert_eq!(Some(Target::EnergyMode), resolve("ha_ems_energy_mode"));
        assert!(matches!(resolve("ha_ems_ai_antiRefluxSet"), Some(Target::AiSwitch(_))));
        assert!(matches!(resolve("ha_ems_ai_maxFeedPower"), Some(Target::Number(_))));
        assert_eq!(
            Some(Target::DeviceSwitch("SOCK0001".to_string())),
            resolve("ha_ems_device_SOCK0001")
        );
        assert_eq!(None, resolve("ha_ems_ai_unknown"));
        assert_eq!(None, resolve("ha_ems_solarPower"));
    }

    #[test]
    fn controls_need_main_control_device() {
        let (realtime, slow, optimistic) = (realtime(), slow(), HashMap::new());
        let mut ctx = Context {
            realtime: &realtime,
            slow: &slow,
            main_control_device_id: None,
            optimistic: &optimistic,
        };
        let without = all(&ctx);
        assert!(without.iter().all(|e| e.platform != Platform::Number));
        assert!(without.iter().all(|e| e.unique_id != "ha_ems_energy_mode"));
        assert!(without.iter().all(|e| e.unique_id != "ha_ems_battery_schedule"));
        /* device switches come from the device list alone */
        find(&without, "ha_ems_device_SOCK0001");

        ctx.main_control_device_id = Some("DL2400A0001");
        let with = all(&ctx);
        find(&with, "ha_ems_energy_mode");
        find(&with, "ha_ems_ai_maxChargePower");
        find(&with, "ha_ems_battery_schedule");
        find(&with, "ha_ems_smart_link_mode");
    }

    #[test]
    fn reconcile_holds_until_confirmed() {
        let data = slow().data.unwrap();
        let mut optimistic = HashMap::new();
        /* antiRefluxSet is 0 in the fixture, maxChargePower is 2000 */
        optimistic.insert("ha_ems_ai_antiRefluxSet".to_string(), Optimistic::Bool(true));
        optimistic.insert("ha_ems_ai_ctEnable".to_string(), Optimistic::Bool(true));
        optimistic.insert("ha_ems_ai_maxChargePower".to_string(), Optimistic::Number(1500.0));
        optimistic.insert("ha_ems_ai_maxFeedPower".to_string(), Optimistic::Number(800.0));
        optimistic.insert("ha_ems_smart_link_mode".to_string(), Optimistic::Bool(false));
        optimistic.insert(
            "ha_ems_energy_mode".to_string(),
            Optimistic::Option("Manual".to_string()),
        );

        reconcile(&mut optimistic, &data);

        let mut kept: Vec<&String> = optimistic.keys().collect();
        kept.sort();
        assert_eq!(
            vec!["ha_ems_ai_antiRefluxSet", "ha_ems_ai_maxChargePower"],
            kept
        );
    }

    #[test]
    fn reconcile_holds_when_field_missing() {
        let data = SlowData {
            ai_settings: Some(json!({"datalogSn": "DL"}).as_object().cloned().unwrap()),
            ..SlowData::default()
        };
        let mut optimistic = HashMap::new();
        optimistic.insert("ha_ems_ai_ctEnable".to_string(), Optimistic::Bool(false));
        reconcile(&mut optimistic, &data);
        assert_eq!(1, optimistic.len());
    }
}
