use chrono::NaiveDate;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type PlantId = u64;

#[derive(Debug, Clone)]
pub struct Api {
    pub api_url: String,
    pub username: String,
    /// MD5 hex digest of the account password, as expected by `/user/login`.
    pub password: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct LoggedInApi {
    pub api_url: String,
    pub token: String,
    pub language: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plant {
    pub id: PlantId,
    pub name: String,
}

/// Icon type reported in the device page. Only sockets and chargers are switchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum IconType {
    Socket = 5,
    Charger = 6,
}

/// Energy mode of the AI settings, as written to `energyMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum EnergyMode {
    General = 0,
    Smart = 1,
    Custom = 2,
    TimeOfUse = 3,
    Manual = 4,
}

impl EnergyMode {
    pub const ALL: [EnergyMode; 5] = [
        EnergyMode::General,
        EnergyMode::Smart,
        EnergyMode::Custom,
        EnergyMode::TimeOfUse,
        EnergyMode::Manual,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EnergyMode::General => "General",
            EnergyMode::Smart => "Smart",
            EnergyMode::Custom => "Custom",
            EnergyMode::TimeOfUse => "Time of Use",
            EnergyMode::Manual => "Manual",
        }
    }

    pub fn from_label(label: &str) -> Option<EnergyMode> {
        EnergyMode::ALL.iter().copied().find(|m| m.label() == label)
    }

    /// The cloud reports the mode either as a number or as a numeric string.
    pub fn from_value(value: &Value) -> Option<EnergyMode> {
        let code = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }?;
        num::FromPrimitive::from_u64(code)
    }
}

/// Statistics periods served by the `getEnergyData*` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyPeriod {
    Hour,
    Day,
    Month,
    Year,
    Total,
}

impl EnergyPeriod {
    pub const ALL: [EnergyPeriod; 5] = [
        EnergyPeriod::Hour,
        EnergyPeriod::Day,
        EnergyPeriod::Month,
        EnergyPeriod::Year,
        EnergyPeriod::Total,
    ];

    pub fn from_name(name: &str) -> Option<EnergyPeriod> {
        EnergyPeriod::ALL.iter().copied().find(|p| p.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnergyPeriod::Hour => "hour",
            EnergyPeriod::Day => "day",
            EnergyPeriod::Month => "month",
            EnergyPeriod::Year => "year",
            EnergyPeriod::Total => "total",
        }
    }

    /// `time` query parameter for a request made on `today`.
    pub fn time_param(self, today: NaiveDate) -> String {
        match self {
            EnergyPeriod::Hour | EnergyPeriod::Day => today.format("%Y-%m-%d").to_string(),
            EnergyPeriod::Month => today.format("%Y-%m").to_string(),
            EnergyPeriod::Year | EnergyPeriod::Total => today.format("%Y").to_string(),
        }
    }
}

/// One entry of the device page, enriched with its `deviceInfo` and `settingInfo`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub device_sn: String,
    #[serde(default)]
    pub datalog_sn: Option<String>,
    #[serde(default)]
    pub device_type: Option<Value>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub icon_type: Option<u64>,
    #[serde(default)]
    pub is_third: Option<i64>,
    #[serde(default)]
    pub device_info: Map<String, Value>,
    #[serde(default)]
    pub setting_info: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn icon(&self) -> Option<IconType> {
        self.icon_type.and_then(num::FromPrimitive::from_u64)
    }

    pub fn display_name(&self) -> &str {
        match self.device_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.device_sn,
        }
    }

    /// On/off state as reported in `deviceInfo`, probing the keys the cloud is known to use.
    pub fn is_on(&self) -> Option<bool> {
        ["switch", "status", "onOff", "state"]
            .iter()
            .filter_map(|key| self.device_info.get(*key))
            .find(|v| !v.is_null())
            .map(truthy)
    }
}

/// Truthiness of a loosely typed cloud value: numbers are on when non-zero, strings when they
/// hold a non-zero number or `true`.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) => f != 0.0,
            Err(_) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on"),
        },
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Plain `float(value)` conversion for fields that carry bare numbers or numeric strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
