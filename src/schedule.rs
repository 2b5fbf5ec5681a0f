//! Custom-mode schedule slots (`controlTime1` .. `controlTime16`).
//!
//! Each slot is stored by the cloud as an 11 field CSV string:
//!
//! ```text
//! enabled, startTime, endTime, powerW, 0, 6, 0, 0, 0, maxSOC, minSOC
//! ```
//!
//! `powerW` is signed: negative charges from the grid, positive discharges / feeds in. Fields 5
//! to 9 are constants written by the vendor app.

use crate::api::Error;
use crate::model::EnergyMode;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_SLOTS: usize = 16;
pub const CONTROL_TIME_PREFIX: &str = "controlTime";
pub const EMPTY_SLOT: &str = "0,00:00,00:00,0,0,0,0,0,0,100,10";

const FIELD_COUNT: usize = 11;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Slot {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    pub power_w: i32,
    pub max_soc: u8,
    pub min_soc: u8,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            enabled: true,
            start: "00:00".to_string(),
            end: "00:00".to_string(),
            power_w: 0,
            max_soc: 100,
            min_soc: 10,
        }
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

impl Slot {
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{},0,6,0,0,0,{},{}",
            if self.enabled { 1 } else { 0 },
            self.start,
            self.end,
            self.power_w,
            self.max_soc,
            self.min_soc
        )
    }

    pub fn decode(s: &str) -> Option<Slot> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return None;
        }
        Some(Slot {
            enabled: fields[0] == "1",
            start: fields[1].to_string(),
            end: fields[2].to_string(),
            power_w: fields[3].parse().ok()?,
            max_soc: fields[9].parse().ok()?,
            min_soc: fields[10].parse().ok()?,
        })
    }

    pub fn is_charge(&self) -> bool {
        self.power_w < 0
    }

    pub fn validate(&self) -> Result<(), Error> {
        if parse_hhmm(&self.start).is_none() || parse_hhmm(&self.end).is_none() {
            return Err(Error::InvalidRequest(format!(
                "slot times must be HH:MM, got {}-{}",
                self.start, self.end
            )));
        }
        if self.max_soc > 100 || self.min_soc > 100 {
            return Err(Error::InvalidRequest(format!(
                "slot SOC limits must be within 0-100, got {}-{}",
                self.min_soc, self.max_soc
            )));
        }
        Ok(())
    }

    /// Whether the quarter starting at `hour:minute` falls inside this slot; slots may wrap
    /// past midnight.
    pub fn contains(&self, hour: u32, minute: u32) -> bool {
        match (parse_hhmm(&self.start), parse_hhmm(&self.end)) {
            (Some(start), Some(end)) => match NaiveTime::from_hms_opt(hour, minute, 0) {
                Some(q) if start <= end => start <= q && q < end,
                Some(q) => q >= start || q < end,
                None => false,
            },
            _ => false,
        }
    }
}

/// Slots as they arrive from callers: either a list or an object keyed by index.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Slots {
    List(Vec<Slot>),
    Indexed(Map<String, Value>),
}

impl Slots {
    pub fn into_vec(self) -> Result<Vec<Slot>, Error> {
        match self {
            Slots::List(slots) => Ok(slots),
            Slots::Indexed(map) => map
                .into_iter()
                .map(|(_, v)| {
                    serde_json::from_value(v).map_err(|e| Error::InvalidRequest(e.to_string()))
                })
                .collect(),
        }
    }
}

impl Default for Slots {
    fn default() -> Self {
        Slots::List(Vec::new())
    }
}

pub fn control_time_key(index: usize) -> String {
    format!("{}{}", CONTROL_TIME_PREFIX, index)
}

/// Number of enabled slots among `controlTime1..16` of the AI settings.
pub fn active_slots(settings: &Map<String, Value>) -> usize {
    (1..=MAX_SLOTS)
        .filter_map(|i| settings.get(&control_time_key(i)))
        .filter_map(Value::as_str)
        .filter_map(Slot::decode)
        .filter(|slot| slot.enabled)
        .count()
}

/// Build the custom-mode payload: every writable, non-null cached field is carried over, the
/// first sixteen `slots` are written and the remaining `controlTime` keys are cleared.
pub fn build_payload(
    cached: &Map<String, Value>,
    readonly: &[&str],
    datalog_sn: &str,
    slots: &[Slot],
) -> Map<String, Value> {
    let mut payload: Map<String, Value> = cached
        .iter()
        .filter(|(k, v)| {
            !readonly.contains(&k.as_str()) && !v.is_null() && !k.starts_with(CONTROL_TIME_PREFIX)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    payload.insert(
        "energyMode".to_string(),
        Value::from(EnergyMode::Custom as u8),
    );
    payload.insert(
        "datalogSn".to_string(),
        Value::String(datalog_sn.to_string()),
    );

    let active = &slots[..slots.len().min(MAX_SLOTS)];
    for (i, slot) in active.iter().enumerate() {
        let encoded = slot.encode();
        log::debug!("push_schedule slot {}: {}", i + 1, encoded);
        payload.insert(control_time_key(i + 1), Value::String(encoded));
    }
    for i in active.len() + 1..=MAX_SLOTS {
        payload.insert(control_time_key(i), Value::String(EMPTY_SLOT.to_string()));
    }

    payload
}
