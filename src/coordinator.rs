use crate::api::Error;
use crate::model::Device;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::RwLock;

pub const REALTIME_INTERVAL: Duration = Duration::from_secs(30);
pub const STATISTICS_INTERVAL: Duration = Duration::from_secs(300);

/// Last known result of a periodically refreshed data source.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<T> {
    #[serde(skip)]
    pub data: Option<T>,
    pub last_update_success: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot {
            data: None,
            last_update_success: false,
            last_updated: None,
            last_error: None,
        }
    }
}

impl<T> Snapshot<T> {
    /// Data usable by entities: present and produced by a successful refresh.
    pub fn available(&self) -> Option<&T> {
        if self.last_update_success {
            self.data.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct Coordinator<T> {
    name: &'static str,
    interval: Duration,
    state: RwLock<Snapshot<T>>,
}

impl<T: Clone> Coordinator<T> {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Coordinator {
            name,
            interval,
            state: RwLock::new(Snapshot::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn snapshot(&self) -> Snapshot<T> {
        self.state.read().await.clone()
    }

    pub async fn data(&self) -> Option<T> {
        self.state.read().await.data.clone()
    }

    /// Record the outcome of a refresh. A failure keeps the previous data but marks it stale.
    pub async fn update(&self, result: Result<T, Error>) -> bool {
        let mut state = self.state.write().await;
        match result {
            Ok(data) => {
                if !state.last_update_success {
                    log::info!("{}: refresh succeeded", self.name);
                }
                state.data = Some(data);
                state.last_update_success = true;
                state.last_updated = Some(Utc::now());
                state.last_error = None;
                true
            }
            Err(e) => {
                log::error!("{}: error fetching data: {}", self.name, e);
                state.last_update_success = false;
                state.last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Patch the cached data in place, e.g. after a successful write.
    pub async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        if let Some(data) = self.state.write().await.data.as_mut() {
            f(data);
        }
    }
}

/// Output of the real-time (30 s) refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RealtimeData {
    pub home_count: Map<String, Value>,
    pub system_sn: String,
}

impl RealtimeData {
    /// Build from the raw `getHomeCountData` object. The top-level `batRemainingEnergy` is
    /// always empty, so the nested one wins when set; `pvPowerMap` entries become `pv1Power`,
    /// `pv2Power`, ... in API order.
    pub fn from_home_count(mut home_count: Map<String, Value>) -> Self {
        let bat_remaining = home_count
            .get("batDataMap")
            .and_then(Value::as_object)
            .and_then(|m| m.get("batRemainingEnergy"))
            .filter(|v| crate::model::truthy(v) || v.as_str().map_or(false, |s| !s.is_empty()))
            .cloned();
        if let Some(bat_remaining) = bat_remaining {
            home_count.insert("batRemainingEnergy".to_string(), bat_remaining);
        }

        let pv_powers: Vec<Value> = home_count
            .get("pvPowerMap")
            .and_then(Value::as_object)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        for (i, power) in pv_powers.into_iter().enumerate() {
            home_count.insert(format!("pv{}Power", i + 1), power);
        }

        let system_sn = home_count
            .get("systemSn")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        RealtimeData {
            home_count,
            system_sn,
        }
    }
}

/// Output of the statistics (5 min) refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlowData {
    pub device_list: Vec<Device>,
    pub ai_settings: Option<Map<String, Value>>,
    pub day: Map<String, Value>,
    pub month: Map<String, Value>,
    pub year: Map<String, Value>,
    pub total: Map<String, Value>,
}

impl SlowData {
    pub fn period(&self, period: crate::model::EnergyPeriod) -> &Map<String, Value> {
        use crate::model::EnergyPeriod;
        match period {
            EnergyPeriod::Hour | EnergyPeriod::Day => &self.day,
            EnergyPeriod::Month => &self.month,
            EnergyPeriod::Year => &self.year,
            EnergyPeriod::Total => &self.total,
        }
    }

    pub fn device(&self, device_sn: &str) -> Option<&Device> {
        self.device_list.iter().find(|d| d.device_sn == device_sn)
    }
}
