//! Cloud session, plant selection and every write the entities and services perform.

use crate::api::{self, Error};
use crate::coordinator::{Coordinator, RealtimeData, SlowData, Snapshot};
use crate::entity::{self, EntityState, Optimistic};
use crate::model::{self, Device, EnergyMode, EnergyPeriod, IconType, Plant, PlantId};
use crate::schedule::{self, Slot};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Server-side metadata of the AI settings; writing them back makes the cloud silently drop the
/// whole request.
pub const READONLY_FIELDS: &[&str] = &[
    "id",
    "sn",
    "createTime",
    "updateTime",
    "currentPower",
    "currentWorkMode",
    "modeStr",
    "aiActiveTime",
    "priceType",
    "smartModeLimitFlag",
];

/// Pause after a command so the datalogger can apply it before the next request.
const SETTLE: Duration = Duration::from_millis(30);

const DEVICE_PAGE_SIZE: u32 = 100;
const DEVICE_PAGE_TYPE: u32 = 1;

/// Outcome of a manual refresh of both coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Refreshed {
    pub realtime: bool,
    pub slow: bool,
}

impl Refreshed {
    pub fn into_result(self) -> Result<(), Error> {
        if self.realtime && self.slow {
            Ok(())
        } else {
            Err(Error::ApiError(format!(
                "refresh failed (realtime: {}, statistics: {})",
                self.realtime, self.slow
            )))
        }
    }
}

pub struct Hub {
    api: model::Api,
    session: RwLock<Option<model::LoggedInApi>>,
    configured_plant: Option<PlantId>,
    plant_id: RwLock<Option<PlantId>>,
    plants: RwLock<Vec<Plant>>,
    main_control_device_id: RwLock<Option<String>>,
    ready: AtomicBool,
    realtime: Coordinator<RealtimeData>,
    slow: Coordinator<SlowData>,
    optimistic: Mutex<HashMap<String, Optimistic>>,
}

fn today() -> NaiveDate {
    Local::now().naive_local().date()
}

impl Hub {
    pub fn new(
        api: model::Api,
        plant_id: Option<PlantId>,
        realtime_interval: Duration,
        statistics_interval: Duration,
    ) -> Self {
        Hub {
            api,
            session: RwLock::new(None),
            configured_plant: plant_id,
            plant_id: RwLock::new(None),
            plants: RwLock::new(Vec::new()),
            main_control_device_id: RwLock::new(None),
            ready: AtomicBool::new(false),
            realtime: Coordinator::new("ha_ems_realtime", realtime_interval),
            slow: Coordinator::new("ha_ems_slow", statistics_interval),
            optimistic: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    pub fn realtime(&self) -> &Coordinator<RealtimeData> {
        &self.realtime
    }

    pub fn slow(&self) -> &Coordinator<SlowData> {
        &self.slow
    }

    pub async fn plant_id(&self) -> Option<PlantId> {
        *self.plant_id.read().await
    }

    pub async fn plants(&self) -> Vec<Plant> {
        self.plants.read().await.clone()
    }

    pub async fn main_control_device_id(&self) -> Option<String> {
        self.main_control_device_id.read().await.clone()
    }

    async fn login(&self) -> Result<model::LoggedInApi, Error> {
        let session = api::login(&self.api).await?;
        log::info!("Logged in to {}", self.api.api_url);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<model::LoggedInApi, Error> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) => Ok(session),
            None => self.login().await,
        }
    }

    /// Run `f` with the current session. An expired token triggers one fresh login and a
    /// single retry.
    async fn call<T, F, Fut>(&self, f: F) -> Result<T, Error>
    where
        F: Fn(model::LoggedInApi) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        match f(self.session().await?).await {
            Err(Error::TokenExpired) => {
                log::info!("Session token expired, logging in again");
                f(self.login().await?).await
            }
            other => other,
        }
    }

    /// Log in, resolve the plant and its main control device, then run the first refresh of
    /// both coordinators. Any error means the bridge is not ready yet.
    pub async fn setup(&self) -> Result<(), Error> {
        self.login().await?;

        let plants = self.call(|api| async move { api::plants(&api).await }).await?;
        let plant_id = match self.configured_plant {
            Some(id) => id,
            None => plants.first().map(|p| p.id).ok_or(Error::NoPlant)?,
        };
        log::info!("Using plant {} ({} plant(s) on account)", plant_id, plants.len());
        *self.plants.write().await = plants;

        self.select_plant(plant_id).await?;

        if !self.refresh_realtime().await || !self.refresh_slow().await {
            return Err(Error::NotReady);
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn select_plant(&self, plant_id: PlantId) -> Result<(), Error> {
        let main = self
            .call(|api| async move { api::home_control_devices(&api, plant_id).await })
            .await?
            .into_iter()
            .next();
        match main.as_deref() {
            Some(sn) => log::info!("Main control device of plant {}: {}", plant_id, sn),
            None => log::warn!("No main control device found for plant {}", plant_id),
        }
        *self.plant_id.write().await = Some(plant_id);
        *self.main_control_device_id.write().await = main;
        Ok(())
    }

    async fn fetch_realtime(&self) -> Result<RealtimeData, Error> {
        let plant_id = self.plant_id().await.ok_or(Error::NoPlant)?;
        let device_sn = match self.main_control_device_id().await {
            Some(sn) => sn,
            None => return Ok(RealtimeData::default()),
        };
        let sn = device_sn.as_str();
        let home_count = self
            .call(|api| async move { api::home_count_data(&api, plant_id, sn).await })
            .await?;
        Ok(RealtimeData::from_home_count(home_count))
    }

    pub async fn refresh_realtime(&self) -> bool {
        let result = self.fetch_realtime().await;
        self.realtime.update(result).await
    }

    /// Device page items enriched with `deviceInfo` and `settingInfo`. Items whose lookups come
    /// back empty are dropped; a refused page keeps the previous list.
    async fn fetch_device_list(&self, plant_id: PlantId, today: NaiveDate) -> Result<Vec<Device>, Error> {
        let items = self
            .call(|api| async move {
                api::device_page(&api, plant_id, 1, DEVICE_PAGE_SIZE, DEVICE_PAGE_TYPE).await
            })
            .await?;
        let items = match items {
            Some(items) => items,
            None => {
                return Ok(self
                    .slow
                    .data()
                    .await
                    .map(|d| d.device_list)
                    .unwrap_or_default())
            }
        };

        let mut devices = Vec::with_capacity(items.len());
        for mut item in items {
            let field = |key: &str| item.get(key).cloned().unwrap_or(Value::Null);
            let device_type = field("deviceType");
            let device_sn = api_str(&field("deviceSn"));
            let datalog_sn = api_str(&field("datalogSn"));
            let (device_type, sn, datalog) = (&device_type, device_sn.as_str(), datalog_sn.as_str());

            let info = match self
                .call(|api| async move { api::device_by_sn(&api, device_type, sn, today).await })
                .await?
            {
                Some(info) => info,
                None => {
                    log::debug!("No device info for {}, skipping", sn);
                    continue;
                }
            };
            let dtc = info.get("dtc").cloned().unwrap_or(Value::Null);
            let dtc = &dtc;
            let setting = match self
                .call(|api| async move { api::setting_info(&api, dtc, sn, datalog).await })
                .await?
            {
                Some(setting) => setting,
                None => {
                    log::debug!("No setting info for {}, skipping", sn);
                    continue;
                }
            };

            if let Value::Object(map) = &mut item {
                map.insert("deviceInfo".to_string(), Value::Object(info));
                map.insert("settingInfo".to_string(), setting);
            }
            match serde_json::from_value::<Device>(item) {
                Ok(device) => devices.push(device),
                Err(e) => log::warn!("Unable to read device {}: {}", sn, e),
            }
        }
        Ok(devices)
    }

    async fn fetch_slow(&self) -> Result<SlowData, Error> {
        let plant_id = self.plant_id().await.ok_or(Error::NoPlant)?;
        let main = self.main_control_device_id().await;
        let today = today();

        let device_list = self.fetch_device_list(plant_id, today).await?;

        let ai_settings = match main.as_deref() {
            Some(datalog_sn) => {
                self.call(|api| async move {
                    api::ai_settings(&api, datalog_sn, EnergyMode::General as u8).await
                })
                .await?
            }
            None => None,
        };

        let sn = main.as_deref().unwrap_or_default();
        let mut periods = Vec::with_capacity(4);
        for period in [
            EnergyPeriod::Day,
            EnergyPeriod::Month,
            EnergyPeriod::Year,
            EnergyPeriod::Total,
        ]
        .iter()
        .copied()
        {
            periods.push(
                self.call(|api| async move {
                    api::energy_data(&api, period, plant_id, sn, today).await
                })
                .await?,
            );
        }
        let mut periods = periods.into_iter();
        let mut next = || periods.next().unwrap_or_default();

        Ok(SlowData {
            device_list,
            ai_settings,
            day: next(),
            month: next(),
            year: next(),
            total: next(),
        })
    }

    /// Refresh the statistics coordinator and settle optimistic entity state against it.
    pub async fn refresh_slow(&self) -> bool {
        let result = self.fetch_slow().await;
        if let Ok(data) = &result {
            entity::reconcile(&mut *self.optimistic.lock().await, data);
        }
        self.slow.update(result).await
    }

    /// Refresh both coordinators, reporting each outcome.
    pub async fn refresh(&self) -> Result<Refreshed, Error> {
        self.ensure_ready()?;
        Ok(Refreshed {
            realtime: self.refresh_realtime().await,
            slow: self.refresh_slow().await,
        })
    }

    pub async fn switch_plant(&self, plant_id: PlantId) -> Result<Refreshed, Error> {
        self.ensure_ready()?;
        if !self.plants.read().await.iter().any(|p| p.id == plant_id) {
            log::warn!("Plant {} is not listed for this account", plant_id);
        }
        self.select_plant(plant_id).await?;
        self.optimistic.lock().await.clear();
        self.refresh().await
    }

    async fn datalog_sn_or_main(&self, datalog_sn: Option<&str>) -> Result<String, Error> {
        match datalog_sn.filter(|sn| !sn.is_empty()) {
            Some(sn) => Ok(sn.to_string()),
            None => self
                .main_control_device_id()
                .await
                .ok_or(Error::NoMainControlDevice),
        }
    }

    async fn plant_id_or_current(&self, plant_id: Option<PlantId>) -> Result<PlantId, Error> {
        match plant_id {
            Some(id) => Ok(id),
            None => self.plant_id().await.ok_or(Error::NoPlant),
        }
    }

    /// AI settings of `datalog_sn` (default: the main control device) for `energy_mode`, read
    /// straight from the cloud. `Null` when the cloud has none.
    pub async fn ai_settings(
        &self,
        datalog_sn: Option<&str>,
        energy_mode: u8,
    ) -> Result<Value, Error> {
        self.ensure_ready()?;
        let datalog_sn = self.datalog_sn_or_main(datalog_sn).await?;
        let sn = datalog_sn.as_str();
        let settings = self
            .call(|api| async move { api::ai_settings(&api, sn, energy_mode).await })
            .await?;
        Ok(settings.map(Value::Object).unwrap_or(Value::Null))
    }

    /// Energy statistics of one period, for any plant and device.
    pub async fn energy_data(
        &self,
        period: EnergyPeriod,
        plant_id: Option<PlantId>,
        device_sn: &str,
    ) -> Result<Map<String, Value>, Error> {
        self.ensure_ready()?;
        let plant_id = self.plant_id_or_current(plant_id).await?;
        let today = today();
        self.call(|api| async move {
            api::energy_data(&api, period, plant_id, device_sn, today).await
        })
        .await
    }

    pub async fn smart_device_list(&self) -> Result<Value, Error> {
        self.ensure_ready()?;
        let plant_id = self.plant_id_or_current(None).await?;
        let datalog_sn = self.datalog_sn_or_main(None).await?;
        let sn = datalog_sn.as_str();
        self.call(|api| async move { api::smart_device_list(&api, plant_id, sn).await })
            .await
    }

    pub async fn set_smart_socket_mode(
        &self,
        datalog_sn: Option<&str>,
        smart_socket_mode: i64,
        bat_basic_dis_charge_power: i64,
        basic_dis_charge_enable: i64,
    ) -> Result<Value, Error> {
        self.ensure_ready()?;
        let datalog_sn = self.datalog_sn_or_main(datalog_sn).await?;
        let sn = datalog_sn.as_str();
        self.call(|api| async move {
            api::set_smart_socket_mode(
                &api,
                sn,
                smart_socket_mode,
                bat_basic_dis_charge_power,
                basic_dis_charge_enable,
            )
            .await
        })
        .await
    }

    pub async fn check_zero_feed(
        &self,
        datalog_sn: Option<&str>,
        plant_id: Option<PlantId>,
        power_mode: &str,
        ai_mode: &str,
    ) -> Result<Value, Error> {
        self.ensure_ready()?;
        let datalog_sn = self.datalog_sn_or_main(datalog_sn).await?;
        let plant_id = self.plant_id_or_current(plant_id).await?;
        let sn = datalog_sn.as_str();
        let response = self
            .call(|api| async move {
                api::check_zero_feed(&api, sn, plant_id, power_mode, ai_mode).await
            })
            .await?;
        tokio::time::sleep(SETTLE).await;
        Ok(response)
    }

    /// Make `master_sn` the master device of the current plant.
    pub async fn set_master_slave_type(&self, master_sn: &str) -> Result<Value, Error> {
        self.ensure_ready()?;
        if master_sn.is_empty() {
            return Err(Error::InvalidRequest("deviceSn is required".to_string()));
        }
        let plant_id = self.plant_id_or_current(None).await?;
        let response = self
            .call(|api| async move { api::set_device_ms_type(&api, master_sn, plant_id).await })
            .await?;
        tokio::time::sleep(SETTLE).await;
        Ok(response)
    }

    pub async fn set_phase_detection(
        &self,
        device_sn: &str,
        datalog_sn: Option<&str>,
        plant_id: Option<PlantId>,
    ) -> Result<Value, Error> {
        self.ensure_ready()?;
        if device_sn.is_empty() {
            return Err(Error::InvalidRequest("deviceSn is required".to_string()));
        }
        let datalog_sn = self.datalog_sn_or_main(datalog_sn).await?;
        let plant_id = self.plant_id_or_current(plant_id).await?;
        let sn = datalog_sn.as_str();
        let response = self
            .call(|api| async move {
                api::set_phase_detection(&api, device_sn, sn, plant_id).await
            })
            .await?;
        tokio::time::sleep(SETTLE).await;
        Ok(response)
    }

    /// Write the AI settings. Read-only fields and nulls are stripped; on success the written
    /// fields are merged into the cached settings so later read-modify-writes see them.
    pub async fn set_ai_settings(&self, data: Map<String, Value>) -> Result<Value, Error> {
        self.ensure_ready()?;
        let clean: Map<String, Value> = data
            .into_iter()
            .filter(|(k, v)| !READONLY_FIELDS.contains(&k.as_str()) && !v.is_null())
            .collect();
        let payload = &clean;
        let response = self
            .call(|api| async move { api::set_ai_settings(&api, payload).await })
            .await?;

        self.slow
            .modify(|data| {
                data.ai_settings
                    .get_or_insert_with(Map::new)
                    .extend(clean.into_iter())
            })
            .await;
        Ok(response)
    }

    /// Read-modify-write of one AI settings field over the cached settings.
    pub async fn write_ai_field(&self, field: &str, value: Value) -> Result<(), Error> {
        let datalog_sn = self
            .main_control_device_id()
            .await
            .ok_or(Error::NoMainControlDevice)?;
        let mut settings = self
            .slow
            .data()
            .await
            .and_then(|d| d.ai_settings)
            .unwrap_or_default();
        settings.insert(field.to_string(), value);
        settings
            .entry("datalogSn")
            .or_insert_with(|| Value::from(datalog_sn));
        self.set_ai_settings(settings).await.map(|_| ())
    }

    /// Write up to sixteen custom-mode slots. A dry run returns the payload without calling the
    /// cloud.
    pub async fn push_schedule(&self, slots: &[Slot], dry_run: bool) -> Result<Value, Error> {
        self.ensure_ready()?;
        let datalog_sn = self.main_control_device_id().await.ok_or_else(|| {
            log::error!("push_schedule: main control device not set");
            Error::NoMainControlDevice
        })?;
        for slot in slots {
            slot.validate()?;
        }
        if slots.len() > schedule::MAX_SLOTS {
            log::warn!(
                "push_schedule: {} slots given, only the first {} are written",
                slots.len(),
                schedule::MAX_SLOTS
            );
        }

        let cached = self
            .slow
            .data()
            .await
            .and_then(|d| d.ai_settings)
            .unwrap_or_default();
        let payload = schedule::build_payload(&cached, READONLY_FIELDS, &datalog_sn, slots);
        let mut fields: Vec<&String> = payload.keys().collect();
        fields.sort();
        log::info!(
            "push_schedule: {} active slot(s), payload fields={:?}",
            slots.len().min(schedule::MAX_SLOTS),
            fields
        );

        if dry_run {
            log::info!("push_schedule dry run payload: {:?}", payload);
            return Ok(json!({"result": 0, "dry_run": true, "payload": payload}));
        }
        let response = self.set_ai_settings(payload).await?;
        log::info!("push_schedule API response: {}", response);
        Ok(response)
    }

    /// Push a schedule and, unless it is a dry run, reload the statistics so entities show the
    /// new settings. Returns the push response and whether the reload succeeded.
    pub async fn push_schedule_and_refresh(
        &self,
        slots: &[Slot],
        dry_run: bool,
    ) -> Result<(Value, Option<bool>), Error> {
        let response = self.push_schedule(slots, dry_run).await?;
        let refreshed = if dry_run {
            None
        } else {
            Some(self.refresh_slow().await)
        };
        Ok((response, refreshed))
    }

    /// Toggle smart link mode. Third-party main devices take it through custom params.
    pub async fn set_ai_link_mode(&self, datalog_sn: &str, flag: u8) -> Result<Value, Error> {
        self.ensure_ready()?;
        if datalog_sn.is_empty() {
            return Err(Error::InvalidRequest("datalogSn is required".to_string()));
        }
        let device = self
            .slow
            .data()
            .await
            .and_then(|d| {
                d.device_list
                    .into_iter()
                    .find(|d| d.datalog_sn.as_deref() == Some(datalog_sn))
            });

        let response = match device {
            Some(device) if device.is_third == Some(1) => {
                let device_type = device.device_type.unwrap_or_else(|| Value::from(""));
                let device_type = &device_type;
                self.call(|api| async move {
                    api::set_ai_mode_with_third(&api, device_type, datalog_sn, flag).await
                })
                .await?
            }
            _ => {
                self.call(|api| async move { api::set_ai_mode(&api, datalog_sn, flag).await })
                    .await?
            }
        };
        tokio::time::sleep(SETTLE).await;
        Ok(response)
    }

    /// Switch a smart socket or EV charger from the device list.
    pub async fn switch(&self, device_sn: &str, on: bool) -> Result<Value, Error> {
        self.ensure_ready()?;
        let device = self
            .slow
            .data()
            .await
            .and_then(|d| d.device(device_sn).cloned())
            .ok_or_else(|| Error::UnknownDevice(device_sn.to_string()))?;
        let start_addr = match device.icon() {
            Some(IconType::Socket) => api::SOCKET_SWITCH_ADDR,
            Some(IconType::Charger) => api::CHARGER_SWITCH_ADDR,
            None => {
                return Err(Error::InvalidRequest(format!(
                    "device {} is not switchable",
                    device_sn
                )))
            }
        };
        let data = if on { 1 } else { 0 };
        self.call(|api| async move { api::set_device_param(&api, device_sn, start_addr, data).await })
            .await
    }

    pub async fn set_device_name(&self, device_sn: &str, device_name: &str) -> Result<Value, Error> {
        self.ensure_ready()?;
        if device_sn.is_empty() || device_name.is_empty() {
            return Err(Error::InvalidRequest(
                "deviceSn and deviceName are required".to_string(),
            ));
        }
        let response = self
            .call(|api| async move { api::set_device_name(&api, device_sn, device_name).await })
            .await?;
        let name = device_name.to_string();
        self.slow
            .modify(|data| {
                data.device_list
                    .iter_mut()
                    .filter(|d| d.device_sn == device_sn)
                    .for_each(|d| d.device_name = Some(name.clone()))
            })
            .await;
        Ok(response)
    }

    pub async fn set_optimistic(&self, unique_id: &str, value: Optimistic) {
        self.optimistic
            .lock()
            .await
            .insert(unique_id.to_string(), value);
    }

    pub async fn clear_optimistic(&self, unique_id: &str) {
        self.optimistic.lock().await.remove(unique_id);
    }

    pub async fn snapshots(&self) -> (Snapshot<RealtimeData>, Snapshot<SlowData>) {
        (self.realtime.snapshot().await, self.slow.snapshot().await)
    }

    /// Current state of every entity.
    pub async fn entities(&self) -> Result<Vec<EntityState>, Error> {
        self.ensure_ready()?;
        let (realtime, slow) = self.snapshots().await;
        let main = self.main_control_device_id().await;
        let optimistic = self.optimistic.lock().await;
        let ctx = entity::Context {
            realtime: &realtime,
            slow: &slow,
            main_control_device_id: main.as_deref(),
            optimistic: &optimistic,
        };
        Ok(entity::all(&ctx))
    }

    pub async fn entity(&self, unique_id: &str) -> Result<EntityState, Error> {
        self.entities()
            .await?
            .into_iter()
            .find(|e| e.unique_id == unique_id)
            .ok_or_else(|| Error::UnknownEntity(unique_id.to_string()))
    }
}

fn api_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
