#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use chrono::Local;
use config::Config;
use rocket::fairing::AdHoc;
use rocket::serde::json::Json;
use rocket::{Build, Orbit, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use sunpura_ems_rs::coordinator::{RealtimeData, SlowData, Snapshot};
use sunpura_ems_rs::entity::{self, sensor, EntityState};
use sunpura_ems_rs::hub::{Hub, Refreshed};
use sunpura_ems_rs::model::{EnergyMode, EnergyPeriod, PlantId};
use sunpura_ems_rs::schedule::{Slot, Slots};
use sunpura_ems_rs::{api, optimizer, Error};

mod metrics;

const API_URL: &str = "https://server-nj.ai-ec.cloud:8443";

#[derive(Clone, Deserialize)]
pub struct EmsConfig {
    api_url: String,
    username: String,
    password: String,
    /// `password` already holds the MD5 digest.
    password_hashed: bool,
    plant_id: Option<PlantId>,
    language: String,
    realtime_interval: u64,
    statistics_interval: u64,
    setup_retry: u64,
}

/// Structure containing state for API handlers.
pub struct StateData {
    hub: Arc<Hub>,
    setup_retry: Duration,
}

pub fn read_settings() -> EmsConfig {
    let mut settings = Config::default();
    settings
        .merge(config::File::with_name("ems").required(false))
        .unwrap()
        .merge(config::Environment::with_prefix("EMS"))
        .unwrap()
        .set_default("api_url", API_URL)
        .unwrap()
        .set_default("password_hashed", false)
        .unwrap()
        .set_default("language", "en")
        .unwrap()
        .set_default("realtime_interval", 30i64)
        .unwrap()
        .set_default("statistics_interval", 300i64)
        .unwrap()
        .set_default("setup_retry", 60i64)
        .unwrap();

    settings.try_into().expect("Configuration error")
}

#[derive(Serialize)]
struct Health {
    ready: bool,
    plant_id: Option<PlantId>,
    main_control_device_id: Option<String>,
    realtime: Snapshot<RealtimeData>,
    slow: Snapshot<SlowData>,
}

#[get("/health")]
async fn health_route(state: &State<StateData>) -> Json<Health> {
    let (realtime, slow) = state.hub.snapshots().await;
    Json(Health {
        ready: state.hub.is_ready(),
        plant_id: state.hub.plant_id().await,
        main_control_device_id: state.hub.main_control_device_id().await,
        realtime,
        slow,
    })
}

#[get("/plants")]
async fn plants_route(state: &State<StateData>) -> Json<Value> {
    Json(json!({
        "plant_id": state.hub.plant_id().await,
        "plants": state.hub.plants().await,
    }))
}

#[get("/entities")]
async fn entities_route(state: &State<StateData>) -> Result<Json<Vec<EntityState>>, Error> {
    state.hub.entities().await.map(Json)
}

#[get("/entities/<unique_id>")]
async fn entity_route(
    state: &State<StateData>,
    unique_id: &str,
) -> Result<Json<EntityState>, Error> {
    state.hub.entity(unique_id).await.map(Json)
}

#[post("/entities/<unique_id>/turn_on")]
async fn turn_on_route(
    state: &State<StateData>,
    unique_id: &str,
) -> Result<Json<EntityState>, Error> {
    entity::turn(&state.hub, unique_id, true).await?;
    state.hub.entity(unique_id).await.map(Json)
}

#[post("/entities/<unique_id>/turn_off")]
async fn turn_off_route(
    state: &State<StateData>,
    unique_id: &str,
) -> Result<Json<EntityState>, Error> {
    entity::turn(&state.hub, unique_id, false).await?;
    state.hub.entity(unique_id).await.map(Json)
}

#[derive(Deserialize)]
struct SetValue {
    value: f64,
}

#[post("/entities/<unique_id>/set_value", data = "<body>")]
async fn set_value_route(
    state: &State<StateData>,
    unique_id: &str,
    body: Json<SetValue>,
) -> Result<Json<EntityState>, Error> {
    entity::set_value(&state.hub, unique_id, body.value).await?;
    state.hub.entity(unique_id).await.map(Json)
}

#[derive(Deserialize)]
struct SelectOption {
    option: String,
}

#[post("/entities/<unique_id>/select_option", data = "<body>")]
async fn select_option_route(
    state: &State<StateData>,
    unique_id: &str,
    body: Json<SelectOption>,
) -> Result<Json<EntityState>, Error> {
    entity::select_option(&state.hub, unique_id, &body.option).await?;
    state.hub.entity(unique_id).await.map(Json)
}

#[derive(Deserialize)]
struct ScheduleRequest {
    #[serde(default)]
    slots: Slots,
    #[serde(default)]
    dry_run: bool,
}

#[post("/schedule", data = "<body>")]
async fn schedule_route(
    state: &State<StateData>,
    body: Json<ScheduleRequest>,
) -> Result<Json<Value>, Error> {
    let request = body.into_inner();
    let slots = request.slots.into_vec()?;
    push_schedule(&state.hub, &slots, request.dry_run)
        .await
        .map(Json)
}

#[post("/optimize", data = "<body>")]
async fn optimize_route(
    state: &State<StateData>,
    body: Json<optimizer::Request>,
) -> Result<Json<Value>, Error> {
    let request = body.into_inner();
    let (push, dry_run) = (request.push, request.dry_run);

    let (realtime, slow) = state.hub.snapshots().await;
    let battery_soc = realtime
        .available()
        .and_then(|d| d.home_count.get("batSoc"))
        .and_then(sensor::parse_value);
    let ai_settings = slow.data.as_ref().and_then(|d| d.ai_settings.as_ref());

    let inputs = request.resolve(ai_settings, battery_soc, Local::now().time());
    let slots = optimizer::optimize(&inputs);

    let response = if push && !slots.is_empty() {
        Some(push_schedule(&state.hub, &slots, dry_run).await?)
    } else {
        None
    };
    Ok(Json(json!({ "slots": slots, "response": response })))
}

#[post("/refresh")]
async fn refresh_route(state: &State<StateData>) -> Result<Json<Refreshed>, Error> {
    let refreshed = state.hub.refresh().await?;
    record_refreshes(&state.hub, refreshed.realtime, refreshed.slow);
    refreshed.into_result()?;
    Ok(Json(refreshed))
}

#[post("/plant/<plant_id>")]
async fn switch_plant_route(
    state: &State<StateData>,
    plant_id: PlantId,
) -> Result<Json<Value>, Error> {
    let refreshed = state.hub.switch_plant(plant_id).await?;
    record_refreshes(&state.hub, refreshed.realtime, refreshed.slow);
    refreshed.into_result()?;
    Ok(Json(json!({
        "plant_id": plant_id,
        "main_control_device_id": state.hub.main_control_device_id().await,
    })))
}

#[get("/ai_settings?<datalog_sn>&<energy_mode>")]
async fn ai_settings_route(
    state: &State<StateData>,
    datalog_sn: Option<&str>,
    energy_mode: Option<u8>,
) -> Result<Json<Value>, Error> {
    state
        .hub
        .ai_settings(datalog_sn, energy_mode.unwrap_or(EnergyMode::General as u8))
        .await
        .map(Json)
}

#[post("/ai_settings", data = "<body>")]
async fn set_ai_settings_route(
    state: &State<StateData>,
    body: Json<Map<String, Value>>,
) -> Result<Json<Value>, Error> {
    state.hub.set_ai_settings(body.into_inner()).await.map(Json)
}

#[get("/energy/<period>?<plant_id>&<sn>")]
async fn energy_data_route(
    state: &State<StateData>,
    period: &str,
    plant_id: Option<PlantId>,
    sn: Option<&str>,
) -> Result<Json<Map<String, Value>>, Error> {
    let period = EnergyPeriod::from_name(period)
        .ok_or_else(|| Error::InvalidRequest(format!("unknown period: {}", period)))?;
    state
        .hub
        .energy_data(period, plant_id, sn.unwrap_or_default())
        .await
        .map(Json)
}

#[get("/smart_devices")]
async fn smart_devices_route(state: &State<StateData>) -> Result<Json<Value>, Error> {
    state.hub.smart_device_list().await.map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartSocketMode {
    datalog_sn: Option<String>,
    smart_socket_mode: i64,
    #[serde(default)]
    bat_basic_dis_charge_power: i64,
    #[serde(default)]
    basic_dis_charge_enable: i64,
}

#[post("/smart_socket_mode", data = "<body>")]
async fn smart_socket_mode_route(
    state: &State<StateData>,
    body: Json<SmartSocketMode>,
) -> Result<Json<Value>, Error> {
    state
        .hub
        .set_smart_socket_mode(
            body.datalog_sn.as_deref(),
            body.smart_socket_mode,
            body.bat_basic_dis_charge_power,
            body.basic_dis_charge_enable,
        )
        .await
        .map(Json)
}

#[get("/zero_feed?<datalog_sn>&<plant_id>&<power_mode>&<ai_mode>")]
async fn zero_feed_route(
    state: &State<StateData>,
    datalog_sn: Option<&str>,
    plant_id: Option<PlantId>,
    power_mode: &str,
    ai_mode: &str,
) -> Result<Json<Value>, Error> {
    state
        .hub
        .check_zero_feed(datalog_sn, plant_id, power_mode, ai_mode)
        .await
        .map(Json)
}

#[post("/devices/<device_sn>/master")]
async fn master_device_route(
    state: &State<StateData>,
    device_sn: &str,
) -> Result<Json<Value>, Error> {
    state.hub.set_master_slave_type(device_sn).await.map(Json)
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PhaseDetection {
    datalog_sn: Option<String>,
    plant_id: Option<PlantId>,
}

#[post("/devices/<device_sn>/phase_detection", data = "<body>")]
async fn phase_detection_route(
    state: &State<StateData>,
    device_sn: &str,
    body: Option<Json<PhaseDetection>>,
) -> Result<Json<Value>, Error> {
    let body = body.map(Json::into_inner).unwrap_or_default();
    state
        .hub
        .set_phase_detection(device_sn, body.datalog_sn.as_deref(), body.plant_id)
        .await
        .map(Json)
}

#[derive(Deserialize)]
struct DeviceName {
    name: String,
}

#[post("/devices/<device_sn>/name", data = "<body>")]
async fn device_name_route(
    state: &State<StateData>,
    device_sn: &str,
    body: Json<DeviceName>,
) -> Result<Json<Value>, Error> {
    state
        .hub
        .set_device_name(device_sn, &body.name)
        .await
        .map(Json)
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, Error> {
    match state.hub.entities().await {
        Ok(entities) => metrics::collect(&entities),
        Err(e) => log::debug!("no entity metrics yet: {}", e),
    }
    metrics::read().await
}

/// Push a schedule; a real push reloads the statistics and records the outcome.
async fn push_schedule(hub: &Hub, slots: &[Slot], dry_run: bool) -> Result<Value, Error> {
    let (response, refreshed) = hub.push_schedule_and_refresh(slots, dry_run).await?;
    if let Some(success) = refreshed {
        metrics::record_refresh(hub.slow().name(), success);
    }
    Ok(response)
}

fn record_refreshes(hub: &Hub, realtime: bool, slow: bool) {
    metrics::record_refresh(hub.realtime().name(), realtime);
    metrics::record_refresh(hub.slow().name(), slow);
}

/// Retry setup until the cloud answers, then keep both coordinators polling.
async fn supervise(hub: Arc<Hub>, setup_retry: Duration) {
    loop {
        match hub.setup().await {
            Ok(()) => break,
            Err(e) => {
                log::warn!(
                    "Cannot connect to cloud: {}; retrying in {}s",
                    e,
                    setup_retry.as_secs()
                );
                record_refreshes(&hub, false, false);
                tokio::time::sleep(setup_retry).await;
            }
        }
    }
    log::info!("Setup complete");
    record_refreshes(&hub, true, true);

    let realtime_hub = hub.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(realtime_hub.realtime().interval());
        /* the first tick fires immediately; setup just refreshed */
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let success = realtime_hub.refresh_realtime().await;
            metrics::record_refresh(realtime_hub.realtime().name(), success);
        }
    });

    let mut ticker = tokio::time::interval(hub.slow().interval());
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let success = hub.refresh_slow().await;
        metrics::record_refresh(hub.slow().name(), success);
    }
}

fn start_pollers(rocket: &Rocket<Orbit>) {
    match rocket.state::<StateData>() {
        Some(state) => {
            tokio::spawn(supervise(state.hub.clone(), state.setup_retry));
        }
        None => log::error!("State not managed, pollers not started"),
    }
}

#[launch]
fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = read_settings();
    let password = if settings.password_hashed {
        settings.password
    } else {
        api::md5_hash(&settings.password)
    };
    let api = api::api(
        settings.api_url,
        settings.username,
        password,
        &settings.language,
    );
    let hub = Hub::new(
        api,
        settings.plant_id,
        Duration::from_secs(settings.realtime_interval),
        Duration::from_secs(settings.statistics_interval),
    );
    let state = StateData {
        hub: Arc::new(hub),
        setup_retry: Duration::from_secs(settings.setup_retry),
    };

    rocket::build()
        .manage(state)
        .attach(AdHoc::on_liftoff("Cloud pollers", |rocket| {
            start_pollers(rocket);
            Box::pin(async {})
        }))
        .mount(
            "/",
            routes![
                health_route,
                plants_route,
                entities_route,
                entity_route,
                turn_on_route,
                turn_off_route,
                set_value_route,
                select_option_route,
                schedule_route,
                optimize_route,
                refresh_route,
                switch_plant_route,
                device_name_route,
                ai_settings_route,
                set_ai_settings_route,
                energy_data_route,
                smart_devices_route,
                smart_socket_mode_route,
                zero_feed_route,
                master_device_route,
                phase_detection_route,
                metrics_route
            ],
        )
}
