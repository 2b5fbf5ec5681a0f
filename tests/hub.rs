use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use sunpura_ems_rs::api;
use sunpura_ems_rs::entity::{self, EntityState};
use sunpura_ems_rs::hub::{Hub, Refreshed};
use sunpura_ems_rs::model::EnergyPeriod;
use sunpura_ems_rs::schedule::{self, Slot};
use sunpura_ems_rs::Error;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn read_resource(filename: &str) -> Value {
    let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    d.push(format!("resources/test/{}", filename));
    serde_json::from_str(&fs::read_to_string(d.as_path()).unwrap()).unwrap()
}

async fn mount(server: &MockServer, verb: &str, endpoint: &str, fixture: &str) {
    Mock::given(method(verb))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource(fixture)))
        .mount(server)
        .await;
}

/// A cloud answering every call setup and both refreshes make.
async fn mount_cloud(server: &MockServer) {
    mount(server, "POST", "/user/login", "login.json").await;
    mount(server, "GET", "/plant/getPlantVos", "getPlantVos.json").await;
    mount(server, "GET", "/energy/getHomeControlSn/1201", "getHomeControlSn.json").await;
    mount(server, "POST", "/energy/getHomeCountData", "getHomeCountData.json").await;
    mount(server, "POST", "/device/getDevicePage", "getDevicePage.json").await;
    mount(server, "POST", "/device/getDeviceBySn", "getDeviceBySn.json").await;
    mount(server, "GET", "/deviceSetConfig/getSettingInfo", "getSettingInfo.json").await;
    mount(
        server,
        "POST",
        "/aiSystem/getAiSystemBySnWithEnergyMode",
        "getAiSystemBySnWithEnergyMode.json",
    )
    .await;
    mount(server, "POST", "/energy/getEnergyDataMonth", "getEnergyDataMonth.json").await;
    for endpoint in &[
        "/energy/getEnergyDataDay",
        "/energy/getEnergyDataYear",
        "/energy/getEnergyDataTotal",
    ] {
        mount(server, "POST", endpoint, "noData.json").await;
    }
}

async fn mount_json(server: &MockServer, verb: &str, endpoint: &str, body: Value) {
    Mock::given(method(verb))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn ai_settings_with(field: &str, value: Value) -> Value {
    let mut settings = read_resource("getAiSystemBySnWithEnergyMode.json");
    settings["obj"][field] = value;
    settings
}

fn hub(server: &MockServer) -> Hub {
    let api = api::api(
        server.uri(),
        "owner@example.com".to_string(),
        api::md5_hash("password"),
        "nl",
    );
    Hub::new(api, None, Duration::from_secs(30), Duration::from_secs(300))
}

async fn ready_hub(server: &MockServer) -> Hub {
    mount_cloud(server).await;
    let hub = hub(server);
    hub.setup().await.unwrap();
    hub
}

async fn requests_to(server: &MockServer, endpoint: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == endpoint)
        .collect()
}

async fn ai_settings_reads(server: &MockServer) -> usize {
    requests_to(server, "/aiSystem/getAiSystemBySnWithEnergyMode")
        .await
        .len()
}

fn find<'a>(entities: &'a [EntityState], unique_id: &str) -> &'a EntityState {
    entities.iter().find(|e| e.unique_id == unique_id).unwrap()
}

#[tokio::test]
async fn setup_discovers_plant_and_entities() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;

    assert!(hub.is_ready());
    assert_eq!(Some(1201), hub.plant_id().await);
    assert_eq!(Some("DL2400A0001".to_string()), hub.main_control_device_id().await);
    assert_eq!(2, hub.plants().await.len());

    let login = &requests_to(&server, "/user/login").await[0];
    let body: Value = login.body_json().unwrap();
    assert_eq!(json!("owner@example.com"), body["email"]);
    assert_eq!(json!("5f4dcc3b5aa765d61d8327deb882cf99"), body["password"]);
    assert_eq!(json!(1), body["phoneOs"]);

    let entities = hub.entities().await.unwrap();
    assert_eq!(Some(112.0), find(&entities, "ha_ems_solarPower").numeric());
    assert_eq!(Some(42.7), find(&entities, "ha_ems_month_solarTotal").numeric());
    assert!(!find(&entities, "ha_ems_year_solarTotal").available);
    assert_eq!(json!(true), find(&entities, "ha_ems_device_SOCK0001").state);
    assert_eq!(json!("Smart"), find(&entities, "ha_ems_energy_mode").state);
}

#[tokio::test]
async fn requests_carry_session_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plant/getPlantVos"))
        .and(header("token", "a1b2c3d4e5"))
        .and(header("projectType", "1"))
        .and(header("Accept-Language", "nl-NL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("getPlantVos.json")))
        .expect(1)
        .mount(&server)
        .await;
    mount_cloud(&server).await;

    hub(&server).setup().await.unwrap();
}

#[tokio::test]
async fn token_expired_logs_in_again_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plant/getPlantVos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("tokenExpired.json")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_cloud(&server).await;

    let hub = hub(&server);
    hub.setup().await.unwrap();

    assert_eq!(2, requests_to(&server, "/user/login").await.len());
    assert_eq!(2, requests_to(&server, "/plant/getPlantVos").await.len());
    assert_eq!(Some(1201), hub.plant_id().await);
}

#[tokio::test]
async fn rejected_login_is_not_ready() {
    let server = MockServer::start().await;
    mount(&server, "POST", "/user/login", "login_failed.json").await;

    let hub = hub(&server);
    match hub.setup().await {
        Err(Error::LoginError(msg)) => assert_eq!("Incorrect username or password", msg),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!hub.is_ready());
    assert!(matches!(hub.entities().await, Err(Error::NotReady)));
}

#[tokio::test]
async fn failed_realtime_refresh_makes_sensors_unavailable() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/energy/getHomeCountData"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(!hub.refresh_realtime().await);
    let entities = hub.entities().await.unwrap();
    let solar = find(&entities, "ha_ems_solarPower");
    assert!(!solar.available);
    assert!(find(&entities, "ha_ems_month_solarTotal").available);
}

#[tokio::test]
async fn ai_switch_writes_cleaned_settings() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;

    entity::turn(&hub, "ha_ems_ai_antiRefluxSet", true)
        .await
        .unwrap();

    let write = &requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode").await[0];
    let body: Value = write.body_json().unwrap();
    assert_eq!(json!(1), body["antiRefluxSet"]);
    assert_eq!(json!(2000), body["maxChargePower"]);
    assert_eq!(json!("DL2400A0001"), body["datalogSn"]);
    for field in &["id", "sn", "createTime", "updateTime", "currentPower", "modeStr", "controlTime17"] {
        assert!(body.get(field).is_none(), "{} must not be written", field);
    }

    /* the cached settings follow the write until the next refresh */
    let entities = hub.entities().await.unwrap();
    assert_eq!(json!(true), find(&entities, "ha_ems_ai_antiRefluxSet").state);
    let cached = hub.slow().data().await.unwrap().ai_settings.unwrap();
    assert_eq!(json!(1), cached["antiRefluxSet"]);
}

#[tokio::test]
async fn rejected_write_drops_optimistic_state() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "noData.json").await;

    let result = entity::set_value(&hub, "ha_ems_ai_maxFeedPower", 600.0).await;
    assert!(matches!(result, Err(Error::ApiError(_))));

    let entities = hub.entities().await.unwrap();
    assert_eq!(Some(800.0), find(&entities, "ha_ems_ai_maxFeedPower").numeric());
}

#[tokio::test]
async fn out_of_range_number_is_rejected() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;

    let result = entity::set_value(&hub, "ha_ems_ai_maxChargePower", 5000.0).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
    assert!(requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode")
        .await
        .is_empty());
}

#[tokio::test]
async fn socket_switch_writes_device_param() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    Mock::given(method("POST"))
        .and(path("/device/setDeviceParam"))
        .and(query_param("deviceSn", "SOCK0001"))
        .and(query_param("startAddr", "0"))
        .and(query_param("data", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("success.json")))
        .expect(1)
        .mount(&server)
        .await;

    entity::turn(&hub, "ha_ems_device_SOCK0001", false)
        .await
        .unwrap();
    let entities = hub.entities().await.unwrap();
    assert_eq!(json!(false), find(&entities, "ha_ems_device_SOCK0001").state);
}

#[tokio::test]
async fn charger_switch_uses_charger_register() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    Mock::given(method("POST"))
        .and(path("/device/setDeviceParam"))
        .and(query_param("deviceSn", "EVC0001"))
        .and(query_param("startAddr", "175"))
        .and(query_param("data", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("success.json")))
        .expect(1)
        .mount(&server)
        .await;

    hub.switch("EVC0001", true).await.unwrap();
    assert!(matches!(
        hub.switch("BAT0001", true).await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        hub.switch("NOPE", true).await,
        Err(Error::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn smart_link_mode_uses_datalog_command() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    Mock::given(method("POST"))
        .and(path("/datalog/setDataLogCmd"))
        .and(query_param("datalogSn", "DL2400A0001"))
        .and(query_param("params", "98"))
        .and(query_param("values", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("success.json")))
        .expect(1)
        .mount(&server)
        .await;

    entity::turn(&hub, "ha_ems_smart_link_mode", false)
        .await
        .unwrap();
    let entities = hub.entities().await.unwrap();
    assert_eq!(json!(false), find(&entities, "ha_ems_smart_link_mode").state);
}

#[tokio::test]
async fn select_option_writes_mode_and_refreshes() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;
    let before = requests_to(&server, "/aiSystem/getAiSystemBySnWithEnergyMode")
        .await
        .len();

    entity::select_option(&hub, "ha_ems_energy_mode", "Time of Use")
        .await
        .unwrap();

    let write = &requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode").await[0];
    assert_eq!(json!(3), write.body_json::<Value>().unwrap()["energyMode"]);
    assert_eq!(
        before + 1,
        requests_to(&server, "/aiSystem/getAiSystemBySnWithEnergyMode")
            .await
            .len()
    );

    assert!(matches!(
        entity::select_option(&hub, "ha_ems_energy_mode", "Turbo").await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn push_schedule_dry_run_skips_the_cloud() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    let slots = vec![Slot {
        start: "01:00".to_string(),
        end: "05:00".to_string(),
        power_w: -2200,
        ..Slot::default()
    }];

    let response = hub.push_schedule(&slots, true).await.unwrap();
    assert_eq!(json!(true), response["dry_run"]);
    let payload = &response["payload"];
    assert_eq!(json!(2), payload["energyMode"]);
    assert_eq!(json!("1,01:00,05:00,-2200,0,6,0,0,0,100,10"), payload["controlTime1"]);
    assert_eq!(json!(schedule::EMPTY_SLOT), payload["controlTime16"]);
    assert!(payload.get("id").is_none());
    assert!(requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode")
        .await
        .is_empty());
}

#[tokio::test]
async fn switch_plant_looks_up_main_control_device() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    Mock::given(method("GET"))
        .and(path("/energy/getHomeControlSn/1202"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": 0, "obj": []})))
        .mount(&server)
        .await;

    hub.switch_plant(1202).await.unwrap();
    assert_eq!(Some(1202), hub.plant_id().await);
    assert_eq!(None, hub.main_control_device_id().await);

    let entities = hub.entities().await.unwrap();
    assert!(entities.iter().all(|e| e.unique_id != "ha_ems_energy_mode"));
}

#[tokio::test]
async fn manual_refresh_reports_each_coordinator() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/energy/getHomeCountData"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_cloud(&server).await;

    let refreshed = hub.refresh().await.unwrap();
    assert_eq!(
        Refreshed {
            realtime: false,
            slow: true
        },
        refreshed
    );
    assert!(matches!(refreshed.into_result(), Err(Error::ApiError(_))));
}

#[tokio::test]
async fn third_party_main_device_links_through_custom_params() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "POST",
        "/device/getDevicePage",
        json!({"result": 0, "msg": "success", "obj": {"total": 1, "dataList": [
            {"deviceSn": "DL2400A0001", "datalogSn": "DL2400A0001", "deviceType": 85,
             "iconType": 1, "isThird": 1}
        ]}}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/device/setCustomParams"))
        .and(body_json(json!({
            "deviceType": 85,
            "deviceSn": "DL2400A0001",
            "object": {"linkage": 1}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("success.json")))
        .expect(1)
        .mount(&server)
        .await;
    let hub = ready_hub(&server).await;

    entity::turn(&hub, "ha_ems_smart_link_mode", true)
        .await
        .unwrap();
    assert!(requests_to(&server, "/datalog/setDataLogCmd").await.is_empty());
}

#[tokio::test]
async fn refused_device_page_keeps_previous_list() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    server.reset().await;
    mount(&server, "POST", "/device/getDevicePage", "noData.json").await;
    mount_cloud(&server).await;

    assert!(hub.refresh_slow().await);
    let devices = hub.slow().data().await.unwrap().device_list;
    assert_eq!(3, devices.len());
    assert!(requests_to(&server, "/device/getDeviceBySn").await.is_empty());
}

#[tokio::test]
async fn devices_without_details_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device/getDeviceBySn"))
        .and(query_param("sn", "EVC0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("noData.json")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/deviceSetConfig/getSettingInfo"))
        .and(query_param("deviceSn", "SOCK0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("noData.json")))
        .mount(&server)
        .await;
    let hub = ready_hub(&server).await;

    let devices = hub.slow().data().await.unwrap().device_list;
    let serials: Vec<&str> = devices.iter().map(|d| d.device_sn.as_str()).collect();
    assert_eq!(vec!["BAT0001"], serials);

    let entities = hub.entities().await.unwrap();
    assert!(entities
        .iter()
        .all(|e| !e.unique_id.starts_with("ha_ems_device_")));
}

#[tokio::test]
async fn push_schedule_writes_and_updates_cached_settings() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;
    let slot = Slot {
        start: "17:00".to_string(),
        end: "20:00".to_string(),
        power_w: 800,
        ..Slot::default()
    };

    hub.push_schedule(&[slot.clone()], false).await.unwrap();

    let write = &requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode").await[0];
    let body: Value = write.body_json().unwrap();
    assert_eq!(json!(2), body["energyMode"]);
    assert_eq!(json!(slot.encode()), body["controlTime1"]);
    assert_eq!(json!(schedule::EMPTY_SLOT), body["controlTime2"]);
    assert!(body.get("id").is_none());

    let cached = hub.slow().data().await.unwrap().ai_settings.unwrap();
    assert_eq!(json!(slot.encode()), cached["controlTime1"]);
    assert_eq!(json!(2), cached["energyMode"]);
    /* read-only fields stay in the cache, they are only kept out of writes */
    assert_eq!(json!(77), cached["id"]);
}

#[tokio::test]
async fn pushed_schedule_reloads_statistics() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;
    let before = ai_settings_reads(&server).await;

    let (_, refreshed) = hub
        .push_schedule_and_refresh(&[Slot::default()], true)
        .await
        .unwrap();
    assert_eq!(None, refreshed);
    assert_eq!(before, ai_settings_reads(&server).await);

    let (_, refreshed) = hub
        .push_schedule_and_refresh(&[Slot::default()], false)
        .await
        .unwrap();
    assert_eq!(Some(true), refreshed);
    assert_eq!(before + 1, ai_settings_reads(&server).await);
}

#[tokio::test]
async fn expired_token_on_write_logs_in_again() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/aiSystem/setAiSystemTimesWithEnergyMode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("tokenExpired.json")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;
    let hub = ready_hub(&server).await;

    entity::turn(&hub, "ha_ems_ai_ctEnable", false)
        .await
        .unwrap();

    assert_eq!(2, requests_to(&server, "/user/login").await.len());
    assert_eq!(
        2,
        requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode")
            .await
            .len()
    );
    let entities = hub.entities().await.unwrap();
    assert_eq!(json!(false), find(&entities, "ha_ems_ai_ctEnable").state);
}

#[tokio::test]
async fn fractional_setpoint_settles_on_stored_value() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setAiSystemTimesWithEnergyMode", "success.json").await;

    entity::set_value(&hub, "ha_ems_ai_maxChargePower", 605.5)
        .await
        .unwrap();
    let write = &requests_to(&server, "/aiSystem/setAiSystemTimesWithEnergyMode").await[0];
    assert_eq!(json!(605), write.body_json::<Value>().unwrap()["maxChargePower"]);

    /* the cloud confirms the stored integer */
    server.reset().await;
    mount_json(
        &server,
        "POST",
        "/aiSystem/getAiSystemBySnWithEnergyMode",
        ai_settings_with("maxChargePower", json!(605)),
    )
    .await;
    mount_cloud(&server).await;
    assert!(hub.refresh_slow().await);

    /* a later change made elsewhere shows up */
    server.reset().await;
    mount_json(
        &server,
        "POST",
        "/aiSystem/getAiSystemBySnWithEnergyMode",
        ai_settings_with("maxChargePower", json!(700)),
    )
    .await;
    mount_cloud(&server).await;
    assert!(hub.refresh_slow().await);

    let entities = hub.entities().await.unwrap();
    assert_eq!(Some(700.0), find(&entities, "ha_ems_ai_maxChargePower").numeric());
}

#[tokio::test]
async fn raw_ai_settings_read_uses_requested_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/aiSystem/getAiSystemBySnWithEnergyMode"))
        .and(query_param("datalogSn", "DL9"))
        .and(query_param("energyMode", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_resource("noData.json")))
        .expect(1)
        .mount(&server)
        .await;
    let hub = ready_hub(&server).await;

    assert_eq!(Value::Null, hub.ai_settings(Some("DL9"), 2).await.unwrap());
    let settings = hub.ai_settings(None, 0).await.unwrap();
    assert_eq!(json!(2000), settings["maxChargePower"]);
}

#[tokio::test]
async fn energy_data_for_another_plant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/energy/getEnergyDataMonth"))
        .and(query_param("plantId", "1202"))
        .and(query_param("deviceSn", "DL777"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": 0, "msg": "success", "obj": {"solarTotal": "3.5"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let hub = ready_hub(&server).await;

    let month = hub
        .energy_data(EnergyPeriod::Month, Some(1202), "DL777")
        .await
        .unwrap();
    assert_eq!(json!("3.5"), month["solarTotal"]);
    let year = hub.energy_data(EnergyPeriod::Year, None, "").await.unwrap();
    assert!(year.is_empty());
}

#[tokio::test]
async fn device_services_default_to_current_plant_and_main_device() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    let success = || ResponseTemplate::new(200).set_body_json(read_resource("success.json"));
    Mock::given(method("GET"))
        .and(path("/aiSystem/getSmartDeviceList"))
        .and(query_param("plantId", "1201"))
        .and(query_param("datalogSn", "DL2400A0001"))
        .respond_with(success())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/aiSystem/setSmartSocketMode"))
        .and(query_param("datalogSn", "DL2400A0001"))
        .and(query_param("smartSocketMode", "2"))
        .and(query_param("batBasicDisChargePower", "300"))
        .and(query_param("basicDisChargeEnable", "1"))
        .respond_with(success())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/aiSystem/checkZeroFeed"))
        .and(query_param("datalogSn", "DL2400A0001"))
        .and(query_param("plantId", "1201"))
        .and(query_param("powerMode", "1"))
        .and(query_param("aiMode", "0"))
        .respond_with(success())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device/setDeviceMsType"))
        .and(query_param("masterSn", "BAT0001"))
        .and(query_param("plantId", "1201"))
        .respond_with(success())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device/setPhaseDetection"))
        .and(query_param("deviceSn", "BAT0001"))
        .and(query_param("datalogSn", "DL2400A0001"))
        .and(query_param("plantId", "1202"))
        .respond_with(success())
        .expect(1)
        .mount(&server)
        .await;

    hub.smart_device_list().await.unwrap();
    hub.set_smart_socket_mode(None, 2, 300, 1).await.unwrap();
    hub.check_zero_feed(None, None, "1", "0").await.unwrap();
    hub.set_master_slave_type("BAT0001").await.unwrap();
    hub.set_phase_detection("BAT0001", None, Some(1202))
        .await
        .unwrap();

    assert!(matches!(
        hub.set_master_slave_type("").await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn rejected_smart_socket_mode_is_an_api_error() {
    let server = MockServer::start().await;
    let hub = ready_hub(&server).await;
    mount(&server, "POST", "/aiSystem/setSmartSocketMode", "noData.json").await;

    assert!(matches!(
        hub.set_smart_socket_mode(Some("DL2400A0001"), 1, 0, 0).await,
        Err(Error::ApiError(_))
    ));
}
