pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
use chrono::NaiveDate;
pub use error::Error;
use md5::{Digest, Md5};
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::RequestBuilder;
use response::device_page::DevicePage;
use response::home_control::HomeControlDevice;
use response::login::Login;
use response::plant_list::PlantVo;
use response::Envelope;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

const TOKEN: &str = "token";
const PROJECT_TYPE: &str = "projectType";
const APPLICATION_JSON: &str = "application/json";

/// Register written by `setDeviceParam` to switch a smart socket.
pub const SOCKET_SWITCH_ADDR: u16 = 0x0000;
/// Register written by `setDeviceParam` to switch an EV charger.
pub const CHARGER_SWITCH_ADDR: u16 = 0x00AF;

/// `params` code of `setDataLogCmd` that toggles smart link mode.
const AI_MODE_PARAM: u32 = 98;

pub fn api(api_url: String, username: String, password: String, language: &str) -> model::Api {
    model::Api {
        api_url,
        username,
        password,
        language: accept_language(language).to_string(),
    }
}

/// Return the lowercase hex MD5 digest the cloud expects in place of the password.
pub fn md5_hash(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// Map a host language tag to the cloud's `Accept-Language` code; unknown tags fall back to
/// `en-US`.
pub fn accept_language(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "zh-hans" => "zh-CN",
        "zh-hant" => "zh-HK",
        "ar" => "ar-QA",
        "de" => "de-DE",
        "en" => "en-US",
        "es" => "es-ES",
        "fr" => "fr-FR",
        "it" => "it-IT",
        "nl" => "nl-NL",
        "ru" => "ru-RU",
        "th" => "th-TH",
        "vi" => "vi-VN",
        _ => "en-US",
    }
}

/// Map Non-2xx API response to Error
fn map_api_err(error: reqwest::Error) -> Error {
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) => Error::LoginError(error.to_string()),
        _ => Error::ApiError(error.to_string()),
    }
}

/// Reject an expired session before the caller looks at the payload, so the hub can log in
/// again and retry.
fn map_token_status(value: Value) -> Result<Value, Error> {
    match response::result_code(&value) {
        Some(response::TOKEN_EXPIRED) => Err(Error::TokenExpired),
        _ => Ok(value),
    }
}

/// Turn a non-zero `result` into an `ApiError` carrying the cloud's message.
pub fn expect_success(value: Value) -> Result<Value, Error> {
    match response::result_code(&value) {
        Some(response::SUCCESS) => Ok(value),
        code => Err(Error::ApiError(format!(
            "Error {}: {}",
            code.map(|c| c.to_string())
                .unwrap_or_else(|| "(no result code)".to_string()),
            value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("(no error message received)")
        ))),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<Envelope<T>, Error> {
    serde_json::from_value::<Envelope<T>>(value).or(Err(Error::UnexpectedApiResponse))
}

fn with_headers(api: &model::LoggedInApi, request: RequestBuilder) -> RequestBuilder {
    request
        .header(CONTENT_TYPE, APPLICATION_JSON)
        .header(ACCEPT_LANGUAGE, api.language.to_owned())
        .header(TOKEN, api.token.to_owned())
        .header(PROJECT_TYPE, "1")
}

async fn send(request: RequestBuilder, endpoint: &endpoint::Endpoint) -> Result<Value, Error> {
    let text = request
        .send()
        .await
        .map_err(map_api_err)?
        .error_for_status()
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

    log::trace!("endpoint: {}, response_text: {}", endpoint, text);

    serde_json::from_str::<Value>(&text)
        .map_err(|e| Error::InvalidResponse(text, e.to_string()))
        .and_then(map_token_status)
}

async fn get(
    api: &model::LoggedInApi,
    endpoint: &endpoint::Endpoint,
    query: &[(&str, String)],
) -> Result<Value, Error> {
    let url = format!("{}{}", api.api_url, endpoint);
    log::trace!("GET {}, query: {:?}", endpoint, query);
    send(with_headers(api, api.client.get(url).query(query)), endpoint).await
}

async fn post(
    api: &model::LoggedInApi,
    endpoint: &endpoint::Endpoint,
    query: &[(&str, String)],
    data: Option<&Value>,
) -> Result<Value, Error> {
    let url = format!("{}{}", api.api_url, endpoint);
    log::trace!("POST {}, query: {:?}, data: {:?}", endpoint, query, data);

    let request = match data {
        Some(data) => api.client.post(url).query(query).json(data),
        None => api.client.post(url).query(query),
    };
    send(with_headers(api, request), endpoint).await
}

pub async fn login(api: &model::Api) -> Result<model::LoggedInApi, Error> {
    let client = reqwest::ClientBuilder::new()
        .build()
        .or(Err(Error::InternalError))?;

    log::debug!("Logging in to {} as {}", api.api_url, api.username);

    let anonymous = model::LoggedInApi {
        api_url: api.api_url.to_owned(),
        token: String::new(),
        language: api.language.to_owned(),
        client,
    };
    let request_body = json!({
        "email": api.username,
        "password": api.password,
        "phoneOs": 1,
        "phoneModel": "1.1",
        "appVersion": "V1.1",
    });

    let response = decode::<Login>(post(&anonymous, endpoint::LOGIN, &[], Some(&request_body)).await?)?;
    if !response.is_success() {
        return Err(Error::LoginError(response.message()));
    }

    response
        .obj
        .ok_or_else(|| Error::LoginError("No token received".to_string()))
        .map(|login| model::LoggedInApi {
            token: login.token,
            ..anonymous
        })
}

/// List all plants of the account.
pub async fn plants(api: &model::LoggedInApi) -> Result<Vec<model::Plant>, Error> {
    let response = decode::<Vec<PlantVo>>(expect_success(get(api, endpoint::PLANTS, &[]).await?)?)?;

    Ok(response
        .obj
        .unwrap_or_default()
        .into_iter()
        .map(|vo| model::Plant {
            id: vo.id,
            name: vo.plant_name,
        })
        .collect())
}

/// Datalogger serials controlling `plant_id`; the first one is the main control device.
pub async fn home_control_devices(
    api: &model::LoggedInApi,
    plant_id: model::PlantId,
) -> Result<Vec<String>, Error> {
    let endpoint = format!("{}/{}", endpoint::HOME_CONTROL_SN, plant_id);
    let response = decode::<Vec<HomeControlDevice>>(get(api, &endpoint, &[]).await?)?;

    Ok(response
        .obj
        .unwrap_or_default()
        .into_iter()
        .filter_map(|device| device.datalog_sn)
        .collect())
}

/// Real-time energy flow of the plant, as the raw `obj` map.
pub async fn home_count_data(
    api: &model::LoggedInApi,
    plant_id: model::PlantId,
    device_sn: &str,
) -> Result<Map<String, Value>, Error> {
    let query = [
        ("plantId", plant_id.to_string()),
        ("deviceSn", device_sn.to_owned()),
    ];

    post(api, endpoint::HOME_COUNT_DATA, &query, None)
        .await
        .and_then(expect_success)
        .map(|value| response::obj_map(&value))
}

/// Energy statistics for `period`; an unsuccessful answer yields an empty map.
pub async fn energy_data(
    api: &model::LoggedInApi,
    period: model::EnergyPeriod,
    plant_id: model::PlantId,
    device_sn: &str,
    today: NaiveDate,
) -> Result<Map<String, Value>, Error> {
    let query = [
        ("plantId", plant_id.to_string()),
        ("time", period.time_param(today)),
        ("deviceSn", device_sn.to_owned()),
    ];

    post(api, endpoint::energy_data(period), &query, None)
        .await
        .map(|value| response::obj_map(&value))
}

/// Raw device page items of `plant_id`, `None` when the cloud refuses the request.
pub async fn device_page(
    api: &model::LoggedInApi,
    plant_id: model::PlantId,
    page_now: u32,
    page_size: u32,
    kind: u32,
) -> Result<Option<Vec<Value>>, Error> {
    let request_body = json!({
        "pageNow": page_now,
        "pageSize": page_size,
        "map": {"plantId": plant_id, "type": kind},
    });

    let response =
        decode::<DevicePage>(post(api, endpoint::DEVICE_PAGE, &[], Some(&request_body)).await?)?;
    if !response.is_success() {
        log::warn!("Device page refused: {}", response.message());
        return Ok(None);
    }
    Ok(Some(
        response.obj.map(|page| page.data_list).unwrap_or_default(),
    ))
}

fn value_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_owned(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Device details by serial number, `None` when the cloud has none.
pub async fn device_by_sn(
    api: &model::LoggedInApi,
    device_type: &Value,
    sn: &str,
    today: NaiveDate,
) -> Result<Option<Map<String, Value>>, Error> {
    let query = [
        ("deviceType", value_param(device_type)),
        ("sn", sn.to_owned()),
        ("time", today.format("%Y-%m-%d").to_string()),
    ];

    post(api, endpoint::DEVICE_BY_SN, &query, None)
        .await
        .map(|value| value.get("obj").and_then(Value::as_object).cloned())
}

/// Setting metadata of a device, `None` unless the cloud reports success.
pub async fn setting_info(
    api: &model::LoggedInApi,
    dtc: &Value,
    device_sn: &str,
    datalog_sn: &str,
) -> Result<Option<Value>, Error> {
    let query = [
        ("dtc", value_param(dtc)),
        ("displayType", "2".to_string()),
        ("deviceSn", device_sn.to_owned()),
        ("datalogSn", datalog_sn.to_owned()),
    ];

    let value = get(api, endpoint::SETTING_INFO, &query).await?;
    match response::result_code(&value) {
        Some(response::SUCCESS) => Ok(Some(value.get("obj").cloned().unwrap_or(Value::Null))),
        _ => Ok(None),
    }
}

/// AI settings of the main control device for `energy_mode`.
pub async fn ai_settings(
    api: &model::LoggedInApi,
    datalog_sn: &str,
    energy_mode: u8,
) -> Result<Option<Map<String, Value>>, Error> {
    let query = [
        ("datalogSn", datalog_sn.to_owned()),
        ("energyMode", energy_mode.to_string()),
    ];

    post(api, endpoint::AI_SETTINGS, &query, None)
        .await
        .map(|value| value.get("obj").and_then(Value::as_object).cloned())
}

pub async fn set_ai_settings(
    api: &model::LoggedInApi,
    settings: &Map<String, Value>,
) -> Result<Value, Error> {
    log::info!(
        "Writing AI settings: {}",
        serde_json::to_string(settings).or(Err(Error::FormatError))?
    );
    post(
        api,
        endpoint::SET_AI_SETTINGS,
        &[],
        Some(&Value::Object(settings.clone())),
    )
    .await
    .and_then(expect_success)
}

pub async fn set_device_param(
    api: &model::LoggedInApi,
    device_sn: &str,
    start_addr: u16,
    data: u8,
) -> Result<Value, Error> {
    let query = [
        ("deviceSn", device_sn.to_owned()),
        ("startAddr", start_addr.to_string()),
        ("data", data.to_string()),
    ];

    let response = post(api, endpoint::SET_DEVICE_PARAM, &query, None)
        .await
        .and_then(expect_success)?;
    log::info!("Switch command response: {}", response);
    Ok(response)
}

pub async fn set_ai_mode(
    api: &model::LoggedInApi,
    datalog_sn: &str,
    flag: u8,
) -> Result<Value, Error> {
    let query = [
        ("datalogSn", datalog_sn.to_owned()),
        ("params", AI_MODE_PARAM.to_string()),
        ("values", flag.to_string()),
    ];

    post(api, endpoint::SET_DATALOG_CMD, &query, None)
        .await
        .and_then(expect_success)
}

pub async fn set_custom_params(api: &model::LoggedInApi, data: &Value) -> Result<Value, Error> {
    post(api, endpoint::SET_CUSTOM_PARAMS, &[], Some(data))
        .await
        .and_then(expect_success)
}

/// Smart link mode for a third-party main device goes through `setCustomParams`.
pub async fn set_ai_mode_with_third(
    api: &model::LoggedInApi,
    device_type: &Value,
    device_sn: &str,
    flag: u8,
) -> Result<Value, Error> {
    let data = json!({
        "deviceType": device_type,
        "deviceSn": device_sn,
        "object": {"linkage": flag},
    });
    set_custom_params(api, &data).await
}

pub async fn set_device_name(
    api: &model::LoggedInApi,
    device_sn: &str,
    device_name: &str,
) -> Result<Value, Error> {
    let query = [
        ("deviceSn", device_sn.to_owned()),
        ("deviceName", device_name.to_owned()),
        ("type", "2".to_string()),
    ];

    post(api, endpoint::UPDATE_DEVICE_NAME, &query, None)
        .await
        .and_then(expect_success)
}

/// Make `master_sn` the master of a master/slave battery group.
pub async fn set_device_ms_type(
    api: &model::LoggedInApi,
    master_sn: &str,
    plant_id: model::PlantId,
) -> Result<Value, Error> {
    let query = [
        ("masterSn", master_sn.to_owned()),
        ("plantId", plant_id.to_string()),
    ];

    post(api, endpoint::SET_DEVICE_MS_TYPE, &query, None)
        .await
        .and_then(expect_success)
}

pub async fn set_phase_detection(
    api: &model::LoggedInApi,
    device_sn: &str,
    datalog_sn: &str,
    plant_id: model::PlantId,
) -> Result<Value, Error> {
    let query = [
        ("deviceSn", device_sn.to_owned()),
        ("datalogSn", datalog_sn.to_owned()),
        ("plantId", plant_id.to_string()),
    ];

    post(api, endpoint::SET_PHASE_DETECTION, &query, None)
        .await
        .and_then(expect_success)
}

/// Smart devices managed by the AI system of `datalog_sn`, as the raw response.
pub async fn smart_device_list(
    api: &model::LoggedInApi,
    plant_id: model::PlantId,
    datalog_sn: &str,
) -> Result<Value, Error> {
    let query = [
        ("plantId", plant_id.to_string()),
        ("datalogSn", datalog_sn.to_owned()),
    ];

    get(api, endpoint::SMART_DEVICE_LIST, &query).await
}

pub async fn set_smart_socket_mode(
    api: &model::LoggedInApi,
    datalog_sn: &str,
    smart_socket_mode: i64,
    bat_basic_dis_charge_power: i64,
    basic_dis_charge_enable: i64,
) -> Result<Value, Error> {
    let query = [
        ("datalogSn", datalog_sn.to_owned()),
        ("smartSocketMode", smart_socket_mode.to_string()),
        ("batBasicDisChargePower", bat_basic_dis_charge_power.to_string()),
        ("basicDisChargeEnable", basic_dis_charge_enable.to_string()),
    ];

    post(api, endpoint::SET_SMART_SOCKET_MODE, &query, None)
        .await
        .and_then(expect_success)
}

/// Ask the cloud whether zero feed-in can be enabled for the given power and AI mode; the raw
/// response is returned.
pub async fn check_zero_feed(
    api: &model::LoggedInApi,
    datalog_sn: &str,
    plant_id: model::PlantId,
    power_mode: &str,
    ai_mode: &str,
) -> Result<Value, Error> {
    let query = [
        ("datalogSn", datalog_sn.to_owned()),
        ("plantId", plant_id.to_string()),
        ("powerMode", power_mode.to_owned()),
        ("aiMode", ai_mode.to_owned()),
    ];

    get(api, endpoint::CHECK_ZERO_FEED, &query).await
}
