use crate::model::EnergyPeriod;

pub type Endpoint = str;

pub const LOGIN: &Endpoint = "/user/login";
pub const PLANTS: &Endpoint = "/plant/getPlantVos";
pub const HOME_CONTROL_SN: &Endpoint = "/energy/getHomeControlSn";
pub const HOME_COUNT_DATA: &Endpoint = "/energy/getHomeCountData";
pub const DEVICE_PAGE: &Endpoint = "/device/getDevicePage";
pub const DEVICE_BY_SN: &Endpoint = "/device/getDeviceBySn";
pub const SETTING_INFO: &Endpoint = "/deviceSetConfig/getSettingInfo";
pub const AI_SETTINGS: &Endpoint = "/aiSystem/getAiSystemBySnWithEnergyMode";
pub const SET_AI_SETTINGS: &Endpoint = "/aiSystem/setAiSystemTimesWithEnergyMode";
pub const SET_DEVICE_PARAM: &Endpoint = "/device/setDeviceParam";
pub const SET_DATALOG_CMD: &Endpoint = "/datalog/setDataLogCmd";
pub const SET_CUSTOM_PARAMS: &Endpoint = "/device/setCustomParams";
pub const UPDATE_DEVICE_NAME: &Endpoint = "/device/updateDeviceName";
pub const SET_DEVICE_MS_TYPE: &Endpoint = "/device/setDeviceMsType";
pub const SET_PHASE_DETECTION: &Endpoint = "/device/setPhaseDetection";
pub const SMART_DEVICE_LIST: &Endpoint = "/aiSystem/getSmartDeviceList";
pub const SET_SMART_SOCKET_MODE: &Endpoint = "/aiSystem/setSmartSocketMode";
pub const CHECK_ZERO_FEED: &Endpoint = "/aiSystem/checkZeroFeed";

pub fn energy_data(period: EnergyPeriod) -> &'static Endpoint {
    match period {
        EnergyPeriod::Hour => "/energy/getEnergyDataHour",
        EnergyPeriod::Day => "/energy/getEnergyDataDay",
        EnergyPeriod::Month => "/energy/getEnergyDataMonth",
        EnergyPeriod::Year => "/energy/getEnergyDataYear",
        EnergyPeriod::Total => "/energy/getEnergyDataTotal",
    }
}
