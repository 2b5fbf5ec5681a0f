use serde::Deserialize;
use serde_json::Value;

/* Items are kept raw; they are enriched with deviceInfo/settingInfo before becoming `model::Device` */
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePage {
    #[serde(default)]
    pub data_list: Vec<Value>,
}
