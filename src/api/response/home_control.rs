use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeControlDevice {
    #[serde(default)]
    pub datalog_sn: Option<String>,
}
