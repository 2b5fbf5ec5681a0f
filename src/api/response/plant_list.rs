use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantVo {
    pub id: u64,
    #[serde(default)]
    pub plant_name: String,
}
