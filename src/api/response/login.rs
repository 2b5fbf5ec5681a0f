#[derive(Debug, serde::Deserialize)]
pub struct Login {
    pub token: String,
}
