use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(rename = "type", default = "access_type")]
    pub token_type: String,
}

fn access_type() -> String {
    "access".to_string()
}
