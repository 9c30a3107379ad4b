// Wire types for the session endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `/login` and `/create-user`
#[derive(Debug, Clone, Serialize)]
pub struct LoginForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub persistent: bool,
}

/// Successful response envelope: `{"data": ..., "timestamp": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl<T> DataEnvelope<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}

/// Error response body: `{"error": ...}`; the timestamp is not needed
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
