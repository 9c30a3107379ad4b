// Link operations
// Authenticated calls for shortening URLs and listing a user's links

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::DataEnvelope;
use crate::error::{ClientError, Result};
use crate::http_client::{ApiRequest, HttpClient};

const SHORTEN_PATH: &str = "/shorten-link";
const USER_LINKS_PATH: &str = "/get-user-links";

/// Body of `/shorten-link`
#[derive(Debug, Serialize)]
struct ShortenRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

/// A link owned by the logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLink {
    pub code: String,
    pub long_url: String,
    pub short_url: String,
}

/// Shorten and list links; relies on the auth interceptors installed on the client
pub struct LinkService {
    client: Arc<HttpClient>,
}

impl LinkService {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    /// Public URL for a short code: `<base>/link/<code>`
    pub fn short_url(&self, code: &str) -> String {
        format!(
            "{}/link/{}",
            self.client.base_url().as_str().trim_end_matches('/'),
            code
        )
    }

    /// Shorten `url`, optionally asking for a custom `code`; returns the short code
    pub async fn shorten(&self, url: &str, code: Option<&str>) -> Result<String> {
        let code = code.map(str::trim).filter(|c| !c.is_empty());
        tracing::info!(url, code, "Shortening link");

        let request = ApiRequest::post(SHORTEN_PATH).json(&ShortenRequest { url, code })?;
        let response = self.client.send(request).await?;
        let short_code = response.json::<DataEnvelope<String>>()?.into_data();

        if short_code.is_empty() {
            return Err(ClientError::InvalidResponse(
                "Shorten response does not contain a code".to_string(),
            ));
        }
        Ok(short_code)
    }

    /// Links created by the current user
    pub async fn user_links(&self) -> Result<Vec<UserLink>> {
        let response = self.client.send(ApiRequest::get(USER_LINKS_PATH)).await?;
        let pairs = response
            .json::<DataEnvelope<Vec<(String, String)>>>()?
            .into_data();

        tracing::debug!(count = pairs.len(), "Fetched user links");

        Ok(pairs
            .into_iter()
            .map(|(code, long_url)| UserLink {
                short_url: self.short_url(&code),
                code,
                long_url,
            })
            .collect())
    }
}
