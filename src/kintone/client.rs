// kintone-mirror/src/kintone/client.rs
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{RecordApi, RecordPage};
use crate::config::{KintoneAuth, KintoneConfig};
use crate::errors::{Result, SyncError};

const RECORDS_PATH: &str = "/k/v1/records.json";

/// Error body kintone returns with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// `RecordApi` over the kintone REST API.
pub struct KintoneClient {
    http: Client,
    records_url: Url,
    auth: KintoneAuth,
}

impl KintoneClient {
    pub fn new(config: &KintoneConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let records_url = config.base_url.join(RECORDS_PATH).map_err(|e| {
            SyncError::Config(format!(
                "cannot build records URL from {}: {}",
                config.base_url, e
            ))
        })?;

        Ok(Self {
            http,
            records_url,
            auth: config.auth.clone(),
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            KintoneAuth::ApiToken(token) => builder.header("X-Cybozu-API-Token", token),
            KintoneAuth::Password { login, password } => builder.header(
                "X-Cybozu-Authorization",
                STANDARD.encode(format!("{}:{}", login, password)),
            ),
        }
    }
}

#[async_trait]
impl RecordApi for KintoneClient {
    async fn get_records(&self, app_id: u64, query: &str) -> Result<RecordPage> {
        let request = self.http.get(self.records_url.clone()).query(&[
            ("app", app_id.to_string()),
            ("query", query.to_string()),
            ("totalCount", "true".to_string()),
        ]);

        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let parsed: ApiErrorBody = serde_json::from_slice(&body).unwrap_or_default();
            let message = if parsed.message.is_empty() {
                String::from_utf8_lossy(&body).into_owned()
            } else {
                parsed.message
            };
            return Err(SyncError::Api {
                status: status.as_u16(),
                code: parsed.code,
                message,
            });
        }

        let page: RecordPage = serde_json::from_slice(&body)?;
        debug!(app_id, query, records = page.records.len(), "Fetched record page");
        Ok(page)
    }
}
