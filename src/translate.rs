//! Azure Translator (Text API v3) client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com";
const API_VERSION: &str = "3.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub endpoint: String,
    /// Subscription key; translation is disabled without it.
    pub key: Option<String>,
    /// Resource region, required by regional and multi-service resources.
    pub region: Option<String>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            key: None,
            region: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("translator returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
}

#[derive(Deserialize)]
struct TranslationResult {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

pub struct Translator {
    client: Client,
    endpoint: String,
    key: String,
    region: Option<String>,
}

impl Translator {
    pub fn new(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        region: Option<String>,
    ) -> Result<Self, TranslateError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, endpoint, key, region))
    }

    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        key: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.into(),
            region: region.filter(|r| !r.is_empty()),
        }
    }

    /// `None` when no subscription key is configured.
    pub fn from_config(config: &TranslatorConfig) -> Result<Option<Self>, TranslateError> {
        match config.key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Self::new(config.endpoint.as_str(), key, config.region.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Translate `text` into `to`. A missing or `"auto"` source language lets
    /// the service detect it.
    pub async fn translate(
        &self,
        text: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<String, TranslateError> {
        let mut query = vec![("api-version", API_VERSION), ("to", to)];
        if let Some(from) = from.filter(|f| !f.is_empty() && *f != "auto") {
            query.push(("from", from));
        }

        let mut request = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .query(&query)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .json(&json!([{ "Text": text }]));
        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "translator rejected request");
            return Err(TranslateError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let results: Vec<TranslationResult> = response.json().await?;
        Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.translations.into_iter().next())
            .map(|t| t.text)
            .unwrap_or_default())
    }
}
