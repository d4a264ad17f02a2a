use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::TranslationError;

const TRANSLATE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

#[derive(Debug, Clone)]
pub struct Translator {
    client: Client,
    endpoint: String,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(TRANSLATE_ENDPOINT)
    }
}

impl Translator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub async fn try_translate(&self, text: &str, target: &str) -> Result<String, TranslationError> {
        let data: Value = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        extract_translation(&data).ok_or(TranslationError::Shape)
    }

    /// Translates `text` into `target`, returning the input unchanged on any
    /// failure.
    pub async fn translate(&self, text: &str, target: &str) -> String {
        match self.try_translate(text, target).await {
            Ok(translated) => {
                info!(%translated, "Translated");
                translated
            }
            Err(e) => {
                warn!("Translation failed, keeping original text: {}", e);
                text.to_string()
            }
        }
    }
}

/// The service answers with nested arrays; the translation is `[0][0][0]`.
pub fn extract_translation(data: &Value) -> Option<String> {
    data.get(0)?.get(0)?.get(0)?.as_str().map(str::to_string)
}
