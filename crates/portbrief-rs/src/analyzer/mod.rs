use std::{sync::Arc, time::Duration};

use anyhow::Context;
use askama::Template;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::{AnalyzerBackend, AppConfig},
    models::RawScanResult,
};

/// Generative-model capability: turns a scan into free-form report text.
/// The text is untrusted and goes through the normalizer before use.
#[async_trait::async_trait]
pub trait NarrativeAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn analyze(&self, domain: &str, scan: &RawScanResult) -> anyhow::Result<String>;
}

#[derive(Template)]
#[template(path = "analysis_prompt.txt", escape = "none")]
struct AnalysisPrompt<'a> {
    domain: &'a str,
    scan_json: &'a str,
}

pub fn build_prompt(domain: &str, scan: &RawScanResult) -> anyhow::Result<String> {
    let scan_json = serde_json::to_string_pretty(scan)?;
    Ok(AnalysisPrompt {
        domain,
        scan_json: &scan_json,
    }
    .render()?)
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default()
    }
}

pub struct GeminiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

#[async_trait::async_trait]
impl NarrativeAnalyzer for GeminiAnalyzer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn analyze(&self, domain: &str, scan: &RawScanResult) -> anyhow::Result<String> {
        let prompt = build_prompt(domain, scan)?;
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        info!(domain, model = %self.model, "sending scan to model");
        let response = self
            .client
            .post(self.url())
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .context("model request failed")?
            .error_for_status()
            .context("model returned an error status")?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("model response is not valid JSON")?;
        let text = parsed.into_text();
        if text.is_empty() {
            warn!(domain, "model returned no candidate text");
        }
        info!(domain, chars = text.len(), "model response received");
        Ok(text)
    }
}

pub fn build_analyzer(cfg: &AppConfig) -> anyhow::Result<Arc<dyn NarrativeAnalyzer>> {
    match cfg.analyzer {
        AnalyzerBackend::Gemini => Ok(Arc::new(GeminiAnalyzer::new(
            &cfg.gemini_endpoint,
            &cfg.gemini_model,
            &cfg.gemini_api_key,
            cfg.analyzer_timeout(),
        )?)),
    }
}
