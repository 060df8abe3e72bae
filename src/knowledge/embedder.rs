use crate::config::AiConfig;
use crate::util::CancelToken;
use anyhow::{Context, Result, bail};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Texts per API call; keeps large reindex runs under provider rate limits.
const EMBED_BATCH_SIZE: usize = 50;
const MAX_RETRIES: u32 = 5;

/// Errors surfaced by embedding adapters before anyhow wrapping.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding provider not configured")]
    NotConfigured,
    #[error("embedding response shape invalid: {0}")]
    InvalidResponse(String),
}

/// Converts text to vectors. Output length equals input length; the
/// dimension is stable per configured model.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Factory keyed by the configured provider name. Returns `None` when no
/// provider is configured so callers can degrade to deterministic paths.
pub fn create_embedder(cfg: &AiConfig) -> Result<Option<Box<dyn Embedder>>> {
    match cfg.embedding_provider.as_str() {
        "" | "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiEmbedder::new(cfg)?))),
        "mock" => Ok(Some(Box::new(MockEmbedder::new(cfg.embedding_dimension)))),
        other => bail!("unknown embedding provider: {other}"),
    }
}

/// Embedding provider speaking the OpenAI `/v1/embeddings` wire shape.
/// Retries 429 and 5xx with exponential backoff; other 4xx fail immediately.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        if cfg.embedding_api_key.is_empty() {
            bail!(EmbedderError::NotConfigured);
        }
        let base = if cfg.embedding_base_url.is_empty() {
            "https://api.openai.com/v1".to_string()
        } else {
            cfg.embedding_base_url.trim_end_matches('/').to_string()
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build embedding http client")?;
        Ok(Self {
            client,
            endpoint: format!("{base}/embeddings"),
            api_key: cfg.embedding_api_key.clone(),
            model: cfg.embedding_model.clone(),
            dimension: cfg.embedding_dimension,
        })
    }

    fn embed_batch(&self, batch: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": batch,
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=MAX_RETRIES {
            cancel.check()?;
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1 << (attempt - 1).min(5)));
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let value: serde_json::Value =
                            resp.json().context("decode embedding response")?;
                        return parse_embeddings(&value, batch.len());
                    }
                    let text = resp.text().unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        debug!("embedding retry after status {status}");
                        last_err =
                            Some(EmbedderError::InferenceFailed(format!("{status}: {text}")).into());
                        continue;
                    }
                    bail!(EmbedderError::InferenceFailed(format!("{status}: {text}")));
                }
                Err(err) => {
                    last_err = Some(err.into());
                    continue;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| EmbedderError::InferenceFailed("retries exhausted".into()).into()))
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            cancel.check()?;
            out.extend(self.embed_batch(batch, cancel)?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn parse_embeddings(value: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = value
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedderError::InvalidResponse("missing data array".into()))?;
    if data.len() != expected {
        bail!(EmbedderError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len());
    for item in data {
        let vector = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedderError::InvalidResponse("missing embedding".into()))?;
        out.push(
            vector
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(out)
}

/// Deterministic offline embedder used in tests and dry runs. Vectors are a
/// pure function of the input text.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(4),
        }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        cancel.check()?;
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let digest = blake3::hash(text.as_bytes());
            let bytes = digest.as_bytes();
            let mut vector = Vec::with_capacity(self.dimension);
            for i in 0..self.dimension {
                let b = bytes[i % bytes.len()] as f32;
                vector.push((b / 255.0) * 2.0 - 1.0);
            }
            out.push(vector);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
