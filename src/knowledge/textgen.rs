use crate::config::AiConfig;
use crate::knowledge::SearchChunk;
use crate::util::CancelToken;
use anyhow::{Context, Result, bail};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum TextGenError {
    #[error("text generation failed: {0}")]
    GenerationFailed(String),
    #[error("text generation provider not configured")]
    NotConfigured,
}

/// Long-form text generation capability with provider-agnostic contracts.
/// `find_insertion_point` returns -1 for "before first" and N for "after
/// section N"; callers clamp the index.
pub trait TextGenerator: Send + Sync {
    fn write_full_doc(&self, evidence: &[SearchChunk], cancel: &CancelToken) -> Result<String>;
    fn update_section(
        &self,
        current: &str,
        evidence: &[SearchChunk],
        cancel: &CancelToken,
    ) -> Result<String>;
    fn render_section_from_draft(
        &self,
        draft_json: &str,
        evidence: &[SearchChunk],
        cancel: &CancelToken,
    ) -> Result<String>;
    fn generate_new_section(&self, evidence: &[SearchChunk], cancel: &CancelToken)
        -> Result<String>;
    fn find_insertion_point(
        &self,
        toc: &[String],
        preview: &str,
        cancel: &CancelToken,
    ) -> Result<i64>;
}

/// Factory keyed by the configured provider name.
pub fn create_text_generator(cfg: &AiConfig) -> Result<Option<Box<dyn TextGenerator>>> {
    match cfg.llm_provider.as_str() {
        "" | "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiGenerator::new(cfg)?))),
        other => bail!("unknown llm provider: {other}"),
    }
}

fn evidence_block(evidence: &[SearchChunk]) -> String {
    let mut out = String::new();
    for chunk in evidence {
        out.push_str(&format!(
            "--- {} ({}) in {}\n",
            chunk.name, chunk.kind, chunk.package
        ));
        if !chunk.description.is_empty() {
            out.push_str(&chunk.description);
            out.push('\n');
        }
        if !chunk.signature.is_empty() {
            out.push_str(&chunk.signature);
            out.push('\n');
        }
        if !chunk.body.is_empty() {
            out.push_str(&crate::util::truncate_chars(&chunk.body, 1200));
            out.push('\n');
        }
    }
    out
}

/// Chat-completions provider speaking the OpenAI wire shape. Same retry
/// policy as the embedder: 429/5xx retried with backoff, other 4xx fatal.
pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        if cfg.llm_api_key.is_empty() {
            bail!(TextGenError::NotConfigured);
        }
        let base = if cfg.llm_base_url.is_empty() {
            "https://api.openai.com/v1".to_string()
        } else {
            cfg.llm_base_url.trim_end_matches('/').to_string()
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build llm http client")?;
        Ok(Self {
            client,
            endpoint: format!("{base}/chat/completions"),
            api_key: cfg.llm_api_key.clone(),
            model: cfg.llm_model.clone(),
        })
    }

    fn generate(&self, system: &str, prompt: &str, cancel: &CancelToken) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=MAX_RETRIES {
            cancel.check()?;
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1 << (attempt - 1).min(4)));
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
                            resp.json().context("decode llm response")?;
                        let text = value["choices"][0]["message"]["content"]
                            .as_str()
                            .unwrap_or("")
                            .trim()
                            .to_string();
                        if text.is_empty() {
                            bail!(TextGenError::GenerationFailed("empty completion".into()));
                        }
                        return Ok(text);
                    }
                    let text = resp.text().unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err =
                            Some(TextGenError::GenerationFailed(format!("{status}: {text}")).into());
                        continue;
                    }
                    bail!(TextGenError::GenerationFailed(format!("{status}: {text}")));
                }
                Err(err) => {
                    last_err = Some(err.into());
                    continue;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| TextGenError::GenerationFailed("retries exhausted".into()).into()))
    }
}

const SYSTEM_WRITER: &str = "You are a precise technical writer. Write Markdown grounded only in \
the provided code evidence. Prefer conceptual explanation over file walkthroughs. Never invent \
APIs that are not in the evidence.";

impl TextGenerator for OpenAiGenerator {
    fn write_full_doc(&self, evidence: &[SearchChunk], cancel: &CancelToken) -> Result<String> {
        let prompt = format!(
            "Write complete project documentation in Markdown from this evidence:\n\n{}",
            evidence_block(evidence)
        );
        self.generate(SYSTEM_WRITER, &prompt, cancel)
    }

    fn update_section(
        &self,
        current: &str,
        evidence: &[SearchChunk],
        cancel: &CancelToken,
    ) -> Result<String> {
        let prompt = format!(
            "Update this documentation section to reflect the changed code. Keep the heading \
structure, keep statements that still hold, integrate new behavior.\n\nCurrent section:\n{current}\n\nChanged code evidence:\n{}",
            evidence_block(evidence)
        );
        self.generate(SYSTEM_WRITER, &prompt, cancel)
    }

    fn render_section_from_draft(
        &self,
        draft_json: &str,
        evidence: &[SearchChunk],
        cancel: &CancelToken,
    ) -> Result<String> {
        let prompt = format!(
            "Render this structured section draft as polished Markdown. Every claim in the draft \
must survive with its meaning intact; the evidence is context, not new material.\n\nDraft JSON:\n{draft_json}\n\nEvidence:\n{}",
            evidence_block(evidence)
        );
        self.generate(SYSTEM_WRITER, &prompt, cancel)
    }

    fn generate_new_section(
        &self,
        evidence: &[SearchChunk],
        cancel: &CancelToken,
    ) -> Result<String> {
        let prompt = format!(
            "Write a new documentation section (Markdown, start with a `##` heading) describing \
what this changed code does:\n\n{}",
            evidence_block(evidence)
        );
        self.generate(SYSTEM_WRITER, &prompt, cancel)
    }

    fn find_insertion_point(
        &self,
        toc: &[String],
        preview: &str,
        cancel: &CancelToken,
    ) -> Result<i64> {
        let listing = toc
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{i}: {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Given this table of contents:\n{listing}\n\nAnd this change candidate:\n{preview}\n\nAnswer with a single integer: the index of the section this change belongs to, or -1 if it belongs before the first section."
        );
        let answer = self.generate(
            "You route code changes to documentation sections. Answer with one integer only.",
            &prompt,
            cancel,
        )?;
        answer
            .trim()
            .split_whitespace()
            .next()
            .and_then(|t| t.trim_matches(|c: char| !c.is_ascii_digit() && c != '-').parse().ok())
            .ok_or_else(|| {
                TextGenError::GenerationFailed(format!("non-integer routing answer: {answer}"))
                    .into()
            })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_returns_none_when_unconfigured() {
        let cfg = crate::config::Config::default().ai;
        assert!(create_text_generator(&cfg).unwrap().is_none());
    }

    #[test]
    fn factory_rejects_unknown_provider() {
        let mut cfg = crate::config::Config::default().ai;
        cfg.llm_provider = "oracle".into();
        assert!(create_text_generator(&cfg).is_err());
    }

    #[test]
    fn evidence_block_lists_each_chunk_once() {
        let chunks = vec![SearchChunk {
            id: "a".into(),
            name: "Open".into(),
            kind: "function".into(),
            package: "store".into(),
            signature: "func Open()".into(),
            ..SearchChunk::default()
        }];
        let block = evidence_block(&chunks);
        assert!(block.contains("Open (function) in store"));
        assert!(block.contains("func Open()"));
    }
}
