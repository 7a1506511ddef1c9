//! Environment configuration.
//!
//! Values come from the process environment, which `main` first fills from a
//! `.env` file when one exists. Parsing goes through a lookup function so
//! tests never touch the real environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::analysis::{resolve_model, DEFAULT_BASE_URL, DEFAULT_MODEL_ALIAS};
use crate::intake::{IntakeSettings, DEFAULT_ANALYSIS_TIMEOUT};
use crate::validate::{UploadLimits, DEFAULT_MAX_BYTES};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub gemini: GeminiConfig,
    pub intake: IntakeSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set (env or .env file)")?;
        let model = var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL_ALIAS.to_string());
        let base_url = var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR is not a socket address")?;

        let max_bytes = match var("MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("MAX_UPLOAD_BYTES is not a byte count: {raw}"))?,
            None => DEFAULT_MAX_BYTES,
        };

        let analysis_timeout = match var("ANALYSIS_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .with_context(|| format!("ANALYSIS_TIMEOUT_SECS is not a number: {raw}"))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(DEFAULT_ANALYSIS_TIMEOUT),
        };

        Ok(Self {
            bind_addr,
            gemini: GeminiConfig {
                api_key,
                model: resolve_model(&model).to_string(),
                base_url,
            },
            intake: IntakeSettings {
                limits: UploadLimits::default().with_max_bytes(max_bytes),
                analysis_timeout,
            },
        })
    }
}
