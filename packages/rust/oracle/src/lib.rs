//! Variable identification through an external structured-reasoning service.
//!
//! The oracle receives the first [`prompt::DEFAULT_MAX_CHARS`] characters of a
//! document's text and answers with a schema-constrained JSON object
//! `{ "variables": [{ "name": ..., "description": ... }] }`.
//!
//! Failures never escape this crate: a transport error, timeout, or malformed
//! response becomes [`Identification::Degraded`] with an empty variable set.
//! When no API key is configured the client runs in a fixed sample mode and
//! always returns the same three demonstration variables.

pub mod prompt;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use docfill_shared::{DocfillError, OracleConfig, Result, Variable, VariableList};

/// User-Agent string for oracle requests.
const USER_AGENT: &str = concat!("docfill/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Maximum length of an upstream error body quoted in a degrade reason.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

/// Outcome of one identification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    /// The live oracle answered.
    Identified(Vec<Variable>),
    /// Fixed sample set returned because no credential is configured.
    Sample(Vec<Variable>),
    /// The oracle could not be used; the variable set is empty.
    Degraded { reason: String },
}

impl Identification {
    /// Why the oracle could not be used, if it could not.
    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Self::Degraded { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_sample(&self) -> bool {
        matches!(self, Self::Sample(_))
    }

    /// The identified variables; empty when degraded.
    pub fn into_variables(self) -> Vec<Variable> {
        match self {
            Self::Identified(vars) | Self::Sample(vars) => vars,
            Self::Degraded { .. } => Vec::new(),
        }
    }
}

/// Something that can identify fillable variables in document text.
#[async_trait]
pub trait VariableOracle: Send + Sync {
    async fn identify(&self, text: &str) -> Identification;
}

/// The three demonstration variables returned in sample mode.
pub fn sample_variables() -> Vec<Variable> {
    vec![
        Variable::new("Client Name", "The full name of the client"),
        Variable::new("Date", "The date of the agreement"),
        Variable::new("Amount", "The total amount in USD"),
    ]
}

// ---------------------------------------------------------------------------
// Wire types (generateContent request/response)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// OracleClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Mode {
    Live {
        client: Client,
        endpoint: Url,
        api_key: String,
    },
    Sample,
}

/// HTTP client for the Generative Language `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct OracleClient {
    mode: Mode,
    max_chars: usize,
}

impl OracleClient {
    /// Build a client from config, reading the API key from the configured
    /// env var. No key means sample mode.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Self::new(config, config.api_key())
    }

    /// Build a client with an explicit key (`None` selects sample mode).
    pub fn new(config: &OracleConfig, api_key: Option<String>) -> Result<Self> {
        let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
            debug!("no oracle API key configured, using fixed sample variables");
            return Ok(Self {
                mode: Mode::Sample,
                max_chars: config.max_chars,
            });
        };

        let endpoint = endpoint_url(&config.base_url, &config.model)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocfillError::config(format!("failed to build HTTP client: {e}")))?;

        info!(model = %config.model, "oracle client configured");
        Ok(Self {
            mode: Mode::Live {
                client,
                endpoint,
                api_key,
            },
            max_chars: config.max_chars,
        })
    }

    /// A client that always answers with [`sample_variables`].
    pub fn sample() -> Self {
        Self {
            mode: Mode::Sample,
            max_chars: prompt::DEFAULT_MAX_CHARS,
        }
    }

    pub fn is_sample(&self) -> bool {
        matches!(self.mode, Mode::Sample)
    }

    /// Send one request. Errors are [`DocfillError::Oracle`].
    async fn request(
        &self,
        client: &Client,
        endpoint: &Url,
        api_key: &str,
        text: &str,
    ) -> Result<Vec<Variable>> {
        let prompt = prompt::build_prompt(text, self.max_chars);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: prompt::variable_list_schema(),
            },
        };

        let response = client
            .post(endpoint.clone())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocfillError::Oracle(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt = prompt::truncate_chars(&body, MAX_ERROR_BODY);
            return Err(DocfillError::Oracle(format!("HTTP {status}: {excerpt}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DocfillError::Oracle(format!("invalid response body: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| DocfillError::Oracle("response has no candidate text".into()))?;

        let list: VariableList = serde_json::from_str(&text).map_err(|e| {
            DocfillError::Oracle(format!(
                "candidate is not a variable list: {e} (got: {})",
                prompt::truncate_chars(&text, MAX_ERROR_BODY)
            ))
        })?;

        Ok(list.variables)
    }
}

#[async_trait]
impl VariableOracle for OracleClient {
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn identify(&self, text: &str) -> Identification {
        let Mode::Live {
            client,
            endpoint,
            api_key,
        } = &self.mode
        else {
            debug!("sample mode: returning fixed variables");
            return Identification::Sample(sample_variables());
        };

        match self.request(client, endpoint, api_key, text).await {
            Ok(variables) => {
                info!(count = variables.len(), "variables identified");
                Identification::Identified(variables)
            }
            Err(e) => {
                warn!(error = %e, "variable identification degraded to empty set");
                Identification::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// `{base_url}/v1beta/models/{model}:generateContent`
fn endpoint_url(base_url: &str, model: &str) -> Result<Url> {
    let raw = format!(
        "{}/v1beta/models/{model}:generateContent",
        base_url.trim_end_matches('/')
    );
    Url::parse(&raw).map_err(|e| DocfillError::config(format!("invalid oracle URL '{raw}': {e}")))
}
