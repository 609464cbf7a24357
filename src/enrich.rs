//! Enrichment client: stateless adapter between the orchestrator and the
//! remote intelligence hub.
//!
//! Every operation is a single bounded-time HTTP call. Network errors,
//! non-2xx statuses, malformed bodies, and timeouts all collapse into one
//! `RemoteUnavailable` condition; the orchestrator owns retry and
//! degradation policy, so nothing here retries.
//!
//! Two strategies implement the same trait:
//!
//! - `HubClient` posts the save arguments to the hub's direct verify
//!   endpoint and gets enrichment fields back in one round trip.
//! - `TwoPhaseClient` fetches a prompt from the hub, runs a locally
//!   configured LM command (prompt on stdin, response on stdout), and
//!   submits the output for finalization. The orchestrator cannot tell the
//!   strategies apart.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use ureq::Agent;

use crate::record::{FunctionStatus, TestCase};

/// All remote failure modes collapsed to one condition.
#[derive(Debug, Clone)]
pub struct RemoteUnavailable(pub String);

impl fmt::Display for RemoteUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw save arguments forwarded for verification.
#[derive(Debug, Serialize, Clone)]
pub struct VerifyRequest {
    pub name: String,
    pub code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub test_cases: Vec<TestCase>,
}

/// Record fragment returned by a successful verification. A rejection
/// arrives through the same shape with `status = rejected`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EnrichmentResult {
    #[serde(default)]
    pub status: Option<FunctionStatus>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Candidate summary sent to the rerank endpoint.
#[derive(Debug, Serialize, Clone)]
pub struct RerankCandidate {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    selected_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    name: &'a str,
    code: &'a str,
    llm_output: &'a str,
}

pub trait EnrichmentClient {
    fn verify(&self, request: &VerifyRequest) -> Result<EnrichmentResult, RemoteUnavailable>;
    fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> Result<String, RemoteUnavailable>;
}

/// Single-round-trip HTTP client against the intelligence hub.
pub struct HubClient {
    agent: Agent,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        HubClient {
            agent: config.new_agent(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        label: &'static str,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, RemoteUnavailable> {
        let url = format!("{}{path}", self.base_url);
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|err| RemoteUnavailable(format!("{label}: {err}")))?;
        let parsed = response
            .body_mut()
            .read_json::<T>()
            .map_err(|err| RemoteUnavailable(format!("{label}: malformed response: {err}")))?;
        let elapsed_ms = start.elapsed().as_millis();
        tracing::info!(elapsed_ms, label, "hub call complete");
        Ok(parsed)
    }
}

impl EnrichmentClient for HubClient {
    fn verify(&self, request: &VerifyRequest) -> Result<EnrichmentResult, RemoteUnavailable> {
        self.post_json("verify", "/api/v1/intelligence/verify/direct", request)
    }

    fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> Result<String, RemoteUnavailable> {
        let body = serde_json::json!({ "query": query, "candidates": candidates });
        let response: RerankResponse =
            self.post_json("rerank", "/api/v1/intelligence/rerank/direct", &body)?;
        match response.selected_name {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => Err(RemoteUnavailable(
                "rerank: response missing selected_name".to_string(),
            )),
        }
    }
}

/// Produces LM output for a hub-provided prompt.
pub trait PromptGenerator {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// A user-configured LM command: argv parsed with shell-words, prompt on
/// stdin, response on stdout. Any tool that reads text and writes text works
/// (`llm`, `ollama run`, custom scripts).
#[derive(Debug, Clone)]
pub struct LmCommand {
    argv: Vec<String>,
}

impl LmCommand {
    pub fn parse(command: &str) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        Ok(LmCommand { argv })
    }
}

impl PromptGenerator for LmCommand {
    fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn LM command: {}", self.argv[0]))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("write prompt to LM stdin")?;
        }

        let output = child.wait_with_output().context("wait for LM command")?;
        let elapsed_ms = start.elapsed().as_millis();
        tracing::info!(
            elapsed_ms,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm invoke complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")
    }
}

/// Get-prompt / finalize verification with the generation step run locally.
pub struct TwoPhaseClient<G> {
    hub: HubClient,
    generator: G,
}

impl<G> TwoPhaseClient<G> {
    pub fn new(hub: HubClient, generator: G) -> Self {
        TwoPhaseClient { hub, generator }
    }
}

impl<G: PromptGenerator> EnrichmentClient for TwoPhaseClient<G> {
    fn verify(&self, request: &VerifyRequest) -> Result<EnrichmentResult, RemoteUnavailable> {
        let prompt: PromptResponse = self.hub.post_json(
            "verify/get-prompt",
            "/api/v1/intelligence/verify/get-prompt",
            request,
        )?;
        let llm_output = self
            .generator
            .generate(&prompt.prompt)
            .map_err(|err| RemoteUnavailable(format!("verify: local generation failed: {err}")))?;
        self.hub.post_json(
            "verify/finalize",
            "/api/v1/intelligence/verify/finalize",
            &FinalizeRequest {
                name: &request.name,
                code: &request.code,
                llm_output: &llm_output,
            },
        )
    }

    fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> Result<String, RemoteUnavailable> {
        self.hub.rerank(query, candidates)
    }
}
