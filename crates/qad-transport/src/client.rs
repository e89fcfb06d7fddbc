use anyhow::{Context, Result};
use qad_config::DispatchConfig;
use qad_core::collab::InferenceBackend;
use qad_core::task::{CallOutcome, Prompt};
use qad_core::types::{PerTier, Tier};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::keys::{ApiKeys, TierCredentials};
use crate::response::classify_response;

const COMPLETIONS_PATH: &str = "data-service/v1/chat/completions";

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq)]
struct Sampling {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_tokens: u32,
    seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TierRoute {
    endpoint: String,
    model: String,
    credentials: TierCredentials,
}

/// Blocking client for the two chat-completion endpoints.
///
/// One call per [`InferenceBackend::invoke`]; retries and quota accounting
/// belong to the dispatcher.
#[derive(Debug)]
pub struct VnptClient {
    http: reqwest::blocking::Client,
    base_url: String,
    routes: PerTier<TierRoute>,
    sampling: Sampling,
}

impl VnptClient {
    /// Build a client for both tiers. Fails when either tier has no key.
    pub fn new(config: &DispatchConfig, keys: &ApiKeys) -> Result<Self> {
        let route = |tier: Tier| -> Result<TierRoute> {
            let tier_config = config.tiers.get(tier);
            Ok(TierRoute {
                endpoint: tier_config.endpoint.clone(),
                model: tier_config.model.clone(),
                credentials: keys.require(tier)?.clone(),
            })
        };
        let routes = PerTier::new(route(Tier::Small)?, route(Tier::Large)?);
        let api = &config.api;
        let http = reqwest::blocking::Client::builder()
            .timeout(api.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            routes,
            sampling: Sampling {
                temperature: api.temperature,
                top_p: api.top_p,
                top_k: api.top_k,
                max_tokens: api.max_tokens,
                seed: api.seed,
            },
        })
    }

    pub fn endpoint_url(&self, tier: Tier) -> String {
        format!(
            "{}/{COMPLETIONS_PATH}/{}",
            self.base_url, self.routes[tier].endpoint
        )
    }

    fn payload(&self, tier: Tier, prompt: &Prompt) -> Value {
        let mut payload = json!({
            "model": self.routes[tier].model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.sampling.temperature,
            "max_completion_tokens": self.sampling.max_tokens,
            "top_p": self.sampling.top_p,
            "top_k": self.sampling.top_k,
            "n": 1,
        });
        if let Some(seed) = self.sampling.seed {
            payload["seed"] = json!(seed);
        }
        payload
    }
}

impl InferenceBackend for VnptClient {
    fn invoke(&self, tier: Tier, prompt: &Prompt) -> CallOutcome {
        let credentials = &self.routes[tier].credentials;
        let response = self
            .http
            .post(self.endpoint_url(tier))
            .header("Authorization", &credentials.authorization)
            .header("Token-id", &credentials.token_id)
            .header("Token-key", &credentials.token_key)
            .json(&self.payload(tier, prompt))
            .send();

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let kind = if err.is_timeout() { "timeout" } else { "request failed" };
                warn!(tier = %tier, error = %err, "Completion {kind}");
                return CallOutcome::TransientError(format!("{kind}: {err}"));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text() {
            Ok(body) => body,
            Err(err) => {
                return CallOutcome::TransientError(format!(
                    "Failed to read response body: {err}"
                ));
            }
        };

        let outcome = classify_response(tier, status, &body);
        debug!(
            tier = %tier,
            status,
            success = matches!(outcome, CallOutcome::Success(_)),
            "Completion call finished"
        );
        outcome
    }
}
