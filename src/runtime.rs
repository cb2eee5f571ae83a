use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::http::{HttpFetch, HttpRequest};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where model names live in a listing response: `<array_field>[].<name_field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelListShape {
    pub array_field: &'static str,
    pub name_field: &'static str,
}

const OPENAI_MODELS: ModelListShape = ModelListShape {
    array_field: "data",
    name_field: "id",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthRequirement {
    None,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeDescriptor {
    pub key: &'static str,
    pub display_name: &'static str,
    pub default_port: u16,
    pub models_path: &'static str,
    pub models_shape: ModelListShape,
    pub health_path: &'static str,
    pub auth: AuthRequirement,
    /// Token exported when no API key is configured, for servers that expect one anyway.
    pub placeholder_token: Option<&'static str>,
}

impl RuntimeDescriptor {
    pub fn default_base_url(&self) -> String {
        format!("http://localhost:{}", self.default_port)
    }
}

/// Every supported backend. Adding one here is all a new runtime needs.
pub const RUNTIMES: &[RuntimeDescriptor] = &[
    RuntimeDescriptor {
        key: "ollama",
        display_name: "Ollama",
        default_port: 11434,
        models_path: "/api/tags",
        models_shape: ModelListShape {
            array_field: "models",
            name_field: "name",
        },
        health_path: "/api/version",
        auth: AuthRequirement::None,
        placeholder_token: Some("ollama"),
    },
    RuntimeDescriptor {
        key: "vllm",
        display_name: "vLLM",
        default_port: 8000,
        models_path: "/v1/models",
        models_shape: OPENAI_MODELS,
        health_path: "/health",
        auth: AuthRequirement::Optional,
        placeholder_token: None,
    },
    RuntimeDescriptor {
        key: "mlx",
        display_name: "MLX LM server",
        default_port: 8080,
        models_path: "/v1/models",
        models_shape: OPENAI_MODELS,
        health_path: "/v1/models",
        auth: AuthRequirement::None,
        placeholder_token: None,
    },
    RuntimeDescriptor {
        key: "lmstudio",
        display_name: "LM Studio",
        default_port: 1234,
        models_path: "/v1/models",
        models_shape: OPENAI_MODELS,
        health_path: "/v1/models",
        auth: AuthRequirement::None,
        placeholder_token: None,
    },
    RuntimeDescriptor {
        key: "llamacpp",
        display_name: "llama.cpp server",
        default_port: 8080,
        models_path: "/v1/models",
        models_shape: OPENAI_MODELS,
        health_path: "/health",
        auth: AuthRequirement::Optional,
        placeholder_token: None,
    },
    RuntimeDescriptor {
        key: "litellm",
        display_name: "LiteLLM proxy",
        default_port: 4000,
        models_path: "/v1/models",
        models_shape: OPENAI_MODELS,
        health_path: "/health/liveliness",
        auth: AuthRequirement::Required,
        placeholder_token: None,
    },
];

pub fn find_runtime(key: &str) -> Option<&'static RuntimeDescriptor> {
    let key = key.trim();
    RUNTIMES.iter().find(|rt| rt.key.eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub message: String,
    pub response_time_ms: u64,
}

impl ValidationResult {
    fn failed(message: String, started: Instant) -> Self {
        Self {
            ok: false,
            message,
            response_time_ms: elapsed_ms(started),
        }
    }
}

pub struct BackendProbe {
    http: Arc<dyn HttpFetch>,
}

impl BackendProbe {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self { http }
    }

    pub fn validate(
        &self,
        base_url: &str,
        runtime_key: &str,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> ValidationResult {
        let started = Instant::now();
        let Some(runtime) = find_runtime(runtime_key) else {
            return ValidationResult::failed(format!("unknown runtime '{runtime_key}'"), started);
        };
        let url = join_url(base_url, runtime.health_path);
        let request = HttpRequest::get(&url, timeout).bearer(api_key);
        match self.http.fetch(&request) {
            Ok(response) if response.is_success() => ValidationResult {
                ok: true,
                message: format!("{} is reachable at {}", runtime.display_name, base_url.trim()),
                response_time_ms: elapsed_ms(started),
            },
            Ok(response) if matches!(response.status, 401 | 403) => ValidationResult::failed(
                format!(
                    "{} rejected the credentials (HTTP {})",
                    runtime.display_name, response.status
                ),
                started,
            ),
            Ok(response) => ValidationResult::failed(
                format!("{url} answered HTTP {}", response.status),
                started,
            ),
            Err(err) => ValidationResult::failed(
                format!("cannot reach {} at {}: {err}", runtime.display_name, base_url.trim()),
                started,
            ),
        }
    }

    /// Model names advertised by the backend; any failure yields an empty list.
    pub fn fetch_models(
        &self,
        base_url: &str,
        runtime_key: &str,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> Vec<String> {
        let Some(runtime) = find_runtime(runtime_key) else {
            return Vec::new();
        };
        let url = join_url(base_url, runtime.models_path);
        let request = HttpRequest::get(&url, timeout).bearer(api_key);
        let response = match self.http.fetch(&request) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(%url, status = response.status, "model listing refused");
                return Vec::new();
            }
            Err(err) => {
                debug!(%url, "model listing failed: {err}");
                return Vec::new();
            }
        };
        match response.json() {
            Ok(body) => extract_model_names(runtime.models_shape, &body),
            Err(err) => {
                debug!(%url, "model listing is not JSON: {err}");
                Vec::new()
            }
        }
    }
}

pub fn extract_model_names(shape: ModelListShape, body: &Value) -> Vec<String> {
    let Some(items) = body.get(shape.array_field).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for item in items {
        let Some(name) = item.get(shape.name_field).and_then(Value::as_str) else {
            continue;
        };
        let name = name.trim();
        if !name.is_empty() && !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Joins a base URL and an absolute path, without doubling a `/v1` segment.
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        if let Some(rest) = path.strip_prefix("/v1") {
            if rest.is_empty() || rest.starts_with('/') {
                return format!("{base}{rest}");
            }
        }
    }
    format!("{base}{path}")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
