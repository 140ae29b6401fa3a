// src/agent.rs

use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/* =========================================
   Política de retentativa
   ========================================= */

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retentativas APÓS a primeira chamada.
    pub retries: u32,
    /// Pausa fixa entre tentativas.
    pub backoff: Duration,
    /// Timeout por tentativa.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/* =========================================
   Erros
   ========================================= */

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agente respondeu HTTP {status}")]
    Status { status: StatusCode },
    #[error("falha de transporte: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agente indisponível após {attempts} tentativa(s); última falha: {last}")]
    Exhausted { attempts: u32, last: String },
}

/* =========================================
   Pergunta
   ========================================= */

/// Corpo da pergunta. Campos ausentes ficam fora do JSON.
#[derive(Debug, Clone, Serialize)]
pub struct AgentQuestion<'a> {
    pub question: &'a str,
    /// Snowflake como string: o consumidor é JavaScript e perderia precisão
    /// com número.
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    /// Nome de exibição, no campo que a automação já espera.
    #[serde(rename = "user", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<&'a str>,
}

impl<'a> AgentQuestion<'a> {
    pub fn new(question: &'a str, channel_id: u64) -> Self {
        Self {
            question,
            channel_id: channel_id.to_string(),
            username: None,
            display_name: None,
            roles: None,
            tag: None,
        }
    }
}

#[derive(Serialize)]
struct Wire<'a, 'b> {
    #[serde(flatten)]
    question: &'b AgentQuestion<'a>,
    #[serde(rename = "requestId")]
    request_id: &'b str,
}

/// Id de correlação no formato `req_<epoch-ms>_<7 alfanuméricos>`.
pub fn new_request_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    format!(
        "req_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

/* =========================================
   Cliente
   ========================================= */

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl AgentClient {
    pub fn new(policy: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Jurema/", env!("CARGO_PKG_VERSION")))
            .timeout(policy.timeout)
            .build()?;
        Ok(Self { http, policy })
    }

    /// Envia a pergunta e devolve a resposta do agente, se houver.
    ///
    /// `Ok(None)` significa "o agente respondeu 2xx mas sem texto útil";
    /// o chamador decide a mensagem de contingência.
    pub async fn ask(
        &self,
        url: &str,
        question: &AgentQuestion<'_>,
    ) -> Result<Option<String>, AgentError> {
        let request_id = new_request_id();
        let wire = Wire {
            question,
            request_id: &request_id,
        };

        let attempts = self.policy.retries + 1;
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.attempt(url, &wire, &request_id).await {
                Ok(output) => {
                    tracing::debug!(%request_id, attempt, "agente respondeu");
                    return Ok(output);
                }
                Err(e) => {
                    tracing::warn!(%request_id, attempt, error = %e, "chamada ao agente falhou");
                    last = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }
        Err(AgentError::Exhausted { attempts, last })
    }

    async fn attempt(
        &self,
        url: &str,
        wire: &Wire<'_, '_>,
        request_id: &str,
    ) -> Result<Option<String>, AgentError> {
        let resp = self
            .http
            .post(url)
            .header("X-Request-ID", request_id)
            .json(wire)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Status { status });
        }

        let body: Value = resp.json().await?;
        let output = body
            .get("output")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .filter(|s| !s.trim().is_empty());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_contract() {
        let mut q = AgentQuestion::new("como começo?", 42);
        q.username = Some("john.doe");
        q.display_name = Some("John");
        q.roles = Some(vec!["ADMIN".to_string()]);

        let wire = Wire {
            question: &q,
            request_id: "req_1_abcdefg",
        };
        let v = serde_json::to_value(&wire).unwrap();
        assert_eq!(v["question"], "como começo?");
        assert_eq!(v["channelId"], "42");
        assert_eq!(v["user"], "John");
        assert_eq!(v["requestId"], "req_1_abcdefg");
        // sem tag, a chave não aparece
        assert!(v.get("tag").is_none());
    }

    #[test]
    fn request_id_has_expected_format() {
        let id = new_request_id();
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "req");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 7);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn default_policy_is_three_retries_one_second() {
        let p = RetryPolicy::default();
        assert_eq!(p.retries, 3);
        assert_eq!(p.backoff, Duration::from_secs(1));
        assert_eq!(p.timeout, Duration::from_secs(10));
    }
}
