use std::time::Duration;

use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::error::TransportError;
use crate::models::Message;
use crate::telemetry;

pub const MOCK_MIN_DELAY_MS: u64 = 600;
pub const MOCK_MAX_DELAY_MS: u64 = 1200;
pub const MOCK_HINT: &str =
    "(This is a sample reply. Set MURMUR_CHAT_API_URL or MURMUR_GRAPHQL_API_URL to connect a real model.)";

const CHAT_MUTATION: &str = r#"mutation Chat($input: ChatInput!) {
  chat(input: $input) {
    content
    reasoning
  }
}"#;

const GRAPHQL_CONTENT_PATH: &str = "data.chat.content";

/**
 * \brief Reply of the GraphQL `chat` mutation.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlReply {
    pub content: String,
    pub reasoning: Option<String>,
}

/**
 * \brief Send the history to the selected backend and return the reply text verbatim.
 * \details Resolves to `TransportError::Cancelled` if `cancel` fires before or while the call is pending.
 */
pub async fn send(
    client: &reqwest::Client,
    backend: &Backend,
    history: &[Message],
    cancel: &CancellationToken,
) -> Result<String, TransportError> {
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    let call = async {
        match backend {
            Backend::GraphQl {
                endpoint,
                provider,
                model,
                temperature,
            } => {
                let body = graphql_body(provider, model, *temperature, history);
                chat_once_graphql(client, endpoint, &body).await
            }
            Backend::Rest { endpoint } => chat_once_rest(client, endpoint, history).await,
            Backend::Mock => chat_once_mock(history).await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = call => result,
    }
}

/**
 * \brief Build the `chat` mutation request. Temperature is omitted unless finite.
 */
pub fn graphql_body(
    provider: &str,
    model: &str,
    temperature: Option<f64>,
    history: &[Message],
) -> Value {
    // Role is a closed set of user/assistant/system, so every entry qualifies.
    let messages: Vec<Value> = history
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();
    let mut input = json!({
        "provider": provider,
        "model": model,
        "messages": messages,
    });
    if let Some(t) = temperature.filter(|t| t.is_finite()) {
        input["temperature"] = json!(t);
    }
    json!({
        "query": CHAT_MUTATION,
        "variables": {"input": input},
    })
}

/**
 * \brief Interpret a GraphQL response body.
 */
pub fn parse_graphql_reply(v: &Value) -> Result<GraphQlReply, TransportError> {
    if let Some(errors) = v.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .filter(|m| !m.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            let message = if joined.is_empty() {
                "unknown error".to_string()
            } else {
                joined
            };
            return Err(TransportError::Remote(message));
        }
    }
    let chat = v.get("data").and_then(|d| d.get("chat"));
    let content = chat
        .and_then(|c| c.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            TransportError::Malformed(format!(
                "GraphQL response malformed: expected string at {}",
                GRAPHQL_CONTENT_PATH
            ))
        })?;
    let reasoning = chat
        .and_then(|c| c.get("reasoning"))
        .and_then(|r| r.as_str())
        .map(|r| r.to_string());
    Ok(GraphQlReply {
        content: content.to_string(),
        reasoning,
    })
}

/**
 * \brief Interpret a REST response body: `{ "reply": string }`.
 */
pub fn parse_rest_reply(v: &Value) -> Result<String, TransportError> {
    v.get("reply")
        .and_then(|r| r.as_str())
        .map(|r| r.to_string())
        .ok_or_else(|| {
            TransportError::Malformed(
                "API response malformed: expected { reply: string }".to_string(),
            )
        })
}

/**
 * \brief Deterministic echo produced by the mock backend.
 */
pub fn mock_reply(content: &str) -> String {
    format!("You said: {}\n\n{}", content, MOCK_HINT)
}

async fn chat_once_graphql(
    client: &reqwest::Client,
    endpoint: &str,
    body: &Value,
) -> Result<String, TransportError> {
    let v = post_json(client, endpoint, body, "GraphQL").await?;
    let reply = parse_graphql_reply(&v)?;
    if let Some(reasoning) = &reply.reasoning {
        telemetry::log_event(
            "llm.graphql",
            &format!("reply carried reasoning len={}", reasoning.len()),
        );
    }
    Ok(reply.content)
}

async fn chat_once_rest(
    client: &reqwest::Client,
    endpoint: &str,
    history: &[Message],
) -> Result<String, TransportError> {
    let body = json!({ "messages": history });
    let v = post_json(client, endpoint, &body, "API").await?;
    parse_rest_reply(&v)
}

async fn chat_once_mock(history: &[Message]) -> Result<String, TransportError> {
    let content = history
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let delay = rand::thread_rng().gen_range(MOCK_MIN_DELAY_MS..=MOCK_MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Ok(mock_reply(&content))
}

async fn post_json(
    client: &reqwest::Client,
    endpoint: &str,
    body: &Value,
    api: &'static str,
) -> Result<Value, TransportError> {
    let resp = client
        .post(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(TransportError::Status {
            api,
            status: resp.status().as_u16(),
        });
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|err| {
        TransportError::Malformed(format!("{} response is not valid JSON: {}", api, err))
    })
}
