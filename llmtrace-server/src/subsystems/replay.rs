//! Replay engine: re-executes a stored or edited request against a resolved provider.
//!
//! Both entry points share one flow:
//! - resolve the provider through the registry
//! - parse the request into the chat shape and apply the model override
//! - issue exactly one bounded call
//! - record the outcome, success or error, before returning
//!
//! `execute_replay` records into the original session's history,
//! `execute_replay_debug` into a replay session, together with the provider,
//! model and debug overrides that were used.

use std::time::Instant;

use chrono::Utc;
use llmtrace_core::config::ReplayConfig;
use llmtrace_core::models::{Record, ReplayRecord, TraceStatus};
use llmtrace_core::{
    ChatClient, ChatCompletionRequest, ChatCompletionResponse, ChatError, DebugConfig,
    LlmTraceError, ProviderRegistry, ResolvedProvider,
};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::store;
use super::trace::{canonical_json, save_trace, TraceInput};

#[derive(Debug, Clone)]
pub struct ReplayInput {
    pub session_id: String,
    pub turn_number: i64,
    pub request: Value,
    pub provider: String,
    /// Overrides the request's model when non-empty.
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ReplayDebugInput {
    pub replay_session_id: String,
    pub turn_number: i64,
    pub request: Value,
    pub provider: String,
    pub model: String,
    /// Raw overrides as sent by the caller; see [`DebugConfig::from_value`].
    pub debug_config: Option<Value>,
}

/// Replay a turn into the original session's history.
///
/// # Returns
/// * `Ok(Record)` - the persisted success record
/// * `Err(ProviderConfig)` - provider unknown or without credential; nothing persisted
/// * `Err(Validation)` - request is not a chat-completion request; nothing persisted
/// * `Err(ProviderCall)` - the call failed; an error record was persisted
/// * `Err(OutcomeNotRecorded)` - the call failed and the error record could not be saved
pub async fn execute_replay(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    config: &ReplayConfig,
    input: ReplayInput,
) -> Result<Record, LlmTraceError> {
    let provider = resolve_provider(registry, &input.provider)?;
    let request = build_request(&input.request, &input.model)?;
    let request_value = serde_json::to_value(&request)?;

    let started = Instant::now();
    let outcome = call_provider(&provider, config, &request).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            let mut trace = TraceInput::new(
                input.session_id,
                input.turn_number,
                request_value,
                TraceStatus::Success,
            );
            trace.response = Some(serde_json::to_value(&response)?);
            let record = save_trace(pool, trace).await?;

            tracing::info!(
                session_id = %record.session_id,
                turn_number = record.turn_number,
                provider = %provider.key,
                model = %request.model,
                duration_ms,
                "Replay finished"
            );
            Ok(record)
        }
        Err(provider_error) => {
            tracing::error!(
                session_id = %input.session_id,
                turn_number = input.turn_number,
                provider = %provider.key,
                model = %request.model,
                duration_ms,
                error = %provider_error,
                "Replay failed"
            );

            let mut trace = TraceInput::new(
                input.session_id,
                input.turn_number,
                request_value,
                TraceStatus::Error,
            );
            trace.error_message = Some(provider_error.to_string());

            match save_trace(pool, trace).await {
                Ok(_) => Err(LlmTraceError::ProviderCall(provider_error)),
                Err(persist_error) => Err(outcome_not_recorded(provider_error, persist_error)),
            }
        }
    }
}

/// Replay a turn inside a replay session with optional parameter overrides.
///
/// Same contract as [`execute_replay`], plus `Err(NotFound)` when the replay
/// session does not exist. The stored record carries the resolved provider key,
/// the effective model and the overrides that were actually applied.
pub async fn execute_replay_debug(
    pool: &SqlitePool,
    registry: &ProviderRegistry,
    config: &ReplayConfig,
    input: ReplayDebugInput,
) -> Result<ReplayRecord, LlmTraceError> {
    if store::get_replay_session(pool, &input.replay_session_id)
        .await?
        .is_none()
    {
        return Err(LlmTraceError::not_found(
            "Replay session",
            input.replay_session_id,
        ));
    }

    let provider = resolve_provider(registry, &input.provider)?;
    let mut request = build_request(&input.request, &input.model)?;

    let overrides = input
        .debug_config
        .as_ref()
        .map(DebugConfig::from_value)
        .unwrap_or_default();
    overrides.apply(&mut request);

    let started = Instant::now();
    let outcome = call_provider(&provider, config, &request).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let mut record = ReplayRecord {
        id: Uuid::new_v4().to_string(),
        replay_session_id: input.replay_session_id,
        turn_number: input.turn_number,
        request: canonical_json(&serde_json::to_value(&request)?)?,
        response: None,
        status: TraceStatus::Success,
        error_message: None,
        provider: provider.key.clone(),
        model: request.model.clone(),
        debug_config: overrides.to_json_string()?,
        created_at: Utc::now(),
    };

    match outcome {
        Ok(response) => {
            record.response = Some(canonical_json(&serde_json::to_value(&response)?)?);
            save_replay_record(pool, &record).await?;

            tracing::info!(
                replay_session_id = %record.replay_session_id,
                turn_number = record.turn_number,
                provider = %record.provider,
                model = %record.model,
                duration_ms,
                "Replay debug finished"
            );
            Ok(record)
        }
        Err(provider_error) => {
            tracing::error!(
                replay_session_id = %record.replay_session_id,
                turn_number = record.turn_number,
                provider = %record.provider,
                model = %record.model,
                duration_ms,
                error = %provider_error,
                "Replay debug failed"
            );

            record.status = TraceStatus::Error;
            record.error_message = Some(provider_error.to_string());

            match save_replay_record(pool, &record).await {
                Ok(()) => Err(LlmTraceError::ProviderCall(provider_error)),
                Err(persist_error) => Err(outcome_not_recorded(provider_error, persist_error)),
            }
        }
    }
}

fn resolve_provider(
    registry: &ProviderRegistry,
    name: &str,
) -> Result<ResolvedProvider, LlmTraceError> {
    match registry.resolve(name) {
        Some(provider) if !provider.api_key.is_empty() => Ok(provider),
        _ => Err(LlmTraceError::ProviderConfig(format!(
            "API key not configured for provider: {}",
            name
        ))),
    }
}

fn build_request(request: &Value, model: &str) -> Result<ChatCompletionRequest, LlmTraceError> {
    let mut request = ChatCompletionRequest::from_value(request)
        .map_err(|e| LlmTraceError::Validation(format!("unsupported request type: {}", e)))?;

    let model = model.trim();
    if !model.is_empty() {
        request.model = model.to_string();
    }
    Ok(request)
}

async fn call_provider(
    provider: &ResolvedProvider,
    config: &ReplayConfig,
    request: &ChatCompletionRequest,
) -> Result<ChatCompletionResponse, ChatError> {
    let client = ChatClient::new(&provider.api_key, &provider.base_url, config.timeout())?;
    client.complete(request).await
}

async fn save_replay_record(pool: &SqlitePool, record: &ReplayRecord) -> Result<(), LlmTraceError> {
    sqlx::query(
        r#"
        INSERT INTO replay_records (id, replay_session_id, turn_number, request, response, status,
                                    error_message, provider, model, debug_config, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.replay_session_id)
    .bind(record.turn_number)
    .bind(&record.request)
    .bind(&record.response)
    .bind(record.status)
    .bind(&record.error_message)
    .bind(&record.provider)
    .bind(&record.model)
    .bind(&record.debug_config)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

fn outcome_not_recorded(provider_error: ChatError, persist_error: LlmTraceError) -> LlmTraceError {
    tracing::error!(
        provider_error = %provider_error,
        persist_error = %persist_error,
        "Failed to record replay error outcome"
    );
    LlmTraceError::OutcomeNotRecorded {
        provider_error,
        persist_error: Box::new(persist_error),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::replay_sessions::{create_replay_session, CreateReplaySession};
    use llmtrace_core::config::ProviderConfig;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_pool() -> SqlitePool {
        llmtrace_core::db::connect_in_memory()
            .await
            .expect("Failed to open in-memory database")
    }

    fn registry_for(mock_server: &MockServer) -> ProviderRegistry {
        let mut providers = BTreeMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                name: "OpenAI".to_string(),
                api_key: "sk-test".to_string(),
                base_url: mock_server.uri(),
                enabled: true,
                models: vec!["gpt-4o".to_string()],
            },
        );
        providers.insert(
            "keyless".to_string(),
            ProviderConfig {
                name: "Keyless".to_string(),
                base_url: mock_server.uri(),
                ..Default::default()
            },
        );
        ProviderRegistry::new(providers)
    }

    fn replay_config() -> ReplayConfig {
        ReplayConfig { timeout_seconds: 5 }
    }

    fn chat_request() -> Value {
        json!({
            "model": "gpt-3.5-turbo",
            "messages": [{ "role": "user", "content": "What is 2+2?" }]
        })
    }

    fn mock_completion() -> Value {
        json!({
            "id": "chatcmpl-42",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "4" },
                "finish_reason": "stop"
            }]
        })
    }

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
        n
    }

    async fn replay_session(pool: &SqlitePool) -> String {
        save_trace(pool, TraceInput::new("s1", 1, chat_request(), TraceStatus::Success))
            .await
            .unwrap();
        create_replay_session(
            pool,
            CreateReplaySession {
                original_session_id: "s1".to_string(),
                start_turn_number: 1,
                name: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn replay_input(provider: &str, model: &str) -> ReplayInput {
        ReplayInput {
            session_id: "s1".to_string(),
            turn_number: 2,
            request: chat_request(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replay_resolves_display_name_and_overrides_model() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "What is 2+2?" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let record = execute_replay(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            replay_input("OpenAI", "gpt-4o"),
        )
        .await
        .expect("replay should succeed");

        assert_eq!(record.status, TraceStatus::Success);
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.turn_number, 2);
        let request: Value = serde_json::from_str(&record.request).unwrap();
        assert_eq!(request["model"], "gpt-4o");
        let response: Value = serde_json::from_str(record.response.as_deref().unwrap()).unwrap();
        assert_eq!(response["choices"][0]["message"]["content"], "4");

        let stored = store::get_record(&pool, &record.id).await.unwrap().unwrap();
        assert_eq!(stored.request, record.request);
        assert_eq!(stored.response, record.response);
    }

    #[tokio::test]
    async fn test_replay_keeps_request_model_when_override_empty() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "model": "gpt-3.5-turbo" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let record = execute_replay(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            replay_input("openai", ""),
        )
        .await
        .unwrap();
        assert!(record.request.contains("gpt-3.5-turbo"));
    }

    #[tokio::test]
    async fn test_replay_forwards_tool_calling_fields() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        let captured = json!({
            "model": "gpt-3.5-turbo",
            "messages": [
                { "role": "user", "content": "Weather in Paris?" },
                {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"city\":\"Paris\"}" }
                    }]
                },
                { "role": "tool", "tool_call_id": "call_1", "content": "18C and sunny" }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "parameters": { "type": "object", "properties": { "city": { "type": "string" } } }
                }
            }],
            "tool_choice": "auto",
            "stop": ["END"],
            "response_format": { "type": "json_object" },
            "seed": 42,
            "temperature": 0.7
        });
        let mut sent = captured.clone();
        sent["model"] = json!("gpt-4o");

        let completion = json!({
            "id": "chatcmpl-43",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_2",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"city\":\"Lyon\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_json(sent.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion.clone()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut input = replay_input("openai", "gpt-4o");
        input.request = captured;
        let record = execute_replay(&pool, &registry_for(&mock_server), &replay_config(), input)
            .await
            .expect("replay should succeed");

        let stored = store::get_record(&pool, &record.id).await.unwrap().unwrap();
        let request: Value = serde_json::from_str(&stored.request).unwrap();
        assert_eq!(request, sent);
        let response: Value = serde_json::from_str(stored.response.as_deref().unwrap()).unwrap();
        assert_eq!(response, completion);
    }

    #[tokio::test]
    async fn test_replay_unknown_provider_is_config_error_and_persists_nothing() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion()))
            .expect(0)
            .mount(&mock_server)
            .await;

        let registry = registry_for(&mock_server);
        for provider in ["anthropic", "keyless", ""] {
            let result =
                execute_replay(&pool, &registry, &replay_config(), replay_input(provider, "")).await;
            assert!(
                matches!(result, Err(LlmTraceError::ProviderConfig(_))),
                "provider {:?} gave {:?}",
                provider,
                result
            );
        }
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM records").await, 0);
    }

    #[tokio::test]
    async fn test_replay_rejects_non_chat_request() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        let mut input = replay_input("openai", "");
        input.request = json!({ "prompt": "legacy completion" });

        let result =
            execute_replay(&pool, &registry_for(&mock_server), &replay_config(), input).await;
        assert!(matches!(result, Err(LlmTraceError::Validation(_))), "got {:?}", result);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM records").await, 0);
    }

    #[tokio::test]
    async fn test_replay_provider_failure_is_recorded_then_propagated() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "Rate limit reached" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = execute_replay(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            replay_input("openai", ""),
        )
        .await;

        match result {
            Err(LlmTraceError::ProviderCall(ChatError::Api { status, .. })) => assert_eq!(status, 429),
            other => panic!("Expected ProviderCall, got {:?}", other),
        }

        let (status, error_message, response): (String, Option<String>, Option<String>) =
            sqlx::query_as("SELECT status, error_message, response FROM records")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "error");
        assert!(error_message.unwrap().contains("Rate limit reached"));
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_replay_timeout_is_recorded() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(mock_completion())
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let result = execute_replay(
            &pool,
            &registry_for(&mock_server),
            &ReplayConfig { timeout_seconds: 1 },
            replay_input("openai", ""),
        )
        .await;

        assert!(
            matches!(result, Err(LlmTraceError::ProviderCall(ChatError::Timeout { seconds: 1 }))),
            "got {:?}",
            result
        );
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM records WHERE status = 'error'").await,
            1
        );
    }

    #[tokio::test]
    async fn test_replay_error_persistence_failure_is_reported_separately() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        sqlx::query(
            "CREATE TRIGGER reject_records BEFORE INSERT ON records
             BEGIN SELECT RAISE(ABORT, 'store offline'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = execute_replay(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            replay_input("openai", ""),
        )
        .await;

        match result {
            Err(LlmTraceError::OutcomeNotRecorded {
                provider_error,
                persist_error,
            }) => {
                assert!(matches!(provider_error, ChatError::Api { status: 500, .. }));
                assert!(matches!(*persist_error, LlmTraceError::Database(_)));
            }
            other => panic!("Expected OutcomeNotRecorded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_debug_applies_wellformed_overrides_only() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;
        let replay_session_id = replay_session(&pool).await;

        // Exact body: temperature applied, no max_tokens key at all.
        Mock::given(method("POST"))
            .and(body_json(json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "What is 2+2?" }],
                "temperature": 0.25
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let record = execute_replay_debug(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            ReplayDebugInput {
                replay_session_id: replay_session_id.clone(),
                turn_number: 2,
                request: chat_request(),
                provider: "OPENAI".to_string(),
                model: "gpt-4o".to_string(),
                debug_config: Some(json!({ "temperature": 0.25, "max_tokens": "oops" })),
            },
        )
        .await
        .expect("debug replay should succeed");

        assert_eq!(record.status, TraceStatus::Success);
        assert_eq!(record.provider, "openai");
        assert_eq!(record.model, "gpt-4o");
        assert_eq!(record.debug_config, r#"{"temperature":0.25}"#);

        let page = store::list_replay_records(
            &pool,
            &replay_session_id,
            store::Pagination::records(None, None),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, record.id);
        assert_eq!(page.data[0].debug_config, record.debug_config);

        // Replay records never leak into the original session.
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM records").await, 1);
    }

    #[tokio::test]
    async fn test_replay_debug_unknown_session_is_not_found() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;

        let result = execute_replay_debug(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            ReplayDebugInput {
                replay_session_id: "missing".to_string(),
                turn_number: 1,
                request: chat_request(),
                provider: "openai".to_string(),
                model: String::new(),
                debug_config: None,
            },
        )
        .await;

        assert!(matches!(result, Err(LlmTraceError::NotFound { .. })), "got {:?}", result);
    }

    #[tokio::test]
    async fn test_replay_debug_failure_records_error_with_provider_and_config() {
        let pool = test_pool().await;
        let mock_server = MockServer::start().await;
        let replay_session_id = replay_session(&pool).await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "message": "overloaded" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = execute_replay_debug(
            &pool,
            &registry_for(&mock_server),
            &replay_config(),
            ReplayDebugInput {
                replay_session_id: replay_session_id.clone(),
                turn_number: 3,
                request: chat_request(),
                provider: "openai".to_string(),
                model: String::new(),
                debug_config: Some(json!({ "top_p": 0.5 })),
            },
        )
        .await;
        assert!(matches!(result, Err(LlmTraceError::ProviderCall(_))), "got {:?}", result);

        let page = store::list_replay_records(
            &pool,
            &replay_session_id,
            store::Pagination::records(None, None),
        )
        .await
        .unwrap();
        let stored = &page.data[0];
        assert_eq!(stored.status, TraceStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("API error (503): overloaded"));
        assert_eq!(stored.provider, "openai");
        assert_eq!(stored.model, "gpt-3.5-turbo");
        assert_eq!(stored.debug_config, r#"{"top_p":0.5}"#);
        assert!(stored.response.is_none());
    }
}
