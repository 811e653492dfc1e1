use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_non_empty_string_field(llm, "llm.chat_model", "chat_model")?;
        validate_non_empty_string_field(llm, "llm.completion_model", "completion_model")?;
        validate_non_empty_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_u64_field(
            llm,
            "llm.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
        validate_u64_field(
            llm,
            "llm.stream_idle_timeout_secs",
            "stream_idle_timeout_secs",
            1,
            3_600,
        )?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(
            retrieval,
            "retrieval.candidate_pool_size",
            "candidate_pool_size",
            1,
            10_000,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.vector_pool_size",
            "vector_pool_size",
            1,
            10_000,
        )?;
        validate_u64_field(retrieval, "retrieval.search_limit", "search_limit", 1, 100)?;
        validate_u64_field(
            retrieval,
            "retrieval.stream_context_limit",
            "stream_context_limit",
            1,
            100,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.upstream_timeout_secs",
            "upstream_timeout_secs",
            1,
            600,
        )?;
        validate_u64_field(retrieval, "retrieval.timeout_retries", "timeout_retries", 0, 5)?;
    }

    if let Some(synthesis) = expect_optional_object(root, "synthesis")? {
        validate_f64_field(synthesis, "synthesis.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(synthesis, "synthesis.max_tokens", "max_tokens", 1, 128_000)?;
        validate_u64_field(
            synthesis,
            "synthesis.max_history_turns",
            "max_history_turns",
            0,
            200,
        )?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !(min..=max).contains(&number) {
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_non_empty_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn out_of_range<T: std::fmt::Display>(path: &str, min: T, max: T) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn error_text(config: Value) -> String {
        match validate_config(&config) {
            Err(ApiError::BadRequest(msg)) => msg,
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[test]
    fn accepts_empty_and_partial_configs() {
        assert!(validate_config(&json!({})).is_ok());
        assert!(validate_config(&json!({
            "retrieval": { "search_limit": 5, "timeout_retries": 0 },
            "synthesis": { "temperature": 0.1 },
            "llm": { "api_key": null }
        }))
        .is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let msg = error_text(json!({ "retrieval": { "search_limit": 0 } }));
        assert!(msg.contains("retrieval.search_limit"), "{msg}");

        let msg = error_text(json!({ "synthesis": { "temperature": 3.5 } }));
        assert!(msg.contains("synthesis.temperature"), "{msg}");
    }

    #[test]
    fn rejects_wrong_types() {
        let msg = error_text(json!({ "server": "localhost" }));
        assert_eq!(msg, "Invalid config at 'server': expected object");

        let msg = error_text(json!({ "llm": { "embedding_model": "  " } }));
        assert!(msg.contains("cannot be empty"), "{msg}");

        let msg = error_text(json!({ "server": { "cors_allowed_origins": [1] } }));
        assert!(msg.contains("cors_allowed_origins[0]"), "{msg}");
    }
}
