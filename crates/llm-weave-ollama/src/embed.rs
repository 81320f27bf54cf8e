//! `POST /api/embed`.

use llm_weave::embed::{EmbedRequest, EmbedResponse};
use llm_weave::error::LlmError;
use llm_weave::usage::Usage;
use serde_json::Value;

use crate::types::{self, EmbedResponse as WireResponse};

pub(crate) fn to_wire(request: &EmbedRequest, keep_alive: Option<&str>) -> Result<Value, LlmError> {
    if request.input.is_empty() {
        return Err(LlmError::Validation("embedding input is empty".into()));
    }
    Ok(serde_json::to_value(types::EmbedRequest {
        model: &request.model,
        input: &request.input,
        keep_alive,
    })?)
}

pub(crate) fn from_wire(request: &EmbedRequest, wire: Value) -> Result<EmbedResponse, LlmError> {
    let response: WireResponse = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(
            format!("Failed to parse embeddings response: {e}"),
            wire.to_string(),
        )
    })?;
    if response.embeddings.len() != request.input.len() {
        return Err(LlmError::response_format(
            format!(
                "expected {} embeddings, got {}",
                request.input.len(),
                response.embeddings.len()
            ),
            wire.to_string(),
        ));
    }
    Ok(EmbedResponse {
        embeddings: response.embeddings,
        usage: Usage::from_counts(response.prompt_eval_count.unwrap_or(0), 0, None),
        model: response.model,
        raw_response: wire,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_to_wire() {
        let request = EmbedRequest {
            model: "nomic-embed-text".into(),
            input: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            to_wire(&request, Some("1m")).unwrap(),
            json!({"model": "nomic-embed-text", "input": ["a", "b"], "keep_alive": "1m"})
        );
        assert!(to_wire(&EmbedRequest::default(), None).unwrap_err().is_validation());
    }

    #[test]
    fn test_from_wire() {
        let request = EmbedRequest::new(["hello", "world"]);
        let response = from_wire(
            &request,
            json!({
                "model": "nomic-embed-text",
                "embeddings": [[0.5, 0.25], [-1.0, 0.0]],
                "prompt_eval_count": 4
            }),
        )
        .unwrap();
        assert_eq!(response.embeddings, vec![vec![0.5, 0.25], vec![-1.0, 0.0]]);
        assert_eq!(response.usage.input_tokens, 4);
        assert_eq!(response.usage.total_tokens, 4);
        assert_eq!(response.model.as_deref(), Some("nomic-embed-text"));
    }

    #[test]
    fn test_from_wire_count_mismatch() {
        let request = EmbedRequest::new(["hello", "world"]);
        let err = from_wire(&request, json!({"embeddings": [[0.5]]})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat { .. }));
    }
}
