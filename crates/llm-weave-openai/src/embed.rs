//! `POST /embeddings`, shared by both dialects.

use llm_weave::embed::{EmbedRequest, EmbedResponse};
use llm_weave::error::LlmError;
use llm_weave::usage::Usage;
use serde_json::Value;

use crate::types::{self, EmbedResponse as WireResponse};

pub(crate) fn to_wire(request: &EmbedRequest) -> Result<Value, LlmError> {
    if request.input.is_empty() {
        return Err(LlmError::Validation("embedding input is empty".into()));
    }
    Ok(serde_json::to_value(types::EmbedRequest {
        model: &request.model,
        input: &request.input,
        encoding_format: "float",
    })?)
}

/// Vectors come back tagged with their input index; they are returned
/// in input order.
pub(crate) fn from_wire(wire: Value) -> Result<EmbedResponse, LlmError> {
    let mut response: WireResponse = serde_json::from_value(wire.clone()).map_err(|e| {
        LlmError::response_format(
            format!("Failed to parse embeddings response: {e}"),
            wire.to_string(),
        )
    })?;
    response.data.sort_by_key(|item| item.index);
    let usage = response.usage.as_ref().map_or_else(Usage::default, |u| {
        Usage::from_counts(u.prompt_tokens, 0, u.total_tokens)
    });
    Ok(EmbedResponse {
        embeddings: response.data.into_iter().map(|item| item.embedding).collect(),
        usage,
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
            model: "text-embedding-3-small".into(),
            input: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            to_wire(&request).unwrap(),
            json!({"model": "text-embedding-3-small", "input": ["a", "b"], "encoding_format": "float"})
        );
        assert!(to_wire(&EmbedRequest::default()).unwrap_err().is_validation());
    }

    #[test]
    fn test_from_wire_restores_input_order() {
        let response = from_wire(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.5, 0.25]},
                {"object": "embedding", "index": 0, "embedding": [1.0, -1.0]}
            ],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 6, "total_tokens": 6}
        }))
        .unwrap();
        assert_eq!(response.embeddings, vec![vec![1.0, -1.0], vec![0.5, 0.25]]);
        assert_eq!(response.usage.input_tokens, 6);
        assert_eq!(response.usage.total_tokens, 6);
        assert_eq!(response.model.as_deref(), Some("text-embedding-3-small"));
    }
}
