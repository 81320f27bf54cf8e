//! Embeddings request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

/// Text to embed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Embedding model. Empty means the provider's configured default.
    #[serde(default)]
    pub model: String,
    /// One vector is returned per input string, in order.
    pub input: Vec<String>,
}

impl EmbedRequest {
    /// Embeds `input` with the provider's default model.
    pub fn new<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model: String::new(),
            input: input.into_iter().map(Into::into).collect(),
        }
    }
}

/// Vectors returned for an [`EmbedRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbedResponse {
    /// One vector per input string.
    pub embeddings: Vec<Vec<f32>>,
    /// Token usage.
    pub usage: Usage,
    /// Model that produced the vectors.
    pub model: Option<String>,
    /// The wire body that came back.
    pub raw_response: Value,
}

/// Reads a JSON array of numbers as an `f32` vector.
#[allow(clippy::cast_possible_truncation)]
pub fn vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|n| n.as_f64().map(|x| x as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_collects_inputs() {
        let request = EmbedRequest::new(["a", "b"]);
        assert_eq!(request.input, vec!["a".to_owned(), "b".to_owned()]);
        assert!(request.model.is_empty());
    }

    #[test]
    fn test_vector() {
        assert_eq!(vector(&json!([0.5, 1, -2.0])), Some(vec![0.5, 1.0, -2.0]));
        assert_eq!(vector(&json!([0.5, "x"])), None);
        assert_eq!(vector(&json!({})), None);
    }
}
