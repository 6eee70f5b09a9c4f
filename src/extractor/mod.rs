pub mod http;

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use http::HttpExtractor;

/// How the extractor should turn markup into data. The orchestrator passes it
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionStrategy {
    #[default]
    Auto,
    Css {
        schema: Value,
    },
    Ai {
        instruction: String,
    },
}

impl ExtractionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Css { .. } => "css",
            Self::Ai { .. } => "ai",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Extraction {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Vec<Map<String, Value>>>,
}

/// Turns an HTML snapshot into structured data. Never sees the live browser.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        html: &str,
        strategy: &ExtractionStrategy,
        options: &Map<String, Value>,
    ) -> Result<Extraction>;
}

/// Entity post-processing of extracted content, keyed by entity kind
/// (for example `emails` or `prices`).
#[async_trait::async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, extraction: &Extraction) -> Result<Map<String, Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_tagging() {
        let css = ExtractionStrategy::Css {
            schema: json!({"name": "items", "baseSelector": ".item"}),
        };
        let value = serde_json::to_value(&css).unwrap();
        assert_eq!(value["type"], "css");
        assert_eq!(value["schema"]["baseSelector"], ".item");

        let parsed: ExtractionStrategy = serde_json::from_value(json!({"type": "auto"})).unwrap();
        assert_eq!(parsed, ExtractionStrategy::Auto);
        assert_eq!(parsed.name(), "auto");
    }

    #[test]
    fn test_extraction_without_structured_data() {
        let extraction: Extraction = serde_json::from_value(json!({"content": "Hi"})).unwrap();
        assert_eq!(extraction.content, "Hi");
        assert!(extraction.structured_data.is_none());
    }
}
