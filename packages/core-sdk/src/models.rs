use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/**
 * \brief Supported LLM provider tags; serialized in SCREAMING_SNAKE_CASE.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Google,
    #[serde(rename = "OPENAI")]
    OpenAi,
    Anthropic,
    #[serde(rename = "OPENAI_COMPATIBLE")]
    OpenAiCompatible,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Google,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::OpenAiCompatible,
        ProviderKind::Ollama,
    ];

    /**
     * \brief Wire tag, identical to the serde representation.
     */
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "GOOGLE",
            ProviderKind::OpenAi => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::OpenAiCompatible => "OPENAI_COMPATIBLE",
            ProviderKind::Ollama => "OLLAMA",
        }
    }

    /**
     * \brief Human-facing label shown in settings and error messages.
     */
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Google => "Google Gemini",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic (Claude)",
            ProviderKind::OpenAiCompatible => "OpenAI Compatible",
            ProviderKind::Ollama => "Ollama (local)",
        }
    }

    pub fn parse(raw: &str) -> Option<ProviderKind> {
        let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief Provider settings supplied by the caller; revalidated on every use.
 */
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /** \brief Which vendor adapter handles the request */
    pub provider: ProviderKind,
    /** \brief Credential; required for OpenAI and Anthropic */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /** \brief Model identifier passed through to the vendor */
    pub model: String,
    /** \brief Endpoint root; required for compatible endpoints and Ollama */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /**
     * \brief Non-blank API key, if any.
     */
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /**
     * \brief Non-blank base URL, if any. An empty string counts as absent.
     */
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/**
 * \brief One uploaded row: column name to string/number/boolean/null.
 */
pub type DatasetRow = Map<String, Value>;

/**
 * \brief Dataset summary produced by the upload collaborator.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicData {
    pub dataset: Vec<DatasetRow>,
    pub schema: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl DynamicData {
    /**
     * \brief Appends suggestions, skipping ones already present.
     */
    pub fn merge_suggestions<I>(&mut self, more: I)
    where
        I: IntoIterator<Item = String>,
    {
        let list = self.suggestions.get_or_insert_with(Vec::new);
        for item in more {
            if !list.iter().any(|s| s == &item) {
                list.push(item);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChartType {
    Bar,
    Line,
    Area,
    Pie,
}

impl ChartType {
    pub const NAMES: [&'static str; 4] = ["BAR", "LINE", "AREA", "PIE"];

    pub fn from_name(name: &str) -> Option<ChartType> {
        match name {
            "BAR" => Some(ChartType::Bar),
            "LINE" => Some(ChartType::Line),
            "AREA" => Some(ChartType::Area),
            "PIE" => Some(ChartType::Pie),
            _ => None,
        }
    }
}

/**
 * \brief Plottable cell. Numbers keep their JSON representation.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Number(Number),
    Text(String),
}

impl DataValue {
    pub fn is_number(&self) -> bool {
        matches!(self, DataValue::Number(_))
    }
}

pub type DataPoint = BTreeMap<String, DataValue>;

/**
 * \brief Validated, renderer-ready chart description. Never mutated after validation.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub x_axis_key: String,
    pub data_key: String,
    pub data: Vec<DataPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/**
 * \brief Message-list entry for OpenAI-shaped wire protocols.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_config_wire_names() {
        let cfg: ProviderConfig = serde_json::from_value(json!({
            "provider": "OPENAI_COMPATIBLE",
            "apiKey": "sk-test",
            "model": "llama3",
            "baseUrl": "http://localhost:1234/v1"
        }))
        .expect("parse config");
        assert_eq!(cfg.provider, ProviderKind::OpenAiCompatible);
        assert_eq!(cfg.api_key(), Some("sk-test"));
        assert_eq!(cfg.base_url(), Some("http://localhost:1234/v1"));
    }

    #[test]
    fn test_provider_config_debug_hides_key() {
        let cfg = ProviderConfig {
            provider: ProviderKind::OpenAi,
            api_key: Some("sk-secret".to_string()),
            model: "gpt-4o".to_string(),
            base_url: None,
        };
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_blank_base_url_counts_as_absent() {
        let cfg = ProviderConfig {
            provider: ProviderKind::OpenAiCompatible,
            api_key: None,
            model: "m".to_string(),
            base_url: Some("  ".to_string()),
        };
        assert!(cfg.base_url().is_none());
    }

    #[test]
    fn test_provider_kind_parse_is_lenient() {
        assert_eq!(ProviderKind::parse("openai"), Some(ProviderKind::OpenAi));
        assert_eq!(
            ProviderKind::parse("openai-compatible"),
            Some(ProviderKind::OpenAiCompatible)
        );
        assert_eq!(ProviderKind::parse("mistral"), None);
    }

    #[test]
    fn test_chart_spec_keeps_integer_numbers() {
        let spec: ChartSpec = serde_json::from_value(json!({
            "title": "t",
            "description": "d",
            "type": "LINE",
            "xAxisKey": "month",
            "dataKey": "sales",
            "data": [{"month": "Jan", "sales": 100}]
        }))
        .expect("parse chart");
        let back = serde_json::to_value(&spec).expect("serialize chart");
        assert_eq!(back["data"][0]["sales"], json!(100));
        assert!(back.get("id").is_none());
    }

    #[test]
    fn test_merge_suggestions_skips_duplicates() {
        let mut data = DynamicData {
            suggestions: Some(vec!["Show total sales".to_string()]),
            ..Default::default()
        };
        data.merge_suggestions(vec![
            "Show total sales".to_string(),
            "sales by region".to_string(),
        ]);
        assert_eq!(
            data.suggestions.as_deref(),
            Some(&["Show total sales".to_string(), "sales by region".to_string()][..])
        );
    }
}
