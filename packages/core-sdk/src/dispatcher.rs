use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::GenerateError;
use crate::llm::{
    build_http_client, AnthropicAdapter, ChartGenerator, GeminiAdapter, OpenAiProfile,
    OpenAiShapedAdapter,
};
use crate::models::{ChartSpec, DynamicData, ProviderConfig, ProviderKind};
use crate::telemetry;
use crate::validation::{validate_provider_config, validate_user_query};

/**
 * \brief Built-in adapter for a provider tag, sharing `client`.
 */
pub fn adapter_for(kind: ProviderKind, client: reqwest::Client) -> Arc<dyn ChartGenerator> {
    match kind {
        ProviderKind::Google => Arc::new(GeminiAdapter::new(client)),
        ProviderKind::OpenAi => Arc::new(OpenAiShapedAdapter::new(client, OpenAiProfile::openai())),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(client)),
        ProviderKind::OpenAiCompatible => Arc::new(OpenAiShapedAdapter::new(
            client,
            OpenAiProfile::compatible(),
        )),
        ProviderKind::Ollama => Arc::new(OpenAiShapedAdapter::new(client, OpenAiProfile::ollama())),
    }
}

/**
 * \brief Provider tag → adapter table.
 */
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ChartGenerator>>,
}

impl ProviderRegistry {
    /** \brief Empty registry; every lookup fails until `register` is called. */
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            registry.register(kind, adapter_for(kind, client.clone()));
        }
        registry
    }

    pub fn with_defaults() -> Result<Self, GenerateError> {
        Ok(Self::with_client(build_http_client()?))
    }

    /**
     * \brief Installs or replaces the adapter for `kind`, returning the previous one.
     */
    pub fn register(
        &mut self,
        kind: ProviderKind,
        adapter: Arc<dyn ChartGenerator>,
    ) -> Option<Arc<dyn ChartGenerator>> {
        self.adapters.insert(kind, adapter)
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ChartGenerator>> {
        self.adapters.get(&kind).cloned()
    }

    /** \brief Registered tags in declaration order. */
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }
}

pub struct Dispatcher {
    registry: ProviderRegistry,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /**
     * \brief Validates query and config, then delegates to the provider's adapter.
     *
     * Validation failures return before any adapter is touched.
     */
    pub async fn generate_chart(
        &self,
        prompt: &str,
        config: &ProviderConfig,
        system_prompt_template: &str,
        dynamic_data: Option<&DynamicData>,
    ) -> Result<ChartSpec, GenerateError> {
        let started = Instant::now();
        let result = self
            .dispatch_chart(prompt, config, system_prompt_template, dynamic_data)
            .await;
        telemetry::record_generation(
            config.provider.as_str(),
            "chart",
            started.elapsed(),
            result.as_ref().map(|_| ()),
        )
        .await;
        result
    }

    async fn dispatch_chart(
        &self,
        prompt: &str,
        config: &ProviderConfig,
        system_prompt_template: &str,
        dynamic_data: Option<&DynamicData>,
    ) -> Result<ChartSpec, GenerateError> {
        let query = validate_user_query(prompt).map_err(GenerateError::invalid_query)?;
        validate_provider_config(config).map_err(GenerateError::invalid_config)?;
        let adapter = self.lookup(config.provider)?;

        info!(
            provider = config.provider.as_str(),
            model = %config.model,
            "dispatching chart request"
        );
        adapter
            .generate(&query, system_prompt_template, config, dynamic_data)
            .await
    }

    /**
     * \brief Soft path; an invalid config or missing adapter yields `[]`.
     */
    pub async fn generate_suggestions(
        &self,
        config: &ProviderConfig,
        system_prompt_template: &str,
        dynamic_data: &DynamicData,
    ) -> Vec<String> {
        if let Err(errors) = validate_provider_config(config) {
            warn!("skipping suggestions, invalid configuration: {}", errors);
            return Vec::new();
        }
        let adapter = match self.lookup(config.provider) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("skipping suggestions: {}", e);
                return Vec::new();
            }
        };

        let started = Instant::now();
        let suggestions = adapter
            .generate_suggestions(system_prompt_template, config, dynamic_data)
            .await;
        telemetry::record_generation(
            config.provider.as_str(),
            "suggestions",
            started.elapsed(),
            Ok(()),
        )
        .await;
        suggestions
    }

    fn lookup(&self, kind: ProviderKind) -> Result<Arc<dyn ChartGenerator>, GenerateError> {
        self.registry
            .get(kind)
            .ok_or_else(|| GenerateError::UnsupportedProvider(kind.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubGenerator {
        calls: AtomicUsize,
        reply: Result<String, ()>,
        last_user: Mutex<Option<String>>,
    }

    impl StubGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Ok(reply.to_string()),
                last_user: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Err(()),
                last_user: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ChartGenerator for StubGenerator {
        fn name(&self) -> &'static str {
            "Stub"
        }

        fn check_config(&self, _config: &ProviderConfig) -> Result<(), GenerateError> {
            Ok(())
        }

        async fn complete(
            &self,
            _config: &ProviderConfig,
            request: &CompletionRequest,
        ) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user.lock().expect("lock") = Some(request.user.clone());
            self.reply
                .clone()
                .map_err(|_| GenerateError::RateLimit { provider: "Stub" })
        }
    }

    fn openai_config() -> ProviderConfig {
        ProviderConfig {
            provider: ProviderKind::OpenAi,
            api_key: Some("sk-test".into()),
            model: "gpt-4o".into(),
            base_url: None,
        }
    }

    fn data() -> DynamicData {
        DynamicData {
            dataset: vec![serde_json::from_str(r#"{"region":"EU","sales":10}"#).expect("row")],
            schema: "Dataset Schema:\n- region: string\n- sales: number".into(),
            file_name: "sales.csv".into(),
            suggestions: None,
        }
    }

    fn dispatcher_with(stub: Arc<StubGenerator>) -> Dispatcher {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderKind::OpenAi, stub);
        Dispatcher::new(registry)
    }

    const TEMPLATE: &str = "{{SCHEMA}}\n{{DATASET}}";
    const CHART: &str = r#"{"title":"Sales","description":"Total","type":"bar","xAxisKey":"region","dataKey":"sales","data":[{"region":"EU","sales":10}]}"#;

    #[tokio::test]
    async fn test_short_prompt_never_reaches_adapter() {
        let stub = StubGenerator::replying(CHART);
        let d = dispatcher_with(stub.clone());
        let err = d
            .generate_chart("hi", &openai_config(), TEMPLATE, Some(&data()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Input(_)));
        assert!(err.to_string().contains("Query is too short"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_never_reaches_adapter() {
        let stub = StubGenerator::replying(CHART);
        let d = dispatcher_with(stub.clone());
        let mut cfg = openai_config();
        cfg.api_key = None;
        let err = d
            .generate_chart("Show total sales", &cfg, TEMPLATE, Some(&data()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Input(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_unsupported() {
        let d = Dispatcher::new(ProviderRegistry::new());
        let err = d
            .generate_chart("Show total sales", &openai_config(), TEMPLATE, Some(&data()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::UnsupportedProvider(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_success_returns_validated_chart_with_trimmed_query() {
        let stub = StubGenerator::replying(CHART);
        let d = dispatcher_with(stub.clone());
        let chart = d
            .generate_chart("  Show total sales  ", &openai_config(), TEMPLATE, Some(&data()))
            .await
            .expect("chart");
        assert_eq!(chart.title, "Sales");
        assert_eq!(chart.data.len(), 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            stub.last_user.lock().expect("lock").as_deref(),
            Some("Show total sales")
        );
    }

    #[tokio::test]
    async fn test_missing_dataset_is_input_error() {
        let stub = StubGenerator::replying(CHART);
        let d = dispatcher_with(stub.clone());
        let err = d
            .generate_chart("Show total sales", &openai_config(), TEMPLATE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Input(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_adapter_errors_propagate() {
        let d = dispatcher_with(StubGenerator::failing());
        let err = d
            .generate_chart("Show total sales", &openai_config(), TEMPLATE, Some(&data()))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::RateLimit { .. }));
    }

    #[tokio::test]
    async fn test_suggestions_soft_failures() {
        let d = dispatcher_with(StubGenerator::failing());
        assert!(d
            .generate_suggestions(&openai_config(), TEMPLATE, &data())
            .await
            .is_empty());

        let mut bad = openai_config();
        bad.model = String::new();
        let stub = StubGenerator::replying(r#"{"suggestions":["a"]}"#);
        let d = dispatcher_with(stub.clone());
        assert!(d.generate_suggestions(&bad, TEMPLATE, &data()).await.is_empty());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_suggestions_success() {
        let stub = StubGenerator::replying(r#"{"suggestions":["Sales by region","Top regions"]}"#);
        let d = dispatcher_with(stub);
        let list = d.generate_suggestions(&openai_config(), TEMPLATE, &data()).await;
        assert_eq!(list, vec!["Sales by region", "Top regions"]);
    }

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = ProviderRegistry::with_client(reqwest::Client::new());
        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
        assert_eq!(
            registry.get(ProviderKind::Ollama).map(|a| a.name()),
            Some("Ollama")
        );
    }
}
