use std::fmt;

/**
 * \brief Ordered list of human-readable validation messages.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /**
     * \brief `Ok(value)` if nothing was collected, otherwise `Err(self)`.
     */
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

/**
 * \brief Errors surfaced by adapters and the dispatcher.
 *
 * `Display` never carries credentials or raw upstream bodies. The body of an
 * `Upstream` error is only reachable through `upstream_body()`.
 */
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    Config(String),

    #[error("Invalid {provider} credentials. Please check your settings.")]
    Auth { provider: &'static str, status: u16 },

    #[error("{provider} rate limit exceeded. Please try again later.")]
    RateLimit { provider: &'static str },

    #[error("{provider} request timed out after {seconds} seconds. Try a simpler query.")]
    Timeout { provider: &'static str, seconds: u64 },

    #[error("{provider} API error ({status}). Please try again in a moment.")]
    Upstream {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unable to reach {provider}: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{0}")]
    Parse(String),

    #[error("Provider {0} is not supported")]
    UnsupportedProvider(String),
}

impl GenerateError {
    /**
     * \brief HTTP status used by the route layer.
     */
    pub fn http_status(&self) -> u16 {
        match self {
            GenerateError::Input(_)
            | GenerateError::Config(_)
            | GenerateError::UnsupportedProvider(_) => 400,
            GenerateError::Auth { .. } => 401,
            GenerateError::RateLimit { .. } => 429,
            GenerateError::Timeout { .. } => 504,
            GenerateError::Upstream { .. }
            | GenerateError::Network { .. }
            | GenerateError::Parse(_) => 500,
        }
    }

    /**
     * \brief Stable snake_case identifier for JSON error bodies and telemetry.
     */
    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::Input(_) => "input_error",
            GenerateError::Config(_) => "config_error",
            GenerateError::Auth { .. } => "auth_error",
            GenerateError::RateLimit { .. } => "rate_limit_error",
            GenerateError::Timeout { .. } => "timeout_error",
            GenerateError::Upstream { .. } => "upstream_error",
            GenerateError::Network { .. } => "network_error",
            GenerateError::Parse(_) => "parse_error",
            GenerateError::UnsupportedProvider(_) => "unsupported_provider",
        }
    }

    pub fn upstream_body(&self) -> Option<&str> {
        match self {
            GenerateError::Upstream { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn invalid_query(errors: ValidationErrors) -> Self {
        GenerateError::Input(format!("Invalid query: {}", errors))
    }

    pub fn invalid_config(errors: ValidationErrors) -> Self {
        GenerateError::Input(format!("Invalid configuration: {}", errors))
    }

    pub fn invalid_chart(errors: ValidationErrors) -> Self {
        GenerateError::Parse(format!("Invalid chart structure: {}", errors))
    }
}
