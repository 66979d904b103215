/**
 * \brief Environment keys read by `ChatConfig::from_env`.
 */
pub const ENV_GRAPHQL_URL: &str = "MURMUR_GRAPHQL_API_URL";
pub const ENV_REST_URL: &str = "MURMUR_CHAT_API_URL";
pub const ENV_PROVIDER: &str = "MURMUR_CHAT_PROVIDER";
pub const ENV_MODEL: &str = "MURMUR_CHAT_MODEL";
pub const ENV_TEMPERATURE: &str = "MURMUR_CHAT_TEMPERATURE";

pub const DEFAULT_PROVIDER: &str = "DEEPSEEK";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/**
 * \brief Read-only backend configuration. The controller never mutates it.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatConfig {
    /** \brief GraphQL endpoint; takes priority over everything else. */
    pub graphql_url: Option<String>,
    /** \brief REST endpoint, used when no GraphQL endpoint is set. */
    pub rest_url: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /** \brief Raw temperature text, parsed at resolution time. */
    pub temperature: Option<String>,
}

impl ChatConfig {
    /**
     * \brief Build the configuration from process environment variables.
     */
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief Build the configuration from an arbitrary key lookup.
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            graphql_url: non_empty(lookup(ENV_GRAPHQL_URL)),
            rest_url: non_empty(lookup(ENV_REST_URL)),
            provider: non_empty(lookup(ENV_PROVIDER)),
            model: non_empty(lookup(ENV_MODEL)),
            temperature: non_empty(lookup(ENV_TEMPERATURE)),
        }
    }

    pub fn with_graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = non_empty(Some(url.into()));
        self
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = non_empty(Some(url.into()));
        self
    }

    pub fn provider_or_default(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /**
     * \brief Temperature as a finite number, or `None` when absent or unparsable.
     */
    pub fn temperature_value(&self) -> Option<f64> {
        self.temperature
            .as_deref()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
