use crate::config::ChatConfig;

/**
 * \brief Transport selected for one send. Resolved from configuration, never stored.
 */
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    GraphQl {
        endpoint: String,
        provider: String,
        model: String,
        temperature: Option<f64>,
    },
    Rest {
        endpoint: String,
    },
    Mock,
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Backend::GraphQl { .. } => "graphql",
            Backend::Rest { .. } => "rest",
            Backend::Mock => "mock",
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Backend::GraphQl { endpoint, .. } | Backend::Rest { endpoint } => {
                Some(endpoint.as_str())
            }
            Backend::Mock => None,
        }
    }
}

/**
 * \brief Pick the transport: GraphQL endpoint, then REST endpoint, then the local mock.
 */
pub fn resolve(config: &ChatConfig) -> Backend {
    if let Some(endpoint) = &config.graphql_url {
        return Backend::GraphQl {
            endpoint: endpoint.clone(),
            provider: config.provider_or_default().to_string(),
            model: config.model_or_default().to_string(),
            temperature: config.temperature_value(),
        };
    }
    if let Some(endpoint) = &config.rest_url {
        return Backend::Rest {
            endpoint: endpoint.clone(),
        };
    }
    Backend::Mock
}
