use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for chapterlane
#[derive(Debug, Error)]
pub enum ChapterlaneError {
    /// Provider credentials were rejected before the request was queued
    #[error("Invalid credentials for {provider}: {message}")]
    Credentials { provider: String, message: String },

    /// The requested unit is not loaded
    #[error("Unit not found: {unit_id}")]
    UnitNotFound { unit_id: String },

    /// Provider/network errors
    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
        context: HashMap<String, String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout errors
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Database/persistence errors
    #[error("Storage operation failed: {operation}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ChapterlaneError {
    /// Create a credential error
    pub fn credentials<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Credentials {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unit_not_found<S: Into<String>>(unit_id: S) -> Self {
        Self::UnitNotFound {
            unit_id: unit_id.into(),
        }
    }

    /// Create a provider error
    pub fn provider<P: Into<String>, M: Into<String>>(provider: P, message: M) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Create a provider error with source
    pub fn provider_with_source<P, M, E>(provider: P, message: M, source: E) -> Self
    where
        P: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            context: HashMap::new(),
            source: Some(Box::new(source)),
        }
    }

    /// Add context to a provider error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Provider { ref mut context, .. } = self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        operation: S,
        source: E,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Whether retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Provider { .. } => true,
            Self::Storage { .. } => true,
            Self::Credentials { .. } | Self::Configuration { .. } => false,
            Self::UnitNotFound { .. } => false,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Credentials { .. } => "credentials",
            Self::UnitNotFound { .. } => "unit_not_found",
            Self::Provider { .. } => "provider",
            Self::Timeout { .. } => "timeout",
            Self::Storage { .. } => "storage",
            Self::Serialization { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ChapterlaneError>;

impl From<std::io::Error> for ChapterlaneError {
    fn from(err: std::io::Error) -> Self {
        Self::storage("io_operation", err)
    }
}

impl From<sled::Error> for ChapterlaneError {
    fn from(err: sled::Error) -> Self {
        Self::storage("sled_operation", err)
    }
}

impl From<bincode::Error> for ChapterlaneError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for ChapterlaneError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for ChapterlaneError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<anyhow::Error> for ChapterlaneError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
