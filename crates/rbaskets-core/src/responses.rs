use std::collections::HashMap;

use crate::error::AppError;
use crate::models::ResponseConfig;

/// Longest HTTP method name a response template can be registered for.
pub const MAX_METHOD_LEN: usize = 20;

/// Check that `method` can be used as a response key.
pub fn validate_method(method: &str) -> Result<(), AppError> {
    if method.is_empty() || method.len() > MAX_METHOD_LEN {
        return Err(AppError::InvalidKey(method.to_string()));
    }
    Ok(())
}

/// Record a `set_response` call that was dropped because of its method key.
pub fn log_rejected_key(basket: &str, method: &str) {
    tracing::warn!(
        basket = %basket,
        method = %method,
        max_len = MAX_METHOD_LEN,
        "response_key_rejected: response was not stored"
    );
}

/// Per-basket mapping from HTTP method to its mock response.
#[derive(Debug, Clone, Default)]
pub struct ResponseRegistry {
    responses: HashMap<String, ResponseConfig>,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the response for `method`.
    pub fn set(&mut self, method: &str, response: ResponseConfig) -> Result<(), AppError> {
        validate_method(method)?;
        self.responses.insert(method.to_string(), response);
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<&ResponseConfig> {
        self.responses.get(method)
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn clear(&mut self) {
        self.responses.clear();
    }
}
