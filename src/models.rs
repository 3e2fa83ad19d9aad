//! Shared models and types for SeatSense
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub detector_running: bool,
    pub detector_mode: String,
    pub seats: usize,
    pub subscribers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_serialization() {
        let ok = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["data"], 42);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "nope");
    }
}
