//! Deep-analysis gateway.
//!
//! One bounded call to an external analysis endpoint per request. Failures
//! are classified so the client can tell "try again" apart from "feature
//! unavailable". Calls are never retried here; the next edit triggers a
//! fresh attempt.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::simulation::model::{AnalysisResult, CompositionItem};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("analysis request timed out")]
    Timeout,
    #[error("analysis service unreachable: {0}")]
    Unreachable(String),
    #[error("malformed analysis response: {0}")]
    Malformed(String),
    #[error("analysis service returned HTTP {0}")]
    Upstream(u16),
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Unreachable(_) => "UNREACHABLE",
            Self::Malformed(_) => "MALFORMED_RESPONSE",
            Self::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    /// Message shown to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout => "AI分析超时，请稍后再试",
            Self::Unreachable(_) => "AI服务连接失败",
            Self::Malformed(_) | Self::Upstream(_) => "AI分析服务暂时不可用",
        }
    }

    /// Whether a later attempt has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Upstream(status) => *status >= 500 || *status == 429,
            Self::Unreachable(_) | Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Upstream(status.as_u16())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
pub trait AnalysisGateway: Send + Sync + std::fmt::Debug {
    async fn analyze(&self, composition: &[CompositionItem]) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    composition: Vec<AnalyzeItem<'a>>,
}

#[derive(Debug, Serialize)]
struct AnalyzeItem<'a> {
    medicine_id: Option<&'a str>,
    name: &'a str,
    dosage: &'a str,
}

fn request_body<'a>(composition: &'a [CompositionItem], default_dosage: &'a str) -> AnalyzeRequest<'a> {
    AnalyzeRequest {
        composition: composition
            .iter()
            .map(|item| AnalyzeItem {
                medicine_id: item.substance_id.as_deref(),
                name: &item.display_name,
                dosage: item.dose.as_deref().unwrap_or(default_dosage),
            })
            .collect(),
    }
}

/// Accepts a response body only if it is an object carrying a non-null
/// `analysis` or `suggestions` field.
pub fn validate_response(body: serde_json::Value) -> Result<AnalysisResult, AnalysisError> {
    let Some(obj) = body.as_object() else {
        return Err(AnalysisError::Malformed("expected a JSON object".to_string()));
    };
    let has_content = ["analysis", "suggestions"]
        .iter()
        .any(|k| obj.get(*k).is_some_and(|v| !v.is_null()));
    if has_content {
        Ok(AnalysisResult(body))
    } else {
        Err(AnalysisError::Malformed(
            "missing analysis and suggestions".to_string(),
        ))
    }
}

/// Gateway that POSTs the composition as JSON.
#[derive(Clone)]
pub struct HttpAnalysisGateway {
    http: reqwest::Client,
    url: String,
    default_dosage: String,
}

impl std::fmt::Debug for HttpAnalysisGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAnalysisGateway")
            .field("url", &self.url)
            .field("default_dosage", &self.default_dosage)
            .finish_non_exhaustive()
    }
}

impl HttpAnalysisGateway {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        default_dosage: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            default_dosage: default_dosage.into(),
        })
    }
}

#[async_trait]
impl AnalysisGateway for HttpAnalysisGateway {
    async fn analyze(&self, composition: &[CompositionItem]) -> Result<AnalysisResult, AnalysisError> {
        let body = request_body(composition, &self.default_dosage);
        let resp = self.http.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AnalysisError::Upstream(status.as_u16()));
        }
        let value: serde_json::Value = resp.json().await?;
        validate_response(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_response() {
        assert!(validate_response(json!({"analysis": "ok"})).is_ok());
        assert!(validate_response(json!({"suggestions": []})).is_ok());
        assert_eq!(
            validate_response(json!({"analysis": null})).unwrap_err().code(),
            "MALFORMED_RESPONSE"
        );
        assert!(validate_response(json!([1, 2])).is_err());
    }

    #[test]
    fn test_error_classification_is_distinct() {
        let errors = [
            AnalysisError::Timeout,
            AnalysisError::Unreachable("refused".into()),
            AnalysisError::Malformed("x".into()),
            AnalysisError::Upstream(503),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(AnalysisError::code).collect();
        assert_eq!(codes.len(), 4);
        assert!(AnalysisError::Timeout.is_retryable());
        assert!(!AnalysisError::Unreachable(String::new()).is_retryable());
        assert!(!AnalysisError::Upstream(400).is_retryable());
        assert_eq!(AnalysisError::Timeout.user_message(), "AI分析超时，请稍后再试");
    }

    #[test]
    fn test_request_body_uses_default_dosage() {
        let items = [
            CompositionItem::named("甘草"),
            CompositionItem::named("人参").with_dose("6g"),
        ];
        let v = serde_json::to_value(request_body(&items, "10g")).unwrap();
        assert_eq!(v["composition"][0]["dosage"], "10g");
        assert_eq!(v["composition"][1]["dosage"], "6g");
        assert!(v["composition"][0]["medicine_id"].is_null());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Port 9 on loopback is reserved (discard) and closed in test environments.
        let gateway =
            HttpAnalysisGateway::new("http://127.0.0.1:9/analyze", Duration::from_secs(2), "10g")
                .unwrap();
        let err = gateway
            .analyze(&[CompositionItem::named("甘草")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Unreachable(_) | AnalysisError::Timeout
        ));
    }
}
