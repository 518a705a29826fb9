use serde::{Deserialize, Serialize};

/// Success envelope returned by every JSON route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

/// Failure envelope. Also used as the payload of `error` frames on live streams.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    /// Short localized text the client shows in its transient banner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl ApiErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                notice: None,
            },
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.error.notice = Some(notice.into());
        self
    }
}

/// Ordered from best to worst so the overall status is the maximum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// The dependency is down but requests can still be served.
    pub fn degraded(name: &str, message: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Degraded,
            message: Some(message.to_string()),
        }
    }

    pub fn fail(name: &str, message: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthResponse {
    pub fn from_checks(service: impl Into<String>, version: impl Into<String>, checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            service: service.into(),
            version: version.into(),
            checks,
        }
    }

    /// Degraded dependencies still serve traffic.
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}
