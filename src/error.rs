use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("AuthExpired: {service}: {reason}")]
    AuthExpired { service: String, reason: String },
    #[error("TransientFetchError: {0}")]
    TransientFetch(String),
    #[error("SchemaMismatch: {0}")]
    SchemaMismatch(String),
    #[error("ApiError: {0}")]
    Api(String),
    #[error("ParseError: {0}")]
    Parse(String),
    #[error("ConfigError: {0}")]
    Config(String),
}

impl SyncError {
    pub fn auth_expired(service: &str, reason: impl Into<String>) -> Self {
        SyncError::AuthExpired {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Credential and schema problems cannot be fixed by retrying the next book.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthExpired { .. } | SyncError::SchemaMismatch(_) | SyncError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientFetch(_))
    }

    /// Actionable hint shown to the user next to the error.
    pub fn hint(&self) -> Option<String> {
        match self {
            SyncError::AuthExpired { service, .. } => Some(match service.as_str() {
                "weread" => "log in at https://weread.qq.com, copy fresh cookies into WEREAD_COOKIES \
                             (required: wr_skey, wr_vid; recommended: wr_rt, wr_localvid, wr_gid)"
                    .to_string(),
                "kindle" => "log in at https://read.amazon.com, copy fresh cookies into KINDLE_COOKIES \
                             (required: session-id, ubid-main)"
                    .to_string(),
                "notion" => "check NOTION_TOKEN and that the integration is shared with the database"
                    .to_string(),
                other => format!("refresh the credential for {}", other),
            }),
            SyncError::SchemaMismatch(_) => {
                Some("fix notion.properties in the config to match the database columns".to_string())
            }
            _ => None,
        }
    }

    /// Maps an HTTP status from an upstream service onto the error taxonomy.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return SyncError::auth_expired(service, format!("{} {}", status, snippet));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return SyncError::TransientFetch(format!("{}: {} {}", service, status, snippet));
        }
        SyncError::Api(format!("{}: {} {}", service, status, snippet))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            SyncError::TransientFetch(crate::unpack_error(&error))
        } else if error.is_decode() {
            SyncError::Parse(crate::unpack_error(&error))
        } else {
            SyncError::Api(crate::unpack_error(&error))
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Parse(error.to_string())
    }
}
