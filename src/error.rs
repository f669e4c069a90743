use thiserror::Error;

/// Longest slice of an upstream error body kept in a diagnostic.
pub const BODY_SNIPPET_LEN: usize = 200;

/// Failures talking to the market-data provider.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error: {0}")]
    Api(String),

    #[error("unexpected response shape: {0}")]
    Shape(String),
}

impl FetchError {
    pub fn status(status: u16, body: &str) -> Self {
        FetchError::Status {
            status,
            body: body.chars().take(BODY_SNIPPET_LEN).collect(),
        }
    }

    /// Transport failures may clear up on their own; the rest are contract
    /// violations by the provider.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status { .. })
    }
}

/// Rejected user actions on the asset registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("'{0}' is not a valid symbol")]
    InvalidSymbol(String),

    #[error("no asset with symbol '{0}' in the top list")]
    NotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to persist custom symbols: {0}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_is_truncated() {
        let body = "x".repeat(500);
        match FetchError::status(502, &body) {
            FetchError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), BODY_SNIPPET_LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shape_errors_are_not_transport_errors() {
        assert!(FetchError::status(500, "boom").is_transport());
        assert!(!FetchError::Shape("missing Data".into()).is_transport());
        assert!(!FetchError::Api("rate limit".into()).is_transport());
    }
}
