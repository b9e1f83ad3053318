use std::fmt;

pub mod client;
pub mod credentials;
pub mod models;
pub mod password;

pub use client::ClusterServiceClient;
pub use credentials::{ClusterServiceClients, Credential, SecretKey};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("CockroachDB Cloud API could not be reached: {0}")]
    Transport(#[from] TransportError),

    #[error("CockroachDB Cloud API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid CockroachDB Cloud API endpoint: {0}")]
    InvalidEndpoint(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status: 404, .. })
    }
}

/// Every failure reported while talking to the API, outermost first.
///
/// A single request can fail for several stacked reasons (DNS, then TLS, then
/// the connection itself); all of them are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub causes: Vec<String>,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.causes.join(": "))
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let mut causes = vec![err.to_string()];
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let message = cause.to_string();
            // hyper and rustls often repeat the inner message verbatim
            if causes.last() != Some(&message) {
                causes.push(message);
            }
            source = cause.source();
        }
        TransportError { causes }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_joins_every_cause() {
        let err = TransportError {
            causes: vec![
                "error sending request".into(),
                "dns error".into(),
                "no record found".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "error sending request: dns error: no record found"
        );
    }

    #[test]
    fn test_not_found() {
        assert!(Error::Api {
            status: 404,
            body: "".into()
        }
        .is_not_found());
        assert!(!Error::Api {
            status: 500,
            body: "".into()
        }
        .is_not_found());
    }
}
