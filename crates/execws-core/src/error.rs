//! Error types for exec sessions.
//!
//! A remote command's exit code is not an error: `session::run` returns it
//! in `Ok`. Everything here is a genuine failure, and the display strings
//! are what the user sees on stderr, so the server-facing variants keep the
//! wording kubectl users expect.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing or running an exec session
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable client configuration (kubeconfig, TLS material,
    /// unresolved namespace, bad context name)
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Bad invocation: non-pod target, missing command, conflicting flags,
    /// unresolved container
    #[error("{message}")]
    Validation { message: String },

    /// Structured error returned by the cluster, from the preflight request
    /// or from a JSON handshake response
    #[error("Error from server ({reason}): {message}")]
    Api { reason: String, message: String },

    /// Unstructured handshake rejection (non-JSON body)
    #[error("Error from server: {message}")]
    Server { message: String },

    /// The peer could not be reached at all
    #[error("Error connecting to {addr}: {detail}")]
    Connect { addr: String, detail: String },

    /// Failure status reported by the remote on the status channel
    #[error("{message}")]
    Remote { message: String },

    /// In-session stream failure: wrong frame type, undecodable status
    /// payload, a failed write to a local sink, or an abnormal close
    #[error("stream error: {message}")]
    Stream { message: String },

    /// Kubernetes client error that is not an API-level rejection
    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Error::Remote {
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Error::Stream {
            message: message.into(),
        }
    }

    pub fn connect(addr: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Connect {
            addr: addr.into(),
            detail: detail.into(),
        }
    }

    pub fn api(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Convert a kube client error, surfacing API rejections verbatim.
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => Error::Api {
                reason: ae.reason,
                message: ae.message,
            },
            other => Error::Kube { source: other },
        }
    }
}
