//! Immutable request parameters for one exec invocation.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Everything the session needs to know, fixed at CLI parse time.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Target pod name
    pub pod: String,
    /// Container name; resolved from the pod spec when absent
    pub container: Option<String>,
    /// Command and arguments to run remotely
    pub command: Vec<String>,
    /// Explicit namespace; falls back to the kubeconfig context default
    pub namespace: Option<String>,
    /// Explicit kubeconfig path; falls back to the standard search path
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context override
    pub context: Option<String>,
    /// Impersonated user for every request in the session
    pub impersonate_user: Option<String>,
    /// Forward local stdin to the remote process
    pub stdin: bool,
    /// Request a TTY for the remote process
    pub tty: bool,
    /// Disable TLS certificate verification
    pub skip_tls_verify: bool,
    /// Skip the preflight pod lookup
    pub skip_preflight: bool,
    /// Dial the kubelet's exec endpoint instead of the API server
    pub direct_exec: bool,
    /// Node IP to use with direct exec, bypassing the node lookup
    pub direct_exec_node_ip: Option<String>,
    /// Offer only the base64 subprotocol
    pub prefer_base64: bool,
}

impl Options {
    /// Check flag combinations that cannot be satisfied later.
    ///
    /// Without the preflight there is no pod spec to resolve the node IP or
    /// the container name from, so direct exec must receive both explicitly.
    pub fn validate(&self) -> Result<()> {
        if self.skip_preflight && self.direct_exec {
            if self.direct_exec_node_ip.is_none() {
                return Err(Error::validation(
                    "When using direct-exec you must either allow preflight request or provide node IP via --node-direct-exec-ip",
                ));
            }
            if self.container.is_none() {
                return Err(Error::validation(
                    "When using direct-exec you must either allow preflight request or provide target container name via -c",
                ));
            }
        }
        Ok(())
    }
}
