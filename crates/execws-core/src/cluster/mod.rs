//! Resolved cluster access: endpoint, namespace, credentials, TLS.
//!
//! Built once per invocation from the kubeconfig and the CLI options, then
//! shared by the preflight request and the WebSocket dial so that
//! impersonation and TLS-skip apply to every exchange in the session.

mod auth;
mod tls;

use std::sync::Arc;

use http::header::{HeaderValue, USER_AGENT};
use http::HeaderMap;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::request;

/// User-Agent sent on the upgrade request
const USER_AGENT_VALUE: &str = concat!("execws/", env!("CARGO_PKG_VERSION"));

/// Connection material resolved from the kubeconfig, living for the process.
pub struct ClusterAccess {
    /// Cluster endpoint as configured (http or https)
    pub server: Url,
    /// Namespace every request in this session targets
    pub namespace: String,
    /// Headers the upgrade request must carry (credentials, impersonation,
    /// user agent)
    pub headers: HeaderMap,
    /// TLS configuration for the dial
    pub tls: Arc<rustls::ClientConfig>,
    /// The preflighted pod, when the sanity check ran
    pub pod: Option<Pod>,
    client: kube::Client,
}

impl ClusterAccess {
    /// Load credentials and TLS material, then run the preflight check.
    pub async fn load(opts: &Options) -> Result<Self> {
        let kubeconfig = match &opts.kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|err| Error::config(err.to_string()))?;

        let namespace = match &opts.namespace {
            Some(ns) => ns.clone(),
            None => context_namespace(&kubeconfig, opts.context.as_deref()).ok_or_else(|| {
                Error::config(
                    "unable to resolve namespace: none in the kubeconfig context and no --namespace flag",
                )
            })?,
        };

        let config_opts = KubeConfigOptions {
            context: opts.context.clone(),
            cluster: None,
            user: None,
        };
        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &config_opts)
            .await
            .map_err(|err| Error::config(err.to_string()))?;

        if opts.skip_tls_verify {
            config.accept_invalid_certs = true;
            config.root_cert = None;
        }
        if opts.impersonate_user.is_some() {
            config.auth_info.impersonate = opts.impersonate_user.clone();
        }

        let server = Url::parse(&config.cluster_url.to_string())
            .map_err(|err| Error::config(format!("malformed cluster URL: {err}")))?;

        let credentials = auth::credentials(&config.auth_info)?;
        let mut headers = credentials.headers;
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let tls = Arc::new(tls::client_config(
            config.root_cert.as_deref(),
            config.accept_invalid_certs,
            credentials.identity.as_ref(),
        )?);

        let client = kube::Client::try_from(config).map_err(Error::from_kube)?;

        let pod = if opts.skip_preflight {
            None
        } else {
            let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
            let pod = pods.get(&opts.pod).await.map_err(Error::from_kube)?;
            debug!(pod = %opts.pod, namespace = %namespace, "preflight check passed");
            Some(pod)
        };

        Ok(Self {
            server,
            namespace,
            headers,
            tls,
            pod,
            client,
        })
    }

    /// Client for follow-up API calls (node lookup, completion queries).
    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    /// Resolve the node IP for a direct kubelet dial.
    ///
    /// An explicit IP wins; otherwise the preflighted pod names its node and
    /// the node's address list supplies the internal IP.
    pub async fn node_internal_ip(&self, explicit: Option<&str>, pod: &Pod) -> Result<String> {
        if let Some(ip) = explicit {
            return Ok(ip.to_string());
        }

        let node_name = request::pod_node_name(pod)?;
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes.get(node_name).await.map_err(Error::from_kube)?;

        request::internal_ip(&node).ok_or_else(|| Error::validation("Unable to find Node IP"))
    }
}

/// The namespace configured on the selected kubeconfig context, if any.
fn context_namespace(kubeconfig: &Kubeconfig, context_override: Option<&str>) -> Option<String> {
    let wanted = context_override.or(kubeconfig.current_context.as_deref())?;
    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == wanted)?
        .context
        .as_ref()?
        .namespace
        .clone()
}
