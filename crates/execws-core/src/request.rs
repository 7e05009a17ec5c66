//! Exec URL construction for both dial targets.
//!
//! The API-server shape goes through `/api/v1/namespaces/{ns}/pods/{pod}/exec`
//! on the cluster endpoint; the direct shape goes straight to the kubelet's
//! exec endpoint on port 10250. Query keys are appended in a stable order
//! and values are percent-encoded by the URL serializer; command tokens pass
//! through untouched.

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Port the kubelet serves its node-local API on
pub const KUBELET_PORT: u16 = 10250;

/// Address type carrying a node's cluster-internal IP
const INTERNAL_IP: &str = "InternalIP";

/// Map an http(s) cluster endpoint to its WebSocket scheme.
///
/// Anything other than http or https is a configuration error.
pub fn websocket_url(server: &Url) -> Result<Url> {
    let mut url = server.clone();
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::config(format!(
                "malformed server URL {url}: unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::config(format!("malformed server URL {url}")))?;
    Ok(url)
}

/// Build the API-server exec URL.
///
/// `tty` is `Some(requested value)` when a TTY was asked for; the value is
/// false when stdin turned out not to be a terminal.
pub fn api_server_exec_url(
    server: &Url,
    namespace: &str,
    pod: &str,
    command: &[String],
    container: Option<&str>,
    stdin: bool,
    tty: Option<bool>,
) -> Result<Url> {
    let mut url = websocket_url(server)?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!(
        "{base}/api/v1/namespaces/{namespace}/pods/{pod}/exec"
    ));

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("stdout", "true");
        query.append_pair("stderr", "true");
        for arg in command {
            query.append_pair("command", arg);
        }
        if let Some(container) = container {
            query.append_pair("container", container);
        }
        if let Some(tty) = tty {
            query.append_pair("tty", if tty { "true" } else { "false" });
        }
        if stdin {
            query.append_pair("stdin", "true");
        }
    }

    Ok(url)
}

/// Build the direct kubelet exec URL for a node.
pub fn kubelet_exec_url(
    node_ip: &str,
    namespace: &str,
    pod: &str,
    container: &str,
    command: &[String],
    stdin: bool,
    tty: bool,
) -> Result<Url> {
    let mut url = Url::parse(&format!("wss://{node_ip}:{KUBELET_PORT}"))
        .map_err(|err| Error::config(format!("invalid node IP {node_ip}: {err}")))?;

    url.set_path(&format!("/exec/{namespace}/{pod}/{container}"));

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("output", "1");
        query.append_pair("error", "1");
        for arg in command {
            query.append_pair("command", arg);
        }
        if tty {
            query.append_pair("tty", "1");
        }
        if stdin {
            query.append_pair("input", "1");
        }
    }

    Ok(url)
}

/// Resolve the container to exec into.
///
/// An explicit name wins; otherwise a single-container pod supplies it.
pub fn resolve_container(explicit: Option<&str>, pod: &Pod) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    if let [only] = containers {
        debug!(container = %only.name, "discovered container name");
        return Ok(only.name.clone());
    }

    Err(Error::validation("Cannot determine container name"))
}

/// The node this pod is scheduled on, from the preflighted spec.
pub fn pod_node_name(pod: &Pod) -> Result<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .ok_or_else(|| Error::validation("Pod has no assigned node"))
}

/// Pick the cluster-internal IP from a node's address list.
pub fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .and_then(|addrs| {
            addrs
                .iter()
                .find(|addr| addr.type_ == INTERNAL_IP)
                .map(|addr| addr.address.clone())
        })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, NodeAddress, NodeStatus, PodSpec};

    use super::*;

    fn server() -> Url {
        Url::parse("https://cluster.example:6443").unwrap()
    }

    #[test]
    fn test_scheme_mapping() {
        assert_eq!(websocket_url(&server()).unwrap().scheme(), "wss");
        assert_eq!(
            websocket_url(&Url::parse("http://localhost:8080").unwrap())
                .unwrap()
                .scheme(),
            "ws"
        );
        assert!(websocket_url(&Url::parse("ftp://x").unwrap()).is_err());
    }

    #[test]
    fn test_api_server_url_shape() {
        let url = api_server_exec_url(
            &server(),
            "default",
            "mypod",
            &["echo".into(), "hello".into()],
            None,
            false,
            None,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://cluster.example:6443/api/v1/namespaces/default/pods/mypod/exec\
             ?stdout=true&stderr=true&command=echo&command=hello"
        );
    }

    #[test]
    fn test_api_server_url_all_flags() {
        let url = api_server_exec_url(
            &server(),
            "kube-system",
            "mypod",
            &["sh".into()],
            Some("main"),
            true,
            Some(true),
        )
        .unwrap();
        assert_eq!(
            url.query().unwrap(),
            "stdout=true&stderr=true&command=sh&container=main&tty=true&stdin=true"
        );
    }

    #[test]
    fn test_tty_requested_without_terminal_stdin() {
        let url = api_server_exec_url(
            &server(),
            "default",
            "mypod",
            &["sh".into()],
            None,
            true,
            Some(false),
        )
        .unwrap();
        assert!(url.query().unwrap().contains("tty=false"));
    }

    #[test]
    fn test_command_tokens_are_encoded() {
        let url = api_server_exec_url(
            &server(),
            "default",
            "mypod",
            &["sh".into(), "-c".into(), "echo a&b".into()],
            None,
            false,
            None,
        )
        .unwrap();
        assert!(url
            .query()
            .unwrap()
            .contains("command=sh&command=-c&command=echo+a%26b"));
    }

    #[test]
    fn test_base_path_is_preserved() {
        let proxied = Url::parse("https://front.example/clusters/prod/").unwrap();
        let url =
            api_server_exec_url(&proxied, "default", "mypod", &["ls".into()], None, false, None)
                .unwrap();
        assert_eq!(
            url.path(),
            "/clusters/prod/api/v1/namespaces/default/pods/mypod/exec"
        );
    }

    #[test]
    fn test_kubelet_url_shape() {
        let url = kubelet_exec_url(
            "10.0.0.7",
            "default",
            "mypod",
            "main",
            &["ls".into()],
            true,
            true,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://10.0.0.7:10250/exec/default/mypod/main\
             ?output=1&error=1&command=ls&tty=1&input=1"
        );
    }

    fn pod_with_containers(names: &[&str]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                node_name: Some("node-a".into()),
                containers: names
                    .iter()
                    .map(|name| Container {
                        name: (*name).into(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_resolution() {
        let pod = pod_with_containers(&["only"]);
        assert_eq!(resolve_container(None, &pod).unwrap(), "only");
        assert_eq!(resolve_container(Some("other"), &pod).unwrap(), "other");

        let pod = pod_with_containers(&["a", "b"]);
        assert!(resolve_container(None, &pod).is_err());
        assert_eq!(resolve_container(Some("b"), &pod).unwrap(), "b");
    }

    #[test]
    fn test_pod_node_name() {
        let pod = pod_with_containers(&["only"]);
        assert_eq!(pod_node_name(&pod).unwrap(), "node-a");
        assert!(pod_node_name(&Pod::default()).is_err());
    }

    #[test]
    fn test_internal_ip_selection() {
        let node = Node {
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "ExternalIP".into(),
                        address: "198.51.100.9".into(),
                    },
                    NodeAddress {
                        type_: "InternalIP".into(),
                        address: "10.0.0.7".into(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(internal_ip(&node).unwrap(), "10.0.0.7");
        assert!(internal_ip(&Node::default()).is_none());
    }
}
