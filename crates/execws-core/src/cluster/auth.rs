//! Credential material for the upgrade request.
//!
//! Reproduces what the cluster's HTTP auth chain would attach: bearer
//! tokens (inline or from a file), basic auth, exec credential plugins, and
//! impersonation headers. Client certificates become part of the TLS
//! identity rather than a header.

use std::process::Command;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use kube::config::{AuthInfo, ExecConfig};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const IMPERSONATE_USER: HeaderName = HeaderName::from_static("impersonate-user");
const IMPERSONATE_GROUP: HeaderName = HeaderName::from_static("impersonate-group");

/// Client certificate and key, PEM-encoded, for the TLS identity
pub struct IdentityPem {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// What the dial needs from the kubeconfig's user entry
pub struct Credentials {
    pub headers: HeaderMap,
    pub identity: Option<IdentityPem>,
}

/// Resolve the user entry into headers and an optional TLS identity.
pub fn credentials(auth: &AuthInfo) -> Result<Credentials> {
    let mut headers = HeaderMap::new();
    let mut plugin_status = None;

    let bearer = if let Some(token) = &auth.token {
        Some(token.expose_secret().to_string())
    } else if let Some(path) = &auth.token_file {
        let token = std::fs::read_to_string(path)
            .map_err(|err| Error::config(format!("unable to read token file {path}: {err}")))?;
        Some(token.trim_end().to_string())
    } else if let Some(exec) = &auth.exec {
        let status = run_credential_plugin(exec)?;
        let token = status.token.clone();
        plugin_status = Some(status);
        token
    } else {
        None
    };

    if let Some(token) = bearer {
        headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {token}"))?);
    } else if let (Some(user), Some(password)) = (&auth.username, &auth.password) {
        let encoded = BASE64.encode(format!("{user}:{}", password.expose_secret()));
        headers.insert(AUTHORIZATION, sensitive_value(&format!("Basic {encoded}"))?);
    }

    if let Some(user) = &auth.impersonate {
        headers.insert(IMPERSONATE_USER, header_value(user)?);
    }
    if let Some(groups) = &auth.impersonate_groups {
        for group in groups {
            headers.append(IMPERSONATE_GROUP, header_value(group)?);
        }
    }

    let identity = identity_pem(auth, plugin_status.as_ref())?;

    Ok(Credentials { headers, identity })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::config(format!("header value contains invalid characters: {value}")))
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut hv = header_value(value)?;
    hv.set_sensitive(true);
    Ok(hv)
}

/// The TLS client identity, from the user entry or the credential plugin.
fn identity_pem(
    auth: &AuthInfo,
    plugin: Option<&ExecCredentialStatus>,
) -> Result<Option<IdentityPem>> {
    let cert = pem_material(
        auth.client_certificate_data.as_deref(),
        auth.client_certificate.as_deref(),
        "client certificate",
    )?;
    let key_data = auth.client_key_data.as_ref().map(|k| k.expose_secret());
    let key = pem_material(key_data, auth.client_key.as_deref(), "client key")?;

    match (cert, key) {
        (Some(cert), Some(key)) => return Ok(Some(IdentityPem { cert, key })),
        (None, None) => {}
        _ => {
            return Err(Error::config(
                "client certificate and key must be configured together",
            ))
        }
    }

    if let Some(status) = plugin {
        if let (Some(cert), Some(key)) = (&status.client_certificate_data, &status.client_key_data)
        {
            return Ok(Some(IdentityPem {
                cert: cert.clone().into_bytes(),
                key: key.clone().into_bytes(),
            }));
        }
    }

    Ok(None)
}

/// Inline data (base64-encoded PEM) wins over a file path.
fn pem_material(
    data: Option<&str>,
    path: Option<&str>,
    what: &str,
) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data {
        let pem = BASE64
            .decode(data.trim())
            .map_err(|err| Error::config(format!("invalid {what} data: {err}")))?;
        return Ok(Some(pem));
    }
    if let Some(path) = path {
        let pem = std::fs::read(path)
            .map_err(|err| Error::config(format!("unable to read {what} {path}: {err}")))?;
        return Ok(Some(pem));
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredential {
    #[serde(default)]
    status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    token: Option<String>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
}

/// Run the configured exec credential plugin and parse its output.
fn run_credential_plugin(exec: &ExecConfig) -> Result<ExecCredentialStatus> {
    let program = exec
        .command
        .as_deref()
        .ok_or_else(|| Error::config("exec credential plugin has no command"))?;

    let mut command = Command::new(program);
    if let Some(args) = &exec.args {
        command.args(args);
    }
    if let Some(env) = &exec.env {
        for entry in env {
            if let (Some(name), Some(value)) = (entry.get("name"), entry.get("value")) {
                command.env(name, value);
            }
        }
    }
    command.env("KUBERNETES_EXEC_INFO", exec_info(exec));

    debug!(plugin = program, "running exec credential plugin");
    let output = command
        .output()
        .map_err(|err| Error::config(format!("exec credential plugin {program} failed: {err}")))?;
    if !output.status.success() {
        return Err(Error::config(format!(
            "exec credential plugin {program} exited with {}",
            output.status
        )));
    }

    let credential: ExecCredential = serde_json::from_slice(&output.stdout).map_err(|err| {
        Error::config(format!(
            "exec credential plugin {program} returned invalid output: {err}"
        ))
    })?;

    credential
        .status
        .ok_or_else(|| Error::config(format!("exec credential plugin {program} returned no status")))
}

fn exec_info(exec: &ExecConfig) -> String {
    let api_version = exec
        .api_version
        .as_deref()
        .unwrap_or("client.authentication.k8s.io/v1beta1");
    format!(
        r#"{{"apiVersion":"{api_version}","kind":"ExecCredential","spec":{{"interactive":false}}}}"#
    )
}
