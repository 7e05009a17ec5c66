//! The WebSocket dial: handshake, subprotocol negotiation, error decoding.
//!
//! The upgrade request is built from the exec URL, stamped with the
//! credential headers, and offered the subprotocol list; the server's
//! selection is authoritative. A rejected upgrade is decoded into the
//! server's own reason and message when the body is JSON.

use std::sync::Arc;

use http::header::{HeaderValue, CONTENT_TYPE, SEC_WEBSOCKET_PROTOCOL};
use http::HeaderMap;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Subprotocol;

/// An established exec connection
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the exec endpoint and negotiate a subprotocol.
pub async fn dial(
    url: &Url,
    headers: &HeaderMap,
    tls: Arc<rustls::ClientConfig>,
    prefer_base64: bool,
) -> Result<(WsStream, Subprotocol)> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| Error::config(format!("malformed request URL: {err}")))?;

    let offered = Subprotocol::offered(prefer_base64);
    let offer_names = offered
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ");
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_str(&offer_names)
            .map_err(|err| Error::config(format!("invalid subprotocol offer: {err}")))?,
    );
    for (name, value) in headers {
        request.headers_mut().append(name.clone(), value.clone());
    }

    trace!(uri = %url, "dialing exec endpoint");

    let (stream, response) =
        match connect_async_tls_with_config(request, None, false, Some(Connector::Rustls(tls)))
            .await
        {
            Ok(established) => established,
            Err(WsError::Http(response)) => return Err(handshake_error(&response)),
            Err(err) => return Err(Error::connect(peer_addr(url), err.to_string())),
        };

    let selected = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    let subprotocol = negotiated(selected, offered)?;

    debug!(subprotocol = subprotocol.name(), "exec connection established");

    Ok((stream, subprotocol))
}

/// Check the server's subprotocol selection against the offer.
///
/// A selection outside the offered set (or none at all) is a handshake
/// failure: the codec would have no defined framing for the session.
fn negotiated(selected: Option<&str>, offered: &[Subprotocol]) -> Result<Subprotocol> {
    let name = selected
        .ok_or_else(|| Error::Server {
            message: "no subprotocol selected during upgrade".to_string(),
        })?
        .trim();

    Subprotocol::from_name(name)
        .filter(|p| offered.contains(p))
        .ok_or_else(|| Error::Server {
            message: format!("server selected unsupported subprotocol {name:?}"),
        })
}

#[derive(Debug, Default, Deserialize)]
struct UpgradeRejection {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Decode a non-101 upgrade response into the server's own words.
fn handshake_error(response: &http::Response<Option<Vec<u8>>>) -> Error {
    let body: &[u8] = response.body().as_deref().unwrap_or_default();

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        return match serde_json::from_slice::<UpgradeRejection>(body) {
            Ok(rejection) => Error::api(rejection.reason, rejection.message),
            Err(_) => Error::Server {
                message: "unable to decode response".to_string(),
            },
        };
    }

    Error::Server {
        message: String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// host:port form of the dial target, for connection errors.
fn peer_addr(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
