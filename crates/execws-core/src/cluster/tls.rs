//! TLS configuration for the WebSocket dial.
//!
//! The trust anchors come from the kubeconfig's cluster entry; without
//! pinned CA material the standard web roots apply. Disabling verification
//! installs a verifier that accepts any chain while still checking
//! signature schemes the provider supports.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::auth::IdentityPem;
use crate::error::{Error, Result};

/// Build the rustls client configuration for the dial.
pub fn client_config(
    root_ders: Option<&[Vec<u8>]>,
    insecure: bool,
    identity: Option<&IdentityPem>,
) -> Result<rustls::ClientConfig> {
    let provider = provider();

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::config(format!("unable to set up TLS: {err}")))?;

    let builder = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
    } else {
        let mut roots = RootCertStore::empty();
        match root_ders {
            Some(ders) => {
                for der in ders {
                    roots
                        .add(CertificateDer::from(der.clone()))
                        .map_err(|err| {
                            Error::config(format!("invalid CA certificate in kubeconfig: {err}"))
                        })?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        builder.with_root_certificates(roots)
    };

    let config = match identity {
        Some(identity) => {
            let certs = rustls_pemfile::certs(&mut identity.cert.as_slice())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| Error::config(format!("invalid client certificate: {err}")))?;
            let key = rustls_pemfile::private_key(&mut identity.key.as_slice())
                .map_err(|err| Error::config(format!("invalid client key: {err}")))?
                .ok_or_else(|| Error::config("client key contains no private key"))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|err| Error::config(format!("unusable client identity: {err}")))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

fn provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

/// Verifier used under `--skip-tls-verify`: trusts any presented chain.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_config_builds_without_roots() {
        let config = client_config(None, true, None).unwrap();
        assert!(!config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_default_config_uses_web_roots() {
        assert!(client_config(None, false, None).is_ok());
    }

    #[test]
    fn test_bad_ca_der_is_rejected() {
        let err = client_config(Some(&[b"not a certificate".to_vec()]), false, None);
        assert!(err.is_err());
    }
}
