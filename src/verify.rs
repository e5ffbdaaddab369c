use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{CertificateError, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

/// Per-certificate hook run during server certificate verification.
///
/// `inspect` is called exactly once for each certificate the peer
/// presented, root-most first, ending with the end-entity certificate.
/// `preverified` carries the outcome of webpki path validation for the
/// whole chain. Returning `false` for any certificate aborts the
/// handshake; returning `preverified` unchanged leaves the webpki
/// outcome in force. The hook cannot turn a failed validation into a
/// success.
pub trait CertificatePolicy: fmt::Debug + Send + Sync {
    fn inspect(&self, certificate: &CertificateDer<'_>, preverified: bool) -> bool;
}

/// Default policy: print each certificate's subject and defer to the
/// webpki outcome.
#[derive(Debug)]
pub struct LogSubjects;

impl CertificatePolicy for LogSubjects {
    fn inspect(&self, certificate: &CertificateDer<'_>, preverified: bool) -> bool {
        println!("Verifying {}", subject(certificate));
        preverified
    }
}

/// Renders the subject DN of a DER-encoded certificate, best-effort.
pub fn subject(certificate: &CertificateDer<'_>) -> String {
    match x509_parser::parse_x509_certificate(certificate.as_ref()) {
        Ok((_, cert)) => cert.subject().to_string(),
        Err(_) => String::from("<unparseable certificate>"),
    }
}

/// A [`ServerCertVerifier`] that delegates chain validation to webpki
/// and then runs a [`CertificatePolicy`] over every certificate the
/// peer presented.
#[derive(Debug)]
pub struct InspectingVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    policy: Arc<dyn CertificatePolicy>,
}

impl InspectingVerifier {
    pub fn new(webpki: Arc<WebPkiServerVerifier>, policy: Arc<dyn CertificatePolicy>) -> Self {
        Self { webpki, policy }
    }
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );
        let preverified = verdict.is_ok();

        // The wire order is end-entity first; the policy sees the chain
        // root-most first, the way OpenSSL drives its verify callback.
        for certificate in intermediates
            .iter()
            .rev()
            .chain(std::iter::once(end_entity))
        {
            if !self.policy.inspect(certificate, preverified) {
                return Err(match verdict {
                    Err(err) => err,
                    Ok(_) => CertificateError::ApplicationVerificationFailure.into(),
                });
            }
        }

        verdict
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}
