use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;

use crate::error::Error;
use crate::verify::{CertificatePolicy, InspectingVerifier};

/// Builds a client configuration trusting exactly the CA bundle at
/// `cafile`, with `policy` run over every certificate the peer
/// presents.
///
/// A missing or malformed bundle, or one containing no usable trust
/// anchors, is a configuration error: the run fails before any network
/// activity.
pub fn client_config(
    cafile: &str,
    policy: Arc<dyn CertificatePolicy>,
) -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    let certificates = CertificateDer::pem_file_iter(cafile)
        .map_err(|err| Error::Config(format!("cannot open CA bundle {cafile}: {err}")))?;
    for certificate in certificates {
        let certificate = certificate
            .map_err(|err| Error::Config(format!("malformed CA bundle {cafile}: {err}")))?;
        roots
            .add(certificate)
            .map_err(|err| Error::Config(format!("unusable certificate in {cafile}: {err}")))?;
    }

    if roots.is_empty() {
        return Err(Error::Config(format!("no trust anchors found in {cafile}")));
    }

    let webpki = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|err| Error::Config(err.to_string()))?;

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InspectingVerifier::new(webpki, policy)))
        .with_no_client_auth();

    Ok(Arc::new(config))
}
