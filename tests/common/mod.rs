//! Test support: a throwaway PKI and one-shot servers that terminate
//! TLS with rustls.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use rustls::{ServerConfig, ServerConnection, Stream};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// A CA plus a server certificate for "localhost" issued by it.
pub struct TestPki {
    pub ca_pem: String,
    pub server_chain: Vec<CertificateDer<'static>>,
    pub server_key: PrivateKeyDer<'static>,
}

impl TestPki {
    pub fn new(ca_name: &str) -> Self {
        let alg = &rcgen::PKCS_ECDSA_P256_SHA256;

        let mut ca_params = rcgen::CertificateParams::new(Vec::new());
        ca_params
            .distinguished_name
            .push(rcgen::DnType::OrganizationName, "tlsline tests");
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, ca_name);
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.alg = alg;
        let ca_cert = rcgen::Certificate::from_params(ca_params).unwrap();

        let mut ee_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
        ee_params.is_ca = rcgen::IsCa::NoCa;
        ee_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
        ee_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "localhost");
        ee_params.alg = alg;
        let ee_cert = rcgen::Certificate::from_params(ee_params).unwrap();

        let ee_der = ee_cert.serialize_der_with_signer(&ca_cert).unwrap();
        let ca_der = ca_cert.serialize_der().unwrap();

        Self {
            ca_pem: ca_cert.serialize_pem().unwrap(),
            server_chain: vec![ee_der.into(), ca_der.into()],
            server_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                ee_cert.serialize_private_key_der(),
            )),
        }
    }

    /// Writes the CA certificate to a fresh file and returns its path.
    pub fn ca_file(&self, tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tlsline-test-{tag}-{}.pem",
            std::process::id()
        ));
        std::fs::write(&path, &self.ca_pem).unwrap();
        path
    }

    fn server_config(&self) -> Arc<ServerConfig> {
        Arc::new(
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(self.server_chain.clone(), self.server_key.clone_key())
                .unwrap(),
        )
    }
}

pub enum ServerBehavior {
    /// Echo every application byte back to the client.
    Echo,
    /// Read the request, then close with close_notify and no reply.
    CloseWithoutReply,
}

/// Accepts one connection on an OS-assigned port and runs `behavior`
/// on it. The handle yields the number of application bytes the server
/// received.
pub fn one_shot_server(
    pki: &TestPki,
    behavior: ServerBehavior,
) -> (u16, thread::JoinHandle<usize>) {
    let config = pki.server_config();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || serve_one(listener, config, behavior));
    (port, handle)
}

fn serve_one(listener: TcpListener, config: Arc<ServerConfig>, behavior: ServerBehavior) -> usize {
    let (mut socket, _) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(_) => return 0,
    };
    let mut conn = match ServerConnection::new(config) {
        Ok(conn) => conn,
        Err(_) => return 0,
    };

    let mut seen = 0;
    let mut buf = [0u8; 2048];
    {
        let mut tls = Stream::new(&mut conn, &mut socket);
        match behavior {
            ServerBehavior::Echo => loop {
                match tls.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        seen += n;
                        if tls.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            },
            ServerBehavior::CloseWithoutReply => {
                if let Ok(n) = tls.read(&mut buf) {
                    seen += n;
                }
            }
        }
    }

    conn.send_close_notify();
    let _ = conn.complete_io(&mut socket);
    seen
}
