//! tlsline sends a single line of text to a TLS server and prints the
//! reply.
//!
//! The crate is organised around two pieces:
//!
//!  * [`session::Session`] owns the TCP connection, the rustls client
//!    state on top of it, and the request/reply buffers for one
//!    exchange.
//!  * [`client::run`] resolves the endpoint and drives the session
//!    through connect, handshake, write and read on a [mio] event
//!    loop, one phase at a time.
//!
//! Certificate verification is standard webpki path validation, with a
//! [`verify::CertificatePolicy`] hook run once per presented
//! certificate, root-most first. The default policy prints each
//! certificate's subject and defers to the webpki outcome.
//!
//! The wire protocol is deliberately naive: the request bytes are sent
//! as-is, with no framing, and the reply is read until exactly as many
//! bytes as were sent have arrived. This assumes an echo-like peer.
//!
//! [mio]: https://docs.rs/mio/latest/mio/

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod verify;

pub use crate::client::{run, run_with_policy, Options, Phase};
pub use crate::error::{Error, HandshakeFailed};
pub use crate::session::{Session, MAX_MESSAGE_LEN};
pub use crate::verify::{CertificatePolicy, LogSubjects};
