use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use mio::{Events, Interest, Poll, Token};
use rustls_pki_types::ServerName;

use crate::config;
use crate::error::{Error, HandshakeFailed};
use crate::session::{ConnectOutcome, ReadFailure, ReadOutcome, Session};
use crate::verify::{CertificatePolicy, LogSubjects};

const SESSION: Token = Token(0);

/// How a run is parameterised.
#[derive(Clone, Debug)]
pub struct Options {
    /// Hostname to resolve, connect to, and verify the peer as.
    pub hostname: String,
    pub port: u16,
    /// Path to a PEM bundle of trust anchors.
    pub cafile: String,
    /// Bounds each wait for peer activity; `None` waits forever.
    pub timeout: Option<Duration>,
}

/// Phases of a client run, in the order they occur.
///
/// A run advances exactly one phase at a time; nothing skips ahead.
/// `Done` is the terminal success state, and failure surfaces as the
/// `Err` arm of the run's result, carrying the failing phase's error
/// kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Handshaking,
    Secured,
    Writing,
    Written,
    Reading,
    Done,
}

impl Phase {
    /// The phase that follows this one.
    fn next(self) -> Self {
        match self {
            Self::Idle => Self::Connecting,
            Self::Connecting => Self::Connected,
            Self::Connected => Self::Handshaking,
            Self::Handshaking => Self::Secured,
            Self::Secured => Self::Writing,
            Self::Writing => Self::Written,
            Self::Written => Self::Reading,
            Self::Reading | Self::Done => Self::Done,
        }
    }
}

/// Resolves `hostname:port`, performs one TLS exchange sending
/// `message`, and returns the peer's reply.
///
/// The peer's certificate chain must validate against the CA bundle in
/// `options`; each certificate's subject is printed as it is verified.
pub fn run(options: &Options, message: &[u8]) -> Result<Vec<u8>, Error> {
    run_with_policy(options, message, Arc::new(LogSubjects))
}

/// Like [`run`], with a caller-supplied certificate policy.
pub fn run_with_policy(
    options: &Options,
    message: &[u8],
    policy: Arc<dyn CertificatePolicy>,
) -> Result<Vec<u8>, Error> {
    let addresses = resolve(&options.hostname, options.port)?;
    let config = config::client_config(&options.cafile, policy)?;
    let server_name = ServerName::try_from(options.hostname.clone()).map_err(|err| {
        Error::Resolution(format!("invalid server name {:?}: {err}", options.hostname))
    })?;
    let session = Session::new(config, server_name, message)?;

    Run::new(session, addresses, options.timeout)?.complete()
}

/// Resolves the endpoint to its candidate addresses, in order.
fn resolve(hostname: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
    let addresses: Vec<SocketAddr> = (hostname, port)
        .to_socket_addrs()
        .map_err(|err| Error::Resolution(format!("cannot resolve {hostname}:{port}: {err}")))?
        .collect();

    if addresses.is_empty() {
        return Err(Error::Resolution(format!(
            "{hostname}:{port} resolved to no addresses"
        )));
    }

    Ok(addresses)
}

/// Drives one session through the phase sequence on an event loop
/// owned by the run. The loop is created when the run starts and
/// dropped at a terminal state.
struct Run {
    poll: Poll,
    events: Events,
    session: Session,
    candidates: std::vec::IntoIter<SocketAddr>,
    phase: Phase,
    timeout: Option<Duration>,
}

impl Run {
    fn new(
        session: Session,
        addresses: Vec<SocketAddr>,
        timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        Ok(Self {
            poll: Poll::new().map_err(Error::Connect)?,
            events: Events::with_capacity(8),
            session,
            candidates: addresses.into_iter(),
            phase: Phase::Idle,
            timeout,
        })
    }

    fn complete(mut self) -> Result<Vec<u8>, Error> {
        self.advance(); // Connecting
        self.connect_next(None)?;

        while self.phase != Phase::Done {
            self.poll_once()?;

            let mut readable = false;
            let mut writable = false;
            for event in self.events.iter() {
                if event.token() == SESSION {
                    readable |= event.is_readable();
                    writable |= event.is_writable();
                }
            }

            self.ready(readable, writable)?;

            if self.phase != Phase::Done {
                let interest = match self.phase {
                    Phase::Connecting => Interest::WRITABLE,
                    _ => self.session.interest(),
                };
                self.session
                    .reregister(self.poll.registry(), SESSION, interest)
                    .map_err(|err| self.phase_error(err))?;
            }
        }

        Ok(self.session.into_reply())
    }

    /// Waits for the next batch of readiness events, honouring the
    /// configured timeout.
    ///
    /// The timeout is a deadline for this wait as a whole: interrupted
    /// polls and spurious empty wakeups resume with the remaining
    /// duration rather than restarting it.
    fn poll_once(&mut self) -> Result<(), Error> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.phase_error(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer did not respond within the timeout",
                        )));
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            match self.poll.poll(&mut self.events, remaining) {
                Ok(()) => {}
                // Polling can be interrupted (e.g. by a debugger); retry.
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.phase_error(err)),
            }

            if !self.events.is_empty() {
                return Ok(());
            }
        }
    }

    fn ready(&mut self, readable: bool, writable: bool) -> Result<(), Error> {
        if self.phase == Phase::Connecting {
            return self.drive_connect();
        }

        if readable {
            self.drive_read()?;
        }
        if writable {
            self.drive_write()?;
        }

        self.drive_phase()
    }

    /// Starts a connect to the next candidate address. `last_error` is
    /// reported as the connect failure if no candidates remain.
    fn connect_next(&mut self, mut last_error: Option<io::Error>) -> Result<(), Error> {
        loop {
            let addr = match self.candidates.next() {
                Some(addr) => addr,
                None => {
                    return Err(Error::Connect(last_error.unwrap_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::AddrNotAvailable,
                            "no candidate addresses remain",
                        )
                    })))
                }
            };

            debug!("connecting to {addr}");
            match self
                .session
                .start_connect(addr, self.poll.registry(), SESSION)
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("connect to {addr} failed to start: {err}");
                    last_error = Some(err);
                }
            }
        }
    }

    fn drive_connect(&mut self) -> Result<(), Error> {
        match self.session.connect_outcome() {
            ConnectOutcome::Pending => Ok(()),
            ConnectOutcome::Failed(err) => {
                debug!("connect attempt failed: {err}");
                self.connect_next(Some(err))
            }
            ConnectOutcome::Connected => {
                self.advance(); // Connected
                self.advance(); // Handshaking; the ClientHello is already queued
                Ok(())
            }
        }
    }

    fn drive_read(&mut self) -> Result<(), Error> {
        match self.session.read_tls() {
            Ok(ReadOutcome::Progress) => {
                if self.session.peer_closed() && !self.session.reply_complete() {
                    return Err(self.closed_early());
                }
                Ok(())
            }
            Ok(ReadOutcome::Eof) => {
                if self.session.reply_complete() {
                    return Ok(());
                }
                Err(self.closed_early())
            }
            Err(ReadFailure::Transport(err)) => Err(self.phase_error(err)),
            Err(ReadFailure::Tls(err)) => Err(match self.phase {
                Phase::Handshaking => Error::Handshake(HandshakeFailed::Tls(err)),
                _ => self.phase_error(io::Error::new(
                    io::ErrorKind::InvalidData,
                    err.to_string(),
                )),
            }),
        }
    }

    fn drive_write(&mut self) -> Result<(), Error> {
        self.session
            .flush_tls()
            .map(|_| ())
            .map_err(|err| self.phase_error(err))
    }

    /// Applies any phase transition the session state now permits.
    fn drive_phase(&mut self) -> Result<(), Error> {
        match self.phase {
            Phase::Handshaking if !self.session.handshaking() => {
                self.advance(); // Secured
                debug!("negotiated {:?}", self.session.protocol_version());
                self.session.queue_request()?;
                self.advance(); // Writing
                self.drive_phase()
            }
            Phase::Writing if self.session.request_flushed() => {
                self.advance(); // Written
                self.advance(); // Reading
                self.drive_phase()
            }
            Phase::Reading if self.session.reply_complete() => {
                self.advance(); // Done
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn advance(&mut self) {
        let next = self.phase.next();
        debug!("phase {:?} -> {next:?}", self.phase);
        self.phase = next;
    }

    /// Maps a transport error to the error kind of the current phase.
    fn phase_error(&self, err: io::Error) -> Error {
        error_for_phase(self.phase, err)
    }

    /// The error for a peer that went away before the full reply.
    fn closed_early(&self) -> Error {
        match self.phase {
            Phase::Idle | Phase::Connecting | Phase::Connected => Error::Connect(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Phase::Handshaking | Phase::Secured => Error::Handshake(HandshakeFailed::PeerClosed),
            Phase::Writing => Error::Write(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            _ => Error::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection before the full reply arrived",
            )),
        }
    }
}

/// Maps a failure in the underlying transport or record layer to the
/// error kind of the phase it interrupted.
fn error_for_phase(phase: Phase, err: io::Error) -> Error {
    match phase {
        Phase::Idle | Phase::Connecting | Phase::Connected => Error::Connect(err),
        Phase::Handshaking => Error::Handshake(HandshakeFailed::Transport(err)),
        Phase::Secured | Phase::Writing => Error::Write(err),
        Phase::Written | Phase::Reading | Phase::Done => Error::Read(err),
    }
}
