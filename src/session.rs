use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use rustls::{ClientConfig, ClientConnection};
use rustls_pki_types::ServerName;

use crate::error::Error;

/// Application messages are limited to this many bytes in each
/// direction.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// One TLS session: the TCP connection, the TLS state on top of it,
/// and the request/reply buffers for a single exchange.
///
/// A session lives for exactly one connect-handshake-write-read
/// sequence. The transport is owned exclusively and replaced whenever a
/// new candidate address is attempted; nothing is pooled or reused.
pub struct Session {
    socket: Option<TcpStream>,
    conn: ClientConnection,
    request: Vec<u8>,
    reply: Vec<u8>,
    expected: usize,
    peer_closed: bool,
}

/// What a readiness event on a pending connect turned out to mean.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// The TCP connection is established.
    Connected,
    /// Still in progress; wait for another event.
    Pending,
    /// This attempt failed; the next candidate address may be tried.
    Failed(io::Error),
}

/// Result of moving inbound ciphertext through the connection.
#[derive(Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// The socket is drained for now; more data may arrive later.
    Progress,
    /// The peer closed the transport.
    Eof,
}

/// Why the inbound direction failed.
#[derive(Debug)]
pub enum ReadFailure {
    /// The transport itself errored.
    Transport(io::Error),
    /// The peer sent TLS data we could not process.
    Tls(rustls::Error),
}

impl Session {
    /// Creates a session that will send `request` once the channel is
    /// secured, and expects a reply of the same byte count.
    pub fn new(
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        request: &[u8],
    ) -> Result<Self, Error> {
        if request.len() > MAX_MESSAGE_LEN {
            return Err(Error::Write(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "request of {} bytes exceeds the {MAX_MESSAGE_LEN} byte buffer",
                    request.len()
                ),
            )));
        }

        let conn = ClientConnection::new(config, server_name)
            .map_err(|err| Error::Config(err.to_string()))?;

        Ok(Self {
            socket: None,
            conn,
            request: request.to_vec(),
            reply: Vec::with_capacity(request.len()),
            expected: request.len(),
            peer_closed: false,
        })
    }

    /// Starts a non-blocking connect to `addr` and registers the new
    /// socket for writability, replacing any previous attempt.
    pub fn start_connect(
        &mut self,
        addr: SocketAddr,
        registry: &Registry,
        token: Token,
    ) -> io::Result<()> {
        if let Some(mut old) = self.socket.take() {
            let _ = registry.deregister(&mut old);
        }

        let mut socket = TcpStream::connect(addr)?;
        registry.register(&mut socket, token, Interest::WRITABLE)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Classifies a readiness event on a pending connect.
    ///
    /// mio reports both success and failure as writability; the
    /// distinction comes from `take_error` and `peer_addr`.
    pub fn connect_outcome(&self) -> ConnectOutcome {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return ConnectOutcome::Pending,
        };

        match socket.take_error() {
            Ok(Some(err)) => return ConnectOutcome::Failed(err),
            Ok(None) => {}
            Err(err) => return ConnectOutcome::Failed(err),
        }

        match socket.peer_addr() {
            Ok(_) => ConnectOutcome::Connected,
            Err(err) if err.kind() == io::ErrorKind::NotConnected => ConnectOutcome::Pending,
            Err(err) => ConnectOutcome::Failed(err),
        }
    }

    /// Pulls ciphertext from the socket, processes it, and appends any
    /// resulting plaintext to the reply buffer. Plaintext beyond the
    /// expected reply length is discarded.
    pub fn read_tls(&mut self) -> Result<ReadOutcome, ReadFailure> {
        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => return Err(ReadFailure::Transport(not_connected())),
        };

        loop {
            match self.conn.read_tls(socket) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Progress)
                }
                Err(err) => return Err(ReadFailure::Transport(err)),
            }

            let state = self
                .conn
                .process_new_packets()
                .map_err(ReadFailure::Tls)?;

            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let mut chunk = vec![0u8; pending];
                self.conn
                    .reader()
                    .read_exact(&mut chunk)
                    .map_err(ReadFailure::Transport)?;
                let want = (self.expected - self.reply.len()).min(chunk.len());
                self.reply.extend_from_slice(&chunk[..want]);
            }

            if state.peer_has_closed() {
                self.peer_closed = true;
                return Ok(ReadOutcome::Progress);
            }
        }
    }

    /// Moves pending ciphertext onto the socket until it would block or
    /// nothing remains. Returns whether more remains to flush.
    pub fn flush_tls(&mut self) -> io::Result<bool> {
        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => return Err(not_connected()),
        };

        while self.conn.wants_write() {
            match self.conn.write_tls(socket) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(err) => return Err(err),
            }
        }

        Ok(false)
    }

    /// Hands the request bytes to the TLS writer. They reach the wire
    /// through subsequent [`Session::flush_tls`] calls.
    pub fn queue_request(&mut self) -> Result<(), Error> {
        let request = std::mem::take(&mut self.request);
        self.conn
            .writer()
            .write_all(&request)
            .map_err(Error::Write)
    }

    /// True once the queued request has been encrypted and fully
    /// written to the socket.
    pub fn request_flushed(&self) -> bool {
        self.request.is_empty() && !self.conn.wants_write()
    }

    pub fn handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// True once the peer signalled TLS-level closure.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// True once as many reply bytes as were sent have arrived.
    pub fn reply_complete(&self) -> bool {
        self.reply.len() >= self.expected
    }

    pub fn into_reply(self) -> Vec<u8> {
        self.reply
    }

    /// The readiness this session currently cares about, derived from
    /// the TLS state the way `wants_read`/`wants_write` describe it.
    pub fn interest(&self) -> Interest {
        let rd = self.conn.wants_read();
        let wr = self.conn.wants_write();

        if rd && wr {
            Interest::READABLE | Interest::WRITABLE
        } else if wr {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Re-registers the transport with `interest`.
    pub fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        match self.socket.as_mut() {
            Some(socket) => registry.reregister(socket, token, interest),
            None => Err(not_connected()),
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "session has no transport")
}
