//! One HTTP exchange over a non-blocking socket.

use super::codec::{ResponseParser, encode_request};
use super::types::{HttpError, HttpRequest, Method, Response};
use crate::types::Time;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

const READ_CHUNK: usize = 16 * 1024;

/// Outcome of advancing a transfer.
#[derive(Debug)]
pub(crate) enum Progress {
    /// Nothing could be done without blocking.
    Idle,
    /// Bytes moved or the connection was established.
    Advanced,
    /// The exchange finished.
    Done(Result<Response, HttpError>),
}

enum Stage {
    Connecting,
    Sending { written: usize },
    Receiving,
}

/// A request in flight.
pub(crate) struct Transfer {
    socket: Socket,
    stage: Stage,
    request: Vec<u8>,
    parser: ResponseParser,
    deadline: Time,
    timeout: Duration,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, HttpError> {
    let resolve_error = |source| HttpError::Resolve {
        host: host.to_owned(),
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    err.kind() == io::ErrorKind::WouldBlock
}

impl Transfer {
    /// Resolves the host and starts a non-blocking connect.
    pub(crate) fn start(request: &HttpRequest, now: Time) -> Result<Self, HttpError> {
        let addr = resolve(&request.url.host, request.url.port)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(HttpError::Connect)?;
        socket.set_nonblocking(true).map_err(HttpError::Connect)?;
        socket.set_tcp_nodelay(true).map_err(HttpError::Connect)?;
        let stage = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => Stage::Sending { written: 0 },
            Err(err) if connect_in_progress(&err) => Stage::Connecting,
            Err(err) => return Err(HttpError::Connect(err)),
        };
        Ok(Self {
            socket,
            stage,
            request: encode_request(request),
            parser: ResponseParser::new(request.method == Method::Head),
            deadline: now + request.timeout,
            timeout: request.timeout,
        })
    }

    /// Advances the exchange as far as possible without blocking.
    pub(crate) fn step(&mut self, now: Time) -> Progress {
        if now >= self.deadline {
            return Progress::Done(Err(HttpError::Timeout(self.timeout)));
        }
        let mut advanced = false;
        loop {
            let result = match self.stage {
                Stage::Connecting => self.finish_connect(),
                Stage::Sending { written } => self.send(written),
                Stage::Receiving => self.receive(),
            };
            match result {
                Ok(Progress::Advanced) => advanced = true,
                Ok(Progress::Idle) if advanced => return Progress::Advanced,
                Ok(progress) => return progress,
                Err(err) => return Progress::Done(Err(err)),
            }
        }
    }

    fn finish_connect(&mut self) -> Result<Progress, HttpError> {
        if let Some(err) = self.socket.take_error().map_err(HttpError::Connect)? {
            return Err(HttpError::Connect(err));
        }
        match self.socket.peer_addr() {
            Ok(_) => {
                self.stage = Stage::Sending { written: 0 };
                Ok(Progress::Advanced)
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(Progress::Idle),
            Err(err) => Err(HttpError::Connect(err)),
        }
    }

    fn send(&mut self, written: usize) -> Result<Progress, HttpError> {
        if written == self.request.len() {
            self.stage = Stage::Receiving;
            return Ok(Progress::Advanced);
        }
        match (&self.socket).write(&self.request[written..]) {
            Ok(0) => Err(HttpError::Io(io::ErrorKind::WriteZero.into())),
            Ok(n) => {
                self.stage = Stage::Sending { written: written + n };
                Ok(Progress::Advanced)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Progress::Idle),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Progress::Advanced),
            Err(err) => Err(err.into()),
        }
    }

    fn receive(&mut self) -> Result<Progress, HttpError> {
        let mut buf = [0u8; READ_CHUNK];
        match (&self.socket).read(&mut buf) {
            Ok(0) => Ok(Progress::Done(self.parser.finish())),
            Ok(n) => Ok(match self.parser.feed(&buf[..n])? {
                Some(response) => Progress::Done(Ok(response)),
                None => Progress::Advanced,
            }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Progress::Idle),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(Progress::Advanced),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self.stage {
            Stage::Connecting => "connecting",
            Stage::Sending { .. } => "sending",
            Stage::Receiving => "receiving",
        };
        f.debug_struct("Transfer")
            .field("stage", &stage)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
