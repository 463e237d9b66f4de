use anyhow::{anyhow, Context, Result};

use crate::error::PullError;
use crate::logger::Logger;
use crate::protocol::{
    self, timeouts, EndOfData, FileEntry, ListingMode, NameAssembler, Revision,
    LISTING_RECORD_LEN, MAX_TRANSFER_SIZE,
};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Byte stream the session talks over.
///
/// `TcpStream` in production; tests script the peer in memory.
pub trait Transport: Read + Write {
    /// Bound the next blocking reads. `None` blocks indefinitely.
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Read once, retrying on EINTR. `Ok(None)` means the deadline passed.
fn read_some<T: Transport + ?Sized>(t: &mut T, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        match t.read(buf) {
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Read timeouts applied by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub listing_poll: Duration,
    pub idle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            listing_poll: Duration::from_millis(timeouts::LISTING_POLL_MS),
            idle: Duration::from_millis(timeouts::IDLE_READ_MS),
        }
    }
}

// Socket tuning: requests are tiny, don't let Nagle hold them back
fn tune_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .with_context(|| format!("resolve {}", addr))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}", addr))
}

/// Connect with a bounded number of retries.
pub fn connect(
    addr: &str,
    timeout: Duration,
    retries: u32,
    logger: &dyn Logger,
) -> Result<TcpStream> {
    let target = resolve(addr)?;
    let mut attempt = 0;
    loop {
        match TcpStream::connect_timeout(&target, timeout) {
            Ok(stream) => {
                tune_socket(&stream);
                return Ok(stream);
            }
            Err(e) if attempt < retries => {
                attempt += 1;
                logger.error("connect", &format!("{} failed ({}), retrying", addr, e));
                thread::sleep(Duration::from_millis(timeouts::CONNECT_RETRY_DELAY_MS));
            }
            Err(e) => return Err(e).with_context(|| format!("connect {}", addr)),
        }
    }
}

/// One client session against the file server.
///
/// Owns the transport for its whole life. Once the server ends a transfer by
/// closing the connection the session is spent.
pub struct Session<T: Transport> {
    transport: T,
    revision: Revision,
    timeouts: SessionTimeouts,
    closed: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, revision: Revision, timeouts: SessionTimeouts) -> Self {
        Self {
            transport,
            revision,
            timeouts,
            closed: false,
        }
    }

    /// Peer has closed; no further requests can be made.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Negotiate the file listing, keeping only names carrying `marker`.
    pub fn list_files(&mut self, marker: &str, logger: &dyn Logger) -> Result<Vec<FileEntry>> {
        let all = match self.revision.listing_mode() {
            ListingMode::Polled => self.list_polled()?,
            ListingMode::Counted => self.list_counted(logger)?,
        };
        let listing = protocol::filter_listing(all, marker);
        logger.listed(&listing);
        Ok(listing)
    }

    fn list_polled(&mut self) -> Result<Vec<FileEntry>> {
        let names = self.poll_names()?;
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| FileEntry::new(u8::try_from(i).unwrap_or(u8::MAX), name))
            .collect())
    }

    /// Poll until the server goes quiet, collecting announced names.
    fn poll_names(&mut self) -> Result<Vec<String>> {
        self.transport
            .set_read_deadline(Some(self.timeouts.listing_poll))?;
        let mut asm = NameAssembler::new();
        let mut names = Vec::new();
        let mut rec = [0u8; LISTING_RECORD_LEN];
        loop {
            match read_some(&mut self.transport, &mut rec).context("listing poll")? {
                None => break,
                Some(0) => {
                    self.closed = true;
                    break;
                }
                Some(n) => names.extend(asm.push(&rec[..n])),
            }
        }
        names.extend(asm.finish());
        Ok(names)
    }

    fn list_counted(&mut self, logger: &dyn Logger) -> Result<Vec<FileEntry>> {
        self.transport.set_read_deadline(Some(self.timeouts.idle))?;
        let mut count = [0u8; 1];
        match read_some(&mut self.transport, &mut count).context("read file count")? {
            Some(1) => {}
            Some(_) => {
                self.closed = true;
                return Err(PullError::ConnectionClosed("listing handshake").into());
            }
            None => {
                return Err(PullError::TransferStalled {
                    received: 0,
                    idle_ms: self.idle_ms(),
                }
                .into())
            }
        }
        // Echo the count back as the ack
        self.transport
            .write_all(&count)
            .context("acknowledge file count")?;

        let mut entries = Vec::with_capacity(count[0] as usize);
        for position in 0..count[0] as usize {
            let raw = self.read_record()?;
            match protocol::parse_counted_record(&raw) {
                Some(entry) => entries.push(entry),
                None => logger.malformed_record(position, raw.len()),
            }
        }
        Ok(entries)
    }

    /// Read up to one listing record, stopping early on a zero-length read.
    fn read_record(&mut self) -> Result<Vec<u8>> {
        let mut rec = [0u8; LISTING_RECORD_LEN];
        let mut got = 0;
        while got < LISTING_RECORD_LEN && !self.closed {
            match read_some(&mut self.transport, &mut rec[got..]).context("read listing record")? {
                Some(0) => self.closed = true,
                Some(n) => got += n,
                None => {
                    return Err(PullError::TransferStalled {
                        received: got,
                        idle_ms: self.idle_ms(),
                    }
                    .into())
                }
            }
        }
        Ok(rec[..got].to_vec())
    }

    /// Request `entry` and accumulate its body until the server signals the end.
    ///
    /// Any failure spends the session: the stream may still carry the rest of
    /// the body, so the next request needs a fresh connection.
    pub fn request_file(&mut self, entry: &FileEntry, logger: &dyn Logger) -> Result<Vec<u8>> {
        if self.closed {
            return Err(PullError::ConnectionClosed("request").into());
        }
        logger.requesting(entry);
        let result = self.exchange(entry, logger);
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    fn exchange(&mut self, entry: &FileEntry, logger: &dyn Logger) -> Result<Vec<u8>> {
        if self.revision.requests_by_index() {
            self.transport
                .write_all(&[entry.index])
                .with_context(|| format!("request {}", entry))?;
            self.transport.set_read_deadline(Some(self.timeouts.idle))?;
            let echo = self.read_record()?;
            if echo.len() != LISTING_RECORD_LEN {
                return Err(PullError::ConnectionClosed("request echo").into());
            }
            if echo[0] != entry.index {
                return Err(PullError::EchoMismatch {
                    requested: entry.index,
                    echoed: echo[0],
                }
                .into());
            }
        } else {
            self.transport
                .write_all(&protocol::name_request(&entry.name))
                .with_context(|| format!("request {}", entry))?;
        }
        self.transport.flush()?;
        self.receive_body(entry, logger)
    }

    fn receive_body(&mut self, entry: &FileEntry, logger: &dyn Logger) -> Result<Vec<u8>> {
        self.transport.set_read_deadline(Some(self.timeouts.idle))?;
        let chunk_len = self.revision.chunk_len();
        let end = self.revision.end_of_data();
        let mut chunk = vec![0u8; chunk_len];
        let mut data = Vec::new();
        loop {
            let n = match read_some(&mut self.transport, &mut chunk)
                .with_context(|| format!("receive {}", entry.name))?
            {
                Some(n) => n,
                // The polled server sends nothing after a body that fills its
                // last chunk exactly; silence after data is the end of it.
                None if end == EndOfData::ShortChunk && !data.is_empty() => break,
                None => {
                    return Err(PullError::TransferStalled {
                        received: data.len(),
                        idle_ms: self.idle_ms(),
                    }
                    .into())
                }
            };
            if data.len() + n > MAX_TRANSFER_SIZE {
                return Err(PullError::TransferTooLarge {
                    limit: MAX_TRANSFER_SIZE,
                }
                .into());
            }
            data.extend_from_slice(&chunk[..n]);
            logger.received(entry, n, data.len());
            match end {
                EndOfData::ShortChunk if n < chunk_len => {
                    if n == 0 {
                        self.closed = true;
                    }
                    break;
                }
                EndOfData::PeerClose if n == 0 => {
                    self.closed = true;
                    break;
                }
                _ => {}
            }
        }
        Ok(data)
    }

    /// Swallow the listing the polled server re-sends after each transfer.
    ///
    /// Returns how many names went by. A no-op for the counted revision.
    pub fn drain_listing(&mut self) -> Result<usize> {
        if self.closed || self.revision.listing_mode() != ListingMode::Polled {
            return Ok(0);
        }
        Ok(self.poll_names()?.len())
    }

    fn idle_ms(&self) -> u64 {
        self.timeouts.idle.as_millis() as u64
    }
}
