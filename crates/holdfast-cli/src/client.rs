//! Blocking client for the daemon's control socket.

use anyhow::{bail, Context, Result};
use holdfast_core::{ControlRequest, ControlResponse};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) struct ControlClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl ControlClient {
    /// Connection errors are returned as-is so callers can fall back to offline edits.
    pub(crate) fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            writer: stream,
            reader,
        })
    }

    pub(crate) fn send(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        self.writer
            .write_all(request.to_line()?.as_bytes())
            .context("send control request")?;
        self.writer.flush()?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("read control response")?;
        if read == 0 {
            bail!("daemon closed the control connection without replying");
        }
        Ok(ControlResponse::parse(&line)?)
    }
}
