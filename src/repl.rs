//! `RemoteSession` over the MicroPython raw REPL.
//!
//! Framing of one exec round-trip:
//!
//! ```text
//! host   -> code bytes, CTRL-D
//! device <- "OK", stdout, CTRL-D, stderr, CTRL-D, ">"
//! ```
//!
//! A non-empty stderr section means the code raised; its traceback is
//! returned as `SessionError::Remote`.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    chdir_code, mkdir_code, open_write_code, write_chunk_code, CLOSE_WRITE_CODE, CTRL_A, CTRL_B,
    CTRL_C, CTRL_D, EXEC_ACK, LIST_CODE, PUT_CHUNK_SIZE, RAW_PROMPT, RAW_REPL_BANNER,
};
use crate::session::{RemoteSession, Result, SessionError};
use crate::url::DeviceAddress;

/// Any byte stream a REPL can run over
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

pub struct RawRepl<T: Read + Write> {
    port: T,
    rx: Vec<u8>,
}

impl<T: Read + Write> RawRepl<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            rx: Vec::new(),
        }
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    /// Pull at least one more byte into `rx`.
    fn fill(&mut self, what: &str) -> Result<()> {
        let mut buf = [0u8; 512];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(SessionError::Timeout(what.to_string())),
                Ok(n) => {
                    self.rx.extend_from_slice(&buf[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(SessionError::Timeout(what.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume input through `marker`; returns what preceded it.
    fn read_until(&mut self, marker: &[u8], what: &str) -> Result<Vec<u8>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.rx[searched..], marker) {
                let end = searched + pos;
                let data = self.rx[..end].to_vec();
                self.rx.drain(..end + marker.len());
                return Ok(data);
            }
            searched = self.rx.len().saturating_sub(marker.len() - 1);
            self.fill(what)?;
        }
    }

    fn read_exact_n(&mut self, n: usize, what: &str) -> Result<Vec<u8>> {
        while self.rx.len() < n {
            self.fill(what)?;
        }
        Ok(self.rx.drain(..n).collect())
    }

    /// Interrupt whatever runs and switch the device into raw mode.
    pub fn enter(&mut self) -> Result<()> {
        self.send(&[b'\r', CTRL_C, CTRL_C])?;
        self.send(&[b'\r', CTRL_A])?;
        self.read_until(RAW_REPL_BANNER, "raw REPL banner")?;
        Ok(())
    }

    pub fn exit(&mut self) -> Result<()> {
        self.send(&[b'\r', CTRL_B])
    }

    /// Run `code`; returns its stdout with `\r\n` folded to `\n`.
    pub fn exec(&mut self, code: &str) -> Result<String> {
        self.read_until(RAW_PROMPT, "raw REPL prompt")?;
        for chunk in code.as_bytes().chunks(PUT_CHUNK_SIZE) {
            self.port.write_all(chunk)?;
        }
        self.send(&[CTRL_D])?;

        let ack = self.read_exact_n(EXEC_ACK.len(), "exec acknowledgement")?;
        if ack != EXEC_ACK {
            return Err(SessionError::Protocol(format!(
                "expected OK, got {:?}",
                String::from_utf8_lossy(&ack)
            )));
        }
        let out = self.read_until(&[CTRL_D], "command output")?;
        let err = self.read_until(&[CTRL_D], "command error output")?;
        if !err.is_empty() {
            return Err(SessionError::remote(decode(&err)));
        }
        Ok(decode(&out))
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace("\r\n", "\n")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Session over a serial port or a TCP byte stream.
pub struct ReplSession {
    address: Option<DeviceAddress>,
    baud: u32,
    timeout: Duration,
    pending: Option<Box<dyn Transport>>,
    repl: Option<RawRepl<Box<dyn Transport>>>,
}

impl ReplSession {
    pub fn from_address(address: DeviceAddress, baud: u32, timeout_secs: u64) -> Self {
        Self {
            address: Some(address),
            baud,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            pending: None,
            repl: None,
        }
    }

    /// Session over an already-connected stream; `open` enters raw mode on it.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            address: None,
            baud: crate::protocol::defaults::BAUD,
            timeout: Duration::from_secs(crate::protocol::defaults::TIMEOUT_SECS),
            pending: Some(Box::new(transport)),
            repl: None,
        }
    }

    fn connect(&mut self) -> Result<Box<dyn Transport>> {
        if let Some(t) = self.pending.take() {
            return Ok(t);
        }
        match &self.address {
            Some(DeviceAddress::Serial(path)) => {
                let secs = self.timeout.as_secs();
                let file = crate::serial::open_serial(path, self.baud, secs)
                    .map_err(|e| SessionError::Protocol(format!("{:#}", e)))?;
                Ok(Box::new(file))
            }
            Some(DeviceAddress::Tcp { host, port }) => {
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| SessionError::Protocol(format!("cannot resolve {}", host)))?;
                let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
                stream.set_read_timeout(Some(self.timeout))?;
                let _ = stream.set_nodelay(true);
                Ok(Box::new(stream))
            }
            None => Err(SessionError::NotOpen),
        }
    }

    fn repl(&mut self) -> Result<&mut RawRepl<Box<dyn Transport>>> {
        self.repl.as_mut().ok_or(SessionError::NotOpen)
    }

    fn run(&mut self, code: &str) -> Result<String> {
        self.repl()?.exec(code)
    }
}

impl RemoteSession for ReplSession {
    fn open(&mut self) -> Result<()> {
        let transport = self.connect()?;
        let mut repl = RawRepl::new(transport);
        repl.enter()?;
        repl.exec(&chdir_code("/"))?;
        self.repl = Some(repl);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut repl) = self.repl.take() {
            let _ = repl.exit();
        }
    }

    fn execute(&mut self, code: &str) -> Result<String> {
        self.run(code)
    }

    fn change_directory(&mut self, path: &str) -> Result<()> {
        self.run(&chdir_code(path)).map(drop)
    }

    fn change_directory_up(&mut self) -> Result<()> {
        self.run(&chdir_code("..")).map(drop)
    }

    fn list_directory(&mut self) -> Result<String> {
        self.run(LIST_CODE)
    }

    fn make_directory(&mut self, path: &str) -> Result<()> {
        self.run(&mkdir_code(path)).map(drop)
    }

    fn put_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        let data = std::fs::read(local)?;
        let repl = self.repl()?;
        repl.exec(&open_write_code(remote))?;
        for chunk in data.chunks(PUT_CHUNK_SIZE) {
            if let Err(e) = repl.exec(&write_chunk_code(chunk)) {
                let _ = repl.exec(CLOSE_WRITE_CODE);
                return Err(e);
            }
        }
        repl.exec(CLOSE_WRITE_CODE)?;
        Ok(())
    }
}
