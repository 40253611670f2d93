//! Device address parsing
//!
//! Accepted forms:
//! - `ser:/dev/ttyUSB0`, `ser:COM10`
//! - a bare port name: `/dev/ttyACM0`, `COM3`
//! - `tcp:host:port` or `tcp://host:port` for a raw byte stream carrying
//!   the REPL (serial-over-TCP bridges, emulators)

use anyhow::{anyhow, bail, Result};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    Serial(PathBuf),
    Tcp { host: String, port: u16 },
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Serial(p) => write!(f, "ser:{}", p.display()),
            DeviceAddress::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

pub fn parse_device_address(s: &str) -> Result<DeviceAddress> {
    let s_trim = s.trim();
    if s_trim.is_empty() {
        bail!("device address is empty");
    }
    let lower = s_trim.to_ascii_lowercase();

    if lower.starts_with("tcp:") {
        let mut rest = &s_trim[4..];
        if let Some(r) = rest.strip_prefix("//") {
            rest = r;
        }
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("tcp address needs a port: {}", s_trim))?;
        if host.is_empty() {
            bail!("tcp address needs a host: {}", s_trim);
        }
        let port = port
            .parse()
            .map_err(|_| anyhow!("invalid port in {}", s_trim))?;
        return Ok(DeviceAddress::Tcp {
            host: host.to_string(),
            port,
        });
    }

    let path = if lower.starts_with("ser:") {
        &s_trim[4..]
    } else {
        s_trim
    };
    if path.is_empty() {
        bail!("serial address needs a port name: {}", s_trim);
    }
    Ok(DeviceAddress::Serial(PathBuf::from(path)))
}
