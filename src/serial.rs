//! Serial port setup.
//!
//! On unix the tty is switched to raw 8N1 at the requested baud rate with
//! a read timeout, so a silent device surfaces as a zero-length read
//! instead of a hang. Elsewhere the port is opened as-is and the line
//! settings configured by the OS are used.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;

#[cfg(unix)]
pub fn open_serial(path: &Path, baud: u32, timeout_secs: u64) -> Result<File> {
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::OpenOptionsExt;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .with_context(|| format!("Failed to open serial port {}", path.display()))?;

    let fd = file.as_raw_fd();
    let speed = baud_constant(baud)
        .with_context(|| format!("Unsupported baud rate {}", baud))?;

    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("tcgetattr failed on {}", path.display()));
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
        // VTIME is in tenths of a second and saturates at 25.5s
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = (timeout_secs.saturating_mul(10)).clamp(1, 255) as libc::cc_t;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Failed to set baud rate on {}", path.display()));
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("tcsetattr failed on {}", path.display()));
        }
        libc::tcflush(fd, libc::TCIOFLUSH);
    }

    Ok(file)
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460_800 => libc::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921_600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}

#[cfg(not(unix))]
pub fn open_serial(path: &Path, _baud: u32, _timeout_secs: u64) -> Result<File> {
    // COM10 and above need the device namespace prefix
    let name = path.to_string_lossy();
    let full = if name.starts_with(r"\\.\") {
        name.to_string()
    } else {
        format!(r"\\.\{}", name)
    };
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&full)
        .with_context(|| format!("Failed to open serial port {}", path.display()))
}
