// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: post_flash  —  serial commands after a flash
//
//  Fire-and-forget: each command is written with a trailing '\n', we wait a
//  moment, and whatever the device printed is logged.  There is no ack
//  protocol, so no individual command can "fail".  Any I/O error aborts the
//  remaining commands and is reported to the caller as a warning; it never
//  fails the flash session.
// ─────────────────────────────────────────────────────────────────────────────

use std::io;
use std::thread;
use std::time::Duration;

use crate::constants::{Timing, SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT};
use crate::error::{FlashError, Result};

/// An open line to the device. Dropping it closes the port.
pub trait SerialLink {
    /// Discard anything pending in both directions.
    fn clear_buffers(&mut self) -> io::Result<()>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    fn bytes_to_read(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub trait SerialConnector {
    fn open(&self, port: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>>;
}

// ─────────────────────────────────────────────────────────────────────────────
//  serialport backend
// ─────────────────────────────────────────────────────────────────────────────

pub struct SystemSerial;

struct SystemLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialConnector for SystemSerial {
    fn open(&self, port: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(port, baud).timeout(timeout).open()?;
        Ok(Box::new(SystemLink { port }))
    }
}

impl SerialLink for SystemLink {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Runner
// ─────────────────────────────────────────────────────────────────────────────

pub struct PostFlashRunner<'a> {
    connector: &'a dyn SerialConnector,
    timing:    Timing,
}

impl<'a> PostFlashRunner<'a> {
    pub fn new(connector: &'a dyn SerialConnector, timing: Timing) -> Self {
        Self { connector, timing }
    }

    /// Send `commands` in order. `log` receives progress and device replies.
    ///
    /// Returns the number of commands written. The port is closed on every
    /// path, including errors part-way through.
    pub fn run(&self, port: &str, commands: &[String], log: &mut dyn FnMut(&str)) -> Result<usize> {
        thread::sleep(self.timing.reboot_settle);

        let mut link = self
            .connector
            .open(port, SERIAL_BAUD_RATE, SERIAL_READ_TIMEOUT)
            .map_err(|e| FlashError::Serial(format!("could not open {}: {}", port, e)))?;
        thread::sleep(self.timing.serial_stabilize);

        link.clear_buffers().map_err(serial_err)?;

        let total = commands.len();
        for (i, cmd) in commands.iter().enumerate() {
            log(&format!("[{}/{}] Sending: {}", i + 1, total, cmd));

            let mut line = Vec::with_capacity(cmd.len() + 1);
            line.extend_from_slice(cmd.as_bytes());
            line.push(b'\n');
            link.write_all(&line).map_err(serial_err)?;
            link.flush().map_err(serial_err)?;

            thread::sleep(self.timing.command_reply);

            let reply = read_available(link.as_mut()).map_err(serial_err)?;
            if !reply.is_empty() {
                log(&format!("Response: {}", reply));
            }
        }

        Ok(total)
    }
}

/// Read whatever is pending and decode it leniently.
fn read_available(link: &mut dyn SerialLink) -> io::Result<String> {
    let pending = link.bytes_to_read()?;
    if pending == 0 {
        return Ok(String::new());
    }

    let mut buf = vec![0u8; pending];
    let n = match link.read(&mut buf) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
        Err(e) => return Err(e),
    };
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}

fn serial_err(e: io::Error) -> FlashError {
    FlashError::Serial(e.to_string())
}
