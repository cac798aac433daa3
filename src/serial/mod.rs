//! Framed, checksummed ASCII serial protocol engine.

mod transport;

pub use transport::{SerialTransport, SerialPortTransport};
#[cfg(test)]
pub use transport::tests::FakeTransport;

use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const REBOOT_BYTE: u8 = 0x03;
const ACK_BYTE: u8 = 0x06;
const FRAME_BYTE: u8 = 0x0A;
const VALUE_TERMINATOR: [u8; 2] = [0x0D, 0x0A];

const INTER_ATTEMPT_DELAY: Duration = Duration::from_millis(100);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const REBOOT_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("controller NAKed command {command:?} (byte {byte:#04x})")]
    Nak { command: String, byte: u8 },
    #[error("checksum mismatch on reply to {command:?}")]
    ChecksumMismatch { command: String },
    #[error("no serial link is open")]
    NotOpen,
    #[error("exhausted {attempts} retries sending {command:?}: {source}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        #[source]
        source: Box<SerialError>,
    },
}

/// Checksum as one signed byte: `((~(sum(bytes) & 0x7F) + 1) | 0x80)`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    let low7 = (sum & 0x7F) as u8;
    let negated = (!low7).wrapping_add(1);
    negated | 0x80
}

/// A point-to-point byte stream with configurable baud and per-read timeout.
/// Offers one operation, [`SerialLink::send_command`].
pub struct SerialLink {
    transport: Box<dyn SerialTransport>,
    retries: u32,
}

impl SerialLink {
    /// Opens the link: adopts the transport, flushes both buffers, sends the
    /// reboot byte, and waits for the controller to settle.
    pub fn open(mut transport: Box<dyn SerialTransport>) -> Result<Self, SerialError> {
        transport.clear_input()?;
        transport.clear_output()?;
        transport.write_all(&[REBOOT_BYTE])?;
        transport.flush()?;
        std::thread::sleep(REBOOT_SETTLE_DELAY);
        Ok(Self {
            transport,
            retries: 1,
        })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Builds a link directly over a transport, skipping the reboot
    /// handshake in [`SerialLink::open`]; for tests driving a
    /// [`transport::tests::FakeTransport`] that never expects a reboot byte.
    #[cfg(test)]
    pub fn for_test(transport: Box<dyn SerialTransport>) -> Self {
        Self {
            transport,
            retries: 1,
        }
    }

    /// Sends one framed command and, if `expects_value`, reads back a
    /// checksummed value reply. Retries on transient framing errors.
    pub fn send_command(
        &mut self,
        command: &str,
        expects_value: bool,
    ) -> Result<Option<String>, SerialError> {
        let mut last_err = None;
        for attempt in 1..=self.retries {
            if attempt > 1 {
                warn!(command, attempt, "retrying serial command");
                std::thread::sleep(RETRY_DELAY);
            }

            match self.try_send(command, expects_value) {
                Ok(value) => return Ok(value),
                Err(e) => last_err = Some(e),
            }
        }

        Err(SerialError::RetriesExhausted {
            command: command.to_string(),
            attempts: self.retries,
            source: Box::new(last_err.expect("at least one attempt runs")),
        })
    }

    fn try_send(&mut self, command: &str, expects_value: bool) -> Result<Option<String>, SerialError> {
        self.transport.clear_input()?;
        self.transport.clear_output()?;
        std::thread::sleep(INTER_ATTEMPT_DELAY);

        let frame = frame_command(command);
        self.transport.write_all(&frame)?;
        self.transport.flush()?;

        let mut ack = [0u8; 1];
        self.transport.read_exact(&mut ack)?;
        if ack[0] != ACK_BYTE {
            return Err(SerialError::Nak {
                command: command.to_string(),
                byte: ack[0],
            });
        }

        if !expects_value {
            return Ok(None);
        }

        let line = read_value_line(&mut self.transport)?;
        let (payload, received_checksum) = line
            .split_last()
            .ok_or_else(|| SerialError::ChecksumMismatch {
                command: command.to_string(),
            })?;
        if checksum(received_checksum) != *payload {
            return Err(SerialError::ChecksumMismatch {
                command: command.to_string(),
            });
        }

        Ok(Some(String::from_utf8_lossy(received_checksum).into_owned()))
    }
}

fn frame_command(command: &str) -> Vec<u8> {
    let command_bytes = command.as_bytes();
    let mut frame = Vec::with_capacity(command_bytes.len() + 3);
    frame.push(FRAME_BYTE);
    frame.extend_from_slice(command_bytes);
    frame.push(checksum(command_bytes));
    frame.push(FRAME_BYTE);
    frame
}

/// Reads a `\r\n`-terminated line, returning the bytes before the terminator
/// (payload plus trailing checksum byte).
fn read_value_line(transport: &mut Box<dyn SerialTransport>) -> Result<Vec<u8>, SerialError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        transport.read_exact(&mut byte)?;
        line.push(byte[0]);
        if line.ends_with(&VALUE_TERMINATOR) {
            line.truncate(line.len() - VALUE_TERMINATOR.len());
            return Ok(line);
        }
    }
}
