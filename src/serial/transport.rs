use super::SerialError;
use std::io::{Read, Write};
use std::time::Duration;

/// A byte stream the protocol engine can drive: read/write plus the ability
/// to discard buffered bytes before a command attempt. Kept narrow so tests
/// can substitute an in-memory fake instead of real hardware.
pub trait SerialTransport: Read + Write + Send {
    fn clear_input(&mut self) -> Result<(), SerialError>;
    fn clear_output(&mut self) -> Result<(), SerialError>;
}

/// The real transport: a `serialport` handle opened at a configured baud
/// rate and per-read timeout.
pub struct SerialPortTransport(Box<dyn serialport::SerialPort>);

impl SerialPortTransport {
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| SerialError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(Self(port))
    }
}

impl Read for SerialPortTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialPortTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl SerialTransport for SerialPortTransport {
    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.0
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| SerialError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    fn clear_output(&mut self) -> Result<(), SerialError> {
        self.0
            .clear(serialport::ClearBuffer::Output)
            .map_err(|e| SerialError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::serial::checksum;
    use std::collections::VecDeque;

    /// An in-memory transport that plays back a scripted byte stream,
    /// letting [`super::super::SerialLink`] be unit-tested without hardware.
    pub struct FakeTransport {
        to_read: VecDeque<u8>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                to_read: VecDeque::new(),
            }
        }

        pub fn expect_ack(mut self) -> Self {
            self.to_read.push_back(0x06);
            self
        }

        pub fn expect_nak_always(mut self) -> Self {
            for _ in 0..16 {
                self.to_read.push_back(0xFF);
            }
            self
        }

        pub fn reply_value(mut self, payload: &str) -> Self {
            self.to_read.extend(payload.bytes());
            self.to_read.push_back(checksum(payload.as_bytes()));
            self.to_read.push_back(0x0D);
            self.to_read.push_back(0x0A);
            self
        }

        pub fn reply_corrupt_value(mut self, payload: &str) -> Self {
            self.to_read.extend(payload.bytes());
            self.to_read.push_back(checksum(payload.as_bytes()) ^ 0xFF);
            self.to_read.push_back(0x0D);
            self.to_read.push_back(0x0A);
            self
        }
    }

    impl Read for FakeTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            for slot in buf.iter_mut() {
                match self.to_read.pop_front() {
                    Some(byte) => *slot = byte,
                    None => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "fake transport exhausted",
                        ))
                    }
                }
            }
            Ok(buf.len())
        }
    }

    impl Write for FakeTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SerialTransport for FakeTransport {
        fn clear_input(&mut self) -> Result<(), SerialError> {
            Ok(())
        }

        fn clear_output(&mut self) -> Result<(), SerialError> {
            Ok(())
        }
    }
}
