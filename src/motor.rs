//! Motor controller command vocabulary: each mnemonic gets a typed accessor
//! over the serial link rather than ad hoc string formatting at call sites.

use crate::serial::{SerialError, SerialLink};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error("unparsable reply {reply:?} to {command}")]
    BadReply { command: &'static str, reply: String },
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// Shutter input-limit bitfield: bit 2 = closed limit, bit 3 = open limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterLimits {
    pub at_closed: bool,
    pub at_open: bool,
}

impl ShutterLimits {
    fn from_bitfield(bits: i64) -> Self {
        Self {
            at_closed: bits & 0b0100 != 0,
            at_open: bits & 0b1000 != 0,
        }
    }
}

pub struct MotorLink {
    link: SerialLink,
}

impl MotorLink {
    pub fn new(link: SerialLink) -> Self {
        Self { link }
    }

    fn query(&mut self, command: &'static str) -> Result<String> {
        Ok(self
            .link
            .send_command(command, true)?
            .ok_or(ProtocolError::BadReply {
                command,
                reply: String::new(),
            })?)
    }

    fn query_bool(&mut self, command: &'static str) -> Result<bool> {
        let reply = self.query(command)?;
        match reply.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(ProtocolError::BadReply {
                command,
                reply,
            }),
        }
    }

    fn query_int(&mut self, command: &'static str) -> Result<i64> {
        let reply = self.query(command)?;
        reply
            .trim()
            .parse()
            .map_err(|_| ProtocolError::BadReply { command, reply })
    }

    fn act(&mut self, command: &str) -> Result<()> {
        self.link.send_command(command, false)?;
        Ok(())
    }

    /// `OPR MV`: is the shutter motor moving.
    pub fn shutter_is_moving(&mut self) -> Result<bool> {
        self.query_bool("OPR MV")
    }

    /// `APR MV`: is the azimuth motor moving.
    pub fn azimuth_is_moving(&mut self) -> Result<bool> {
        self.query_bool("APR MV")
    }

    /// `OPR V`: signed shutter velocity; positive = opening, negative = closing.
    pub fn shutter_velocity(&mut self) -> Result<i64> {
        self.query_int("OPR V")
    }

    /// `OPR IL`: shutter input-limit bitfield.
    pub fn shutter_limits(&mut self) -> Result<ShutterLimits> {
        Ok(ShutterLimits::from_bitfield(self.query_int("OPR IL")?))
    }

    /// `APR P`: current signed azimuth step count.
    pub fn azimuth_position_steps(&mut self) -> Result<i64> {
        self.query_int("APR P")
    }

    /// `AP=0`: zero the azimuth motor's step register (at home).
    pub fn zero_azimuth_steps(&mut self) -> Result<()> {
        self.act("AP=0")
    }

    /// `OMR <n>`: move the shutter motor by a relative step count.
    pub fn move_shutter_relative(&mut self, steps: i64) -> Result<()> {
        self.act(&format!("OMR {steps}"))
    }

    /// `AMA <n>`: move the azimuth motor to an absolute step count.
    pub fn move_azimuth_absolute(&mut self, steps: i64) -> Result<()> {
        self.act(&format!("AMA {steps}"))
    }

    /// `OSL 0`: stop the shutter motor at zero velocity.
    pub fn stop_shutter(&mut self) -> Result<()> {
        self.act("OSL 0")
    }

    /// `ASL 0`: stop the azimuth motor at zero velocity.
    pub fn stop_azimuth(&mut self) -> Result<()> {
        self.act("ASL 0")
    }

    /// `AHM 1`: begin a home seek on the azimuth axis.
    pub fn home_azimuth(&mut self) -> Result<()> {
        self.act("AHM 1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutter_limits_decode_bitfield() {
        assert_eq!(
            ShutterLimits::from_bitfield(0b0100),
            ShutterLimits {
                at_closed: true,
                at_open: false
            }
        );
        assert_eq!(
            ShutterLimits::from_bitfield(0b1000),
            ShutterLimits {
                at_closed: false,
                at_open: true
            }
        );
        assert_eq!(
            ShutterLimits::from_bitfield(0b0000),
            ShutterLimits {
                at_closed: false,
                at_open: false
            }
        );
    }
}
