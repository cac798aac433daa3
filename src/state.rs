//! The authoritative dome state record and the enums describing it. Mutated
//! only by the arbiter task; read under a lock by `status()`.

use crate::astro_math::Degrees;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AzimuthStatus {
    Disconnected,
    NotHomed,
    Homing,
    Moving,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutterStatus {
    Disconnected,
    Closed,
    Open,
    PartiallyOpen,
    Opening,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatStatus {
    Disabled,
    Active,
    TrippedClosing,
    TrippedIdle,
}

/// Result code returned by every command-arbiter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandStatus {
    Succeeded,
    Failed,
    Blocked,
    NotConnected,
    NotDisconnected,
    NotHomed,
    InvalidControlIP,
    EngineeringModeActive,
    EngineeringModeRequiresHeartbeatDisabled,
    FollowModeActive,
    HeartbeatCloseInProgress,
    HeartbeatTimedOut,
    HeartbeatInvalidTimeout,
}

/// A tracked celestial target, in ICRS degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingCoord {
    pub ra_deg: Degrees,
    pub dec_deg: Degrees,
}

/// The single authoritative record of dome state. Its invariants are
/// re-established at the end of each arbiter iteration; see
/// `crate::arbiter` for where each transition lives.
#[derive(Debug, Clone)]
pub struct DomeState {
    pub state_timestamp: DateTime<Utc>,
    pub azimuth_status: AzimuthStatus,
    pub shutter_status: ShutterStatus,
    pub heartbeat_status: HeartbeatStatus,
    pub azimuth_degrees: Degrees,
    pub heartbeat_expires_at: Option<DateTime<Utc>>,
    pub engineering_mode: bool,
    pub follow_telescope: bool,
    pub tracking_coord: Option<TrackingCoord>,
    pub connected: bool,
    pub last_error: Option<String>,
}

impl DomeState {
    pub fn disconnected(now: DateTime<Utc>) -> Self {
        Self {
            state_timestamp: now,
            azimuth_status: AzimuthStatus::Disconnected,
            shutter_status: ShutterStatus::Disconnected,
            heartbeat_status: HeartbeatStatus::Disabled,
            azimuth_degrees: 0.0,
            heartbeat_expires_at: None,
            engineering_mode: false,
            follow_telescope: true,
            tracking_coord: None,
            connected: false,
            last_error: None,
        }
    }

    /// Asserts the dome's invariants; used by tests to verify a state is
    /// internally consistent.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        if !self.connected {
            assert_eq!(self.azimuth_status, AzimuthStatus::Disconnected);
            assert_eq!(self.shutter_status, ShutterStatus::Disconnected);
        }
        if self.heartbeat_status == HeartbeatStatus::Active {
            assert!(self.heartbeat_expires_at.is_some());
        }
        if self.heartbeat_status == HeartbeatStatus::TrippedIdle {
            assert_eq!(self.shutter_status, ShutterStatus::Closed);
        }
        if self.tracking_coord.is_some() {
            assert!(!self.engineering_mode);
        }
        if self.engineering_mode {
            assert_eq!(self.heartbeat_status, HeartbeatStatus::Disabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_disconnected_state_satisfies_invariants() {
        DomeState::disconnected(Utc::now()).check_invariants();
    }

    #[test]
    #[should_panic]
    fn engineering_mode_with_active_heartbeat_violates_invariant() {
        let mut state = DomeState::disconnected(Utc::now());
        state.connected = true;
        state.engineering_mode = true;
        state.heartbeat_status = HeartbeatStatus::Active;
        state.heartbeat_expires_at = Some(Utc::now());
        state.check_invariants();
    }
}
