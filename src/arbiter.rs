//! The command arbiter / control loop: a single background worker owning the
//! serial handle and the dome state. Every motor-touching decision is made
//! here; nowhere else mutates [`DomeState`].
//!
//! The worker runs on a dedicated blocking thread (`tokio::task::spawn_blocking`)
//! rather than as a plain async task: every iteration does blocking serial
//! I/O (framed reads, inter-attempt/retry sleeps), and that work should never
//! share the async runtime's worker pool with the HTTP surface.

use crate::astro_math::{CelestialFrame, Degrees, ObserverFrame};
use crate::config::Config;
use crate::geometry::{dome_azimuth_for_altaz, shortest_delta, target_to_steps, unwrap_target};
use crate::motor::MotorLink;
use crate::serial::{SerialLink, SerialPortTransport};
use crate::state::{AzimuthStatus, CommandStatus, DomeState, HeartbeatStatus, ShutterStatus, TrackingCoord};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, RwLock};
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum ArbiterRequest {
    Connect,
    Disconnect,
    OpenShutter { override_flag: bool },
    CloseShutter { override_flag: bool },
    StopShutter,
    StopAzimuth,
    HomeAzimuth,
    SlewAzimuth { target_deg: Degrees },
    TrackRadec { ra_deg: Degrees, dec_deg: Degrees },
    SlewRadec { ra_deg: Degrees, dec_deg: Degrees },
    SlewAltaz { alt_deg: Degrees, az_deg: Degrees },
    SetHeartbeatTimer { seconds: i64 },
    SetEngineeringMode(bool),
    SetFollowMode(bool),
}

pub type ReplyTx = oneshot::Sender<CommandStatus>;
/// A plain `std::sync::mpsc` channel, not a `tokio::sync::mpsc` one: the
/// arbiter's receiving end lives on the dedicated blocking thread and is
/// drained with `recv_timeout`, never polled from async code.
pub type RequestTx = mpsc::Sender<(ArbiterRequest, ReplyTx)>;
type RequestRx = mpsc::Receiver<(ArbiterRequest, ReplyTx)>;

pub struct Arbiter {
    config: Config,
    frame: ObserverFrame,
    state: Arc<RwLock<DomeState>>,
    movement_complete: Arc<Notify>,
    motor: Option<MotorLink>,
}

impl Arbiter {
    pub fn new(config: Config, state: Arc<RwLock<DomeState>>, movement_complete: Arc<Notify>) -> Self {
        let frame = ObserverFrame {
            latitude: config.latitude,
            longitude: config.longitude,
        };
        Self {
            config,
            frame,
            state,
            movement_complete,
            motor: None,
        }
    }

    /// Spawns the arbiter on a dedicated blocking thread and returns the
    /// channel used to submit requests (single consumer, many producers).
    pub fn spawn(self) -> RequestTx {
        let (tx, rx) = mpsc::channel();
        tokio::task::spawn_blocking(move || self.run(rx));
        tx
    }

    fn run(mut self, rx: RequestRx) {
        loop {
            let poll_delay = self.next_poll_delay();
            let received = rx.recv_timeout(poll_delay);

            let (request, reply) = match received {
                Ok((request, reply)) => (Some(request), Some(reply)),
                Err(RecvTimeoutError::Timeout) => (None, None),
                Err(RecvTimeoutError::Disconnected) => return,
            };

            if let Some(ArbiterRequest::Connect) = request {
                let status = self.handle_connect();
                self.movement_complete.notify_waiters();
                let _ = reply.unwrap().send(status);
                continue;
            }
            if let Some(ArbiterRequest::Disconnect) = request {
                let status = self.handle_disconnect();
                self.movement_complete.notify_waiters();
                let _ = reply.unwrap().send(status);
                continue;
            }

            let previous_azimuth_status = self.state.blocking_read().azimuth_status;
            self.refresh_status();
            let just_finished_homing = previous_azimuth_status == AzimuthStatus::Homing
                && self.state.blocking_read().azimuth_status == AzimuthStatus::Idle;

            if self.heartbeat_just_expired() {
                self.fire_heartbeat_expiry();
            } else if just_finished_homing {
                self.fire_post_home_park();
            } else if request.is_none() {
                self.maybe_correct_tracking();
            }

            if let Some(request) = request {
                let status = self.dispatch(request);
                self.refresh_status();
                self.movement_complete.notify_waiters();
                if let Some(reply) = reply {
                    let _ = reply.send(status);
                }
            }
        }
    }

    fn next_poll_delay(&self) -> Duration {
        let state = self.state.blocking_read();
        let base = if matches!(
            state.azimuth_status,
            AzimuthStatus::Moving | AzimuthStatus::Homing
        ) || matches!(
            state.shutter_status,
            ShutterStatus::Opening | ShutterStatus::Closing
        ) {
            Duration::from_secs(self.config.moving_loop_delay_secs)
        } else {
            Duration::from_secs(self.config.idle_loop_delay_secs)
        };

        let Some(expires_at) = state.heartbeat_expires_at else {
            return base.max(Duration::from_millis(1));
        };
        // The poll period is clipped to 1s only when the heartbeat would
        // otherwise expire before the next regular tick -- not
        // unconditionally while a heartbeat is active.
        let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if until_expiry < base {
            base.min(Duration::from_secs(1)).max(Duration::from_millis(1))
        } else {
            base.max(Duration::from_millis(1))
        }
    }

    // --- connection lifecycle -------------------------------------------------

    fn handle_connect(&mut self) -> CommandStatus {
        if self.motor.is_some() {
            return CommandStatus::NotDisconnected;
        }

        let transport = match SerialPortTransport::open(
            &self.config.serial_port,
            self.config.serial_baud,
            Duration::from_millis(self.config.serial_timeout_millis),
        ) {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "failed to open serial port");
                return CommandStatus::Failed;
            }
        };

        let link = match SerialLink::open(Box::new(transport)) {
            Ok(l) => l.with_retries(self.config.serial_retries),
            Err(e) => {
                error!(error = %e, "failed to initialise serial link");
                return CommandStatus::Failed;
            }
        };

        self.motor = Some(MotorLink::new(link));

        let mut state = self.state.blocking_write();
        state.connected = true;
        state.azimuth_status = AzimuthStatus::NotHomed;
        state.shutter_status = ShutterStatus::Disconnected;
        state.heartbeat_status = HeartbeatStatus::Disabled;
        state.heartbeat_expires_at = None;
        state.engineering_mode = false;
        state.follow_telescope = true;
        state.tracking_coord = None;
        state.last_error = None;
        state.state_timestamp = Utc::now();
        CommandStatus::Succeeded
    }

    fn handle_disconnect(&mut self) -> CommandStatus {
        if self.motor.is_none() {
            return CommandStatus::NotConnected;
        }
        self.motor = None;
        let mut state = self.state.blocking_write();
        *state = DomeState::disconnected(Utc::now());
        CommandStatus::Succeeded
    }

    /// Tears the serial link down and restores the invariant that an empty
    /// serial handle implies `Disconnected` azimuth/shutter status.
    /// Everything else in `DomeState` is reset along with it, since a fatal
    /// motor I/O error leaves no part of the old state trustworthy.
    fn teardown_on_fatal_error(&mut self, context: &'static str, error: impl std::fmt::Display) {
        error!(context, %error, "fatal motor I/O error, tearing down serial link");
        self.motor = None;
        let message = error.to_string();
        let mut state = self.state.blocking_write();
        *state = DomeState::disconnected(Utc::now());
        state.last_error = Some(message);
    }

    // --- status refresh --------------------------------------------------------

    /// Polls the motor controller and reconciles `DomeState` with what it
    /// reports. Tears the link down on any I/O error.
    fn refresh_status(&mut self) {
        let previous_azimuth_status = self.state.blocking_read().azimuth_status;

        let Some(motor) = self.motor.as_mut() else {
            return;
        };

        let polled = (
            motor.shutter_is_moving(),
            motor.shutter_velocity(),
            motor.shutter_limits(),
            motor.azimuth_is_moving(),
            motor.azimuth_position_steps(),
        );
        let (shutter_moving, shutter_velocity, shutter_limits, azimuth_moving, azimuth_steps) =
            match polled {
                (Ok(a), Ok(b), Ok(c), Ok(d), Ok(e)) => (a, b, c, d, e),
                (a, b, c, d, e) => {
                    let message = [
                        a.err().map(|e| e.to_string()),
                        b.err().map(|e| e.to_string()),
                        c.err().map(|e| e.to_string()),
                        d.err().map(|e| e.to_string()),
                        e.err().map(|e| e.to_string()),
                    ]
                    .into_iter()
                    .flatten()
                    .next()
                    .unwrap_or_default();
                    self.teardown_on_fatal_error("status refresh", message);
                    return;
                }
            };

        let just_finished_homing = previous_azimuth_status == AzimuthStatus::Homing && !azimuth_moving;
        if just_finished_homing {
            if let Some(motor) = self.motor.as_mut() {
                if let Err(e) = motor.zero_azimuth_steps() {
                    self.teardown_on_fatal_error("zero azimuth steps after home", e);
                    return;
                }
            }
        }

        let mut state = self.state.blocking_write();

        if just_finished_homing {
            state.azimuth_degrees = self.config.home_azimuth;
            state.azimuth_status = AzimuthStatus::Idle;
        } else if previous_azimuth_status == AzimuthStatus::NotHomed {
            // NotHomed only clears via the Homing -> just_finished_homing path
            // above; a motor that merely isn't moving doesn't mean it's been
            // homed.
            state.azimuth_status = AzimuthStatus::NotHomed;
        } else {
            state.azimuth_status = if azimuth_moving {
                AzimuthStatus::Moving
            } else {
                AzimuthStatus::Idle
            };
            if !azimuth_moving {
                state.azimuth_degrees = target_absolute_from_steps(
                    azimuth_steps,
                    self.config.home_azimuth,
                    self.config.steps_per_rotation,
                );
            }
        }

        state.shutter_status = if shutter_moving {
            if shutter_velocity >= 0 {
                ShutterStatus::Opening
            } else {
                ShutterStatus::Closing
            }
        } else if shutter_limits.at_closed && !shutter_limits.at_open {
            ShutterStatus::Closed
        } else if shutter_limits.at_open && !shutter_limits.at_closed {
            ShutterStatus::Open
        } else {
            ShutterStatus::PartiallyOpen
        };

        if state.shutter_status == ShutterStatus::Closed
            && state.heartbeat_status == HeartbeatStatus::TrippedClosing
        {
            state.heartbeat_status = HeartbeatStatus::TrippedIdle;
        }

        state.state_timestamp = Utc::now();
    }

    fn heartbeat_just_expired(&self) -> bool {
        let state = self.state.blocking_read();
        state.heartbeat_status == HeartbeatStatus::Active
            && state
                .heartbeat_expires_at
                .map(|deadline| Utc::now() > deadline)
                .unwrap_or(false)
    }

    fn fire_heartbeat_expiry(&mut self) {
        warn!("heartbeat expired, closing shutter");
        let status = self.execute_close_shutter();
        if status == CommandStatus::Succeeded {
            let mut state = self.state.blocking_write();
            state.heartbeat_status = HeartbeatStatus::TrippedClosing;
        }
    }

    fn fire_post_home_park(&mut self) {
        info!("home complete, parking");
        {
            let mut state = self.state.blocking_write();
            state.tracking_coord = None;
        }
        let target = self.config.park_azimuth;
        let _ = self.execute_slew_azimuth(target);
    }

    fn maybe_correct_tracking(&mut self) {
        let (tracking, current_az, idle) = {
            let state = self.state.blocking_read();
            (
                state.tracking_coord,
                state.azimuth_degrees,
                state.azimuth_status == AzimuthStatus::Idle,
            )
        };
        let Some(tracking) = tracking else { return };
        if !idle {
            return;
        }

        let now = Utc::now();
        let (alt_now, az_now) = self.frame.radec_to_altaz(tracking.ra_deg, tracking.dec_deg, now);
        let target_az_now = dome_azimuth_for_altaz(
            alt_now,
            az_now,
            self.config.dome_radius_cm,
            self.config.telescope_offset_x_cm,
        );

        let delta = shortest_delta(current_az, target_az_now);
        if delta.abs() <= self.config.tracking_max_separation {
            return;
        }

        let later = now + ChronoDuration::seconds(60);
        let (alt_later, az_later) = self.frame.radec_to_altaz(tracking.ra_deg, tracking.dec_deg, later);
        let target_az_later = dome_azimuth_for_altaz(
            alt_later,
            az_later,
            self.config.dome_radius_cm,
            self.config.telescope_offset_x_cm,
        );
        let sign = shortest_delta(target_az_now, target_az_later).signum();

        let leading_target = target_az_now + sign * self.config.tracking_max_separation;
        let _ = self.execute_slew_azimuth(leading_target);
    }

    // --- dispatch ---------------------------------------------------------------

    fn dispatch(&mut self, request: ArbiterRequest) -> CommandStatus {
        if let Some(rejection) = self.check_rejection(&request) {
            return rejection;
        }

        match request {
            ArbiterRequest::Connect | ArbiterRequest::Disconnect => unreachable!("handled earlier"),
            ArbiterRequest::OpenShutter { .. } => self.execute_open_shutter(),
            ArbiterRequest::CloseShutter { .. } => self.execute_close_shutter(),
            ArbiterRequest::StopShutter => self.execute_stop_shutter(),
            ArbiterRequest::StopAzimuth => self.execute_stop_azimuth(),
            ArbiterRequest::HomeAzimuth => self.execute_home_azimuth(),
            ArbiterRequest::SlewAzimuth { target_deg } => {
                let mut state = self.state.blocking_write();
                state.tracking_coord = None;
                drop(state);
                self.execute_slew_azimuth(target_deg)
            }
            ArbiterRequest::TrackRadec { ra_deg, dec_deg } => {
                {
                    let mut state = self.state.blocking_write();
                    state.tracking_coord = Some(TrackingCoord { ra_deg, dec_deg });
                }
                let target = self.radec_to_dome_azimuth(ra_deg, dec_deg, Utc::now());
                self.execute_slew_azimuth(target)
            }
            ArbiterRequest::SlewRadec { ra_deg, dec_deg } => {
                let target = self.radec_to_dome_azimuth(ra_deg, dec_deg, Utc::now());
                self.execute_slew_azimuth(target)
            }
            ArbiterRequest::SlewAltaz { alt_deg, az_deg } => {
                let target = dome_azimuth_for_altaz(
                    alt_deg,
                    az_deg,
                    self.config.dome_radius_cm,
                    self.config.telescope_offset_x_cm,
                );
                self.execute_slew_azimuth(target)
            }
            ArbiterRequest::SetHeartbeatTimer { seconds } => self.execute_set_heartbeat(seconds),
            ArbiterRequest::SetEngineeringMode(enable) => self.execute_set_engineering(enable),
            ArbiterRequest::SetFollowMode(enable) => {
                let mut state = self.state.blocking_write();
                state.follow_telescope = enable;
                CommandStatus::Succeeded
            }
        }
    }

    fn check_rejection(&self, request: &ArbiterRequest) -> Option<CommandStatus> {
        let state = self.state.blocking_read();

        if !state.connected {
            return Some(CommandStatus::NotConnected);
        }

        let is_engineering_request = matches!(request, ArbiterRequest::SetEngineeringMode(_));
        if !is_engineering_request && state.engineering_mode {
            return Some(CommandStatus::EngineeringModeActive);
        }

        let is_shutter_interlock_request = matches!(
            request,
            ArbiterRequest::OpenShutter { .. }
                | ArbiterRequest::CloseShutter { .. }
                | ArbiterRequest::SetEngineeringMode(_)
        );
        if is_shutter_interlock_request {
            match state.heartbeat_status {
                HeartbeatStatus::TrippedClosing => return Some(CommandStatus::HeartbeatCloseInProgress),
                HeartbeatStatus::TrippedIdle => return Some(CommandStatus::HeartbeatTimedOut),
                _ => {}
            }
        }

        match request {
            ArbiterRequest::OpenShutter { override_flag } => {
                if !override_flag && state.shutter_status == ShutterStatus::Opening {
                    return Some(CommandStatus::Blocked);
                }
            }
            ArbiterRequest::CloseShutter { override_flag } => {
                if !override_flag && state.shutter_status == ShutterStatus::Closing {
                    return Some(CommandStatus::Blocked);
                }
            }
            _ => {}
        }

        let is_azimuth_motion_request = matches!(
            request,
            ArbiterRequest::HomeAzimuth
                | ArbiterRequest::SlewAzimuth { .. }
                | ArbiterRequest::TrackRadec { .. }
                | ArbiterRequest::SlewRadec { .. }
                | ArbiterRequest::SlewAltaz { .. }
                | ArbiterRequest::SetEngineeringMode(_)
        );
        if is_azimuth_motion_request
            && matches!(
                state.azimuth_status,
                AzimuthStatus::Moving | AzimuthStatus::Homing
            )
        {
            return Some(CommandStatus::Blocked);
        }

        let is_slew_request = matches!(
            request,
            ArbiterRequest::SlewAzimuth { .. }
                | ArbiterRequest::TrackRadec { .. }
                | ArbiterRequest::SlewRadec { .. }
                | ArbiterRequest::SlewAltaz { .. }
        );
        if is_slew_request && state.azimuth_status == AzimuthStatus::NotHomed {
            return Some(CommandStatus::NotHomed);
        }

        if let ArbiterRequest::SetHeartbeatTimer { seconds } = request {
            if *seconds < 0 || *seconds >= 180 {
                return Some(CommandStatus::HeartbeatInvalidTimeout);
            }
        }

        if let ArbiterRequest::SetEngineeringMode(true) = request {
            if state.heartbeat_status != HeartbeatStatus::Disabled {
                return Some(CommandStatus::EngineeringModeRequiresHeartbeatDisabled);
            }
        }

        // `FollowModeActive` is decided by the caller-facing layer:
        // control-caller motion commands are refused while `follow_telescope`
        // is set, but the same requests are also how telescope-caller
        // notifications drive the dome, so the arbiter itself stays agnostic
        // to which role issued the request.
        None
    }

    // --- command execution -------------------------------------------------------

    fn execute_open_shutter(&mut self) -> CommandStatus {
        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.move_shutter_relative(100_000_000) {
            Ok(()) => {
                let mut state = self.state.blocking_write();
                state.shutter_status = ShutterStatus::Opening;
                CommandStatus::Succeeded
            }
            Err(e) => {
                self.teardown_on_fatal_error("open shutter", e);
                CommandStatus::Failed
            }
        }
    }

    /// The heartbeat-expiry transition to `TrippedClosing` is applied by the
    /// caller once this returns `Succeeded`.
    fn execute_close_shutter(&mut self) -> CommandStatus {
        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.move_shutter_relative(-100_000_000) {
            Ok(()) => {
                let mut state = self.state.blocking_write();
                state.shutter_status = ShutterStatus::Closing;
                CommandStatus::Succeeded
            }
            Err(e) => {
                self.teardown_on_fatal_error("close shutter", e);
                CommandStatus::Failed
            }
        }
    }

    fn execute_stop_shutter(&mut self) -> CommandStatus {
        if self.state.blocking_read().heartbeat_status == HeartbeatStatus::TrippedClosing {
            return CommandStatus::HeartbeatCloseInProgress;
        }
        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.stop_shutter() {
            Ok(()) => CommandStatus::Succeeded,
            Err(e) => {
                self.teardown_on_fatal_error("stop shutter", e);
                CommandStatus::Failed
            }
        }
    }

    fn execute_stop_azimuth(&mut self) -> CommandStatus {
        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.stop_azimuth() {
            Ok(()) => CommandStatus::Succeeded,
            Err(e) => {
                self.teardown_on_fatal_error("stop azimuth", e);
                CommandStatus::Failed
            }
        }
    }

    fn execute_home_azimuth(&mut self) -> CommandStatus {
        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.home_azimuth() {
            Ok(()) => {
                let mut state = self.state.blocking_write();
                state.azimuth_status = AzimuthStatus::Homing;
                CommandStatus::Succeeded
            }
            Err(e) => {
                self.teardown_on_fatal_error("home azimuth", e);
                CommandStatus::Failed
            }
        }
    }

    fn execute_slew_azimuth(&mut self, target_deg: Degrees) -> CommandStatus {
        let current = self.state.blocking_read().azimuth_degrees;
        let unwrapped_target = unwrap_target(current, target_deg);
        let steps = target_to_steps(unwrapped_target, self.config.home_azimuth, self.config.steps_per_rotation);

        let Some(motor) = self.motor.as_mut() else {
            return CommandStatus::NotConnected;
        };
        match motor.move_azimuth_absolute(steps) {
            Ok(()) => {
                let mut state = self.state.blocking_write();
                state.azimuth_status = AzimuthStatus::Moving;
                CommandStatus::Succeeded
            }
            Err(e) => {
                self.teardown_on_fatal_error("slew azimuth", e);
                CommandStatus::Failed
            }
        }
    }

    fn execute_set_heartbeat(&mut self, seconds: i64) -> CommandStatus {
        let mut state = self.state.blocking_write();
        if seconds == 0 {
            state.heartbeat_status = HeartbeatStatus::Disabled;
            state.heartbeat_expires_at = None;
        } else {
            state.heartbeat_status = HeartbeatStatus::Active;
            state.heartbeat_expires_at = Some(Utc::now() + ChronoDuration::seconds(seconds));
        }
        CommandStatus::Succeeded
    }

    fn execute_set_engineering(&mut self, enable: bool) -> CommandStatus {
        let mut state = self.state.blocking_write();
        state.engineering_mode = enable;
        if enable {
            // A tracked coordinate and engineering mode can't coexist; entering
            // engineering mode cancels tracking the same way homing does.
            state.tracking_coord = None;
        }
        CommandStatus::Succeeded
    }

    fn radec_to_dome_azimuth(&self, ra_deg: Degrees, dec_deg: Degrees, time: DateTime<Utc>) -> Degrees {
        let (alt, az) = self.frame.radec_to_altaz(ra_deg, dec_deg, time);
        dome_azimuth_for_altaz(alt, az, self.config.dome_radius_cm, self.config.telescope_offset_x_cm)
    }
}

fn target_absolute_from_steps(steps: i64, home_azimuth: Degrees, steps_per_rotation: i64) -> Degrees {
    home_azimuth + (steps as f64) / (steps_per_rotation as f64) * 360.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::FakeTransport;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_state() -> Arc<RwLock<DomeState>> {
        Arc::new(RwLock::new(DomeState::disconnected(Utc::now())))
    }

    fn connected_arbiter(config: Config) -> (Arbiter, Arc<RwLock<DomeState>>, Arc<Notify>) {
        let state = test_state();
        let movement_complete = Arc::new(Notify::new());
        let mut arbiter = Arbiter::new(config.clone(), state.clone(), movement_complete.clone());
        arbiter.motor = Some(MotorLink::new(SerialLink::for_test(Box::new(FakeTransport::new()))));
        {
            let mut s = state.blocking_write();
            s.connected = true;
            s.azimuth_status = AzimuthStatus::Idle;
            s.shutter_status = ShutterStatus::Closed;
        }
        (arbiter, state, movement_complete)
    }

    #[test]
    fn heartbeat_rejects_shutter_open_when_tripped_closing() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().heartbeat_status = HeartbeatStatus::TrippedClosing;
        let rejection = arbiter.check_rejection(&ArbiterRequest::OpenShutter { override_flag: false });
        assert_eq!(rejection, Some(CommandStatus::HeartbeatCloseInProgress));
    }

    #[test]
    fn heartbeat_timed_out_rejects_close_shutter() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().heartbeat_status = HeartbeatStatus::TrippedIdle;
        let rejection = arbiter.check_rejection(&ArbiterRequest::CloseShutter { override_flag: false });
        assert_eq!(rejection, Some(CommandStatus::HeartbeatTimedOut));
    }

    #[test]
    fn engineering_mode_blocks_non_engineering_requests() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().engineering_mode = true;
        let rejection = arbiter.check_rejection(&ArbiterRequest::StopAzimuth);
        assert_eq!(rejection, Some(CommandStatus::EngineeringModeActive));
    }

    #[test]
    fn engineering_mode_requires_heartbeat_disabled() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().heartbeat_status = HeartbeatStatus::Active;
        let rejection = arbiter.check_rejection(&ArbiterRequest::SetEngineeringMode(true));
        assert_eq!(rejection, Some(CommandStatus::EngineeringModeRequiresHeartbeatDisabled));
    }

    #[test]
    fn slew_while_not_homed_is_rejected() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().azimuth_status = AzimuthStatus::NotHomed;
        let rejection = arbiter.check_rejection(&ArbiterRequest::SlewAzimuth { target_deg: 90. });
        assert_eq!(rejection, Some(CommandStatus::NotHomed));
    }

    #[test]
    fn motion_blocked_while_azimuth_already_moving() {
        let (arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().azimuth_status = AzimuthStatus::Moving;
        let rejection = arbiter.check_rejection(&ArbiterRequest::HomeAzimuth);
        assert_eq!(rejection, Some(CommandStatus::Blocked));
    }

    #[test]
    fn heartbeat_timer_out_of_range_is_rejected() {
        let (arbiter, _state, _notify) = connected_arbiter(Config::default());
        let rejection = arbiter.check_rejection(&ArbiterRequest::SetHeartbeatTimer { seconds: 180 });
        assert_eq!(rejection, Some(CommandStatus::HeartbeatInvalidTimeout));

        let rejection = arbiter.check_rejection(&ArbiterRequest::SetHeartbeatTimer { seconds: 179 });
        assert_eq!(rejection, None);
    }

    #[test]
    fn disconnected_rejects_everything_but_surfaces_not_connected() {
        let state = test_state();
        let movement_complete = Arc::new(Notify::new());
        let arbiter = Arbiter::new(Config::default(), state.clone(), movement_complete);
        let rejection = arbiter.check_rejection(&ArbiterRequest::StopAzimuth);
        assert_eq!(rejection, Some(CommandStatus::NotConnected));
    }

    #[test]
    fn set_heartbeat_timer_zero_disables_and_clears_deadline() {
        let (mut arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().heartbeat_status = HeartbeatStatus::Active;
        state.blocking_write().heartbeat_expires_at = Some(Utc::now() + ChronoDuration::seconds(30));
        let status = arbiter.execute_set_heartbeat(0);
        assert_eq!(status, CommandStatus::Succeeded);
        let s = state.blocking_read();
        assert_eq!(s.heartbeat_status, HeartbeatStatus::Disabled);
        assert!(s.heartbeat_expires_at.is_none());
    }

    #[test]
    fn maybe_correct_tracking_noop_when_within_threshold() {
        let mut config = Config::default();
        config.tracking_max_separation = 180.0; // unreachable separation
        let (mut arbiter, state, _notify) = connected_arbiter(config);
        state.blocking_write().tracking_coord = Some(TrackingCoord {
            ra_deg: 10.0,
            dec_deg: 20.0,
        });
        arbiter.maybe_correct_tracking();
        // azimuth_status remains Idle: no slew was dispatched.
        assert_eq!(state.blocking_read().azimuth_status, AzimuthStatus::Idle);
    }

    #[test]
    fn poll_delay_uses_idle_period_when_heartbeat_expiry_is_far_off() {
        let mut config = Config::default();
        config.idle_loop_delay_secs = 5;
        let (arbiter, state, _notify) = connected_arbiter(config);
        state.blocking_write().heartbeat_status = HeartbeatStatus::Active;
        state.blocking_write().heartbeat_expires_at = Some(Utc::now() + ChronoDuration::seconds(120));
        assert_eq!(arbiter.next_poll_delay(), Duration::from_secs(5));
    }

    #[test]
    fn poll_delay_clips_to_one_second_near_heartbeat_expiry() {
        let mut config = Config::default();
        config.idle_loop_delay_secs = 5;
        let (arbiter, state, _notify) = connected_arbiter(config);
        state.blocking_write().heartbeat_status = HeartbeatStatus::Active;
        state.blocking_write().heartbeat_expires_at = Some(Utc::now() + ChronoDuration::milliseconds(500));
        assert_eq!(arbiter.next_poll_delay(), Duration::from_secs(1));
    }

    #[test]
    fn refresh_status_keeps_not_homed_until_homing_completes() {
        let (mut arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().azimuth_status = AzimuthStatus::NotHomed;
        arbiter.motor = Some(MotorLink::new(SerialLink::for_test(Box::new(
            FakeTransport::new()
                .expect_ack()
                .reply_value("0") // OPR MV: shutter not moving
                .expect_ack()
                .reply_value("0") // OPR V: shutter velocity
                .expect_ack()
                .reply_value("0") // OPR IL: no limit switches set
                .expect_ack()
                .reply_value("0") // APR MV: azimuth not moving
                .expect_ack()
                .reply_value("0"), // APR P: azimuth at step 0
        ))));

        arbiter.refresh_status();

        assert_eq!(state.blocking_read().azimuth_status, AzimuthStatus::NotHomed);
    }

    #[test]
    fn engineering_mode_clears_tracking_coord() {
        let (mut arbiter, state, _notify) = connected_arbiter(Config::default());
        state.blocking_write().tracking_coord = Some(TrackingCoord {
            ra_deg: 10.0,
            dec_deg: 20.0,
        });
        let status = arbiter.execute_set_engineering(true);
        assert_eq!(status, CommandStatus::Succeeded);
        assert!(state.blocking_read().tracking_coord.is_none());
    }

    #[test]
    fn freshly_connected_state_defers_shutter_status_to_first_refresh() {
        // Mirrors the state `handle_connect` writes before any poll has run:
        // connected but not yet homed, with the shutter status left
        // Disconnected rather than guessed at as Closed.
        let mut state = DomeState::disconnected(Utc::now());
        state.connected = true;
        state.azimuth_status = AzimuthStatus::NotHomed;
        state.shutter_status = ShutterStatus::Disconnected;
        state.check_invariants();
    }

    #[test]
    fn control_ip_allowlist_is_exact() {
        let mut config = Config::default();
        config.control_ips = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))];
        assert!(config.control_ips.contains(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))));
        assert!(!config.control_ips.contains(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 11))));
    }
}
