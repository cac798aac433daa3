//! The public async API: a plain Rust surface that a thin RPC front end
//! (out of scope here) would sit on top of.
//!
//! Caller-identity authentication itself is someone else's problem; what
//! lands here is already tagged with a [`CallerOrigin`]. This module still
//! performs the IP allow-list check against `control_ips`/`telescope_ips`
//! and returns `InvalidControlIP` on mismatch, as part of the dome's own
//! command arbitration.

use crate::arbiter::{ArbiterRequest, RequestTx};
use crate::astro_math::{CelestialFrame, Degrees, ObserverFrame};
use crate::config::Config;
use crate::geometry::dome_azimuth_for_altaz;
use crate::state::{AzimuthStatus, CommandStatus, DomeState, HeartbeatStatus, ShutterStatus};
use chrono::Utc;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOrigin {
    Control(IpAddr),
    Telescope(IpAddr),
}

impl CallerOrigin {
    fn ip(self) -> IpAddr {
        match self {
            CallerOrigin::Control(ip) | CallerOrigin::Telescope(ip) => ip,
        }
    }
}

/// Status snapshot returned by [`DomeHandle::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub timestamp: String,
    pub connected: bool,
    pub azimuth_status: AzimuthStatus,
    pub azimuth_status_label: String,
    pub shutter: ShutterStatus,
    pub shutter_label: String,
    pub engineering_mode: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub azimuth: Option<Degrees>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_telescope: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_status: Option<HeartbeatStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_status_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_ra: Option<Degrees>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_dec: Option<Degrees>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_azimuth: Option<Degrees>,
}

/// Each status enum is C-like, so `Debug` already gives the bare variant
/// name used as the "_label" string in status responses.
fn label(status: impl std::fmt::Debug) -> String {
    format!("{status:?}")
}

/// The handle every caller (control or telescope) goes through. Cheaply
/// cloneable: cloning shares the same arbiter channel, state lock and
/// movement-complete condition.
#[derive(Clone)]
pub struct DomeHandle {
    config: Arc<Config>,
    frame: ObserverFrame,
    requests: RequestTx,
    state: Arc<RwLock<DomeState>>,
    movement_complete: Arc<Notify>,
}

impl DomeHandle {
    pub fn new(
        config: Arc<Config>,
        requests: RequestTx,
        state: Arc<RwLock<DomeState>>,
        movement_complete: Arc<Notify>,
    ) -> Self {
        let frame = ObserverFrame {
            latitude: config.latitude,
            longitude: config.longitude,
        };
        Self {
            config,
            frame,
            requests,
            state,
            movement_complete,
        }
    }

    fn check_control(&self, origin: CallerOrigin) -> Result<(), CommandStatus> {
        match origin {
            CallerOrigin::Control(ip) if self.config.control_ips.contains(&ip) => Ok(()),
            _ => Err(CommandStatus::InvalidControlIP),
        }
    }

    fn check_telescope(&self, origin: CallerOrigin) -> Result<(), CommandStatus> {
        match origin {
            CallerOrigin::Telescope(ip) if self.config.telescope_ips.contains(&ip) => Ok(()),
            _ => Err(CommandStatus::InvalidControlIP),
        }
    }

    async fn submit(&self, request: ArbiterRequest) -> CommandStatus {
        let (tx, rx) = oneshot::channel();
        if self.requests.send((request, tx)).is_err() {
            return CommandStatus::NotConnected;
        }
        rx.await.unwrap_or(CommandStatus::Failed)
    }

    /// Waits, rechecking every second or on a movement-complete
    /// notification, until `predicate` holds or `timeout` elapses. Returns
    /// `Failed` on timeout or if the dome disconnects mid-wait.
    async fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&DomeState) -> bool,
    ) -> CommandStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = self.state.read().await;
                if !state.connected {
                    return CommandStatus::Failed;
                }
                if predicate(&state) {
                    return CommandStatus::Succeeded;
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return CommandStatus::Failed;
            }
            let slice = (deadline - now).min(Duration::from_secs(1));
            let _ = tokio::time::timeout(slice, self.movement_complete.notified()).await;
        }
    }

    fn azimuth_timeout(&self) -> Duration {
        Duration::from_secs(self.config.azimuth_move_timeout_secs)
            + Duration::from_secs(self.config.moving_loop_delay_secs.max(1))
    }

    fn shutter_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutter_move_timeout_secs)
            + Duration::from_secs(self.config.moving_loop_delay_secs.max(1))
    }

    // --- control-caller operations ------------------------------------------------

    pub async fn initialize(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::Connect).await
    }

    pub async fn shutdown(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::Disconnect).await
    }

    pub async fn open_shutter(&self, origin: CallerOrigin, blocking: bool, override_flag: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        let status = self.submit(ArbiterRequest::OpenShutter { override_flag }).await;
        if status != CommandStatus::Succeeded || !blocking {
            return status;
        }
        let wait = self
            .wait_for(self.shutter_timeout(), |s| s.shutter_status != ShutterStatus::Opening)
            .await;
        if wait != CommandStatus::Succeeded {
            return wait;
        }
        if self.state.read().await.shutter_status == ShutterStatus::Open {
            CommandStatus::Succeeded
        } else {
            CommandStatus::Failed
        }
    }

    pub async fn close_shutter(&self, origin: CallerOrigin, blocking: bool, override_flag: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        let status = self.submit(ArbiterRequest::CloseShutter { override_flag }).await;
        if status != CommandStatus::Succeeded || !blocking {
            return status;
        }
        let wait = self
            .wait_for(self.shutter_timeout(), |s| s.shutter_status != ShutterStatus::Closing)
            .await;
        if wait != CommandStatus::Succeeded {
            return wait;
        }
        if self.state.read().await.shutter_status == ShutterStatus::Closed {
            CommandStatus::Succeeded
        } else {
            CommandStatus::Failed
        }
    }

    pub async fn stop_shutter(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::StopShutter).await
    }

    pub async fn stop_azimuth(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        if self.state.read().await.follow_telescope {
            return CommandStatus::FollowModeActive;
        }
        self.submit(ArbiterRequest::StopAzimuth).await
    }

    pub async fn home_azimuth(&self, origin: CallerOrigin, blocking: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        let status = self.submit(ArbiterRequest::HomeAzimuth).await;
        if status != CommandStatus::Succeeded || !blocking {
            return status;
        }
        // The arbiter chains a park slew once homing completes; a strict
        // blocking wait holds until that settles too.
        let park_azimuth = self.config.park_azimuth;
        self.wait_for(self.azimuth_timeout() * 2, |s| {
            s.azimuth_status == AzimuthStatus::Idle && (s.azimuth_degrees - park_azimuth).abs() < 1.0
        })
        .await
    }

    pub async fn park(&self, origin: CallerOrigin, blocking: bool) -> CommandStatus {
        self.slew_azimuth(origin, self.config.park_azimuth, blocking).await
    }

    pub async fn slew_azimuth(&self, origin: CallerOrigin, az_deg: Degrees, blocking: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        if self.state.read().await.follow_telescope {
            return CommandStatus::FollowModeActive;
        }
        let status = self.submit(ArbiterRequest::SlewAzimuth { target_deg: az_deg }).await;
        if status != CommandStatus::Succeeded || !blocking {
            return status;
        }
        self.wait_for(self.azimuth_timeout(), |s| s.azimuth_status == AzimuthStatus::Idle)
            .await
    }

    pub async fn track_radec(
        &self,
        origin: CallerOrigin,
        ra_deg: Degrees,
        dec_deg: Degrees,
        blocking: bool,
    ) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        if self.state.read().await.follow_telescope {
            return CommandStatus::FollowModeActive;
        }
        let status = self.submit(ArbiterRequest::TrackRadec { ra_deg, dec_deg }).await;
        if status != CommandStatus::Succeeded || !blocking {
            return status;
        }
        self.wait_for(self.azimuth_timeout(), |s| s.azimuth_status == AzimuthStatus::Idle)
            .await
    }

    pub async fn set_follow_mode(&self, origin: CallerOrigin, enable: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::SetFollowMode(enable)).await
    }

    pub async fn set_engineering_mode(&self, origin: CallerOrigin, enable: bool) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::SetEngineeringMode(enable)).await
    }

    pub async fn set_heartbeat_timer(&self, origin: CallerOrigin, seconds: i64) -> CommandStatus {
        if let Err(e) = self.check_control(origin) {
            return e;
        }
        self.submit(ArbiterRequest::SetHeartbeatTimer { seconds }).await
    }

    pub async fn ping(&self) -> CommandStatus {
        CommandStatus::Succeeded
    }

    pub async fn status(&self) -> StatusSnapshot {
        let state = self.state.read().await;
        let timestamp = state.state_timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        if !state.connected {
            return StatusSnapshot {
                timestamp,
                connected: false,
                azimuth_status: state.azimuth_status,
                azimuth_status_label: label(state.azimuth_status),
                shutter: state.shutter_status,
                shutter_label: label(state.shutter_status),
                engineering_mode: state.engineering_mode,
                azimuth: None,
                follow_telescope: None,
                closed: None,
                heartbeat_status: None,
                heartbeat_status_label: None,
                heartbeat_remaining: None,
                tracking_ra: None,
                tracking_dec: None,
                tracking_azimuth: None,
            };
        }

        let heartbeat_remaining = state.heartbeat_expires_at.and_then(|deadline| {
            if state.heartbeat_status == HeartbeatStatus::Active {
                Some((deadline - Utc::now()).num_seconds().max(0))
            } else {
                None
            }
        });

        let tracking_azimuth = state.tracking_coord.map(|coord| {
            let (alt, az) = self.frame.radec_to_altaz(coord.ra_deg, coord.dec_deg, Utc::now());
            dome_azimuth_for_altaz(alt, az, self.config.dome_radius_cm, self.config.telescope_offset_x_cm)
        });

        StatusSnapshot {
            timestamp,
            connected: true,
            azimuth_status: state.azimuth_status,
            azimuth_status_label: label(state.azimuth_status),
            shutter: state.shutter_status,
            shutter_label: label(state.shutter_status),
            engineering_mode: state.engineering_mode,
            azimuth: Some(crate::astro_math::wrap_degrees(state.azimuth_degrees)),
            follow_telescope: Some(state.follow_telescope),
            closed: Some(state.shutter_status == ShutterStatus::Closed),
            heartbeat_status: Some(state.heartbeat_status),
            heartbeat_status_label: Some(label(state.heartbeat_status)),
            heartbeat_remaining,
            tracking_ra: state.tracking_coord.map(|c| c.ra_deg),
            tracking_dec: state.tracking_coord.map(|c| c.dec_deg),
            tracking_azimuth,
        }
    }

    // --- telescope-caller operations (no-ops unless follow_telescope) ------------

    pub async fn notify_telescope_radec(
        &self,
        origin: CallerOrigin,
        ra_deg: Degrees,
        dec_deg: Degrees,
        tracking: bool,
    ) -> CommandStatus {
        if let Err(e) = self.check_telescope(origin) {
            return e;
        }
        if !self.state.read().await.follow_telescope {
            return CommandStatus::Succeeded;
        }
        if tracking {
            self.submit(ArbiterRequest::TrackRadec { ra_deg, dec_deg }).await
        } else {
            self.submit(ArbiterRequest::SlewRadec { ra_deg, dec_deg }).await
        }
    }

    pub async fn notify_telescope_altaz(&self, origin: CallerOrigin, alt_deg: Degrees, az_deg: Degrees) -> CommandStatus {
        if let Err(e) = self.check_telescope(origin) {
            return e;
        }
        if !self.state.read().await.follow_telescope {
            return CommandStatus::Succeeded;
        }
        self.submit(ArbiterRequest::SlewAltaz { alt_deg, az_deg }).await
    }

    pub async fn notify_telescope_stopped(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_telescope(origin) {
            return e;
        }
        if !self.state.read().await.follow_telescope {
            return CommandStatus::Succeeded;
        }
        self.submit(ArbiterRequest::StopAzimuth).await
    }

    pub async fn notify_telescope_parked(&self, origin: CallerOrigin) -> CommandStatus {
        if let Err(e) = self.check_telescope(origin) {
            return e;
        }
        if !self.state.read().await.follow_telescope {
            return CommandStatus::Succeeded;
        }
        self.submit(ArbiterRequest::SlewAzimuth {
            target_deg: self.config.park_azimuth,
        })
        .await
    }
}

impl std::fmt::Debug for DomeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomeHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::Arbiter;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.control_ips = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
        config.telescope_ips = vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))];
        config
    }

    fn spawn_handle(config: Config) -> DomeHandle {
        let config = Arc::new(config);
        let state = Arc::new(RwLock::new(DomeState::disconnected(Utc::now())));
        let movement_complete = Arc::new(Notify::new());
        let arbiter = Arbiter::new((*config).clone(), state.clone(), movement_complete.clone());
        let requests = arbiter.spawn();
        DomeHandle::new(config, requests, state, movement_complete)
    }

    #[tokio::test]
    async fn unauthorised_caller_is_rejected() {
        let handle = spawn_handle(test_config());
        let bad = CallerOrigin::Control(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
        assert_eq!(handle.initialize(bad).await, CommandStatus::InvalidControlIP);
    }

    #[tokio::test]
    async fn ping_and_status_need_no_authority() {
        let handle = spawn_handle(test_config());
        assert_eq!(handle.ping().await, CommandStatus::Succeeded);
        let snapshot = handle.status().await;
        assert!(!snapshot.connected);
    }

    #[tokio::test]
    async fn disconnected_status_omits_domain_fields() {
        let handle = spawn_handle(test_config());
        let snapshot = handle.status().await;
        assert!(snapshot.azimuth.is_none());
        assert!(snapshot.heartbeat_status.is_none());
    }
}
