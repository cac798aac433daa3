//! The minimal dome-specific JSON HTTP surface that exercises [`DomeHandle`]
//! end-to-end. One route per operation; no ASCOM Alpaca transaction-ID
//! envelope, client/server transaction bookkeeping, or `Action`/`Command`
//! passthrough -- that full RPC surface belongs elsewhere.

use crate::remote::{CallerOrigin, DomeHandle, StatusSnapshot};
use crate::state::CommandStatus;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
}

impl From<CommandStatus> for CommandResponse {
    fn from(status: CommandStatus) -> Self {
        Self { status }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShutterRequest {
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub r#override: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlockingRequest {
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Deserialize)]
pub struct SlewAzimuthRequest {
    pub az_deg: f64,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrackRadecRequest {
    pub ra_deg: f64,
    pub dec_deg: f64,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Deserialize)]
pub struct BoolRequest {
    pub enable: bool,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelescopeRadecRequest {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub tracking: bool,
}

#[derive(Debug, Deserialize)]
pub struct TelescopeAltazRequest {
    pub alt_deg: f64,
    pub az_deg: f64,
}

#[get("/status")]
async fn status(dome: &State<DomeHandle>) -> Json<StatusSnapshot> {
    Json(dome.status().await)
}

#[get("/ping")]
async fn ping(dome: &State<DomeHandle>) -> Json<CommandResponse> {
    Json(dome.ping().await.into())
}

#[post("/initialize")]
async fn initialize(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(dome.initialize(CallerOrigin::Control(client.ip())).await.into())
}

#[post("/shutdown")]
async fn shutdown(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(dome.shutdown(CallerOrigin::Control(client.ip())).await.into())
}

#[post("/open_shutter", data = "<body>")]
async fn open_shutter(dome: &State<DomeHandle>, client: SocketAddr, body: Json<ShutterRequest>) -> Json<CommandResponse> {
    Json(
        dome.open_shutter(CallerOrigin::Control(client.ip()), body.blocking, body.r#override)
            .await
            .into(),
    )
}

#[post("/close_shutter", data = "<body>")]
async fn close_shutter(dome: &State<DomeHandle>, client: SocketAddr, body: Json<ShutterRequest>) -> Json<CommandResponse> {
    Json(
        dome.close_shutter(CallerOrigin::Control(client.ip()), body.blocking, body.r#override)
            .await
            .into(),
    )
}

#[post("/stop_shutter")]
async fn stop_shutter(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(dome.stop_shutter(CallerOrigin::Control(client.ip())).await.into())
}

#[post("/stop_azimuth")]
async fn stop_azimuth(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(dome.stop_azimuth(CallerOrigin::Control(client.ip())).await.into())
}

#[post("/home_azimuth", data = "<body>")]
async fn home_azimuth(dome: &State<DomeHandle>, client: SocketAddr, body: Json<BlockingRequest>) -> Json<CommandResponse> {
    Json(
        dome.home_azimuth(CallerOrigin::Control(client.ip()), body.blocking)
            .await
            .into(),
    )
}

#[post("/park", data = "<body>")]
async fn park(dome: &State<DomeHandle>, client: SocketAddr, body: Json<BlockingRequest>) -> Json<CommandResponse> {
    Json(dome.park(CallerOrigin::Control(client.ip()), body.blocking).await.into())
}

#[post("/slew_azimuth", data = "<body>")]
async fn slew_azimuth(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<SlewAzimuthRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.slew_azimuth(CallerOrigin::Control(client.ip()), body.az_deg, body.blocking)
            .await
            .into(),
    )
}

#[post("/track_radec", data = "<body>")]
async fn track_radec(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<TrackRadecRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.track_radec(CallerOrigin::Control(client.ip()), body.ra_deg, body.dec_deg, body.blocking)
            .await
            .into(),
    )
}

#[post("/set_follow_mode", data = "<body>")]
async fn set_follow_mode(dome: &State<DomeHandle>, client: SocketAddr, body: Json<BoolRequest>) -> Json<CommandResponse> {
    Json(
        dome.set_follow_mode(CallerOrigin::Control(client.ip()), body.enable)
            .await
            .into(),
    )
}

#[post("/set_engineering_mode", data = "<body>")]
async fn set_engineering_mode(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<BoolRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.set_engineering_mode(CallerOrigin::Control(client.ip()), body.enable)
            .await
            .into(),
    )
}

#[post("/set_heartbeat_timer", data = "<body>")]
async fn set_heartbeat_timer(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<HeartbeatRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.set_heartbeat_timer(CallerOrigin::Control(client.ip()), body.seconds)
            .await
            .into(),
    )
}

#[post("/telescope/radec", data = "<body>")]
async fn telescope_radec(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<TelescopeRadecRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.notify_telescope_radec(
            CallerOrigin::Telescope(client.ip()),
            body.ra_deg,
            body.dec_deg,
            body.tracking,
        )
        .await
        .into(),
    )
}

#[post("/telescope/altaz", data = "<body>")]
async fn telescope_altaz(
    dome: &State<DomeHandle>,
    client: SocketAddr,
    body: Json<TelescopeAltazRequest>,
) -> Json<CommandResponse> {
    Json(
        dome.notify_telescope_altaz(CallerOrigin::Telescope(client.ip()), body.alt_deg, body.az_deg)
            .await
            .into(),
    )
}

#[post("/telescope/stopped")]
async fn telescope_stopped(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(
        dome.notify_telescope_stopped(CallerOrigin::Telescope(client.ip()))
            .await
            .into(),
    )
}

#[post("/telescope/parked")]
async fn telescope_parked(dome: &State<DomeHandle>, client: SocketAddr) -> Json<CommandResponse> {
    Json(
        dome.notify_telescope_parked(CallerOrigin::Telescope(client.ip()))
            .await
            .into(),
    )
}

pub fn build(figment: rocket::figment::Figment, dome: DomeHandle) -> Rocket<Build> {
    rocket::custom(figment).manage(dome).mount(
        "/api/v1/dome",
        routes![
            status,
            ping,
            initialize,
            shutdown,
            open_shutter,
            close_shutter,
            stop_shutter,
            stop_azimuth,
            home_azimuth,
            park,
            slew_azimuth,
            track_radec,
            set_follow_mode,
            set_engineering_mode,
            set_heartbeat_timer,
            telescope_radec,
            telescope_altaz,
            telescope_stopped,
            telescope_parked,
        ],
    )
}
