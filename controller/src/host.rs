use std::{
    collections::HashMap,
    fs::File,
    net::SocketAddr,
    num::IntErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Local};
use heihei_common::{
    decode_clock, next_occurrence, sunset, ClockTime, Configuration, Location, PlugCode,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::{
    alarm::Alarm,
    encoder::Encoder,
    logging,
    notify::{schedule_notification, watch_notification},
    pins::EncoderPins,
    plug::Plug,
};

const CONFIG_FILENAME: &str = "configuration.json";
const ALARM_ACCURACY: Duration = Duration::from_secs(60);
const DEFAULT_HTTP_PORT: u16 = 8000;
/// Longest timed light request accepted: one week.
const MAX_TIMED_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
struct AppState {
    config: Arc<Configuration>,
    light: Plug,
    alarm: Alarm,
    files: Arc<Files>,
    shutdown: watch::Receiver<bool>,
}

struct Files {
    config: PathBuf,
    log: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct AboutView {
    version: &'static str,
    location: Location,
    #[serde(rename = "lightsOut")]
    lights_out: ClockTime,
    plug: PlugCode,
    light: bool,
    alarm: bool,
    #[serde(rename = "buildType")]
    build_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SunsetView {
    when: &'static str,
    date: String,
    sunset: String,
    #[serde(rename = "sunsetEpoch")]
    sunset_epoch: i64,
}

pub async fn run() -> anyhow::Result<()> {
    let exe_dir = executable_dir()?;
    let config_path = std::env::var("HEIHEI_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| exe_dir.join(CONFIG_FILENAME));
    let config = load_configuration(&config_path)?;

    let log_path = logging::init(&config, &exe_dir);
    info!("***************");
    info!("starting heihei {}", env!("CARGO_PKG_VERSION"));

    let (stop, shutdown) = watch::channel(false);

    let pins = EncoderPins::from_config(&config.gpio)
        .await
        .context("failed to open encoder pins")?;
    let encoder = Encoder::new(pins)
        .await
        .context("failed to initialise encoder")?;
    let light = Plug::spawn(config.light, Arc::new(encoder), shutdown.clone()).await;
    let alarm = Alarm::spawn(ALARM_ACCURACY, shutdown.clone());

    let app = router(AppState {
        config: Arc::new(config),
        light,
        alarm,
        files: Arc::new(Files {
            config: config_path,
            log: log_path,
        }),
        shutdown,
    });

    let port = std::env::var("HEIHEI_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http server at {addr}"))?;

    info!("heihei listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop.send(true);
    info!("heihei stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/about", get(handle_about))
        .route("/light", get(handle_light))
        .route("/alarm", get(handle_alarm))
        .route("/sunset", get(handle_sunset))
        .route("/notify", get(handle_notify))
        .route("/logfile", get(handle_logfile))
        .route("/config", get(handle_config))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

fn executable_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn load_configuration(path: &Path) -> anyhow::Result<Configuration> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Configuration::from_reader(file)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn handle_about(State(state): State<AppState>) -> impl IntoResponse {
    let light = match state.light.state().await {
        Ok(on) => on,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    };
    let alarm = match state.alarm.is_set().await {
        Ok(armed) => armed,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    };

    Json(AboutView {
        version: env!("CARGO_PKG_VERSION"),
        location: state.config.location,
        lights_out: state.config.lights_out,
        plug: state.light.code(),
        light,
        alarm,
        build_type: state.config.gpio.backend.as_str(),
    })
    .into_response()
}

async fn handle_light(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(mode) = params.get("mode") else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Missing 'mode' value");
    };
    let on = match mode.as_str() {
        "on" => true,
        "off" => false,
        other => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                &format!("Unknown 'mode' value '{other}'"),
            )
        }
    };
    let label = if on { "on" } else { "off" };

    let duration = match requested_duration(&params) {
        Ok(duration) => duration,
        Err(secs) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                &format!("'secs' value '{secs}' is out of range (max {MAX_TIMED_SECS})"),
            )
        }
    };
    let (result, message) = if duration.is_zero() {
        (state.light.set(on).await, label.to_string())
    } else {
        (
            state.light.set_for_duration(on, duration).await,
            format!("{label} for {}s", duration.as_secs()),
        )
    };

    if let Err(err) = result {
        warn!("light request failed: {err}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
    Json(MessageBody { message }).into_response()
}

async fn handle_alarm(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("set") else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Missing 'set' value");
    };
    let (on, message) = match value.as_str() {
        "on" => (true, "Alarm set"),
        "off" => (false, "Alarm unset"),
        other => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                &format!("Unknown 'set' value '{other}'"),
            )
        }
    };

    if let Err(err) = state.alarm.set(on).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
    Json(MessageBody {
        message: message.to_string(),
    })
    .into_response()
}

async fn handle_notify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("time") else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Missing 'time' value");
    };
    let Ok((hour, minute)) = decode_clock(value) else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Invalid 'time' value");
    };

    let notification = next_occurrence(&Local::now(), hour, minute)
        .map_err(anyhow::Error::from)
        .and_then(|target| schedule_notification(&target).map_err(anyhow::Error::from));
    let notification = match notification {
        Ok(notification) => notification,
        Err(err) => {
            warn!("notification error: {err:#}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Notification error");
        }
    };

    let target = notification.target();
    info!(%target, "notification set");
    tokio::spawn(watch_notification(notification, state.shutdown.clone()));

    Json(MessageBody {
        message: format!("Notification set for {}", target.format("%Y-%m-%d %H:%M")),
    })
    .into_response()
}

async fn handle_sunset(State(state): State<AppState>) -> impl IntoResponse {
    let (latitude, longitude) = state.config.lat_long();
    let mut sunsets = Vec::with_capacity(3);

    for (when, offset) in [("yesterday", -1), ("today", 0), ("tomorrow", 1)] {
        match sunset(latitude, longitude, offset) {
            Ok(at) => sunsets.push(build_sunset_view(when, at)),
            Err(err) => {
                warn!("sunset calculation failed: {err}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
        }
    }

    Json(sunsets).into_response()
}

async fn handle_logfile(State(state): State<AppState>) -> impl IntoResponse {
    let Some(path) = state.files.log.as_deref() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Logging to stdout");
    };
    file_response(path).await
}

async fn handle_config(State(state): State<AppState>) -> impl IntoResponse {
    file_response(&state.files.config).await
}

async fn file_response(path: &Path) -> axum::response::Response {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content.into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("file at \"{}\": {err}", path.display()),
        ),
    }
}

/// Seconds requested with `secs`; anything but a non-negative integer means none.
///
/// Integers above [`MAX_TIMED_SECS`] are handed back as the error.
fn requested_duration(params: &HashMap<String, String>) -> Result<Duration, String> {
    let Some(value) = params.get("secs") else {
        return Ok(Duration::ZERO);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs <= MAX_TIMED_SECS => Ok(Duration::from_secs(secs)),
        Ok(_) => Err(value.clone()),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => Err(value.clone()),
        Err(_) => Ok(Duration::ZERO),
    }
}

fn build_sunset_view(when: &'static str, at: DateTime<Local>) -> SunsetView {
    SunsetView {
        when,
        date: at.format("%A %-d %B %Y").to_string(),
        sunset: at.format("%H:%M:%S %:z").to_string(),
        sunset_epoch: at.timestamp(),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
