use crate::{models::{DiagnosticsResponse, ErrorResponse, User}, AppState};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use chrono::Utc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::{error, info};

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Relay diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Room, connection and system figures", body = DiagnosticsResponse),
        (status = 401, description = "No valid session"),
        (status = 500, description = "System figures unavailable", body = ErrorResponse)
    )
)]
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Aggregate diagnostics from the registry
    let stats = state.registry.stats().await;
    let metrics = state.registry.metrics();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => {
                error!("System monitor lock poisoned");
                return Err(ErrorResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, "System monitor unavailable"));
            }
        }
    };

    info!(
        "Diagnostics for {}: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        user.id,
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.connections,
        stats.rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: stats.connections as u32,
            n_rooms: stats.rooms as u32,
            n_scoped_rooms: stats.scoped_rooms as u32,
            n_unscoped_rooms: stats.unscoped_rooms as u32,
            n_idle_rooms: stats.idle_rooms as u32,
            n_awareness_states: stats.awareness_states as u32,
            n_total_conn: metrics.total_connections(),
            n_rejected_conn: metrics.rejected_connections(),
            n_malformed_frames: metrics.malformed_frames(),
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
            generated_at: Utc::now().to_rfc3339(),
        }),
    ))
}
