use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_conn: u32,
    pub n_rooms: u32,
    pub n_scoped_rooms: u32,
    pub n_unscoped_rooms: u32,
    pub n_idle_rooms: u32,
    pub n_awareness_states: u32,
    pub n_total_conn: u64,
    pub n_rejected_conn: u64,
    pub n_malformed_frames: u64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
    pub generated_at: String,
}
