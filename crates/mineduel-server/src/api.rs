use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use mineduel_core::time;

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

/// Public game defaults, consumed by clients before creating a room.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub default_mines_count: usize,
    pub grid_size: usize,
    pub turn_time_limit: u32,
    pub min_reveals_to_pass: u32,
}

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let settings = state.config.game.settings();
    Json(ConfigResponse {
        default_mines_count: settings.mines_count,
        grid_size: settings.grid_size,
        turn_time_limit: settings.turn_time_limit,
        min_reveals_to_pass: settings.min_reveals_to_pass,
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// POST /api/admin/login — exchange the admin credential for a 24 h bearer
/// token used on the admin WebSocket namespace.
pub async fn admin_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }
    if !auth::check_credentials(&state.config.admin, &body.username, &body.password) {
        tracing::warn!(username = %body.username, "Failed admin login");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = auth::issue_token(
        &state.config.admin.token_secret,
        &body.username,
        time::now_millis(),
    );
    tracing::info!(username = %body.username, "Admin logged in");
    Ok(Json(LoginResponse {
        success: true,
        token,
    }))
}
