use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, info};
use crate::services::auth_service::get_session_token;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the session token from the request
    let token = match get_session_token(req.headers(), &state.config.session_cookie_name) {
        Ok(token) => token,
        Err(e) => {
            debug!("Rejecting API request: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 2. Resolve it to a user, an unreachable store is not a pass
    let user = match state.resolver.resolve_user(&token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("Rejecting API request: session does not resolve to a user");
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            error!("Failed to resolve session for API request: {}", e);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    // 3. Hand the user to downstream handlers
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
