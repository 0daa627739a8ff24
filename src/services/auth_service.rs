use axum::http::{header, HeaderMap};

// Get the session token from request headers
pub fn get_session_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, String> {
    // 1. Try to get a Bearer token from the Authorization header
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Ok(token.to_string());
    }

    // 2. Try to get token from cookies, there may be several Cookie headers
    let mut saw_cookie_header = false;
    for cookie_header in headers.get_all(header::COOKIE) {
        saw_cookie_header = true;
        let cookie_str = cookie_header.to_str().map_err(|_| "Invalid Cookie header".to_string())?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == cookie_name && !c.value().is_empty() {
                return Ok(c.value().to_string());
            }
        }
    }

    if saw_cookie_header {
        Err(format!("{} cookie not found", cookie_name))
    } else {
        Err("Missing Authorization header or Cookie".to_string())
    }
}
