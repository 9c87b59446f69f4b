use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::models::User;
use crate::services::auth::{self, TokenCheck};
use crate::AppState;

/// Аутентифицированный пользователь запроса, кладётся в extensions
/// auth-слоем и достаётся хендлерами через extractor.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Результат проверки токена с возможным перевыпуском.
pub struct AuthOutcome {
    pub user: User,
    /// Новый токен, если старый истёк и его разрешено обновить.
    /// Уходит клиенту как Set-Cookie, только на HTTP-пути.
    pub refreshed: Option<String>,
}

// Токен ищем в заголовке Authorization, затем в cookie access_token
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|c| c.strip_prefix("access_token="))
        })
        .map(str::to_string)
}

/// Проверить токен и поднять пользователя из БД.
/// refresh_expired=false (WebSocket-путь) отвергает истёкшие токены.
pub async fn authenticate(
    state: &AppState,
    token: &str,
    refresh_expired: bool,
) -> Result<AuthOutcome, StatusCode> {
    let (user_id, refreshed) = match auth::inspect_token(token, &state.config.jwt.secret) {
        TokenCheck::Valid(id) => (id, None),
        TokenCheck::Expired(id) if refresh_expired => {
            let fresh = auth::create_access_token(
                id,
                &state.config.jwt.secret,
                state.config.jwt.expires_in_hours,
            );
            (id, Some(fresh))
        }
        _ => return Err(StatusCode::UNAUTHORIZED),
    };

    let user = User::find_by_id(user_id, &state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("auth user lookup failed: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(AuthOutcome { user, refreshed })
}

/// Auth-слой для /api: проверяет токен, кладёт AuthUser в extensions,
/// при истёкшем токене молча перевыпускает его через Set-Cookie.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = token_from_headers(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let outcome = authenticate(&state, &token, true).await?;

    request.extensions_mut().insert(AuthUser {
        id: outcome.user.id,
        username: outcome.user.username.clone(),
    });

    let mut response = next.run(request).await;

    if let Some(fresh) = outcome.refreshed {
        if let Ok(value) = HeaderValue::from_str(&access_token_cookie(&fresh)) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}

pub fn access_token_cookie(token: &str) -> String {
    format!("access_token={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_access_token_cookie() -> String {
    "access_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn extracts_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; access_token=abc.def.ghi; lang=en".parse().unwrap(),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        headers.insert(header::COOKIE, "access_token=from-cookie".parse().unwrap());
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn missing_token_is_none() {
        let headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert!(token_from_headers(&headers).is_none());
    }
}
