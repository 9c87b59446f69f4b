use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::middleware::{access_token_cookie, clear_access_token_cookie};
use crate::models::User;
use crate::services::auth::{create_access_token, hash_password, verify_password};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/* ---------- REGISTER ---------- */

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
    #[validate(length(min = 3, max = 64))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8))]
    password: String,
    confirm_password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if req.password != req.confirm_password {
        return Err((StatusCode::BAD_REQUEST, "Passwords do not match".to_string()));
    }

    let exists = User::find_by_email(&req.email, &state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("register email lookup failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Registration error".to_string())
        })?;
    if exists.is_some() {
        return Err((StatusCode::CONFLICT, "Email already registered".to_string()));
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!("password hashing failed: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Registration error".to_string())
    })?;

    let created = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, password_hash)
         VALUES ($1, $2, $3)
         RETURNING id, username, email, password_hash, registered_at",
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .fetch_one(&state.db.pool)
    .await;

    match created {
        Ok(user) => Ok((StatusCode::CREATED, Json(user))),
        // Гонка на unique(username/email)
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err((
            StatusCode::CONFLICT,
            "Username or email already registered".to_string(),
        )),
        Err(e) => {
            tracing::error!("register insert failed: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Registration error".to_string()))
        }
    }
}

/* ---------- LOGIN / LOGOUT ---------- */

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = User::find_by_email(&req.email, &state.db.pool)
        .await
        .map_err(|e| {
            tracing::error!("login lookup failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Login error".to_string())
        })?;

    // Один и тот же ответ для неизвестного email и неверного пароля
    let invalid = || {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid email or password".to_string(),
        )
    };
    let user = user.ok_or_else(invalid)?;
    if !verify_password(&req.password, &user.password_hash) {
        return Err(invalid());
    }

    let token = create_access_token(
        user.id,
        &state.config.jwt.secret,
        state.config.jwt.expires_in_hours,
    );

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, access_token_cookie(&token))],
        Json(TokenResponse {
            access_token: token,
            token_type: "bearer",
        }),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, clear_access_token_cookie())],
        Json(serde_json::json!({"message": "Logged out"})),
    )
}
