use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::error;

use crate::auth::{self, CredentialError, SessionKeys, TokenError, TOKEN_TTL_HOURS};
use crate::db::{Database, Feed, Post};
use crate::fetcher::PollHandle;

pub const SESSION_COOKIE: &str = "token";

pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: SessionKeys,
    pub poller: PollHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/protected", get(protected))
        .route("/feeds", get(get_feeds).post(add_feed))
        .route("/feeds/:feed_id", delete(delete_feed))
        .route("/posts", get(get_posts))
        .route("/health", get(health))
        .with_state(state)
}

// Custom error type
pub enum ApiError {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(err) => {
                // Storage and hashing failures stay opaque to the caller
                error!("Internal error: {:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        status.into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError::Internal(err.into())
    }
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
}

/// Resolve the session cookie to a user id. Missing cookie or a failed
/// signature/expiry check is 401; a structurally broken token is 400.
async fn require_user(state: &AppState, jar: &CookieJar) -> Result<i64, ApiError> {
    let cookie = jar.get(SESSION_COOKIE).ok_or(ApiError::Unauthorized)?;

    let username = state
        .sessions
        .validate(cookie.value())
        .map_err(|err| match err {
            TokenError::Malformed => ApiError::BadRequest,
            TokenError::Expired | TokenError::BadSignature => ApiError::Unauthorized,
        })?;

    let user = state
        .db
        .user_by_username(&username)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(user.id)
}

// Route handlers

pub async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest)?;

    match auth::register_user(&state.db, &creds.username, &creds.password).await {
        Ok(_) => Ok(StatusCode::CREATED),
        Err(CredentialError::UsernameTaken) => Err(ApiError::Conflict),
        Err(err) => Err(err.into()),
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest)?;

    match auth::verify_credentials(&state.db, &creds.username, &creds.password).await {
        Ok(_) => {}
        Err(CredentialError::UnknownUser | CredentialError::WrongPassword) => {
            return Err(ApiError::Unauthorized);
        }
        Err(err) => return Err(err.into()),
    }

    let token = state.sessions.issue(&creds.username)?;
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(TOKEN_TTL_HOURS))
        .build();

    Ok((jar.add(cookie), StatusCode::OK))
}

pub async fn protected(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<&'static str, ApiError> {
    require_user(&state, &jar).await?;
    Ok("Welcome, authenticated user!")
}

pub async fn get_feeds(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<Feed>>, ApiError> {
    let user_id = require_user(&state, &jar).await?;
    let feeds = state.db.feeds_for_user(user_id).await?;
    Ok(Json(feeds))
}

pub async fn add_feed(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Result<Json<NewFeed>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&state, &jar).await?;
    let Json(feed) = body.map_err(|_| ApiError::BadRequest)?;

    match state.db.add_feed(user_id, &feed.name, &feed.url).await {
        Ok(_) => {}
        Err(crate::db::DbError::Duplicate) => return Err(ApiError::Conflict),
        Err(err) => return Err(err.into()),
    }

    // Surface new content quickly; the response never waits on the poll.
    state.poller.request_poll();

    Ok(StatusCode::CREATED)
}

pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(feed_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&state, &jar).await?;

    if state.db.delete_feed(user_id, feed_id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn get_posts(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<Post>>, ApiError> {
    let user_id = require_user(&state, &jar).await?;
    let posts = state.db.recent_posts_for_user(user_id).await?;
    Ok(Json(posts))
}

pub async fn health() -> &'static str {
    "OK"
}
