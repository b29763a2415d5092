use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            CallbackQuery, ForgotPasswordRequest, LoginForm, MessageResponse, PublicUser,
            RegisterRequest, ResetPasswordRequest, TokenQuery, TokenResponse, UpdateUserRequest,
        },
        extractors::{CurrentUser, RequireAdmin},
        federated,
        oidc::AuthState,
        repo_types::VerifyOutcome,
        services::{self, FORGOT_PASSWORD_MESSAGE},
    },
    error::AuthError,
    state::AppState,
};

const OIDC_STATE_COOKIE: &str = "oidc_state";
const OIDC_STATE_MAX_AGE_MINUTES: i64 = 10;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify-email", get(verify_email))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/users", get(list_users))
        .route("/auth/users/:id", get(get_user).put(update_user))
}

pub fn federated_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google-login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::register(&state, &payload.email, &payload.password).await?;
    Ok(Json(MessageResponse::new(
        "Please check your email to verify your account.",
    )))
}

#[instrument(skip_all)]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>, AuthError> {
    let msg = match services::verify_email(&state, &query.token).await? {
        VerifyOutcome::AlreadyVerified => "Account was already verified.",
        VerifyOutcome::Created | VerifyOutcome::Verified => {
            "Verification successful! You can now log in."
        }
    };
    Ok(Json(MessageResponse::new(msg)))
}

#[instrument(skip(state, connect_info, form), fields(email = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, AuthError> {
    let client = connect_info.map(|ConnectInfo(addr)| addr);
    let token = services::login(&state, &form.username, &form.password, client).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::forgot_password(&state, &payload.email).await?;
    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::reset_password(&state, &payload.token, &payload.new_password).await?;
    Ok(Json(MessageResponse::new("Password has been updated successfully.")))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    let users = services::list_users(&state).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn get_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AuthError> {
    Ok(Json(services::get_user(&state, id).await?.into()))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.id))]
pub async fn update_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AuthError> {
    let user =
        services::update_user(&state, id, payload.email, payload.password, payload.is_active)
            .await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn google_login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let (auth_url, pending) = federated::initiate(&state)?;
    let value = serde_json::to_string(&pending)
        .map_err(|e| AuthError::Internal(anyhow::Error::new(e).context("encode oidc state")))?;

    let cookie = Cookie::build((OIDC_STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(state.config.session.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(OIDC_STATE_MAX_AGE_MINUTES));

    Ok((jar.add(cookie), Redirect::to(&auth_url)))
}

#[instrument(skip_all)]
pub async fn google_callback(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    jar: PrivateCookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(PrivateCookieJar, Json<TokenResponse>), AuthError> {
    let pending = jar.get(OIDC_STATE_COOKIE).and_then(|cookie| {
        serde_json::from_str::<AuthState>(cookie.value())
            .map_err(|e| warn!(error = %e, "undecodable oidc state cookie"))
            .ok()
    });

    let token = federated::complete(
        &state,
        pending,
        query.code.as_deref(),
        query.state.as_deref(),
        query.error.as_deref(),
        connect_info.map(|ConnectInfo(addr)| addr),
    )
    .await?;

    let jar = jar.remove(Cookie::build(OIDC_STATE_COOKIE).path("/"));
    Ok((jar, Json(TokenResponse::bearer(token))))
}
