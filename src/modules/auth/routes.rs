use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::controller;
use crate::AppState;

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(controller::register))
        .route("/login", post(controller::login))
        .route("/verify-mfa", post(controller::verify_mfa))
        .route("/oauth/{provider}", post(controller::oauth_login))
        .route("/refresh", post(controller::refresh))
        .route("/logout", post(controller::logout))
        .route("/logout-all", post(controller::logout_all))
        .route("/me", get(controller::me))
        .route("/sessions", get(controller::sessions))
        .route("/forgot-password", post(controller::forgot_password))
        .route("/reset-password", post(controller::reset_password))
        .route("/change-password", post(controller::change_password))
        .route("/request-verification", post(controller::request_verification))
        .route("/verify-email", post(controller::verify_email))
        .route("/enroll-mfa", post(controller::enroll_mfa))
        .route("/confirm-mfa", post(controller::confirm_mfa))
        .route("/disable-mfa", post(controller::disable_mfa))
        .route("/backup-codes", post(controller::backup_codes))
}
