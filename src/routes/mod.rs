pub mod chat;
pub mod inventory;
pub mod plans;
pub mod profiles;

use axum::http::StatusCode;

pub(crate) fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
