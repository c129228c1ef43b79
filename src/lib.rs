use crate::api::APIResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::error::Error;

pub mod api;
pub mod blocks;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod mapping;
pub mod model;
pub mod notion;
pub mod repository;
pub mod routes;
pub mod runner;
pub mod source;
pub mod sync;

pub fn server_error(body: APIResponse) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

pub fn unauthorized(body: APIResponse) -> Response {
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

pub fn conflict(body: APIResponse) -> Response {
    (StatusCode::CONFLICT, Json(body)).into_response()
}

pub fn accepted(body: APIResponse) -> Response {
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

fn good_response(body: APIResponse) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
