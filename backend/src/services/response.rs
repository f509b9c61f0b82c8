//! JSON envelope shared by every API endpoint: `{ status, message, data }`.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(message: impl Into<String>, data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        status: "success",
        message: message.into(),
        data: Some(data),
    })
}

pub fn accepted<T: Serialize>(message: impl Into<String>, data: T) -> HttpResponse {
    HttpResponse::Accepted().json(Envelope {
        status: "pending",
        message: message.into(),
        data: Some(data),
    })
}

pub fn error(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(Envelope::<()> {
        status: "error",
        message: message.into(),
        data: None,
    })
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    error(StatusCode::NOT_FOUND, message)
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unavailable(message: impl Into<String>) -> HttpResponse {
    error(StatusCode::SERVICE_UNAVAILABLE, message)
}
