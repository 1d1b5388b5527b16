use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

#[derive(Serialize, Deserialize)]
pub struct Home {
    message: String,
}

pub async fn home() -> impl IntoResponse {
    Json(Home {
        message: "Server is running".into(),
    })
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
    })
}
