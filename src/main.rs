#![warn(clippy::all, clippy::nursery, clippy::pedantic)]
use std::{net::SocketAddr, sync::Arc};

use askama_axum::Template;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use rand::{distributions::Alphanumeric, Rng};
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, services::ServeDir};
use tracing_subscriber::EnvFilter;

pub use crate::state::AppState;

mod auth;
mod db;
mod gm;
mod handler;
mod ingest;
mod state;

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
    let state = AppState::new().await;

    let app = router(state);

    let bind_address = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(%bind_address, "Binding to address");
    let tcp = TcpListener::bind(bind_address).await.unwrap();
    info!(%bind_address, "Server listening on socket");
    axum::serve(tcp, app)
        .with_graceful_shutdown(vss::shutdown_signal())
        .await
        .unwrap();
}

pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new("assets")
        .append_index_html_on_directories(false)
        .precompressed_br()
        .precompressed_deflate()
        .precompressed_gzip()
        .precompressed_zstd();
    let uploads = ServeDir::new(state.images.root()).append_index_html_on_directories(false);

    let gm_routes = Router::new()
        .route("/gm", get(gm::dashboard))
        .route("/gm/logout", get(auth::logout))
        .route("/gm/submission/:id", get(gm::view_submission))
        .route("/gm/mark/submission/:id", get(gm::mark_submission))
        .route("/gm/mark/tweet/:id", get(gm::mark_tweet))
        .route("/gm/mark/like/:id", get(gm::mark_like))
        .route("/gm/batch_mark", post(gm::batch_mark))
        .route("/gm/delete/submission/:id", post(gm::delete_submission))
        .route("/gm/delete/tweet/:id", post(gm::delete_tweet))
        .route("/gm/delete/like/:id", post(gm::delete_like))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::middleware,
        ));

    Router::new()
        .route("/", get(handler::index))
        .route("/submit", post(handler::submit))
        .route("/daily", get(handler::daily))
        .route("/daily_upload", post(handler::daily_upload))
        .route("/likes", get(handler::likes))
        .route("/likes_upload", post(handler::likes_upload))
        .route("/gm/login", get(auth::login_page).post(auth::login))
        .merge(gm_routes)
        .nest_service("/assets", assets)
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(state.max_content_bytes))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(error_middleware))
        .with_state(state)
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Filesystem error")]
    Io(#[from] std::io::Error),
    #[error("Database error")]
    Sqlx(#[from] sqlx::Error),
    #[error("Database migration error")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Image encode error")]
    Image(#[from] image::ImageError),
    #[error("Timestamp format error")]
    TimestampFormat(#[from] time::error::Format),
    #[error("Join error")]
    Join(#[from] tokio::task::JoinError),
    #[error("Malformed upload body")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("Path escapes the upload folder")]
    PathTraversal,
    #[error("404 Page Not Found")]
    NotFound,
}

impl Error {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Io(_)
            | Self::Sqlx(_)
            | Self::Migrate(_)
            | Self::Image(_)
            | Self::TimestampFormat(_)
            | Self::Join(_)
            | Self::PathTraversal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(source = ?self, "Error handling request");
        } else {
            debug!(source = ?self, "Failed to handle request");
        }

        (status, Extension(Arc::new(self)), Body::empty()).into_response()
    }
}

#[derive(Template)]
#[template(path = "error.hbs", ext = "html", escape = "html")]
struct ErrorTemplate {
    error: Arc<Error>,
}

async fn error_middleware(req: Request, next: Next) -> Response {
    let resp = next.run(req).await;
    if let Some(error) = resp.extensions().get::<Arc<Error>>().cloned() {
        let status = error.status();
        (status, ErrorTemplate { error }).into_response()
    } else {
        resp
    }
}

pub fn randstring(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
