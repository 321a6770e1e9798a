pub mod appointments;
pub mod auth;
pub mod backend;
pub mod config;
pub mod err;
pub mod guard;
pub mod models;
pub mod permissions;
pub mod profiles;
pub mod session;
pub mod store;
#[cfg(test)]
mod testing;

use axum::handler::Handler;
use axum::routing::{get, patch, post, put};
use axum::{Extension, Router};

use std::sync::Arc;
use axum::http::Uri;
use axum::response::IntoResponse;
use serde::Serialize;
use crate::backend::{HostedAuth, SessionSource, StorageClient};
use crate::config::Config;
use crate::err::{Error, Fine, Maybe, Nothing};
use crate::store::{AppointmentStore, PgStore, ProfileStore};

pub type Payload<T> = axum::response::Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V> where V: Serialize {
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V> where V: Serialize {
    Ok(Nothing(err))
}

/// Shared by every handler; nothing in here changes after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn SessionSource>,
    pub profiles: Arc<dyn ProfileStore>,
    pub appointments: Arc<dyn AppointmentStore>,
    pub storage: StorageClient,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/auth/sign-up", post(auth::sign_up))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/reset-password", post(auth::request_password_reset))
        .route("/auth/update-password", post(auth::update_password))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend", post(auth::resend_confirmation))
        .route("/auth/me", get(auth::me))
        .route("/guard", get(guard::check_route))
        .route(
            "/profile",
            get(profiles::read_profile).patch(profiles::update_profile),
        )
        .route("/profile/avatar", put(profiles::upload_avatar))
        .route("/doctors", get(profiles::list_doctors))
        .route(
            "/appointments",
            get(appointments::list_appointments).post(appointments::book_appointment),
        )
        .route("/appointments/:id", patch(appointments::update_appointment))
        .fallback(err::handler404.into_service())
        .layer(Extension(state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("doclink-server/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let store = Arc::new(PgStore::connect(&config.database_url, config.max_connections).await?);
    let storage = StorageClient::new(
        http.clone(),
        &config.supabase_url,
        config.bucket.clone(),
        config.anon_key.clone(),
        config.service_role_key.clone(),
    );
    if let Err(err) = storage.ensure_bucket().await {
        log::error!("Could not prepare storage bucket `{}`: {:?}", storage.bucket(), err);
    }

    let addr = config.bind;
    let state = AppState {
        auth: Arc::new(HostedAuth::new(http, &config.supabase_url, config.anon_key.clone())),
        profiles: store.clone(),
        appointments: store,
        storage,
        config: Arc::new(config),
    };

    log::info!("Starting DocLink HTTP Server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app(state).into_make_service())
        .await?;
    Ok(())
}
