//! 🚪 esgate — URL-path RPC calls in, Elasticsearch calls out.
//!
//! `/api/<operation>/<param1>/.../<param5>` becomes an index, update, get, delete,
//! fuzzy search, or one batch of a staged alias-swapping import. Every answer is
//! an envelope. Every failure has a number. 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod dispatcher;
pub mod envelope;
pub mod handlers;
pub mod importer;
pub mod server;
pub mod session;
pub mod templates;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::SearchBackend;
use crate::handlers::Gateway;
use crate::session::SessionBackend;

/// 🚀 Build the backends the config describes and serve until shut down.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let engine = SearchBackend::from_config(&app_config.backend)
        .await
        .context("💀 Could not bring up the search backend")?;
    let sessions = SessionBackend::from_config(&app_config.session);
    info!(
        "🔧 backend: {}, session ttl: {}s, alias: '{}'",
        engine_kind(&engine),
        app_config.session.ttl_secs(),
        app_config.import.alias
    );

    let gateway = Gateway::new(engine, sessions, app_config.import.clone());
    server::serve(gateway, &app_config.server)
        .await
        .context("💀 The gateway server stopped unexpectedly")
}

fn engine_kind(engine: &SearchBackend) -> &'static str {
    match engine {
        SearchBackend::Elasticsearch(_) => "Elasticsearch",
        SearchBackend::InMemory(_) => "InMemory",
    }
}
