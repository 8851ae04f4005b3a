//! 🧰 Handlers — one per operation, all of them polite pass-throughs.
//!
//! The [`Gateway`] owns a search engine, a session store and the import knobs.
//! [`Gateway::handle`] checks the verb, then hands the call to the matching handler.
//! Each handler returns the envelope `result` on success or a [`GatewayError`]
//! that already knows its code.

use axum::http::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::app_config::ImportConfig;
use crate::backends::{SearchBackend, SearchEngine};
use crate::common::{DocumentKey, Fields, LooseId};
use crate::dispatcher::{Operation, Params, RoutedCall};
use crate::envelope::GatewayError;
use crate::importer::{ImportBatch, Importer};
use crate::session::{SessionBackend, SessionStore};
use crate::templates::{FuzzySearch, project_search_hit};

/// 📦 Body of `insert` and `update`.
#[derive(Debug, Deserialize)]
struct DocumentWrite {
    database: LooseId,
    table: String,
    key: LooseId,
    fields: Fields,
}

impl DocumentWrite {
    fn into_parts(self) -> (DocumentKey, Fields) {
        (
            DocumentKey::new(self.database.into_id(), self.table, self.key.into_id()),
            self.fields,
        )
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::InvalidBody("the request body is empty".to_string()));
    }
    serde_json::from_slice(body).map_err(|err| GatewayError::InvalidBody(err.to_string()))
}

fn key_from_params(params: &Params) -> Result<DocumentKey, GatewayError> {
    Ok(DocumentKey::new(
        params.require(0, "database")?,
        params.require(1, "table")?,
        params.require(2, "key")?,
    ))
}

fn parse_count(params: &Params, position: usize, name: &'static str) -> Result<u64, GatewayError> {
    params
        .require(position, name)?
        .trim()
        .parse()
        .map_err(|_| GatewayError::InvalidParameter(name))
}

/// 🚪 The gateway: everything a request needs, shared across all of them.
#[derive(Debug)]
pub struct Gateway {
    engine: SearchBackend,
    sessions: SessionBackend,
    import_config: ImportConfig,
}

impl Gateway {
    pub fn new(engine: SearchBackend, sessions: SessionBackend, import_config: ImportConfig) -> Self {
        Self {
            engine,
            sessions,
            import_config,
        }
    }

    /// 🧭 Verb check first, then the operation. A wrong verb never reaches the store.
    pub async fn handle(&self, method: &Method, call: &RoutedCall, body: &[u8]) -> Result<Value, GatewayError> {
        if let Some(expected) = call.operation.expected_method() {
            if *method != expected {
                return Err(GatewayError::WrongMethod { expected });
            }
        }
        debug!("🧭 {} {}", method, call.operation.wire_name());

        match call.operation {
            Operation::Insert => self.insert(body).await,
            Operation::Update => self.update(body).await,
            Operation::Select => self.select(&call.params).await,
            Operation::DeleteDocument => self.delete_document(&call.params).await,
            Operation::Search => self.search(&call.params).await,
            Operation::Import => self.import(body).await,
            Operation::DeleteDatabase => self.delete_database(&call.params).await,
            Operation::Reset => self.reset().await,
            Operation::CurrentDb => self.current_db().await,
        }
    }

    async fn insert(&self, body: &[u8]) -> Result<Value, GatewayError> {
        let (key, fields) = parse_body::<DocumentWrite>(body)?.into_parts();
        let version = self.engine.index(&key, &fields).await?;
        Ok(json!({ "version": version }))
    }

    async fn update(&self, body: &[u8]) -> Result<Value, GatewayError> {
        let (key, fields) = parse_body::<DocumentWrite>(body)?.into_parts();
        let version = self.engine.update(&key, &fields).await?;
        Ok(json!({ "version": version }))
    }

    async fn select(&self, params: &Params) -> Result<Value, GatewayError> {
        let key = key_from_params(params)?;
        let outcome = self.engine.get(&key).await?;
        if !outcome.found {
            return Err(GatewayError::DocumentNotFound);
        }
        Ok(Value::Object(outcome.source.unwrap_or_default()))
    }

    async fn delete_document(&self, params: &Params) -> Result<Value, GatewayError> {
        let key = key_from_params(params)?;
        if !self.engine.get(&key).await?.found {
            return Err(GatewayError::DeleteTargetNotFound);
        }
        self.engine.delete(&key).await?;
        Ok(Value::Null)
    }

    async fn search(&self, params: &Params) -> Result<Value, GatewayError> {
        let database = params.require(0, "database")?;
        let table = params.require(1, "table")?;
        let from = parse_count(params, 2, "offset")?;
        let size = parse_count(params, 3, "limit")?;
        let query = FuzzySearch::from_raw_word(params.require(4, "word")?, from, size);

        info!(target: "esgate::search", word = %query.word, "🔍 search");

        let hits = self.engine.search(database, table, &query).await?;
        if hits.is_empty() {
            return Err(GatewayError::NoSearchHits);
        }
        Ok(Value::Array(
            hits.iter().map(|hit| project_search_hit(&hit.source)).collect(),
        ))
    }

    async fn import(&self, body: &[u8]) -> Result<Value, GatewayError> {
        let batch = parse_body::<ImportBatch>(body)?;
        Importer::new(&self.engine, &self.sessions, &self.import_config)
            .import_batch(batch)
            .await?;
        Ok(Value::Null)
    }

    async fn delete_database(&self, params: &Params) -> Result<Value, GatewayError> {
        let database = params.require(0, "database")?;
        if !self.engine.index_exists(database).await? {
            return Err(GatewayError::DatabaseNotFound(database.to_string()));
        }
        if !self.engine.delete_index(database).await? {
            return Err(GatewayError::NotAcknowledged(database.to_string()));
        }
        Ok(Value::Null)
    }

    async fn reset(&self) -> Result<Value, GatewayError> {
        self.sessions.clear().await?;
        info!(target: "esgate::import", "🧹 import session reset");
        Ok(Value::Null)
    }

    async fn current_db(&self) -> Result<Value, GatewayError> {
        let session = self.sessions.load().await?;
        let bound = self.engine.alias_targets(&self.import_config.alias).await?;
        Ok(json!({
            "old_index_name": session.old_index_name,
            "import_in_progress": session.import_in_progress,
            "alias": {
                "name": self.import_config.alias,
                "indices": bound,
            }
        }))
    }
}
