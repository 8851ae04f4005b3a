//! 🔌 Backends — where the real I/O happens.
//!
//! 🎭 This module is the casting agency for search engines. Need a real
//! Elasticsearch cluster? We've got a backend for that. Need something that
//! lives in RAM and forgets everything when the test ends? Also got that.
//!
//! Every data operation the gateway offers is a thin pass-through to one of
//! these. The gateway has opinions about envelopes and error codes. The
//! backends have opinions about HTTP. Nobody has opinions about both. 🦆

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::app_config::BackendConfig;
use crate::common::{AliasAction, BulkIndexOp, DocumentKey, Fields, GetOutcome, SearchHit};
use crate::templates::FuzzySearch;

pub(crate) mod elasticsearch;
pub(crate) mod in_mem;

pub use elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
pub use in_mem::InMemoryBackend;

/// 🔍 The document store contract the gateway talks to.
///
/// # Contract
/// - Point operations address a document by [`DocumentKey`].
/// - Index names may be aliases wherever the engine allows it (reads, search).
/// - `update_aliases` applies all of its actions atomically or none of them.
/// - Nothing here retries. Retries are the caller's problem. Good luck.
#[async_trait]
pub trait SearchEngine: std::fmt::Debug + Send + Sync {
    /// 📥 Write a whole document. Returns the resulting version.
    async fn index(&self, key: &DocumentKey, body: &Fields) -> Result<u64>;
    /// 🩹 Merge `partial` into an existing document. Returns the new version.
    async fn update(&self, key: &DocumentKey, partial: &Fields) -> Result<u64>;
    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome>;
    async fn delete(&self, key: &DocumentKey) -> Result<()>;
    /// 🔍 Run the fuzzy query against `index`/`doc_type`. An absent index yields no hits.
    async fn search(&self, index: &str, doc_type: &str, query: &FuzzySearch) -> Result<Vec<SearchHit>>;
    /// 📦 One `_bulk` request. Per-item failures are logged, not surfaced.
    async fn bulk(&self, ops: &[BulkIndexOp]) -> Result<()>;
    async fn create_index(&self, index: &str, schema: &Value) -> Result<()>;
    async fn index_exists(&self, index: &str) -> Result<bool>;
    /// 🗑️ Drop an index. Returns whether the engine acknowledged it.
    async fn delete_index(&self, index: &str) -> Result<bool>;
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;
    /// 🏷️ Which physical indices an alias currently resolves to. Unknown alias → empty.
    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>>;
}

/// 🎭 The many faces of a search engine: a polymorphic casting call.
///
/// Dispatches via `impl SearchEngine for SearchBackend`, so handlers never need to
/// know whether the documents live in a cluster of overworked nodes or a HashMap.
#[derive(Debug)]
pub enum SearchBackend {
    Elasticsearch(ElasticsearchBackend),
    InMemory(InMemoryBackend),
}

impl SearchBackend {
    /// 🚀 Stand up whichever backend the config asked for.
    pub async fn from_config(config: &BackendConfig) -> Result<Self> {
        match config {
            BackendConfig::Elasticsearch(es) => Ok(SearchBackend::Elasticsearch(
                ElasticsearchBackend::new(es.clone()).await?,
            )),
            BackendConfig::InMemory => Ok(SearchBackend::InMemory(InMemoryBackend::new())),
        }
    }
}

#[async_trait]
impl SearchEngine for SearchBackend {
    async fn index(&self, key: &DocumentKey, body: &Fields) -> Result<u64> {
        match self {
            SearchBackend::Elasticsearch(es) => es.index(key, body).await,
            SearchBackend::InMemory(mem) => mem.index(key, body).await,
        }
    }

    async fn update(&self, key: &DocumentKey, partial: &Fields) -> Result<u64> {
        match self {
            SearchBackend::Elasticsearch(es) => es.update(key, partial).await,
            SearchBackend::InMemory(mem) => mem.update(key, partial).await,
        }
    }

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        match self {
            SearchBackend::Elasticsearch(es) => es.get(key).await,
            SearchBackend::InMemory(mem) => mem.get(key).await,
        }
    }

    async fn delete(&self, key: &DocumentKey) -> Result<()> {
        match self {
            SearchBackend::Elasticsearch(es) => es.delete(key).await,
            SearchBackend::InMemory(mem) => mem.delete(key).await,
        }
    }

    async fn search(&self, index: &str, doc_type: &str, query: &FuzzySearch) -> Result<Vec<SearchHit>> {
        match self {
            SearchBackend::Elasticsearch(es) => es.search(index, doc_type, query).await,
            SearchBackend::InMemory(mem) => mem.search(index, doc_type, query).await,
        }
    }

    async fn bulk(&self, ops: &[BulkIndexOp]) -> Result<()> {
        match self {
            SearchBackend::Elasticsearch(es) => es.bulk(ops).await,
            SearchBackend::InMemory(mem) => mem.bulk(ops).await,
        }
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<()> {
        match self {
            SearchBackend::Elasticsearch(es) => es.create_index(index, schema).await,
            SearchBackend::InMemory(mem) => mem.create_index(index, schema).await,
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        match self {
            SearchBackend::Elasticsearch(es) => es.index_exists(index).await,
            SearchBackend::InMemory(mem) => mem.index_exists(index).await,
        }
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        match self {
            SearchBackend::Elasticsearch(es) => es.delete_index(index).await,
            SearchBackend::InMemory(mem) => mem.delete_index(index).await,
        }
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        match self {
            SearchBackend::Elasticsearch(es) => es.update_aliases(actions).await,
            SearchBackend::InMemory(mem) => mem.update_aliases(actions).await,
        }
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        match self {
            SearchBackend::Elasticsearch(es) => es.alias_targets(alias).await,
            SearchBackend::InMemory(mem) => mem.alias_targets(alias).await,
        }
    }
}
