//! 📦 Common data structures — the building blocks of esgate
//!
//! 🎬 COLD OPEN — INT. GATEWAY — 3:47 AM
//!
//! A request arrives with a URL that looks like somebody typed an RPC call
//! into the address bar. It wants a document. It wants it by index, by type,
//! by id. It does not want to know about HTTP verbs. It will learn.
//!
//! These are the humble structs that carry that request's cargo from the
//! handlers down into whichever search engine is on duty tonight. They don't
//! ask questions. They carry the data. 🦆

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 📦 A document body. Arbitrary JSON fields, no schema, no judgment.
pub type Fields = Map<String, Value>;

/// 🎯 The composite address of a single document: index, type, id.
///
/// Three strings walk into a bar. The bartender says "you'll need all three of you
/// to get served." They are a package deal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub index: String,
    pub doc_type: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
        }
    }
}

/// 🔍 What a point read brings back. `found = false` is a perfectly good answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetOutcome {
    pub found: bool,
    pub source: Option<Fields>,
}

/// 🎯 One search hit: who it is, and what it's made of.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Fields,
}

/// 📨 One line pair of a `_bulk` request: "index this, with this id, into this place."
#[derive(Debug, Clone, PartialEq)]
pub struct BulkIndexOp {
    pub key: DocumentKey,
    pub source: Fields,
}

/// 🔀 A single alias action. Several of these in one request are applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

/// 👀 Wire shape of an identifier the caller hands us.
///
/// Callers send ids as strings. Or numbers. Sometimes on the same day.
/// We accept both and flatten them into a string, because Elasticsearch ids are strings
/// and the caller's upstream database apparently never got that memo.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LooseId {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl LooseId {
    pub fn into_id(self) -> String {
        match self {
            LooseId::Text(text) => text,
            LooseId::Integer(number) => number.to_string(),
            LooseId::Float(number) => number.to_string(),
        }
    }
}
