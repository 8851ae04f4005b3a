//! # 🔀 THE IMPORTER
//!
//! 🎬 "In a world where readers must never see a half-built index...
//! one alias dared to wait until the very last batch."
//!
//! A big dataset shows up in many small batches. The first batch of a run
//! creates a brand-new index (schema and all). Every batch is bulk-written into
//! it. Readers keep following the alias to the previous complete index the
//! whole time. When a batch says `finish`, the alias jumps to the new index in
//! one atomic `_aliases` request and the predecessor is deleted.
//!
//! ```text
//!   EMPTY ──first batch──▶ RUNNING ──finish──▶ DONE(old = new)
//!     ▲                      │  ▲                   │
//!     │                      └──┘ more batches      │
//!     └────────────── reset ◀───────────────────────┘
//! ```
//!
//! ⚠️ Single writer. The session is read, modified and written without a lock
//! spanning the whole request. Two concurrent runs will trample each other.
//! Callers serialize. That's the deal. 🦆

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app_config::ImportConfig;
use crate::backends::SearchEngine;
use crate::common::{AliasAction, BulkIndexOp, DocumentKey, Fields, LooseId};
use crate::envelope::GatewayError;
use crate::session::{ImportSession, SessionStore};
use crate::templates::index_schema;

/// 🎯 The source field every record must carry; it becomes the document id.
pub const RECORD_ID_FIELD: &str = "website_id";

/// 📋 stored field ← source field, and whether it gets squeezed into an integer.
const RECORD_PROJECTION: [(&str, &str, bool); 7] = [
    ("email", "website_developer_email", false),
    ("website", "website_developer_website", false),
    ("video", "website_video", true),
    ("video_delete", "video_delete", true),
    ("user_display_name", "user_display_name", false),
    ("user_email", "user_email", false),
    ("user_website", "user_website", false),
];

/// 📦 One import request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportBatch {
    /// The index this run is building.
    pub database: LooseId,
    pub table: String,
    #[serde(default)]
    pub fields: Vec<Fields>,
    #[serde(default)]
    pub finish: LooseFlag,
}

/// 🚩 A flag from a loosely-typed caller: `true`, `1`, `"1"`, `"true"` all mean yes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LooseFlag {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl Default for LooseFlag {
    fn default() -> Self {
        LooseFlag::Bool(false)
    }
}

impl LooseFlag {
    pub fn is_set(&self) -> bool {
        match self {
            LooseFlag::Bool(flag) => *flag,
            LooseFlag::Integer(number) => *number != 0,
            LooseFlag::Text(text) => matches!(text.trim(), "1" | "true"),
        }
    }
}

/// 🔢 Integer coercion for loosely-typed input.
///
/// Integers pass, floats truncate, booleans are 0/1, strings contribute their
/// leading integer (`"12abc"` → 12, `"abc"` → 0), and everything else is 0.
pub fn coerce_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .unwrap_or(0),
        Some(Value::Bool(flag)) => i64::from(*flag),
        Some(Value::String(text)) => leading_integer(text),
        _ => 0,
    }
}

fn leading_integer(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let numeric: String = digits.chars().take_while(char::is_ascii_digit).collect();
    numeric.parse::<i64>().map(|number| sign * number).unwrap_or(0)
}

/// ✂️ Turn one source record into a bulk op: id from `website_id`, a fixed set of fields
/// projected in, everything else left on the floor.
pub fn project_record(index: &str, doc_type: &str, record: &Fields) -> Result<BulkIndexOp, GatewayError> {
    let id = match record.get(RECORD_ID_FIELD) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(GatewayError::InvalidBody(format!(
                "every record needs a string or numeric '{RECORD_ID_FIELD}'"
            )));
        }
    };

    let source: Fields = RECORD_PROJECTION
        .iter()
        .map(|(stored, from, as_int)| {
            let value = if *as_int {
                Value::from(coerce_int(record.get(*from)))
            } else {
                record.get(*from).cloned().unwrap_or(Value::Null)
            };
            (stored.to_string(), value)
        })
        .collect();

    Ok(BulkIndexOp {
        key: DocumentKey::new(index, doc_type, id),
        source,
    })
}

/// 🔀 The staged import state machine, bound to an engine and a session store.
#[derive(Debug)]
pub struct Importer<'a, E: SearchEngine, S: SessionStore> {
    engine: &'a E,
    sessions: &'a S,
    config: &'a ImportConfig,
}

impl<'a, E: SearchEngine, S: SessionStore> Importer<'a, E, S> {
    pub fn new(engine: &'a E, sessions: &'a S, config: &'a ImportConfig) -> Self {
        Self {
            engine,
            sessions,
            config,
        }
    }

    /// 🚀 Apply one batch of a run. Returns the session as it stands afterwards.
    ///
    /// Records are projected before anything touches the store, so a malformed record
    /// rejects the whole batch without side effects.
    pub async fn import_batch(&self, batch: ImportBatch) -> Result<ImportSession, GatewayError> {
        let new_index = batch.database.into_id();
        let finish = batch.finish.is_set();
        let ops = batch
            .fields
            .iter()
            .map(|record| project_record(&new_index, &batch.table, record))
            .collect::<Result<Vec<_>, _>>()?;

        let mut session = self.sessions.load().await?;
        info!(target: "esgate::import", session = ?session, "📋 before");

        // 🏗️ First batch of a run: build the index, and write the flag down before anything
        // else can fail, so a resend skips straight to the bulk write.
        if !session.import_in_progress {
            let schema = index_schema(&batch.table, self.config);
            self.engine.create_index(&new_index, &schema).await?;
            debug!("🏗️ Run started: index '{}' created for type '{}'", new_index, batch.table);
            session.import_in_progress = true;
            self.sessions.save(&session).await?;
        }

        if ops.is_empty() {
            debug!("📦 Empty batch for '{}'. Nothing to bulk, carrying on.", new_index);
        } else {
            // 📡 Bulk by document id is idempotent. A failed batch just gets sent again.
            self.engine.bulk(&ops).await?;
            debug!("📦 {} documents bulk-written into '{}'", ops.len(), new_index);
        }

        // 🔧 Re-save mid-run so the session's clock keeps ticking from the latest batch.
        self.sessions.save(&session).await?;

        if finish {
            self.swap_alias(session.old_index_name.as_deref(), &new_index).await?;
            // 🔒 The alias has moved. From here on the session must say so, whatever happens
            // to the predecessor.
            let predecessor = session.old_index_name.replace(new_index);
            session.import_in_progress = false;
            self.sessions.save(&session).await?;

            // ⚠️ A predecessor with the new run's name is the index we just bound. Keep it.
            if let Some(retired) = predecessor.filter(|retired| session.old_index_name.as_ref() != Some(retired)) {
                self.retire(&retired).await;
            }
        }

        info!(target: "esgate::import", session = ?session, "📋 after");
        Ok(session)
    }

    /// 🔀 Point the alias at `new_index`. With a predecessor, the remove and add go out
    /// in one request so readers never see zero or two bound indices.
    async fn swap_alias(&self, predecessor: Option<&str>, new_index: &str) -> anyhow::Result<()> {
        let alias = &self.config.alias;
        let add = AliasAction::Add {
            index: new_index.to_string(),
            alias: alias.clone(),
        };
        match predecessor {
            Some(old_index) => {
                let remove = AliasAction::Remove {
                    index: old_index.to_string(),
                    alias: alias.clone(),
                };
                self.engine.update_aliases(&[remove, add]).await?;
                info!("🔀 Alias '{}' moved from '{}' to '{}'", alias, old_index, new_index);
            }
            None => {
                self.engine.update_aliases(&[add]).await?;
                info!("🔀 Alias '{}' bound to '{}' for the very first time", alias, new_index);
            }
        }
        Ok(())
    }

    /// 🗑️ Drop the index nobody reads anymore. Nothing points at it, so a failure here
    /// leaves an orphan for `deleteDatabase`, not a broken run.
    async fn retire(&self, old_index: &str) {
        match self.engine.delete_index(old_index).await {
            Ok(true) => debug!("🗑️ Retired index '{}' deleted", old_index),
            Ok(false) => warn!("⚠️ Deleting retired index '{}' was not acknowledged", old_index),
            Err(err) => warn!(
                "⚠️ Could not delete retired index '{}' ({:#}). It is unbound; drop it with deleteDatabase.",
                old_index, err
            ),
        }
    }
}
