//! # Previously, on esgate...
//!
//! 🎬 Somebody wanted to test an alias cutover without booting a JVM. They
//! were told it couldn't be done. They wrote a HashMap.
//!
//! `in_mem` is a search engine small enough to fit in a test: indices,
//! versioned documents, aliases with atomic multi-action updates, and a
//! "search" that is honestly just a case-insensitive substring match over
//! the name-ish fields. Relevance tuning was not invited.
//!
//! ⚠️ This is NOT for production. This is for tests and local development.
//! If you're deploying this to prod, please also deploy a therapist. 🦆

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backends::SearchEngine;
use crate::common::{AliasAction, BulkIndexOp, DocumentKey, Fields, GetOutcome, SearchHit};
use crate::templates::FuzzySearch;

/// 🔍 The fields the in-memory "search" looks at. Same ones the real query scores on.
const SEARCHABLE_FIELDS: [&str; 5] = [
    "name",
    "name_fa",
    "category_name",
    "category_name_fa",
    "website_developer",
];

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    source: Fields,
}

#[derive(Debug, Default)]
struct InMemoryIndex {
    /// (type, id) → document. BTreeMap so search results come back in a stable order.
    documents: BTreeMap<(String, String), StoredDocument>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    indices: HashMap<String, InMemoryIndex>,
    /// alias → indices it resolves to
    aliases: HashMap<String, BTreeSet<String>>,
}

impl InMemoryState {
    /// 🏷️ A name is either an index or an alias. Aliases fan out; indices don't.
    fn resolve(&self, name: &str) -> Vec<String> {
        if self.indices.contains_key(name) {
            return vec![name.to_string()];
        }
        self.aliases
            .get(name)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 🎯 The single index a write or point read lands on.
    fn resolve_one(&self, name: &str) -> Result<Option<String>> {
        let targets = self.resolve(name);
        match targets.len() {
            0 => Ok(None),
            1 => Ok(targets.into_iter().next()),
            _ => anyhow::bail!(
                "💀 Alias '{name}' points at {} indices, so a single-document operation has nowhere unambiguous to go",
                targets.len()
            ),
        }
    }

    /// 📥 Writes auto-create their index, like the real thing does.
    fn put(&mut self, key: &DocumentKey, source: Fields) -> Result<u64> {
        let index_name = self.resolve_one(&key.index)?.unwrap_or_else(|| key.index.clone());
        let index = self.indices.entry(index_name).or_default();
        let slot = (key.doc_type.clone(), key.id.clone());
        let version = index
            .documents
            .get(&slot)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        index.documents.insert(slot, StoredDocument { version, source });
        Ok(version)
    }
}

/// 📦 A search engine that never forgets, until it's dropped.
///
/// Clone-able because tests need to peek inside after handing a copy to the gateway.
/// The `Arc` means everyone shares the same state. The borrow checker approved. Barely.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📋 Names of every physical index, sorted. For assertions and trust issues.
    pub async fn index_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.indices.keys().cloned().collect();
        names.sort();
        names
    }

    /// 📋 How many documents an index holds.
    pub async fn document_count(&self, index: &str) -> usize {
        let state = self.state.lock().await;
        state
            .indices
            .get(index)
            .map(|index| index.documents.len())
            .unwrap_or(0)
    }
}

fn matches(source: &Fields, needles: &[String]) -> bool {
    SEARCHABLE_FIELDS.iter().any(|field| {
        source
            .get(*field)
            .and_then(Value::as_str)
            .map(|haystack| {
                let haystack = haystack.to_lowercase();
                needles.iter().any(|needle| haystack.contains(needle.as_str()))
            })
            .unwrap_or(false)
    })
}

#[async_trait]
impl SearchEngine for InMemoryBackend {
    async fn index(&self, key: &DocumentKey, body: &Fields) -> Result<u64> {
        self.state.lock().await.put(key, body.clone())
    }

    async fn update(&self, key: &DocumentKey, partial: &Fields) -> Result<u64> {
        let mut guard = self.state.lock().await;
        let index_name = guard.resolve_one(&key.index)?;
        let state = &mut *guard;
        let slot = (key.doc_type.clone(), key.id.clone());
        let document = match index_name {
            Some(name) => state
                .indices
                .get_mut(&name)
                .and_then(|index| index.documents.get_mut(&slot)),
            None => None,
        };
        let Some(document) = document else {
            anyhow::bail!(
                "💀 document_missing_exception: [{}][{}]: document missing in '{}'",
                key.doc_type,
                key.id,
                key.index
            );
        };
        for (field, value) in partial {
            document.source.insert(field.clone(), value.clone());
        }
        document.version += 1;
        Ok(document.version)
    }

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        let state = self.state.lock().await;
        let Some(index_name) = state.resolve_one(&key.index)? else {
            return Ok(GetOutcome::default());
        };
        let source = state.indices.get(&index_name).and_then(|index| {
            index
                .documents
                .get(&(key.doc_type.clone(), key.id.clone()))
                .map(|document| document.source.clone())
        });
        Ok(GetOutcome {
            found: source.is_some(),
            source,
        })
    }

    async fn delete(&self, key: &DocumentKey) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(index_name) = state.resolve_one(&key.index)? {
            if let Some(index) = state.indices.get_mut(&index_name) {
                index
                    .documents
                    .remove(&(key.doc_type.clone(), key.id.clone()));
            }
        }
        Ok(())
    }

    async fn search(&self, index: &str, doc_type: &str, query: &FuzzySearch) -> Result<Vec<SearchHit>> {
        let state = self.state.lock().await;
        let needles: Vec<String> = [query.word.to_lowercase(), query.compact_word().to_lowercase()]
            .into_iter()
            .filter(|needle| !needle.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let hits = state
            .resolve(index)
            .iter()
            .filter_map(|name| state.indices.get(name))
            .flat_map(|index| index.documents.iter())
            .filter(|((stored_type, _), document)| stored_type == doc_type && matches(&document.source, &needles))
            .map(|((_, id), document)| SearchHit {
                id: id.clone(),
                source: document.source.clone(),
            })
            .skip(query.from as usize)
            .take(query.size as usize)
            .collect();
        Ok(hits)
    }

    async fn bulk(&self, ops: &[BulkIndexOp]) -> Result<()> {
        let mut state = self.state.lock().await;
        for op in ops {
            state.put(&op.key, op.source.clone())?;
        }
        Ok(())
    }

    async fn create_index(&self, index: &str, _schema: &Value) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            anyhow::bail!("💀 resource_already_exists_exception: index '{index}' already exists");
        }
        state.indices.insert(index.to_string(), InMemoryIndex::default());
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(!self.state.lock().await.resolve(index).is_empty())
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.indices.remove(index).is_none() {
            anyhow::bail!("💀 index_not_found_exception: no such index '{index}'");
        }
        for targets in state.aliases.values_mut() {
            targets.remove(index);
        }
        state.aliases.retain(|_, targets| !targets.is_empty());
        Ok(true)
    }

    /// 🔀 Validate every action first, then apply them all. All or nothing.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut staged = state.aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { index, alias } => {
                    if !state.indices.contains_key(index) {
                        anyhow::bail!("💀 index_not_found_exception: cannot alias missing index '{index}'");
                    }
                    staged.entry(alias.clone()).or_default().insert(index.clone());
                }
                AliasAction::Remove { index, alias } => {
                    let removed = staged
                        .get_mut(alias)
                        .map(|targets| targets.remove(index))
                        .unwrap_or(false);
                    if !removed {
                        anyhow::bail!("💀 aliases_not_found_exception: '{alias}' is not bound to '{index}'");
                    }
                }
            }
        }
        staged.retain(|_, targets| !targets.is_empty());
        state.aliases = staged;
        Ok(())
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .aliases
            .get(alias)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }
}
