//! 📜 Templates — the JSON bodies we hand to Elasticsearch, pre-chewed.
//!
//! Two kinds of paperwork live here:
//! - the index schema that every import run creates on its first batch
//! - the fuzzy relevance query behind the `search` operation
//!
//! Plus the allow-list that trims search hits down to what callers are allowed to see.
//! If it's a JSON blob with opinions, it lives in this file. 🦆

use serde_json::{Map, Value, json};

use crate::app_config::ImportConfig;
use crate::common::Fields;

/// 🎯 The only fields a search caller ever gets to see. Everything else stays in the index.
pub const SEARCH_RESULT_FIELDS: [&str; 7] = [
    "username",
    "displayName",
    "age",
    "city",
    "website",
    "email",
    "cover",
];

/// 🧪 A fuzzy search request, decoded and ready to become a query body.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzySearch {
    /// The word to look for, already stripped of its leading marker character.
    pub word: String,
    pub from: u64,
    pub size: u64,
}

impl FuzzySearch {
    /// 🔡 Build a search from the raw path word. The first character is a caller-side
    /// marker and is dropped (by char, so multi-byte words survive the haircut).
    pub fn from_raw_word(raw_word: &str, from: u64, size: u64) -> Self {
        let mut chars = raw_word.chars();
        chars.next();
        Self {
            word: chars.as_str().to_string(),
            from,
            size,
        }
    }

    /// 🔍 The word with its spaces squeezed out, for callers who typed "face book".
    pub fn compact_word(&self) -> String {
        self.word.replace(' ', "")
    }

    /// 📜 Render the full `_search` body: bool/should over names, categories and developer,
    /// with the score multiplied by log1p(site_views) * 0.1.
    pub fn to_body(&self) -> Value {
        json!({
            "from": self.from,
            "size": self.size,
            "query": {
                "function_score": {
                    "query": {
                        "bool": {
                            "should": [
                                {
                                    "bool": {
                                        "should": [
                                            {
                                                "multi_match": {
                                                    "query": self.word,
                                                    "fields": ["name", "name_fa"],
                                                    "fuzziness": "AUTO",
                                                    "boost": 2
                                                }
                                            },
                                            {
                                                "multi_match": {
                                                    "query": self.compact_word(),
                                                    "fields": ["name", "name_fa"],
                                                    "fuzziness": "AUTO",
                                                    "boost": 2
                                                }
                                            }
                                        ]
                                    }
                                },
                                {
                                    "multi_match": {
                                        "query": self.word,
                                        "fields": ["category_name", "category_name_fa"],
                                        "type": "phrase",
                                        "minimum_should_match": "100%",
                                        "operator": "and",
                                        "boost": 50
                                    }
                                },
                                {
                                    "match": {
                                        "website_developer": {
                                            "query": self.word,
                                            "minimum_should_match": "100%",
                                            "operator": "and",
                                            "boost": 1
                                        }
                                    }
                                }
                            ]
                        }
                    },
                    "field_value_factor": {
                        "field": "site_views",
                        "modifier": "log1p",
                        "factor": 0.1
                    },
                    "boost_mode": "multiply"
                }
            }
        })
    }
}

/// ✂️ Trim a hit down to the allow-list. Missing allow-listed fields show up as null,
/// so every row has the same shape. Consistency is a feature. So is privacy.
pub fn project_search_hit(source: &Fields) -> Value {
    let projected: Map<String, Value> = SEARCH_RESULT_FIELDS
        .iter()
        .map(|field| {
            (
                field.to_string(),
                source.get(*field).cloned().unwrap_or(Value::Null),
            )
        })
        .collect();
    Value::Object(projected)
}

/// 🏗️ The schema every import run builds its fresh index with.
///
/// Synonym filters for the latin and farsi website names, an analyzer for each,
/// and a mapping that wires the two name fields to them under the run's type.
pub fn index_schema(doc_type: &str, import_config: &ImportConfig) -> Value {
    let mut mappings = Map::new();
    mappings.insert(
        doc_type.to_string(),
        json!({
            "properties": {
                "website_name": {
                    "type": "text",
                    "analyzer": "analyzer_websitename"
                },
                "website_name_fa": {
                    "type": "text",
                    "analyzer": "analyzer_websitenamefa"
                }
            }
        }),
    );

    json!({
        "settings": {
            "analysis": {
                "filter": {
                    "filter_websitename": {
                        "type": "synonym",
                        "synonyms_path": import_config.name_synonyms_path
                    },
                    "filter_websitenamefa": {
                        "type": "synonym",
                        "synonyms_path": import_config.name_fa_synonyms_path
                    }
                },
                "analyzer": {
                    "analyzer_websitename": {
                        "tokenizer": "standard",
                        "filter": ["filter_websitename", "lowercase"]
                    },
                    "analyzer_websitenamefa": {
                        "tokenizer": "standard",
                        "filter": ["filter_websitenamefa"]
                    }
                }
            }
        },
        "mappings": Value::Object(mappings)
    })
}
