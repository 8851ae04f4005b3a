//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. An import run is on
//! batch 312 of 400. The alias still points at last month's index, exactly
//! as it should. Nobody is awake to appreciate this. The cluster does not
//! need appreciation. It needs NDJSON.
//!
//! 🚀 This module is the HTTP client half of the gateway: point reads and
//! writes, the fuzzy `_search`, `_bulk`, index lifecycle, and `_aliases`.
//! It speaks the typed (index/type/id) REST dialect.
//!
//! ⚠️ Nothing in here retries. A failure is reported once, with context, and
//! then it's somebody else's 3am. 🦆

// 🔧 Duration, for the two timeouts. A cluster that never answers is still an answer, eventually.
use std::time::Duration;

// 💀 anyhow: every failure in here leaves with a context message and a sad little story.
use anyhow::{Context, Result};
// 🧵 async_trait, so the trait can be async and dyn-friendly without us hand-pinning futures.
use async_trait::async_trait;
// 🔡 Document ids are user input. User input contains slashes. Slashes are not path segments.
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
// 📡 reqwest: the courier. We write the letters ourselves and it just delivers them.
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
// 📜 serde_json: json! for bodies we send, Value for bodies we get back and poke at.
use serde_json::{Value, json};
// 🚀 tracing: the diary we keep for whoever is on call.
use tracing::{debug, trace, warn};

// 🏗️ Siblings and cousins from the rest of the crate.
use crate::backends::SearchEngine;
use crate::common::{AliasAction, BulkIndexOp, DocumentKey, Fields, GetOutcome, SearchHit};
use crate::templates::FuzzySearch;

/// 🔡 Everything except unreserved characters gets escaped inside a path segment.
/// A document id with a slash in it is an id, not a directory.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 📡 Where the cluster lives and how to get past its front door.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    /// 🔒 Username. The bouncer at the club. Except the club is a database.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key, the velvet rope variant of authentication. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// 🔧 10 seconds to shake hands. If ES can't handshake in 10 seconds, it's not having a good time.
fn default_connect_timeout_secs() -> u64 {
    10
}

// 🔧 30 seconds for a response, because bulk requests can be meaty and we're not monsters.
fn default_request_timeout_secs() -> u64 {
    30
}

/// 📡 The gateway's line to a real cluster. One `reqwest::Client`, reused for everything.
#[derive(Debug)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchBackend {
    /// 🚀 Build the HTTP client and ping the cluster root so we fail loudly at startup,
    /// not quietly on the first import batch.
    pub async fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing cert or a cursed system OpenSSL. Either way: tragic.")?;

        let backend = Self { client, config };

        let response = backend
            .request(Method::GET, backend.url(&[]))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Tried to say hello to Elasticsearch at '{}'. Got ghosted. Check that the cluster is up and the URL is right.",
                    backend.config.url
                )
            })?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "💀 Elasticsearch at '{}' answered the hello with '{}'. Credentials, maybe? It's usually credentials.",
                backend.config.url,
                status
            );
        }
        debug!("✅ Elasticsearch at '{}' is home and taking visitors", backend.config.url);

        Ok(backend)
    }

    /// 📡 Join the base URL with escaped path segments.
    /// trim_end_matches('/'): one slash of difference, infinite suffering of difference.
    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.url.trim_end_matches('/').to_string();
        url.push('/');
        let escaped: Vec<String> = segments
            .iter()
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect();
        url.push_str(&escaped.join("/"));
        url
    }

    /// 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let request = self.client.request(method, url);
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📨 Send a JSON (or bodiless) request and hand back status + parsed body.
    async fn send(&self, method: Method, url: String, body: Option<&Value>, what: &str) -> Result<(StatusCode, Value)> {
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(serde_json::to_vec(body).context("💀 Could not serialize the request body")?);
        }
        // 📨 Off it goes. Whatever comes back, comes back as (status, json).
        let response = request
            .send()
            .await
            .with_context(|| format!("💀 The {what} request never made it to Elasticsearch. The network is not vibing with it."))?;
        read_json(response, what).await
    }
}

/// 🔍 Read a response body as JSON. An empty body (HEAD, some deletes) is `null`.
async fn read_json(response: reqwest::Response, what: &str) -> Result<(StatusCode, Value)> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("💀 The {what} response body evaporated mid-read"))?;
    if text.trim().is_empty() {
        return Ok((status, Value::Null));
    }
    let body = serde_json::from_str(&text).with_context(|| {
        format!("💀 The {what} response was not JSON (status '{status}'). It read: '{text}'")
    })?;
    Ok((status, body))
}

/// 💀 Turn a non-2xx into an error that actually says what happened.
fn ensure_success(status: StatusCode, body: &Value, what: &str) -> Result<()> {
    if !status.is_success() {
        anyhow::bail!(
            "💀 The {what} request arrived, but Elasticsearch said '{status}'. The body of the response read: '{body}'"
        );
    }
    Ok(())
}

fn version_of(body: &Value, what: &str) -> Result<u64> {
    body.get("_version")
        .and_then(Value::as_u64)
        .with_context(|| format!("💀 The {what} response carried no _version. It read: '{body}'"))
}

/// 📜 Render bulk index ops as NDJSON: action line, source line, repeat, trailing newline.
///
/// ⚠️ The trailing newline is not optional. `_bulk` will reject the last line without it.
pub(crate) fn render_bulk_body(ops: &[BulkIndexOp]) -> Result<String> {
    let mut body = String::new();
    for op in ops {
        let action = json!({
            "index": {
                "_index": op.key.index,
                "_type": op.key.doc_type,
                "_id": op.key.id,
            }
        });
        body.push_str(&serde_json::to_string(&action).context("💀 Could not serialize a bulk action line")?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&op.source).context("💀 Could not serialize a bulk source line")?);
        body.push('\n');
    }
    Ok(body)
}

fn hits_of(body: &Value) -> Vec<SearchHit> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| SearchHit {
                    id: hit
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source: hit
                        .get("_source")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchEngine for ElasticsearchBackend {
    async fn index(&self, key: &DocumentKey, body: &Fields) -> Result<u64> {
        let url = self.url(&[&key.index, &key.doc_type, &key.id]);
        let (status, response) = self
            .send(Method::PUT, url, Some(&Value::Object(body.clone())), "index")
            .await?;
        ensure_success(status, &response, "index")?;
        version_of(&response, "index")
    }

    async fn update(&self, key: &DocumentKey, partial: &Fields) -> Result<u64> {
        let url = self.url(&[&key.index, &key.doc_type, &key.id, "_update"]);
        let body = json!({ "doc": partial });
        let (status, response) = self.send(Method::POST, url, Some(&body), "update").await?;
        ensure_success(status, &response, "update")?;
        version_of(&response, "update")
    }

    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        let url = self.url(&[&key.index, &key.doc_type, &key.id]);
        let (status, response) = self.send(Method::GET, url, None, "get").await?;
        // 🔍 404 is an answer, not an error. Missing doc or missing index: either way, not found.
        if status == StatusCode::NOT_FOUND {
            return Ok(GetOutcome::default());
        }
        ensure_success(status, &response, "get")?;
        let found = response.get("found").and_then(Value::as_bool).unwrap_or(false);
        let source = response.get("_source").and_then(Value::as_object).cloned();
        Ok(GetOutcome { found, source })
    }

    async fn delete(&self, key: &DocumentKey) -> Result<()> {
        let url = self.url(&[&key.index, &key.doc_type, &key.id]);
        let (status, response) = self.send(Method::DELETE, url, None, "delete").await?;
        if status == StatusCode::NOT_FOUND {
            debug!("🗑️ '{}' was already gone by the time we came to delete it", key.id);
            return Ok(());
        }
        ensure_success(status, &response, "delete")
    }

    async fn search(&self, index: &str, doc_type: &str, query: &FuzzySearch) -> Result<Vec<SearchHit>> {
        let url = self.url(&[index, doc_type, "_search"]);
        let (status, response) = self
            .send(Method::POST, url, Some(&query.to_body()), "search")
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        ensure_success(status, &response, "search")?;
        Ok(hits_of(&response))
    }

    async fn bulk(&self, ops: &[BulkIndexOp]) -> Result<()> {
        let payload = render_bulk_body(ops)?;
        trace!("📡 Sending {} bytes to /_bulk — the payload has left the building", payload.len());
        let response = self
            .request(Method::POST, self.url(&["_bulk"]))
            // ⚠️ application/x-ndjson, not application/json. ES has feelings about this.
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts, and check your feelings.")?;
        let (status, body) = read_json(response, "bulk").await?;
        ensure_success(status, &body, "bulk")?;

        // ⚠️ A 200 from _bulk only means the envelope arrived. The items inside can still have failed.
        if body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let failed = body
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| item.pointer("/index/error").is_some())
                        .count()
                })
                .unwrap_or(0);
            warn!("⚠️ _bulk accepted the request but {} of {} items failed", failed, ops.len());
        }
        Ok(())
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<()> {
        let (status, response) = self
            .send(Method::PUT, self.url(&[index]), Some(schema), "create index")
            .await?;
        ensure_success(status, &response, "create index")?;
        debug!("🏗️ Index '{}' has been born, schema and all", index);
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let (status, response) = self.send(Method::HEAD, self.url(&[index]), None, "index exists").await?;
        // 🔍 HEAD has no body. The status code is the whole conversation.
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                ensure_success(status, &response, "index exists")?;
                Ok(true)
            }
        }
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let (status, response) = self
            .send(Method::DELETE, self.url(&[index]), None, "delete index")
            .await?;
        ensure_success(status, &response, "delete index")?;
        Ok(response
            .get("acknowledged")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let body = json!({ "actions": actions });
        let (status, response) = self
            .send(Method::POST, self.url(&["_aliases"]), Some(&body), "update aliases")
            .await?;
        ensure_success(status, &response, "update aliases")
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        let (status, response) = self
            .send(Method::GET, self.url(&["_alias", alias]), None, "get alias")
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        ensure_success(status, &response, "get alias")?;
        // 🏷️ The response is keyed by index name, with the alias tucked inside. We only want the keys.
        let mut indices: Vec<String> = response
            .as_object()
            .map(|by_index| by_index.keys().cloned().collect())
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend_for(server: &MockServer) -> ElasticsearchBackend {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tagline": "You Know, for Search"})))
            .mount(server)
            .await;

        ElasticsearchBackend::new(ElasticsearchConfig {
            url: format!("{}/", server.uri()),
            username: None,
            password: None,
            api_key: Some("sekrit".into()),
            connect_timeout_secs: 1,
            request_timeout_secs: 2,
        })
        .await
        .expect("💀 the mock cluster said hello, so construction should succeed")
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().expect("💀 fixture must be an object")
    }

    #[tokio::test]
    async fn the_one_where_a_put_brings_back_a_version_number() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("PUT"))
            .and(path("/people/person/42"))
            .and(header("Authorization", "ApiKey sekrit"))
            .and(body_json(json!({"name": "john"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_version": 3, "result": "updated"})))
            .expect(1)
            .mount(&server)
            .await;

        let version = backend
            .index(&DocumentKey::new("people", "person", "42"), &fields(json!({"name": "john"})))
            .await
            .expect("💀 index should succeed against the mock");
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn the_one_where_update_wraps_the_fields_in_a_doc() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/people/person/42/_update"))
            .and(body_json(json!({"doc": {"city": "Tehran"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_version": 4})))
            .expect(1)
            .mount(&server)
            .await;

        let version = backend
            .update(&DocumentKey::new("people", "person", "42"), &fields(json!({"city": "Tehran"})))
            .await
            .expect("💀 update should succeed against the mock");
        assert_eq!(version, 4);
    }

    #[tokio::test]
    async fn the_one_where_a_404_get_is_just_not_found() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/people/person/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"found": false})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/people/person/real"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"found": true, "_source": {"name": "real"}})),
            )
            .mount(&server)
            .await;

        let ghost = backend
            .get(&DocumentKey::new("people", "person", "ghost"))
            .await
            .expect("💀 a 404 get is not an error");
        assert!(!ghost.found);

        let real = backend
            .get(&DocumentKey::new("people", "person", "real"))
            .await
            .expect("💀 a 200 get should parse");
        assert!(real.found);
        assert_eq!(real.source, Some(fields(json!({"name": "real"}))));
    }

    #[tokio::test]
    async fn the_one_where_ids_with_slashes_stay_in_one_segment() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/people/person/a%2Fb%20c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        backend
            .delete(&DocumentKey::new("people", "person", "a/b c"))
            .await
            .expect("💀 delete should hit the escaped path");
    }

    #[tokio::test]
    async fn the_one_where_search_posts_the_fuzzy_body_and_reads_hits() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;
        let query = FuzzySearch::from_raw_word("!john", 0, 10);

        Mock::given(method("POST"))
            .and(path("/websites/website/_search"))
            .and(body_json(query.to_body()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {"total": 1, "hits": [{"_id": "7", "_source": {"username": "john"}}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits = backend
            .search("websites", "website", &query)
            .await
            .expect("💀 search should succeed against the mock");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "7");
        assert_eq!(hits[0].source["username"], "john");
    }

    #[tokio::test]
    async fn the_one_where_bulk_speaks_ndjson_and_survives_item_errors() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;
        let ops = vec![BulkIndexOp {
            key: DocumentKey::new("idx1", "website", "1"),
            source: fields(json!({"email": "a@b.c"})),
        }];

        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(body_string(
                "{\"index\":{\"_id\":\"1\",\"_index\":\"idx1\",\"_type\":\"website\"}}\n{\"email\":\"a@b.c\"}\n",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"_id": "1", "status": 400, "error": {"type": "mapper_parsing_exception"}}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        backend
            .bulk(&ops)
            .await
            .expect("💀 per-item failures are logged, not surfaced");
    }

    #[tokio::test]
    async fn the_one_where_index_lifecycle_and_aliases_hit_the_right_endpoints() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("HEAD"))
            .and(path("/idx1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/idx1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_aliases"))
            .and(body_json(json!({"actions": [
                {"remove": {"index": "idx1", "alias": "websites"}},
                {"add": {"index": "idx2", "alias": "websites"}}
            ]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_alias/websites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"idx2": {"aliases": {"websites": {}}}})))
            .mount(&server)
            .await;

        assert!(backend.index_exists("idx1").await.expect("💀 HEAD 200"));
        assert!(!backend.index_exists("nope").await.expect("💀 HEAD 404"));
        assert!(backend.delete_index("idx1").await.expect("💀 delete index"));
        backend
            .update_aliases(&[
                AliasAction::Remove {
                    index: "idx1".into(),
                    alias: "websites".into(),
                },
                AliasAction::Add {
                    index: "idx2".into(),
                    alias: "websites".into(),
                },
            ])
            .await
            .expect("💀 alias swap should be one request");
        assert_eq!(
            backend.alias_targets("websites").await.expect("💀 alias lookup"),
            vec!["idx2".to_string()]
        );
    }

    #[tokio::test]
    async fn the_one_where_a_cranky_cluster_becomes_an_error_with_context() {
        let server = MockServer::start().await;
        let backend = backend_for(&server).await;

        Mock::given(method("PUT"))
            .and(path("/idx1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "resource_already_exists_exception"}
            })))
            .mount(&server)
            .await;

        let err = backend
            .create_index("idx1", &json!({}))
            .await
            .expect_err("💀 a 400 must not be mistaken for success");
        assert!(err.to_string().contains("resource_already_exists_exception"));
    }
}
