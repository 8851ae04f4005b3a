//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchConfig;
use crate::session::SessionConfig;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

/// 🌐 Where we listen, what prefix we answer to, and who gets past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// 🚪 First path segment of every call, e.g. `/api/select/...`.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// 🔒 Callers outside this list get "Really?!" and nothing else.
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<IpAddr>,
    /// 📦 Biggest request body we'll read. Import batches can be chunky.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080)
}

fn default_path_prefix() -> String {
    "api".to_string()
}

fn default_allowed_ips() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]
}

// 📦 64MB, because the Elasticsearch docs said "up to 100MB" and we wanted buffer room
fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path_prefix: default_path_prefix(),
            allowed_ips: default_allowed_ips(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// 🎭 Which search engine is on duty tonight.
///
/// `InMemory` is the default because it needs nothing but RAM and optimism.
/// Production wants `[backend.Elasticsearch]`. Production always wants more.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum BackendConfig {
    Elasticsearch(ElasticsearchConfig),
    #[default]
    InMemory,
}

/// 📦 Knobs for the staged import: which alias readers follow, and where the synonyms live.
#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_alias")]
    pub alias: String,
    #[serde(default = "default_name_synonyms_path")]
    pub name_synonyms_path: String,
    #[serde(default = "default_name_fa_synonyms_path")]
    pub name_fa_synonyms_path: String,
}

fn default_alias() -> String {
    "websites".to_string()
}

fn default_name_synonyms_path() -> String {
    "synonyms_websitename.txt".to_string()
}

fn default_name_fa_synonyms_path() -> String {
    "synonyms_websitenamefa.txt".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            alias: default_alias(),
            name_synonyms_path: default_name_synonyms_path(),
            name_fa_synonyms_path: default_name_fa_synonyms_path(),
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`ESGATE_*`, nested keys split on `__`) with an
/// optional TOML file. TOML wins on conflicts.
///   - `None` → env vars only. No file. No assumptions.
///   - `Some` → env vars + TOML file, merged.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESGATE_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESGATE_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESGATE_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_every_section_shows_up_dressed_for_production() {
        let config_file = write_test_config(
            r#"
            [server]
            bind = "0.0.0.0:9200"
            path_prefix = "rpc"
            allowed_ips = ["10.0.0.7"]

            [backend.Elasticsearch]
            url = "http://search.internal:9200"
            username = "elastic"
            password = "changeme"
            request_timeout_secs = 5

            [session.File]
            path = "/var/lib/esgate/session.json"
            ttl_secs = 60

            [import]
            alias = "sites"
            "#,
        );

        let app_config = load_config(Some(config_file.path()))
            .expect("💀 A fully populated config should parse. No excuses.");

        assert_eq!(app_config.server.bind.port(), 9200);
        assert_eq!(app_config.server.path_prefix, "rpc");
        assert_eq!(
            app_config.server.allowed_ips,
            vec!["10.0.0.7".parse::<IpAddr>().expect("💀 valid ip")]
        );
        match app_config.backend {
            BackendConfig::Elasticsearch(es) => {
                assert_eq!(es.url, "http://search.internal:9200");
                assert_eq!(es.username.as_deref(), Some("elastic"));
                assert_eq!(es.request_timeout_secs, 5);
                assert_eq!(es.connect_timeout_secs, 10);
            }
            honestly_who_knows => panic!(
                "💀 Expected an Elasticsearch backend, serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
        match app_config.session {
            SessionConfig::File(file) => {
                assert_eq!(file.ttl_secs, 60);
                assert_eq!(file.path, Path::new("/var/lib/esgate/session.json"));
            }
            honestly_who_knows => panic!("💀 Expected a File session, got {:?}", honestly_who_knows),
        }
        assert_eq!(app_config.import.alias, "sites");
        assert_eq!(app_config.import.name_synonyms_path, "synonyms_websitename.txt");
    }

    #[test]
    fn the_one_where_an_empty_file_still_gets_a_working_gateway() {
        let config_file = write_test_config("");

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(config_file.path()))
            .extract()
            .expect("💀 Defaults should carry an empty config. Serde left us on read otherwise.");

        assert_eq!(app_config.server.bind, default_bind());
        assert_eq!(app_config.server.path_prefix, "api");
        assert_eq!(app_config.server.allowed_ips.len(), 2);
        assert_eq!(app_config.server.max_body_bytes, 64 * 1024 * 1024);
        assert!(matches!(app_config.backend, BackendConfig::InMemory));
        assert!(matches!(app_config.session, SessionConfig::InMemory(_)));
        assert_eq!(app_config.session.ttl_secs(), 2_678_400);
        assert_eq!(app_config.import.alias, "websites");
    }

    #[test]
    fn the_one_where_the_in_memory_backend_is_just_a_word() {
        let config_file = write_test_config(
            r#"
            backend = "InMemory"

            [session.InMemory]
            ttl_secs = 30
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(config_file.path()))
            .extract()
            .expect("💀 A unit backend variant should parse from a bare string.");

        assert!(matches!(app_config.backend, BackendConfig::InMemory));
        assert_eq!(app_config.session.ttl_secs(), 30);
    }
}
