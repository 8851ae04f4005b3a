//! 🚀 esgate-cli — the front door, the bouncer, the maitre d' of esgate.
//!
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the real code do the heavy lifting.
//! Like a manager. 🦆

// 🌐 SocketAddr for --bind, PathBuf for --config. The two knobs worth a flag.
use std::net::SocketAddr;
use std::path::PathBuf;

// 💀 anyhow: main returns Result, and Result needs somewhere to put its feelings.
use anyhow::{Context, Result};
// 🎛️ clap derive: write a struct, get a --help for free. Best deal in the crate graph.
use clap::Parser;
// 📡 error! is the only macro main needs. Everything else happens down in the library.
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🔧 Default config file, used only when it actually exists.
const DEFAULT_CONFIG_FILE: &str = "esgate.toml";

#[derive(Parser, Debug)]
#[command(name = "esgate")]
#[command(about = "URL-path RPC gateway in front of Elasticsearch")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML). Environment variables (ESGATE_*) are always read.
    #[arg(short, long, env = "ESGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.bind`
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

/// 🚀 main(). Where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Serve (send it and pray 🙏)
/// 5. Handle errors (cry, but with a helpful hint)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing: RUST_LOG if you have opinions, `info` if you don't
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 🎛️ Flags first. clap exits on its own for --help and --version, no questions asked.
    let args = Args::parse();

    // 🔒 An explicit config path must exist. The default one is optional, like dessert.
    let config_file = match args.config {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!(
                    "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
                    path.display()
                )
            })?;
            if !exists {
                anyhow::bail!(
                    "💀 Configuration file '{}' does not exist. If it's a relative path, remember it's relative to the current directory.",
                    path.display()
                );
            }
            Some(path)
        }
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.is_file().then_some(fallback)
        }
    };

    let mut app_config = esgate::app_config::load_config(config_file.as_deref())
        .context("💀 In esgate-cli, main, we couldn't load the config. Take a look at the file and the ESGATE_* variables.")?;
    // 🔧 A flag on the command line beats whatever the file and the environment agreed on.
    if let Some(bind) = args.bind {
        app_config.server.bind = bind;
    }

    let result = esgate::run(app_config).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Double-check `backend.Elasticsearch.url` and that the cluster is actually running. \
                If you're using Docker, try `docker ps` to see what's up. ☕"
            );
        }

        // 🛑 Non-zero, so whatever supervises us knows it went badly.
        std::process::exit(1);
    }

    Ok(())
}
