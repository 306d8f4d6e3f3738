//! Diagnostic command line / 诊断命令行
//!
//! Drives the sync engine against a real cache database and the remote
//! catalog. Not a product surface; useful for inspecting what the engine
//! emits.
//!
//! Usage / 用法:
//!   hymnsync get <prefix> <number>   e.g. `hymnsync get h 1151`
//!   hymnsync search <query...>       e.g. `hymnsync search amazing grace`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hymnsync::config;
use hymnsync::models::{HymnIdentifier, HymnType, Language};
use hymnsync::repository::HymnRepository;
use hymnsync::search::SearchCoordinator;
use hymnsync::{HymnalNetClient, SqliteCacheStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hymnsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "hymnsync {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    let config = config::load_config().map_err(|e| anyhow!(e))?;
    let cache = Arc::new(SqliteCacheStore::open(&config.get_database_path()).await);
    let remote = Arc::new(HymnalNetClient::new(&config.remote).map_err(|e| anyhow!(e))?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        Some((cmd, rest)) if cmd == "get" => {
            let [prefix, number] = rest else {
                bail!("usage: hymnsync get <prefix> <number>");
            };
            let hymn_type = HymnType::from_prefix(prefix)
                .ok_or_else(|| anyhow!("unknown catalog prefix: {}", prefix))?;
            let id = HymnIdentifier::new(hymn_type, number.as_str());

            let repository = HymnRepository::new(cache, remote);
            let mut stream = repository.get_hymn(&id, true);
            while let Some(update) = stream.next().await {
                match update {
                    Ok(Some(hymn)) => {
                        println!("== {} — {}", hymn.identifier, hymn.title);
                        for verse in &hymn.verses {
                            println!("  [{:?}]", verse.verse_type);
                            for line in &verse.lines {
                                println!("    {}", line);
                            }
                        }
                    }
                    Ok(None) => println!("== {} — (nothing cached yet)", id),
                    Err(e) => println!("== {} — error: {}", id, e),
                }
            }
        }
        Some((cmd, rest)) if cmd == "search" => {
            if rest.is_empty() {
                bail!("usage: hymnsync search <query...>");
            }
            let query = rest.join(" ");

            let coordinator = SearchCoordinator::new(
                cache,
                remote,
                config.tuning.clone(),
                Language::English,
            );
            let mut results = coordinator.subscribe();
            coordinator.set_query(&query);

            // 两次发射（本地+远端）后即可退出；超时兜底
            for _ in 0..2 {
                match tokio::time::timeout(Duration::from_secs(10), results.next()).await {
                    Ok(Some(page)) => {
                        println!(
                            "-- {} results (more pages: {})",
                            page.results.len(),
                            page.has_more_pages
                        );
                        for hit in &page.results {
                            println!("  {:<10} {}", hit.identifier.to_string(), hit.title);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!("No further emissions within 10s, giving up");
                        break;
                    }
                }
            }
        }
        _ => {
            bail!("usage: hymnsync <get|search> ...");
        }
    }

    Ok(())
}
