use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use visit_cache::config::AppConfig;
use visit_cache::server::{parse_ids, SharedStore, VisitServer};
use visit_cache::store::{LogStore, MutableDocumentStore};
use visit_cache::VisitCache;

#[derive(Parser)]
#[command(name = "visit-cache", version, about = "Compressed read-through cache for batched document visits")]
struct Cli {
    /// TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖 [store] data_dir
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 覆盖 [cache] capacity_bytes
    #[arg(long, global = true)]
    capacity_bytes: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 启动 HTTP visit 服务
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// 把文件内容写入文档日志
    Put { id: u32, file: PathBuf },
    /// 读取一批文档（逗号分隔 id）并打印
    Get { ids: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        cfg.store.data_dir = dir;
    }
    if let Some(cap) = cli.capacity_bytes {
        cfg.cache.capacity_bytes = cap;
    }
    cfg.validate()?;

    let store: SharedStore = Arc::new(LogStore::open_in_dir(&cfg.store.data_dir)?);

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(cfg.server.port);
            let cache = Arc::new(VisitCache::new(store, &cfg.cache));
            let server = VisitServer::new(cache.clone());

            info!("Starting visit-cache on {}:{}", cfg.server.bind, port);
            let bind = cfg.server.bind.clone();
            let handle = tokio::spawn(async move { server.run(&bind, port).await });

            // 优雅退出处理
            tokio::select! {
                res = handle => res??,
                _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
            }
            println!("{}", cache.stats());
        }
        Command::Put { id, file } => {
            let body = std::fs::read(&file)?;
            store.put(id, &body)?;
            info!("Stored doc {} ({} bytes) from {:?}", id, body.len(), file);
        }
        Command::Get { ids } => {
            let ids = parse_ids(&ids).map_err(|_| anyhow::anyhow!("invalid id list: {ids}"))?;
            let cache = VisitCache::new(store, &cfg.cache);
            let blobs = cache.read(&ids)?;
            for (id, body) in blobs.decompress()?.iter() {
                println!("{}\t{}", id, String::from_utf8_lossy(body));
            }
        }
    }

    Ok(())
}
