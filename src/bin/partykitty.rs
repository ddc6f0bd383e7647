use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use partykitty::kitty::{
    DictionaryNameAllocator, KittyConfig, KittyHttpState, KittyService, MemoryStore, NameAllocator,
};

#[derive(Debug, Parser)]
#[command(name = "partykitty", version, about = "Shared kitty ledger server")]
struct Args {
    /// Config file (.json, .toml, or .yaml with `config-yaml`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,
    /// SQLite database; the in-memory store is used when omitted.
    #[arg(long)]
    sqlite: Option<PathBuf>,
    /// Overrides `names.word_list` from the config.
    #[arg(long)]
    word_list: Option<PathBuf>,
    #[arg(long)]
    json_logs: bool,
    #[arg(long)]
    otel: bool,
    #[arg(long)]
    otel_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _otel_guard = init_logging(&args)?;

    let mut config = match &args.config {
        Some(path) => KittyConfig::load(path)?,
        None => KittyConfig::default(),
    };
    if let Some(word_list) = &args.word_list {
        config.names.word_list = word_list.clone();
    }

    let names: Arc<dyn NameAllocator> = Arc::new(DictionaryNameAllocator::from_file(
        &config.names.word_list,
        config.names.min_word_len,
        config.names.max_word_len,
    )?);
    let service = build_service(&config, args.sqlite.clone(), names).await?;

    let state = KittyHttpState::new(Arc::new(service)).with_http_config(&config.http);
    let app = partykitty::kitty::http::router(state);
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!(listen = %args.listen, "partykitty listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(feature = "store-sqlite")]
async fn build_service(
    config: &KittyConfig,
    sqlite: Option<PathBuf>,
    names: Arc<dyn NameAllocator>,
) -> Result<KittyService, Box<dyn std::error::Error>> {
    if let Some(path) = sqlite {
        let store = partykitty::kitty::SqliteStore::new(path);
        store.init().await?;
        tracing::info!(path = %store.path().display(), "using sqlite store");
        return Ok(KittyService::new(config, Arc::new(store), names));
    }
    Ok(memory_service(config, names))
}

#[cfg(not(feature = "store-sqlite"))]
async fn build_service(
    config: &KittyConfig,
    sqlite: Option<PathBuf>,
    names: Arc<dyn NameAllocator>,
) -> Result<KittyService, Box<dyn std::error::Error>> {
    if sqlite.is_some() {
        return Err("--sqlite requires `--features store-sqlite`".into());
    }
    Ok(memory_service(config, names))
}

fn memory_service(config: &KittyConfig, names: Arc<dyn NameAllocator>) -> KittyService {
    tracing::warn!("no --sqlite given; kitties are not persisted");
    KittyService::new(config, Arc::new(MemoryStore::new()), names)
}

#[cfg(feature = "otel")]
fn init_logging(
    args: &Args,
) -> Result<Option<partykitty::kitty::telemetry::OtelGuard>, Box<dyn std::error::Error>> {
    if !args.otel {
        partykitty::kitty::telemetry::init_tracing(args.json_logs)?;
        return Ok(None);
    }
    Ok(Some(partykitty::kitty::telemetry::init_otel_tracing(
        "partykitty",
        args.otel_endpoint.as_deref(),
        args.json_logs,
    )?))
}

#[cfg(not(feature = "otel"))]
fn init_logging(args: &Args) -> Result<Option<()>, Box<dyn std::error::Error>> {
    if args.otel || args.otel_endpoint.is_some() {
        return Err("otel requires `--features otel`".into());
    }
    partykitty::kitty::telemetry::init_tracing(args.json_logs)?;
    Ok(None)
}
