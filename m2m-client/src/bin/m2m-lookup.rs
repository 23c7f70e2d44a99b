/// Inventory lookup tool - resolves scene identifiers through the cache
///
/// Usage: m2m-lookup <available|convert|verify|download> [SCENE_ID...]
///
/// Connection settings come from the M2M_* environment variables. Set
/// M2M_CACHE_DIR to share an LMDB cache between runs; otherwise an
/// in-memory cache is used.

use std::collections::BTreeMap;
use std::sync::Arc;

use m2m_cache::{CacheBackend, InMemoryCacheBackend, LmdbCacheBackend};
use m2m_client::{init_tracing, InventoryService, TelemetryConfig};
use m2m_core::{InventoryConfig, M2mError, ProductType, SceneId};

const LMDB_SIZE_MB: usize = 64;

fn usage() -> ! {
    eprintln!("Usage: m2m-lookup <available|convert|verify|download> [SCENE_ID...]");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  m2m-lookup convert LC08_L1TP_044034_20130330_20170310_01_T1");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().cloned() else {
        usage();
    };
    let ids: Vec<SceneId> = args[1..].iter().map(|s| SceneId::new(s.as_str())).collect();

    if let Err(e) = init_tracing(&TelemetryConfig::default()) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    let config = match InventoryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match std::env::var("M2M_CACHE_DIR") {
        Ok(dir) => match LmdbCacheBackend::new(&dir, LMDB_SIZE_MB) {
            Ok(backend) => run(config, Arc::new(backend), &command, &ids).await,
            Err(e) => Err(M2mError::from(e)),
        },
        Err(_) => run(config, Arc::new(InMemoryCacheBackend::new()), &command, &ids).await,
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run<C: CacheBackend>(
    config: InventoryConfig,
    backend: Arc<C>,
    command: &str,
    ids: &[SceneId],
) -> Result<String, M2mError> {
    let service = InventoryService::connect(config, backend)?;

    let output = match command {
        "available" => serde_json::json!({ "available": service.available().await? }),
        "convert" => {
            let token = service.session().await?;
            let converted: BTreeMap<_, _> = service.convert(&token, ids).await?.into_iter().collect();
            serde_json::json!(converted)
        }
        "verify" => {
            let token = service.session().await?;
            let verified: BTreeMap<_, _> =
                service.verify_scenes(&token, ids).await?.into_iter().collect();
            serde_json::json!(verified)
        }
        "download" => {
            let token = service.session().await?;
            let urls: BTreeMap<_, _> = service
                .download_urls(&token, ids, &ProductType::STANDARD)
                .await?
                .into_iter()
                .collect();
            serde_json::json!(urls)
        }
        _ => usage(),
    };

    Ok(serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string()))
}
