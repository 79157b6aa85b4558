use std::sync::Arc;

use chunkmesh::chunks::HashChunkSystem;
use chunkmesh::cluster::buffer::BufferPool;
use chunkmesh::cluster::client::ChunkClient;
use chunkmesh::cluster::handlers as cluster_handlers;
use chunkmesh::cluster::system::DistributedChunkSystem;
use chunkmesh::config::Config;
use chunkmesh::membership::service::MembershipService;
use chunkmesh::meta::handlers as meta_handlers;
use chunkmesh::meta::{FsMetaStore, MetaStore};
use chunkmesh::ring::HashRing;

const VIRTUAL_REPLICAS: usize = 20;
const BUFFER_POOL_IDLE: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config = Config::load(&args[i + 1])?;
                i += 2;
            }
            "--name" => {
                config.name = args[i + 1].clone();
                i += 2;
            }
            "--bind" => {
                config.bind = args[i + 1].parse()?;
                i += 2;
            }
            "--seed" => {
                config.seeds.push(args[i + 1].parse()?);
                i += 2;
            }
            "--root" => {
                config.root = args[i + 1].clone();
                i += 2;
            }
            "--meta-root" => {
                config.meta_root = args[i + 1].clone();
                i += 2;
            }
            "--capacity" => {
                config.capacity = args[i + 1].parse()?;
                i += 2;
            }
            "--replicas" => {
                config.replica_factor = args[i + 1].parse()?;
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: {} [--config <file>] [--name <name>] [--bind <addr:port>] \
                     [--seed <addr:port>]... [--root <dir>] [--meta-root <dir>] \
                     [--capacity <bytes>] [--replicas <n>]",
                    args[0]
                );
                eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
                eprintln!(
                    "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
                    args[0]
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let level: tracing::Level = config.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting node {:?} on {}", config.name, config.bind);
    if !config.seeds.is_empty() {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Ring + membership (UDP gossip):
    let ring = Arc::new(HashRing::new(VIRTUAL_REPLICAS));
    let membership = MembershipService::new(
        &config.name,
        config.bind,
        config.seeds.clone(),
        ring.clone(),
    )
    .await?;
    tracing::info!("Node ID: {:?}", membership.local_node.id);

    // 2. Storage layer:
    let local = Arc::new(HashChunkSystem::open(&config.root, config.capacity).await?);
    tracing::info!(
        "Local store at {:?}: {} / {} bytes occupied",
        local.root(),
        local.occupied(),
        local.capacity()
    );

    let pool = BufferPool::new(config.chunk_buffer_size, BUFFER_POOL_IDLE);
    let client = Arc::new(ChunkClient::new(config.chunk_buffer_size, pool.clone()));
    let system = Arc::new(DistributedChunkSystem::new(
        local,
        membership.view(),
        client,
        config.replica_factor,
    ));

    let meta: Arc<dyn MetaStore> = Arc::new(FsMetaStore::open(&config.meta_root).await?);

    // 3. HTTP Router:
    let app = cluster_handlers::router(system.clone(), pool).merge(meta_handlers::router(meta));

    // 4. Spawn membership service:
    let service_clone = membership.clone();
    tokio::spawn(async move {
        service_clone.start().await;
    });

    // 5. Spawn stats reporter:
    let stats_membership = membership.clone();
    let stats_system = system.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let alive = stats_membership.get_alive_members();
            tracing::info!(
                "Cluster stats: {} alive nodes, {} / {} bytes occupied",
                alive.len(),
                stats_system.local().occupied(),
                stats_system.local().capacity()
            );
            for node in alive {
                tracing::info!(
                    "  - {:?} gossip={} http={} (inc={})",
                    node.id,
                    node.gossip_addr,
                    node.http_addr,
                    node.incarnation
                );
            }
        }
    });

    // 6. Start HTTP server. The advertised address is derived from the
    // resolved gossip address, which may differ from the configured one
    // when binding to port 0.
    let http_addr = membership.local_node.http_addr;

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
