use autoshard::config::Config;
use autoshard::membership::service::MembershipService;
use autoshard::membership::types::NodeId;
use autoshard::peers::manager::ClusterManager;
use autoshard::peers::types::PeerState;
use autoshard::ring::server::ServerInstance;
use autoshard::storage::autosharded::AutoshardedStorage;
use autoshard::storage::handlers::{
    handle_create_record, handle_delete_record, handle_read_record, handle_update_record,
};
use autoshard::storage::local::LocalStorage;
use autoshard::storage::protocol::{
    ENDPOINT_CREATE_RECORD, ENDPOINT_DELETE_RECORD, ENDPOINT_READ_RECORD, ENDPOINT_UPDATE_RECORD,
};
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use sysinfo::System;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--name <storage>] [--data-dir <path>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut config = Config::from_env();
    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed_nodes.push(args[i + 1].parse()?);
                i += 2;
            }
            "--name" => {
                config.storage_name = args[i + 1].clone();
                i += 2;
            }
            "--data-dir" => {
                config.data_dir = args[i + 1].clone().into();
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    let http_addr = SocketAddr::new(bind_addr.ip(), bind_addr.port() + 1000);

    tracing::info!("Starting node on {}", bind_addr);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip) and the ring on top of it:
    let peer_state = Arc::new(PeerState::new());
    let ring_id = std::env::var("RING_ID")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(NodeId);

    let membership = match ring_id {
        Some(id) => {
            MembershipService::new_with_ring_id(id, bind_addr, http_addr, seed_nodes, peer_state.clone())
                .await?
        }
        None => {
            MembershipService::new(bind_addr, http_addr, seed_nodes, peer_state.clone()).await?
        }
    };
    tracing::info!("Node ring id: {}", membership.local_node.id);

    let server = ServerInstance::new(membership.clone());

    // 2. Storage layer:
    let local = LocalStorage::open(&config.data_dir, &config.storage_name)?;

    // Clusters that bypass ring routing must exist before the wrapper
    // resolves their names into ids.
    for cluster_name in &config.undistributable_clusters {
        if local.cluster_id_by_name(cluster_name).is_none() {
            local.add_cluster(cluster_name)?;
        }
    }

    let storage = AutoshardedStorage::new(
        server.clone(),
        local.clone(),
        &config.undistributable_clusters,
    );
    tracing::info!(
        "Storage '{}' ready (type {}, id {})",
        storage.name(),
        storage.storage_type(),
        storage.storage_id()
    );

    // 3. HTTP router:
    let app = Router::new()
        .route("/health/stats", get(handle_stats))
        .route(ENDPOINT_CREATE_RECORD, post(handle_create_record))
        .route(
            &format!("{}/:cluster_id/:cluster_position", ENDPOINT_READ_RECORD),
            get(handle_read_record),
        )
        .route(ENDPOINT_UPDATE_RECORD, post(handle_update_record))
        .route(ENDPOINT_DELETE_RECORD, post(handle_delete_record))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(Extension(membership.clone()))
        .layer(Extension(storage.clone()))
        .layer(Extension(peer_state.clone()));

    // 4. Spawn membership service:
    let service_clone = membership.clone();
    tokio::spawn(async move {
        service_clone.start().await;
    });

    // 5. Leader supervision:
    let manager = ClusterManager::new(membership.clone(), peer_state, config.heartbeat_delay_ms);
    manager.start();

    // 6. Stats reporter:
    let stats_membership = membership.clone();
    let stats_storage = storage.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let alive = stats_membership.get_alive_members();
            tracing::info!(
                "Ring stats: {} alive nodes, {} local records",
                alive.len(),
                stats_storage.count_records()
            );
            for node in alive {
                tracing::info!(
                    "  - {} gossip={} http={} (inc={})",
                    node.id,
                    node.gossip_addr,
                    node.http_addr,
                    node.incarnation
                );
            }
        }
    });

    // 7. Start HTTP server:
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize, Clone)]
struct NodeInfo {
    node_id: String,
    gossip_addr: String,
    http_addr: String,
}

#[derive(Serialize)]
struct NodeStatsResponse {
    node_id: String,
    storage_name: String,
    storage_type: String,
    alive_nodes: usize,
    nodes: Vec<NodeInfo>,
    clusters: usize,
    records: u64,
    leader: Option<String>,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

async fn handle_stats(
    Extension(membership): Extension<Arc<MembershipService>>,
    Extension(storage): Extension<Arc<AutoshardedStorage>>,
    Extension(peer_state): Extension<Arc<PeerState>>,
) -> Json<NodeStatsResponse> {
    let alive_members = membership.get_alive_members();
    let nodes: Vec<NodeInfo> = alive_members
        .iter()
        .map(|n| NodeInfo {
            node_id: n.id.to_string(),
            gossip_addr: n.gossip_addr.to_string(),
            http_addr: n.http_addr.to_string(),
        })
        .collect();

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(NodeStatsResponse {
        node_id: membership.local_node.id.to_string(),
        storage_name: storage.name().to_string(),
        storage_type: storage.storage_type().to_string(),
        alive_nodes: nodes.len(),
        nodes,
        clusters: storage.clusters(),
        records: storage.count_records(),
        leader: peer_state.leader().map(|id| id.to_string()),
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
