//! Elohim Mesh - node daemon and client
//!
//! Usage:
//!   elohim-mesh serve [--path tmp/node1] [--bootstrap host:port,...] [--bind 0.0.0.0:4100]
//!   elohim-mesh keygen
//!   elohim-mesh --node 127.0.0.1:4100 add ./file.txt --content-type text/plain
//!   elohim-mesh --node 127.0.0.1:4100 get <access-id>
//!   elohim-mesh --node 127.0.0.1:4100 add-reference --key <base64url> <value>
//!   elohim-mesh --node 127.0.0.1:4100 get-reference <reference-id>
//!   elohim-mesh --node 127.0.0.1:4100 add-peer host:port
//!   elohim-mesh --node 127.0.0.1:4100 peers

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use clap::{Parser, Subcommand};
use elohim_mesh::config::parse_address_list;
use elohim_mesh::crypto::{self, content_hash};
use elohim_mesh::{bootstrap, Document, HttpServer, HttpTransport, MeshClient, Node, NodeConfig};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "elohim-mesh")]
#[command(about = "Encrypted document and signed reference mesh node")]
struct Cli {
    /// Node RPC address used by client subcommands
    #[arg(long, global = true, env = "ELOHIM_MESH_NODE", default_value = "127.0.0.1:4100")]
    node: String,

    /// Client request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a mesh node
    Serve(ServeArgs),

    /// Print a fresh reference key and the reference id it controls
    Keygen,

    /// Store a file as a document
    Add {
        file: PathBuf,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Fetch a document and write its data to stdout
    Get { access_id: String },

    /// Sign and publish a reference value
    AddReference {
        /// Base64url private key from `keygen`
        #[arg(long, env = "ELOHIM_MESH_KEY")]
        key: String,
        value: String,
    },

    /// Fetch and verify a reference
    GetReference { reference_id: String },

    /// Ask the node to join a peer
    AddPeer { addr: String },

    /// List the node's peers
    Peers,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node data directory
    #[arg(long, env = "ELOHIM_MESH_PATH")]
    path: Option<PathBuf>,

    /// Comma separated bootstrap addresses
    #[arg(long, env = "ELOHIM_MESH_BOOTSTRAP")]
    bootstrap: Option<String>,

    /// Listen address
    #[arg(long, env = "ELOHIM_MESH_BIND")]
    bind: Option<String>,

    /// Address peers should dial back
    #[arg(long, env = "ELOHIM_MESH_ADVERTISE")]
    advertise: Option<String>,

    #[arg(long, env = "ELOHIM_MESH_MAX_PEERS")]
    max_peers: Option<usize>,

    #[arg(long, env = "ELOHIM_MESH_MAX_WIDTH")]
    max_width: Option<usize>,

    /// Storage engine cache size in bytes
    #[arg(long, env = "ELOHIM_MESH_CACHE_SIZE")]
    cache_size: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("elohim_mesh=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Keygen => {
            let key = crypto::generate_signing_key();
            let public = crypto::marshal_public(&key.verifying_key());
            println!("private_key: {}", URL_SAFE.encode(crypto::marshal_private(&key)));
            println!("reference_id: {}", content_hash(&public));
            Ok(())
        }
        Command::Add { file, content_type } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let client = MeshClient::connect(cli.node, timeout)?;
            let access_id = client.add(Document::new(content_type, data)).await?;
            println!("{}", access_id);
            Ok(())
        }
        Command::Get { access_id } => {
            let client = MeshClient::connect(cli.node, timeout)?;
            let document = client.get(&access_id).await?;
            info!(content_type = %document.content_type, size = document.data.len(), "Fetched document");
            std::io::stdout().write_all(&document.data)?;
            Ok(())
        }
        Command::AddReference { key, value } => {
            let private_key = URL_SAFE.decode(key.trim()).context("decoding private key")?;
            let client = MeshClient::connect(cli.node, timeout)?;
            let reference_id = client.add_reference(private_key, value.into_bytes()).await?;
            println!("{}", reference_id);
            Ok(())
        }
        Command::GetReference { reference_id } => {
            let client = MeshClient::connect(cli.node, timeout)?;
            let reference = client.get_reference(&reference_id).await?;
            info!(timestamp = reference.timestamp, "Fetched reference");
            std::io::stdout().write_all(&reference.value)?;
            Ok(())
        }
        Command::AddPeer { addr } => {
            let client = MeshClient::connect(cli.node, timeout)?;
            let peer = client.add_peer(&addr).await?;
            println!("{} {}", peer.id, peer.address);
            Ok(())
        }
        Command::Peers => {
            let client = MeshClient::connect(cli.node, timeout)?;
            for peer in client.get_peers().await? {
                println!("{} {} {}", peer.id, peer.address, peer.last_seen);
            }
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = if let Some(config_path) = &args.config {
        NodeConfig::load(config_path)?
    } else {
        NodeConfig::default()
    };

    // Apply CLI overrides
    if let Some(path) = args.path {
        config.path = path;
    }
    if let Some(bootstrap) = args.bootstrap {
        config.bootstrap = parse_address_list(&bootstrap);
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(advertise) = args.advertise {
        config.advertise = Some(advertise);
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(max_width) = args.max_width {
        config.max_width = max_width;
    }
    if let Some(cache_size) = args.cache_size {
        config.cache_size = cache_size;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.path).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    if config.advertise.is_none() {
        config.advertise = Some(advertise_address(local_addr));
    }

    let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
    let bootstrap_addrs = config.bootstrap.clone();
    let node = Arc::new(Node::open(config, transport)?);

    info!(
        id = %node.id(),
        addr = %local_addr,
        advertise = %node.meta().address,
        bootstrap = bootstrap_addrs.len(),
        "Starting elohim-mesh"
    );
    info!("Endpoints:");
    info!("  POST /rpc     - Mesh RPC (msgpack)");
    info!("  GET  /health  - Health check");
    info!("  GET  /peers   - Peer table");

    let server = Arc::new(HttpServer::new(Arc::clone(&node)));
    let bootstrap = bootstrap::spawn(Arc::clone(&node), bootstrap_addrs);

    tokio::select! {
        result = server.run(listener) => {
            if let Err(e) = result {
                error!(error = %e, "RPC server stopped");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    bootstrap.abort();
    Ok(())
}

/// Dialable form of the bound address
fn advertise_address(local_addr: SocketAddr) -> String {
    if local_addr.ip().is_unspecified() {
        format!("127.0.0.1:{}", local_addr.port())
    } else {
        local_addr.to_string()
    }
}
