use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::UnixListener;
use tracing::{error, info, warn};

use libproblems::auth::{AuthDecision, StaticAgent};
use libproblems::broker::{ProblemsBroker, SharedBroker};
use libproblems::store::MemoryStore;

use crate::config::ServerConfig;
use crate::connection;

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // Clean up stale socket
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }

    // Ensure parent directory exists
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write PID file
    let pid_path = problems_protocol::paths::pid_file_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), pid = std::process::id(), "problems broker started");

    let agent = StaticAgent {
        decision: if config.grant_authorization {
            AuthDecision::Granted
        } else {
            AuthDecision::Denied
        },
    };
    let state: SharedBroker =
        ProblemsBroker::new(config.limits(), Arc::new(MemoryStore::new()), Arc::new(agent))
            .into_shared();

    // Handle shutdown signals
    let socket_path = config.socket_path.clone();
    let pid_path_clone = pid_path.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down...");
        // Cleanup
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path_clone);
        std::process::exit(0);
    });

    let conn_seq = AtomicU64::new(1);
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let uid = match stream.peer_cred() {
                    Ok(cred) => cred.uid(),
                    Err(e) => {
                        warn!("failed to read peer credentials: {e}");
                        continue;
                    }
                };
                let bus = format!("conn-{}", conn_seq.fetch_add(1, Ordering::Relaxed));
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    connection::handle_client(stream, state, bus, uid).await;
                });
            }
            Err(e) => {
                error!("accept error: {e}");
            }
        }
    }
}
