// Optional per-site HTTP status endpoint (spec.md §6, the `-s` flag).
//
// Each site is served on its own port, `base_port + 20*site_id`,
// returning a JSON dump of that site's variables. The HTTP layer
// never reaches into the live engine: the driver publishes a fresh
// snapshot after every instruction, and requests serve whatever was
// last published. Grounded in the reference implementation's
// per-site Tornado handler (`Site.py`/`SiteHandler.py`), reimplemented
// on `axum` since the engine's ambient stack is async/tokio-based.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::sites::{SiteManager, SiteStatus};

#[derive(Debug, Clone, Serialize)]
pub struct VariableRow {
    pub name: String,
    pub value: i64,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteSnapshot {
    pub site: usize,
    pub status: String,
    pub variables: Vec<VariableRow>,
}

pub type SnapshotStore = Arc<RwLock<HashMap<usize, SiteSnapshot>>>;

pub fn new_snapshot_store() -> SnapshotStore {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Rebuilds the published snapshot from the live site manager. Called
/// by the driver after every dispatched instruction when `-s` is set.
pub fn publish(store: &SnapshotStore, site_manager: &SiteManager, num_sites: usize) {
    let mut guard = store.write();
    for id in 1..=num_sites {
        let Ok((_, status, rows)) = site_manager.dump_site(id) else {
            continue;
        };
        guard.insert(
            id,
            SiteSnapshot {
                site: id,
                status: status_label(status),
                variables: rows
                    .into_iter()
                    .map(|(name, value, available)| VariableRow { name, value, available })
                    .collect(),
            },
        );
    }
}

fn status_label(status: SiteStatus) -> &'static str {
    match status {
        SiteStatus::Up => "UP",
        SiteStatus::Down => "DOWN",
        SiteStatus::Recovering => "RECOVERING",
    }
}

/// Spawns one axum server per site. Each task runs for the life of the
/// process; a bind failure is logged and that site simply has no
/// endpoint, which never affects the engine itself.
pub fn spawn_status_servers(store: SnapshotStore, base_port: u16, num_sites: usize) {
    for id in 1..=num_sites {
        let store = store.clone();
        let port = base_port + 20 * id as u16;
        tokio::spawn(async move {
            let app = Router::new().route("/", get(serve_site)).with_state((store, id));
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(site = id, %addr, "status endpoint listening");
                    if let Err(err) = axum::serve(listener, app).await {
                        warn!(site = id, %err, "status endpoint stopped");
                    }
                }
                Err(err) => warn!(site = id, %addr, %err, "status endpoint failed to bind"),
            }
        });
    }
}

async fn serve_site(State((store, id)): State<(SnapshotStore, usize)>) -> Json<Option<SiteSnapshot>> {
    Json(store.read().get(&id).cloned())
}
