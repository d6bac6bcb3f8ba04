use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{registry, web::AppState};

/// Runs a purge pass immediately at startup, then on the configured
/// interval. Not on the request path.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = state.settings().sweep_interval;
        loop {
            if let Err(err) = run_sweep(&state).await {
                error!(?err, "retention sweep failed");
            }
            sleep(interval).await;
        }
    });
}

/// One best-effort batch: each expired document is purged independently
/// and a partial failure skips that document rather than aborting the
/// sweep.
pub async fn run_sweep(state: &AppState) -> Result<()> {
    let pool = state.pool();
    let expired = registry::find_expired(&pool, Utc::now()).await?;

    let mut purged = 0_u64;
    let mut skipped = 0_u64;

    for document in expired {
        match registry::purge(&pool, state.blob(), state.cache(), &document).await {
            Ok(()) => purged += 1,
            Err(err) => {
                warn!(?err, document_id = %document.id, "failed to purge expired document, skipping");
                skipped += 1;
            }
        }
    }

    if purged > 0 || skipped > 0 {
        info!(purged, skipped, "retention sweep completed");
    }

    Ok(())
}
