use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};

use crate::api::SessionGateway;
use crate::db::Database;

/// Closes backend sessions left open by a run that exited without reaching
/// its end routine. Each journal entry still marked active gets exactly one
/// end request and is then marked interrupted, acknowledged or not.
pub async fn recover_interrupted_sessions(
    db: &Database,
    gateway: &dyn SessionGateway,
) -> Result<usize> {
    let entries = db.get_active_journal_entries().await?;
    if entries.is_empty() {
        return Ok(0);
    }

    warn!("Found {} unfinished session(s) in the journal", entries.len());
    for entry in &entries {
        let acknowledged = match gateway.end_session(entry.session_id).await {
            Ok(_) => {
                info!("Ended leftover session {} (attempt {})", entry.session_id, entry.id);
                true
            }
            Err(err) => {
                error!("Failed to end leftover session {}: {err}", entry.session_id);
                false
            }
        };
        db.mark_journal_interrupted(&entry.id, Utc::now(), acknowledged)
            .await?;
    }

    Ok(entries.len())
}
