use std::time::Instant;

use tracing::{debug, info, warn};

use crate::store;

fn env_flag_true(key: &str, default_true: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default_true,
    }
}

fn env_usize(key: &str, default_val: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default_val)
}

/// Scans for chat sessions whose last message is still from the user, the
/// "pending a response" invariant (`spec.md` §3), and logs them so an
/// external SSE layer knows which chats need a resumed stream after a
/// restart (`handlers::build_stream_inputs` turns each chat's persisted
/// messages back into a query plus conversation history once the SSE layer
/// loads them). Bounded by `SCAND_BOOTSTRAP_LIMIT` (default 200), with
/// sparse progress logs every `SCAND_BOOTSTRAP_LOG_EVERY` (default 50).
pub async fn bootstrap_resume(pool: &scan_db::PgPool) -> anyhow::Result<()> {
    if !env_flag_true("SCAND_BOOTSTRAP_ENABLED", true) {
        debug!(target: "scand::startup", "bootstrap disabled via SCAND_BOOTSTRAP_ENABLED");
        return Ok(());
    }

    let start = Instant::now();
    let limit = env_usize("SCAND_BOOTSTRAP_LIMIT", 200);
    let log_every = env_usize("SCAND_BOOTSTRAP_LOG_EVERY", 50);

    let pending = match store::list_pending_session_ids(pool, limit as i64).await {
        Ok(v) => v,
        Err(e) => {
            warn!(target: "scand::startup", "list_pending_session_ids failed: {e}");
            Vec::new()
        }
    };

    let total = pending.len();
    if total == 0 {
        info!(target: "scand::startup", "no pending chat sessions; took {:?}", start.elapsed());
        return Ok(());
    }

    for (i, chat_id) in pending.into_iter().enumerate() {
        let done = i + 1;
        if log_every > 0 && (done % log_every == 0 || done == total) {
            debug!(
                target: "scand::startup",
                "found {done}/{total} pending session(s), most recent chat_id={chat_id}, in {:?}",
                start.elapsed()
            );
        }
    }

    info!(
        target: "scand::startup",
        "bootstrap found {total} pending session(s) in {:?}", start.elapsed()
    );
    Ok(())
}
