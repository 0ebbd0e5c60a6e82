pub mod models;

use scan_db::PgPool;
use sqlx::Row;

pub use models::{ChatMessage, ChatSession};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Creates a new chat session and returns its id.
pub async fn create_session(pool: &PgPool, user_id: i64, title: &str) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "INSERT INTO chat_session (user_id, title) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(title)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("id")?)
}

/// Appends a message to `chat_id` and bumps the owning session's
/// `updated_at`.
pub async fn append_message(
    pool: &PgPool,
    chat_id: i64,
    role: &str,
    content: &str,
    events_json: Option<&str>,
    usage_json: Option<&str>,
) -> Result<i64, StoreError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "INSERT INTO chat_message (chat_id, role, content, events_json, usage_json)
         VALUES ($1, $2, $3, COALESCE($4, '[]'), COALESCE($5, '{}'))
         RETURNING id",
    )
    .bind(chat_id)
    .bind(role)
    .bind(content)
    .bind(events_json)
    .bind(usage_json)
    .fetch_one(&mut *tx)
    .await?;
    let id: i64 = row.try_get("id")?;

    sqlx::query("UPDATE chat_session SET updated_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(chat_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(id)
}

/// Returns the session if it exists and is owned by `user_id`.
pub async fn get_session(pool: &PgPool, chat_id: i64, user_id: i64) -> Result<Option<ChatSession>, StoreError> {
    let session = sqlx::query_as::<_, ChatSession>(
        "SELECT id, user_id, title, created_at, updated_at
           FROM chat_session
          WHERE id = $1 AND user_id = $2",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

/// All messages for `chat_id`, ordered oldest first.
pub async fn list_messages(pool: &PgPool, chat_id: i64) -> Result<Vec<ChatMessage>, StoreError> {
    let rows = sqlx::query_as::<_, ChatMessage>(
        "SELECT id, chat_id, role, content, events_json, usage_json, created_at, updated_at
           FROM chat_message
          WHERE chat_id = $1
          ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Chat sessions whose last message is from `user` (the "pending a
/// response" invariant from the data model), most recently updated first.
/// Used at startup to find chats an external SSE layer should resume
/// streaming for after a restart.
pub async fn list_pending_session_ids(pool: &PgPool, limit: i64) -> Result<Vec<i64>, StoreError> {
    let limit = limit.clamp(0, 10_000);
    let rows = sqlx::query(
        "SELECT cs.id AS id
           FROM chat_session cs
           JOIN LATERAL (
                SELECT role FROM chat_message cm
                 WHERE cm.chat_id = cs.id
                 ORDER BY cm.created_at DESC
                 LIMIT 1
           ) last_msg ON true
          WHERE last_msg.role = 'user'
          ORDER BY cs.updated_at DESC
          LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(|r| r.try_get::<i64, _>("id").map_err(StoreError::from)).collect()
}

/// A page of `user_id`'s sessions, newest-updated first. `offset`/`limit`
/// are pushed down into the query (`OFFSET`/`LIMIT`) rather than fetched in
/// bulk and sliced in memory, so deep pages still return correct results
/// instead of silently coming back empty.
pub async fn list_recent_sessions(
    pool: &PgPool,
    user_id: i64,
    offset: i64,
    limit: i64,
) -> Result<Vec<ChatSession>, StoreError> {
    let offset = offset.max(0);
    let limit = limit.clamp(0, 200);
    let rows = sqlx::query_as::<_, ChatSession>(
        "SELECT id, user_id, title, created_at, updated_at
           FROM chat_session
          WHERE user_id = $1
          ORDER BY updated_at DESC
          LIMIT $2
         OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
