use anyhow::{Result, anyhow};
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS core_user (
        aid INTEGER PRIMARY KEY AUTOINCREMENT,
        cid TEXT NOT NULL UNIQUE,
        coin INTEGER NOT NULL,
        nickname TEXT,
        is_sign INTEGER NOT NULL DEFAULT 0,
        is_chat INTEGER NOT NULL DEFAULT 0,
        today_transferred INTEGER NOT NULL DEFAULT 0,
        total_sign INTEGER NOT NULL DEFAULT 0,
        continue_sign INTEGER NOT NULL DEFAULT 0,
        total_talk INTEGER NOT NULL DEFAULT 0,
        last_sign_day TEXT,
        banned INTEGER NOT NULL DEFAULT 0,
        join_time TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_user_coin ON core_user(coin);

    CREATE TABLE IF NOT EXISTS core_group (
        group_id TEXT PRIMARY KEY,
        banned INTEGER NOT NULL DEFAULT 0,
        join_time TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS core_group_disabled (
        group_id TEXT NOT NULL,
        function TEXT NOT NULL,
        UNIQUE(group_id, function)
    );

    CREATE TABLE IF NOT EXISTS core_log_coin (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        aid INTEGER NOT NULL,
        group_id TEXT,
        coin INTEGER NOT NULL,
        source TEXT NOT NULL,
        detail TEXT NOT NULL DEFAULT '',
        time TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_log_coin_aid ON core_log_coin(aid);

    CREATE TABLE IF NOT EXISTS core_log_sign (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        aid INTEGER NOT NULL,
        group_id TEXT,
        sign_time TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_log_sign_aid ON core_log_sign(aid);

    CREATE TABLE IF NOT EXISTS core_log_ban (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id TEXT NOT NULL,
        target_type TEXT NOT NULL,
        action TEXT NOT NULL,
        reason TEXT,
        source TEXT,
        ban_time TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS content_review_text (
        text_hash TEXT PRIMARY KEY,
        is_safe INTEGER NOT NULL,
        label TEXT NOT NULL,
        sub_label TEXT NOT NULL,
        score INTEGER,
        review_time TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS content_review_image (
        image_hash TEXT PRIMARY KEY,
        is_safe INTEGER NOT NULL,
        label TEXT NOT NULL,
        sub_label TEXT NOT NULL,
        score INTEGER,
        review_time TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS drift_bottle (
        bottle_id INTEGER PRIMARY KEY AUTOINCREMENT,
        aid INTEGER NOT NULL,
        group_id TEXT,
        text TEXT,
        images TEXT,
        anonymous INTEGER NOT NULL DEFAULT 0,
        total_pickups INTEGER NOT NULL DEFAULT 0,
        remaining_pickups INTEGER NOT NULL DEFAULT -1,
        review_status TEXT NOT NULL,
        create_time TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_bottle_aid ON drift_bottle(aid);
    CREATE INDEX IF NOT EXISTS idx_bottle_pool ON drift_bottle(is_deleted, review_status, remaining_pickups);

    CREATE TABLE IF NOT EXISTS bottle_score (
        bottle_id INTEGER NOT NULL,
        aid INTEGER NOT NULL,
        score INTEGER NOT NULL,
        create_time TEXT NOT NULL,
        UNIQUE(bottle_id, aid)
    );

    CREATE TABLE IF NOT EXISTS bottle_discuss (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bottle_id INTEGER NOT NULL,
        aid INTEGER NOT NULL,
        text TEXT NOT NULL,
        create_time TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_discuss_bottle ON bottle_discuss(bottle_id, aid);
";

/// Open the bot database and make sure every table exists.
pub async fn open(db_path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path).await.map_err(|e| {
        log::error!("[Core.db] 無法打開資料庫 {}: {}", db_path, e);
        anyhow!("資料庫打開失敗: {}", e)
    })?;
    init_schema(&conn)
        .await
        .map_err(|e| anyhow!("初始化資料庫失敗: {}", e))?;

    log::info!("[Core.db] 資料庫初始化成功: {}", db_path);
    Ok(conn)
}

pub async fn init_schema(conn: &Connection) -> Result<(), tokio_rusqlite::Error> {
    conn.call(|conn| {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    })
    .await
}

/// In-memory database with the production schema.
#[cfg(test)]
pub async fn memory() -> Connection {
    let conn = Connection::open_in_memory()
        .await
        .expect("open in-memory database");
    init_schema(&conn).await.expect("init schema");
    conn
}
