//! Ledger store: balance mutations and the append-only audit logs.
//!
//! Every function here takes a `rusqlite::Connection` that the caller has
//! already put inside a transaction. A balance change and its log row are
//! always written by the same call, so a rollback drops both.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::account::{BanTarget, CoinLogEntry, DebitOutcome};
use crate::utils::time::timestamp;

/// Where a ledger movement happened and why.
#[derive(Debug, Clone)]
pub struct LedgerMemo {
    pub group_id: Option<String>,
    pub source: String,
    pub detail: String,
}

impl LedgerMemo {
    pub fn new(group_id: Option<&str>, source: &str, detail: impl Into<String>) -> Self {
        Self {
            group_id: group_id.map(str::to_string),
            source: source.to_string(),
            detail: detail.into(),
        }
    }
}

pub fn balance(conn: &Connection, aid: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row("SELECT coin FROM core_user WHERE aid = ?1", [aid], |row| row.get(0))
        .optional()
}

/// Credit `amount` (>= 0) and append the log row. Returns the new balance.
pub fn credit(
    conn: &Connection,
    aid: i64,
    amount: i64,
    memo: &LedgerMemo,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let new_balance: i64 = conn.query_row(
        "UPDATE core_user SET coin = coin + ?1 WHERE aid = ?2 RETURNING coin",
        params![amount, aid],
        |row| row.get(0),
    )?;
    append_coin_log(conn, aid, amount, memo, now)?;
    Ok(new_balance)
}

/// Debit `amount` (>= 0).
///
/// Without `force` an insufficient balance leaves everything untouched. With
/// `force` the balance is zeroed and only the amount actually removed is logged.
pub fn debit(
    conn: &Connection,
    aid: i64,
    amount: i64,
    force: bool,
    memo: &LedgerMemo,
    now: DateTime<Utc>,
) -> rusqlite::Result<DebitOutcome> {
    let updated = conn.execute(
        "UPDATE core_user SET coin = coin - ?1 WHERE aid = ?2 AND coin >= ?1",
        params![amount, aid],
    )?;
    if updated == 1 {
        append_coin_log(conn, aid, -amount, memo, now)?;
        return Ok(DebitOutcome::Full(amount));
    }

    let available = balance(conn, aid)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    if !force {
        return Ok(DebitOutcome::Insufficient { available });
    }

    conn.execute("UPDATE core_user SET coin = 0 WHERE aid = ?1", [aid])?;
    append_coin_log(conn, aid, -available, memo, now)?;
    log::warn!(
        "[Core.ledger] AID {} 餘額不足，強制扣除 {}，實際扣除 {}（{}）",
        aid,
        amount,
        available,
        memo.source
    );
    Ok(DebitOutcome::Partial(available))
}

fn append_coin_log(
    conn: &Connection,
    aid: i64,
    coin: i64,
    memo: &LedgerMemo,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO core_log_coin (aid, group_id, coin, source, detail, time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![aid, memo.group_id, coin, memo.source, memo.detail, timestamp(now)],
    )?;
    Ok(())
}

pub fn append_sign_log(
    conn: &Connection,
    aid: i64,
    group_id: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO core_log_sign (aid, group_id, sign_time) VALUES (?1, ?2, ?3)",
        params![aid, group_id, timestamp(now)],
    )?;
    Ok(())
}

pub fn append_ban_log(
    conn: &Connection,
    target_id: &str,
    target: BanTarget,
    banned: bool,
    reason: &str,
    source: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO core_log_ban (target_id, target_type, action, reason, source, ban_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            target_id,
            target.as_str(),
            if banned { "ban" } else { "unban" },
            reason,
            source,
            timestamp(now)
        ],
    )?;
    Ok(())
}

/// Most recent ledger rows of one account, newest first.
pub fn coin_history(conn: &Connection, aid: i64, limit: usize) -> rusqlite::Result<Vec<CoinLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, aid, group_id, coin, source, detail, time FROM core_log_coin
         WHERE aid = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![aid, limit as i64], |row| {
            Ok(CoinLogEntry {
                id: row.get(0)?,
                aid: row.get(1)?,
                group_id: row.get(2)?,
                coin: row.get(3)?,
                source: row.get(4)?,
                detail: row.get(5)?,
                time: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
