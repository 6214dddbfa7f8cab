use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, params};

use crate::models::account::{BanTarget, GroupAccount};
use crate::models::function::FunctionInfo;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::ledger;
use crate::utils::time::timestamp;

/// Result of switching a function in a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Changed,
    /// Already in the requested state.
    NoChange,
    Refused(String),
}

fn select_group(conn: &rusqlite::Connection, group_id: &str) -> rusqlite::Result<Option<GroupAccount>> {
    let banned: Option<bool> = conn
        .query_row(
            "SELECT banned FROM core_group WHERE group_id = ?1",
            [group_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(banned) = banned else {
        return Ok(None);
    };
    let mut stmt =
        conn.prepare("SELECT function FROM core_group_disabled WHERE group_id = ?1")?;
    let disabled_functions = stmt
        .query_map([group_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(Some(GroupAccount {
        group_id: group_id.to_string(),
        disabled_functions,
        banned,
    }))
}

/// 群組帳戶管理
#[derive(Clone)]
pub struct GroupManager {
    conn: Connection,
}

impl GroupManager {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Look up a group, creating it on first contact.
    pub async fn resolve(&self, group_id: &str, now: DateTime<Utc>) -> CoreResult<GroupAccount> {
        let id = group_id.to_string();
        let (created, group) = self
            .conn
            .call(move |conn| {
                let created = conn.execute(
                    "INSERT OR IGNORE INTO core_group (group_id, join_time) VALUES (?1, ?2)",
                    params![id, timestamp(now)],
                )? == 1;
                Ok((created, select_group(conn, &id)?))
            })
            .await?;

        let Some(group) = group else {
            log::error!("[Core.group] 插入後仍找不到群組 {}", group_id);
            return Err(CoreError::DataIntegrity(format!("group {group_id} missing after insert")));
        };
        if created {
            log::info!("[Core.group] 已初始化群組：{}", group_id);
        }
        Ok(group)
    }

    #[cfg(test)]
    pub async fn find(&self, group_id: &str) -> CoreResult<Option<GroupAccount>> {
        let id = group_id.to_string();
        Ok(self.conn.call(move |conn| Ok(select_group(conn, &id)?)).await?)
    }

    pub async fn disable_function(&self, group_id: &str, function: &FunctionInfo) -> CoreResult<ToggleOutcome> {
        if !function.can_be_disabled {
            return Ok(ToggleOutcome::Refused(format!("功能「{}」不能被關閉！", function.name)));
        }
        let id = group_id.to_string();
        let func_id = function.id;
        let inserted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO core_group_disabled (group_id, function) VALUES (?1, ?2)",
                    params![id, func_id],
                )?)
            })
            .await?;
        if inserted == 0 {
            return Ok(ToggleOutcome::NoChange);
        }
        log::info!("[Core.group] 群組 {} 已關閉功能 {}", group_id, function.id);
        Ok(ToggleOutcome::Changed)
    }

    /// Functions under maintenance cannot be switched on.
    pub async fn enable_function(
        &self,
        group_id: &str,
        function: &FunctionInfo,
        under_maintenance: bool,
    ) -> CoreResult<ToggleOutcome> {
        if under_maintenance {
            return Ok(ToggleOutcome::Refused(format!("功能「{}」正在維護中，暫時無法開啟！", function.name)));
        }
        let id = group_id.to_string();
        let func_id = function.id;
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM core_group_disabled WHERE group_id = ?1 AND function = ?2",
                    params![id, func_id],
                )?)
            })
            .await?;
        if deleted == 0 {
            return Ok(ToggleOutcome::NoChange);
        }
        log::info!("[Core.group] 群組 {} 已開啟功能 {}", group_id, function.id);
        Ok(ToggleOutcome::Changed)
    }

    /// Ban or unban a group; returns whether the flag changed.
    pub async fn set_banned(
        &self,
        group_id: &str,
        banned: bool,
        reason: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let id = group_id.to_string();
        let reason = reason.to_string();
        let source = source.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO core_group (group_id, join_time) VALUES (?1, ?2)",
                    params![id, timestamp(now)],
                )?;
                let changed = tx.execute(
                    "UPDATE core_group SET banned = ?1 WHERE group_id = ?2 AND banned <> ?1",
                    params![banned, id],
                )? == 1;
                if changed {
                    ledger::append_ban_log(&tx, &id, BanTarget::Group, banned, &reason, &source, now)?;
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        if changed {
            log::info!(
                "[Core.group] 群組 {} 已{}",
                group_id,
                if banned { "封禁" } else { "解除封禁" }
            );
        }
        Ok(changed)
    }
}
