use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_rusqlite::{Connection, OptionalExtension, params};

use crate::models::account::{
    BanTarget, CoinLogEntry, DebitOutcome, SignStreak, USER_COLUMNS, UserAccount, UserRef,
};
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::ledger::{self, LedgerMemo};
use crate::utils::time::{format_day, timestamp};

static NICKNAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\u{4e00}-\u{9fa5}A-Za-z0-9_\u{3040}-\u{309f}\u{30a0}-\u{30ff}]+$").unwrap()
});

/// 暱稱格式檢查，不包含內容審核
pub fn validate_nickname(nickname: &str, current: Option<&str>) -> CoreResult<()> {
    let len = nickname.chars().count();
    if !(3..=12).contains(&len) {
        return Err(CoreError::validation("暱稱長度需在 3 到 12 個字之間！"));
    }
    if nickname.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::validation("暱稱不能是純數字！"));
    }
    if !NICKNAME_PATTERN.is_match(nickname) {
        return Err(CoreError::validation(
            "暱稱只能包含中文、日文假名、英文字母、數字和底線！",
        ));
    }
    if current == Some(nickname) {
        return Err(CoreError::validation("新暱稱和目前的暱稱一樣！"));
    }
    Ok(())
}

/// Select one account by an arbitrary column.
pub(crate) fn select_user(
    conn: &rusqlite::Connection,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> rusqlite::Result<Option<UserAccount>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM core_user WHERE {column} = ?1"),
        [value],
        UserAccount::from_row,
    )
    .optional()
}

/// Sign-in bookkeeping inside an open transaction.
///
/// Returns `None` when the account already signed in on `today`.
pub(crate) fn sign_in_tx(
    conn: &rusqlite::Connection,
    aid: i64,
    group_id: Option<&str>,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> rusqlite::Result<Option<SignStreak>> {
    let yesterday = today - Duration::days(1);
    let streak = conn
        .query_row(
            "UPDATE core_user SET
                 is_sign = 1,
                 total_sign = total_sign + 1,
                 continue_sign = CASE WHEN last_sign_day = ?2 THEN continue_sign + 1 ELSE 1 END,
                 last_sign_day = ?3
             WHERE aid = ?1 AND (last_sign_day IS NULL OR last_sign_day <> ?3)
             RETURNING total_sign, continue_sign",
            params![aid, format_day(yesterday), format_day(today)],
            |row| {
                Ok(SignStreak {
                    total_sign: row.get(0)?,
                    continue_sign: row.get(1)?,
                })
            },
        )
        .optional()?;
    if streak.is_some() {
        ledger::append_sign_log(conn, aid, group_id, now)?;
    }
    Ok(streak)
}

/// 用戶帳戶管理
///
/// 每個修改操作都是連線上的一個交易，連線依序執行閉包，同一帳戶不會有兩個修改同時進行。
#[derive(Clone)]
pub struct UserManager {
    conn: Connection,
    initial_coin: i64,
}

impl UserManager {
    pub fn new(conn: Connection, initial_coin: i64) -> Self {
        Self { conn, initial_coin }
    }

    /// Look up the account of an external id, creating it on first contact.
    pub async fn resolve_by_external_id(&self, cid: &str, now: DateTime<Utc>) -> CoreResult<UserAccount> {
        let cid_owned = cid.to_string();
        let initial_coin = self.initial_coin;
        let (created, user) = self
            .conn
            .call(move |conn| {
                let created = conn.execute(
                    "INSERT OR IGNORE INTO core_user (cid, coin, join_time) VALUES (?1, ?2, ?3)",
                    params![cid_owned, initial_coin, timestamp(now)],
                )? == 1;
                let user = select_user(conn, "cid", &cid_owned)?;
                Ok((created, user))
            })
            .await?;

        let Some(user) = user else {
            log::error!("[Core.user] 插入後仍找不到用戶 CID {}", cid);
            return Err(CoreError::DataIntegrity(format!("user {cid} missing after insert")));
        };
        if created {
            log::info!("[Core.user] 已初始化用戶 AID {} CID {}", user.aid, user.cid);
        }
        Ok(user)
    }

    pub async fn find_by_external_id(&self, cid: &str) -> CoreResult<Option<UserAccount>> {
        let cid = cid.to_string();
        Ok(self
            .conn
            .call(move |conn| Ok(select_user(conn, "cid", &cid)?))
            .await?)
    }

    pub async fn resolve_by_internal_id(&self, aid: i64) -> CoreResult<UserAccount> {
        self.conn
            .call(move |conn| Ok(select_user(conn, "aid", &aid)?))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", aid)))
    }

    /// Resolve a user named by someone else. Never creates an account.
    pub async fn lookup(&self, target: &UserRef) -> CoreResult<UserAccount> {
        match target {
            UserRef::Cid(cid) => self
                .find_by_external_id(cid)
                .await?
                .ok_or_else(|| CoreError::not_found("未找到指定的用戶，可能該用戶尚未初始化！")),
            UserRef::Aid(aid) => self.resolve_by_internal_id(*aid).await,
        }
    }

    pub async fn add_coin(&self, aid: i64, amount: i64, memo: LedgerMemo, now: DateTime<Utc>) -> CoreResult<i64> {
        if amount < 0 {
            return Err(CoreError::validation("增加的遊戲幣不能是負數！"));
        }
        let result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if ledger::balance(&tx, aid)?.is_none() {
                    return Ok(Err(CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", aid))));
                }
                let balance = ledger::credit(&tx, aid, amount, &memo, now)?;
                tx.commit()?;
                Ok(Ok(balance))
            })
            .await??;
        Ok(result)
    }

    /// Debit an account. Without `force` an insufficient balance is reported
    /// as [`DebitOutcome::Insufficient`] and nothing changes.
    pub async fn reduce_coin(
        &self,
        aid: i64,
        amount: i64,
        force: bool,
        memo: LedgerMemo,
        now: DateTime<Utc>,
    ) -> CoreResult<DebitOutcome> {
        if amount < 0 {
            return Err(CoreError::validation("扣除的遊戲幣不能是負數！"));
        }
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if ledger::balance(&tx, aid)?.is_none() {
                    return Ok(Err(CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", aid))));
                }
                let outcome = ledger::debit(&tx, aid, amount, force, &memo, now)?;
                tx.commit()?;
                Ok(Ok(outcome))
            })
            .await??;
        Ok(outcome)
    }

    /// Mark today's sign-in. `None` means the account already signed in today.
    pub async fn record_sign_in(
        &self,
        aid: i64,
        group_id: Option<&str>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<SignStreak>> {
        let group_id = group_id.map(str::to_string);
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let streak = sign_in_tx(&tx, aid, group_id.as_deref(), today, now)?;
                tx.commit()?;
                Ok(streak)
            })
            .await?)
    }

    pub async fn record_talk(&self, aid: i64) -> CoreResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE core_user SET total_talk = total_talk + 1, is_chat = 1 WHERE aid = ?1",
                    [aid],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store an already validated nickname.
    pub async fn set_nickname(&self, aid: i64, nickname: Option<String>) -> CoreResult<()> {
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE core_user SET nickname = ?1 WHERE aid = ?2",
                    params![nickname, aid],
                )?)
            })
            .await?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", aid)));
        }
        Ok(())
    }

    /// Ban or unban an account. Returns whether the flag changed; a change
    /// is recorded in the ban log.
    pub async fn set_banned(
        &self,
        aid: i64,
        banned: bool,
        reason: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let reason = reason.to_string();
        let source = source.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if select_user(&tx, "aid", &aid)?.is_none() {
                    return Ok(Err(CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", aid))));
                }
                let changed = tx.execute(
                    "UPDATE core_user SET banned = ?1 WHERE aid = ?2 AND banned <> ?1",
                    params![banned, aid],
                )? == 1;
                if changed {
                    ledger::append_ban_log(&tx, &aid.to_string(), BanTarget::User, banned, &reason, &source, now)?;
                }
                tx.commit()?;
                Ok(Ok(changed))
            })
            .await??;
        if changed {
            log::info!(
                "[Core.user] AID {} 已{}",
                aid,
                if banned { "封禁" } else { "解除封禁" }
            );
        }
        Ok(changed)
    }

    pub async fn coin_history(&self, aid: i64, limit: usize) -> CoreResult<Vec<CoinLogEntry>> {
        Ok(self
            .conn
            .call(move |conn| Ok(ledger::coin_history(conn, aid, limit)?))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::db;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn manager() -> UserManager {
        UserManager::new(db::memory().await, 10)
    }

    #[tokio::test]
    async fn test_lookup_does_not_create_unseen_user() {
        let users = manager().await;
        let seen = users.resolve_by_external_id("1001", now()).await.unwrap();

        assert_eq!(users.lookup(&UserRef::Cid("1001".into())).await.unwrap().aid, seen.aid);
        assert_eq!(users.lookup(&UserRef::Aid(seen.aid)).await.unwrap().cid, "1001");
        assert!(matches!(
            users.lookup(&UserRef::Cid("2002".into())).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(users.find_by_external_id("2002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let users = manager().await;
        let first = users.resolve_by_external_id("1001", now()).await.unwrap();
        let again = users.resolve_by_external_id("1001", now()).await.unwrap();
        let other = users.resolve_by_external_id("1002", now()).await.unwrap();

        assert_eq!(first.aid, again.aid);
        assert_eq!(first.coin, 10);
        assert!(other.aid > first.aid);
        assert!(users.find_by_external_id("9999").await.unwrap().is_none());
        assert!(matches!(
            users.resolve_by_internal_id(424242).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_balance_matches_ledger() {
        let users = manager().await;
        let user = users.resolve_by_external_id("1001", now()).await.unwrap();
        let memo = || LedgerMemo::new(None, "測試", "");

        users.add_coin(user.aid, 50, memo(), now()).await.unwrap();
        let outcome = users.reduce_coin(user.aid, 100, false, memo(), now()).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { available: 60 });
        users.reduce_coin(user.aid, 25, false, memo(), now()).await.unwrap();
        let outcome = users.reduce_coin(user.aid, 99, true, memo(), now()).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Partial(35));
        users.add_coin(user.aid, 3, memo(), now()).await.unwrap();

        let user = users.resolve_by_internal_id(user.aid).await.unwrap();
        let history = users.coin_history(user.aid, 50).await.unwrap();
        let logged: i64 = history.iter().map(|entry| entry.coin).sum();
        assert_eq!(user.coin, 3);
        assert_eq!(10 + logged, user.coin);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_sign_in_once_per_day() {
        let users = manager().await;
        let user = users.resolve_by_external_id("1001", now()).await.unwrap();

        let first = users.record_sign_in(user.aid, Some("g"), day(1), now()).await.unwrap();
        assert_eq!(first, Some(SignStreak { total_sign: 1, continue_sign: 1 }));
        assert_eq!(users.record_sign_in(user.aid, Some("g"), day(1), now()).await.unwrap(), None);

        let next = users.record_sign_in(user.aid, None, day(2), now()).await.unwrap();
        assert_eq!(next, Some(SignStreak { total_sign: 2, continue_sign: 2 }));

        // 中斷一天後連續天數重新計算
        let broken = users.record_sign_in(user.aid, None, day(4), now()).await.unwrap();
        assert_eq!(broken, Some(SignStreak { total_sign: 3, continue_sign: 1 }));

        let user = users.resolve_by_internal_id(user.aid).await.unwrap();
        assert!(user.is_sign);
        assert_eq!(user.last_sign_day, Some(day(4)));
    }

    #[tokio::test]
    async fn test_ban_is_idempotent() {
        let users = manager().await;
        let user = users.resolve_by_external_id("1001", now()).await.unwrap();
        assert!(users.set_banned(user.aid, true, "spam", "admin", now()).await.unwrap());
        assert!(!users.set_banned(user.aid, true, "spam", "admin", now()).await.unwrap());
        assert!(users.resolve_by_internal_id(user.aid).await.unwrap().banned);
        assert!(users.set_banned(user.aid, false, "", "admin", now()).await.unwrap());
    }

    #[test]
    fn test_validate_nickname() {
        assert!(validate_nickname("小明_abc", None).is_ok());
        assert!(validate_nickname("ab", None).is_err());
        assert!(validate_nickname("12345", None).is_err());
        assert!(validate_nickname("bad name!", None).is_err());
        assert!(validate_nickname("さくら子", Some("さくら子")).is_err());
        assert!(validate_nickname("thirteen_char", None).is_err());
    }
}
