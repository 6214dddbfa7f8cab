use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_rusqlite::{Connection, params};

use crate::models::account::{DebitOutcome, SignStreak, UserAccount};
use crate::models::types::EconomyRules;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::ledger::{self, LedgerMemo};
use crate::utils::time::{business_day, format_day};
use crate::utils::user::{select_user, sign_in_tx};

pub const SOURCE_SIGN: &str = "簽到";
pub const SOURCE_TRANSFER: &str = "轉帳";
pub const SOURCE_PENALTY: &str = "罰款";
pub const SOURCE_TAX: &str = "梯度持有稅";

/// Reward components of one sign-in; credited as a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignReward {
    pub base: i64,
    pub lucky: bool,
    pub streak_bonus: i64,
    pub first_bonus: i64,
}

impl SignReward {
    pub fn total(&self) -> i64 {
        self.base + self.streak_bonus + self.first_bonus
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    AlreadySigned,
    Signed {
        streak: SignStreak,
        reward: SignReward,
        balance: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAmount {
    Positive(i64),
    /// Negative input; punished by a forced debit of the absolute value.
    Negative(i64),
}

/// A validated transfer waiting for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub from_aid: i64,
    pub to_aid: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub amount: i64,
    pub from_balance: i64,
    pub to_balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityStats {
    pub all: i64,
    pub signed: i64,
    pub chatted: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaxReport {
    pub accounts: usize,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetReport {
    pub broken_streaks: usize,
    pub cleared_sign: usize,
    pub cleared_chat: usize,
    pub cleared_transfer: usize,
}

fn draw<R: Rng + ?Sized>(rng: &mut R, (low, high): (i64, i64)) -> i64 {
    rng.random_range(low.min(high)..=high.max(low))
}

/// Roll the sign-in reward for the counters after the sign-in was recorded.
pub fn compute_sign_reward<R: Rng + ?Sized>(rules: &EconomyRules, streak: SignStreak, rng: &mut R) -> SignReward {
    let lucky = rng.random_range(1..=10) == 1;
    let base = if lucky {
        draw(rng, rules.sign_lucky_range)
    } else {
        draw(rng, rules.sign_normal_range)
    };
    let streak_bonus = if streak.continue_sign % 30 == 0 {
        draw(rng, rules.streak_month_range)
    } else if streak.continue_sign % 7 == 0 {
        draw(rng, rules.streak_week_range)
    } else {
        0
    };
    let first_bonus = if streak.total_sign == 1 { rules.first_sign_bonus } else { 0 };
    SignReward {
        base,
        lucky,
        streak_bonus,
        first_bonus,
    }
}

/// 距離下一次連續簽到獎勵還差幾天
pub fn days_to_next_bonus(continue_sign: i64) -> i64 {
    (30 - continue_sign % 30).min(7 - continue_sign % 7)
}

/// Tax steps for a balance: one step per started 100 above the threshold.
pub fn tax_rate_steps(rules: &EconomyRules, coin: i64) -> i64 {
    if coin <= rules.tax_threshold || rules.tax_step <= 0 {
        return 0;
    }
    (coin - rules.tax_threshold + rules.tax_step - 1) / rules.tax_step
}

/// Holding tax owed by a balance: `ceil(coin * steps / 100)`.
pub fn holding_tax(rules: &EconomyRules, coin: i64) -> i64 {
    let steps = tax_rate_steps(rules, coin);
    (coin * steps + 99) / 100
}

/// Parse the raw amount typed by the user.
pub fn parse_transfer_amount(raw: &str, max_digits: usize) -> CoreResult<TransferAmount> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::validation("未輸入要轉帳的數量！"));
    }
    if raw.chars().count() > max_digits {
        return Err(CoreError::validation("轉帳數字長度過長！"));
    }
    let value: i64 = raw
        .parse()
        .map_err(|_| CoreError::validation("輸入的內容不是整數！"))?;
    match value {
        0 => Err(CoreError::validation("轉帳數量必須大於 0！")),
        v if v < 0 => Ok(TransferAmount::Negative(-v)),
        v => Ok(TransferAmount::Positive(v)),
    }
}

/// `all`: the whole balance, limited by what is left of today's cap.
pub fn transfer_all_amount(sender: &UserAccount, daily_cap: i64) -> CoreResult<i64> {
    let allowance = (daily_cap - sender.today_transferred).max(0);
    match sender.coin.min(allowance) {
        0 if sender.coin <= 0 => Err(CoreError::validation("你沒有可以轉出的遊戲幣！")),
        0 => Err(CoreError::validation("今天的轉帳額度已經用完了！")),
        amount => Ok(amount),
    }
}

/// 遊戲幣經濟：簽到、轉帳、持有稅與每日重置
#[derive(Clone)]
pub struct EconomyEngine {
    conn: Connection,
    rules: EconomyRules,
    reset_hour: u32,
}

impl EconomyEngine {
    pub fn new(conn: Connection, rules: EconomyRules, reset_hour: u32) -> Self {
        Self {
            conn,
            rules,
            reset_hour,
        }
    }

    pub fn rules(&self) -> &EconomyRules {
        &self.rules
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        business_day(now, self.reset_hour)
    }

    pub async fn sign_in(&self, aid: i64, group_id: Option<&str>, now: DateTime<Utc>) -> CoreResult<SignInOutcome> {
        self.sign_in_with_rng(aid, group_id, now, StdRng::from_os_rng()).await
    }

    /// Record the sign-in and credit the reward in one transaction.
    pub async fn sign_in_with_rng<R: Rng + Send + 'static>(
        &self,
        aid: i64,
        group_id: Option<&str>,
        now: DateTime<Utc>,
        mut rng: R,
    ) -> CoreResult<SignInOutcome> {
        let rules = self.rules.clone();
        let today = self.today(now);
        let group_id = group_id.map(str::to_string);
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(streak) = sign_in_tx(&tx, aid, group_id.as_deref(), today, now)? else {
                    return Ok(SignInOutcome::AlreadySigned);
                };
                let reward = compute_sign_reward(&rules, streak, &mut rng);
                let memo = LedgerMemo::new(group_id.as_deref(), SOURCE_SIGN, "");
                let balance = ledger::credit(&tx, aid, reward.total(), &memo, now)?;
                tx.commit()?;
                Ok(SignInOutcome::Signed {
                    streak,
                    reward,
                    balance,
                })
            })
            .await?;

        if let SignInOutcome::Signed { streak, reward, .. } = outcome {
            log::info!(
                "[Func.sign] AID {} 簽到成功，獲得 {} 遊戲幣，連續 {} 天",
                aid,
                reward.total(),
                streak.continue_sign
            );
        }
        Ok(outcome)
    }

    /// Read-only checks run before asking the sender to confirm.
    pub async fn prepare_transfer(&self, from_aid: i64, to_aid: i64, amount: i64) -> CoreResult<TransferPlan> {
        let cap = self.rules.transfer_daily_cap;
        self.conn
            .call(move |conn| Ok(check_transfer(conn, from_aid, to_aid, amount, cap)?))
            .await?
    }

    /// Debit the sender, credit the recipient and raise the sender's daily
    /// counter. Every check is repeated inside the transaction, so either all
    /// three writes land or none does.
    pub async fn execute_transfer(
        &self,
        plan: TransferPlan,
        group_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<TransferReceipt> {
        let cap = self.rules.transfer_daily_cap;
        let group_id = group_id.map(str::to_string);
        let receipt = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let plan = match check_transfer(&tx, plan.from_aid, plan.to_aid, plan.amount, cap)? {
                    Ok(plan) => plan,
                    Err(e) => return Ok(Err(e)),
                };

                let out_memo = LedgerMemo::new(
                    group_id.as_deref(),
                    SOURCE_TRANSFER,
                    format!("轉帳給 AID：{}", plan.to_aid),
                );
                let from_balance = match ledger::debit(&tx, plan.from_aid, plan.amount, false, &out_memo, now)? {
                    DebitOutcome::Full(_) => ledger::balance(&tx, plan.from_aid)?.unwrap_or_default(),
                    DebitOutcome::Partial(_) | DebitOutcome::Insufficient { .. } => {
                        return Ok(Err(CoreError::InsufficientFunds {
                            needed: plan.amount,
                            available: ledger::balance(&tx, plan.from_aid)?.unwrap_or_default(),
                        }));
                    }
                };
                let in_memo = LedgerMemo::new(
                    group_id.as_deref(),
                    SOURCE_TRANSFER,
                    format!("來自 AID：{}", plan.from_aid),
                );
                let to_balance = ledger::credit(&tx, plan.to_aid, plan.amount, &in_memo, now)?;
                tx.execute(
                    "UPDATE core_user SET today_transferred = today_transferred + ?1 WHERE aid = ?2",
                    params![plan.amount, plan.from_aid],
                )?;
                tx.commit()?;
                Ok(Ok(TransferReceipt {
                    amount: plan.amount,
                    from_balance,
                    to_balance,
                }))
            })
            .await??;

        log::info!(
            "[Func.transfer] AID {} 轉帳 {} 遊戲幣給 AID {}",
            plan.from_aid,
            receipt.amount,
            plan.to_aid
        );
        Ok(receipt)
    }

    /// Forced debit for an attempted negative transfer. Returns the amount removed.
    pub async fn punish_negative_transfer(
        &self,
        aid: i64,
        amount: i64,
        group_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let memo = LedgerMemo::new(group_id, SOURCE_PENALTY, "非法轉帳負數");
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let outcome = ledger::debit(&tx, aid, amount, true, &memo, now)?;
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        log::warn!("[Func.transfer] AID {} 試圖轉帳負數，扣除 {} 遊戲幣", aid, outcome.removed());
        Ok(outcome.removed())
    }

    pub async fn activity_count(&self) -> CoreResult<ActivityStats> {
        Ok(self
            .conn
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(is_sign), 0), COALESCE(SUM(is_chat), 0) FROM core_user",
                    [],
                    |row| {
                        Ok(ActivityStats {
                            all: row.get(0)?,
                            signed: row.get(1)?,
                            chatted: row.get(2)?,
                        })
                    },
                )?)
            })
            .await?)
    }

    /// Charge the holding tax once to every account at or above the threshold,
    /// richest first. Each account is charged in its own transaction; a crash in
    /// the middle leaves the already charged accounts charged, and a second run
    /// the same day charges them again.
    pub async fn run_tax_pass(&self, now: DateTime<Utc>) -> CoreResult<TaxReport> {
        let rules = self.rules.clone();
        Ok(self
            .conn
            .call(move |conn| {
                let candidates: Vec<i64> = {
                    let mut stmt = conn.prepare(
                        "SELECT aid FROM core_user WHERE coin >= ?1 ORDER BY coin DESC, aid ASC",
                    )?;
                    stmt.query_map([rules.tax_threshold], |row| row.get(0))?
                        .collect::<rusqlite::Result<_>>()?
                };

                let mut report = TaxReport::default();
                for aid in candidates {
                    let tx = conn.transaction()?;
                    let coin = ledger::balance(&tx, aid)?.unwrap_or_default();
                    let tax = holding_tax(&rules, coin);
                    if tax <= 0 {
                        continue;
                    }
                    let memo = LedgerMemo::new(
                        None,
                        SOURCE_TAX,
                        format!("稅率：{}%", tax_rate_steps(&rules, coin)),
                    );
                    let outcome = ledger::debit(&tx, aid, tax, true, &memo, now)?;
                    tx.commit()?;
                    report.accounts += 1;
                    report.total += outcome.removed();
                    log::info!("[Task.daily] AID {} 被收取了 {} 遊戲幣", aid, outcome.removed());
                }
                Ok(report)
            })
            .await?)
    }

    /// Clear the daily flags for the business day `today`. Running it again
    /// for the same day changes nothing.
    pub async fn daily_reset(&self, today: NaiveDate) -> CoreResult<ResetReport> {
        let yesterday = format_day(today - Duration::days(1));
        let report = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let broken_streaks = tx.execute(
                    "UPDATE core_user SET continue_sign = 0
                     WHERE continue_sign <> 0 AND (last_sign_day IS NULL OR last_sign_day < ?1)",
                    [&yesterday],
                )?;
                let cleared_sign = tx.execute("UPDATE core_user SET is_sign = 0 WHERE is_sign = 1", [])?;
                let cleared_chat = tx.execute("UPDATE core_user SET is_chat = 0 WHERE is_chat = 1", [])?;
                let cleared_transfer = tx.execute(
                    "UPDATE core_user SET today_transferred = 0 WHERE today_transferred > 0",
                    [],
                )?;
                tx.commit()?;
                Ok(ResetReport {
                    broken_streaks,
                    cleared_sign,
                    cleared_chat,
                    cleared_transfer,
                })
            })
            .await?;
        log::info!("[Task.daily] 用戶日常狀態重置成功");
        Ok(report)
    }
}

fn check_transfer(
    conn: &rusqlite::Connection,
    from_aid: i64,
    to_aid: i64,
    amount: i64,
    cap: i64,
) -> rusqlite::Result<CoreResult<TransferPlan>> {
    if from_aid == to_aid {
        return Ok(Err(CoreError::validation("不能轉帳給自己！")));
    }
    if amount <= 0 {
        return Ok(Err(CoreError::validation("轉帳數量必須大於 0！")));
    }
    let Some(sender) = select_user(conn, "aid", &from_aid)? else {
        return Ok(Err(CoreError::not_found(format!("找不到 AID 為 {} 的用戶！", from_aid))));
    };
    if select_user(conn, "aid", &to_aid)?.is_none() {
        return Ok(Err(CoreError::not_found("未找到指定的用戶，可能輸入的 AID 有誤！")));
    }
    if amount > sender.coin {
        return Ok(Err(CoreError::InsufficientFunds {
            needed: amount,
            available: sender.coin,
        }));
    }
    if sender.today_transferred + amount > cap {
        return Ok(Err(CoreError::validation(format!(
            "需要轉帳的數量已超過今日限額，今日還可以轉帳 {} 個遊戲幣！",
            (cap - sender.today_transferred).max(0)
        ))));
    }
    Ok(Ok(TransferPlan {
        from_aid,
        to_aid,
        amount,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::EconomyRules;
    use crate::utils::db;
    use crate::models::account::UserRef;
    use crate::utils::user::UserManager;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn setup() -> (Connection, UserManager, EconomyEngine) {
        let conn = db::memory().await;
        let users = UserManager::new(conn.clone(), 10);
        let economy = EconomyEngine::new(conn.clone(), EconomyRules::default(), 4);
        (conn, users, economy)
    }

    async fn account(conn: &Connection, users: &UserManager, cid: &str, coin: i64, transferred: i64) -> i64 {
        let aid = users.resolve_by_external_id(cid, now()).await.unwrap().aid;
        conn.call(move |conn| {
            conn.execute(
                "UPDATE core_user SET coin = ?1, today_transferred = ?2 WHERE aid = ?3",
                params![coin, transferred, aid],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        aid
    }

    async fn ledger_rows(conn: &Connection) -> i64 {
        conn.call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM core_log_coin", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    async fn user_rows(conn: &Connection) -> i64 {
        conn.call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM core_user", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    #[test]
    fn test_sign_reward_ranges() {
        let rules = EconomyRules::default();
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let reward = compute_sign_reward(&rules, SignStreak { total_sign: 5, continue_sign: 3 }, &mut rng);
            assert!((15..=92).contains(&reward.base));
            if !reward.lucky {
                assert!(reward.base <= 47);
            }
            assert_eq!(reward.streak_bonus, 0);
            assert_eq!(reward.first_bonus, 0);

            let month = compute_sign_reward(&rules, SignStreak { total_sign: 60, continue_sign: 30 }, &mut rng);
            assert!((0..=160).contains(&month.streak_bonus));
            let week = compute_sign_reward(&rules, SignStreak { total_sign: 60, continue_sign: 14 }, &mut rng);
            assert!((0..=40).contains(&week.streak_bonus));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let first = compute_sign_reward(&rules, SignStreak { total_sign: 1, continue_sign: 1 }, &mut rng);
        assert_eq!(first.first_bonus, 328);
        assert_eq!(first.total(), first.base + 328);
    }

    #[test]
    fn test_days_to_next_bonus() {
        assert_eq!(days_to_next_bonus(1), 6);
        assert_eq!(days_to_next_bonus(7), 7);
        assert_eq!(days_to_next_bonus(27), 1);
    }

    #[test]
    fn test_holding_tax_tiers() {
        let rules = EconomyRules::default();
        assert_eq!(holding_tax(&rules, 999), 0);
        assert_eq!(holding_tax(&rules, 1000), 0);
        assert_eq!(tax_rate_steps(&rules, 1001), 1);
        assert_eq!(holding_tax(&rules, 1001), 11);
        assert_eq!(holding_tax(&rules, 1100), 11);
        assert_eq!(tax_rate_steps(&rules, 1101), 2);
        assert_eq!(holding_tax(&rules, 1101), 23);
        assert_eq!(holding_tax(&rules, 2000), 200);
    }

    #[test]
    fn test_parse_transfer_amount() {
        assert_eq!(parse_transfer_amount(" 40 ", 6).unwrap(), TransferAmount::Positive(40));
        assert_eq!(parse_transfer_amount("-30", 6).unwrap(), TransferAmount::Negative(30));
        assert!(matches!(parse_transfer_amount("1234567", 6), Err(CoreError::Validation(_))));
        assert!(matches!(parse_transfer_amount("12a", 6), Err(CoreError::Validation(_))));
        assert!(matches!(parse_transfer_amount("0", 6), Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_transfer_all_stops_at_daily_cap() {
        let (conn, users, economy) = setup().await;
        let from = account(&conn, &users, "1001", 500, 150).await;
        let to = account(&conn, &users, "1002", 0, 0).await;
        let cap = economy.rules().transfer_daily_cap;

        let sender = users.resolve_by_internal_id(from).await.unwrap();
        let amount = transfer_all_amount(&sender, cap).unwrap();
        assert_eq!(amount, 50);
        let plan = economy.prepare_transfer(from, to, amount).await.unwrap();
        let receipt = economy.execute_transfer(plan, Some("g"), now()).await.unwrap();
        assert_eq!(receipt.from_balance, 450);
        assert_eq!(receipt.to_balance, 50);

        let sender = users.resolve_by_internal_id(from).await.unwrap();
        assert_eq!(sender.today_transferred, cap);
        assert!(matches!(transfer_all_amount(&sender, cap), Err(CoreError::Validation(_))));
        let TransferAmount::Positive(one) = parse_transfer_amount("1", economy.rules().transfer_max_digits).unwrap()
        else {
            panic!("1 is a positive amount");
        };
        assert!(matches!(
            economy.prepare_transfer(from, to, one).await,
            Err(CoreError::Validation(_))
        ));
        assert_eq!(ledger_rows(&conn).await, 2);
    }

    #[tokio::test]
    async fn test_transfer_all_amount_edges() {
        let (conn, users, _) = setup().await;
        let rich = account(&conn, &users, "1001", 30, 0).await;
        let broke = account(&conn, &users, "1002", 0, 0).await;
        let rich = users.resolve_by_internal_id(rich).await.unwrap();
        let broke = users.resolve_by_internal_id(broke).await.unwrap();
        assert_eq!(transfer_all_amount(&rich, 200).unwrap(), 30);
        assert!(matches!(transfer_all_amount(&broke, 200), Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_transfer_to_unseen_user_creates_nothing() {
        let (conn, users, economy) = setup().await;
        let from = account(&conn, &users, "1001", 100, 0).await;
        assert_eq!(user_rows(&conn).await, 1);

        assert!(matches!(
            users.lookup(&UserRef::Cid("2002".to_string())).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            economy.prepare_transfer(from, 4242, 10).await,
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(user_rows(&conn).await, 1);
        assert_eq!(ledger_rows(&conn).await, 0);
        assert_eq!(users.resolve_by_internal_id(from).await.unwrap().coin, 100);
    }

    #[tokio::test]
    async fn test_sign_in_credits_once() {
        let (conn, users, economy) = setup().await;
        let aid = account(&conn, &users, "1001", 10, 0).await;

        let outcome = economy
            .sign_in_with_rng(aid, Some("g"), now(), StdRng::seed_from_u64(1))
            .await
            .unwrap();
        let SignInOutcome::Signed { reward, balance, streak } = outcome else {
            panic!("first sign-in should succeed");
        };
        assert_eq!(streak, SignStreak { total_sign: 1, continue_sign: 1 });
        assert_eq!(balance, 10 + reward.total());

        let again = economy
            .sign_in_with_rng(aid, Some("g"), now(), StdRng::seed_from_u64(2))
            .await
            .unwrap();
        assert_eq!(again, SignInOutcome::AlreadySigned);
        assert_eq!(ledger_rows(&conn).await, 1);
    }

    #[tokio::test]
    async fn test_transfer_over_daily_cap_is_rejected() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 50, 180).await;
        let b = account(&conn, &users, "b", 5, 0).await;

        let result = economy.prepare_transfer(a, b, 30).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
        let forced = economy
            .execute_transfer(TransferPlan { from_aid: a, to_aid: b, amount: 30 }, None, now())
            .await;
        assert!(matches!(forced, Err(CoreError::Validation(_))));

        assert_eq!(users.resolve_by_internal_id(a).await.unwrap().coin, 50);
        assert_eq!(users.resolve_by_internal_id(b).await.unwrap().coin, 5);
        assert_eq!(ledger_rows(&conn).await, 0);
    }

    #[tokio::test]
    async fn test_transfer_moves_coins_with_two_entries() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 100, 0).await;
        let b = account(&conn, &users, "b", 7, 0).await;

        let plan = economy.prepare_transfer(a, b, 40).await.unwrap();
        let receipt = economy.execute_transfer(plan, Some("g"), now()).await.unwrap();
        assert_eq!(receipt, TransferReceipt { amount: 40, from_balance: 60, to_balance: 47 });

        let sender = users.resolve_by_internal_id(a).await.unwrap();
        assert_eq!(sender.coin, 60);
        assert_eq!(sender.today_transferred, 40);
        assert_eq!(users.resolve_by_internal_id(b).await.unwrap().coin, 47);

        let out = users.coin_history(a, 10).await.unwrap();
        let inc = users.coin_history(b, 10).await.unwrap();
        assert_eq!(ledger_rows(&conn).await, 2);
        assert_eq!(out[0].coin, -40);
        assert_eq!(inc[0].coin, 40);
    }

    #[tokio::test]
    async fn test_transfer_rechecks_balance_at_execution() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 100, 0).await;
        let b = account(&conn, &users, "b", 0, 0).await;

        let plan = economy.prepare_transfer(a, b, 80).await.unwrap();
        // 確認期間餘額被花掉
        users
            .reduce_coin(a, 50, false, LedgerMemo::new(None, "測試", ""), now())
            .await
            .unwrap();
        let result = economy.execute_transfer(plan, None, now()).await;
        assert!(matches!(result, Err(CoreError::InsufficientFunds { needed: 80, available: 50 })));
        assert_eq!(users.resolve_by_internal_id(b).await.unwrap().coin, 0);
        assert_eq!(users.resolve_by_internal_id(a).await.unwrap().today_transferred, 0);
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 100, 0).await;
        assert!(matches!(economy.prepare_transfer(a, a, 1).await, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_negative_transfer_is_punished() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 20, 0).await;
        assert_eq!(economy.punish_negative_transfer(a, 30, None, now()).await.unwrap(), 20);
        assert_eq!(users.resolve_by_internal_id(a).await.unwrap().coin, 0);
    }

    #[tokio::test]
    async fn test_tax_pass_charges_each_account_once() {
        let (conn, users, economy) = setup().await;
        let exact = account(&conn, &users, "exact", 1000, 0).await;
        let first_tier = account(&conn, &users, "tier1", 1100, 0).await;
        let rich = account(&conn, &users, "rich", 2000, 0).await;
        let poor = account(&conn, &users, "poor", 50, 0).await;

        let report = economy.run_tax_pass(now()).await.unwrap();
        assert_eq!(report, TaxReport { accounts: 2, total: 211 });
        assert_eq!(users.resolve_by_internal_id(exact).await.unwrap().coin, 1000);
        assert_eq!(users.resolve_by_internal_id(first_tier).await.unwrap().coin, 1089);
        assert_eq!(users.resolve_by_internal_id(rich).await.unwrap().coin, 1800);
        assert_eq!(users.resolve_by_internal_id(poor).await.unwrap().coin, 50);
        assert_eq!(ledger_rows(&conn).await, 2);
    }

    #[tokio::test]
    async fn test_daily_reset_is_idempotent() {
        let (conn, users, economy) = setup().await;
        let a = account(&conn, &users, "a", 100, 0).await;
        let b = account(&conn, &users, "b", 100, 0).await;
        let day = |d| NaiveDate::from_ymd_opt(2024, 5, d).unwrap();

        users.record_sign_in(a, None, day(1), now()).await.unwrap();
        users.record_sign_in(b, None, day(1), now()).await.unwrap();
        users.record_sign_in(b, None, day(2), now()).await.unwrap();
        users.record_talk(a).await.unwrap();
        let plan = economy.prepare_transfer(a, b, 10).await.unwrap();
        economy.execute_transfer(plan, None, now()).await.unwrap();

        let snapshot = |conn: Connection| async move {
            conn.call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT aid, is_sign, is_chat, today_transferred, continue_sign FROM core_user ORDER BY aid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?, row.get::<_, bool>(2)?,
                            row.get::<_, i64>(3)?, row.get::<_, i64>(4)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .unwrap()
        };

        // 5 月 3 日的重置：a 最後簽到在 5/1，連續天數歸零；b 在 5/2 簽到，保留
        let first = economy.daily_reset(day(3)).await.unwrap();
        assert_eq!(first.broken_streaks, 1);
        let after_once = snapshot(conn.clone()).await;
        let second = economy.daily_reset(day(3)).await.unwrap();
        assert_eq!(second, ResetReport::default());
        assert_eq!(snapshot(conn.clone()).await, after_once);

        assert_eq!(after_once, vec![(a, false, false, 0, 0), (b, false, false, 0, 2)]);
        let stats = economy.activity_count().await.unwrap();
        assert_eq!(stats, ActivityStats { all: 2, signed: 0, chatted: 0 });
    }
}
