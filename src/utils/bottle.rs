use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio_rusqlite::{Connection, OptionalExtension, params};

use crate::models::account::DebitOutcome;
use crate::models::bottle::{
    BOTTLE_COLUMNS, BottleDiscuss, BottleSummary, DriftBottle, FishedBottle, ReviewFlag, ReviewStatus,
};
use crate::models::types::BottleRules;
use crate::utils::error::{CoreError, CoreResult};
use crate::utils::ledger::{self, LedgerMemo};
use crate::utils::moderation::{SharedModerator, require_safe_text};
use crate::utils::time::timestamp;

pub const SOURCE_BOTTLE: &str = "漂流瓶";

/// What the user wants to put into a bottle.
#[derive(Debug, Clone, PartialEq)]
pub struct BottleDraft {
    pub text: Option<String>,
    /// Image URLs
    pub images: Vec<String>,
    pub anonymous: bool,
    /// -1 for unlimited
    pub remaining_pickups: i64,
}

/// A moderated draft with its price, waiting for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPlan {
    pub draft: BottleDraft,
    pub price: i64,
    pub flags: Vec<ReviewFlag>,
}

impl SubmissionPlan {
    pub fn status(&self) -> ReviewStatus {
        if self.flags.is_empty() {
            ReviewStatus::AiApproved
        } else {
            ReviewStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: i64,
    pub own: i64,
}

pub fn bottle_price(rules: &BottleRules, draft: &BottleDraft) -> i64 {
    let mut price = rules.base_price;
    if draft.text.is_some() {
        price += rules.text_surcharge;
    }
    price + rules.image_surcharge * draft.images.len() as i64
}

/// Normalise and check a draft before anything is charged.
pub fn validate_draft(rules: &BottleRules, mut draft: BottleDraft) -> CoreResult<BottleDraft> {
    draft.text = draft.text.filter(|t| !t.trim().is_empty());
    if draft.remaining_pickups != -1 && !(1..=rules.max_remaining_pickups).contains(&draft.remaining_pickups) {
        return Err(CoreError::validation(format!(
            "漂流瓶可撿取次數只能為 -1 或 1-{}！",
            rules.max_remaining_pickups
        )));
    }
    if let Some(text) = &draft.text {
        if text.chars().count() > rules.max_text_chars {
            return Err(CoreError::validation(format!(
                "你的漂流瓶內容過長（上限 {} 字）！",
                rules.max_text_chars
            )));
        }
    }
    if draft.images.len() > rules.max_images {
        return Err(CoreError::validation(format!(
            "丟漂流瓶只能攜帶最多 {} 張圖片哦！",
            rules.max_images
        )));
    }
    if draft.text.is_none() && draft.images.is_empty() {
        return Err(CoreError::validation("不可以丟空漂流瓶哦！"));
    }
    Ok(draft)
}

/// Mean of the ratings after dropping the lowest and highest 5% by rank,
/// rounded to one decimal. `None` until `min_ratings` ratings exist.
pub fn trimmed_mean(scores: &[i64], min_ratings: usize) -> Option<f64> {
    let n = scores.len();
    if n < min_ratings.max(1) {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_unstable();
    let kept = &sorted[n * 5 / 100..n * 95 / 100];
    if kept.is_empty() {
        return None;
    }
    let mean = kept.iter().sum::<i64>() as f64 / kept.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// Retrieval weight: the rounded score, or the default for unrated bottles.
pub fn pick_weight(score: Option<f64>, default_weight: f64) -> u32 {
    score.unwrap_or(default_weight).round().max(0.0) as u32
}

fn select_bottle(conn: &rusqlite::Connection, bottle_id: i64) -> rusqlite::Result<Option<DriftBottle>> {
    conn.query_row(
        &format!("SELECT {BOTTLE_COLUMNS} FROM drift_bottle WHERE bottle_id = ?1"),
        [bottle_id],
        DriftBottle::from_row,
    )
    .optional()
}

fn select_live_bottle(conn: &rusqlite::Connection, bottle_id: i64) -> rusqlite::Result<CoreResult<DriftBottle>> {
    Ok(match select_bottle(conn, bottle_id)? {
        Some(bottle) if !bottle.is_deleted => Ok(bottle),
        _ => Err(CoreError::not_found("沒有這個漂流瓶！")),
    })
}

fn score_of(conn: &rusqlite::Connection, bottle_id: i64, min_ratings: usize) -> rusqlite::Result<Option<f64>> {
    let mut stmt = conn.prepare("SELECT score FROM bottle_score WHERE bottle_id = ?1")?;
    let scores = stmt
        .query_map([bottle_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(trimmed_mean(&scores, min_ratings))
}

fn discussions_of(conn: &rusqlite::Connection, bottle_id: i64) -> rusqlite::Result<Vec<BottleDiscuss>> {
    let mut stmt = conn.prepare(
        "SELECT id, bottle_id, aid, text, create_time FROM bottle_discuss WHERE bottle_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([bottle_id], |row| {
            Ok(BottleDiscuss {
                id: row.get(0)?,
                bottle_id: row.get(1)?,
                aid: row.get(2)?,
                text: row.get(3)?,
                create_time: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// 漂流瓶：投放、打撈、評分、評論、刪除與人工審核
#[derive(Clone)]
pub struct BottleEngine {
    conn: Connection,
    rules: BottleRules,
    moderator: SharedModerator,
}

impl BottleEngine {
    pub fn new(conn: Connection, rules: BottleRules, moderator: SharedModerator) -> Self {
        Self { conn, rules, moderator }
    }

    pub fn rules(&self) -> &BottleRules {
        &self.rules
    }

    /// Validate, moderate and price a draft. Flagged content does not fail
    /// here; it sends the bottle to manual review.
    pub async fn prepare_submission(&self, draft: BottleDraft) -> CoreResult<SubmissionPlan> {
        let draft = validate_draft(&self.rules, draft)?;
        let mut flags = Vec::new();

        if let Some(text) = &draft.text {
            log::info!("[Func.drift_bottle] 正在審核漂流瓶文字");
            let verdict = self.moderator.text_moderation(text).await?;
            if !verdict.is_safe {
                flags.push(ReviewFlag {
                    index: 0,
                    label: verdict.label,
                    sub_label: verdict.sub_label,
                });
            }
        }
        if !draft.images.is_empty() {
            log::info!("[Func.drift_bottle] 正在審核漂流瓶圖片");
        }
        for (i, image) in draft.images.iter().enumerate() {
            let verdict = self.moderator.image_moderation(image).await?;
            if !verdict.is_safe {
                flags.push(ReviewFlag {
                    index: i + 1,
                    label: verdict.label,
                    sub_label: verdict.sub_label,
                });
            }
        }

        let price = bottle_price(&self.rules, &draft);
        Ok(SubmissionPlan { draft, price, flags })
    }

    /// Charge the price and store the bottle in one transaction.
    pub async fn submit(
        &self,
        aid: i64,
        group_id: Option<&str>,
        plan: SubmissionPlan,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let images = serde_json::to_string(&plan.draft.images)
            .map_err(|e| CoreError::DataIntegrity(format!("無法序列化圖片列表: {}", e)))?;
        let status = plan.status();
        let group_id = group_id.map(str::to_string);
        let bottle_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let memo = LedgerMemo::new(
                    group_id.as_deref(),
                    SOURCE_BOTTLE,
                    format!("丟出漂流瓶，售價 {}", plan.price),
                );
                if let DebitOutcome::Insufficient { available } =
                    ledger::debit(&tx, aid, plan.price, false, &memo, now)?
                {
                    return Ok(Err(CoreError::InsufficientFunds {
                        needed: plan.price,
                        available,
                    }));
                }
                tx.execute(
                    "INSERT INTO drift_bottle
                         (aid, group_id, text, images, anonymous, remaining_pickups, review_status, create_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        aid,
                        group_id,
                        plan.draft.text,
                        images,
                        plan.draft.anonymous,
                        plan.draft.remaining_pickups,
                        status,
                        timestamp(now)
                    ],
                )?;
                let bottle_id = tx.last_insert_rowid();
                if select_bottle(&tx, bottle_id)?.is_none() {
                    return Ok(Err(CoreError::DataIntegrity(format!("bottle {bottle_id} missing after insert"))));
                }
                tx.commit()?;
                Ok(Ok(bottle_id))
            })
            .await?
            .inspect_err(|e| {
                if e.is_internal() {
                    log::error!("[Func.drift_bottle] AID {} 丟漂流瓶失敗: {}", aid, e);
                }
            })?;

        log::info!(
            "[Func.drift_bottle] AID {} 丟出漂流瓶 {}（{}）",
            aid,
            bottle_id,
            status.as_str()
        );
        Ok(bottle_id)
    }

    pub async fn fish(&self, aid: i64, group_id: Option<&str>, now: DateTime<Utc>) -> CoreResult<FishedBottle> {
        self.fish_with_rng(aid, group_id, now, StdRng::from_os_rng()).await
    }

    /// Sample a few retrievable bottles, pick one weighted by score, charge
    /// the fee and count the pickup.
    pub async fn fish_with_rng<R: Rng + Send + 'static>(
        &self,
        aid: i64,
        group_id: Option<&str>,
        now: DateTime<Utc>,
        mut rng: R,
    ) -> CoreResult<FishedBottle> {
        let rules = self.rules.clone();
        let group_id = group_id.map(str::to_string);
        let fished = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let candidates = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {BOTTLE_COLUMNS} FROM drift_bottle
                         WHERE remaining_pickups <> 0 AND is_deleted = 0
                           AND review_status IN ({})
                         ORDER BY RANDOM() LIMIT ?1",
                        ReviewStatus::retrievable_sql_list()
                    ))?;
                    stmt.query_map([rules.sample_size as i64], DriftBottle::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                if candidates.is_empty() {
                    return Ok(Err(CoreError::not_found("沒有漂流瓶可以撿哦！")));
                }

                let mut weighted = Vec::with_capacity(candidates.len());
                for bottle in candidates {
                    let score = score_of(&tx, bottle.bottle_id, rules.min_ratings)?;
                    weighted.push((bottle, pick_weight(score, rules.default_weight)));
                }
                let picked = match weighted.choose_weighted(&mut rng, |(_, w)| *w) {
                    Ok((bottle, _)) => bottle.bottle_id,
                    Err(_) => weighted[0].0.bottle_id,
                };

                let memo = LedgerMemo::new(group_id.as_deref(), SOURCE_BOTTLE, "撈瓶子");
                if let DebitOutcome::Insufficient { available } =
                    ledger::debit(&tx, aid, rules.fish_price, false, &memo, now)?
                {
                    return Ok(Err(CoreError::InsufficientFunds {
                        needed: rules.fish_price,
                        available,
                    }));
                }
                tx.execute(
                    "UPDATE drift_bottle SET total_pickups = total_pickups + 1,
                         remaining_pickups = CASE WHEN remaining_pickups > 0
                             THEN remaining_pickups - 1 ELSE remaining_pickups END
                     WHERE bottle_id = ?1",
                    [picked],
                )?;

                let Some(bottle) = select_bottle(&tx, picked)? else {
                    return Ok(Err(CoreError::DataIntegrity(format!("bottle {picked} vanished while fishing"))));
                };
                let owner_nickname = if bottle.anonymous {
                    None
                } else {
                    tx.query_row("SELECT nickname FROM core_user WHERE aid = ?1", [bottle.aid], |row| {
                        row.get::<_, Option<String>>(0)
                    })
                    .optional()?
                    .flatten()
                };
                let score = score_of(&tx, picked, rules.min_ratings)?;
                let discussions = discussions_of(&tx, picked)?;
                tx.commit()?;
                Ok(Ok(FishedBottle {
                    bottle,
                    score,
                    owner_nickname,
                    discussions,
                }))
            })
            .await??;

        log::debug!("[Func.drift_bottle] AID {} 撈到的漂流瓶：{}", aid, fished.bottle.bottle_id);
        Ok(fished)
    }

    /// Rate a bottle 1-5. Rating again replaces the earlier score. Returns the
    /// bottle's aggregate score afterwards.
    pub async fn score(&self, aid: i64, bottle_id: i64, score: i64, now: DateTime<Utc>) -> CoreResult<Option<f64>> {
        if !(1..=5).contains(&score) {
            return Err(CoreError::validation("評分僅可為 1-5 分！"));
        }
        let min_ratings = self.rules.min_ratings;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let bottle = match select_live_bottle(&tx, bottle_id)? {
                    Ok(bottle) => bottle,
                    Err(e) => return Ok(Err(e)),
                };
                if bottle.aid == aid {
                    return Ok(Err(CoreError::permission("你不能給自己的漂流瓶評分！")));
                }
                tx.execute(
                    "INSERT INTO bottle_score (bottle_id, aid, score, create_time) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(bottle_id, aid) DO UPDATE SET score = excluded.score, create_time = excluded.create_time",
                    params![bottle_id, aid, score, timestamp(now)],
                )?;
                let aggregate = score_of(&tx, bottle_id, min_ratings)?;
                tx.commit()?;
                Ok(Ok(aggregate))
            })
            .await??)
    }

    /// Comment on a bottle. The text must pass moderation.
    pub async fn discuss(&self, aid: i64, bottle_id: i64, text: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let text = text.trim().to_string();
        let len = text.chars().count();
        if !(self.rules.discuss_min_chars..=self.rules.discuss_max_chars).contains(&len) {
            return Err(CoreError::validation(format!(
                "評論字數需在 {}-{} 字之間！",
                self.rules.discuss_min_chars, self.rules.discuss_max_chars
            )));
        }
        let cap = self.rules.discuss_per_rater;

        // 先檢查上限，避免為注定失敗的評論呼叫審核
        self.conn
            .call(move |conn| Ok(discuss_allowed(conn, aid, bottle_id, cap)?))
            .await??;

        require_safe_text(self.moderator.as_ref(), &text).await?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Err(e) = discuss_allowed(&tx, aid, bottle_id, cap)? {
                    return Ok(Err(e));
                }
                tx.execute(
                    "INSERT INTO bottle_discuss (bottle_id, aid, text, create_time) VALUES (?1, ?2, ?3, ?4)",
                    params![bottle_id, aid, text, timestamp(now)],
                )?;
                tx.commit()?;
                Ok(Ok(()))
            })
            .await??;
        log::info!("[Func.drift_bottle] AID {} 評論了漂流瓶 {}", aid, bottle_id);
        Ok(())
    }

    /// Owner-only soft delete with a small refund. Returns the refund.
    pub async fn delete(&self, aid: i64, bottle_id: i64, group_id: Option<&str>, now: DateTime<Utc>) -> CoreResult<i64> {
        let refund = self.rules.delete_refund;
        let group_id = group_id.map(str::to_string);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let bottle = match select_live_bottle(&tx, bottle_id)? {
                    Ok(bottle) => bottle,
                    Err(e) => return Ok(Err(e)),
                };
                if bottle.aid != aid {
                    return Ok(Err(CoreError::permission("你沒有權限刪除這個漂流瓶！")));
                }
                tx.execute("UPDATE drift_bottle SET is_deleted = 1 WHERE bottle_id = ?1", [bottle_id])?;
                let memo = LedgerMemo::new(group_id.as_deref(), SOURCE_BOTTLE, format!("刪除瓶子 {}", bottle_id));
                ledger::credit(&tx, aid, refund, &memo, now)?;
                tx.commit()?;
                Ok(Ok(()))
            })
            .await??;
        log::info!("[Func.drift_bottle] AID {} 刪除了漂流瓶 {}", aid, bottle_id);
        Ok(refund)
    }

    /// The owner's view of one of their bottles, deleted ones included.
    pub async fn check_own(&self, aid: i64, bottle_id: i64) -> CoreResult<BottleSummary> {
        let min_ratings = self.rules.min_ratings;
        self.conn
            .call(move |conn| {
                let Some(bottle) = select_bottle(conn, bottle_id)? else {
                    return Ok(Err(CoreError::not_found("沒有這個漂流瓶！")));
                };
                if bottle.aid != aid {
                    return Ok(Err(CoreError::permission("你沒有權限查看這個漂流瓶！")));
                }
                let score = score_of(conn, bottle_id, min_ratings)?;
                Ok(Ok(BottleSummary { bottle, score }))
            })
            .await?
    }

    /// Latest bottles of an owner, newest first, with the owner's total count.
    pub async fn list_own(&self, aid: i64, limit: usize) -> CoreResult<(i64, Vec<BottleSummary>)> {
        let min_ratings = self.rules.min_ratings;
        Ok(self
            .conn
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM drift_bottle WHERE aid = ?1 AND is_deleted = 0",
                    [aid],
                    |row| row.get(0),
                )?;
                let bottles = {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {BOTTLE_COLUMNS} FROM drift_bottle WHERE aid = ?1 AND is_deleted = 0
                         ORDER BY bottle_id DESC LIMIT ?2"
                    ))?;
                    stmt.query_map(params![aid, limit as i64], DriftBottle::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                let mut summaries = Vec::with_capacity(bottles.len());
                for bottle in bottles {
                    let score = score_of(conn, bottle.bottle_id, min_ratings)?;
                    summaries.push(BottleSummary { bottle, score });
                }
                Ok((total, summaries))
            })
            .await?)
    }

    pub async fn pool_stats(&self, aid: i64) -> CoreResult<PoolStats> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(aid = ?1), 0) FROM drift_bottle WHERE is_deleted = 0",
                    [aid],
                    |row| {
                        Ok(PoolStats {
                            total: row.get(0)?,
                            own: row.get(1)?,
                        })
                    },
                )?)
            })
            .await?)
    }

    /// Bottles waiting for manual review, oldest first.
    pub async fn pending(&self, limit: usize) -> CoreResult<Vec<DriftBottle>> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BOTTLE_COLUMNS} FROM drift_bottle
                     WHERE review_status = 'pending' AND is_deleted = 0 ORDER BY bottle_id LIMIT ?1"
                ))?;
                let bottles = stmt
                    .query_map([limit as i64], DriftBottle::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(bottles)
            })
            .await?)
    }

    /// Manual review of a pending bottle.
    pub async fn review(&self, bottle_id: i64, approve: bool) -> CoreResult<ReviewStatus> {
        let status = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let bottle = match select_live_bottle(&tx, bottle_id)? {
                    Ok(bottle) => bottle,
                    Err(e) => return Ok(Err(e)),
                };
                let Some(next) = bottle.review_status.manual_transition(approve) else {
                    return Ok(Err(CoreError::validation(format!(
                        "漂流瓶 {} 不在待審核狀態（{}）！",
                        bottle_id,
                        bottle.review_status.as_str()
                    ))));
                };
                tx.execute(
                    "UPDATE drift_bottle SET review_status = ?1 WHERE bottle_id = ?2 AND review_status = ?3",
                    params![next, bottle_id, ReviewStatus::Pending],
                )?;
                tx.commit()?;
                Ok(Ok(next))
            })
            .await??;
        log::info!("[Func.drift_bottle] 漂流瓶 {} 人工審核結果：{}", bottle_id, status.as_str());
        Ok(status)
    }
}

fn discuss_allowed(conn: &rusqlite::Connection, aid: i64, bottle_id: i64, cap: i64) -> rusqlite::Result<CoreResult<()>> {
    if let Err(e) = select_live_bottle(conn, bottle_id)? {
        return Ok(Err(e));
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bottle_discuss WHERE bottle_id = ?1 AND aid = ?2",
        [bottle_id, aid],
        |row| row.get(0),
    )?;
    if count >= cap {
        return Ok(Err(CoreError::validation(format!(
            "你已對該漂流瓶發表過 {} 條評論，無法再次發送！",
            cap
        ))));
    }
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::db;
    use crate::utils::moderation::tests::StubModerator;
    use crate::utils::user::UserManager;
    use std::sync::Arc;

    struct Fixture {
        conn: Connection,
        users: UserManager,
        engine: BottleEngine,
    }

    async fn fixture(blocked: &[&str]) -> Fixture {
        let conn = db::memory().await;
        let users = UserManager::new(conn.clone(), 10);
        let engine = BottleEngine::new(
            conn.clone(),
            BottleRules::default(),
            Arc::new(StubModerator::blocking(blocked)),
        );
        Fixture { conn, users, engine }
    }

    fn text_draft(text: &str) -> BottleDraft {
        BottleDraft {
            text: Some(text.to_string()),
            images: Vec::new(),
            anonymous: false,
            remaining_pickups: -1,
        }
    }

    impl Fixture {
        async fn user(&self, cid: &str, coin: i64) -> i64 {
            let aid = self.users.resolve_by_external_id(cid, Utc::now()).await.unwrap().aid;
            self.conn
                .call(move |conn| {
                    conn.execute("UPDATE core_user SET coin = ?1 WHERE aid = ?2", [coin, aid])?;
                    Ok(())
                })
                .await
                .unwrap();
            aid
        }

        async fn raw_bottle(&self, aid: i64, status: ReviewStatus, remaining: i64, deleted: bool) -> i64 {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO drift_bottle (aid, text, images, remaining_pickups, review_status, create_time, is_deleted)
                         VALUES (?1, 'hi', '[]', ?2, ?3, '2024-05-01 12:00:00', ?4)",
                        params![aid, remaining, status, deleted],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await
                .unwrap()
        }

        async fn coin(&self, aid: i64) -> i64 {
            self.users.resolve_by_internal_id(aid).await.unwrap().coin
        }
    }

    #[test]
    fn test_price_and_validation() {
        let rules = BottleRules::default();
        assert_eq!(bottle_price(&rules, &text_draft("hello")), 3);
        let mixed = BottleDraft {
            images: vec!["a".into(), "b".into()],
            ..text_draft("hello")
        };
        assert_eq!(bottle_price(&rules, &mixed), 9);

        assert!(validate_draft(&rules, text_draft("   ")).is_err());
        assert!(validate_draft(&rules, text_draft(&"字".repeat(401))).is_err());
        assert!(validate_draft(&rules, text_draft(&"字".repeat(400))).is_ok());
        let too_many = BottleDraft {
            text: None,
            images: (0..6).map(|i| i.to_string()).collect(),
            ..text_draft("")
        };
        assert!(validate_draft(&rules, too_many).is_err());
        for remaining in [0, 1001, -2] {
            let draft = BottleDraft { remaining_pickups: remaining, ..text_draft("hello") };
            assert!(validate_draft(&rules, draft).is_err());
        }
    }

    #[test]
    fn test_trimmed_mean() {
        assert_eq!(trimmed_mean(&[5, 4], 3), None);
        assert_eq!(trimmed_mean(&[1, 5, 3], 3), Some(2.0));
        assert_eq!(trimmed_mean(&[4, 4, 4, 4], 3), Some(4.0));
        // 20 筆評分時去掉最低與最高各一筆
        let mut scores = vec![3; 18];
        scores.push(1);
        scores.push(5);
        assert_eq!(trimmed_mean(&scores, 3), Some(3.0));
        assert_eq!(pick_weight(None, 3.0), 3);
        assert_eq!(pick_weight(Some(2.5), 3.0), 3);
        assert_eq!(pick_weight(Some(4.4), 3.0), 4);
    }

    #[tokio::test]
    async fn test_moderation_routes_to_review() {
        let f = fixture(&["廣告"]).await;
        let clean = f.engine.prepare_submission(text_draft("今天天氣很好")).await.unwrap();
        assert_eq!(clean.status(), ReviewStatus::AiApproved);
        assert_eq!(clean.price, 3);

        let draft = BottleDraft {
            images: vec!["https://img/ok.png".into(), "https://img/廣告.png".into()],
            ..text_draft("加我看廣告")
        };
        let flagged = f.engine.prepare_submission(draft).await.unwrap();
        assert_eq!(flagged.status(), ReviewStatus::Pending);
        let indices: Vec<usize> = flagged.flags.iter().map(|flag| flag.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_moderation_outage_is_external_error() {
        let conn = db::memory().await;
        let engine = BottleEngine::new(
            conn,
            BottleRules::default(),
            Arc::new(StubModerator { fail: true, ..Default::default() }),
        );
        let result = engine.prepare_submission(text_draft("hello")).await;
        assert!(matches!(result, Err(CoreError::ExternalService(_))));
    }

    #[tokio::test]
    async fn test_submit_is_atomic() {
        let f = fixture(&[]).await;
        let poor = f.user("poor", 2).await;
        let rich = f.user("rich", 10).await;
        let plan = f.engine.prepare_submission(text_draft("hello")).await.unwrap();

        let result = f.engine.submit(poor, Some("g"), plan.clone(), Utc::now()).await;
        assert!(matches!(result, Err(CoreError::InsufficientFunds { needed: 3, available: 2 })));
        assert_eq!(f.engine.pool_stats(poor).await.unwrap(), PoolStats { total: 0, own: 0 });
        assert_eq!(f.coin(poor).await, 2);

        let id = f.engine.submit(rich, Some("g"), plan, Utc::now()).await.unwrap();
        assert_eq!(f.coin(rich).await, 7);
        let summary = f.engine.check_own(rich, id).await.unwrap();
        assert_eq!(summary.bottle.review_status, ReviewStatus::AiApproved);
        assert_eq!(summary.bottle.text.as_deref(), Some("hello"));
        assert_eq!(summary.score, None);
    }

    #[tokio::test]
    async fn test_fish_only_returns_retrievable_bottles() {
        let f = fixture(&[]).await;
        let owner = f.user("owner", 0).await;
        let finder = f.user("finder", 1000).await;
        f.raw_bottle(owner, ReviewStatus::Pending, -1, false).await;
        f.raw_bottle(owner, ReviewStatus::Rejected, -1, false).await;
        f.raw_bottle(owner, ReviewStatus::Approved, 0, false).await;
        f.raw_bottle(owner, ReviewStatus::AiApproved, -1, true).await;
        let good = f.raw_bottle(owner, ReviewStatus::AiApproved, 2, false).await;

        for seed in 0..2 {
            let fished = f
                .engine
                .fish_with_rng(finder, None, Utc::now(), StdRng::seed_from_u64(seed))
                .await
                .unwrap();
            assert_eq!(fished.bottle.bottle_id, good);
        }
        let exhausted = f.engine.check_own(owner, good).await.unwrap().bottle;
        assert_eq!(exhausted.remaining_pickups, 0);
        assert_eq!(exhausted.total_pickups, 2);

        let none = f.engine.fish_with_rng(finder, None, Utc::now(), StdRng::seed_from_u64(9)).await;
        assert!(matches!(none, Err(CoreError::NotFound(_))));
        assert_eq!(f.coin(finder).await, 994);
    }

    #[tokio::test]
    async fn test_fish_requires_fee() {
        let f = fixture(&[]).await;
        let owner = f.user("owner", 0).await;
        let finder = f.user("finder", 2).await;
        let id = f.raw_bottle(owner, ReviewStatus::Approved, 5, false).await;

        let result = f.engine.fish_with_rng(finder, None, Utc::now(), StdRng::seed_from_u64(1)).await;
        assert!(matches!(result, Err(CoreError::InsufficientFunds { .. })));
        assert_eq!(f.engine.check_own(owner, id).await.unwrap().bottle.remaining_pickups, 5);
    }

    #[tokio::test]
    async fn test_scoring_rules() {
        let f = fixture(&[]).await;
        let owner = f.user("owner", 0).await;
        let id = f.raw_bottle(owner, ReviewStatus::Approved, -1, false).await;
        let raters = [f.user("r1", 0).await, f.user("r2", 0).await, f.user("r3", 0).await];

        assert!(matches!(f.engine.score(owner, id, 5, Utc::now()).await, Err(CoreError::Permission(_))));
        assert!(matches!(f.engine.score(raters[0], id, 6, Utc::now()).await, Err(CoreError::Validation(_))));
        assert!(matches!(f.engine.score(raters[0], 999, 3, Utc::now()).await, Err(CoreError::NotFound(_))));

        assert_eq!(f.engine.score(raters[0], id, 1, Utc::now()).await.unwrap(), None);
        assert_eq!(f.engine.score(raters[1], id, 5, Utc::now()).await.unwrap(), None);
        assert_eq!(f.engine.score(raters[2], id, 3, Utc::now()).await.unwrap(), Some(2.0));
        // 重新評分會覆蓋舊分數
        assert_eq!(f.engine.score(raters[0], id, 5, Utc::now()).await.unwrap(), Some(4.0));
    }

    #[tokio::test]
    async fn test_discussion_cap_and_moderation() {
        let f = fixture(&["笨蛋"]).await;
        let owner = f.user("owner", 0).await;
        let id = f.raw_bottle(owner, ReviewStatus::Approved, -1, false).await;
        let reader = f.user("reader", 0).await;

        assert!(matches!(f.engine.discuss(reader, id, "嗨", Utc::now()).await, Err(CoreError::Validation(_))));
        assert!(matches!(
            f.engine.discuss(reader, id, "你是笨蛋嗎", Utc::now()).await,
            Err(CoreError::ModerationRejected { .. })
        ));
        for i in 0..3 {
            f.engine.discuss(reader, id, &format!("第 {} 則評論", i), Utc::now()).await.unwrap();
        }
        assert!(matches!(
            f.engine.discuss(reader, id, "第四則評論", Utc::now()).await,
            Err(CoreError::Validation(_))
        ));
        f.engine.discuss(owner, id, "謝謝大家", Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_owner_only_and_refunds() {
        let f = fixture(&[]).await;
        let owner = f.user("owner", 0).await;
        let other = f.user("other", 100).await;
        let id = f.raw_bottle(owner, ReviewStatus::Approved, -1, false).await;

        assert!(matches!(f.engine.delete(other, id, None, Utc::now()).await, Err(CoreError::Permission(_))));
        assert_eq!(f.engine.delete(owner, id, None, Utc::now()).await.unwrap(), 1);
        assert_eq!(f.coin(owner).await, 1);
        assert!(matches!(f.engine.delete(owner, id, None, Utc::now()).await, Err(CoreError::NotFound(_))));

        assert!(f.engine.check_own(owner, id).await.unwrap().bottle.is_deleted);
        assert_eq!(f.engine.list_own(owner, 20).await.unwrap().0, 0);
        let fished = f.engine.fish_with_rng(other, None, Utc::now(), StdRng::seed_from_u64(3)).await;
        assert!(matches!(fished, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_review() {
        let f = fixture(&[]).await;
        let owner = f.user("owner", 0).await;
        let id = f.raw_bottle(owner, ReviewStatus::Pending, -1, false).await;
        let other = f.raw_bottle(owner, ReviewStatus::AiApproved, -1, false).await;

        assert_eq!(f.engine.pending(10).await.unwrap().len(), 1);
        assert_eq!(f.engine.review(id, true).await.unwrap(), ReviewStatus::Approved);
        assert!(matches!(f.engine.review(id, false).await, Err(CoreError::Validation(_))));
        assert!(matches!(f.engine.review(other, false).await, Err(CoreError::Validation(_))));
        assert!(f.engine.pending(10).await.unwrap().is_empty());
    }
}
