use crate::bot::confirm::confirm_action;
use crate::bot::guard::{caller, group_key};
use crate::bot::{Context, Error};
use crate::models::bottle::{BottleSummary, DriftBottle, FishedBottle};
use crate::utils::bottle::BottleDraft;
use chrono::Utc;
use poise::{CreateReply, serenity_prelude as serenity};

const OWN_LIST_LIMIT: usize = 20;

fn pickups_text(bottle: &DriftBottle) -> String {
    if bottle.remaining_pickups < 0 {
        format!("已被撿 {} 次，剩餘無限次", bottle.total_pickups)
    } else {
        format!(
            "已被撿 {} 次，剩餘 {} 次",
            bottle.total_pickups, bottle.remaining_pickups
        )
    }
}

fn score_text(score: Option<f64>) -> String {
    score.map_or_else(|| "評分人數不足".to_string(), |s| format!("{:.1} 分", s))
}

fn author_text(fished: &FishedBottle) -> String {
    if fished.bottle.anonymous {
        return "匿名".to_string();
    }
    match &fished.owner_nickname {
        Some(nickname) => nickname.clone(),
        None => format!("AID {}", fished.bottle.aid),
    }
}

fn summary_line(summary: &BottleSummary) -> String {
    let bottle = &summary.bottle;
    let deleted = if bottle.is_deleted { "（已刪除）" } else { "" };
    format!(
        "{} #{} {}，{}，{}{}",
        bottle.review_status.icon(),
        bottle.bottle_id,
        bottle.create_time,
        pickups_text(bottle),
        score_text(summary.score),
        deleted
    )
}

fn bottle_embed(fished: &FishedBottle) -> serenity::CreateEmbed {
    let bottle = &fished.bottle;
    let mut description = bottle.text.clone().unwrap_or_default();
    for url in bottle.images.iter().skip(1) {
        description.push_str(&format!("\n{}", url));
    }
    if !fished.discussions.is_empty() {
        description.push_str("\n\n**評論**");
        for discuss in &fished.discussions {
            description.push_str(&format!("\n`{}` {}", discuss.create_time, discuss.text));
        }
    }

    let mut embed = serenity::CreateEmbed::default()
        .title(format!("漂流瓶 #{}", bottle.bottle_id))
        .description(description)
        .fields([
            ("投放者", author_text(fished), true),
            ("評分", score_text(fished.score), true),
            ("撿取", pickups_text(bottle), false),
        ])
        .footer(serenity::CreateEmbedFooter::new(format!("投放於 {}", bottle.create_time)))
        .colour(serenity::Colour::TEAL);
    if let Some(first) = bottle.images.first() {
        embed = embed.image(first);
    }
    embed
}

/// 漂流瓶
#[poise::command(
    slash_command,
    subcommands("info", "drop_bottle", "get", "check", "delete", "score", "discuss"),
    subcommand_required
)]
pub async fn bottle(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// 查看漂流瓶池的狀態
#[poise::command(slash_command)]
pub async fn info(ctx: Context<'_>) -> Result<(), Error> {
    let user = caller(ctx, Utc::now()).await?;
    let stats = ctx.data().bottles.pool_stats(user.aid).await?;
    ctx.say(format!(
        "目前海中共有 {} 個漂流瓶，其中 {} 個是你投放的",
        stats.total, stats.own
    ))
    .await?;
    Ok(())
}

/// 投放一個漂流瓶
#[poise::command(slash_command, rename = "drop")]
#[allow(clippy::too_many_arguments)]
pub async fn drop_bottle(
    ctx: Context<'_>,
    #[description = "漂流瓶內容"] text: Option<String>,
    #[description = "圖片"] image: Option<serenity::Attachment>,
    #[description = "圖片 2"] image2: Option<serenity::Attachment>,
    #[description = "圖片 3"] image3: Option<serenity::Attachment>,
    #[description = "圖片 4"] image4: Option<serenity::Attachment>,
    #[description = "圖片 5"] image5: Option<serenity::Attachment>,
    #[description = "匿名投放"] anonymous: Option<bool>,
    #[description = "可被撿取次數，-1 為無限"] remaining: Option<i64>,
) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;

    let images = [image, image2, image3, image4, image5]
        .into_iter()
        .flatten()
        .map(|attachment| attachment.url)
        .collect();
    let draft = BottleDraft {
        text,
        images,
        anonymous: anonymous.unwrap_or(false),
        remaining_pickups: remaining.unwrap_or(-1),
    };

    ctx.defer_ephemeral().await?;
    let plan = data.bottles.prepare_submission(draft).await?;

    let mut prompt = format!("投放這個漂流瓶需要 {} 遊戲幣，確認投放？", plan.price);
    if !plan.flags.is_empty() {
        prompt.push_str("\n內容需要人工審核，審核通過前不會被撿到。");
    }
    if !confirm_action(&ctx, prompt).await? {
        return Ok(());
    }

    let status = plan.status();
    let bottle_id = data
        .bottles
        .submit(user.aid, group_key(ctx).as_deref(), plan, Utc::now())
        .await?;
    ctx.say(format!(
        "{} 漂流瓶 #{} 已經投放到海裡了！",
        status.icon(),
        bottle_id
    ))
    .await?;
    Ok(())
}

/// 撿一個漂流瓶
#[poise::command(slash_command)]
pub async fn get(ctx: Context<'_>) -> Result<(), Error> {
    let now = Utc::now();
    let user = caller(ctx, now).await?;
    let fished = ctx
        .data()
        .bottles
        .fish(user.aid, group_key(ctx).as_deref(), now)
        .await?;
    ctx.send(CreateReply::default().embed(bottle_embed(&fished)))
        .await?;
    Ok(())
}

/// 查看自己投放的漂流瓶
#[poise::command(slash_command)]
pub async fn check(
    ctx: Context<'_>,
    #[description = "漂流瓶編號，不填則列出最近的漂流瓶"] id: Option<i64>,
) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;

    let content = match id {
        Some(id) => {
            let summary = data.bottles.check_own(user.aid, id).await?;
            let bottle = &summary.bottle;
            let mut content = summary_line(&summary);
            if let Some(text) = &bottle.text {
                content.push_str(&format!("\n{}", text));
            }
            for url in &bottle.images {
                content.push_str(&format!("\n{}", url));
            }
            content
        }
        None => {
            let (total, bottles) = data.bottles.list_own(user.aid, OWN_LIST_LIMIT).await?;
            if bottles.is_empty() {
                "你還沒有投放過漂流瓶！".to_string()
            } else {
                let mut content = format!("你共有 {} 個漂流瓶，最近的 {} 個:\n", total, bottles.len());
                for summary in &bottles {
                    content.push_str(&summary_line(summary));
                    content.push('\n');
                }
                content
            }
        }
    };
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// 刪除自己的漂流瓶
#[poise::command(slash_command)]
pub async fn delete(
    ctx: Context<'_>,
    #[description = "漂流瓶編號"] id: i64,
) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;
    // 確認前先檢查所有權
    data.bottles.check_own(user.aid, id).await?;

    if !confirm_action(&ctx, format!("確認刪除漂流瓶 #{}？", id)).await? {
        return Ok(());
    }
    let refund = data
        .bottles
        .delete(user.aid, id, group_key(ctx).as_deref(), Utc::now())
        .await?;
    ctx.say(format!("漂流瓶 #{} 已刪除，退還 {} 遊戲幣", id, refund))
        .await?;
    Ok(())
}

/// 為漂流瓶評分
#[poise::command(slash_command)]
pub async fn score(
    ctx: Context<'_>,
    #[description = "漂流瓶編號"] id: i64,
    #[description = "評分 1-5"]
    #[min = 1]
    #[max = 5]
    score: i64,
) -> Result<(), Error> {
    let now = Utc::now();
    let user = caller(ctx, now).await?;
    let aggregate = ctx.data().bottles.score(user.aid, id, score, now).await?;
    ctx.say(format!(
        "已為漂流瓶 #{} 評 {} 分，目前評分：{}",
        id,
        score,
        score_text(aggregate)
    ))
    .await?;
    Ok(())
}

/// 評論漂流瓶
#[poise::command(slash_command)]
pub async fn discuss(
    ctx: Context<'_>,
    #[description = "漂流瓶編號"] id: i64,
    #[description = "評論內容"] text: String,
) -> Result<(), Error> {
    let now = Utc::now();
    let user = caller(ctx, now).await?;
    ctx.defer().await?;
    ctx.data().bottles.discuss(user.aid, id, &text, now).await?;
    ctx.say(format!("已評論漂流瓶 #{}", id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bottle::ReviewStatus;

    fn bottle(remaining: i64, anonymous: bool) -> DriftBottle {
        DriftBottle {
            bottle_id: 7,
            aid: 3,
            group_id: None,
            text: Some("hello".to_string()),
            images: Vec::new(),
            anonymous,
            total_pickups: 2,
            remaining_pickups: remaining,
            review_status: ReviewStatus::AiApproved,
            create_time: "2024-05-02 10:00:00".to_string(),
            is_deleted: false,
        }
    }

    #[test]
    fn test_pickups_text() {
        assert!(pickups_text(&bottle(-1, false)).contains("無限"));
        assert!(pickups_text(&bottle(4, false)).contains("剩餘 4 次"));
    }

    #[test]
    fn test_anonymous_author_is_hidden() {
        let fished = FishedBottle {
            bottle: bottle(1, true),
            score: Some(4.5),
            owner_nickname: Some("小明".to_string()),
            discussions: Vec::new(),
        };
        assert_eq!(author_text(&fished), "匿名");

        let named = FishedBottle {
            bottle: bottle(1, false),
            owner_nickname: None,
            ..fished
        };
        assert_eq!(author_text(&named), "AID 3");
        assert_eq!(score_text(Some(4.5)), "4.5 分");
        assert_eq!(score_text(None), "評分人數不足");
    }
}
