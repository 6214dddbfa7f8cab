use crate::bot::guard::caller;
use crate::bot::{Context, Error};
use crate::utils::moderation::require_safe_text;
use crate::utils::time::format_day;
use crate::utils::user::validate_nickname;
use chrono::Utc;
use poise::{CreateReply, serenity_prelude as serenity};

const COIN_LOG_LIMIT: usize = 10;

/// 設定或查看暱稱
#[poise::command(slash_command)]
pub async fn nickname(
    ctx: Context<'_>,
    #[description = "新的暱稱（3-12 字）"] name: Option<String>,
) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;

    let Some(name) = name.map(|n| n.trim().to_string()) else {
        match &user.nickname {
            Some(current) => ctx.say(format!("你目前的暱稱是「{}」", current)).await?,
            None => ctx.say("你還沒有設定暱稱！").await?,
        };
        return Ok(());
    };

    validate_nickname(&name, user.nickname.as_deref())?;
    require_safe_text(data.moderator.as_ref(), &name).await?;
    data.users.set_nickname(user.aid, Some(name.clone())).await?;
    log::info!("[Func.nickname] AID {} 設定暱稱為 {}", user.aid, name);
    ctx.say(format!("暱稱已設定為「{}」", name)).await?;

    Ok(())
}

/// 查看自己的資料
#[poise::command(slash_command)]
pub async fn mydata(ctx: Context<'_>) -> Result<(), Error> {
    let user = caller(ctx, Utc::now()).await?;

    let last_sign = user
        .last_sign_day
        .map(format_day)
        .unwrap_or_else(|| "從未簽到".to_string());
    let embed = serenity::CreateEmbed::default()
        .title("我的資料")
        .fields([
            ("AID", user.aid.to_string(), true),
            (
                "暱稱",
                user.nickname.clone().unwrap_or_else(|| "未設定".to_string()),
                true,
            ),
            ("遊戲幣", user.coin.to_string(), true),
            ("累計簽到", format!("{} 天", user.total_sign), true),
            ("連續簽到", format!("{} 天", user.continue_sign), true),
            ("最後簽到", last_sign, true),
            ("發言次數", user.total_talk.to_string(), true),
            ("加入時間", user.join_time.clone(), true),
        ])
        .colour(serenity::Colour::BLURPLE);
    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}

/// 查看最近的遊戲幣紀錄
#[poise::command(slash_command)]
pub async fn coinlog(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;
    let entries = data.users.coin_history(user.aid, COIN_LOG_LIMIT).await?;

    if entries.is_empty() {
        ctx.say("目前沒有任何遊戲幣紀錄").await?;
        return Ok(());
    }

    let mut list = format!("最近 {} 筆遊戲幣紀錄（目前持有 {}）:\n", entries.len(), user.coin);
    for entry in &entries {
        list.push_str(&format!("`{}` {:+} {}", entry.time, entry.coin, entry.source));
        if !entry.detail.is_empty() {
            list.push_str(&format!("（{}）", entry.detail));
        }
        list.push('\n');
    }
    ctx.send(CreateReply::default().content(list).ephemeral(true))
        .await?;

    Ok(())
}
