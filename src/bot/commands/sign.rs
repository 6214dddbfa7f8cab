use crate::bot::guard::{caller, group_key};
use crate::bot::{Context, Error};
use crate::utils::economy::{SignInOutcome, days_to_next_bonus};
use crate::utils::time::greeting;
use chrono::Utc;
use poise::{CreateReply, serenity_prelude as serenity};

/// 每日簽到，領取遊戲幣
#[poise::command(slash_command)]
pub async fn sign(ctx: Context<'_>) -> Result<(), Error> {
    let now = Utc::now();
    let user = caller(ctx, now).await?;
    let group = group_key(ctx);

    match ctx.data().economy.sign_in(user.aid, group.as_deref(), now).await? {
        SignInOutcome::AlreadySigned => {
            ctx.say(format!("{}，你今天已經簽到過了，明天再來吧！", user.display_name()))
                .await?;
        }
        SignInOutcome::Signed {
            streak,
            reward,
            balance,
        } => {
            let mut lines = Vec::new();
            if reward.first_bonus > 0 {
                lines.push(format!("🎉 首次簽到，額外獲得 {} 遊戲幣", reward.first_bonus));
            }
            if reward.lucky {
                lines.push(format!("🍀 今天運氣不錯，獲得 {} 遊戲幣", reward.base));
            } else {
                lines.push(format!("獲得 {} 遊戲幣", reward.base));
            }
            if reward.streak_bonus > 0 {
                lines.push(format!(
                    "連續簽到 {} 天，額外獲得 {} 遊戲幣",
                    streak.continue_sign, reward.streak_bonus
                ));
            }
            lines.push(format!(
                "累計簽到 {} 天，連續簽到 {} 天，再連續簽到 {} 天可領取連續簽到獎勵",
                streak.total_sign,
                streak.continue_sign,
                days_to_next_bonus(streak.continue_sign)
            ));
            lines.push(format!("目前持有 {} 遊戲幣", balance));

            let embed = serenity::CreateEmbed::default()
                .title(format!("{}，{}", greeting(now), user.display_name()))
                .description(lines.join("\n"))
                .colour(serenity::Colour::DARK_GREEN);
            ctx.send(CreateReply::default().embed(embed)).await?;
        }
    }

    Ok(())
}
