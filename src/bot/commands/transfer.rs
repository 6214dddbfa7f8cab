use crate::bot::confirm::confirm_action;
use crate::bot::guard::{caller, group_key};
use crate::bot::{Context, Error};
use crate::models::account::UserRef;
use crate::utils::economy::{TransferAmount, parse_transfer_amount, transfer_all_amount};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// 轉帳遊戲幣給其他用戶
#[poise::command(slash_command)]
pub async fn transfer(
    ctx: Context<'_>,
    #[description = "轉帳對象"] user: Option<serenity::User>,
    #[description = "轉帳對象的 AID"] aid: Option<i64>,
    #[description = "轉帳數量"] amount: Option<String>,
    #[description = "轉出全部可轉的遊戲幣"] all: Option<bool>,
) -> Result<(), Error> {
    let data = ctx.data();
    let now = Utc::now();
    let group = group_key(ctx);
    let sender = caller(ctx, now).await?;

    let target = match (user, aid) {
        (Some(user), _) => UserRef::Cid(user.id.get().to_string()),
        (None, Some(aid)) => UserRef::Aid(aid),
        (None, None) => {
            ctx.say("請指定轉帳對象！").await?;
            return Ok(());
        }
    };
    let recipient = data.users.lookup(&target).await?;

    let amount = if all.unwrap_or(false) {
        transfer_all_amount(&sender, data.economy.rules().transfer_daily_cap)?
    } else {
        let raw = amount.unwrap_or_default();
        match parse_transfer_amount(&raw, data.economy.rules().transfer_max_digits)? {
            TransferAmount::Positive(amount) => amount,
            TransferAmount::Negative(amount) => {
                let removed = data
                    .economy
                    .punish_negative_transfer(sender.aid, amount, group.as_deref(), now)
                    .await?;
                ctx.say(format!("想偷遊戲幣？罰款 {} 遊戲幣！", removed)).await?;
                return Ok(());
            }
        }
    };

    let plan = data
        .economy
        .prepare_transfer(sender.aid, recipient.aid, amount)
        .await?;

    if !confirm_action(
        &ctx,
        format!("確認轉帳 {} 遊戲幣給 {}？", plan.amount, recipient.display_name()),
    )
    .await?
    {
        return Ok(());
    }

    let receipt = data
        .economy
        .execute_transfer(plan, group.as_deref(), Utc::now())
        .await?;
    ctx.say(format!(
        "{} 已轉帳 {} 遊戲幣給 {}，你目前持有 {} 遊戲幣",
        sender.display_name(),
        receipt.amount,
        recipient.display_name(),
        receipt.from_balance
    ))
    .await?;

    Ok(())
}
