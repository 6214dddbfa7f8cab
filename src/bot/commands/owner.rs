use crate::bot::guard::caller;
use crate::bot::{Context, Error};
use chrono::Utc;
use poise::CreateReply;
use rand::Rng;
use rand::distr::Alphanumeric;

pub const OWNER_CODE_LEN: usize = 16;

/// Random code printed to the log when no owner is configured.
pub fn generate_owner_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(OWNER_CODE_LEN)
        .map(char::from)
        .collect()
}

/// 所有者相關指令
#[poise::command(slash_command, subcommands("bind"), subcommand_required)]
pub async fn owner(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// 使用啟動時產生的綁定碼綁定所有者
#[poise::command(slash_command, ephemeral)]
pub async fn bind(
    ctx: Context<'_>,
    #[description = "綁定碼"] code: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let user = caller(ctx, Utc::now()).await?;

    let accepted = {
        let mut owner_code = data.owner_code.lock().await;
        owner_code.take_if(|expected| expected.as_str() == code.trim()).is_some()
    };
    if !accepted {
        log::warn!("[Func.owner] AID {} 使用了錯誤的綁定碼", user.aid);
        ctx.send(CreateReply::default().content("綁定碼錯誤或已失效").ephemeral(true))
            .await?;
        return Ok(());
    }

    data.config.lock().await.bind_owner(user.aid)?;
    log::info!("[Func.owner] AID {} 已綁定為所有者", user.aid);
    ctx.say("Owner 綁定成功！").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_code_shape() {
        let code = generate_owner_code();
        assert_eq!(code.len(), OWNER_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, generate_owner_code());
    }
}
