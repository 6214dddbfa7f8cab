use crate::bot::{Context, Error};
use poise::{
    CreateReply,
    serenity_prelude::{
        self as serenity, ButtonStyle, CreateActionRow, CreateButton, CreateInteractionResponse,
        CreateInteractionResponseMessage,
    },
};
use rand::random;
use std::time::Duration;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Ask the caller to confirm with buttons. Cancel or timeout returns `false`.
pub async fn confirm_action(ctx: &Context<'_>, prompt: impl Into<String>) -> Result<bool, Error> {
    let nonce: u64 = random();
    let confirm_id = format!("confirm:{}:{}", ctx.author().id, nonce);
    let cancel_id = format!("cancel:{}:{}", ctx.author().id, nonce);
    let components = vec![CreateActionRow::Buttons(vec![
        CreateButton::new(confirm_id.clone())
            .label("確認")
            .style(ButtonStyle::Primary),
        CreateButton::new(cancel_id)
            .label("取消")
            .style(ButtonStyle::Secondary),
    ])];

    let reply = CreateReply::default()
        .content(prompt.into())
        .components(components)
        .ephemeral(true);
    let sent = ctx.send(reply).await?;
    let mut message = sent.into_message().await?;
    let serenity_ctx = ctx.serenity_context().clone();

    let interaction = message
        .await_component_interaction(&serenity_ctx)
        .author_id(ctx.author().id)
        .timeout(CONFIRM_TIMEOUT)
        .await;

    let Some(interaction) = interaction else {
        let edit = serenity::builder::EditMessage::new()
            .content("操作逾時，未執行任何變更")
            .components(Vec::new());
        if let Err(e) = message.edit(&serenity_ctx.http, edit).await {
            log::warn!("[Core.confirm] 更新逾時訊息失敗: {}", e);
        }
        return Ok(false);
    };

    let confirmed = interaction.data.custom_id == confirm_id;
    let response = CreateInteractionResponseMessage::default()
        .content(if confirmed { "已確認" } else { "操作已取消" })
        .components(Vec::new());
    interaction
        .create_response(&serenity_ctx, CreateInteractionResponse::UpdateMessage(response))
        .await?;
    Ok(confirmed)
}
