use crate::bot::commands::help::function_status;
use crate::bot::guard::{caller, group_key};
use crate::bot::{Context, Error};
use crate::models::function::{FUNCTIONS, find_function};
use crate::utils::group::ToggleOutcome;
use chrono::Utc;
use poise::{ChoiceParameter, CreateReply};

#[derive(Clone, Copy, Debug, ChoiceParameter)]
pub enum FunctionAction {
    #[name = "list"]
    List,
    #[name = "enable"]
    Enable,
    #[name = "disable"]
    Disable,
}

/// Bot admins, or members allowed to manage the guild.
async fn can_manage_group(ctx: Context<'_>, aid: i64) -> bool {
    if ctx.data().config.lock().await.is_admin(aid) {
        return true;
    }
    ctx.author_member()
        .await
        .and_then(|member| member.permissions)
        .is_some_and(|permissions| permissions.manage_guild())
}

/// 開啟或關閉本群的功能
#[poise::command(slash_command, guild_only)]
pub async fn function(
    ctx: Context<'_>,
    #[description = "操作 list、enable 或 disable"] action: FunctionAction,
    #[description = "功能 id 或名稱"] name: Option<String>,
) -> Result<(), Error> {
    let data = ctx.data();
    let now = Utc::now();
    let Some(group_id) = group_key(ctx) else {
        ctx.say("此指令僅能在伺服器中使用").await?;
        return Ok(());
    };
    let group = data.groups.resolve(&group_id, now).await?;
    let maintained = data.config.lock().await.global.maintain_functions.clone();

    if let FunctionAction::List = action {
        let mut list = String::from("本群功能狀態:\n");
        for function in FUNCTIONS.iter().filter(|f| !f.hidden) {
            let status = function_status(function, Some(&group), &maintained);
            let lock = if function.can_be_disabled { "" } else { "（不可關閉）" };
            list.push_str(&format!("{} `{}` {}{}\n", status.icon(), function.id, function.name, lock));
        }
        ctx.send(CreateReply::default().content(list).ephemeral(true))
            .await?;
        return Ok(());
    }

    let user = caller(ctx, now).await?;
    if !can_manage_group(ctx, user.aid).await {
        ctx.say("只有群組管理員可以開關功能！").await?;
        return Ok(());
    }
    let Some(function) = name.as_deref().and_then(find_function) else {
        ctx.say("找不到這個功能，請使用 /function list 查看功能列表").await?;
        return Ok(());
    };

    let outcome = match action {
        FunctionAction::Enable => {
            let under_maintenance = maintained.iter().any(|id| id == function.id);
            data.groups
                .enable_function(&group_id, function, under_maintenance)
                .await?
        }
        _ => data.groups.disable_function(&group_id, function).await?,
    };
    let enabling = matches!(action, FunctionAction::Enable);
    let message = match outcome {
        ToggleOutcome::Changed if enabling => format!("已開啟功能「{}」", function.name),
        ToggleOutcome::Changed => format!("已關閉功能「{}」", function.name),
        ToggleOutcome::NoChange if enabling => format!("功能「{}」本來就是開啟的", function.name),
        ToggleOutcome::NoChange => format!("功能「{}」本來就是關閉的", function.name),
        ToggleOutcome::Refused(reason) => reason,
    };
    ctx.say(message).await?;

    Ok(())
}
