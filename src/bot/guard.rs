use chrono::{DateTime, Utc};
use poise::CreateReply;

use crate::bot::{Context, Error};
use crate::models::account::{GroupAccount, UserAccount};
use crate::models::function::{FunctionInfo, find_function};
use crate::utils::cooldown::CooldownDecision;

/// The guild id doubles as the group id; direct messages have no group.
pub fn group_key(ctx: Context<'_>) -> Option<String> {
    ctx.guild_id().map(|id| id.get().to_string())
}

/// The caller's account, created on first contact.
pub async fn caller(ctx: Context<'_>, now: DateTime<Utc>) -> Result<UserAccount, Error> {
    let cid = ctx.author().id.get().to_string();
    Ok(ctx.data().users.resolve_by_external_id(&cid, now).await?)
}

/// Registry entry of the invoked root command.
fn invoked_function(ctx: Context<'_>) -> Option<&'static FunctionInfo> {
    let root = ctx
        .parent_commands()
        .first()
        .map(|command| command.name.as_str())
        .unwrap_or(ctx.command().name.as_str());
    find_function(root)
}

async fn refuse(ctx: Context<'_>, message: impl Into<String>) -> Result<bool, Error> {
    ctx.send(CreateReply::default().content(message).ephemeral(true))
        .await?;
    Ok(false)
}

/// Why a command from this user in this group is dropped without a reply.
fn ignored_reason(user: &UserAccount, group: Option<&GroupAccount>) -> Option<String> {
    if user.banned {
        return Some(format!("已忽略封禁用戶 AID {} 的指令", user.aid));
    }
    group
        .filter(|g| g.banned)
        .map(|g| format!("已忽略封禁群組 {} 的指令", g.group_id))
}

/// Runs before every command.
pub async fn command_check(ctx: Context<'_>) -> Result<bool, Error> {
    let data = ctx.data();
    let now = Utc::now();
    let user = caller(ctx, now).await?;
    let group = match group_key(ctx) {
        Some(id) => Some(data.groups.resolve(&id, now).await?),
        None => None,
    };

    if let Some(reason) = ignored_reason(&user, group.as_ref()) {
        log::info!("[Core.guard] {}", reason);
        return Ok(false);
    }
    data.users.record_talk(user.aid).await?;

    let function = invoked_function(ctx);
    let (is_admin, maintained) = {
        let config = data.config.lock().await;
        let maintained = function.is_some_and(|f| config.global.is_maintained(f.id));
        (config.is_admin(user.aid), maintained)
    };

    if let Some(function) = function {
        if maintained {
            return refuse(ctx, format!("功能「{}」正在維護中，請稍後再試！", function.name)).await;
        }
        if group.as_ref().is_some_and(|g| g.is_disabled(function.id)) {
            return refuse(ctx, format!("本群已關閉功能「{}」！", function.name)).await;
        }
    }

    if is_admin {
        return Ok(true);
    }
    match data.cooldown.check(user.aid) {
        CooldownDecision::Allowed => Ok(true),
        CooldownDecision::Refused { notify: true, wait } => {
            refuse(ctx, format!("操作太頻繁了，請 {} 秒後再試！", wait.as_secs().max(1))).await
        }
        CooldownDecision::Refused { notify: false, .. } => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn user(banned: bool) -> UserAccount {
        UserAccount {
            aid: 7,
            cid: "7".to_string(),
            coin: 0,
            nickname: None,
            is_sign: false,
            is_chat: false,
            today_transferred: 0,
            total_sign: 0,
            continue_sign: 0,
            total_talk: 0,
            last_sign_day: None,
            banned,
            join_time: String::new(),
        }
    }

    fn group(banned: bool) -> GroupAccount {
        GroupAccount {
            group_id: "g".to_string(),
            disabled_functions: BTreeSet::new(),
            banned,
        }
    }

    #[test]
    fn test_banned_callers_are_ignored_before_activity() {
        assert!(ignored_reason(&user(false), None).is_none());
        assert!(ignored_reason(&user(false), Some(&group(false))).is_none());
        assert!(ignored_reason(&user(true), None).unwrap().contains("AID 7"));
        assert!(ignored_reason(&user(false), Some(&group(true))).unwrap().contains("群組 g"));
    }
}
