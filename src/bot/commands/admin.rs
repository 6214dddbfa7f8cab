use crate::bot::confirm::confirm_action;
use crate::bot::guard::caller;
use crate::bot::{Context, Error};
use crate::models::account::{UserAccount, UserRef};
use chrono::Utc;
use poise::{ChoiceParameter, serenity_prelude as serenity};

const PENDING_LIST_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, ChoiceParameter)]
pub enum AdminAction {
    #[name = "ban"]
    Ban,
    #[name = "unban"]
    Unban,
    #[name = "group-ban"]
    GroupBan,
    #[name = "group-unban"]
    GroupUnban,
    #[name = "review"]
    Review,
    #[name = "daily"]
    Daily,
    #[name = "add"]
    Add,
    #[name = "remove"]
    Remove,
    #[name = "list"]
    List,
}

async fn target_account(
    ctx: Context<'_>,
    user: Option<serenity::User>,
    aid: Option<i64>,
) -> Result<Option<UserAccount>, Error> {
    let target = match (user, aid) {
        (Some(user), _) => UserRef::Cid(user.id.get().to_string()),
        (None, Some(aid)) => UserRef::Aid(aid),
        (None, None) => return Ok(None),
    };
    Ok(Some(ctx.data().users.lookup(&target).await?))
}

fn admin_list_text(owner: Option<i64>, admins: &[i64]) -> String {
    let mut list = match owner {
        Some(owner) => format!("所有者：AID {}\n", owner),
        None => "尚未綁定所有者\n".to_string(),
    };
    if admins.is_empty() {
        list.push_str("目前沒有其他管理員");
    } else {
        list.push_str("管理員列表:\n");
        for admin in admins {
            list.push_str(&format!("AID {}\n", admin));
        }
    }
    list
}

/// 管理指令
#[poise::command(slash_command)]
#[allow(clippy::too_many_arguments)]
pub async fn admin(
    ctx: Context<'_>,
    #[description = "管理操作"] action: AdminAction,
    #[description = "目標用戶"] user: Option<serenity::User>,
    #[description = "目標 AID"] aid: Option<i64>,
    #[description = "目標群組 ID"] group: Option<String>,
    #[description = "漂流瓶編號（review）"] bottle: Option<i64>,
    #[description = "是否通過審核（review）"] approve: Option<bool>,
    #[description = "原因"] reason: Option<String>,
) -> Result<(), Error> {
    let data = ctx.data();
    let operator = caller(ctx, Utc::now()).await?;

    let (is_admin, is_owner) = {
        let config = data.config.lock().await;
        (config.is_admin(operator.aid), config.is_owner(operator.aid))
    };
    if !is_admin {
        ctx.say("您沒有權限執行此操作！").await?;
        return Ok(());
    }

    let source = format!("AID {}", operator.aid);
    let reason = reason.unwrap_or_else(|| "無".to_string());

    match action {
        AdminAction::Ban | AdminAction::Unban => {
            let banned = matches!(action, AdminAction::Ban);
            let Some(target) = target_account(ctx, user, aid).await? else {
                ctx.say("請指定目標用戶或 AID！").await?;
                return Ok(());
            };
            if banned && data.config.lock().await.is_admin(target.aid) {
                ctx.say("不能封禁管理員！").await?;
                return Ok(());
            }
            let verb = if banned { "封禁" } else { "解除封禁" };
            if !confirm_action(&ctx, format!("確認{} {}？", verb, target.display_name())).await? {
                return Ok(());
            }
            let changed = data
                .users
                .set_banned(target.aid, banned, &reason, &source, Utc::now())
                .await?;
            if changed {
                ctx.say(format!("已{} {}", verb, target.display_name())).await?;
            } else {
                ctx.say(format!("{} 本來就是這個狀態", target.display_name())).await?;
            }
        }
        AdminAction::GroupBan | AdminAction::GroupUnban => {
            let banned = matches!(action, AdminAction::GroupBan);
            let Some(group_id) = group.map(|g| g.trim().to_string()).filter(|g| !g.is_empty()) else {
                ctx.say("請指定目標群組 ID！").await?;
                return Ok(());
            };
            let verb = if banned { "封禁" } else { "解除封禁" };
            if !confirm_action(&ctx, format!("確認{}群組 {}？", verb, group_id)).await? {
                return Ok(());
            }
            let changed = data
                .groups
                .set_banned(&group_id, banned, &reason, &source, Utc::now())
                .await?;
            if changed {
                ctx.say(format!("已{}群組 {}", verb, group_id)).await?;
            } else {
                ctx.say(format!("群組 {} 本來就是這個狀態", group_id)).await?;
            }
        }
        AdminAction::Review => match (bottle, approve) {
            (Some(bottle_id), Some(approve)) => {
                let status = data.bottles.review(bottle_id, approve).await?;
                ctx.say(format!(
                    "{} 漂流瓶 #{} 審核結果：{}",
                    status.icon(),
                    bottle_id,
                    if approve { "通過" } else { "拒絕" }
                ))
                .await?;
            }
            (Some(_), None) => {
                ctx.say("請指定是否通過審核！").await?;
            }
            (None, _) => {
                let pending = data.bottles.pending(PENDING_LIST_LIMIT).await?;
                if pending.is_empty() {
                    ctx.say("目前沒有待審核的漂流瓶").await?;
                } else {
                    let mut list = String::from("待審核的漂流瓶:\n");
                    for bottle in &pending {
                        list.push_str(&format!(
                            "#{} AID {} {}",
                            bottle.bottle_id,
                            bottle.aid,
                            bottle.text.as_deref().unwrap_or("（無文字）")
                        ));
                        for url in &bottle.images {
                            list.push_str(&format!(" {}", url));
                        }
                        list.push('\n');
                    }
                    ctx.say(list).await?;
                }
            }
        },
        AdminAction::Daily => {
            if !confirm_action(&ctx, "確認立即執行日常維護（收稅並重置簽到）？").await? {
                return Ok(());
            }
            let report = data.maintenance.run(Utc::now()).await?;
            ctx.say(report.lines().join("\n")).await?;
        }
        AdminAction::Add | AdminAction::Remove => {
            if !is_owner {
                ctx.say("只有所有者可以管理管理員名單！").await?;
                return Ok(());
            }
            let Some(target) = target_account(ctx, user, aid).await? else {
                ctx.say("請指定目標用戶或 AID！").await?;
                return Ok(());
            };
            let adding = matches!(action, AdminAction::Add);
            let prompt = if adding {
                format!("確認將 {} 新增為管理員？", target.display_name())
            } else {
                format!("確認將 {} 從管理員名單移除？", target.display_name())
            };
            if !confirm_action(&ctx, prompt).await? {
                return Ok(());
            }

            let mut config = data.config.lock().await;
            let message = if adding {
                if config.add_admin(target.aid)? {
                    format!("{} 已新增為管理員", target.display_name())
                } else {
                    format!("{} 已經是管理員", target.display_name())
                }
            } else if config.remove_admin(target.aid)? {
                format!("{} 已從管理員名單移除", target.display_name())
            } else {
                format!("{} 不在管理員名單中", target.display_name())
            };
            drop(config);
            log::info!("[Func.admin] {}：{}", source, message);
            ctx.say(message).await?;
        }
        AdminAction::List => {
            let (owner, admins) = {
                let config = data.config.lock().await;
                (config.global.owner, config.global.admins.clone())
            };
            ctx.say(admin_list_text(owner, &admins)).await?;
        }
    }

    Ok(())
}
