use crate::bot::guard::group_key;
use crate::bot::{Context, Error};
use crate::models::account::GroupAccount;
use crate::models::function::{FUNCTIONS, FuncStatus, FunctionInfo, find_function};
use chrono::Utc;
use poise::{CreateReply, serenity_prelude as serenity};

pub fn function_status(
    function: &FunctionInfo,
    group: Option<&GroupAccount>,
    maintained: &[String],
) -> FuncStatus {
    if group.is_some_and(|g| g.is_disabled(function.id)) {
        FuncStatus::Disabled
    } else if maintained.iter().any(|id| id == function.id) {
        FuncStatus::Maintenance
    } else {
        FuncStatus::Enabled
    }
}

fn visible_functions() -> Vec<&'static FunctionInfo> {
    let mut list: Vec<_> = FUNCTIONS.iter().filter(|f| !f.hidden).collect();
    list.sort_by_key(|f| (f.category as u8, f.id));
    list
}

/// Lookup by id, name, or the number shown in the menu.
fn lookup(key: &str) -> Option<&'static FunctionInfo> {
    if let Some(function) = find_function(key).filter(|f| !f.hidden) {
        return Some(function);
    }
    let index: usize = key.trim().parse().ok()?;
    visible_functions().get(index.checked_sub(1)?).copied()
}

fn detail(function: &FunctionInfo) -> String {
    let mut text = format!(
        "# {}\n> `{}` · {}\n\n{}\n\n### 使用方法\n",
        function.name,
        function.id,
        function.category.label(),
        function.description
    );
    for usage in function.usage {
        text.push_str(&format!("- `{}`\n", usage));
    }
    text
}

/// 顯示功能選單或單一功能的說明
#[poise::command(slash_command)]
pub async fn help(
    ctx: Context<'_>,
    #[description = "功能 id、名稱或編號"] function: Option<String>,
) -> Result<(), Error> {
    let data = ctx.data();
    let group = match group_key(ctx) {
        Some(id) => Some(data.groups.resolve(&id, Utc::now()).await?),
        None => None,
    };
    let maintained = data.config.lock().await.global.maintain_functions.clone();

    if let Some(key) = function {
        let message = match lookup(&key) {
            Some(function)
                if function_status(function, group.as_ref(), &maintained) == FuncStatus::Enabled =>
            {
                detail(function)
            }
            Some(_) => "該功能已被本群管理員關閉或正在維護".to_string(),
            None => format!("找不到功能 `{}`", key),
        };
        ctx.say(message).await?;
        return Ok(());
    }

    let mut menu = String::new();
    for (i, function) in visible_functions().into_iter().enumerate() {
        let status = function_status(function, group.as_ref(), &maintained);
        menu.push_str(&format!(
            "`{:>2}` {} [{}] {}\n",
            i + 1,
            status.icon(),
            function.category.label(),
            function.name
        ));
    }
    menu.push_str("\n使用 `/help <功能編號>` 查看功能的詳細用法");

    let embed = serenity::CreateEmbed::default()
        .title("ABot 功能選單")
        .description(menu)
        .colour(serenity::Colour::BLURPLE);
    ctx.send(CreateReply::default().embed(embed)).await?;

    Ok(())
}
