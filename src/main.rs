mod bot;
mod models;
mod utils;

use std::env;
use std::sync::Arc;

use anyhow::anyhow;
use poise::serenity_prelude as serenity;
use tokio::sync::Mutex;

use crate::bot::commands::owner::generate_owner_code;
use crate::bot::data::BotData;
use crate::utils::bottle::BottleEngine;
use crate::utils::config::ConfigManager;
use crate::utils::cooldown::Cooldown;
use crate::utils::economy::EconomyEngine;
use crate::utils::error::CoreError;
use crate::utils::group::GroupManager;
use crate::utils::maintenance::DailyMaintenance;
use crate::utils::moderation::build_moderator;
use crate::utils::user::UserManager;

async fn on_error(error: poise::FrameworkError<'_, BotData, bot::Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let reply = match error.downcast_ref::<CoreError>() {
                Some(core) if !core.is_internal() => {
                    log::info!("[Core.command] /{} 被拒絕: {}", ctx.command().qualified_name, core);
                    core.user_message()
                }
                Some(core) => {
                    log::error!("[Core.command] /{} 執行失敗: {}", ctx.command().qualified_name, core);
                    core.user_message()
                }
                None => {
                    log::error!("[Core.command] /{} 執行失敗: {:#}", ctx.command().qualified_name, error);
                    "發生錯誤，請稍後重試！".to_string()
                }
            };
            if let Err(why) = ctx.say(reply).await {
                log::error!("發送錯誤訊息失敗: {}", why);
            }
        }
        // 檢查未通過時已由檢查本身回覆或刻意不回覆
        poise::FrameworkError::CommandCheckFailed { error: None, .. } => {}
        poise::FrameworkError::CommandCheckFailed {
            error: Some(error),
            ctx,
            ..
        } => {
            log::error!("[Core.guard] /{} 前置檢查失敗: {:#}", ctx.command().qualified_name, error);
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                log::error!("處理框架錯誤失敗: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), bot::Error> {
    dotenvy::dotenv().ok();

    let config_manager =
        ConfigManager::new("config.json").map_err(|e| anyhow!("設定管理器初始化失敗: {}", e))?;
    let global = config_manager.global.clone();

    if let Err(e) = utils::logger::BotLogger::init(global.log_file.as_deref(), &global.log_level) {
        eprintln!("日誌初始化失敗: {}", e);
    }

    let token =
        env::var("DISCORD_TOKEN").map_err(|_| anyhow!("預期 DISCORD_TOKEN 環境變數，但找不到!"))?;

    let conn = utils::db::open(&global.database_path).await?;
    let moderator = build_moderator(&global.moderation, conn.clone())
        .map_err(|e| anyhow!("內容審核初始化失敗: {}", e))?;

    let economy = EconomyEngine::new(conn.clone(), global.economy.clone(), global.reset_hour);
    let maintenance = DailyMaintenance::new(economy.clone(), global.reset_hour);
    maintenance.clone().spawn();

    let owner_code = if global.owner.is_none() {
        let code = generate_owner_code();
        log::warn!("[Core.owner] 尚未綁定所有者，請使用 /owner bind {} 完成綁定", code);
        Some(code)
    } else {
        None
    };

    let data = BotData {
        config: Arc::new(Mutex::new(config_manager)),
        users: UserManager::new(conn.clone(), global.economy.initial_coin),
        groups: GroupManager::new(conn.clone()),
        economy,
        bottles: BottleEngine::new(conn.clone(), global.bottle.clone(), moderator.clone()),
        moderator,
        maintenance,
        cooldown: Arc::new(Cooldown::new(&global.cooldown)),
        owner_code: Arc::new(Mutex::new(owner_code)),
    };

    let intents = serenity::GatewayIntents::GUILDS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: crate::bot::commands(),
            command_check: Some(|ctx| Box::pin(bot::guard::command_check(ctx))),
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                log::info!("{} 已經上線!", ready.user.name);
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::Client::builder(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow!("建立 Discord 客戶端失敗: {}", e))?;

    client
        .start()
        .await
        .map_err(|e| anyhow!("機器人啟動失敗: {}", e))?;

    Ok(())
}
