use std::sync::Arc;
use tokio::sync::Mutex;

use crate::utils::bottle::BottleEngine;
use crate::utils::config::ConfigManager;
use crate::utils::cooldown::Cooldown;
use crate::utils::economy::EconomyEngine;
use crate::utils::group::GroupManager;
use crate::utils::maintenance::DailyMaintenance;
use crate::utils::moderation::SharedModerator;
use crate::utils::user::UserManager;

#[derive(Clone)]
pub struct BotData {
    pub config: Arc<Mutex<ConfigManager>>,
    pub users: UserManager,
    pub groups: GroupManager,
    pub economy: EconomyEngine,
    pub bottles: BottleEngine,
    pub moderator: SharedModerator,
    pub maintenance: DailyMaintenance,
    pub cooldown: Arc<Cooldown>,
    /// 一次性的所有者綁定碼，綁定後清空
    pub owner_code: Arc<Mutex<Option<String>>>,
}
