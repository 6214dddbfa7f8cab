use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// 機器人所有者 AID，未綁定時為 None
    #[serde(default)]
    pub owner: Option<i64>,
    #[serde(default)]
    pub admins: Vec<i64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: Option<String>,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// 正在維護中的功能 id
    #[serde(default)]
    pub maintain_functions: Vec<String>,
    /// 每日維護在 UTC+8 的執行小時
    #[serde(default = "default_reset_hour")]
    pub reset_hour: u32,
    #[serde(default)]
    pub economy: EconomyRules,
    #[serde(default)]
    pub bottle: BottleRules,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<String> {
    Some("bot.log".to_string())
}

fn default_database_path() -> String {
    "abot.db".to_string()
}

fn default_reset_hour() -> u32 {
    4
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            owner: None,
            admins: Vec::new(),
            log_level: default_log_level(),
            log_file: default_log_file(),
            database_path: default_database_path(),
            maintain_functions: Vec::new(),
            reset_hour: default_reset_hour(),
            economy: EconomyRules::default(),
            bottle: BottleRules::default(),
            cooldown: CooldownConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

impl GlobalConfig {
    pub fn is_admin(&self, aid: i64) -> bool {
        self.owner == Some(aid) || self.admins.contains(&aid)
    }

    pub fn is_maintained(&self, function: &str) -> bool {
        self.maintain_functions.iter().any(|f| f == function)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyRules {
    pub initial_coin: i64,
    pub first_sign_bonus: i64,
    pub sign_lucky_range: (i64, i64),  // 1/10 機率
    pub sign_normal_range: (i64, i64), // 9/10 機率
    pub streak_week_range: (i64, i64),  // 每連續 7 天
    pub streak_month_range: (i64, i64), // 每連續 30 天
    pub transfer_daily_cap: i64,
    pub transfer_max_digits: usize,
    pub tax_threshold: i64,
    pub tax_step: i64, // 每超過 step 個遊戲幣，稅率加 1%
}

impl Default for EconomyRules {
    fn default() -> Self {
        Self {
            initial_coin: 10,
            first_sign_bonus: 328,
            sign_lucky_range: (28, 92),
            sign_normal_range: (15, 47),
            streak_week_range: (0, 40),
            streak_month_range: (0, 160),
            transfer_daily_cap: 200,
            transfer_max_digits: 6,
            tax_threshold: 1000,
            tax_step: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleRules {
    pub base_price: i64,
    pub text_surcharge: i64,
    pub image_surcharge: i64,
    pub max_text_chars: usize,
    pub max_images: usize,
    pub max_remaining_pickups: i64,
    pub fish_price: i64,
    pub delete_refund: i64,
    pub sample_size: usize,
    pub default_weight: f64,
    pub min_ratings: usize,
    pub discuss_min_chars: usize,
    pub discuss_max_chars: usize,
    pub discuss_per_rater: i64,
}

impl Default for BottleRules {
    fn default() -> Self {
        Self {
            base_price: 2,
            text_surcharge: 1,
            image_surcharge: 3,
            max_text_chars: 400,
            max_images: 5,
            max_remaining_pickups: 1000,
            fish_price: 3,
            delete_refund: 1,
            sample_size: 3,
            default_weight: 3.0,
            min_ratings: 3,
            discuss_min_chars: 3,
            discuss_max_chars: 500,
            discuss_per_rater: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub suspend_secs: u64,
    pub max_exec: u32,
    pub capacity: usize,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            suspend_secs: 10,
            max_exec: 3,
            capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub text_biztype: Option<String>,
    pub image_biztype: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://moderation.example.com/v1".to_string(),
            text_biztype: None,
            image_biztype: None,
            timeout_secs: 10,
        }
    }
}
