use chrono::{DateTime, Utc};

use crate::utils::economy::{ActivityStats, EconomyEngine, ResetReport, TaxReport};
use crate::utils::error::CoreResult;
use crate::utils::time::{format_day, next_reset_after};

fn ratio(part: i64, whole: i64) -> String {
    if whole > 0 {
        format!("{:.2}%", part as f64 * 100.0 / whole as f64)
    } else {
        "NaN".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub day: String,
    pub activity: ActivityStats,
    pub tax: TaxReport,
    pub reset: ResetReport,
}

impl MaintenanceReport {
    pub fn lines(&self) -> Vec<String> {
        let a = &self.activity;
        vec![
            format!("{} 簽到重置成功", self.day),
            format!("簽到率 {} / {} {}", a.signed, a.all, ratio(a.signed, a.all)),
            format!("活躍率 {} / {} {}", a.chatted, a.all, ratio(a.chatted, a.all)),
            format!("活躍簽到率 {} / {} {}", a.signed, a.chatted, ratio(a.signed, a.chatted)),
            format!("今日向 {} 位用戶收取了 {} 遊戲幣", self.tax.accounts, self.tax.total),
            format!("中斷連續簽到 {} 人", self.reset.broken_streaks),
        ]
    }
}

/// 每日維護：統計、持有稅與每日重置
#[derive(Clone)]
pub struct DailyMaintenance {
    economy: EconomyEngine,
    reset_hour: u32,
}

impl DailyMaintenance {
    pub fn new(economy: EconomyEngine, reset_hour: u32) -> Self {
        Self { economy, reset_hour }
    }

    /// Statistics are taken before the tax pass and the reset clears the flags.
    pub async fn run(&self, now: DateTime<Utc>) -> CoreResult<MaintenanceReport> {
        let today = self.economy.today(now);
        let activity = self.economy.activity_count().await?;
        let tax = self.economy.run_tax_pass(now).await?;
        let reset = self.economy.daily_reset(today).await?;

        let report = MaintenanceReport {
            day: format_day(today),
            activity,
            tax,
            reset,
        };
        for line in report.lines() {
            log::info!("[Task.daily] {}", line);
        }
        Ok(report)
    }

    /// Run forever, once per day at the reset hour (UTC+8).
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_reset_after(now, self.reset_hour);
                let wait = (next - now).to_std().unwrap_or_default();
                log::info!("[Task.daily] 下一次日常維護於 {} (UTC)", next.format("%Y-%m-%d %H:%M:%S"));
                tokio::time::sleep(wait).await;

                if let Err(e) = self.run(Utc::now()).await {
                    log::error!("[Task.daily] 日常維護失敗，將於下次重試: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::EconomyRules;
    use crate::utils::db;
    use crate::utils::user::UserManager;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_run_reports_and_resets() {
        let conn = db::memory().await;
        let users = UserManager::new(conn.clone(), 10);
        let economy = EconomyEngine::new(conn.clone(), EconomyRules::default(), 4);
        let maintenance = DailyMaintenance::new(economy.clone(), 4);
        // 2024-05-02 04:00 (UTC+8)
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();

        let rich = users.resolve_by_external_id("rich", now).await.unwrap().aid;
        let idle = users.resolve_by_external_id("idle", now).await.unwrap().aid;
        conn.call(move |conn| {
            conn.execute("UPDATE core_user SET coin = 1100, is_sign = 1, is_chat = 1 WHERE aid = ?1", [rich])?;
            Ok(())
        })
        .await
        .unwrap();

        let report = maintenance.run(now).await.unwrap();
        assert_eq!(report.day, "2024-05-02");
        assert_eq!(report.activity, ActivityStats { all: 2, signed: 1, chatted: 1 });
        assert_eq!(report.tax, TaxReport { accounts: 1, total: 11 });
        assert_eq!(report.reset.cleared_sign, 1);
        assert!(report.lines()[1].contains("50.00%"));

        let stats = economy.activity_count().await.unwrap();
        assert_eq!(stats, ActivityStats { all: 2, signed: 0, chatted: 0 });
        assert_eq!(users.resolve_by_internal_id(rich).await.unwrap().coin, 1089);
        assert_eq!(users.resolve_by_internal_id(idle).await.unwrap().coin, 10);
    }

    #[test]
    fn test_ratio_handles_empty() {
        assert_eq!(ratio(1, 0), "NaN");
        assert_eq!(ratio(1, 3), "33.33%");
    }
}
