use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Offset of the business calendar (UTC+8, no daylight saving).
const BUSINESS_OFFSET_HOURS: i64 = 8;

/// Wall-clock time in the business timezone.
pub fn business_local(now: DateTime<Utc>) -> NaiveDateTime {
    now.naive_utc() + Duration::hours(BUSINESS_OFFSET_HOURS)
}

/// The business day `now` belongs to; a day starts at `reset_hour` local time.
pub fn business_day(now: DateTime<Utc>, reset_hour: u32) -> NaiveDate {
    (business_local(now) - Duration::hours(i64::from(reset_hour))).date()
}

/// Next instant strictly after `now` at which the local clock shows `reset_hour:00`.
pub fn next_reset_after(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let local = business_local(now);
    let today_reset = local
        .date()
        .and_hms_opt(reset_hour.min(23), 0, 0)
        .unwrap_or(local);
    let next_local = if today_reset > local {
        today_reset
    } else {
        today_reset + Duration::days(1)
    };
    (next_local - Duration::hours(BUSINESS_OFFSET_HOURS)).and_utc()
}

pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Timestamp stored with every record.
pub fn timestamp(now: DateTime<Utc>) -> String {
    business_local(now).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// 簽到問候語
pub fn greeting(now: DateTime<Utc>) -> &'static str {
    match business_local(now).hour() {
        6..=8 => "早上好",
        9..=11 => "上午好",
        12..=13 => "中午好",
        14..=17 => "下午好",
        18..=23 => "晚上好",
        _ => "唔。。還沒睡嗎？早睡早起身體好喔！晚安❤",
    }
}
