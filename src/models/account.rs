use chrono::NaiveDate;
use rusqlite::Row;
use std::collections::BTreeSet;

pub const USER_COLUMNS: &str = "aid, cid, coin, nickname, is_sign, is_chat, today_transferred, \
     total_sign, continue_sign, total_talk, last_sign_day, banned, join_time";

#[derive(Debug, Clone, PartialEq)]
pub struct UserAccount {
    pub aid: i64,
    pub cid: String,
    pub coin: i64,
    pub nickname: Option<String>,
    pub is_sign: bool,
    pub is_chat: bool,
    pub today_transferred: i64,
    pub total_sign: i64,
    pub continue_sign: i64,
    pub total_talk: i64,
    pub last_sign_day: Option<NaiveDate>,
    pub banned: bool,
    pub join_time: String,
}

impl UserAccount {
    /// Map a row selected with [`USER_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_sign_day: Option<String> = row.get(10)?;
        Ok(Self {
            aid: row.get(0)?,
            cid: row.get(1)?,
            coin: row.get(2)?,
            nickname: row.get(3)?,
            is_sign: row.get(4)?,
            is_chat: row.get(5)?,
            today_transferred: row.get(6)?,
            total_sign: row.get(7)?,
            continue_sign: row.get(8)?,
            total_talk: row.get(9)?,
            last_sign_day: last_sign_day
                .and_then(|day| NaiveDate::parse_from_str(&day, "%Y-%m-%d").ok()),
            banned: row.get(11)?,
            join_time: row.get(12)?,
        })
    }

    /// 稱呼用戶時使用的名字
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nickname) => format!("{}（AID {}）", nickname, self.aid),
            None => format!("AID {}", self.aid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupAccount {
    pub group_id: String,
    pub disabled_functions: BTreeSet<String>,
    pub banned: bool,
}

impl GroupAccount {
    pub fn is_disabled(&self, function: &str) -> bool {
        self.disabled_functions.contains(function)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinLogEntry {
    pub id: i64,
    pub aid: i64,
    pub group_id: Option<String>,
    pub coin: i64,
    pub source: String,
    pub detail: String,
    pub time: String,
}

/// Result of a debit against a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The whole amount was removed.
    Full(i64),
    /// Forced debit on an insufficient balance: the balance was zeroed and only this much removed.
    Partial(i64),
    /// Not forced and the balance was too low; nothing changed.
    Insufficient { available: i64 },
}

impl DebitOutcome {
    pub fn removed(&self) -> i64 {
        match self {
            DebitOutcome::Full(amount) | DebitOutcome::Partial(amount) => *amount,
            DebitOutcome::Insufficient { .. } => 0,
        }
    }
}

/// Counters after a successful sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignStreak {
    pub total_sign: i64,
    pub continue_sign: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTarget {
    User,
    Group,
}

impl BanTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanTarget::User => "user",
            BanTarget::Group => "group",
        }
    }
}

/// Explicit user lookup key; the caller decides which identity it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    Cid(String),
    Aid(i64),
}
