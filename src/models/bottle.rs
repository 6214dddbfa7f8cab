use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

pub const BOTTLE_COLUMNS: &str = "bottle_id, aid, group_id, text, images, anonymous, \
     total_pickups, remaining_pickups, review_status, create_time, is_deleted";

/// 審核狀態。PENDING 之後的三個狀態均為終態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    AiApproved,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::AiApproved => "ai_approved",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ReviewStatus::Pending),
            "ai_approved" => Some(ReviewStatus::AiApproved),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }

    pub const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Pending,
        ReviewStatus::AiApproved,
        ReviewStatus::Approved,
        ReviewStatus::Rejected,
    ];

    /// Only approved bottles can be fished.
    pub fn is_retrievable(&self) -> bool {
        matches!(self, ReviewStatus::AiApproved | ReviewStatus::Approved)
    }

    /// SQL value list of the retrievable states, e.g. `'ai_approved', 'approved'`.
    pub fn retrievable_sql_list() -> String {
        Self::ALL
            .iter()
            .filter(|s| s.is_retrievable())
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "⏳",
            ReviewStatus::AiApproved => "🤖",
            ReviewStatus::Approved => "🧑‍⚖️",
            ReviewStatus::Rejected => "❌",
        }
    }

    /// Manual review may only move a bottle out of `Pending`.
    pub fn manual_transition(&self, approve: bool) -> Option<ReviewStatus> {
        match (self, approve) {
            (ReviewStatus::Pending, true) => Some(ReviewStatus::Approved),
            (ReviewStatus::Pending, false) => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

impl ToSql for ReviewStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ReviewStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ReviewStatus::parse(raw).ok_or_else(|| FromSqlError::Other(format!("unknown review status {raw}").into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftBottle {
    pub bottle_id: i64,
    pub aid: i64,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub images: Vec<String>,
    pub anonymous: bool,
    pub total_pickups: i64,
    /// -1 表示無限次
    pub remaining_pickups: i64,
    pub review_status: ReviewStatus,
    pub create_time: String,
    pub is_deleted: bool,
}

impl DriftBottle {
    /// Map a row selected with [`BOTTLE_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let images: Option<String> = row.get(4)?;
        let images = match images {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
            None => Vec::new(),
        };
        Ok(Self {
            bottle_id: row.get(0)?,
            aid: row.get(1)?,
            group_id: row.get(2)?,
            text: row.get(3)?,
            images,
            anonymous: row.get(5)?,
            total_pickups: row.get(6)?,
            remaining_pickups: row.get(7)?,
            review_status: row.get(8)?,
            create_time: row.get(9)?,
            is_deleted: row.get(10)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BottleDiscuss {
    pub id: i64,
    pub bottle_id: i64,
    pub aid: i64,
    pub text: String,
    pub create_time: String,
}

/// A bottle as the owner sees it in the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct BottleSummary {
    pub bottle: DriftBottle,
    pub score: Option<f64>,
}

/// A fished bottle together with what is shown to the finder.
#[derive(Debug, Clone, PartialEq)]
pub struct FishedBottle {
    pub bottle: DriftBottle,
    pub score: Option<f64>,
    pub owner_nickname: Option<String>,
    pub discussions: Vec<BottleDiscuss>,
}

/// One moderation finding; `index` 0 is the text, 1.. are images.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewFlag {
    pub index: usize,
    pub label: String,
    pub sub_label: String,
}
