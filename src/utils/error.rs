use thiserror::Error;

/// Errors raised by the account managers and the economy / drift-bottle engines.
///
/// Every variant except `Database`, `ExternalService` and `DataIntegrity` is a
/// recoverable user mistake and is reported verbatim through [`CoreError::user_message`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("遊戲幣不足：需要 {needed}，目前只有 {available}")]
    InsufficientFunds { needed: i64, available: i64 },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Permission(String),
    #[error("內容審核未通過：{label} / {sub_label}")]
    ModerationRejected { label: String, sub_label: String },
    #[error("外部服務錯誤: {0}")]
    ExternalService(String),
    #[error("資料完整性錯誤: {0}")]
    DataIntegrity(String),
    #[error("資料庫錯誤: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        CoreError::Permission(msg.into())
    }

    /// Short message safe to show in chat; internal details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::ExternalService(_) => "服務暫時不可用，請稍後重試！".to_string(),
            CoreError::Database(_) | CoreError::DataIntegrity(_) => {
                "資料處理失敗，請稍後重試！".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the error should be logged as a failure rather than a rejected request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CoreError::ExternalService(_) | CoreError::Database(_) | CoreError::DataIntegrity(_)
        )
    }
}
