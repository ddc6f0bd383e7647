use thiserror::Error;

#[derive(Debug, Error)]
pub enum KittyError {
    #[error("invalid kitty name: {name:?}")]
    InvalidName { name: String },
    #[error("kitty not found: {name}")]
    NotFound { name: String },
    #[error("no unused kitty name available")]
    NameExhausted,
    #[error("baseline timestamp {baseline} is later than last update {last_update}")]
    FutureBaseline { baseline: u64, last_update: u64 },
    #[error("timestamp {since} is later than last update {last_update}")]
    FutureTimestamp { since: u64, last_update: u64 },
    #[error("missing baseline for currency {currency}")]
    MissingCurrencyBaseline { currency: String },
    #[error("missing target for currency {currency}")]
    MissingCurrencyTarget { currency: String },
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },
    #[error("balance overflow for currency {currency}")]
    Overflow { currency: String },
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl KittyError {
    /// Stable machine-readable code for transport error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidName { .. } => "invalid_name",
            Self::NotFound { .. } => "not_found",
            Self::NameExhausted => "name_exhausted",
            Self::FutureBaseline { .. } => "future_baseline",
            Self::FutureTimestamp { .. } => "future_timestamp",
            Self::MissingCurrencyBaseline { .. } => "missing_currency_baseline",
            Self::MissingCurrencyTarget { .. } => "missing_currency_target",
            Self::RateLimited { .. } => "rate_limited",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::Overflow { .. } => "overflow",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::NameExhausted | Self::StorageUnavailable { .. } | Self::Internal { .. }
        )
    }

    /// Only storage failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    pub fn currency(&self) -> Option<&str> {
        match self {
            Self::MissingCurrencyBaseline { currency }
            | Self::MissingCurrencyTarget { currency }
            | Self::Overflow { currency } => Some(currency),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KittyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_the_only_retryable_kind() {
        let storage = KittyError::StorageUnavailable {
            message: "timeout".to_string(),
        };
        assert!(storage.is_retryable());
        assert!(!storage.is_client_error());

        let limited = KittyError::RateLimited {
            retry_after_secs: 60,
        };
        assert!(!limited.is_retryable());
        assert!(limited.is_client_error());
        assert!(!KittyError::NameExhausted.is_retryable());

        let internal = KittyError::Internal {
            message: "no entropy".to_string(),
        };
        assert!(!internal.is_retryable());
        assert!(!internal.is_client_error());
        assert_eq!(internal.code(), "internal");
    }

    #[test]
    fn currency_detail_is_exposed_for_conflict_errors() {
        let err = KittyError::MissingCurrencyTarget {
            currency: "EUR".to_string(),
        };
        assert_eq!(err.currency(), Some("EUR"));
        assert_eq!(err.code(), "missing_currency_target");
        assert_eq!(KittyError::NameExhausted.currency(), None);
    }
}
