use thiserror::Error;

/// Failures reported by a [`BackingStore`](crate::store::BackingStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write conflicts with an existing row: {0}")]
    Conflict(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

/// Errors surfaced by the synchronization components.
///
/// Fetch errors end up inside component state (so the UI can show them next to the stale snapshot),
/// write errors are returned to whoever called `toggle`/`add_item`.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncError {
    #[error("failed to fetch `{collection}`: {reason}")]
    FetchFailed { collection: String, reason: String },
    #[error("failed to write to `{collection}`: {reason}")]
    WriteFailed { collection: String, reason: String },
    #[error("no signed-in actor")]
    Unauthenticated,
    #[error("a previous toggle is still waiting for the server")]
    ToggleInProgress,
    #[error("lost the change feed for `{collection}`: {reason}")]
    SubscriptionLost { collection: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    FetchFailed,
    WriteFailed,
    Unauthenticated,
    ToggleInProgress,
    SubscriptionLost,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::FetchFailed { .. } => ErrorKind::FetchFailed,
            SyncError::WriteFailed { .. } => ErrorKind::WriteFailed,
            SyncError::Unauthenticated => ErrorKind::Unauthenticated,
            SyncError::ToggleInProgress => ErrorKind::ToggleInProgress,
            SyncError::SubscriptionLost { .. } => ErrorKind::SubscriptionLost,
        }
    }

    pub(crate) fn fetch_failed(collection: &str, reason: impl ToString) -> Self {
        SyncError::FetchFailed {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write_failed(collection: &str, reason: impl ToString) -> Self {
        SyncError::WriteFailed {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn subscription_lost(collection: &str, reason: impl ToString) -> Self {
        SyncError::SubscriptionLost {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }
}
