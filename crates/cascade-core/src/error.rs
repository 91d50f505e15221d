use thiserror::Error;

use crate::record::RecordRef;

/// Raised while building a schema. Fatal to loading the offending type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Duplicate type declaration: {0}")]
    DuplicateType(String),

    #[error("Unknown association '{association}' on {owner}")]
    UnknownAssociation { owner: String, association: String },

    #[error("Association '{association}' on {owner} targets undeclared type {target}")]
    UnknownTarget {
        owner: String,
        association: String,
        target: String,
    },

    #[error("Unknown notifier: {0}")]
    UnknownNotifier(String),

    #[error("observes declaration on {0} names no notifiers")]
    MissingNotifiers(String),

    #[error("observes declaration on {0} names no associations")]
    MissingAssociations(String),

    #[error("Notifier '{notifier}' cannot notify many observers, but {owner}.{association} is a collection path")]
    BatchUnsupported {
        notifier: String,
        owner: String,
        association: String,
    },

    #[error("No inverse of {owner}.{association} found on {target}")]
    MissingInverse {
        owner: String,
        association: String,
        target: String,
    },

    #[error("Ambiguous inverse of {owner}.{association} on {target}: {candidates:?}")]
    AmbiguousInverse {
        owner: String,
        association: String,
        target: String,
        candidates: Vec<String>,
    },

    #[error("Association {owner}.{association} is not polymorphic as '{role}'")]
    RoleMismatch {
        owner: String,
        association: String,
        role: String,
    },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// The delivery backend refused a unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode work item: {0}")]
    Encode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RecordRef),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Notifier '{notifier}' failed: {source}")]
    Strategy {
        notifier: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Record not found: {0}")]
    RecordNotFound(RecordRef),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CascadeError {
    pub fn strategy(notifier: impl Into<String>, source: anyhow::Error) -> Self {
        CascadeError::Strategy {
            notifier: notifier.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
