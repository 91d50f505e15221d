use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

pub type RecordId = u64;

/// Column values of a record, keyed by field name.
pub type Fields = serde_json::Map<String, Value>;

/// Identity of a stored record: its declared type plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub type_name: String,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(type_name: impl Into<String>, id: RecordId) -> Self {
        Self {
            type_name: type_name.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub id: RecordId,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    pub fn to_ref(&self) -> RecordRef {
        RecordRef::new(self.type_name.clone(), self.id)
    }

    /// Field lookup; `id` resolves to the primary key.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == "id" {
            return Some(Value::from(self.id));
        }
        self.fields.get(field).cloned()
    }

    /// Read a foreign key column. Null or non-integer values count as unset.
    pub fn get_id(&self, field: &str) -> Option<RecordId> {
        if field == "id" {
            return Some(self.id);
        }
        self.fields.get(field).and_then(Value::as_u64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    /// True when the field holds boolean `true`; absent and null read as false.
    pub fn is(&self, field: &str) -> bool {
        self.get_bool(field).unwrap_or(false)
    }
}

/// Lifecycle events an observer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Create,
    Update,
    Destroy,
}

impl Event {
    pub const ALL: [Event; 3] = [Event::Create, Event::Update, Event::Destroy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Create => "create",
            Event::Update => "update",
            Event::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Event::Create),
            "update" => Ok(Event::Update),
            "destroy" => Ok(Event::Destroy),
            other => Err(ConfigurationError::UnknownEvent(other.to_string())),
        }
    }
}

/// Build a `Fields` map from `(name, value)` pairs.
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
