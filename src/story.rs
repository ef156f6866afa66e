use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hours a story stays visible after it is created.
pub const STORY_TTL_HOURS: i64 = 24;

pub const EXPIRED_MESSAGE: &str = "This story is expired";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    /// Encoded image payload. Empty for the expiration placeholder.
    pub src: String,
    #[serde(with = "iso_or_empty")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "iso_or_empty")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_viewed: bool,
}

impl Story {
    pub fn new(src: String, now: DateTime<Utc>) -> Self {
        // Millisecond precision keeps the in-memory record identical to what
        // comes back out of the store.
        let created_at = now.trunc_subsecs(3);
        Self {
            id: new_id(),
            src,
            created_at: Some(created_at),
            expires_at: Some(created_at + story_ttl()),
            is_viewed: false,
        }
    }

    /// Stand-in slide for a story that expired between listing and opening.
    pub fn expired_placeholder() -> Self {
        Self {
            id: new_id(),
            src: String::new(),
            created_at: None,
            expires_at: None,
            is_viewed: false,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now < expires_at)
    }

    pub fn is_placeholder(&self) -> bool {
        self.src.is_empty()
    }
}

pub fn story_ttl() -> Duration {
    Duration::hours(STORY_TTL_HOURS)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

mod iso_or_empty {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(de::Error::custom)
    }
}
