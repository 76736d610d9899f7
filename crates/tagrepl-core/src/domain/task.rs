//! Replication task model.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a task: the (tag, destination) pair.
///
/// Unique across the whole store, regardless of state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    tag: String,
    destination: String,
}

impl TaskKey {
    pub fn new(tag: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            destination: destination.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tag, self.destination)
    }
}

/// One unit of replication work: propagate `tag` to `destination`.
///
/// The task carries no state field. Whether it is pending or failed is decided
/// by where the store keeps it.
///
/// Equality compares timestamps at whole-second granularity, so a task read
/// back from a substrate that truncates sub-second precision still equals the
/// task that was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub tag: String,
    pub destination: String,
    pub created_at: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,

    /// How long after `created_at` the task becomes actionable.
    #[serde(rename = "delay_ns", with = "delay_nanos")]
    pub delay: Duration,
}

impl Task {
    /// Create a task stamped with the current time.
    pub fn new(tag: impl Into<String>, destination: impl Into<String>, delay: Duration) -> Self {
        Self::new_at(tag, destination, delay, Utc::now())
    }

    /// Create a task with an explicit creation time (`last_attempt` starts equal to it).
    pub fn new_at(
        tag: impl Into<String>,
        destination: impl Into<String>,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tag: tag.into(),
            destination: destination.into(),
            created_at: now,
            last_attempt: now,
            delay,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.tag.clone(), self.destination.clone())
    }

    /// Whether the delay has elapsed as of now.
    pub fn ready(&self) -> bool {
        self.ready_at(Utc::now())
    }

    /// Whether the delay has elapsed as of `now`.
    pub fn ready_at(&self, now: DateTime<Utc>) -> bool {
        match TimeDelta::from_std(self.delay) {
            Ok(delay) => match self.created_at.checked_add_signed(delay) {
                Some(ready_at) => now >= ready_at,
                None => false,
            },
            // Delay too large to represent: never ready.
            Err(_) => false,
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.destination == other.destination
            && self.delay == other.delay
            && self.created_at.timestamp() == other.created_at.timestamp()
            && self.last_attempt.timestamp() == other.last_attempt.timestamp()
    }
}

impl Eq for Task {}

/// `delay` as whole nanoseconds. Delays beyond `u64` nanoseconds fail to serialize.
mod delay_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, ser};

    pub fn serialize<S: Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(delay.as_nanos())
            .map_err(|_| <S::Error as ser::Error>::custom(format!("delay too large: {delay:?}")))?;
        s.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}
