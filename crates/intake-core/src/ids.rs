//! Identifier generators
//!
//! `Qid` names one intake attempt (one uploaded file), `Sid` names a logical
//! upload session. Both wrap a UUIDv7, so identifiers generated later sort
//! after earlier ones and carry their creation time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

macro_rules! time_ordered_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, time-ordered identifier.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Millisecond creation time embedded in the identifier.
            pub fn created_at(&self) -> Option<DateTime<Utc>> {
                let (secs, nanos) = self.0.get_timestamp()?.to_unix();
                Utc.timestamp_opt(secs as i64, nanos).single()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = crate::error::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
                    crate::error::AppError::InvalidInput(format!(
                        "Invalid {}: {} ({})",
                        $label, s, e
                    ))
                })
            }
        }
    };
}

time_ordered_id!(
    /// Intake identifier: primary key of an `IntakeRecord`, assigned exactly once.
    Qid,
    "qid"
);

time_ordered_id!(
    /// Session identifier grouping one or more intake attempts.
    Sid,
    "sid"
);
