//! Shared datetime aliases

use chrono::{DateTime, Utc};

/// Database DateTime type used across all Temps crates
///
/// This is the canonical datetime type for TIMESTAMPTZ columns such as
/// `valid_until`, `not_before` and `revoked`.
///
/// # Example
/// ```rust
/// use temps_core::DBDateTime;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// pub struct Response {
///     pub created_at: DBDateTime,
/// }
/// ```
pub type DBDateTime = DateTime<Utc>;
