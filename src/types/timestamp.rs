// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire timestamps.
//!
//! Every timestamp the framework puts on the wire is ISO-8601 UTC with
//! millisecond precision and a trailing `Z`, e.g.
//! `2025-08-10T14:30:15.123Z`. [`IsoTimestamp`] produces and compares
//! these values; the `status/current` publisher uses [`IsoTimestamp::at_least`]
//! to keep published timestamps monotonically non-decreasing even if the
//! system clock steps backwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

/// An ISO-8601 UTC timestamp with millisecond precision.
///
/// # Examples
///
/// ```
/// use icsia_lib::types::IsoTimestamp;
///
/// let ts = IsoTimestamp::now();
/// assert!(ts.to_string().ends_with('Z'));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoTimestamp(DateTime<Utc>);

impl IsoTimestamp {
    /// Returns the current UTC time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the later of `self` and `floor`.
    ///
    /// Used to keep a sequence of timestamps non-decreasing.
    #[must_use]
    pub fn at_least(self, floor: Self) -> Self {
        if self.0 < floor.0 { floor } else { self }
    }

    /// Returns the underlying UTC datetime.
    #[must_use]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for IsoTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl From<DateTime<Utc>> for IsoTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl FromStr for IsoTimestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }
}
