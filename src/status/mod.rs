// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device status publishing.
//!
//! The [`StatusPublisher`] owns the status snapshot: a JSON object
//! seeded from the status schema, deep-merged with user updates, and
//! published retained on `{ns}/{dev}/status/current`. Publishing is
//! change-driven by default; keep-alive mode additionally publishes on
//! every periodic wake.

mod publisher;

pub use publisher::{OperationalStatus, StatusPublisher};
