// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection supervision.
//!
//! The [`ConnectionManager`] owns the transport for the life of the
//! process: it retries the initial connect, replays subscriptions after
//! every reconnect, and pumps inbound messages into the router. All
//! outbound traffic goes through the [`PublishQueue`], drained by a
//! single task that serializes publishes and enforces the throttle.

mod manager;
mod publish_queue;

pub use manager::ConnectionHandle;
pub(crate) use manager::{ConnectionManager, run_drainer};
pub use publish_queue::{MessageClass, OutboundMessage, PublishQueue};
pub(crate) use publish_queue::DEFAULT_STATUS_LANE_CAP;
