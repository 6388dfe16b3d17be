// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command handling.
//!
//! Every inbound command goes through a two-phase response protocol: an
//! acknowledgment is published as soon as the command is accepted for
//! processing, and exactly one completion follows once the handler has
//! run (or failed). The [`CommandProcessor`] drives the lifecycle:
//!
//! ```text
//! Received ──ack──▶ Acked ──validate──▶ Validated ──handle──▶ Completed
//!              │                  │                      │
//!              └ INVALID_JSON     └ UNKNOWN_COMMAND /    └ EXECUTION_ERROR /
//!                INVALID_PAYLOAD    VALIDATION_ERROR       INTERNAL_ERROR
//! ```

mod error_code;
mod message;
mod processor;
mod response;

pub use error_code::ErrorCode;
pub use message::InboundCommand;
pub use processor::{CommandProcessor, HandlerError, HandlerResult};
pub(crate) use processor::RawCommand;
