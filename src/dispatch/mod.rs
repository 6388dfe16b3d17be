// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message dispatch.
//!
//! Every message the supervisor receives goes to the [`MessageRouter`],
//! which fans it out to user callbacks whose topic pattern matches and,
//! when the topic is a command topic, hands it to the command processor.

mod callback;
mod router;

pub use callback::{CallbackRegistry, MessageCallback, SubscriptionId};
pub use router::MessageRouter;
