// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod batch;
mod consent;
mod handoff;
mod identity;
mod links;
mod logging;
mod sinks;

pub use batch::{BatchConfig, BatchConfigLayer};
pub use consent::{ConsentConfig, ConsentConfigLayer};
pub use handoff::{HandoffConfig, HandoffConfigLayer};
pub use identity::{IdentityConfig, IdentityConfigLayer};
pub use links::{LinksConfig, LinksConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use sinks::{SinksConfig, SinksConfigLayer};
