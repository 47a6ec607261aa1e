// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod identity;
mod loader;
mod schema;

pub use identity::{resolve_identity, IdentityDescriptor, IdentityError, IdentitySelector, ResolvedIdentity};
pub use loader::load;
pub use schema::*;
