// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container driver - engine control plane backends.

pub mod compose;
pub mod mock;
mod traits;

pub use compose::ComposeDriver;
pub use mock::MockDriver;
pub use traits::*;
