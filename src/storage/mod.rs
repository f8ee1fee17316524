// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers.
//!
//! - [`local`]: the in-process L1 tier
//! - [`traits`]: the [`RemoteStore`](traits::RemoteStore) and
//!   [`Connector`](traits::Connector) seams for the L2 tier
//! - [`redis`]: Redis implementation of those seams
//! - [`memory`]: in-memory implementation for tests and development

pub mod local;
pub mod memory;
pub mod redis;
pub mod traits;
