// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod token;

pub use token::{RawToken, StoredToken, TokenPepper};
