//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

/// Controller election identifier.
///
/// Carried on the wire as a `(high, low)` pair of 64-bit words and ordered as
/// an unsigned 128-bit integer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct ElectionId(u128);

// ===== impl ElectionId =====

impl ElectionId {
    pub const fn new(high: u64, low: u64) -> ElectionId {
        ElectionId(((high as u128) << 64) | low as u128)
    }

    pub const fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub const fn low(&self) -> u64 {
        self.0 as u64
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u128> for ElectionId {
    fn from(value: u128) -> ElectionId {
        ElectionId(value)
    }
}

impl From<ElectionId> for u128 {
    fn from(election_id: ElectionId) -> u128 {
        election_id.0
    }
}

impl std::fmt::Display for ElectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.high(), self.low())
    }
}

// ===== unit tests =====
