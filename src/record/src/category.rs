// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Operation categories.
//!
//! Categories tag an operation with server-side observations, such as whether
//! a read was served from cache. They are metadata only: aggregation never
//! consults them. The full set fits a 64-bit mask, which is what the
//! tab-separated codec stores (as a decimal integer).

use crate::{Error, Result};

/// A single operation category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// The operation was served from a cache.
    CacheHit,
    /// The operation missed the cache.
    CacheMiss,
}

impl Category {
    /// All categories, in bit order.
    pub const ALL: [Category; 2] = [Category::CacheHit, Category::CacheMiss];

    /// The display name of this category.
    pub fn name(&self) -> &'static str {
        match self {
            Category::CacheHit => "cache-hit",
            Category::CacheMiss => "cache-miss",
        }
    }
}

bitflags::bitflags! {
    /// A set of [Category] values, packed into 64 bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Categories: u64 {
        const CACHE_HIT = 1 << 0;
        const CACHE_MISS = 1 << 1;
    }
}

impl Categories {
    /// Returns the member categories in bit order.
    pub fn split(&self) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| self.contains(Categories::from(*c)))
            .collect()
    }

    /// Encodes the mask as the decimal integer stored in the `cat` column.
    pub fn to_decimal(&self) -> String {
        self.bits().to_string()
    }

    /// Parses the decimal `cat` column value.
    ///
    /// Unknown bits are preserved so logs written by newer tools still round
    /// trip through older ones.
    pub fn from_decimal(s: &str) -> Result<Self> {
        let bits = s
            .parse::<u64>()
            .map_err(|e| Error::format(format!("invalid category mask {s:?}: {e}")))?;
        Ok(Categories::from_bits_retain(bits))
    }
}

impl From<Category> for Categories {
    fn from(value: Category) -> Self {
        match value {
            Category::CacheHit => Categories::CACHE_HIT,
            Category::CacheMiss => Categories::CACHE_MISS,
        }
    }
}
