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

//! Operation records for gale.
//!
//! Everything gale measures flows through one type: [Operation], an immutable
//! record of a single storage request with nanosecond-precision wall-clock
//! timestamps. This crate defines that record, ordered sequences of records
//! ([Operations]) with the filters and queries the analysis layer needs, the
//! [category][Categories] bitfield attached to each record, and a streaming
//! tab-separated [codec][tsv] that round-trips records to and from disk.

/// An alias of [std::result::Result] where the error is always [Error][crate::Error].
pub type Result<T> = std::result::Result<T, crate::Error>;

pub use crate::error::{Error, ErrorKind};

mod error;

pub mod category;
pub mod operation;
pub mod operations;
pub mod tsv;

pub use category::{Categories, Category};
pub use operation::{Operation, op};
pub use operations::Operations;
