// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

// Timing model of a last-level cache that combines compressed variable-size
// lines, content deduplication and approximate matching of floating-point
// data. The tag, data and hash directories are coordinated by the access
// engine in `cache`; the enclosing memory hierarchy plugs in through the
// traits in `mem`.

mod approx;
mod cache;
mod compress;
mod data;
mod display;
mod error;
mod index;
mod mem;
mod options;
mod repl;
mod stats;
mod tag;
mod timing;

pub use approx::{DataType, Region};
pub use cache::DedupCache;
pub use compress::{compress, Encoding};
pub use error::{Error, Result};
pub use mem::{
	AccessType, CohState, CoherenceController, FixedLatencyController, MemReq, MemSampler,
	SparseMem,
};
pub use options::Options;
pub use repl::{LruRepl, RandomRepl, ReplPolicy};
pub use stats::{Case, CaseStats};
pub use timing::{EventKind, EventRecorder, TimingGraph, TimingRecord};
