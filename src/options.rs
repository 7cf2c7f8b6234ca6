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

use crate::approx::Region;
use crate::error::{Error, Result};

/// Cache geometry and latency parameters. All sizes are fixed for the
/// lifetime of the cache; there is no on-line reconfiguration.
#[derive(Clone)]
pub struct Options {
	/// Uncompressed cache line size in bytes. Must be a multiple of 8.
	pub line_size: u32,
	/// Number of tag lines.
	pub tag_lines: u32,
	/// Tag array associativity.
	pub tag_assoc: u32,
	/// Data array capacity in uncompressed-line units.
	pub data_lines: u32,
	/// Data array associativity (lines per data set).
	pub data_assoc: u32,
	/// Number of hash directory entries.
	pub hash_lines: u32,
	/// Hash directory associativity.
	pub hash_assoc: u32,
	/// Tag array access latency in cycles.
	pub acc_lat: u64,
	/// Invalidation latency in cycles. Carried for interface parity with the
	/// enclosing hierarchy; the access path does not consume it.
	pub inv_lat: u64,
	/// Number of MSHRs of the enclosing timing core.
	pub mshrs: u32,
	/// Ordered table of approximate address regions.
	pub regions: Vec<Region>,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			line_size: 64,
			tag_lines: 1024,
			tag_assoc: 8,
			data_lines: 512,
			data_assoc: 8,
			hash_lines: 512,
			hash_assoc: 8,
			acc_lat: 9,
			inv_lat: 9,
			mshrs: 16,
			regions: Vec::new(),
		}
	}
}

impl Options {
	pub fn validate(&self) -> Result<()> {
		if self.line_size == 0 || self.line_size % 8 != 0 {
			return Err(Error::InvalidConfiguration(
				format!("line_size {} is not a positive multiple of 8", self.line_size)));
		}
		if self.tag_lines == 0 || self.tag_assoc == 0 || self.tag_lines % self.tag_assoc != 0 {
			return Err(Error::InvalidConfiguration(
				format!("tag geometry {}/{} does not divide into sets", self.tag_lines, self.tag_assoc)));
		}
		if self.data_lines == 0 || self.data_assoc == 0 || self.data_lines % self.data_assoc != 0 {
			return Err(Error::InvalidConfiguration(
				format!("data geometry {}/{} does not divide into sets", self.data_lines, self.data_assoc)));
		}
		if self.hash_lines == 0 || self.hash_assoc == 0 || self.hash_lines % self.hash_assoc != 0 {
			return Err(Error::InvalidConfiguration(
				format!("hash geometry {}/{} does not divide into sets", self.hash_lines, self.hash_assoc)));
		}
		if !self.line_size.is_power_of_two() {
			return Err(Error::InvalidConfiguration(
				format!("line_size {} is not a power of two", self.line_size)));
		}
		for r in &self.regions {
			if r.start > r.end {
				return Err(Error::InvalidConfiguration(
					format!("approximate region {:#x}..{:#x} is inverted", r.start, r.end)));
			}
		}
		Ok(())
	}

	pub fn tag_sets(&self) -> u32 {
		self.tag_lines / self.tag_assoc
	}

	pub fn data_sets(&self) -> u32 {
		self.data_lines / self.data_assoc
	}

	pub fn hash_sets(&self) -> u32 {
		self.hash_lines / self.hash_assoc
	}

	/// 8-byte segments per data set.
	pub fn segments_per_set(&self) -> u32 {
		self.data_assoc * self.line_size / 8
	}

	pub fn line_bits(&self) -> u32 {
		self.line_size.trailing_zeros()
	}
}
