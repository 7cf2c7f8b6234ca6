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

// Declared data types for approximate regions. A line that lies entirely
// inside an approximate region has the low-order bits of each of its words
// zeroed before hashing and comparison, so near-equal lines deduplicate.

use std::convert::TryInto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
	Float32,
	Float64,
	Int32,
	Int64,
}

impl DataType {
	pub fn name(&self) -> &'static str {
		match self {
			DataType::Float32 => "float32",
			DataType::Float64 => "float64",
			DataType::Int32 => "int32",
			DataType::Int64 => "int64",
		}
	}
}

/// Half-open is deliberately not used here: `start` and `end` are both
/// inclusive byte addresses, matching how region tables are declared.
#[derive(Debug, Clone)]
pub struct Region {
	pub start: u64,
	pub end: u64,
	pub data_type: DataType,
}

/// Ordered region table. The first region that contains the whole line wins.
pub struct RegionTable {
	regions: Vec<Region>,
}

impl RegionTable {
	pub fn new(regions: Vec<Region>) -> RegionTable {
		RegionTable { regions }
	}

	/// A line is approximate iff it lies entirely inside one region.
	pub fn classify(&self, byte_addr: u64, line_size: u32) -> Option<DataType> {
		let last = byte_addr + line_size as u64 - 1;
		self.regions
			.iter()
			.find(|r| byte_addr >= r.start && last <= r.end)
			.map(|r| r.data_type)
	}
}

// Truncated mantissa/low bits per word. The float widths keep the sign,
// exponent and high mantissa bits intact.
const FLOAT32_DROP_BITS: u32 = 16;
const FLOAT64_DROP_BITS: u32 = 32;
const INT_DROP_BITS: u32 = 8;

/// Zero the low-order bits of each word of `payload` in place, according to
/// the declared type. Runs before compression and hashing.
pub fn truncate(payload: &mut [u8], data_type: DataType) {
	match data_type {
		DataType::Float32 => mask_words(payload, 4, !((1u64 << FLOAT32_DROP_BITS) - 1)),
		DataType::Float64 => mask_words(payload, 8, !((1u64 << FLOAT64_DROP_BITS) - 1)),
		DataType::Int32 => mask_words(payload, 4, !((1u64 << INT_DROP_BITS) - 1)),
		DataType::Int64 => mask_words(payload, 8, !((1u64 << INT_DROP_BITS) - 1)),
	}
}

fn mask_words(payload: &mut [u8], width: usize, mask: u64) {
	for word in payload.chunks_exact_mut(width) {
		match width {
			4 => {
				let v = u32::from_le_bytes(word.try_into().expect("chunk is 4 bytes; qed"));
				word.copy_from_slice(&(v & mask as u32).to_le_bytes());
			}
			_ => {
				let v = u64::from_le_bytes(word.try_into().expect("chunk is 8 bytes; qed"));
				word.copy_from_slice(&(v & mask).to_le_bytes());
			}
		}
	}
}
