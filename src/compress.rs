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

// Base-delta-immediate line encoding.
//
// A line is stored as one base value plus per-word deltas; a word may also
// be encoded against an implicit zero base (the "immediate" case). The
// encoded size is one of a small enumerated set, rounded up to whole 8-byte
// segments. Compression is pure and deterministic: equal payloads always
// produce equal encodings.

use std::convert::TryInto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
	/// Uncompressible; occupies the full line.
	None,
	/// All-zero line.
	Zero,
	/// A single 8-byte value repeated across the line.
	Repetitive,
	Base8Delta1,
	Base8Delta2,
	Base8Delta4,
	Base4Delta1,
	Base4Delta2,
	Base2Delta1,
}

impl Encoding {
	/// Encoded size in bytes for a line of `line_size` bytes. Always a
	/// multiple of 8.
	pub fn size(&self, line_size: u32) -> u32 {
		let words = |width: u32| line_size / width;
		let round8 = |bytes: u32| (bytes + 7) & !7;
		match self {
			Encoding::None => line_size,
			Encoding::Zero | Encoding::Repetitive => 8,
			Encoding::Base8Delta1 => round8(8 + words(8)),
			Encoding::Base8Delta2 => round8(8 + 2 * words(8)),
			Encoding::Base8Delta4 => round8(8 + 4 * words(8)),
			Encoding::Base4Delta1 => round8(4 + words(4)),
			Encoding::Base4Delta2 => round8(4 + 2 * words(4)),
			Encoding::Base2Delta1 => round8(2 + words(2)),
		}
	}

	/// Encoded size in 8-byte segments.
	pub fn segments(&self, line_size: u32) -> u32 {
		self.size(line_size) / 8
	}

	pub fn name(&self) -> &'static str {
		match self {
			Encoding::None => "none",
			Encoding::Zero => "zero",
			Encoding::Repetitive => "repetitive",
			Encoding::Base8Delta1 => "base8-delta1",
			Encoding::Base8Delta2 => "base8-delta2",
			Encoding::Base8Delta4 => "base8-delta4",
			Encoding::Base4Delta1 => "base4-delta1",
			Encoding::Base4Delta2 => "base4-delta2",
			Encoding::Base2Delta1 => "base2-delta1",
		}
	}
}

/// Compress `line`, returning the chosen encoding and its size in bytes.
/// The candidate encodings are tried smallest first.
pub fn compress(line: &[u8]) -> (Encoding, u32) {
	let line_size = line.len() as u32;
	if line.iter().all(|b| *b == 0) {
		return (Encoding::Zero, Encoding::Zero.size(line_size));
	}
	if repetitive(line) {
		return (Encoding::Repetitive, Encoding::Repetitive.size(line_size));
	}
	let candidates = [
		(Encoding::Base8Delta1, 8, 1),
		(Encoding::Base8Delta2, 8, 2),
		(Encoding::Base4Delta1, 4, 1),
		(Encoding::Base8Delta4, 8, 4),
		(Encoding::Base4Delta2, 4, 2),
		(Encoding::Base2Delta1, 2, 1),
	];
	let mut best = Encoding::None;
	let mut best_size = line_size;
	for (encoding, width, delta) in candidates.iter() {
		let size = encoding.size(line_size);
		if size < best_size && base_delta_fits(line, *width, *delta) {
			best = *encoding;
			best_size = size;
		}
	}
	(best, best_size)
}

fn repetitive(line: &[u8]) -> bool {
	let first = &line[0..8];
	line.chunks_exact(8).all(|word| word == first)
}

fn word_at(line: &[u8], offset: usize, width: usize) -> u64 {
	match width {
		2 => u16::from_le_bytes(line[offset..offset + 2].try_into().expect("chunk is 2 bytes; qed")) as u64,
		4 => u32::from_le_bytes(line[offset..offset + 4].try_into().expect("chunk is 4 bytes; qed")) as u64,
		_ => u64::from_le_bytes(line[offset..offset + 8].try_into().expect("chunk is 8 bytes; qed")),
	}
}

// Every word must be representable as a signed `delta`-byte offset from the
// first word, or from zero (immediate).
fn base_delta_fits(line: &[u8], width: usize, delta: usize) -> bool {
	let base = word_at(line, 0, width);
	let bits = 8 * delta as u32;
	let max = (1i64 << (bits - 1)) - 1;
	let min = -(1i64 << (bits - 1));
	let fits = |diff: i64| diff >= min && diff <= max;
	let sign_bits = 8 * width as u32;
	let signed = |v: u64| {
		// Sign-extend a `width`-byte word.
		((v as i64) << (64 - sign_bits)) >> (64 - sign_bits)
	};
	let mut offset = 0;
	while offset < line.len() {
		let v = word_at(line, offset, width);
		let from_base = signed(v).wrapping_sub(signed(base));
		let from_zero = signed(v);
		if !fits(from_base) && !fits(from_zero) {
			return false;
		}
		offset += width;
	}
	true
}

#[cfg(test)]
mod test {
	use super::{compress, Encoding};

	fn line_of_words(words: &[u64]) -> Vec<u8> {
		let mut line = Vec::with_capacity(words.len() * 8);
		for w in words {
			line.extend_from_slice(&w.to_le_bytes());
		}
		line
	}

	#[test]
	fn zero_line_is_one_segment() {
		let line = [0u8; 64];
		let (encoding, size) = compress(&line);
		assert_eq!(encoding, Encoding::Zero);
		assert_eq!(size, 8);
		assert_eq!(encoding.segments(64), 1);
	}

	#[test]
	fn repeated_word_is_one_segment() {
		let line = line_of_words(&[0xdeadbeefcafe0001; 8]);
		let (encoding, size) = compress(&line);
		assert_eq!(encoding, Encoding::Repetitive);
		assert_eq!(size, 8);
	}

	#[test]
	fn small_deltas_from_one_base() {
		let base = 0x1000_0000_0000_0000u64;
		let line = line_of_words(&[base, base + 1, base + 100, base - 50, base, base + 127, base - 128, base + 3]);
		let (encoding, size) = compress(&line);
		assert_eq!(encoding, Encoding::Base8Delta1);
		assert_eq!(size, 16);
	}

	#[test]
	fn wider_deltas_pick_wider_encoding() {
		let base = 0x1000_0000_0000_0000u64;
		let line = line_of_words(&[base, base + 1, base + 30000, base - 20000, base, base + 2, base - 3, base + 4]);
		let (encoding, size) = compress(&line);
		assert_eq!(encoding, Encoding::Base8Delta2);
		assert_eq!(size, 24);
	}

	#[test]
	fn immediates_near_zero_do_not_break_the_base() {
		// Large base values mixed with small immediates is the
		// base-delta-immediate case proper.
		let base = 0x7f00_0000_0000_0000u64;
		let line = line_of_words(&[base, 1, base + 2, 0, base - 1, 3, base, 2]);
		let (encoding, _) = compress(&line);
		assert_eq!(encoding, Encoding::Base8Delta1);
	}

	#[test]
	fn incompressible_line_takes_the_full_line() {
		// Alternating far-apart values with no common base.
		let line = line_of_words(&[
			0x0123456789abcdef,
			0xfedcba9876543210,
			0x0f0f0f0f0f0f0f0f,
			0xf0f0f0f0f0f0f0f0,
			0x1111222233334444,
			0x5555666677778888,
			0x9999aaaabbbbcccc,
			0xddddeeeeffff0123,
		]);
		let (encoding, size) = compress(&line);
		assert_eq!(encoding, Encoding::None);
		assert_eq!(size, 64);
		assert_eq!(encoding.segments(64), 8);
	}

	#[test]
	fn sizes_are_whole_segments() {
		for encoding in [
			Encoding::None,
			Encoding::Zero,
			Encoding::Repetitive,
			Encoding::Base8Delta1,
			Encoding::Base8Delta2,
			Encoding::Base8Delta4,
			Encoding::Base4Delta1,
			Encoding::Base4Delta2,
			Encoding::Base2Delta1,
		]
		.iter()
		{
			assert_eq!(encoding.size(64) % 8, 0);
			assert!(encoding.size(64) >= 8 && encoding.size(64) <= 64);
		}
	}

	#[test]
	fn compression_is_deterministic() {
		let line = line_of_words(&[42, 43, 44, 45, 46, 47, 48, 49]);
		assert_eq!(compress(&line), compress(&line));
	}
}
