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

// Content-hash directory.
//
// Maps a payload hash to the (data_set, segment) that anchored that payload
// at insertion time. The directory is a hint: a missing entry only costs a
// dedup opportunity, and a stale entry (its segment has since died or been
// overwritten) is detected by the byte compare before it is trusted.
// Entries are never scrubbed when a segment dies.

use std::convert::TryInto;

use crate::data::DataArray;
use crate::repl::ReplPolicy;

struct HashEntry {
	hash: u64,
	valid: bool,
	data_set: i32,
	segment: i32,
}

impl HashEntry {
	fn empty() -> HashEntry {
		HashEntry { hash: 0, valid: false, data_set: -1, segment: -1 }
	}
}

pub struct HashArray {
	entries: Vec<HashEntry>,
	sets: u32,
	assoc: u32,
	repl: Box<dyn ReplPolicy>,
}

/// Content hash of a (possibly truncated) line payload.
pub fn hash(payload: &[u8]) -> u64 {
	let digest = blake2_rfc::blake2b::blake2b(8, &[], payload);
	u64::from_le_bytes(digest.as_bytes().try_into().expect("digest is 8 bytes; qed"))
}

impl HashArray {
	pub fn new(sets: u32, assoc: u32, repl: Box<dyn ReplPolicy>) -> HashArray {
		let mut entries = Vec::with_capacity((sets * assoc) as usize);
		for _ in 0..sets * assoc {
			entries.push(HashEntry::empty());
		}
		HashArray { entries, sets, assoc, repl }
	}

	fn set_of(&self, hash: u64) -> u32 {
		(hash % self.sets as u64) as u32
	}

	pub fn lookup(&mut self, hash: u64, update_repl: bool) -> i32 {
		let set = self.set_of(hash);
		for way in 0..self.assoc {
			let id = set * self.assoc + way;
			let entry = &self.entries[id as usize];
			if entry.valid && entry.hash == hash {
				if update_repl {
					self.repl.touch(set, way);
				}
				return id as i32;
			}
		}
		-1
	}

	/// Choose the slot a fresh entry for `hash` would go into. Invalid ways
	/// first, then the replacement policy. `None` means the directory
	/// declines the insert and the caller skips the hash update.
	pub fn preinsert(&mut self, hash: u64) -> Option<i32> {
		let set = self.set_of(hash);
		for way in 0..self.assoc {
			let id = set * self.assoc + way;
			if !self.entries[id as usize].valid {
				return Some(id as i32);
			}
		}
		self.repl.victim(set, &[]).map(|way| (set * self.assoc + way) as i32)
	}

	pub fn postinsert(&mut self, hash: u64, data_set: i32, segment: i32, hash_id: i32, update_repl: bool) {
		let set = self.set_of(hash);
		let way = hash_id as u32 % self.assoc;
		log::trace!(
			target: "dedup-cache",
			"hash {:#x}: slot {} -> ({}, {})",
			hash,
			hash_id,
			data_set,
			segment,
		);
		self.entries[hash_id as usize] = HashEntry { hash, valid: true, data_set, segment };
		if update_repl {
			self.repl.replaced(set, way);
		}
	}

	pub fn read_data_pointer(&self, hash_id: i32) -> i32 {
		self.entries[hash_id as usize].data_set
	}

	pub fn read_segment_pointer(&self, hash_id: i32) -> i32 {
		self.entries[hash_id as usize].segment
	}

	/// Entries whose target segment is still anchored. Stale entries stay
	/// in the array but are not counted.
	pub fn count_valid_lines(&self, data: &DataArray) -> u32 {
		self.entries
			.iter()
			.filter(|e| e.valid && data.read_list_head(e.data_set, e.segment) != -1)
			.count() as u32
	}
}
