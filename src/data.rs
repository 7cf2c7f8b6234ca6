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

// Segmented data store.
//
// Each data set holds `assoc * line_size / 8` segments of 8 bytes. A
// compressed line is anchored at one segment: only that segment carries the
// sharer-list head, the sharer count and the payload. Set occupancy is the
// sum of the encoded sizes of the anchored lines, read through the tag
// array, and never exceeds `assoc * line_size` bytes.

use crate::error::{Error, Result};
use crate::repl::ReplPolicy;
use crate::tag::TagArray;

struct DataSlot {
	list_head: i32,
	counter: u32,
	payload: Vec<u8>,
}

impl DataSlot {
	fn free() -> DataSlot {
		DataSlot { list_head: -1, counter: 0, payload: Vec::new() }
	}
}

pub struct DataArray {
	slots: Vec<DataSlot>,
	sets: u32,
	segments: u32,
	assoc: u32,
	line_size: u32,
	repl: Box<dyn ReplPolicy>,
}

impl DataArray {
	pub fn new(sets: u32, assoc: u32, line_size: u32, repl: Box<dyn ReplPolicy>) -> DataArray {
		let segments = assoc * line_size / 8;
		let mut slots = Vec::with_capacity((sets * segments) as usize);
		for _ in 0..sets * segments {
			slots.push(DataSlot::free());
		}
		DataArray { slots, sets, segments, assoc, line_size, repl }
	}

	fn slot(&self, set: i32, segment: i32) -> &DataSlot {
		&self.slots[(set as u32 * self.segments + segment as u32) as usize]
	}

	fn slot_mut(&mut self, set: i32, segment: i32) -> &mut DataSlot {
		&mut self.slots[(set as u32 * self.segments + segment as u32) as usize]
	}

	pub fn assoc(&self) -> u32 {
		self.assoc
	}

	pub fn sets(&self) -> u32 {
		self.sets
	}

	pub fn segments_per_set(&self) -> u32 {
		self.segments
	}

	pub fn read_list_head(&self, set: i32, segment: i32) -> i32 {
		self.slot(set, segment).list_head
	}

	pub fn read_counter(&self, set: i32, segment: i32) -> u32 {
		self.slot(set, segment).counter
	}

	/// Byte compare against the anchored payload. A free segment matches
	/// nothing.
	pub fn is_same(&self, set: i32, segment: i32, payload: &[u8]) -> bool {
		let slot = self.slot(set, segment);
		slot.list_head != -1 && slot.payload == payload
	}

	/// Replacement touch for a plain data read.
	pub fn lookup(&mut self, set: i32, segment: i32, update_repl: bool) {
		if update_repl {
			self.repl.touch(set as u32, segment as u32);
		}
	}

	/// Bytes occupied in `set`: the encoded sizes of all anchored lines.
	pub fn occupied_bytes(&self, set: u32, tags: &TagArray) -> u32 {
		let mut occupied = 0;
		for segment in 0..self.segments {
			let head = self.read_list_head(set as i32, segment as i32);
			if head != -1 {
				occupied += tags.read_encoding(head).size(self.line_size);
			}
		}
		occupied
	}

	pub fn free_bytes(&self, set: u32, tags: &TagArray) -> u32 {
		self.assoc * self.line_size - self.occupied_bytes(set, tags)
	}

	/// Select the set to install a fresh line into: the one with the most
	/// free bytes, lowest index on ties.
	pub fn target_set(&self, _line_size: u32, tags: &TagArray) -> u32 {
		let mut best = 0;
		let mut best_free = 0;
		for set in 0..self.sets {
			let free = self.free_bytes(set, tags);
			if free > best_free {
				best = set;
				best_free = free;
			}
		}
		best
	}

	/// Policy choice of the next segment to reclaim in `set`, never one of
	/// `kept`. Also returns the chosen segment's sharer-list head so the
	/// caller can evict every sharer.
	pub fn victim_segment(&mut self, set: u32, kept: &[u32]) -> Result<(i32, i32)> {
		let segment = self.repl.victim(set, kept).ok_or_else(|| {
			Error::Corruption(format!("no reclaimable segment left in data set {} ({} kept)", set, kept.len()))
		})?;
		let head = self.read_list_head(set as i32, segment as i32);
		Ok((segment as i32, head))
	}

	/// Commit a payload at `(set, segment)`. `head_tag == -1` frees the
	/// segment. `None` payload keeps the stored bytes.
	pub fn postinsert(
		&mut self,
		head_tag: i32,
		counter: u32,
		set: i32,
		segment: i32,
		payload: Option<&[u8]>,
		update_repl: bool,
	) {
		if head_tag == -1 {
			log::trace!(target: "dedup-cache", "data ({}, {}): free", set, segment);
			*self.slot_mut(set, segment) = DataSlot::free();
			return;
		}
		log::trace!(
			target: "dedup-cache",
			"data ({}, {}): anchor tag {} counter {}",
			set,
			segment,
			head_tag,
			counter,
		);
		let slot = self.slot_mut(set, segment);
		slot.list_head = head_tag;
		slot.counter = counter;
		if let Some(payload) = payload {
			slot.payload = payload.to_vec();
		}
		if update_repl {
			self.repl.replaced(set as u32, segment as u32);
		}
	}

	/// Update the sharer-list head and count without committing a payload.
	pub fn change_in_place(&mut self, head_tag: i32, counter: u32, set: i32, segment: i32, update_repl: bool) {
		let slot = self.slot_mut(set, segment);
		slot.list_head = head_tag;
		slot.counter = counter;
		if update_repl {
			self.repl.touch(set as u32, segment as u32);
		}
	}

	/// Overwrite the payload of an anchored line in place.
	pub fn write_data(&mut self, set: i32, segment: i32, payload: &[u8], update_repl: bool) {
		let slot = self.slot_mut(set, segment);
		slot.payload = payload.to_vec();
		if update_repl {
			self.repl.touch(set as u32, segment as u32);
		}
	}

	/// Occupied segments across all sets, read through the tag encodings.
	pub fn count_valid_segments(&self, tags: &TagArray) -> u32 {
		(0..self.sets).map(|set| self.occupied_bytes(set, tags) / 8).sum()
	}

	/// Number of anchored (distinct) compressed lines.
	pub fn count_compressed_lines(&self) -> u32 {
		self.slots.iter().filter(|s| s.list_head != -1).count() as u32
	}
}
