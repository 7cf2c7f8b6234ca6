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

// Tag directory.
//
// Fixed arena of tag lines addressed by `i32` id with `-1` as the null id.
// A valid line points at one data segment as (data_set, segment) and is a
// member of that segment's sharer list through `next_sharer`. No field owns
// its referent; the data array holds the list heads.

use crate::compress::Encoding;
use crate::error::{Error, Result};
use crate::repl::ReplPolicy;

pub struct TagLine {
	addr: u64,
	valid: bool,
	encoding: Encoding,
	data_set: i32,
	segment: i32,
	next_sharer: i32,
}

impl TagLine {
	fn empty() -> TagLine {
		TagLine {
			addr: 0,
			valid: false,
			encoding: Encoding::None,
			data_set: -1,
			segment: -1,
			next_sharer: -1,
		}
	}
}

pub struct TagArray {
	lines: Vec<TagLine>,
	sets: u32,
	assoc: u32,
	repl: Box<dyn ReplPolicy>,
	valid_lines: u32,
}

impl TagArray {
	pub fn new(sets: u32, assoc: u32, repl: Box<dyn ReplPolicy>) -> TagArray {
		let mut lines = Vec::with_capacity((sets * assoc) as usize);
		for _ in 0..sets * assoc {
			lines.push(TagLine::empty());
		}
		TagArray { lines, sets, assoc, repl, valid_lines: 0 }
	}

	fn set_of(&self, addr: u64) -> u32 {
		(addr % self.sets as u64) as u32
	}

	fn location(&self, tag: i32) -> (u32, u32) {
		let tag = tag as u32;
		(tag / self.assoc, tag % self.assoc)
	}

	pub fn lookup(&mut self, addr: u64, update_repl: bool) -> i32 {
		let set = self.set_of(addr);
		for way in 0..self.assoc {
			let id = set * self.assoc + way;
			let line = &self.lines[id as usize];
			if line.valid && line.addr == addr {
				if update_repl {
					self.repl.touch(set, way);
				}
				return id as i32;
			}
		}
		-1
	}

	/// Choose the line to replace for `addr`. Invalid ways are taken first;
	/// otherwise the replacement policy decides. No state changes here.
	pub fn preinsert(&mut self, addr: u64) -> (i32, u64) {
		let set = self.set_of(addr);
		for way in 0..self.assoc {
			let id = set * self.assoc + way;
			if !self.lines[id as usize].valid {
				return (id as i32, self.lines[id as usize].addr);
			}
		}
		let way = self.repl.victim(set, &[]).expect("a set always has an unexcluded way; qed");
		let id = set * self.assoc + way;
		(id as i32, self.lines[id as usize].addr)
	}

	/// Unlink `victim` from the sharer list that starts at `list_head`.
	/// Returns whether the victim was the sole sharer (its segment can be
	/// freed) and, when the victim was the head of a longer list, the new
	/// head.
	pub fn evict_associated_data(&mut self, victim: i32, list_head: i32) -> Result<(bool, i32)> {
		let v = victim as usize;
		if !self.lines[v].valid || self.lines[v].data_set == -1 {
			return Ok((false, -1));
		}
		if list_head == victim {
			let next = self.lines[v].next_sharer;
			self.lines[v].next_sharer = -1;
			return if next == -1 { Ok((true, -1)) } else { Ok((false, next)) };
		}
		let mut cur = list_head;
		while cur != -1 {
			let next = self.lines[cur as usize].next_sharer;
			if next == victim {
				self.lines[cur as usize].next_sharer = self.lines[v].next_sharer;
				self.lines[v].next_sharer = -1;
				return Ok((false, -1));
			}
			cur = next;
		}
		Err(Error::Corruption(format!(
			"tag {} (addr {:#x}) missing from sharer list headed at {}",
			victim, self.lines[v].addr, list_head,
		)))
	}

	/// Write every field of a tag line. `data_set == -1` marks the line
	/// invalid. `next_sharer` is the line this one precedes in its segment's
	/// sharer list.
	pub fn postinsert(
		&mut self,
		addr: u64,
		tag: i32,
		data_set: i32,
		segment: i32,
		encoding: Encoding,
		next_sharer: i32,
		update_repl: bool,
	) {
		let (set, way) = self.location(tag);
		let valid = data_set != -1;
		let line = &mut self.lines[tag as usize];
		if line.valid && !valid {
			self.valid_lines -= 1;
		} else if !line.valid && valid {
			self.valid_lines += 1;
		}
		log::trace!(
			target: "dedup-cache",
			"tag {}: {} addr {:#x} -> ({}, {}) {}",
			tag,
			if valid { "insert" } else { "invalidate" },
			addr,
			data_set,
			segment,
			encoding.name(),
		);
		*line = TagLine { addr, valid, encoding, data_set, segment, next_sharer };
		if update_repl {
			self.repl.replaced(set, way);
		}
	}

	/// Same writes as `postinsert` without informing the replacement policy
	/// of a fresh insertion; the line is only touched.
	pub fn change_in_place(
		&mut self,
		addr: u64,
		tag: i32,
		data_set: i32,
		segment: i32,
		encoding: Encoding,
		next_sharer: i32,
		update_repl: bool,
	) {
		let (set, way) = self.location(tag);
		let valid = data_set != -1;
		let line = &mut self.lines[tag as usize];
		if line.valid && !valid {
			self.valid_lines -= 1;
		} else if !line.valid && valid {
			self.valid_lines += 1;
		}
		*line = TagLine { addr, valid, encoding, data_set, segment, next_sharer };
		if update_repl {
			self.repl.touch(set, way);
		}
	}

	pub fn read_address(&self, tag: i32) -> u64 {
		self.lines[tag as usize].addr
	}

	pub fn read_data_set(&self, tag: i32) -> i32 {
		self.lines[tag as usize].data_set
	}

	pub fn read_segment(&self, tag: i32) -> i32 {
		self.lines[tag as usize].segment
	}

	pub fn read_encoding(&self, tag: i32) -> Encoding {
		self.lines[tag as usize].encoding
	}

	pub fn read_next_sharer(&self, tag: i32) -> i32 {
		self.lines[tag as usize].next_sharer
	}

	pub fn write_encoding(&mut self, tag: i32, encoding: Encoding) {
		self.lines[tag as usize].encoding = encoding;
	}

	pub fn is_valid(&self, tag: i32) -> bool {
		self.lines[tag as usize].valid
	}

	pub fn valid_lines(&self) -> u32 {
		self.valid_lines
	}

	pub fn num_lines(&self) -> u32 {
		self.sets * self.assoc
	}

	pub fn count_valid_lines(&self) -> u32 {
		self.lines.iter().filter(|l| l.valid).count() as u32
	}
}
