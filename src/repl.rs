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

// Replacement-policy plug-ins. A policy instance is owned by exactly one
// array and sees ways as opaque slots; the `kept` list excludes slots the
// caller has already reclaimed in the current access.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub trait ReplPolicy {
	/// A slot was touched by a demand access.
	fn touch(&mut self, set: u32, way: u32);
	/// A slot was overwritten with fresh contents.
	fn replaced(&mut self, set: u32, way: u32);
	/// Choose a victim in `set`, never one of `kept`. `None` when every way
	/// is excluded.
	fn victim(&mut self, set: u32, kept: &[u32]) -> Option<u32>;
}

pub struct LruRepl {
	ways: u32,
	stamp: u64,
	last_used: Vec<u64>,
}

impl LruRepl {
	pub fn new(sets: u32, ways: u32) -> LruRepl {
		LruRepl {
			ways,
			stamp: 0,
			last_used: vec![0; (sets * ways) as usize],
		}
	}

	fn slot(&self, set: u32, way: u32) -> usize {
		(set * self.ways + way) as usize
	}
}

impl ReplPolicy for LruRepl {
	fn touch(&mut self, set: u32, way: u32) {
		self.stamp += 1;
		let slot = self.slot(set, way);
		self.last_used[slot] = self.stamp;
	}

	fn replaced(&mut self, set: u32, way: u32) {
		self.touch(set, way);
	}

	fn victim(&mut self, set: u32, kept: &[u32]) -> Option<u32> {
		(0..self.ways)
			.filter(|way| !kept.contains(way))
			.min_by_key(|way| self.last_used[self.slot(set, *way)])
	}
}

pub struct RandomRepl {
	ways: u32,
	rng: SmallRng,
}

impl RandomRepl {
	pub fn new(seed: u64, ways: u32) -> RandomRepl {
		RandomRepl { ways, rng: SmallRng::seed_from_u64(seed) }
	}
}

impl ReplPolicy for RandomRepl {
	fn touch(&mut self, _set: u32, _way: u32) {}

	fn replaced(&mut self, _set: u32, _way: u32) {}

	fn victim(&mut self, _set: u32, kept: &[u32]) -> Option<u32> {
		let candidates: Vec<u32> = (0..self.ways).filter(|way| !kept.contains(way)).collect();
		if candidates.is_empty() {
			return None;
		}
		let pick = self.rng.gen_range(0..candidates.len());
		Some(candidates[pick])
	}
}
