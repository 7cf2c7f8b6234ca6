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

// Memory-hierarchy collaborators: the request type, the coherence
// controller seam and the guest-memory sampler. The cache drives these
// through narrow interfaces; a fixed-latency controller and a sparse page
// map are provided for standalone use and tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::timing::{EventKind, EventRecorder, TimingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
	/// Read, shared.
	GetS,
	/// Read, exclusive.
	GetX,
	/// Clean writeback from below.
	PutS,
	/// Dirty writeback from below.
	PutX,
}

impl AccessType {
	/// Demand accesses update replacement state; writebacks do not.
	pub fn is_demand(&self) -> bool {
		matches!(self, AccessType::GetS | AccessType::GetX)
	}

	pub fn name(&self) -> &'static str {
		match self {
			AccessType::GetS => "GETS",
			AccessType::GetX => "GETX",
			AccessType::PutS => "PUTS",
			AccessType::PutX => "PUTX",
		}
	}
}

/// Coherence state carried with the request on behalf of the child level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohState {
	Invalid,
	Shared,
	Exclusive,
	Modified,
}

#[derive(Debug, Clone, Copy)]
pub struct MemReq {
	/// Physical block address, shifted right by log2(line size).
	pub line_addr: u64,
	pub kind: AccessType,
	pub src_id: u32,
	pub cycle: u64,
	pub state: CohState,
}

/// The coherence controller owned by the enclosing hierarchy. `start_access`
/// may reclassify the request (the engine re-reads `req.kind` after it) or
/// ask for the whole access body to be skipped; `end_access` is called
/// unconditionally.
pub trait CoherenceController {
	fn start_access(&mut self, req: &mut MemReq) -> bool;
	fn should_allocate(&self, req: &MemReq) -> bool;
	fn process_eviction(
		&mut self,
		req: &MemReq,
		wb_addr: u64,
		victim_tag: i32,
		start_cycle: u64,
		recorder: &mut EventRecorder,
	) -> u64;
	fn process_access(
		&mut self,
		req: &MemReq,
		tag: i32,
		resp_cycle: u64,
		get_done_cycle: &mut u64,
		recorder: &mut EventRecorder,
	) -> u64;
	fn end_access(&mut self, req: &MemReq);
}

/// Models everything above the cache as a single fixed latency. Tracks
/// which tags were filled from upstream so an eviction of a never-filled
/// (invalid) victim produces no writeback traffic.
pub struct FixedLatencyController {
	mem_lat: u64,
	line_bits: u32,
	present: HashSet<i32>,
}

impl FixedLatencyController {
	pub fn new(mem_lat: u64, line_bits: u32) -> FixedLatencyController {
		FixedLatencyController { mem_lat, line_bits, present: HashSet::new() }
	}

	fn upstream_record(
		&self,
		line_addr: u64,
		start_cycle: u64,
		recorder: &mut EventRecorder,
	) -> u64 {
		let done = start_cycle + self.mem_lat;
		let ev = recorder.graph_mut().event(EventKind::Delay, start_cycle, self.mem_lat);
		recorder.push_record(TimingRecord {
			line_addr: line_addr << self.line_bits,
			req_cycle: start_cycle,
			resp_cycle: done,
			start: ev,
			end: ev,
		});
		done
	}
}

impl CoherenceController for FixedLatencyController {
	fn start_access(&mut self, _req: &mut MemReq) -> bool {
		false
	}

	fn should_allocate(&self, _req: &MemReq) -> bool {
		true
	}

	fn process_eviction(
		&mut self,
		_req: &MemReq,
		wb_addr: u64,
		victim_tag: i32,
		start_cycle: u64,
		recorder: &mut EventRecorder,
	) -> u64 {
		if self.present.remove(&victim_tag) {
			log::trace!(target: "dedup-cache", "upstream writeback of {:#x} from cycle {}", wb_addr, start_cycle);
			self.upstream_record(wb_addr, start_cycle, recorder)
		} else {
			start_cycle
		}
	}

	fn process_access(
		&mut self,
		req: &MemReq,
		tag: i32,
		resp_cycle: u64,
		get_done_cycle: &mut u64,
		recorder: &mut EventRecorder,
	) -> u64 {
		let resp = if self.present.insert(tag) {
			log::trace!(target: "dedup-cache", "upstream fetch of {:#x} from cycle {}", req.line_addr, resp_cycle);
			self.upstream_record(req.line_addr, resp_cycle, recorder)
		} else {
			resp_cycle
		};
		*get_done_cycle = resp;
		resp
	}

	fn end_access(&mut self, _req: &MemReq) {}
}

const PAGE_SIZE: u64 = 4096;

/// Guest memory reader. Reads may fault; a faulting read zeroes the buffer.
pub trait MemSampler {
	fn safe_copy(&self, buf: &mut [u8], byte_addr: u64);
}

/// Sparse page map standing in for the instrumented process's address
/// space. Handles are cheap clones of one shared map so a test driver can
/// keep writing while the cache holds its own handle.
#[derive(Clone, Default)]
pub struct SparseMem {
	pages: Rc<RefCell<HashMap<u64, Box<[u8]>>>>,
}

impl SparseMem {
	pub fn new() -> SparseMem {
		Default::default()
	}

	pub fn write(&self, byte_addr: u64, bytes: &[u8]) {
		let mut pages = self.pages.borrow_mut();
		for (i, b) in bytes.iter().enumerate() {
			let addr = byte_addr + i as u64;
			let page = pages
				.entry(addr / PAGE_SIZE)
				.or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
			page[(addr % PAGE_SIZE) as usize] = *b;
		}
	}
}

impl MemSampler for SparseMem {
	fn safe_copy(&self, buf: &mut [u8], byte_addr: u64) {
		let pages = self.pages.borrow();
		for (i, b) in buf.iter_mut().enumerate() {
			let addr = byte_addr + i as u64;
			*b = match pages.get(&(addr / PAGE_SIZE)) {
				Some(page) => page[(addr % PAGE_SIZE) as usize],
				// Unmapped: the fault contract zeroes the byte.
				None => 0,
			};
		}
	}
}
