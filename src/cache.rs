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

// Access engine.
//
// Every request runs the same shape: tag lookup, compress, content-hash
// lookup, classification into one of eleven cases, segment reclamation in
// the chosen data set until the compressed line fits, then a commit that
// updates the tag, data and hash arrays together. The emitted timing graph
// reproduces the latency of all of it under the enclosing hierarchy's
// event scheduler.
//
// Reclamation frees whole victim segments; every sharer of an evicted
// segment is written back individually through the coherence controller.
// The `kept` list stops the victim policy from re-choosing a segment the
// current access already reclaimed, which is what bounds the loop.

use std::cmp::max;

use crate::approx::{self, DataType, RegionTable};
use crate::compress::{self, Encoding};
use crate::data::DataArray;
use crate::display::hex;
use crate::error::{Error, Result};
use crate::index::{self, HashArray};
use crate::mem::{AccessType, CoherenceController, MemReq, MemSampler};
use crate::options::Options;
use crate::repl::LruRepl;
use crate::stats::{Case, CaseStats, Counter, RunningStats};
use crate::tag::TagArray;
use crate::timing::{EventId, EventKind, EventRecorder, TimingRecord};

/// Per-access scratch: the writeback fan-out collected by reclamation and
/// the child record of the upstream access.
#[derive(Default)]
struct AccessCtx {
	wb_records: Vec<TimingRecord>,
	wb_starts: Vec<u64>,
	wb_ends: Vec<u64>,
	access_record: Option<TimingRecord>,
	evictions: u64,
}

pub struct DedupCache {
	name: String,
	line_size: u32,
	line_bits: u32,
	tag_lines: u32,
	data_lines: u32,
	acc_lat: u64,
	tags: TagArray,
	data: DataArray,
	hashes: HashArray,
	cc: Box<dyn CoherenceController>,
	mem: Box<dyn MemSampler>,
	recorder: EventRecorder,
	regions: RegionTable,
	cases: CaseStats,
	tag_accesses: Counter,
	tag_hits: Counter,
	tag_misses: Counter,
	compression_stats: RunningStats,
	eviction_stats: RunningStats,
	tag_util_stats: RunningStats,
	data_util_stats: RunningStats,
	dedup_stats: RunningStats,
	line_segments_stats: RunningStats,
	hash_util_stats: RunningStats,
	max_util_stats: RunningStats,
}

impl DedupCache {
	pub fn new(
		name: &str,
		options: &Options,
		cc: Box<dyn CoherenceController>,
		mem: Box<dyn MemSampler>,
	) -> Result<DedupCache> {
		options.validate()?;
		let tags = TagArray::new(
			options.tag_sets(),
			options.tag_assoc,
			Box::new(LruRepl::new(options.tag_sets(), options.tag_assoc)),
		);
		let data = DataArray::new(
			options.data_sets(),
			options.data_assoc,
			options.line_size,
			Box::new(LruRepl::new(options.data_sets(), options.segments_per_set())),
		);
		let hashes = HashArray::new(
			options.hash_sets(),
			options.hash_assoc,
			Box::new(LruRepl::new(options.hash_sets(), options.hash_assoc)),
		);
		Ok(DedupCache {
			name: name.into(),
			line_size: options.line_size,
			line_bits: options.line_bits(),
			tag_lines: options.tag_lines,
			data_lines: options.data_lines,
			acc_lat: options.acc_lat,
			tags,
			data,
			hashes,
			cc,
			mem,
			recorder: EventRecorder::default(),
			regions: RegionTable::new(options.regions.clone()),
			cases: CaseStats::default(),
			tag_accesses: Counter::default(),
			tag_hits: Counter::default(),
			tag_misses: Counter::default(),
			compression_stats: RunningStats::new(&format!("{} compression ratio", name)),
			eviction_stats: RunningStats::new(&format!("{} evictions", name)),
			tag_util_stats: RunningStats::new(&format!("{} tag utilization", name)),
			data_util_stats: RunningStats::new(&format!("{} data utilization", name)),
			dedup_stats: RunningStats::new(&format!("{} deduplication average", name)),
			line_segments_stats: RunningStats::new(&format!("{} data size average", name)),
			hash_util_stats: RunningStats::new(&format!("{} hash utilization", name)),
			max_util_stats: RunningStats::new(&format!("{} maximum utilization", name)),
		})
	}

	/// Run one request to completion and return its response cycle.
	pub fn access(&mut self, req: &mut MemReq) -> Result<u64> {
		self.tag_accesses.inc();
		let byte_addr = req.line_addr << self.line_bits;
		let approx_type = self.regions.classify(byte_addr, self.line_size);
		let mut payload = vec![0u8; self.line_size as usize];
		self.mem.safe_copy(&mut payload, byte_addr);
		log::debug!(
			target: "dedup-cache",
			"{}: received {}{} req for address {:#x} on cycle {}",
			self.name,
			if approx_type.is_some() { "approximate " } else { "" },
			req.kind.name(),
			req.line_addr,
			req.cycle,
		);

		let mut ctx = AccessCtx::default();
		let mut resp = req.cycle;

		// May need to skip the body due to races; note the request type can
		// change here, so it is re-read below.
		let skip = self.cc.start_access(req);
		if !skip {
			let update_repl = req.kind.is_demand();
			let tag_id = self.tags.lookup(req.line_addr, update_repl);
			resp += self.acc_lat;
			log::trace!(target: "dedup-cache", "{}: tag accessed on cycle {}", self.name, resp);
			let (tr, resp_out) = if tag_id == -1 {
				self.tag_misses.inc();
				self.miss(req, update_repl, &mut payload, approx_type, resp, &mut ctx)?
			} else {
				self.tag_hits.inc();
				self.hit(req, tag_id, update_repl, &mut payload, approx_type, resp, &mut ctx)?
			};
			resp = resp_out;
			self.recorder.push_record(tr);
		}
		self.cc.end_access(req);

		self.sample_stats(req, ctx.evictions)?;
		if resp < req.cycle {
			return Err(Error::Corruption(format!(
				"{}: response cycle {} precedes request cycle {} for address {:#x}",
				self.name, resp, req.cycle, req.line_addr,
			)));
		}
		#[cfg(debug_assertions)]
		self.check_invariants()?;
		Ok(resp)
	}

	fn miss(
		&mut self,
		req: &MemReq,
		update_repl: bool,
		payload: &mut [u8],
		approx_type: Option<DataType>,
		resp_in: u64,
		ctx: &mut AccessCtx,
	) -> Result<(TimingRecord, u64)> {
		if !self.cc.should_allocate(req) {
			return Err(Error::Corruption(format!(
				"{}: controller refused to allocate a missing line {:#x}",
				self.name, req.line_addr,
			)));
		}
		let (victim_tag, wb_addr) = self.tags.preinsert(req.line_addr);
		log::debug!(target: "dedup-cache", "{}: tag miss, replacing tag {}", self.name, victim_tag);
		// Evicting the tag needs a data read on top of the lookup.
		let evict_cycle = req.cycle + 2 * self.acc_lat;
		let tag_ev_done = self.cc.process_eviction(req, wb_addr, victim_tag, evict_cycle, &mut self.recorder);
		let victim_set = self.tags.read_data_set(victim_tag);
		let victim_seg = self.tags.read_segment(victim_tag);
		self.release_sharing(victim_tag, false, false)?;
		self.tags.postinsert(0, victim_tag, -1, -1, Encoding::None, -1, false);
		let mut tag_wb_record = None;
		if self.recorder.has_record() {
			log::debug!(
				target: "dedup-cache",
				"{}: tag replacement wrote back address {:#x} from ({}, {})",
				self.name, wb_addr, victim_set, victim_seg,
			);
			ctx.evictions += 1;
			self.cases.tag_caused_evictions += 1;
			tag_wb_record = self.recorder.take_record();
		}

		let mut get_done = resp_in;
		let resp = self.cc.process_access(req, victim_tag, resp_in, &mut get_done, &mut self.recorder);
		if let Some(r) = self.recorder.take_record() {
			ctx.access_record = Some(r);
		}

		if let Some(data_type) = approx_type {
			approx::truncate(payload, data_type);
		}
		let h = index::hash(payload);
		let hash_id = self.hashes.lookup(h, update_repl);
		let (encoding, line_bytes) = compress::compress(payload);
		log::debug!(
			target: "dedup-cache",
			"{}: hashed to {:#x} ({}), compressed to {} segments ({})",
			self.name, h, hex(&payload[0..8]), line_bytes / 8, encoding.name(),
		);

		let (start, end);
		if hash_id != -1 {
			let target_set = self.hashes.read_data_pointer(hash_id);
			let target_seg = self.hashes.read_segment_pointer(hash_id);
			if target_set >= 0 && self.data.read_list_head(target_set, target_seg) == -1 {
				let case = Case::TagMissHashInvalid;
				self.cases.record(case);
				log::debug!(
					target: "dedup-cache",
					"{}: hash slot {} points at dead segment ({}, {})",
					self.name, hash_id, target_set, target_seg,
				);
				// An extra data and tag read to stage the victim, after the
				// response.
				let evict_cycle = resp + 2 * self.acc_lat;
				let mut kept = Vec::new();
				let last_ev_done = self.reclaim(
					req, case, target_set as u32, victim_tag, &mut kept, line_bytes, 0,
					evict_cycle, tag_ev_done, true, ctx,
				)?;
				self.tags.postinsert(req.line_addr, victim_tag, target_set, target_seg, encoding, -1, true);
				self.data.postinsert(victim_tag, 1, target_set, target_seg, Some(payload), update_repl);
				self.hashes.postinsert(h, target_set, target_seg, hash_id, true);
				debug_assert_eq!(get_done, resp, "gdc {} rc {}", get_done, resp);
				let (s, e) = self.wire_miss(
					req, resp, max(last_ev_done, tag_ev_done), tag_ev_done, ctx, tag_wb_record.as_ref(),
				);
				start = s;
				end = e;
			} else if target_set >= 0 && self.data.is_same(target_set, target_seg, payload) {
				let case = Case::TagMissDedup;
				self.cases.record(case);
				log::debug!(
					target: "dedup-cache",
					"{}: hash slot {} deduplicates against ({}, {})",
					self.name, hash_id, target_set, target_seg,
				);
				let old_head = self.data.read_list_head(target_set, target_seg);
				let counter = self.data.read_counter(target_set, target_seg);
				self.tags.postinsert(req.line_addr, victim_tag, target_set, target_seg, encoding, old_head, true);
				self.data.change_in_place(victim_tag, counter + 1, target_set, target_seg, update_repl);
				self.hashes.postinsert(h, target_set, target_seg, hash_id, true);
				debug_assert_eq!(get_done, resp, "gdc {} rc {}", get_done, resp);
				// No reclamation: the writeback covers the compare and the
				// sharer bookkeeping.
				let (s, e) = self.wire_miss(
					req, resp, max(resp, tag_ev_done), tag_ev_done, ctx, tag_wb_record.as_ref(),
				);
				start = s;
				end = e;
			} else {
				let case = Case::TagMissCollision;
				self.cases.record(case);
				log::debug!(
					target: "dedup-cache",
					"{}: hash slot {} collides at ({}, {})",
					self.name, hash_id, target_set, target_seg,
				);
				let evict_cycle = resp + 2 * self.acc_lat;
				let install_set = self.data.target_set(line_bytes, &self.tags);
				let mut kept = Vec::new();
				let last_ev_done = self.reclaim(
					req, case, install_set, victim_tag, &mut kept, line_bytes, 0,
					evict_cycle, tag_ev_done, true, ctx,
				)?;
				let anchor = kept[0] as i32;
				self.tags.postinsert(req.line_addr, victim_tag, install_set as i32, anchor, encoding, -1, true);
				self.data.postinsert(victim_tag, 1, install_set as i32, anchor, Some(payload), update_repl);
				// The hash keeps indexing the displaced line while others
				// still share it.
				if self.data.read_counter(target_set, target_seg) == 1 {
					self.hashes.postinsert(h, install_set as i32, anchor, hash_id, true);
				}
				debug_assert_eq!(get_done, resp, "gdc {} rc {}", get_done, resp);
				let (s, e) = self.wire_miss(
					req, resp, max(last_ev_done, tag_ev_done), tag_ev_done, ctx, tag_wb_record.as_ref(),
				);
				start = s;
				end = e;
			}
		} else {
			let case = Case::TagMissHashMiss;
			self.cases.record(case);
			log::debug!(target: "dedup-cache", "{}: no matching hash", self.name);
			let evict_cycle = resp + 2 * self.acc_lat;
			let install_set = self.data.target_set(line_bytes, &self.tags);
			let victim_hash = self.hashes.preinsert(h);
			let mut kept = Vec::new();
			let last_ev_done = self.reclaim(
				req, case, install_set, victim_tag, &mut kept, line_bytes, 0,
				evict_cycle, tag_ev_done, true, ctx,
			)?;
			let anchor = kept[0] as i32;
			self.tags.postinsert(req.line_addr, victim_tag, install_set as i32, anchor, encoding, -1, true);
			self.data.postinsert(victim_tag, 1, install_set as i32, anchor, Some(payload), update_repl);
			if let Some(victim_hash) = victim_hash {
				self.hashes.postinsert(h, install_set as i32, anchor, victim_hash, true);
			}
			debug_assert_eq!(get_done, resp, "gdc {} rc {}", get_done, resp);
			let (s, e) = self.wire_miss(
				req, resp, max(last_ev_done, tag_ev_done), tag_ev_done, ctx, tag_wb_record.as_ref(),
			);
			start = s;
			end = e;
		}

		let tr = TimingRecord {
			line_addr: req.line_addr << self.line_bits,
			req_cycle: req.cycle,
			resp_cycle: resp,
			start,
			end,
		};
		Ok((tr, resp))
	}

	fn hit(
		&mut self,
		req: &MemReq,
		tag_id: i32,
		update_repl: bool,
		payload: &mut [u8],
		approx_type: Option<DataType>,
		resp_in: u64,
		ctx: &mut AccessCtx,
	) -> Result<(TimingRecord, u64)> {
		log::debug!(target: "dedup-cache", "{}: tag hit on line {}", self.name, tag_id);
		if let Some(data_type) = approx_type {
			approx::truncate(payload, data_type);
		}
		let h = index::hash(payload);
		let hash_id = self.hashes.lookup(h, update_repl);
		let (encoding, line_bytes) = compress::compress(payload);
		let set = self.tags.read_data_set(tag_id);
		let seg = self.tags.read_segment(tag_id);
		log::debug!(
			target: "dedup-cache",
			"{}: hashed to {:#x}, compressed to {} segments ({})",
			self.name, h, line_bytes / 8, encoding.name(),
		);

		let mut resp = resp_in;
		let (start, end);
		if req.kind == AccessType::PutX && !self.data.is_same(set, seg, payload) {
			log::debug!(target: "dedup-cache", "{}: write brings different data on cycle {}", self.name, resp);
			if hash_id != -1 {
				let target_set = self.hashes.read_data_pointer(hash_id);
				let target_seg = self.hashes.read_segment_pointer(hash_id);
				if target_set >= 0 && target_seg >= 0 && self.data.read_list_head(target_set, target_seg) == -1 {
					let case = Case::WriteDiffHashInvalid;
					self.cases.record(case);
					self.release_sharing(tag_id, true, false)?;
					// Stage the victim line: one data read, one tag read.
					let evict_cycle = resp + 2 * self.acc_lat;
					let mut kept = Vec::new();
					let last_ev_done = self.reclaim(
						req, case, target_set as u32, tag_id, &mut kept, line_bytes, 0,
						evict_cycle, 0, false, ctx,
					)?;
					self.tags.postinsert(req.line_addr, tag_id, target_set, target_seg, encoding, -1, update_repl);
					self.data.postinsert(tag_id, 1, target_set, target_seg, Some(payload), true);
					self.hashes.postinsert(h, target_set, target_seg, hash_id, true);
					resp = self.finish_hit_access(req, tag_id, resp, ctx);
					let he = self.wire_hit(req, resp, last_ev_done, ctx);
					start = he;
					end = he;
				} else if target_set >= 0 && target_seg >= 0 && self.data.is_same(target_set, target_seg, payload) {
					let case = Case::WriteDiffDedup;
					self.cases.record(case);
					log::debug!(
						target: "dedup-cache",
						"{}: new data deduplicates against ({}, {})",
						self.name, target_set, target_seg,
					);
					self.release_sharing(tag_id, true, false)?;
					let old_head = self.data.read_list_head(target_set, target_seg);
					let counter = self.data.read_counter(target_set, target_seg);
					self.tags.change_in_place(req.line_addr, tag_id, target_set, target_seg, encoding, old_head, true);
					self.data.change_in_place(tag_id, counter + 1, target_set, target_seg, update_repl);
					self.hashes.postinsert(h, target_set, target_seg, hash_id, true);
					resp = self.finish_hit_access(req, tag_id, resp, ctx);
					let he = self.wire_hit(req, resp, resp, ctx);
					start = he;
					end = he;
				} else {
					// Same hash, different payload.
					if self.data.read_counter(set, seg) == 1 {
						let case = Case::WriteDiffCollisionSingle;
						self.cases.record(case);
						let evict_cycle = resp + 2 * self.acc_lat;
						// The line is not shared: grow or shrink it in place,
						// crediting the bytes it already occupies.
						let credit = self.tags.read_encoding(tag_id).size(self.line_size);
						let mut kept = vec![seg as u32];
						let last_ev_done = self.reclaim(
							req, case, set as u32, tag_id, &mut kept, line_bytes, credit,
							evict_cycle, 0, false, ctx,
						)?;
						self.data.write_data(set, seg, payload, true);
						self.tags.write_encoding(tag_id, encoding);
						if self.data.read_counter(target_set, target_seg) == 1 {
							self.hashes.postinsert(h, set, seg, hash_id, true);
						}
						resp = self.finish_hit_access(req, tag_id, resp, ctx);
						let he = self.wire_hit(req, resp, last_ev_done, ctx);
						start = he;
						end = he;
					} else {
						let case = Case::WriteDiffCollisionShared;
						self.cases.record(case);
						self.release_sharing(tag_id, false, true)?;
						// Staging the victim takes an extra data read here:
						// the old sharers keep their payload.
						let evict_cycle = resp + 3 * self.acc_lat;
						let install_set = self.data.target_set(line_bytes, &self.tags);
						let mut kept = Vec::new();
						let last_ev_done = self.reclaim(
							req, case, install_set, tag_id, &mut kept, line_bytes, 0,
							evict_cycle, 0, false, ctx,
						)?;
						let anchor = kept[0] as i32;
						self.tags.postinsert(req.line_addr, tag_id, install_set as i32, anchor, encoding, -1, update_repl);
						self.data.postinsert(tag_id, 1, install_set as i32, anchor, Some(payload), true);
						if self.data.read_counter(target_set, target_seg) == 1 {
							self.hashes.postinsert(h, install_set as i32, anchor, hash_id, true);
						}
						resp = self.finish_hit_access(req, tag_id, resp, ctx);
						let he = self.wire_hit(req, resp, last_ev_done, ctx);
						start = he;
						end = he;
					}
				}
			} else {
				log::debug!(target: "dedup-cache", "{}: no matching hash", self.name);
				if self.data.read_counter(set, seg) == 1 {
					let case = Case::WriteDiffHashMissSingle;
					self.cases.record(case);
					let evict_cycle = resp + 2 * self.acc_lat;
					let credit = self.tags.read_encoding(tag_id).size(self.line_size);
					let mut kept = vec![seg as u32];
					let last_ev_done = self.reclaim(
						req, case, set as u32, tag_id, &mut kept, line_bytes, credit,
						evict_cycle, 0, false, ctx,
					)?;
					self.data.write_data(set, seg, payload, true);
					self.tags.write_encoding(tag_id, encoding);
					if let Some(victim_hash) = self.hashes.preinsert(h) {
						self.hashes.postinsert(h, set, seg, victim_hash, true);
					}
					resp = self.finish_hit_access(req, tag_id, resp, ctx);
					let he = self.wire_hit(req, resp, last_ev_done, ctx);
					start = he;
					end = he;
				} else {
					let case = Case::WriteDiffHashMissShared;
					self.cases.record(case);
					// Shared: the old payload stays for the other sharers,
					// the writer moves to fresh segments.
					self.release_sharing(tag_id, false, true)?;
					let evict_cycle = resp + 2 * self.acc_lat;
					let install_set = self.data.target_set(line_bytes, &self.tags);
					let mut kept = Vec::new();
					let last_ev_done = self.reclaim(
						req, case, install_set, tag_id, &mut kept, line_bytes, 0,
						evict_cycle, 0, false, ctx,
					)?;
					let anchor = kept[0] as i32;
					self.tags.postinsert(req.line_addr, tag_id, install_set as i32, anchor, encoding, -1, update_repl);
					self.data.postinsert(tag_id, 1, install_set as i32, anchor, Some(payload), true);
					if let Some(victim_hash) = self.hashes.preinsert(h) {
						self.hashes.postinsert(h, install_set as i32, anchor, victim_hash, true);
					}
					resp = self.finish_hit_access(req, tag_id, resp, ctx);
					let he = self.wire_hit(req, resp, last_ev_done, ctx);
					start = he;
					end = he;
				}
			}
		} else {
			self.cases.record(Case::ReadOrWriteSame);
			log::debug!(target: "dedup-cache", "{}: read hit, or write of identical data", self.name);
			resp += self.acc_lat;
			self.data.lookup(set, seg, update_repl);
			resp = self.finish_hit_access(req, tag_id, resp, ctx);
			// A pure read: one event spans the whole access, no writeback.
			let he = self.recorder.graph_mut().event(EventKind::Hit, req.cycle, resp - req.cycle);
			start = he;
			end = he;
		}

		let tr = TimingRecord {
			line_addr: req.line_addr << self.line_bits,
			req_cycle: req.cycle,
			resp_cycle: resp,
			start,
			end,
		};
		Ok((tr, resp))
	}

	/// Upstream access of a tag hit, performed after the commit. Any child
	/// record becomes this access's spliced fragment.
	fn finish_hit_access(&mut self, req: &MemReq, tag_id: i32, resp: u64, ctx: &mut AccessCtx) -> u64 {
		let mut get_done = resp;
		let resp = self.cc.process_access(req, tag_id, resp, &mut get_done, &mut self.recorder);
		if let Some(r) = self.recorder.take_record() {
			ctx.access_record = Some(r);
		}
		resp
	}

	/// Unlink `victim_tag` from its sharer list and settle the segment it
	/// leaves: free it when the victim was the sole sharer, otherwise
	/// decrement the count and, when the victim was the head, promote the
	/// successor.
	fn release_sharing(&mut self, victim_tag: i32, invalidate_on_free: bool, expect_shared: bool) -> Result<()> {
		let set = self.tags.read_data_set(victim_tag);
		let seg = self.tags.read_segment(victim_tag);
		if !self.tags.is_valid(victim_tag) || set == -1 || seg == -1 {
			return Ok(());
		}
		let head = self.data.read_list_head(set, seg);
		let (frees, new_head) = self.tags.evict_associated_data(victim_tag, head)?;
		if frees {
			if expect_shared {
				return Err(Error::Corruption(format!(
					"{}: tag {} freed segment ({}, {}) with counter {} > 1\n{}",
					self.name, victim_tag, set, seg, self.data.read_counter(set, seg), self.dump_state(),
				)));
			}
			log::debug!(target: "dedup-cache", "{}: segment ({}, {}) freed", self.name, set, seg);
			self.data.postinsert(-1, 0, set, seg, None, false);
			if invalidate_on_free {
				self.tags.postinsert(0, victim_tag, -1, -1, Encoding::None, -1, false);
			}
		} else if new_head != -1 {
			let counter = self.data.read_counter(set, seg);
			log::debug!(
				target: "dedup-cache",
				"{}: segment ({}, {}) sharers down to {}, head now {}",
				self.name, set, seg, counter - 1, new_head,
			);
			self.data.change_in_place(new_head, counter - 1, set, seg, false);
		} else {
			let counter = self.data.read_counter(set, seg);
			let head = self.data.read_list_head(set, seg);
			log::debug!(
				target: "dedup-cache",
				"{}: segment ({}, {}) sharers down to {}",
				self.name, set, seg, counter - 1,
			);
			self.data.change_in_place(head, counter - 1, set, seg, false);
		}
		Ok(())
	}

	/// The reclamation loop: free victim segments in `set` until the line
	/// fits. Always frees at least one segment; the first choice doubles as
	/// the anchor for fresh installs. `credit` is the size of a line the
	/// caller is about to overwrite in place, which counts as reusable.
	fn reclaim(
		&mut self,
		req: &MemReq,
		case: Case,
		set: u32,
		keep_tag: i32,
		kept: &mut Vec<u32>,
		need: u32,
		credit: u32,
		ev_begin_cycle: u64,
		tag_ev_done: u64,
		refloor_each_round: bool,
		ctx: &mut AccessCtx,
	) -> Result<u64> {
		let mut ev_begin = ev_begin_cycle;
		let mut last_ev_done = tag_ev_done;
		loop {
			let mut free = self.data.free_bytes(set, &self.tags);
			let (victim_seg, mut sharer) = self.data.victim_segment(set, kept)?;
			let victim_head = self.data.read_list_head(set as i32, victim_seg);
			if victim_head != -1 {
				free += self.tags.read_encoding(victim_head).size(self.line_size);
			}
			log::debug!(
				target: "dedup-cache",
				"{}: reclaiming segment {} of data set {}, {} bytes free after",
				self.name, victim_seg, set, free,
			);
			kept.push(victim_seg as u32);
			let mut ev_done = ev_begin;
			if refloor_each_round {
				last_ev_done = tag_ev_done;
			}
			if let Some(r) = self.recorder.take_record() {
				ctx.access_record = Some(r);
			}
			let mut first_this_round = true;
			while sharer != -1 {
				let next = self.tags.read_next_sharer(sharer);
				if sharer != keep_tag {
					let wb_addr = self.tags.read_address(sharer);
					log::trace!(
						target: "dedup-cache",
						"{}: reclamation writeback of address {:#x} on cycle {}",
						self.name, wb_addr, ev_begin,
					);
					ev_done = self.cc.process_eviction(req, wb_addr, sharer, ev_begin, &mut self.recorder);
					self.tags.postinsert(0, sharer, -1, -1, Encoding::None, -1, false);
				}
				if self.recorder.has_record() {
					if first_this_round {
						self.cases.reclaim_eviction(case);
						first_this_round = false;
					}
					self.cases.sharer_eviction(case);
					ctx.evictions += 1;
					if let Some(r) = self.recorder.take_record() {
						ctx.wb_records.push(r);
						ctx.wb_starts.push(ev_begin);
						ctx.wb_ends.push(ev_done);
					}
					last_ev_done = ev_done;
					ev_begin += self.acc_lat;
				}
				sharer = next;
			}
			self.data.postinsert(-1, 0, set as i32, victim_seg, None, false);
			if free + credit >= need {
				break;
			}
		}
		Ok(last_ev_done)
	}

	/// Event skeleton of every miss case: start, response, writeback, the
	/// reclamation fan-out between response and writeback, and the tag
	/// eviction side path.
	fn wire_miss(
		&mut self,
		req: &MemReq,
		resp: u64,
		wb_min_start: u64,
		tag_ev_done: u64,
		ctx: &AccessCtx,
		tag_wb_record: Option<&TimingRecord>,
	) -> (EventId, EventId) {
		let acc_lat = self.acc_lat;
		let graph = self.recorder.graph_mut();
		let mse = graph.event(EventKind::MissStart, req.cycle, acc_lat);
		let mre = graph.event(EventKind::MissResponse, resp, 0);
		// One read to find the line differs, one write to the victim.
		let mwe = graph.event(EventKind::MissWriteback, wb_min_start, 2 * acc_lat);
		log::trace!(
			target: "dedup-cache",
			"{}: miss events start {} response {} writeback {}",
			self.name, req.cycle, resp, wb_min_start,
		);
		graph.connect(ctx.access_record.as_ref(), mse, mre, req.cycle + acc_lat, resp);
		for i in 0..ctx.wb_starts.len() {
			let fan = graph.event(EventKind::Delay, resp, ctx.wb_starts[i] - resp);
			graph.add_child(mre, fan);
			graph.connect(Some(&ctx.wb_records[i]), fan, mwe, ctx.wb_starts[i], ctx.wb_ends[i]);
		}
		graph.add_child(mre, mwe);
		if tag_ev_done != 0 {
			let side = graph.event(EventKind::Delay, req.cycle + acc_lat, acc_lat);
			graph.add_child(mse, side);
			graph.connect(tag_wb_record, side, mwe, req.cycle + 2 * acc_lat, tag_ev_done);
		}
		(mse, mre)
	}

	/// Event skeleton of a mutating hit: the hit event spans the access,
	/// writebacks fan out from it one tag latency in, and converge on the
	/// hit-writeback event.
	fn wire_hit(&mut self, req: &MemReq, resp: u64, wb_min_start: u64, ctx: &AccessCtx) -> EventId {
		let acc_lat = self.acc_lat;
		let graph = self.recorder.graph_mut();
		let he = graph.event(EventKind::Hit, req.cycle, resp - req.cycle);
		// One read to find the line changed, one to stage the victim, one
		// to write.
		let hwe = graph.event(EventKind::HitWriteback, wb_min_start, 3 * acc_lat);
		log::trace!(
			target: "dedup-cache",
			"{}: hit events span {}..{}, writeback {}",
			self.name, req.cycle, resp, wb_min_start,
		);
		for i in 0..ctx.wb_starts.len() {
			let fan = graph.event(
				EventKind::Delay,
				req.cycle + acc_lat,
				ctx.wb_starts[i] - (req.cycle + acc_lat),
			);
			graph.add_child(he, fan);
			graph.connect(Some(&ctx.wb_records[i]), fan, hwe, ctx.wb_starts[i], ctx.wb_ends[i]);
		}
		graph.add_child(he, hwe);
		he
	}

	fn sample_stats(&mut self, req: &MemReq, evictions: u64) -> Result<()> {
		let valid_lines = self.tags.valid_lines();
		let valid_segments = self.data.count_valid_segments(&self.tags);
		let segments_per_line = self.line_size / 8;
		let total_segments = self.data_lines * segments_per_line;
		if valid_lines > self.tag_lines {
			return Err(Error::Corruption(format!(
				"{}: {} valid tags exceed the {} tag lines\n{}",
				self.name, valid_lines, self.tag_lines, self.dump_state(),
			)));
		}
		if valid_segments > total_segments {
			return Err(Error::Corruption(format!(
				"{}: {} valid segments exceed the {} data segments\n{}",
				self.name, valid_segments, total_segments, self.dump_state(),
			)));
		}
		if valid_lines < valid_segments / segments_per_line {
			return Err(Error::Corruption(format!(
				"{}: {} valid tags cannot cover {} valid segments\n{}",
				self.name, valid_lines, valid_segments, self.dump_state(),
			)));
		}

		if valid_lines > 0 {
			let sample = (valid_segments as f64 / segments_per_line as f64) / valid_lines as f64;
			self.compression_stats.add(sample, 1);
		}
		if req.kind != AccessType::PutS {
			self.eviction_stats.add(evictions as f64, 1);
		}
		let data_util = (valid_segments as f64 / segments_per_line as f64) / self.data_lines as f64;
		self.data_util_stats.add(data_util, 1);
		let tag_util = valid_lines as f64 / self.tag_lines as f64;
		self.tag_util_stats.add(tag_util, 1);
		let compressed_lines = self.data.count_compressed_lines();
		if compressed_lines > 0 {
			self.dedup_stats.add(valid_lines as f64 / compressed_lines as f64, 1);
			self.line_segments_stats.add(valid_segments as f64 / compressed_lines as f64, 1);
		}
		self.max_util_stats.add(data_util.max(tag_util), 1);
		self.hash_util_stats.add(self.hashes.count_valid_lines(&self.data) as f64, 1);
		Ok(())
	}

	/// Cross-array consistency: set occupancy within capacity, every valid
	/// tag in exactly one sharer list with matching pointers and encoding,
	/// counters equal to list lengths.
	pub fn check_invariants(&self) -> Result<()> {
		let corrupt = |what: String| Err(Error::Corruption(format!("{}: {}\n{}", self.name, what, self.dump_state())));
		let capacity = self.data.assoc() * self.line_size;
		let num_tags = self.tags.num_lines();
		let mut reached = vec![false; num_tags as usize];
		for set in 0..self.data.sets() {
			let occupied = self.data.occupied_bytes(set, &self.tags);
			if occupied > capacity {
				return corrupt(format!("data set {} holds {} bytes of {}", set, occupied, capacity));
			}
			for segment in 0..self.data.segments_per_set() {
				let head = self.data.read_list_head(set as i32, segment as i32);
				if head == -1 {
					if self.data.read_counter(set as i32, segment as i32) != 0 {
						return corrupt(format!("free segment ({}, {}) has a nonzero counter", set, segment));
					}
					continue;
				}
				let head_encoding = self.tags.read_encoding(head);
				let mut sharers = 0;
				let mut cursor = head;
				while cursor != -1 {
					if sharers > num_tags {
						return corrupt(format!("sharer list of ({}, {}) cycles", set, segment));
					}
					if !self.tags.is_valid(cursor) {
						return corrupt(format!("invalid tag {} linked at ({}, {})", cursor, set, segment));
					}
					if reached[cursor as usize] {
						return corrupt(format!("tag {} linked twice", cursor));
					}
					reached[cursor as usize] = true;
					if self.tags.read_data_set(cursor) != set as i32
						|| self.tags.read_segment(cursor) != segment as i32
					{
						return corrupt(format!(
							"tag {} points at ({}, {}) but is linked at ({}, {})",
							cursor,
							self.tags.read_data_set(cursor),
							self.tags.read_segment(cursor),
							set,
							segment,
						));
					}
					if self.tags.read_encoding(cursor) != head_encoding {
						return corrupt(format!("tag {} disagrees with its head about the encoding", cursor));
					}
					sharers += 1;
					cursor = self.tags.read_next_sharer(cursor);
				}
				let counter = self.data.read_counter(set as i32, segment as i32);
				if counter != sharers {
					return corrupt(format!(
						"segment ({}, {}) counts {} sharers but links {}",
						set, segment, counter, sharers,
					));
				}
			}
		}
		for tag in 0..num_tags as i32 {
			if self.tags.is_valid(tag) != reached[tag as usize] {
				return corrupt(format!(
					"tag {} is {} but {} from a sharer list",
					tag,
					if self.tags.is_valid(tag) { "valid" } else { "invalid" },
					if reached[tag as usize] { "reachable" } else { "unreachable" },
				));
			}
		}
		if self.tags.valid_lines() != self.tags.count_valid_lines() {
			return corrupt(format!(
				"cached valid-line count {} diverges from {}",
				self.tags.valid_lines(),
				self.tags.count_valid_lines(),
			));
		}
		Ok(())
	}

	fn dump_state(&self) -> String {
		use std::fmt::Write;
		let mut out = String::new();
		let _ = writeln!(out, "tag array:");
		for tag in 0..self.tags.num_lines() as i32 {
			if self.tags.is_valid(tag) {
				let _ = writeln!(
					out,
					"  tag {}: addr {:#x} -> ({}, {}) {} next {}",
					tag,
					self.tags.read_address(tag),
					self.tags.read_data_set(tag),
					self.tags.read_segment(tag),
					self.tags.read_encoding(tag).name(),
					self.tags.read_next_sharer(tag),
				);
			}
		}
		let _ = writeln!(out, "data array:");
		for set in 0..self.data.sets() {
			for segment in 0..self.data.segments_per_set() {
				let head = self.data.read_list_head(set as i32, segment as i32);
				if head != -1 {
					let _ = writeln!(
						out,
						"  ({}, {}): head {} counter {}",
						set,
						segment,
						head,
						self.data.read_counter(set as i32, segment as i32),
					);
				}
			}
		}
		out
	}

	pub fn dump_stats(&self) {
		log::info!(target: "dedup-cache", "{}: {} accesses, {} hits, {} misses",
			self.name, self.tag_accesses.get(), self.tag_hits.get(), self.tag_misses.get());
		self.cases.dump();
		self.compression_stats.dump();
		self.eviction_stats.dump();
		self.tag_util_stats.dump();
		self.data_util_stats.dump();
		self.dedup_stats.dump();
		self.line_segments_stats.dump();
		self.hash_util_stats.dump();
		self.max_util_stats.dump();
	}

	pub fn cases(&self) -> &CaseStats {
		&self.cases
	}

	pub fn valid_lines(&self) -> u32 {
		self.tags.valid_lines()
	}

	pub fn valid_segments(&self) -> u32 {
		self.data.count_valid_segments(&self.tags)
	}

	pub fn compressed_lines(&self) -> u32 {
		self.data.count_compressed_lines()
	}

	pub fn recorder(&self) -> &EventRecorder {
		&self.recorder
	}

	pub fn recorder_mut(&mut self) -> &mut EventRecorder {
		&mut self.recorder
	}

	pub fn tag_hits(&self) -> u64 {
		self.tag_hits.get()
	}

	pub fn tag_misses(&self) -> u64 {
		self.tag_misses.get()
	}
}

#[cfg(test)]
mod test {
	use super::DedupCache;
	use crate::approx::{DataType, Region};
	use crate::compress;
	use crate::mem::{
		AccessType, CohState, CoherenceController, FixedLatencyController, MemReq, SparseMem,
	};
	use crate::options::Options;
	use crate::stats::Case;
	use crate::timing::{EventKind, EventRecorder, TimingRecord};
	use rand::rngs::SmallRng;
	use rand::{RngCore, SeedableRng};

	const ACC_LAT: u64 = 9;
	const MEM_LAT: u64 = 100;

	struct Harness {
		cache: DedupCache,
		mem: SparseMem,
		cycle: u64,
	}

	fn options(tag_lines: u32, tag_assoc: u32, data_lines: u32, data_assoc: u32) -> Options {
		Options {
			line_size: 64,
			tag_lines,
			tag_assoc,
			data_lines,
			data_assoc,
			hash_lines: 16,
			hash_assoc: 4,
			acc_lat: ACC_LAT,
			..Default::default()
		}
	}

	fn harness(options: Options) -> Harness {
		env_logger::try_init().ok();
		let mem = SparseMem::new();
		let cc = FixedLatencyController::new(MEM_LAT, options.line_bits());
		let cache =
			DedupCache::new("l3", &options, Box::new(cc), Box::new(mem.clone())).unwrap();
		Harness { cache, mem, cycle: 0 }
	}

	impl Harness {
		fn write_line(&self, line_addr: u64, payload: &[u8]) {
			self.mem.write(line_addr << 6, payload);
		}

		fn access(&mut self, kind: AccessType, line_addr: u64) -> TimingRecord {
			self.cycle += 1000;
			let mut req = MemReq {
				line_addr,
				kind,
				src_id: 0,
				cycle: self.cycle,
				state: CohState::Invalid,
			};
			let resp = self.cache.access(&mut req).unwrap();
			self.cache.check_invariants().unwrap();
			let record = self.cache.recorder_mut().take_record().unwrap();
			assert!(!self.cache.recorder().has_record());
			assert_eq!(record.req_cycle, self.cycle);
			assert_eq!(record.resp_cycle, resp);
			assert!(resp >= self.cycle);
			record
		}

		fn install(&mut self, line_addr: u64, payload: &[u8]) {
			self.write_line(line_addr, payload);
			self.access(AccessType::GetS, line_addr);
		}

		fn transitions(&self, case: Case) -> u64 {
			self.cache.cases().transitions(case)
		}
	}

	fn repetitive_line(value: u64) -> Vec<u8> {
		let mut line = Vec::with_capacity(64);
		for _ in 0..8 {
			line.extend_from_slice(&value.to_le_bytes());
		}
		line
	}

	fn incompressible_line(seed: u64) -> Vec<u8> {
		let mut rng = SmallRng::seed_from_u64(seed);
		let mut line = vec![0u8; 64];
		rng.fill_bytes(&mut line);
		assert_eq!(compress::compress(&line).0, crate::compress::Encoding::None);
		line
	}

	#[test]
	fn distinct_compressible_lines_all_resident() {
		let mut h = harness(options(4, 4, 8, 2));
		for addr in 1..=4u64 {
			h.install(addr, &repetitive_line(0x1000 + addr));
		}
		assert_eq!(h.cache.valid_lines(), 4);
		assert_eq!(h.cache.valid_segments(), 4);
		assert_eq!(h.cache.compressed_lines(), 4);
		assert_eq!(h.transitions(Case::TagMissHashMiss), 4);
		assert_eq!(h.cache.cases().tag_caused_evictions, 0);
		assert_eq!(h.cache.cases().sharer_evictions(Case::TagMissHashMiss), 0);
	}

	#[test]
	fn repeated_access_hits_without_evictions() {
		let mut h = harness(options(4, 4, 8, 2));
		h.install(5, &repetitive_line(77));
		let lines_before = h.cache.valid_lines();
		h.access(AccessType::GetS, 5);
		h.access(AccessType::GetS, 5);
		assert_eq!(h.cache.valid_lines(), lines_before);
		assert_eq!(h.transitions(Case::ReadOrWriteSame), 2);
		assert_eq!(h.cache.tag_hits(), 2);
		assert_eq!(h.cache.tag_misses(), 1);
		assert_eq!(h.cache.cases().tag_caused_evictions, 0);
	}

	#[test]
	fn write_of_identical_data_is_a_plain_hit() {
		let mut h = harness(options(4, 4, 8, 2));
		let payload = repetitive_line(0xabcd);
		h.install(9, &payload);
		let segments = h.cache.valid_segments();
		h.access(AccessType::PutX, 9);
		assert_eq!(h.transitions(Case::ReadOrWriteSame), 1);
		assert_eq!(h.cache.valid_segments(), segments);
		assert_eq!(h.cache.compressed_lines(), 1);
	}

	#[test]
	fn identical_payloads_deduplicate() {
		let mut h = harness(options(4, 4, 8, 2));
		let payload = repetitive_line(0x5150);
		h.install(1, &payload);
		h.install(2, &payload);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		assert_eq!(h.cache.valid_lines(), 2);
		assert_eq!(h.cache.valid_segments(), 1);
		assert_eq!(h.cache.compressed_lines(), 1);
		h.install(3, &payload);
		assert_eq!(h.transitions(Case::TagMissDedup), 2);
		assert_eq!(h.cache.valid_lines(), 3);
		assert_eq!(h.cache.valid_segments(), 1);
	}

	#[test]
	fn full_set_still_admits_a_dedup_insert() {
		// One data set of 8 segments; an incompressible line fills it.
		let mut h = harness(options(4, 4, 1, 1));
		let payload = incompressible_line(3);
		h.install(1, &payload);
		assert_eq!(h.cache.valid_segments(), 8);
		h.install(2, &payload);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		assert_eq!(h.cache.valid_lines(), 2);
		assert_eq!(h.cache.valid_segments(), 8);
		assert_eq!(h.cache.cases().sharer_evictions(Case::TagMissDedup), 0);
	}

	#[test]
	fn incompressible_line_reclaims_the_whole_set() {
		let mut h = harness(options(8, 8, 1, 1));
		for addr in 1..=4u64 {
			h.install(addr, &repetitive_line(0x2000 + addr));
		}
		assert_eq!(h.cache.valid_segments(), 4);
		h.install(5, &incompressible_line(11));
		assert_eq!(h.transitions(Case::TagMissHashMiss), 5);
		assert_eq!(h.cache.cases().sharer_evictions(Case::TagMissHashMiss), 4);
		assert_eq!(h.cache.valid_lines(), 1);
		assert_eq!(h.cache.valid_segments(), 8);
		// The evicted lines are gone: touching one misses again.
		let misses = h.cache.tag_misses();
		h.write_line(1, &repetitive_line(0x2001));
		h.access(AccessType::GetS, 1);
		assert_eq!(h.cache.tag_misses(), misses + 1);
	}

	#[test]
	fn write_moves_tag_between_dedup_groups() {
		let mut h = harness(options(4, 4, 8, 2));
		let p = repetitive_line(0xaaaa);
		let q = repetitive_line(0xbbbb);
		h.install(1, &p);
		h.install(2, &q);
		h.install(3, &q);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		assert_eq!(h.cache.valid_lines(), 3);
		assert_eq!(h.cache.compressed_lines(), 2);
		// The second sharer of q is overwritten with p's contents.
		h.write_line(3, &p);
		h.access(AccessType::PutX, 3);
		assert_eq!(h.transitions(Case::WriteDiffDedup), 1);
		assert_eq!(h.cache.valid_lines(), 3);
		assert_eq!(h.cache.valid_segments(), 2);
		assert_eq!(h.cache.compressed_lines(), 2);
		// A fourth line with q's payload still finds q's group.
		h.install(4, &q);
		assert_eq!(h.transitions(Case::TagMissDedup), 2);
	}

	#[test]
	fn unshared_write_grows_the_line_in_place() {
		let mut h = harness(options(4, 4, 2, 1));
		h.install(1, &repetitive_line(0x1111));
		assert_eq!(h.cache.valid_segments(), 1);
		h.write_line(1, &incompressible_line(21));
		h.access(AccessType::PutX, 1);
		assert_eq!(h.transitions(Case::WriteDiffHashMissSingle), 1);
		assert_eq!(h.cache.valid_lines(), 1);
		assert_eq!(h.cache.valid_segments(), 8);
		assert_eq!(h.cache.compressed_lines(), 1);
	}

	#[test]
	fn shared_write_moves_to_fresh_segments() {
		let mut h = harness(options(4, 4, 2, 1));
		let p = repetitive_line(0x3333);
		h.install(1, &p);
		h.install(2, &p);
		assert_eq!(h.cache.valid_segments(), 1);
		h.write_line(2, &repetitive_line(0x4444));
		h.access(AccessType::PutX, 2);
		assert_eq!(h.transitions(Case::WriteDiffHashMissShared), 1);
		assert_eq!(h.cache.valid_lines(), 2);
		assert_eq!(h.cache.valid_segments(), 2);
		assert_eq!(h.cache.compressed_lines(), 2);
	}

	#[test]
	fn stale_hash_collision_rebinds_to_the_new_line() {
		let mut h = harness(options(8, 8, 4, 2));
		let p = repetitive_line(5);
		h.install(1, &p);
		// Overwrite in place: the directory entry for p now points at a
		// segment holding different bytes.
		h.write_line(1, &repetitive_line(6));
		h.access(AccessType::PutX, 1);
		assert_eq!(h.transitions(Case::WriteDiffHashMissSingle), 1);
		// A fresh line with p's payload matches the hash but not the bytes.
		h.install(2, &p);
		assert_eq!(h.transitions(Case::TagMissCollision), 1);
		// The displaced target was unshared, so the entry was rebound.
		h.install(3, &p);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		assert_eq!(h.cache.valid_lines(), 3);
	}

	#[test]
	fn unshared_write_collision_overwrites_in_place() {
		let mut h = harness(options(8, 8, 4, 2));
		let q = repetitive_line(7);
		h.install(1, &q);
		h.write_line(1, &repetitive_line(8));
		h.access(AccessType::PutX, 1);
		h.install(2, &repetitive_line(9));
		let segments = h.cache.valid_segments();
		// Writing q's bytes to line 2 collides with the stale entry for q.
		h.write_line(2, &q);
		h.access(AccessType::PutX, 2);
		assert_eq!(h.transitions(Case::WriteDiffCollisionSingle), 1);
		assert_eq!(h.cache.valid_segments(), segments);
		assert_eq!(h.cache.valid_lines(), 2);
		// The rebound entry now deduplicates fresh copies of q.
		h.install(3, &q);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
	}

	#[test]
	fn shared_write_collision_moves_the_writer() {
		let mut h = harness(options(8, 8, 4, 2));
		let q = repetitive_line(17);
		let u = repetitive_line(18);
		h.install(1, &q);
		h.write_line(1, &repetitive_line(19));
		h.access(AccessType::PutX, 1);
		h.install(2, &u);
		h.install(4, &u);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		// Line 4 shares u's group; writing q's bytes to it collides with
		// the stale entry for q.
		h.write_line(4, &q);
		h.access(AccessType::PutX, 4);
		assert_eq!(h.transitions(Case::WriteDiffCollisionShared), 1);
		assert_eq!(h.cache.valid_lines(), 3);
		assert_eq!(h.cache.compressed_lines(), 3);
	}

	#[test]
	fn dead_hash_target_is_reused_on_a_miss() {
		// Direct-mapped tags: addresses 1, 3, 5 fight over one tag line.
		let mut h = harness(options(2, 1, 4, 2));
		let p = repetitive_line(0x7777);
		h.install(1, &p);
		h.install(3, &repetitive_line(0x8888));
		assert_eq!(h.cache.cases().tag_caused_evictions, 1);
		// Address 1 is gone and its segment is dead, but the directory
		// still remembers p's hash.
		h.install(5, &p);
		assert_eq!(h.transitions(Case::TagMissHashInvalid), 1);
		assert_eq!(h.cache.valid_lines(), 1);
		assert_eq!(h.cache.valid_segments(), 1);
	}

	#[test]
	fn dead_hash_target_is_reused_on_a_write_hit() {
		let mut h = harness(options(2, 1, 4, 2));
		let p = repetitive_line(0x7777);
		h.install(1, &p);
		h.install(2, &repetitive_line(0x9999));
		// Evict address 1 through tag pressure; p's segment dies.
		h.install(3, &repetitive_line(0x8888));
		// Rewriting line 2 with p's bytes finds the dead target.
		h.write_line(2, &p);
		h.access(AccessType::PutX, 2);
		assert_eq!(h.transitions(Case::WriteDiffHashInvalid), 1);
		assert_eq!(h.cache.valid_lines(), 2);
		assert_eq!(h.cache.valid_segments(), 2);
	}

	#[test]
	fn approximate_region_dedups_near_floats() {
		let mut options = options(4, 4, 8, 2);
		options.regions = vec![Region { start: 0, end: 0xffff, data_type: DataType::Float32 }];
		let mut h = harness(options);
		// The payloads differ only in the dropped low mantissa bits.
		let mut line_a = Vec::new();
		let mut line_b = Vec::new();
		for _ in 0..16 {
			line_a.extend_from_slice(&f32::from_bits(0x4049_0fdb).to_le_bytes());
			line_b.extend_from_slice(&f32::from_bits(0x4049_0ace).to_le_bytes());
		}
		assert_ne!(line_a, line_b);
		h.install(1, &line_a);
		h.install(2, &line_b);
		assert_eq!(h.transitions(Case::TagMissDedup), 1);
		assert_eq!(h.cache.valid_lines(), 2);
		assert_eq!(h.cache.compressed_lines(), 1);
	}

	#[test]
	fn miss_timing_skeleton() {
		let mut h = harness(options(4, 4, 8, 2));
		h.write_line(1, &repetitive_line(0xfe));
		let record = h.access(AccessType::GetS, 1);
		let req_cycle = record.req_cycle;
		assert_eq!(record.resp_cycle, req_cycle + ACC_LAT + MEM_LAT);
		let graph = h.cache.recorder().graph();
		assert_eq!(graph.kind(record.start), EventKind::MissStart);
		assert_eq!(graph.min_start_cycle(record.start), req_cycle);
		assert_eq!(graph.duration(record.start), ACC_LAT);
		assert_eq!(graph.kind(record.end), EventKind::MissResponse);
		assert_eq!(graph.min_start_cycle(record.end), record.resp_cycle);
		// The upstream fetch is spliced between start and response.
		let fetch = graph.children(record.start)[0];
		assert_eq!(graph.kind(fetch), EventKind::Delay);
		assert_eq!(graph.duration(fetch), MEM_LAT);
		// The last child of the response is the writeback event.
		let children = graph.children(record.end);
		let wb = children[children.len() - 1];
		assert_eq!(graph.kind(wb), EventKind::MissWriteback);
		assert_eq!(graph.duration(wb), 2 * ACC_LAT);
		assert_eq!(graph.min_start_cycle(wb), req_cycle + 2 * ACC_LAT);
	}

	#[test]
	fn plain_hit_is_a_single_event() {
		let mut h = harness(options(4, 4, 8, 2));
		h.install(1, &repetitive_line(0xfe));
		let record = h.access(AccessType::GetS, 1);
		assert_eq!(record.start, record.end);
		let graph = h.cache.recorder().graph();
		assert_eq!(graph.kind(record.start), EventKind::Hit);
		assert_eq!(graph.duration(record.start), 2 * ACC_LAT);
		assert!(graph.children(record.start).is_empty());
	}

	#[test]
	fn mutating_hit_carries_a_writeback_event() {
		let mut h = harness(options(4, 4, 2, 1));
		h.install(1, &repetitive_line(0x6666));
		h.write_line(1, &incompressible_line(31));
		let record = h.access(AccessType::PutX, 1);
		assert_eq!(record.start, record.end);
		let graph = h.cache.recorder().graph();
		assert_eq!(graph.kind(record.start), EventKind::Hit);
		let children = graph.children(record.start);
		let wb = children[children.len() - 1];
		assert_eq!(graph.kind(wb), EventKind::HitWriteback);
		assert_eq!(graph.duration(wb), 3 * ACC_LAT);
	}

	#[test]
	fn reclamation_writebacks_fan_out_of_the_response() {
		let mut h = harness(options(8, 8, 1, 1));
		for addr in 1..=4u64 {
			h.install(addr, &repetitive_line(0x2000 + addr));
		}
		h.write_line(5, &incompressible_line(11));
		let record = h.access(AccessType::GetS, 5);
		let graph = h.cache.recorder().graph();
		// Four writeback paths plus the writeback event itself.
		let children = graph.children(record.end);
		assert_eq!(children.len(), 5);
		for fan in &children[0..4] {
			assert_eq!(graph.kind(*fan), EventKind::Delay);
		}
		let wb = children[4];
		assert_eq!(graph.kind(wb), EventKind::MissWriteback);
		// Writebacks begin two tag accesses after the response and stagger
		// by one tag access each.
		assert_eq!(graph.duration(children[0]), 2 * ACC_LAT);
		assert_eq!(graph.duration(children[1]), 3 * ACC_LAT);
		assert_eq!(graph.duration(children[2]), 4 * ACC_LAT);
	}

	struct SkippingController;

	impl CoherenceController for SkippingController {
		fn start_access(&mut self, _req: &mut MemReq) -> bool {
			true
		}

		fn should_allocate(&self, _req: &MemReq) -> bool {
			true
		}

		fn process_eviction(
			&mut self,
			_req: &MemReq,
			_wb_addr: u64,
			_victim_tag: i32,
			start_cycle: u64,
			_recorder: &mut EventRecorder,
		) -> u64 {
			start_cycle
		}

		fn process_access(
			&mut self,
			_req: &MemReq,
			_tag: i32,
			resp_cycle: u64,
			get_done_cycle: &mut u64,
			_recorder: &mut EventRecorder,
		) -> u64 {
			*get_done_cycle = resp_cycle;
			resp_cycle
		}

		fn end_access(&mut self, _req: &MemReq) {}
	}

	#[test]
	fn skipped_access_bypasses_the_body() {
		env_logger::try_init().ok();
		let opts = options(4, 4, 8, 2);
		let mem = SparseMem::new();
		let mut cache =
			DedupCache::new("l3", &opts, Box::new(SkippingController), Box::new(mem)).unwrap();
		let mut req = MemReq {
			line_addr: 1,
			kind: AccessType::GetS,
			src_id: 0,
			cycle: 50,
			state: CohState::Invalid,
		};
		let resp = cache.access(&mut req).unwrap();
		assert_eq!(resp, 50);
		assert!(!cache.recorder().has_record());
		assert_eq!(cache.valid_lines(), 0);
		cache.check_invariants().unwrap();
	}

	#[test]
	fn stats_dump_is_well_formed() {
		let mut h = harness(options(4, 4, 8, 2));
		h.install(1, &repetitive_line(1));
		h.install(2, &repetitive_line(1));
		h.access(AccessType::GetS, 1);
		h.cache.dump_stats();
	}
}
