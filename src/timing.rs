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

// Timing-event graph.
//
// Every access emits a DAG of events that reproduces its latency under the
// enclosing hierarchy's scheduler. Nodes are immutable once created and are
// addressed by id; edges are appended through the one mutable graph handle.
// A `TimingRecord` ties a child operation's DAG fragment to its request and
// response cycles so a parent can splice it between two of its own events.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	/// Tag lookup finished, miss path begins.
	MissStart,
	/// Upstream response arrived.
	MissResponse,
	/// Read-victim-and-overwrite penalty of a miss fill.
	MissWriteback,
	/// The whole of a hit access.
	Hit,
	/// Compare, locate victim and write penalty of a mutating hit.
	HitWriteback,
	/// Pure virtual-clock advance between two events.
	Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(u32);

struct EventNode {
	kind: EventKind,
	min_start_cycle: u64,
	duration: u64,
	children: Vec<EventId>,
}

#[derive(Default)]
pub struct TimingGraph {
	nodes: Vec<EventNode>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingRecord {
	pub line_addr: u64,
	pub req_cycle: u64,
	pub resp_cycle: u64,
	pub start: EventId,
	pub end: EventId,
}

impl TimingGraph {
	pub fn event(&mut self, kind: EventKind, min_start_cycle: u64, duration: u64) -> EventId {
		let id = EventId(self.nodes.len() as u32);
		self.nodes.push(EventNode { kind, min_start_cycle, duration, children: Vec::new() });
		id
	}

	/// Append an edge and hand the child back for chaining.
	pub fn add_child(&mut self, parent: EventId, child: EventId) -> EventId {
		self.nodes[parent.0 as usize].children.push(child);
		child
	}

	pub fn kind(&self, id: EventId) -> EventKind {
		self.nodes[id.0 as usize].kind
	}

	pub fn min_start_cycle(&self, id: EventId) -> u64 {
		self.nodes[id.0 as usize].min_start_cycle
	}

	pub fn duration(&self, id: EventId) -> u64 {
		self.nodes[id.0 as usize].duration
	}

	pub fn children(&self, id: EventId) -> &[EventId] {
		&self.nodes[id.0 as usize].children
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Tie `start` and `end` together, splicing a child record's fragment in
	/// between when one exists, padding either side with delay events where
	/// the cycles do not line up.
	pub fn connect(
		&mut self,
		record: Option<&TimingRecord>,
		start: EventId,
		end: EventId,
		start_cycle: u64,
		end_cycle: u64,
	) {
		debug_assert!(start_cycle <= end_cycle, "start > end? {} {}", start_cycle, end_cycle);
		match record {
			Some(r) => {
				debug_assert!(start_cycle <= r.req_cycle, "{} / {}", start_cycle, r.req_cycle);
				debug_assert!(r.resp_cycle <= end_cycle, "{} {} {} {}", start_cycle, r.req_cycle, r.resp_cycle, end_cycle);
				let up_lat = r.req_cycle - start_cycle;
				let down_lat = end_cycle - r.resp_cycle;
				if up_lat != 0 {
					let up = self.event(EventKind::Delay, start_cycle, up_lat);
					self.add_child(start, up);
					self.add_child(up, r.start);
				} else {
					self.add_child(start, r.start);
				}
				if down_lat != 0 {
					let down = self.event(EventKind::Delay, r.resp_cycle, down_lat);
					self.add_child(r.end, down);
					self.add_child(down, end);
				} else {
					self.add_child(r.end, end);
				}
			}
			None => {
				if start_cycle == end_cycle {
					self.add_child(start, end);
				} else {
					let delay = self.event(EventKind::Delay, start_cycle, end_cycle - start_cycle);
					self.add_child(start, delay);
					self.add_child(delay, end);
				}
			}
		}
	}
}

/// Per-source record queue. Collaborators push one record per operation and
/// the engine drains explicitly at each operation boundary; records are
/// never silently overwritten.
#[derive(Default)]
pub struct EventRecorder {
	graph: TimingGraph,
	records: VecDeque<TimingRecord>,
}

impl EventRecorder {
	pub fn graph(&self) -> &TimingGraph {
		&self.graph
	}

	pub fn graph_mut(&mut self) -> &mut TimingGraph {
		&mut self.graph
	}

	pub fn push_record(&mut self, record: TimingRecord) {
		self.records.push_back(record);
	}

	pub fn take_record(&mut self) -> Option<TimingRecord> {
		self.records.pop_front()
	}

	pub fn has_record(&self) -> bool {
		!self.records.is_empty()
	}

	pub fn pending_records(&self) -> usize {
		self.records.len()
	}
}

#[cfg(test)]
mod test {
	use super::{EventKind, EventRecorder, TimingGraph, TimingRecord};

	#[test]
	fn connect_without_record_pads_with_a_delay() {
		let mut graph = TimingGraph::default();
		let start = graph.event(EventKind::MissStart, 100, 9);
		let end = graph.event(EventKind::MissResponse, 150, 0);
		graph.connect(None, start, end, 100, 150);
		assert_eq!(graph.len(), 3);
		let delay = graph.children(start)[0];
		assert_eq!(graph.kind(delay), EventKind::Delay);
		assert_eq!(graph.duration(delay), 50);
		assert_eq!(graph.children(delay), &[end]);
	}

	#[test]
	fn connect_with_equal_cycles_is_a_direct_edge() {
		let mut graph = TimingGraph::default();
		let start = graph.event(EventKind::Hit, 10, 5);
		let end = graph.event(EventKind::HitWriteback, 10, 27);
		graph.connect(None, start, end, 42, 42);
		assert_eq!(graph.len(), 2);
		assert_eq!(graph.children(start), &[end]);
	}

	#[test]
	fn connect_splices_a_child_record() {
		let mut graph = TimingGraph::default();
		let start = graph.event(EventKind::MissStart, 100, 9);
		let end = graph.event(EventKind::MissResponse, 200, 0);
		let child_start = graph.event(EventKind::Delay, 110, 80);
		let child_end = child_start;
		let record = TimingRecord {
			line_addr: 0x40,
			req_cycle: 110,
			resp_cycle: 190,
			start: child_start,
			end: child_end,
		};
		graph.connect(Some(&record), start, end, 100, 200);
		// One delay up (10 cycles), one delay down (10 cycles).
		assert_eq!(graph.len(), 5);
		let up = graph.children(start)[0];
		assert_eq!(graph.kind(up), EventKind::Delay);
		assert_eq!(graph.duration(up), 10);
		assert_eq!(graph.children(up), &[child_start]);
		let down = graph.children(child_end)[0];
		assert_eq!(graph.kind(down), EventKind::Delay);
		assert_eq!(graph.duration(down), 10);
		assert_eq!(graph.children(down), &[end]);
	}

	#[test]
	fn recorder_never_overwrites_records() {
		let mut recorder = EventRecorder::default();
		for i in 0..8 {
			let id = recorder.graph_mut().event(EventKind::Delay, i, 0);
			recorder.push_record(TimingRecord { line_addr: i, req_cycle: i, resp_cycle: i, start: id, end: id });
		}
		assert_eq!(recorder.pending_records(), 8);
		for i in 0..8 {
			let record = recorder.take_record().unwrap();
			assert_eq!(record.req_cycle, i);
		}
		assert!(!recorder.has_record());
	}
}
