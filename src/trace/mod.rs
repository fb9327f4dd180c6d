//! Per-request execution traces.
//!
//! Every routing decision, model call, tool call, delegation and terminal
//! outcome of a top-level request is appended to that request's trace. Events
//! get a monotonically increasing `sequence` on append; subscribers receive
//! each event right after it is stored.
//!
//! A tracer built [`Tracer::with_retention`] keeps only the most recently
//! started traces; older ones are evicted oldest-first.

mod graph;
mod types;

pub use graph::{EdgeKind, TraceEdge, TraceGraph, TraceNode};
pub use types::{ToolCallRecord, TraceAction, TraceEvent, TraceScope};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::util::truncate;

/// Maximum characters kept in an event's payload summary.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Append callback for trace consumers (logging, metrics, UI).
pub type TraceSink = Arc<dyn Fn(&TraceEvent) + Send + Sync>;

/// Handle returned by [`Tracer::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Stores traces keyed by trace id.
#[derive(Default)]
pub struct Tracer {
    traces: DashMap<String, Vec<TraceEvent>>,
    /// Trace ids in the order their first event arrived
    order: Mutex<VecDeque<String>>,
    retention: Option<usize>,
    sinks: DashMap<u64, TraceSink>,
    next_sink: AtomicU64,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer that also logs every event through `tracing`.
    pub fn with_logging() -> Self {
        let tracer = Self::new();
        tracer.subscribe(Arc::new(log_event));
        tracer
    }

    /// Keep at most `max_traces` traces (at least one).
    pub fn with_retention(mut self, max_traces: usize) -> Self {
        self.retention = Some(max_traces.max(1));
        self
    }

    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    /// Number of traces currently held.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn subscribe(&self, sink: TraceSink) -> SinkId {
        let id = self.next_sink.fetch_add(1, Ordering::Relaxed);
        self.sinks.insert(id, sink);
        SinkId(id)
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.sinks.remove(&id.0).is_some()
    }

    /// Record the `Start` event of a request.
    pub fn start(&self, trace_id: &str, agent_name: &str, input: &str) -> u64 {
        self.record(TraceEvent::new(
            trace_id,
            agent_name,
            TraceAction::Start,
            truncate(input, SUMMARY_MAX_CHARS),
        ))
    }

    /// Append an event, assigning its sequence number. Returns the sequence.
    pub fn record(&self, mut event: TraceEvent) -> u64 {
        event.payload_summary = truncate(&event.payload_summary, SUMMARY_MAX_CHARS);
        let trace_id = event.trace_id.clone();
        let (stored, is_new) = {
            let mut trace = self.traces.entry(trace_id.clone()).or_default();
            let is_new = trace.is_empty();
            event.sequence = trace.len() as u64;
            trace.push(event.clone());
            (event, is_new)
        };

        // The entry guard is released before touching other shards.
        if is_new {
            self.track(trace_id);
        }

        // Sinks run outside the trace lock so they may read the trace.
        let sinks: Vec<TraceSink> = self.sinks.iter().map(|s| Arc::clone(s.value())).collect();
        for sink in sinks {
            sink(&stored);
        }
        stored.sequence
    }

    /// Remember a newly started trace and evict the oldest past the retention bound.
    fn track(&self, trace_id: String) {
        let Some(max) = self.retention else {
            return;
        };
        let evicted: Vec<String> = {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            order.push_back(trace_id);
            let excess = order.len().saturating_sub(max);
            order.drain(..excess).collect()
        };
        for id in evicted {
            if self.traces.remove(&id).is_some() {
                tracing::debug!(trace_id = %id, "Evicted trace past retention");
            }
        }
    }

    /// Record the `Complete` event of a request.
    pub fn complete(&self, trace_id: &str, agent_name: &str, output: &str, duration_ms: u64) -> u64 {
        self.record(
            TraceEvent::new(trace_id, agent_name, TraceAction::Complete, output)
                .with_duration(duration_ms),
        )
    }

    /// Record the `Fail` event of a request.
    pub fn fail(&self, trace_id: &str, agent_name: &str, error: &str, duration_ms: u64) -> u64 {
        self.record(
            TraceEvent::new(trace_id, agent_name, TraceAction::Fail, error)
                .with_duration(duration_ms),
        )
    }

    /// Events for `trace_id` in append order (empty if unknown).
    pub fn get_trace(&self, trace_id: &str) -> Vec<TraceEvent> {
        self.traces
            .get(trace_id)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }

    /// Derive the execution graph of a trace.
    pub fn visualize(&self, trace_id: &str) -> TraceGraph {
        TraceGraph::from_events(&self.get_trace(trace_id))
    }

    /// Deepest delegation level recorded in a trace.
    pub fn max_depth(&self, trace_id: &str) -> usize {
        self.traces
            .get(trace_id)
            .and_then(|t| t.iter().map(|e| e.depth).max())
            .unwrap_or(0)
    }

    /// Drop a finished trace. Returns whether it existed.
    pub fn clear(&self, trace_id: &str) -> bool {
        if self.retention.is_some() {
            self.order
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|id| id != trace_id);
        }
        self.traces.remove(trace_id).is_some()
    }
}

fn log_event(event: &TraceEvent) {
    match event.action {
        TraceAction::Fail => tracing::warn!(
            trace_id = %event.trace_id,
            agent = %event.agent_name,
            depth = event.depth,
            "{}: {}",
            event.action,
            event.payload_summary
        ),
        _ => tracing::debug!(
            trace_id = %event.trace_id,
            agent = %event.agent_name,
            depth = event.depth,
            duration_ms = event.duration_ms,
            "{}: {}",
            event.action,
            event.payload_summary
        ),
    }
}
