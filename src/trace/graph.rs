//! Execution graph derived from a trace.
//!
//! Nodes are trace events; edges follow the control flow of each agent
//! lineage. A run of consecutive `ToolCall` events at one depth is a parallel
//! batch: every call hangs off the event before the batch and the event after
//! the batch joins all of them.

use serde::{Deserialize, Serialize};

use super::{TraceAction, TraceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Next step of the same lineage
    Sequence,
    /// Parent hands control to a child agent
    Delegate,
    /// Child hands control back to its parent
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    /// Sequence number of the event
    pub id: u64,
    pub agent_name: String,
    pub action: TraceAction,
    pub depth: usize,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEdge {
    pub from: u64,
    pub to: u64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceGraph {
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
}

/// Control-flow frontier of one delegation level.
#[derive(Default)]
struct Frame {
    frontier: Vec<u64>,
    in_batch: bool,
}

impl TraceGraph {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let mut graph = TraceGraph::default();
        let mut frames: Vec<Frame> = Vec::new();

        for event in events {
            let id = event.sequence;
            graph.nodes.push(TraceNode {
                id,
                agent_name: event.agent_name.clone(),
                action: event.action,
                depth: event.depth,
                label: event.payload_summary.clone(),
            });

            let depth = event.depth;
            if frames.is_empty() {
                frames.push(Frame::default());
            }

            // Entering a child lineage.
            while frames.len() <= depth {
                let from = frames
                    .last()
                    .map(|f| f.frontier.clone())
                    .unwrap_or_default();
                for f in from {
                    graph.edge(f, id, EdgeKind::Delegate);
                }
                frames.push(Frame::default());
            }

            // Returning from deeper lineages: control flows back through
            // every level in between.
            let mut returning: Option<Vec<u64>> = None;
            while frames.len() > depth + 1 {
                if let Some(frame) = frames.pop() {
                    let carried = returning.take().unwrap_or(frame.frontier);
                    returning = Some(carried);
                }
            }

            let Some(frame) = frames.last_mut() else {
                continue;
            };

            if let Some(sources) = returning {
                for from in sources {
                    graph.edge(from, id, EdgeKind::Return);
                }
                frame.frontier = vec![id];
                frame.in_batch = event.action == TraceAction::ToolCall;
                continue;
            }

            let is_tool = event.action == TraceAction::ToolCall;
            if is_tool && frame.in_batch {
                // Sibling in a parallel batch: same anchor as the first member.
                let anchors: Vec<u64> = graph
                    .edges
                    .iter()
                    .filter(|e| frame.frontier.first() == Some(&e.to))
                    .map(|e| e.from)
                    .collect();
                for from in anchors {
                    graph.edge(from, id, EdgeKind::Sequence);
                }
                frame.frontier.push(id);
            } else {
                for from in std::mem::take(&mut frame.frontier) {
                    graph.edge(from, id, EdgeKind::Sequence);
                }
                frame.frontier = vec![id];
                frame.in_batch = is_tool;
            }
        }

        graph
    }

    fn edge(&mut self, from: u64, to: u64, kind: EdgeKind) {
        self.edges.push(TraceEdge { from, to, kind });
    }

    pub fn node(&self, id: u64) -> Option<&TraceNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn successors(&self, id: u64) -> Vec<u64> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to)
            .collect()
    }

    pub fn predecessors(&self, id: u64) -> Vec<u64> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from)
            .collect()
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &TraceEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(seq: u64, agent: &str, action: TraceAction, depth: usize) -> TraceEvent {
        let mut e = TraceEvent::new("t", agent, action, format!("{action}"));
        e.sequence = seq;
        e.depth = depth;
        e
    }

    #[test]
    fn test_linear_trace() {
        let events = vec![
            ev(0, "orchestrator", TraceAction::Start, 0),
            ev(1, "writer", TraceAction::ModelCall, 0),
            ev(2, "orchestrator", TraceAction::Complete, 0),
        ];
        let graph = TraceGraph::from_events(&events);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.successors(0), vec![1]);
        assert_eq!(graph.successors(1), vec![2]);
        assert!(graph.edges.iter().all(|e| e.kind == EdgeKind::Sequence));
    }

    #[test]
    fn test_parallel_tool_batch_fans_out_and_joins() {
        let events = vec![
            ev(0, "orchestrator", TraceAction::Start, 0),
            ev(1, "a", TraceAction::ModelCall, 0),
            ev(2, "a", TraceAction::ToolCall, 0),
            ev(3, "a", TraceAction::ToolCall, 0),
            ev(4, "a", TraceAction::ModelCall, 0),
            ev(5, "orchestrator", TraceAction::Complete, 0),
        ];
        let graph = TraceGraph::from_events(&events);
        assert_eq!(graph.successors(1), vec![2, 3]);
        let mut joins = graph.predecessors(4);
        joins.sort();
        assert_eq!(joins, vec![2, 3]);
        assert!(graph.successors(2).iter().all(|s| *s == 4));
    }

    #[test]
    fn test_delegation_links_child_and_returns() {
        let events = vec![
            ev(0, "orchestrator", TraceAction::Start, 0),
            ev(1, "lead", TraceAction::ModelCall, 0),
            ev(2, "lead", TraceAction::Delegate, 0),
            ev(3, "researcher", TraceAction::ModelCall, 1),
            ev(4, "researcher", TraceAction::ModelCall, 1),
            ev(5, "orchestrator", TraceAction::Complete, 0),
        ];
        let graph = TraceGraph::from_events(&events);

        let delegate: Vec<&TraceEdge> = graph.edges_of_kind(EdgeKind::Delegate).collect();
        assert_eq!(delegate.len(), 1);
        assert_eq!((delegate[0].from, delegate[0].to), (2, 3));

        assert_eq!(graph.successors(3), vec![4]);

        let returns: Vec<&TraceEdge> = graph.edges_of_kind(EdgeKind::Return).collect();
        assert_eq!(returns.len(), 1);
        assert_eq!((returns[0].from, returns[0].to), (4, 5));
        // The delegate node flows only into the child.
        assert_eq!(graph.successors(2), vec![3]);
    }

    #[test]
    fn test_nested_return_skips_intermediate_delegate() {
        let events = vec![
            ev(0, "orchestrator", TraceAction::Start, 0),
            ev(1, "a", TraceAction::Delegate, 0),
            ev(2, "b", TraceAction::Delegate, 1),
            ev(3, "c", TraceAction::ModelCall, 2),
            ev(4, "orchestrator", TraceAction::Complete, 0),
        ];
        let graph = TraceGraph::from_events(&events);
        assert_eq!(graph.successors(1), vec![2]);
        assert_eq!(graph.successors(2), vec![3]);
        assert_eq!(graph.predecessors(4), vec![3]);
    }
}
