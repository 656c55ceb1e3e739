//! Multi-hop route search over the format graph.
//!
//! Nodes are formats; an edge `u → v` exists when the live cache has at
//! least one `normal` candidate for `(u, v)`. The adjacency is built once per
//! resolution from a cache snapshot.
//!
//! ## Why level-by-level BFS with ranked frontiers?
//!
//! A plain FIFO BFS prefers whichever node happened to be enqueued first.
//! Routing through a structure-preserving format (`pdf`, `ps`, `html`)
//! should beat routing through a lossy one (`txt`) whenever both paths are
//! equally short, so each depth's frontier is expanded in priority order and
//! each node's neighbours are visited as: the target, then the priority
//! list, then everything else alphabetically.

use crate::cache::CapabilityCache;
use crate::error::DocbridgeError;
use crate::format::{Format, QualityMode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Default upper bound on the number of hops in a chain.
pub const DEFAULT_MAX_HOPS: usize = 4;

/// Default structure-preserving intermediates, most preferred first.
pub const DEFAULT_INTERMEDIATES: [&str; 3] = ["pdf", "ps", "html"];

/// One direct conversion inside a resolved chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStep {
    pub from: Format,
    pub to: Format,
    /// Top-ranked candidate at resolution time. Execution still walks the
    /// full candidate list for the hop.
    pub converter: String,
}

/// Adjacency view of a cache snapshot.
#[derive(Debug, Clone, Default)]
pub struct FormatGraph {
    adjacency: BTreeMap<Format, BTreeSet<Format>>,
    best: HashMap<(Format, Format), String>,
}

impl FormatGraph {
    pub fn from_cache(cache: &CapabilityCache) -> Self {
        let mut graph = Self::default();
        for (from, to) in cache.edges() {
            let Some(top) = cache.candidates(from, to, QualityMode::Normal).first() else {
                continue;
            };
            graph
                .adjacency
                .entry(from.clone())
                .or_default()
                .insert(to.clone());
            graph
                .best
                .insert((from.clone(), to.clone()), top.converter.clone());
        }
        graph
    }

    pub fn neighbours(&self, node: &Format) -> impl Iterator<Item = &Format> {
        self.adjacency.get(node).into_iter().flatten()
    }

    pub fn has_edge(&self, from: &Format, to: &Format) -> bool {
        self.adjacency.get(from).is_some_and(|n| n.contains(to))
    }

    pub fn edge_count(&self) -> usize {
        self.best.len()
    }
}

/// Breadth-first chain search with a configurable intermediate preference.
#[derive(Debug, Clone)]
pub struct PipelineResolver {
    priority: Vec<Format>,
    max_hops: usize,
}

impl Default for PipelineResolver {
    fn default() -> Self {
        Self {
            priority: DEFAULT_INTERMEDIATES
                .iter()
                .filter_map(|f| Format::new(f).ok())
                .collect(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl PipelineResolver {
    pub fn new(priority: Vec<Format>, max_hops: usize) -> Self {
        Self { priority, max_hops }
    }

    /// Sort key: listed intermediates by position, then the rest by name.
    fn rank<'a>(&self, f: &'a Format) -> (usize, &'a Format) {
        let pos = self
            .priority
            .iter()
            .position(|p| p == f)
            .unwrap_or(self.priority.len());
        (pos, f)
    }

    /// Find the shortest chain `from → … → to`.
    ///
    /// # Errors
    /// [`DocbridgeError::UnsupportedConversion`] when no chain of at most
    /// `max_hops` steps exists.
    pub fn resolve(
        &self,
        graph: &FormatGraph,
        from: &Format,
        to: &Format,
    ) -> Result<Vec<PipelineStep>, DocbridgeError> {
        let unsupported = || DocbridgeError::UnsupportedConversion {
            from: from.clone(),
            to: to.clone(),
        };
        if from == to {
            return Err(unsupported());
        }

        let mut parent: HashMap<Format, Format> = HashMap::new();
        let mut visited: HashSet<Format> = HashSet::from([from.clone()]);
        let mut frontier = vec![from.clone()];

        for depth in 1..=self.max_hops {
            let mut next = Vec::new();
            for node in &frontier {
                let mut neighbours: Vec<&Format> = graph.neighbours(node).collect();
                neighbours.sort_by(|a, b| (*a != to, self.rank(a)).cmp(&(*b != to, self.rank(b))));
                for n in neighbours {
                    if !visited.insert(n.clone()) {
                        continue;
                    }
                    parent.insert(n.clone(), node.clone());
                    if n == to {
                        let steps = self.unwind(graph, &parent, from, to).ok_or_else(unsupported)?;
                        debug!(%from, %to, hops = steps.len(), "Resolved conversion chain");
                        return Ok(steps);
                    }
                    next.push(n.clone());
                }
            }
            if next.is_empty() {
                break;
            }
            next.sort_by(|a, b| self.rank(a).cmp(&self.rank(b)));
            debug!(depth, frontier = next.len(), "BFS level explored");
            frontier = next;
        }

        debug!(%from, %to, max_hops = self.max_hops, "No conversion chain found");
        Err(unsupported())
    }

    fn unwind(
        &self,
        graph: &FormatGraph,
        parent: &HashMap<Format, Format>,
        from: &Format,
        to: &Format,
    ) -> Option<Vec<PipelineStep>> {
        let mut steps = Vec::new();
        let mut current = to.clone();
        while &current != from {
            let prev = parent.get(&current)?.clone();
            let converter = graph.best.get(&(prev.clone(), current.clone()))?.clone();
            steps.push(PipelineStep {
                from: prev.clone(),
                to: current,
                converter,
            });
            current = prev;
        }
        steps.reverse();
        Some(steps)
    }
}
