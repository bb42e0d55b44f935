//! Resource graph and routing
//!
//! Typed resource nodes connected by undirected, bandwidth-weighted links.
//! Routing minimizes the sum of `1/bandwidth` hop costs (a wider link is a
//! cheaper hop), with ties broken toward lower device ids. The graph is
//! assembled at engine construction and immutable once the scheduler owns
//! it, so reads need no locking.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::resource::{Resource, ResourceKind};
use super::task::TaskKind;

/// Edge cost scale: cost = COST_SCALE / bandwidth, in integer units.
const COST_SCALE: u64 = 1_000_000;

pub struct ResourceGraph {
    resources: Vec<Arc<Resource>>,
    by_name: FxHashMap<String, usize>,
    /// Adjacency: resource index -> (neighbor index, bandwidth).
    edges: Vec<Vec<(usize, u32)>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            by_name: FxHashMap::default(),
            edges: Vec::new(),
        }
    }

    pub fn add(&mut self, resource: Resource) -> Result<Arc<Resource>> {
        if self.by_name.contains_key(&resource.name) {
            return Err(Error::Config(format!(
                "duplicate resource name {:?}",
                resource.name
            )));
        }
        let index = self.resources.len();
        let resource = Arc::new(resource);
        self.by_name.insert(resource.name.clone(), index);
        self.resources.push(Arc::clone(&resource));
        self.edges.push(Vec::new());
        Ok(resource)
    }

    /// Undirected link with a positive bandwidth weight.
    pub fn connect(&mut self, a: &str, b: &str, bandwidth: u32) -> Result<()> {
        if bandwidth == 0 {
            return Err(Error::Config("connection bandwidth must be positive".into()));
        }
        if a == b {
            return Err(Error::Config("cannot connect a resource to itself".into()));
        }
        let ia = *self
            .by_name
            .get(a)
            .ok_or_else(|| Error::Config(format!("unknown resource {:?}", a)))?;
        let ib = *self
            .by_name
            .get(b)
            .ok_or_else(|| Error::Config(format!("unknown resource {:?}", b)))?;
        if self.edges[ia].iter().any(|&(n, _)| n == ib) {
            return Err(Error::Config(format!(
                "resources {:?} and {:?} are already connected",
                a, b
            )));
        }
        self.edges[ia].push((ib, bandwidth));
        self.edges[ib].push((ia, bandwidth));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    pub fn resources_of_kind(&self, kind: ResourceKind) -> Vec<Arc<Resource>> {
        self.resources
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn has_kind(&self, kind: ResourceKind) -> bool {
        self.resources.iter().any(|r| r.kind == kind)
    }

    /// Topology invariants: exactly one disk, at least one cpu.
    pub fn validate(&self) -> Result<()> {
        let disks = self
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Disk)
            .count();
        if disks != 1 {
            return Err(Error::Config(format!(
                "resource graph needs exactly one disk resource, found {}",
                disks
            )));
        }
        if !self.has_kind(ResourceKind::Cpu) {
            return Err(Error::Config(
                "resource graph needs at least one cpu resource".into(),
            ));
        }
        Ok(())
    }

    /// Dijkstra over inverse-bandwidth costs. Returns the resource names
    /// from `from` to `to` inclusive, or `None` when unreachable.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let start = *self.by_name.get(from)?;
        let goal = *self.by_name.get(to)?;
        if start == goal {
            return Some(vec![from.to_string()]);
        }

        let n = self.resources.len();
        let mut dist = vec![u64::MAX; n];
        let mut prev = vec![usize::MAX; n];
        let mut visited = vec![false; n];
        dist[start] = 0;

        // the graph is a handful of nodes; a quadratic scan keeps the
        // tie-breaking (device id, then name) explicit
        loop {
            let mut current = None;
            for i in 0..n {
                if visited[i] || dist[i] == u64::MAX {
                    continue;
                }
                current = match current {
                    None => Some(i),
                    Some(best) => {
                        let lhs = (dist[i], self.resources[i].device_id, &self.resources[i].name);
                        let rhs = (
                            dist[best],
                            self.resources[best].device_id,
                            &self.resources[best].name,
                        );
                        if lhs < rhs { Some(i) } else { Some(best) }
                    }
                };
            }
            let current = current?;
            if current == goal {
                break;
            }
            visited[current] = true;
            for &(neighbor, bandwidth) in &self.edges[current] {
                let cost = dist[current].saturating_add(COST_SCALE / bandwidth as u64);
                if cost < dist[neighbor] {
                    dist[neighbor] = cost;
                    prev[neighbor] = current;
                }
            }
        }

        let mut path = vec![goal];
        let mut node = goal;
        while node != start {
            node = prev[node];
            if node == usize::MAX {
                return None;
            }
            path.push(node);
        }
        path.reverse();
        Some(
            path.into_iter()
                .map(|i| self.resources[i].name.clone())
                .collect(),
        )
    }
}

impl Default for ResourceGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Placement policy on top of the graph: picks a destination resource for
/// a task's requirement and the route to it.
pub struct PathOptimizer {
    graph: Arc<ResourceGraph>,
    gpu_search_pool: Vec<i64>,
    gpu_build_pool: Vec<i64>,
}

impl PathOptimizer {
    pub fn new(graph: Arc<ResourceGraph>, gpu_search_pool: Vec<i64>, gpu_build_pool: Vec<i64>) -> Self {
        Self {
            graph,
            gpu_search_pool,
            gpu_build_pool,
        }
    }

    pub fn has_search_gpus(&self) -> bool {
        !self.gpu_search_pool.is_empty() && self.graph.has_kind(ResourceKind::Gpu)
    }

    pub fn has_build_gpus(&self) -> bool {
        !self.gpu_build_pool.is_empty() && self.graph.has_kind(ResourceKind::Gpu)
    }

    /// Route from `entry` to a resource of `required` kind. GPU targets
    /// come from the task-kind's pool, least-loaded first, ties to the
    /// lowest device id.
    pub fn route(
        &self,
        entry: &str,
        required: ResourceKind,
        task_kind: TaskKind,
    ) -> Result<Vec<String>> {
        let entry_resource = self
            .graph
            .get(entry)
            .ok_or_else(|| Error::Unexpected(format!("unknown entry resource {:?}", entry)))?;
        if entry_resource.kind == required {
            return Ok(vec![entry.to_string()]);
        }

        let candidates: Vec<Arc<Resource>> = match required {
            ResourceKind::Gpu => {
                let pool = match task_kind {
                    TaskKind::Build => &self.gpu_build_pool,
                    _ => &self.gpu_search_pool,
                };
                self.graph
                    .resources_of_kind(ResourceKind::Gpu)
                    .into_iter()
                    .filter(|r| pool.is_empty() || pool.contains(&r.device_id))
                    .collect()
            }
            kind => self.graph.resources_of_kind(kind),
        };
        if candidates.is_empty() {
            return Err(Error::ResourceUnavailable(required.as_str()));
        }

        let target = candidates
            .iter()
            .min_by_key(|r| (r.load(), r.device_id, r.name.clone()))
            .expect("candidates is non-empty");

        self.graph
            .shortest_path(entry, &target.name)
            .ok_or_else(|| Error::ResourceUnavailable(required.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add(Resource::new("disk", ResourceKind::Disk, 0, true, false))
            .unwrap();
        graph
            .add(Resource::new("cpu", ResourceKind::Cpu, 0, true, true))
            .unwrap();
        graph
            .add(Resource::new("gpu0", ResourceKind::Gpu, 0, true, true))
            .unwrap();
        graph
            .add(Resource::new("gpu1", ResourceKind::Gpu, 1, true, true))
            .unwrap();
        graph.connect("disk", "cpu", 500).unwrap();
        graph.connect("cpu", "gpu0", 12_000).unwrap();
        graph.connect("cpu", "gpu1", 12_000).unwrap();
        graph
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut graph = simple_graph();
        let err = graph
            .add(Resource::new("cpu", ResourceKind::Cpu, 1, true, true))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_connect_validation() {
        let mut graph = simple_graph();
        assert!(graph.connect("cpu", "nope", 10).is_err());
        assert!(graph.connect("cpu", "gpu0", 10).is_err()); // already connected
        assert!(graph.connect("disk", "gpu0", 0).is_err()); // zero bandwidth
        assert!(graph.connect("cpu", "cpu", 10).is_err());
    }

    #[test]
    fn test_validate_topology() {
        assert!(simple_graph().validate().is_ok());

        let mut graph = ResourceGraph::new();
        graph
            .add(Resource::new("cpu", ResourceKind::Cpu, 0, true, true))
            .unwrap();
        assert!(graph.validate().is_err()); // no disk

        let mut graph = ResourceGraph::new();
        graph
            .add(Resource::new("disk", ResourceKind::Disk, 0, true, false))
            .unwrap();
        graph
            .add(Resource::new("disk2", ResourceKind::Disk, 1, true, false))
            .unwrap();
        assert!(graph.validate().is_err()); // two disks
    }

    #[test]
    fn test_shortest_path_prefers_wide_links() {
        let mut graph = ResourceGraph::new();
        for (name, kind, id) in [
            ("disk", ResourceKind::Disk, 0),
            ("cpu", ResourceKind::Cpu, 0),
            ("gpu0", ResourceKind::Gpu, 0),
        ] {
            graph.add(Resource::new(name, kind, id, true, true)).unwrap();
        }
        // a direct narrow link and a wide two-hop route
        graph.connect("disk", "gpu0", 1).unwrap();
        graph.connect("disk", "cpu", 500).unwrap();
        graph.connect("cpu", "gpu0", 12_000).unwrap();

        let path = graph.shortest_path("disk", "gpu0").unwrap();
        // direct cost 1e6/1; via cpu: 1e6/500 + 1e6/12000 ≈ 2083
        assert_eq!(path, vec!["disk", "cpu", "gpu0"]);
    }

    #[test]
    fn test_shortest_path_unreachable() {
        let mut graph = ResourceGraph::new();
        graph
            .add(Resource::new("cpu", ResourceKind::Cpu, 0, true, true))
            .unwrap();
        graph
            .add(Resource::new("island", ResourceKind::Gpu, 0, true, true))
            .unwrap();
        assert!(graph.shortest_path("cpu", "island").is_none());
        assert_eq!(
            graph.shortest_path("cpu", "cpu").unwrap(),
            vec!["cpu".to_string()]
        );
    }

    #[test]
    fn test_optimizer_gpu_pools() {
        let graph = Arc::new(simple_graph());
        // search pool only device 1, build pool only device 0
        let optimizer = PathOptimizer::new(Arc::clone(&graph), vec![1], vec![0]);

        let path = optimizer
            .route("cpu", ResourceKind::Gpu, TaskKind::Search)
            .unwrap();
        assert_eq!(path, vec!["cpu", "gpu1"]);

        let path = optimizer
            .route("cpu", ResourceKind::Gpu, TaskKind::Build)
            .unwrap();
        assert_eq!(path, vec!["cpu", "gpu0"]);
    }

    #[test]
    fn test_optimizer_least_loaded_tie_by_device_id() {
        let graph = Arc::new(simple_graph());
        let optimizer = PathOptimizer::new(Arc::clone(&graph), vec![0, 1], vec![]);

        // equal load: lowest device id wins
        let path = optimizer
            .route("cpu", ResourceKind::Gpu, TaskKind::Search)
            .unwrap();
        assert_eq!(path, vec!["cpu", "gpu0"]);

        // load gpu0 so gpu1 becomes the preferred target
        graph
            .get("gpu0")
            .unwrap()
            .push(crate::sched::task::test_support::noop_task(1));
        let path = optimizer
            .route("cpu", ResourceKind::Gpu, TaskKind::Search)
            .unwrap();
        assert_eq!(path, vec!["cpu", "gpu1"]);
    }

    #[test]
    fn test_optimizer_same_kind_entry() {
        let graph = Arc::new(simple_graph());
        let optimizer = PathOptimizer::new(graph, vec![], vec![]);
        let path = optimizer
            .route("cpu", ResourceKind::Cpu, TaskKind::Retrieve)
            .unwrap();
        assert_eq!(path, vec!["cpu"]);
    }

    #[test]
    fn test_optimizer_missing_kind() {
        let mut graph = ResourceGraph::new();
        graph
            .add(Resource::new("disk", ResourceKind::Disk, 0, true, false))
            .unwrap();
        graph
            .add(Resource::new("cpu", ResourceKind::Cpu, 0, true, true))
            .unwrap();
        graph.connect("disk", "cpu", 500).unwrap();
        let optimizer = PathOptimizer::new(Arc::new(graph), vec![], vec![]);
        let err = optimizer
            .route("cpu", ResourceKind::Gpu, TaskKind::Search)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceUnavailable("gpu")));
    }
}
