//! # Sysfs Topology
//!
//! Reads node topology from sysfs on Linux:
//! 1. `nodeN` directories for enumeration
//! 2. `nodeN/cpulist` for the CPU to node mapping
//! 3. `nodeN/distance` for the distance matrix
//!
//! Every query goes back to the filesystem, so a prober always reflects the
//! state at call time. On other platforms the root does not exist and the
//! prober reports [`Availability::Unavailable`].

use std::fs;
use std::path::{Path, PathBuf};

use super::{Availability, NodeId, TopologyProber, LOCAL_DISTANCE, REMOTE_DISTANCE};

/// Default location of the node directory tree.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/devices/system/node";

/// Topology prober backed by the sysfs node tree.
#[derive(Debug, Clone)]
pub struct SysfsTopology {
    /// Directory holding the `nodeN` entries
    root: PathBuf,
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsTopology {
    /// Prober rooted at `/sys/devices/system/node`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(DEFAULT_SYSFS_ROOT)
    }

    /// Prober rooted at an arbitrary directory laid out like the sysfs node tree.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory this prober reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_dir(&self, node: NodeId) -> PathBuf {
        self.root.join(format!("node{node}"))
    }

    /// Returns the CPUs belonging to a specific node.
    ///
    /// Returns an empty vector if the node has no readable `cpulist`.
    #[must_use]
    pub fn cpus_for_node(&self, node: NodeId) -> Vec<usize> {
        fs::read_to_string(self.node_dir(node).join("cpulist"))
            .map(|s| parse_cpulist(s.trim()))
            .unwrap_or_default()
    }

    /// Returns the node a CPU belongs to, if any node lists it.
    #[must_use]
    pub fn node_for_cpu(&self, cpu: usize) -> Option<NodeId> {
        self.nodes()
            .into_iter()
            .find(|node| self.cpus_for_node(*node).contains(&cpu))
    }

    /// Returns the current CPU ID, if the platform reports it.
    #[must_use]
    pub fn current_cpu() -> Option<usize> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: sched_getcpu takes no arguments and only reads scheduler state
            let cpu = unsafe { libc::sched_getcpu() };
            if let Ok(cpu) = usize::try_from(cpu) {
                return Some(cpu);
            }
        }

        None
    }

    /// Reads one row of the distance matrix.
    fn distance_row(&self, from: NodeId) -> Option<Vec<u32>> {
        let content = fs::read_to_string(self.node_dir(from).join("distance")).ok()?;
        let row: Vec<u32> = content
            .split_whitespace()
            .filter_map(|d| d.parse().ok())
            .collect();
        (!row.is_empty()).then_some(row)
    }

    /// Log the detected topology for debugging.
    pub fn log_topology(&self) {
        let nodes = self.nodes();
        tracing::info!(
            "Topology at {}: {} ({} nodes)",
            self.root.display(),
            self.availability(),
            nodes.len()
        );
        for node in nodes {
            let cpus = self.cpus_for_node(node);
            tracing::info!(
                "  Node {}: {} CPUs, distances {:?}",
                node,
                cpus.len(),
                self.distance_row(node).unwrap_or_default()
            );
        }
    }

    /// Get a summary string of the topology.
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let nodes = self.nodes();
        let mut s = format!("Topology: {}, {} nodes", self.availability(), nodes.len());
        for node in nodes {
            let _ = write!(s, "\n  Node {}: {} CPUs", node, self.cpus_for_node(node).len());
        }
        s
    }
}

impl TopologyProber for SysfsTopology {
    fn availability(&self) -> Availability {
        if !self.root.is_dir() {
            Availability::Unavailable
        } else if self.nodes().is_empty() {
            Availability::Degraded
        } else {
            Availability::Available
        }
    }

    fn max_node_index(&self) -> Option<NodeId> {
        self.nodes().last().copied()
    }

    fn nodes(&self) -> Vec<NodeId> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut nodes: Vec<NodeId> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("node"))
                    .and_then(|id| id.parse::<NodeId>().ok())
            })
            .collect();
        nodes.sort_unstable();
        nodes
    }

    fn node_of_caller(&self) -> Option<NodeId> {
        Self::current_cpu().and_then(|cpu| self.node_for_cpu(cpu))
    }

    fn distance(&self, from: NodeId, to: NodeId) -> u32 {
        // Columns follow the order of present nodes, not node ids
        let column = self.nodes().binary_search(&to).ok();
        if let Some(d) = column
            .and_then(|i| self.distance_row(from).and_then(|row| row.get(i).copied()))
        {
            return d;
        }
        if from == to {
            LOCAL_DISTANCE
        } else {
            REMOTE_DISTANCE
        }
    }
}

/// Parse a CPU list string like "0-7,16-23".
fn parse_cpulist(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }

    cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_node(root: &Path, node: NodeId, cpulist: &str, distance: &str) {
        let dir = root.join(format!("node{node}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpulist"), cpulist).unwrap();
        fs::write(dir.join("distance"), distance).unwrap();
    }

    #[test]
    fn test_parse_cpulist() {
        assert_eq!(parse_cpulist("0"), vec![0]);
        assert_eq!(parse_cpulist("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpulist("0,2,4"), vec![0, 2, 4]);
        assert_eq!(parse_cpulist("0-1,8-9"), vec![0, 1, 8, 9]);
        assert!(parse_cpulist("").is_empty());
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let dir = tempdir().unwrap();
        let topo = SysfsTopology::with_root(dir.path().join("absent"));
        assert_eq!(topo.availability(), Availability::Unavailable);
        assert_eq!(topo.max_node_index(), None);
        assert!(topo.nodes().is_empty());
    }

    #[test]
    fn test_empty_root_is_degraded() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("power")).unwrap();
        fs::write(dir.path().join("possible"), "0").unwrap();

        let topo = SysfsTopology::with_root(dir.path());
        assert_eq!(topo.availability(), Availability::Degraded);
        assert!(!topo.topology_available());
    }

    #[test]
    fn test_fake_two_node_tree() {
        let dir = tempdir().unwrap();
        write_node(dir.path(), 0, "0-3\n", "10 21\n");
        write_node(dir.path(), 1, "4-7\n", "21 10\n");

        let topo = SysfsTopology::with_root(dir.path());
        assert_eq!(topo.availability(), Availability::Available);
        assert_eq!(topo.nodes(), vec![0, 1]);
        assert_eq!(topo.max_node_index(), Some(1));
        assert_eq!(topo.distance(0, 1), 21);
        assert_eq!(topo.distance(1, 1), 10);
        assert_eq!(topo.node_for_cpu(5), Some(1));
        assert_eq!(topo.node_for_cpu(99), None);
        assert_eq!(topo.cpus_for_node(0), vec![0, 1, 2, 3]);
        assert!(topo.summary().contains("2 nodes"));
    }

    #[test]
    fn test_distance_fallback_without_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node0")).unwrap();
        fs::create_dir_all(dir.path().join("node2")).unwrap();

        let topo = SysfsTopology::with_root(dir.path());
        assert_eq!(topo.nodes(), vec![0, 2]);
        assert_eq!(topo.max_node_index(), Some(2));
        assert_eq!(topo.distance(0, 0), LOCAL_DISTANCE);
        assert_eq!(topo.distance(0, 2), REMOTE_DISTANCE);
    }

    #[test]
    fn test_sparse_node_ids_index_by_position() {
        let dir = tempdir().unwrap();
        write_node(dir.path(), 0, "0-1\n", "10 40 20\n");
        write_node(dir.path(), 2, "2-3\n", "40 10 40\n");
        write_node(dir.path(), 3, "4-5\n", "20 40 10\n");

        let topo = SysfsTopology::with_root(dir.path());
        assert_eq!(topo.nodes(), vec![0, 2, 3]);
        assert_eq!(topo.distance(0, 2), 40);
        assert_eq!(topo.distance(0, 3), 20);
        assert_eq!(topo.distance(2, 2), 10);
        assert_eq!(topo.distance(3, 2), 40);
        // Absent node falls back to the constants
        assert_eq!(topo.distance(0, 1), REMOTE_DISTANCE);

        let ranking = crate::NodeRanking::build(&topo, 0);
        assert_eq!(ranking.as_slice(), &[0, 3, 2]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_caller_node_from_cpulist() {
        let dir = tempdir().unwrap();
        write_node(dir.path(), 0, "", "10 20\n");
        write_node(dir.path(), 1, "0-4095\n", "20 10\n");

        let topo = SysfsTopology::with_root(dir.path());
        let expected = SysfsTopology::current_cpu().map(|_| 1);
        assert_eq!(topo.node_of_caller(), expected);
    }

    #[test]
    fn test_detect_host() {
        // Whatever the host exposes, the answers must agree with each other.
        let topo = SysfsTopology::new();
        match topo.availability() {
            Availability::Available => assert!(topo.max_node_index().is_some()),
            Availability::Degraded | Availability::Unavailable => {
                assert!(!topo.is_valid_node(0));
            }
        }
    }
}
