//! Placement data model
//!
//! A [`PlacementSnapshot`] is the immutable result of one placement query.
//! It is only ever produced by the builder, which guarantees that every
//! node, PE and command reference inside it is consistent.

use super::cpuset::format_cpu_list;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

/// Accelerator requested for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccelType {
    /// No accelerator
    #[default]
    None,
    /// GPU
    Gpu,
    /// Intel Xeon Phi (Knights Corner)
    Knc,
}

impl AccelType {
    /// Map an interface accelerator code; unknown codes mean no accelerator
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AccelType::Gpu,
            2 => AccelType::Knc,
            _ => AccelType::None,
        }
    }

    /// Get accelerator name
    pub fn name(&self) -> &'static str {
        match self {
            AccelType::None => "None",
            AccelType::Gpu => "GPU",
            AccelType::Knc => "KNC",
        }
    }
}

impl fmt::Display for AccelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Launch parameters of one aprun command (MPMD segment)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDetail {
    /// Command name
    pub name: String,
    /// Number of PEs (`-n`)
    pub width: i32,
    /// CPUs per PE (`-d`)
    pub depth: i32,
    /// PEs per node (`-N`)
    pub pes_per_node: i32,
    /// Number of nodes used by this command
    pub node_count: i32,
    /// CPUs per compute unit (`-j`)
    pub cpus_per_cu: i32,
    /// PEs per NUMA node (`-S`)
    pub pes_per_numa_node: i32,
    /// NUMA nodes per node (`-sn`)
    pub numa_nodes_per_node: i32,
    /// NUMA node list bits (`-sl`)
    pub numa_node_bits: u32,
    /// Requested accelerator
    pub accel: AccelType,
}

/// One physical node of the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id (ALPS nid)
    pub id: u32,
    /// CPUs reserved for this job's PEs on the node
    pub cpus: BTreeSet<u32>,
    /// PE ranks on the node, in placement order
    pub pes: Vec<u32>,
    /// Index of the command this node runs
    pub command_index: usize,
}

impl NodeRecord {
    /// Reserved CPUs in compact list form, e.g. "0-15"
    pub fn cpu_list(&self) -> String {
        format_cpu_list(&self.cpus)
    }

    /// Check if a rank is placed on this node
    pub fn hosts(&self, rank: u32) -> bool {
        self.pes.contains(&rank)
    }
}

/// One PE of the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    /// PE rank
    pub rank: u32,
    /// Node the PE is bound to
    pub node: u32,
    /// Command used to launch the PE
    pub command: String,
    /// Working directory of the PE
    pub working_dir: PathBuf,
}

impl PlacementRecord {
    /// Working directory as a path
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Immutable placement of one job at one instant
///
/// Not deserializable: snapshots only come out of the validating builder.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementSnapshot {
    apid: u64,
    commands: Vec<CommandDetail>,
    nodes: Vec<NodeRecord>,
    placements: Vec<PlacementRecord>,
    #[serde(skip)]
    node_index: HashMap<u32, usize>,
    #[serde(skip)]
    rank_nodes: Vec<usize>,
}

impl PlacementSnapshot {
    /// Assemble a snapshot from validated parts
    ///
    /// `placements[r].rank == r` and every `placements[r].node` names an
    /// entry of `nodes`.
    pub(crate) fn from_parts(
        apid: u64,
        commands: Vec<CommandDetail>,
        nodes: Vec<NodeRecord>,
        placements: Vec<PlacementRecord>,
    ) -> Self {
        let node_index: HashMap<u32, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id, index))
            .collect();

        let rank_nodes = placements
            .iter()
            .map(|p| node_index.get(&p.node).copied().unwrap_or_default())
            .collect();

        Self {
            apid,
            commands,
            nodes,
            placements,
            node_index,
            rank_nodes,
        }
    }

    /// Application id of the job
    pub fn apid(&self) -> u64 {
        self.apid
    }

    /// Nodes in the order the interface reported them
    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    /// PEs indexed by rank
    pub fn placements(&self) -> &[PlacementRecord] {
        &self.placements
    }

    /// Total number of PEs
    pub fn total_pes(&self) -> usize {
        self.placements.len()
    }

    /// Total number of nodes
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Node a rank is placed on, or `None` if the rank is out of range
    pub fn node_for(&self, rank: u32) -> Option<&NodeRecord> {
        self.rank_nodes
            .get(rank as usize)
            .map(|&index| &self.nodes[index])
    }

    /// Ranks placed on a node, or `None` if the node is not part of the job
    pub fn pes_on(&self, node_id: u32) -> Option<&[u32]> {
        self.node(node_id).map(|node| node.pes.as_slice())
    }

    /// Look up a node by id
    pub fn node(&self, node_id: u32) -> Option<&NodeRecord> {
        self.node_index.get(&node_id).map(|&index| &self.nodes[index])
    }

    /// Look up a PE by rank
    pub fn placement(&self, rank: u32) -> Option<&PlacementRecord> {
        self.placements.get(rank as usize)
    }

    /// Launch parameters of every command, in aprun order
    pub fn commands(&self) -> &[CommandDetail] {
        &self.commands
    }

    /// Launch parameters of the first command
    pub fn first_command(&self) -> Option<&CommandDetail> {
        self.commands.first()
    }

    /// Launch parameters of the command a rank belongs to
    pub fn command_for(&self, rank: u32) -> Option<&CommandDetail> {
        self.node_for(rank)
            .and_then(|node| self.commands.get(node.command_index))
    }

    /// Ranks sharing a node with `rank`, including itself
    pub fn node_peers(&self, rank: u32) -> Option<&[u32]> {
        self.node_for(rank).map(|node| node.pes.as_slice())
    }

    /// Render the snapshot as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print placement summary
    pub fn print_summary(&self) {
        println!("ALPS Placement:");
        println!("  Apid: {}", self.apid);
        println!("  Nodes: {}", self.total_nodes());
        println!("  PEs: {}", self.total_pes());

        for (index, cmd) in self.commands.iter().enumerate() {
            println!("  Command {}: {}", index, cmd.name);
            println!(
                "    -n {} -d {} -N {} -j {} -S {} -sn {} -sl {:#x}",
                cmd.width,
                cmd.depth,
                cmd.pes_per_node,
                cmd.cpus_per_cu,
                cmd.pes_per_numa_node,
                cmd.numa_nodes_per_node,
                cmd.numa_node_bits
            );
            println!("    Nodes: {}  Accel: {}", cmd.node_count, cmd.accel);
        }

        for node in &self.nodes {
            println!("  Node {}:", node.id);
            println!("    CPUs: {}", node.cpu_list());
            println!("    PEs: {:?}", node.pes);
        }
    }
}

impl PartialEq for PlacementSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.apid == other.apid
            && self.commands == other.commands
            && self.nodes == other.nodes
            && self.placements == other.placements
    }
}

impl Eq for PlacementSnapshot {}
