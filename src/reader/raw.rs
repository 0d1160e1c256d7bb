//! Raw placement records
//!
//! A [`RawRecordSet`] holds exactly what a placement source returned, copied
//! into Rust-owned memory. It is not validated; only the model builder
//! interprets it. The public constructors exist so that callers can inject
//! record sets of their own (tests, replay tooling).

/// Bits per CPU mask word
pub const CPU_MASK_WORD_BITS: usize = u64::BITS as usize;

/// Raw record set returned by a placement source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecordSet {
    pub(crate) apid: u64,
    pub(crate) commands: Vec<RawCommand>,
    pub(crate) nodes: Vec<RawNode>,
    pub(crate) pes: Vec<RawPe>,
}

/// One node entry of the placement list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawNode {
    pub(crate) nid: u32,
    pub(crate) cmd_ix: usize,
    pub(crate) cpu_mask: Vec<u64>,
    pub(crate) pes: Vec<u32>,
}

/// One per-PE metadata entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawPe {
    pub(crate) rank: u32,
    pub(crate) command: String,
    pub(crate) cwd: String,
}

/// Per-command launch parameters, as reported for each MPMD segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCommand {
    /// Command name
    pub name: String,
    /// PE count (`-n`)
    pub width: i32,
    /// CPUs per PE (`-d`)
    pub depth: i32,
    /// PEs per node (`-N`)
    pub fixed_per_node: i32,
    /// Nodes used by this command
    pub node_count: i32,
    /// CPUs per compute unit (`-j`)
    pub cpus_per_cu: i32,
    /// PEs per NUMA node (`-S`)
    pub pes_per_seg: i32,
    /// NUMA nodes per node (`-sn`)
    pub node_seg_count: i32,
    /// NUMA node list bits (`-sl`)
    pub seg_bits: u32,
    /// Accelerator type code as reported by the interface
    pub accel_code: i32,
}

impl RawRecordSet {
    /// Create an empty record set for an application id
    pub fn new(apid: u64) -> Self {
        Self {
            apid,
            ..Default::default()
        }
    }

    /// Append a command entry
    pub fn with_command(mut self, command: RawCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Append a node entry
    pub fn with_node(mut self, node: RawNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append a per-PE metadata entry
    pub fn with_pe(mut self, rank: u32, command: impl Into<String>, cwd: impl Into<String>) -> Self {
        self.push_pe(rank, command, cwd);
        self
    }

    pub(crate) fn push_pe(&mut self, rank: u32, command: impl Into<String>, cwd: impl Into<String>) {
        self.pes.push(RawPe {
            rank,
            command: command.into(),
            cwd: cwd.into(),
        });
    }

    /// Application id the records belong to
    pub fn apid(&self) -> u64 {
        self.apid
    }

    /// Number of node entries
    pub fn node_entries(&self) -> usize {
        self.nodes.len()
    }

    /// Number of per-PE metadata entries
    pub fn pe_entries(&self) -> usize {
        self.pes.len()
    }
}

impl RawNode {
    /// Create a node entry with no CPUs or PEs
    pub fn new(nid: u32) -> Self {
        Self {
            nid,
            ..Default::default()
        }
    }

    /// Set the command (MPMD segment) index this node runs
    pub fn with_command_index(mut self, cmd_ix: usize) -> Self {
        self.cmd_ix = cmd_ix;
        self
    }

    /// Reserve CPUs by index
    pub fn with_cpus(mut self, cpus: impl IntoIterator<Item = u32>) -> Self {
        for cpu in cpus {
            set_mask_bit(&mut self.cpu_mask, cpu);
        }
        self
    }

    /// Use a raw CPU mask, least significant word first
    pub fn with_cpu_mask(mut self, words: impl Into<Vec<u64>>) -> Self {
        self.cpu_mask = words.into();
        self
    }

    /// Append PE ranks in placement order
    pub fn with_pes(mut self, ranks: impl IntoIterator<Item = u32>) -> Self {
        self.pes.extend(ranks);
        self
    }

    /// Node id
    pub fn nid(&self) -> u32 {
        self.nid
    }
}

fn set_mask_bit(mask: &mut Vec<u64>, cpu: u32) {
    let cpu = cpu as usize;
    let word = cpu / CPU_MASK_WORD_BITS;
    if mask.len() <= word {
        mask.resize(word + 1, 0);
    }
    mask[word] |= 1u64 << (cpu % CPU_MASK_WORD_BITS);
}
