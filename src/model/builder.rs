//! Snapshot builder
//!
//! Decodes a [`RawRecordSet`] into a [`PlacementSnapshot`], checking that
//! nodes, ranks and per-PE metadata agree with each other. The result is
//! all-or-nothing: any inconsistency rejects the whole record set.

use super::cpuset::decode_mask;
use super::types::{AccelType, CommandDetail, NodeRecord, PlacementRecord, PlacementSnapshot};
use crate::error::{MalformedKind, PlacementError, Result};
use crate::reader::{RawCommand, RawRecordSet};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

impl From<RawCommand> for CommandDetail {
    fn from(raw: RawCommand) -> Self {
        Self {
            name: raw.name,
            width: raw.width,
            depth: raw.depth,
            pes_per_node: raw.fixed_per_node,
            node_count: raw.node_count,
            cpus_per_cu: raw.cpus_per_cu,
            pes_per_numa_node: raw.pes_per_seg,
            numa_nodes_per_node: raw.node_seg_count,
            numa_node_bits: raw.seg_bits,
            accel: AccelType::from_code(raw.accel_code),
        }
    }
}

/// Build a validated snapshot from raw placement records
pub fn build_snapshot(raw: RawRecordSet) -> Result<PlacementSnapshot> {
    let RawRecordSet {
        apid,
        commands,
        nodes,
        pes,
    } = raw;

    if nodes.is_empty() {
        return Err(malformed(MalformedKind::NoNodes));
    }

    let commands: Vec<CommandDetail> = commands.into_iter().map(CommandDetail::from).collect();

    let mut metadata = HashMap::with_capacity(pes.len());
    for pe in pes {
        let rank = pe.rank;
        if metadata.insert(rank, pe).is_some() {
            return Err(malformed(MalformedKind::DuplicatePeMetadata { rank }));
        }
    }

    let total: usize = nodes.iter().map(|n| n.pes.len()).sum();
    let mut slots: Vec<Option<PlacementRecord>> = (0..total).map(|_| None).collect();
    let mut seen_nodes = HashSet::with_capacity(nodes.len());
    let mut records = Vec::with_capacity(nodes.len());

    for node in nodes {
        let id = node.nid;

        if !seen_nodes.insert(id) {
            return Err(malformed(MalformedKind::DuplicateNode { node: id }));
        }
        if node.pes.is_empty() {
            return Err(malformed(MalformedKind::EmptyNode { node: id }));
        }

        let cpus = decode_mask(&node.cpu_mask);
        if cpus.is_empty() {
            return Err(malformed(MalformedKind::NoCpus { node: id }));
        }

        // Test fixtures and older interfaces may omit command details
        if !commands.is_empty() && node.cmd_ix >= commands.len() {
            return Err(malformed(MalformedKind::UnknownCommand {
                node: id,
                index: node.cmd_ix,
                count: commands.len(),
            }));
        }

        for &rank in &node.pes {
            let slot = slots.get_mut(rank as usize).ok_or_else(|| {
                malformed(MalformedKind::RankGap {
                    rank,
                    total: total as u32,
                })
            })?;

            if let Some(first) = slot.as_ref() {
                return Err(malformed(MalformedKind::DuplicateRank {
                    rank,
                    node: id,
                    first_node: first.node,
                }));
            }

            let pe = metadata
                .remove(&rank)
                .ok_or_else(|| malformed(MalformedKind::MissingPeMetadata { rank, node: id }))?;

            *slot = Some(PlacementRecord {
                rank,
                node: id,
                command: pe.command,
                working_dir: PathBuf::from(pe.cwd),
            });
        }

        records.push(NodeRecord {
            id,
            cpus,
            pes: node.pes,
            command_index: node.cmd_ix,
        });
    }

    if let Some(&rank) = metadata.keys().min() {
        return Err(malformed(MalformedKind::UnplacedRank { rank }));
    }

    let placements = slots
        .into_iter()
        .enumerate()
        .map(|(rank, slot)| {
            slot.ok_or_else(|| {
                malformed(MalformedKind::RankGap {
                    rank: rank as u32,
                    total: total as u32,
                })
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let snapshot = PlacementSnapshot::from_parts(apid, commands, records, placements);
    tracing::info!(
        "Built placement snapshot for apid {}: {} nodes, {} PEs",
        snapshot.apid(),
        snapshot.total_nodes(),
        snapshot.total_pes()
    );

    Ok(snapshot)
}

fn malformed(kind: MalformedKind) -> PlacementError {
    tracing::debug!("Rejecting placement data: {}", kind);
    PlacementError::MalformedPlacementData(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RawNode;
    use proptest::prelude::*;

    fn example_raw() -> RawRecordSet {
        let mut raw = RawRecordSet::new(1234)
            .with_node(RawNode::new(10).with_cpus([0, 1]).with_pes([0, 1]))
            .with_node(RawNode::new(11).with_cpus([0, 1]).with_pes([2, 3]));
        for rank in 0..4 {
            raw = raw.with_pe(rank, "./app", "/home/x");
        }
        raw
    }

    fn malformed_kind(raw: RawRecordSet) -> MalformedKind {
        match build_snapshot(raw) {
            Err(PlacementError::MalformedPlacementData(kind)) => kind,
            other => panic!("expected malformed data, got {:?}", other),
        }
    }

    #[test]
    fn test_two_node_example() {
        let snapshot = build_snapshot(example_raw()).unwrap();

        assert_eq!(snapshot.apid(), 1234);
        assert_eq!(snapshot.total_nodes(), 2);
        assert_eq!(snapshot.total_pes(), 4);
        assert_eq!(snapshot.node_for(2).map(|n| n.id), Some(11));
        assert_eq!(snapshot.pes_on(10), Some(&[0, 1][..]));
        assert_eq!(snapshot.placements()[3].command, "./app");
        assert_eq!(snapshot.placements()[3].working_dir, PathBuf::from("/home/x"));
        assert_eq!(snapshot.nodes()[1].cpu_list(), "0-1");
        assert!(snapshot.node_for(4).is_none());
        assert!(snapshot.pes_on(12).is_none());
    }

    #[test]
    fn test_node_and_pe_order_preserved() {
        let raw = RawRecordSet::new(1)
            .with_node(RawNode::new(900).with_cpus([3]).with_pes([3, 1]))
            .with_node(RawNode::new(5).with_cpus([0, 2]).with_pes([2, 0]))
            .with_pe(0, "a", "/")
            .with_pe(1, "a", "/")
            .with_pe(2, "a", "/")
            .with_pe(3, "a", "/");

        let snapshot = build_snapshot(raw).unwrap();
        let ids: Vec<u32> = snapshot.nodes().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![900, 5]);
        assert_eq!(snapshot.pes_on(900), Some(&[3, 1][..]));
        assert_eq!(snapshot.pes_on(5), Some(&[2, 0][..]));
        let ranks: Vec<u32> = snapshot.placements().iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_command_details() {
        let raw = RawRecordSet::new(8)
            .with_command(RawCommand {
                name: "./solver".to_string(),
                width: 2,
                depth: 4,
                fixed_per_node: 1,
                node_count: 1,
                cpus_per_cu: 2,
                pes_per_seg: 1,
                node_seg_count: 2,
                seg_bits: 0b11,
                accel_code: 2,
            })
            .with_command(RawCommand {
                name: "./io".to_string(),
                width: 1,
                ..Default::default()
            })
            .with_node(RawNode::new(1).with_cpus(0..8).with_pes([0, 1]))
            .with_node(RawNode::new(2).with_command_index(1).with_cpus([0]).with_pes([2]))
            .with_pe(0, "./solver", "/w")
            .with_pe(1, "./solver", "/w")
            .with_pe(2, "./io", "/w");

        let snapshot = build_snapshot(raw).unwrap();
        let first = snapshot.first_command().unwrap();
        assert_eq!(first.name, "./solver");
        assert_eq!(first.depth, 4);
        assert_eq!(first.pes_per_node, 1);
        assert_eq!(first.numa_nodes_per_node, 2);
        assert_eq!(first.numa_node_bits, 0b11);
        assert_eq!(first.accel, AccelType::Knc);
        assert_eq!(snapshot.command_for(2).map(|c| c.name.as_str()), Some("./io"));
        assert_eq!(snapshot.command_for(0).map(|c| c.width), Some(2));
        assert_eq!(snapshot.nodes()[0].cpu_list(), "0-7");
    }

    #[test]
    fn test_missing_pe_metadata() {
        let raw = RawRecordSet::new(1)
            .with_node(RawNode::new(10).with_cpus([0, 1]).with_pes([0, 1]))
            .with_pe(0, "./app", "/home/x");
        assert_eq!(
            malformed_kind(raw),
            MalformedKind::MissingPeMetadata { rank: 1, node: 10 }
        );
    }

    #[test]
    fn test_duplicate_rank_across_nodes() {
        let raw = example_raw().with_node(RawNode::new(12).with_cpus([0]).with_pes([1]));
        assert_eq!(
            malformed_kind(raw),
            MalformedKind::DuplicateRank {
                rank: 1,
                node: 12,
                first_node: 10
            }
        );
    }

    #[test]
    fn test_rank_gap() {
        let raw = RawRecordSet::new(1)
            .with_node(RawNode::new(10).with_cpus([0, 1]).with_pes([0, 2]))
            .with_pe(0, "./app", "/")
            .with_pe(2, "./app", "/");
        assert_eq!(
            malformed_kind(raw),
            MalformedKind::RankGap { rank: 2, total: 2 }
        );
    }

    #[test]
    fn test_unplaced_metadata() {
        let raw = example_raw().with_pe(9, "./app", "/home/x").with_pe(7, "./app", "/");
        assert_eq!(malformed_kind(raw), MalformedKind::UnplacedRank { rank: 7 });
    }

    #[test]
    fn test_duplicate_metadata() {
        let raw = example_raw().with_pe(2, "./other", "/tmp");
        assert_eq!(
            malformed_kind(raw),
            MalformedKind::DuplicatePeMetadata { rank: 2 }
        );
    }

    #[test]
    fn test_duplicate_node() {
        let raw = example_raw().with_node(RawNode::new(10).with_cpus([2]).with_pes([4]));
        assert_eq!(malformed_kind(raw), MalformedKind::DuplicateNode { node: 10 });
    }

    #[test]
    fn test_node_without_pes() {
        let raw = example_raw().with_node(RawNode::new(13).with_cpus([0, 1]));
        assert_eq!(malformed_kind(raw), MalformedKind::EmptyNode { node: 13 });
    }

    #[test]
    fn test_node_without_cpus() {
        let raw = RawRecordSet::new(1)
            .with_node(RawNode::new(10).with_cpu_mask(vec![0, 0]).with_pes([0]))
            .with_pe(0, "./app", "/");
        assert_eq!(malformed_kind(raw), MalformedKind::NoCpus { node: 10 });
    }

    #[test]
    fn test_unknown_command_index() {
        let mut raw = example_raw().with_command(RawCommand::default());
        raw.nodes[1].cmd_ix = 1;
        assert_eq!(
            malformed_kind(raw),
            MalformedKind::UnknownCommand {
                node: 11,
                index: 1,
                count: 1
            }
        );
    }

    #[test]
    fn test_empty_record_set() {
        assert_eq!(malformed_kind(RawRecordSet::new(1)), MalformedKind::NoNodes);
    }

    /// Node ids and per-node rank lists of a valid placement
    fn valid_layout() -> impl Strategy<Value = Vec<(u32, Vec<u32>)>> {
        prop::collection::vec(1usize..6, 1..10).prop_flat_map(|counts| {
            let total = counts.iter().sum::<usize>() as u32;
            (
                Just(counts.clone()),
                prop::collection::hash_set(0u32..100_000, counts.len()),
                Just((0..total).collect::<Vec<u32>>()).prop_shuffle(),
            )
                .prop_map(|(counts, ids, ranks)| {
                    let mut offset = 0;
                    ids.into_iter()
                        .zip(counts)
                        .map(|(id, count)| {
                            let pes = ranks[offset..offset + count].to_vec();
                            offset += count;
                            (id, pes)
                        })
                        .collect::<Vec<(u32, Vec<u32>)>>()
                })
        })
    }

    fn raw_from_layout(layout: &[(u32, Vec<u32>)]) -> RawRecordSet {
        let mut raw = RawRecordSet::new(77);
        for (id, pes) in layout {
            raw = raw.with_node(RawNode::new(*id).with_cpus(0..pes.len() as u32).with_pes(pes.clone()));
            for &rank in pes {
                raw = raw.with_pe(rank, format!("./app-{}", rank), "/scratch");
            }
        }
        raw
    }

    proptest! {
        #[test]
        fn prop_ranks_complete_and_unique(layout in valid_layout()) {
            let total: usize = layout.iter().map(|(_, pes)| pes.len()).sum();
            let snapshot = build_snapshot(raw_from_layout(&layout)).unwrap();

            prop_assert_eq!(snapshot.total_pes(), total);
            prop_assert_eq!(snapshot.total_nodes(), layout.len());
            for (index, record) in snapshot.placements().iter().enumerate() {
                prop_assert_eq!(record.rank as usize, index);
                prop_assert_eq!(&record.command, &format!("./app-{}", index));
            }

            let mut placed: Vec<u32> = snapshot.nodes().iter().flat_map(|n| n.pes.iter().copied()).collect();
            placed.sort_unstable();
            prop_assert_eq!(placed, (0..total as u32).collect::<Vec<_>>());
        }

        #[test]
        fn prop_node_for_round_trips(layout in valid_layout()) {
            let snapshot = build_snapshot(raw_from_layout(&layout)).unwrap();

            for node in snapshot.nodes() {
                prop_assert!(!node.cpus.is_empty());
                for &rank in &node.pes {
                    prop_assert_eq!(snapshot.node_for(rank).map(|n| n.id), Some(node.id));
                    prop_assert_eq!(snapshot.placements()[rank as usize].node, node.id);
                }
            }
        }

        #[test]
        fn prop_pes_on_inverts_node_for(layout in valid_layout()) {
            let snapshot = build_snapshot(raw_from_layout(&layout)).unwrap();

            for rank in 0..snapshot.total_pes() as u32 {
                let home = snapshot.node_for(rank).map(|n| n.id);
                for node in snapshot.nodes() {
                    let listed = snapshot.pes_on(node.id).unwrap_or_default().contains(&rank);
                    prop_assert_eq!(listed, home == Some(node.id));
                }
            }
        }

        #[test]
        fn prop_missing_metadata_rejected(layout in valid_layout(), pick in any::<prop::sample::Index>()) {
            let mut raw = raw_from_layout(&layout);
            let removed = raw.pes.remove(pick.index(raw.pes.len())).rank;

            let err = build_snapshot(raw).unwrap_err();
            prop_assert!(
                matches!(
                    err.malformed(),
                    Some(MalformedKind::MissingPeMetadata { rank, .. }) if *rank == removed
                ),
                "unexpected error: {:?}",
                err
            );
        }

        #[test]
        fn prop_duplicate_rank_rejected(layout in valid_layout(), pick in any::<prop::sample::Index>()) {
            prop_assume!(layout.len() >= 2);
            let mut raw = raw_from_layout(&layout);
            let rank = raw.nodes[0].pes[pick.index(raw.nodes[0].pes.len())];
            raw.nodes[1].pes.push(rank);

            let err = build_snapshot(raw).unwrap_err();
            prop_assert!(
                matches!(
                    err.malformed(),
                    Some(MalformedKind::DuplicateRank { rank: r, .. }) if *r == rank
                ),
                "unexpected error: {:?}",
                err
            );
        }
    }
}
