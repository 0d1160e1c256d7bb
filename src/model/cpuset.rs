//! CPU set helpers
//!
//! Converts between raw CPU masks, sorted CPU sets and the Linux cpulist
//! notation ("0-3,8-11").

use crate::reader::CPU_MASK_WORD_BITS;
use std::collections::BTreeSet;

/// Expand a CPU mask (least significant word first) into CPU indices
pub fn decode_mask(words: &[u64]) -> BTreeSet<u32> {
    let mut cpus = BTreeSet::new();

    for (index, &word) in words.iter().enumerate() {
        let mut bits = word;
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            cpus.insert((index * CPU_MASK_WORD_BITS + bit) as u32);
            bits &= bits - 1;
        }
    }

    cpus
}

/// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
///
/// Malformed fragments are skipped.
pub fn parse_cpu_list(s: &str) -> Vec<u32> {
    let mut cpus = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.contains('-') {
            let mut range = part.split('-');
            if let (Some(start), Some(end)) = (range.next(), range.next()) {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    cpus.extend(start..=end);
                }
            }
        } else if let Ok(cpu) = part.parse::<u32>() {
            cpus.push(cpu);
        }
    }

    cpus
}

/// Format CPUs in compact list form (e.g., [0,1,2,3,8] -> "0-3,8")
pub fn format_cpu_list<'a>(cpus: impl IntoIterator<Item = &'a u32>) -> String {
    let sorted: BTreeSet<u32> = cpus.into_iter().copied().collect();
    let mut ranges: Vec<(u32, u32)> = Vec::new();

    for cpu in sorted {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == cpu => *end = cpu,
            _ => ranges.push((cpu, cpu)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{}-{}", start, end)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
