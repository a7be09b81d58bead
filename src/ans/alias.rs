use std::cmp::Ordering;

use crate::constants::{Bitlen, HistBin, ANS_TAB_SIZE};
use crate::errors::{EntroError, EntroResult};

/// One alias table entry covering `2^log_entry_size` sub-slots. Slots
/// below `cutoff` belong to symbol `i` itself, the rest to `right_value`.
/// Parallel per-symbol arrays instead of pointers keep the table flat.
#[derive(Clone, Copy, Debug, Default)]
pub struct AliasEntry {
  pub cutoff: u8,
  pub right_value: u8,
  pub freq0: u16,
  // offset of the (pos >= cutoff) side of the entry
  pub offsets1: u16,
  pub freq1_xor_freq0: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct AliasSymbol {
  pub value: usize,
  pub offset: u32,
  pub freq: u32,
}

/// Maps a uniform `ANS_LOG_TAB_SIZE`-bit index to the symbol owning that
/// slot, its offset within the symbol's span, and the symbol's frequency.
#[inline]
pub fn alias_lookup(
  table: &[AliasEntry],
  value: u32,
  log_entry_size: Bitlen,
  entry_size_minus_1: u32,
) -> AliasSymbol {
  let i = (value >> log_entry_size) as usize;
  let pos = value & entry_size_minus_1;
  let e = &table[i];
  if pos >= e.cutoff as u32 {
    AliasSymbol {
      value: e.right_value as usize,
      offset: e.offsets1 as u32 + pos,
      freq: (e.freq0 ^ e.freq1_xor_freq0) as u32,
    }
  } else {
    AliasSymbol {
      value: i,
      offset: pos,
      freq: e.freq0 as u32,
    }
  }
}

/// Builds an alias table such that uniform sampling of a `log2(range)`-bit
/// index yields symbol `s` with probability `distribution[s] / range`.
pub fn init_alias_table(
  distribution: &[HistBin],
  range: u32,
  log_alpha_size: Bitlen,
) -> EntroResult<Vec<AliasEntry>> {
  let mut dist: Vec<u32> = distribution.iter().map(|&c| c as u32).collect();
  while dist.last() == Some(&0) {
    dist.pop();
  }
  // ensure a valid table even with no symbols
  if dist.is_empty() {
    dist.push(range);
  }
  let table_size = 1usize << log_alpha_size;
  if dist.len() > table_size {
    return Err(EntroError::invalid_input(format!(
      "cannot fit {} symbols into a {}-entry alias table",
      dist.len(),
      table_size,
    )));
  }
  debug_assert!(table_size as u32 <= range);
  debug_assert_eq!(range % table_size as u32, 0);
  let entry_size = range >> log_alpha_size; // power of two

  let mut a = vec![AliasEntry::default(); table_size];

  // Special case for single-symbol distributions: the decoder state stays
  // a fixed point. Since offsets of the left side are hardcoded to 0, the
  // general construction below cannot produce this.
  for (sym, &d) in dist.iter().enumerate() {
    if d == ANS_TAB_SIZE as u32 {
      for (i, e) in a.iter_mut().enumerate() {
        e.right_value = sym as u8;
        e.cutoff = 0;
        e.offsets1 = (entry_size * i as u32) as u16;
        e.freq0 = 0;
        e.freq1_xor_freq0 = ANS_TAB_SIZE as u16;
      }
      return Ok(a);
    }
  }

  let mut underfull: Vec<usize> = Vec::new();
  let mut overfull: Vec<usize> = Vec::new();
  let mut cutoffs = vec![0u32; table_size];
  for (i, &d) in dist.iter().enumerate() {
    cutoffs[i] = d;
    match d.cmp(&entry_size) {
      Ordering::Greater => overfull.push(i),
      Ordering::Less => underfull.push(i),
      Ordering::Equal => {}
    }
  }
  for i in dist.len()..table_size {
    underfull.push(i);
  }

  // move mass of overfull symbols into the tops of underfull entries
  while let Some(&overfull_i) = overfull.last() {
    let underfull_i = underfull
      .pop()
      .ok_or_else(|| EntroError::invariant("alias table ran out of underfull entries"))?;
    let underfull_by = entry_size - cutoffs[underfull_i];
    cutoffs[overfull_i] -= underfull_by;
    a[underfull_i].right_value = overfull_i as u8;
    a[underfull_i].offsets1 = cutoffs[overfull_i] as u16;
    match cutoffs[overfull_i].cmp(&entry_size) {
      Ordering::Less => {
        underfull.push(overfull_i);
        overfull.pop();
      }
      Ordering::Equal => {
        overfull.pop();
      }
      Ordering::Greater => {}
    }
  }

  for i in 0..table_size {
    if cutoffs[i] == entry_size {
      a[i].right_value = i as u8;
      a[i].offsets1 = 0;
      a[i].cutoff = 0;
    } else {
      // offsets1 was the overfull symbol's cutoff at assignment time, so
      // subtracting our own cutoff cannot underflow
      a[i].offsets1 -= cutoffs[i] as u16;
      a[i].cutoff = cutoffs[i] as u8;
    }
    let freq0 = if i < dist.len() { dist[i] } else { 0 };
    let i1 = a[i].right_value as usize;
    let freq1 = if i1 < dist.len() { dist[i1] } else { 0 };
    a[i].freq0 = freq0 as u16;
    a[i].freq1_xor_freq0 = (freq1 ^ freq0) as u16;
  }

  Ok(a)
}

/// Counts summing to `total_count`, as equal as integer division allows.
pub fn create_flat_histogram(length: usize, total_count: u32) -> Vec<HistBin> {
  debug_assert!(length > 0);
  debug_assert!(length <= total_count as usize);
  let count = (total_count as usize / length) as HistBin;
  let mut result = vec![count; length];
  for r in result.iter_mut().take(total_count as usize % length) {
    *r += 1;
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constants::ANS_LOG_TAB_SIZE;

  fn assert_consistent(distribution: &[HistBin], range: u32, log_alpha_size: Bitlen) {
    let table = init_alias_table(distribution, range, log_alpha_size).unwrap();
    let log_entry_size = range.ilog2() - log_alpha_size;
    let entry_size_minus_1 = (1u32 << log_entry_size) - 1;

    let mut counts = vec![0u32; 1 << log_alpha_size];
    let mut seen_offsets = vec![std::collections::HashSet::new(); 1 << log_alpha_size];
    for idx in 0..range {
      let s = alias_lookup(&table, idx, log_entry_size, entry_size_minus_1);
      counts[s.value] += 1;
      assert!(
        seen_offsets[s.value].insert(s.offset),
        "duplicate offset {} for symbol {}",
        s.offset,
        s.value
      );
      assert!(s.offset < s.freq);
      if s.value < distribution.len() {
        assert_eq!(s.freq, distribution[s.value] as u32);
      }
    }
    for (sym, &d) in distribution.iter().enumerate() {
      assert_eq!(
        counts[sym], d as u32,
        "symbol {} owns {} slots, expected {}",
        sym, counts[sym], d,
      );
    }
  }

  #[test]
  fn test_small_tables() {
    assert_consistent(&[3, 3, 2], 8, 2);
    assert_consistent(&[1, 7], 8, 1);
    assert_consistent(&[2, 2, 2, 2], 8, 2);
    assert_consistent(&[6, 1, 1, 0], 8, 2);
  }

  #[test]
  fn test_full_size_table() {
    let mut distribution = vec![0; 17];
    distribution[0] = 3000;
    distribution[3] = 1000;
    distribution[16] = 96;
    assert_consistent(&distribution, ANS_TAB_SIZE as u32, 5);
    assert_consistent(&distribution, ANS_TAB_SIZE as u32, 8);
  }

  #[test]
  fn test_single_symbol_fixed_point() {
    let mut distribution = vec![0; 3];
    distribution[2] = ANS_TAB_SIZE as HistBin;
    let table = init_alias_table(&distribution, ANS_TAB_SIZE as u32, 5).unwrap();
    let log_entry_size = ANS_LOG_TAB_SIZE - 5;
    for idx in [0u32, 1, 100, 4095] {
      let s = alias_lookup(&table, idx, log_entry_size, (1 << log_entry_size) - 1);
      assert_eq!(s.value, 2);
      // offset equals the index, so the decoder state never moves
      assert_eq!(s.offset, idx);
      assert_eq!(s.freq, ANS_TAB_SIZE as u32);
    }
  }

  #[test]
  fn test_empty_distribution() {
    let table = init_alias_table(&[], ANS_TAB_SIZE as u32, 5).unwrap();
    assert_eq!(table.len(), 32);
    let s = alias_lookup(&table, 17, ANS_LOG_TAB_SIZE - 5, (1 << (ANS_LOG_TAB_SIZE - 5)) - 1);
    assert_eq!(s.value, 0);
    assert_eq!(s.offset, 17);
  }

  #[test]
  fn test_flat_histogram() {
    assert_eq!(create_flat_histogram(3, 8), vec![3, 3, 2]);
    assert_eq!(create_flat_histogram(1, 4096), vec![4096]);
    let flat = create_flat_histogram(256, 4096);
    assert!(flat.iter().all(|&c| c == 16));
  }
}
