use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::constants::CLUSTERS_LIMIT;
use crate::errors::EntroResult;
use crate::histogram::Histogram;
use crate::params::{ClusteringType, HistogramParams};

/// Entropy of the merge minus the entropies of the parts; 0 when either
/// side is empty. Relies on cached entropies.
fn histogram_distance(a: &Histogram, b: &Histogram) -> f32 {
  if a.total_count == 0 || b.total_count == 0 {
    return 0.0;
  }
  let mut merged = a.clone();
  merged.add_histogram(b);
  merged.shannon_entropy() - a.entropy - b.entropy
}

// Greedy seeding: repeatedly promote the histogram farthest from every
// existing cluster, then attach the rest to their nearest cluster.
fn fast_cluster_histograms(
  ins: &[Histogram],
  max_histograms: usize,
  min_distance_for_distinct: f32,
  out: &mut Vec<Histogram>,
  histogram_symbols: &mut Vec<u32>,
) {
  const UNASSIGNED: u32 = u32::MAX;
  let prev_histograms = out.len();
  out.reserve(max_histograms);
  histogram_symbols.clear();
  histogram_symbols.resize(ins.len(), UNASSIGNED);

  let mut dists = vec![f32::MAX; ins.len()];
  let mut largest_idx = 0;
  for (i, histogram) in ins.iter().enumerate() {
    if histogram.total_count == 0 {
      histogram_symbols[i] = 0;
      dists[i] = 0.0;
      continue;
    }
    if histogram.total_count > ins[largest_idx].total_count {
      largest_idx = i;
    }
  }

  if prev_histograms > 0 {
    for (i, histogram) in ins.iter().enumerate() {
      if dists[i] == 0.0 {
        continue;
      }
      for prev in out.iter().take(prev_histograms) {
        dists[i] = dists[i].min(histogram_distance(histogram, prev));
      }
    }
    let max_dist_idx = (0..ins.len())
      .max_by(|&a, &b| dists[a].total_cmp(&dists[b]))
      .unwrap_or(0);
    if dists[max_dist_idx] > 0.0 {
      largest_idx = max_dist_idx;
    }
  }

  while out.len() - prev_histograms < max_histograms {
    histogram_symbols[largest_idx] = out.len() as u32;
    out.push(ins[largest_idx].clone());
    out.last_mut().unwrap().update_entropy();
    dists[largest_idx] = 0.0;
    largest_idx = 0;
    for i in 0..ins.len() {
      if dists[i] == 0.0 {
        continue;
      }
      dists[i] = dists[i].min(histogram_distance(&ins[i], out.last().unwrap()));
      if dists[i] > dists[largest_idx] {
        largest_idx = i;
      }
    }
    if dists[largest_idx] < min_distance_for_distinct {
      break;
    }
  }

  for i in 0..ins.len() {
    if histogram_symbols[i] != UNASSIGNED {
      continue;
    }
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (j, cluster) in out.iter().enumerate() {
      let dist = histogram_distance(&ins[i], cluster);
      if dist < best_dist {
        best = j;
        best_dist = dist;
      }
    }
    out[best].add_histogram(&ins[i]);
    out[best].update_entropy();
    histogram_symbols[i] = best as u32;
  }
}

// Validity of a queued pair: its version must still equal
// max(version[first], version[second]).
#[derive(Clone, Copy, Debug, PartialEq)]
struct HistogramPair {
  cost: f32,
  first: u32,
  second: u32,
  version: u32,
}

impl Eq for HistogramPair {}

impl Ord for HistogramPair {
  fn cmp(&self, other: &Self) -> Ordering {
    // flipped so the heap pops the cheapest merge first
    other
      .cost
      .total_cmp(&self.cost)
      .then(other.first.cmp(&self.first))
      .then(other.second.cmp(&self.second))
      .then(other.version.cmp(&self.version))
  }
}

impl PartialOrd for HistogramPair {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

fn merge_cost(
  out: &[Histogram],
  costs: &[f32],
  i: usize,
  j: usize,
) -> EntroResult<f32> {
  let mut merged = out[i].clone();
  merged.add_histogram(&out[j]);
  Ok(merged.population_cost()? - costs[i] - costs[j])
}

/// Groups `ins` into at most `min(CLUSTERS_LIMIT, max_histograms_arg)`
/// clusters and fills `histogram_symbols` with each input's cluster
/// index. Pre-existing entries of `out` act as fixed clusters that keep
/// their indices.
pub(crate) fn cluster_histograms(
  params: &HistogramParams,
  ins: &[Histogram],
  max_histograms_arg: usize,
  out: &mut Vec<Histogram>,
  histogram_symbols: &mut Vec<u32>,
) -> EntroResult<()> {
  let mut max_histograms = max_histograms_arg
    .min(CLUSTERS_LIMIT)
    .min(params.max_histograms);
  if params.clustering == ClusteringType::Fastest {
    max_histograms = max_histograms.min(4);
  }
  let min_distance_for_distinct = if params.clustering == ClusteringType::Best {
    16.0
  } else {
    64.0
  };

  let mut ins: Vec<Histogram> = ins.to_vec();
  for histogram in &mut ins {
    histogram.update_entropy();
  }
  fast_cluster_histograms(
    &ins,
    max_histograms,
    min_distance_for_distinct,
    out,
    histogram_symbols,
  );

  if params.clustering == ClusteringType::Best {
    // pair up clusters whenever a merge reduces real table-plus-data cost
    let mut costs = Vec::with_capacity(out.len());
    for histogram in out.iter() {
      costs.push(histogram.population_cost()?);
    }
    let mut next_version = 2u32;
    let mut version = vec![1u32; out.len()];
    let mut renumbering: Vec<u32> = (0..out.len() as u32).collect();

    let mut pairs_to_merge = BinaryHeap::new();
    for i in 0..out.len() {
      for j in i + 1..out.len() {
        let cost = merge_cost(out, &costs, i, j)?;
        if cost >= 0.0 {
          continue;
        }
        pairs_to_merge.push(HistogramPair {
          cost,
          first: i as u32,
          second: j as u32,
          version: 1,
        });
      }
    }

    while let Some(pair) = pairs_to_merge.pop() {
      let first = pair.first as usize;
      let second = pair.second as usize;
      if pair.version != version[first].max(version[second])
        || version[first] == 0
        || version[second] == 0
      {
        continue;
      }
      let absorbed = out[second].clone();
      out[first].add_histogram(&absorbed);
      costs[first] = out[first].population_cost()?;
      for r in renumbering.iter_mut() {
        if *r == second as u32 {
          *r = first as u32;
        }
      }
      version[second] = 0;
      version[first] = next_version;
      next_version += 1;
      for j in 0..out.len() {
        if j == first || version[j] == 0 {
          continue;
        }
        let cost = merge_cost(out, &costs, first, j)?;
        if cost >= 0.0 {
          continue;
        }
        pairs_to_merge.push(HistogramPair {
          cost,
          first: first.min(j) as u32,
          second: first.max(j) as u32,
          version: version[first].max(version[j]),
        });
      }
    }

    // drop dead clusters and renumber densely
    let mut reverse_renumbering = vec![u32::MAX; out.len()];
    let mut num_alive = 0;
    for i in 0..out.len() {
      if version[i] == 0 {
        continue;
      }
      reverse_renumbering[i] = num_alive as u32;
      out.swap(num_alive, i);
      num_alive += 1;
    }
    out.truncate(num_alive);
    for symbol in histogram_symbols.iter_mut() {
      *symbol = reverse_renumbering[renumbering[*symbol as usize] as usize];
    }
  }
  Ok(())
}
