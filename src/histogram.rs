use crate::ans::encoding::ans_population_cost;
use crate::bits;
use crate::constants::HistBin;
use crate::errors::EntroResult;

/// Alphabets are padded up to a multiple of this.
pub(crate) const HISTOGRAM_ROUNDING: usize = 8;

/// Dense symbol counts for one context or cluster.
#[derive(Clone, Debug, Default)]
pub struct Histogram {
  pub data: Vec<HistBin>,
  pub total_count: usize,
  // cached Shannon entropy in bits; refresh with update_entropy
  pub entropy: f32,
}

impl Histogram {
  pub fn clear(&mut self) {
    self.data.clear();
    self.total_count = 0;
    self.entropy = 0.0;
  }

  pub fn add(&mut self, symbol: usize) {
    if self.data.len() <= symbol {
      self
        .data
        .resize(bits::ceil_div(symbol + 1, HISTOGRAM_ROUNDING) * HISTOGRAM_ROUNDING, 0);
    }
    self.data[symbol] += 1;
    self.total_count += 1;
  }

  pub fn add_histogram(&mut self, other: &Histogram) {
    if other.data.len() > self.data.len() {
      self.data.resize(other.data.len(), 0);
    }
    for (i, &count) in other.data.iter().enumerate() {
      self.data[i] += count;
    }
    self.total_count += other.total_count;
  }

  /// Alphabet size with trailing zero counts trimmed.
  pub fn alphabet_size(&self) -> usize {
    let mut a = self.data.len();
    while a > 0 && self.data[a - 1] == 0 {
      a -= 1;
    }
    a
  }

  /// `sum count * log2(total / count)` over non-zero bins.
  pub fn shannon_entropy(&self) -> f32 {
    let mut acc = 0.0f32;
    for &count in &self.data {
      if count > 0 {
        acc -= count as f32 * (count as f32).log2();
      }
    }
    if self.total_count > 0 {
      acc += self.total_count as f32 * (self.total_count as f32).log2();
    }
    acc
  }

  pub fn update_entropy(&mut self) {
    self.entropy = self.shannon_entropy();
  }

  /// Estimated bits to store this histogram as an ANS table plus code its
  /// data with it.
  pub fn population_cost(&self) -> EntroResult<f32> {
    ans_population_cost(&self.data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_add_pads_alphabet() {
    let mut h = Histogram::default();
    h.add(0);
    h.add(9);
    h.add(9);
    assert_eq!(h.data.len(), 16);
    assert_eq!(h.alphabet_size(), 10);
    assert_eq!(h.total_count, 3);
  }

  #[test]
  fn test_shannon_entropy() {
    let mut h = Histogram::default();
    for _ in 0..4 {
      h.add(0);
      h.add(1);
    }
    // uniform over 2 symbols: 1 bit each
    assert!((h.shannon_entropy() - 8.0).abs() < 1e-4);

    let mut h = Histogram::default();
    for _ in 0..8 {
      h.add(3);
    }
    assert!(h.shannon_entropy().abs() < 1e-4);
  }

  #[test]
  fn test_add_histogram() {
    let mut a = Histogram::default();
    a.add(1);
    let mut b = Histogram::default();
    b.add(12);
    b.add(1);
    a.add_histogram(&b);
    assert_eq!(a.total_count, 3);
    assert_eq!(a.data[1], 2);
    assert_eq!(a.data[12], 1);
    assert_eq!(a.alphabet_size(), 13);
  }
}
