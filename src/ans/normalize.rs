use std::sync::OnceLock;

use crate::bits;
use crate::constants::{Bitlen, HistBin, ANS_LOG_TAB_SIZE, ANS_TAB_SIZE, MAX_NUM_SYMBOLS_FOR_SMALL_CODE};
use crate::errors::{EntroError, EntroResult};

/// Number of count bits kept exactly for a bin whose floor-log2 is
/// `logcount`, under quantization `shift`.
#[inline]
pub(crate) fn population_count_precision(logcount: Bitlen, shift: Bitlen) -> Bitlen {
  let r = (logcount as i32).min(shift as i32 - ((ANS_LOG_TAB_SIZE - logcount) >> 1) as i32);
  r.max(0) as Bitlen
}

/// Log2 of the gap between `count` and its allowed-set neighbors.
#[inline]
pub(crate) fn smallest_increment_log(count: u32, shift: Bitlen) -> Bitlen {
  if count == 0 {
    return 0;
  }
  let bits = bits::floor_log2_nonzero(count);
  bits - population_count_precision(bits, shift)
}

/// Fixed-point log2 LUT: `lg2[i] = round(2^31 * log2(i) / 12)`.
pub(crate) fn lg2_lut() -> &'static [u32; ANS_TAB_SIZE + 1] {
  static LUT: OnceLock<[u32; ANS_TAB_SIZE + 1]> = OnceLock::new();
  LUT.get_or_init(|| {
    let mut lut = [0u32; ANS_TAB_SIZE + 1];
    // lg2[0] stays 0; fine for entropy sums
    for (i, entry) in lut.iter_mut().enumerate().skip(1) {
      *entry =
        ((i as f64).log2() / ANS_LOG_TAB_SIZE as f64 * (1u64 << 31) as f64).round() as u32;
    }
    lut
  })
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CountsEntropy {
  // allowed value of a histogram bin
  pub count: HistBin,
  // log2 of the step up to the next larger allowed value
  pub step_log: Bitlen,
  // fixed-point entropy delta to the next larger allowed value
  pub delta_lg2: i32,
}

/// Per-shift tables of allowed counts, sorted by decreasing count, with a
/// forbidding sentinel after the smallest one. Excluding single-bin
/// histograms beforehand caps counts at 4095, which also makes shifts 11
/// and 12 identical.
pub(crate) fn allowed_counts() -> &'static Vec<Vec<CountsEntropy>> {
  static TABLES: OnceLock<Vec<Vec<CountsEntropy>>> = OnceLock::new();
  TABLES.get_or_init(|| {
    let mut tables = Vec::with_capacity(ANS_LOG_TAB_SIZE as usize);
    for shift in 0..ANS_LOG_TAB_SIZE {
      let mut ac = vec![CountsEntropy::default(); ANS_TAB_SIZE];
      for i in 1..ANS_TAB_SIZE as u32 {
        let cnt = i & !((1u32 << smallest_increment_log(i, shift)) - 1);
        ac[cnt as usize].count = cnt as HistBin;
      }
      ac.sort_by(|a, b| b.count.cmp(&a.count));
      let mut ind = 1;
      while ac[ind].count > 0 {
        ac[ind].delta_lg2 = ((ac[ind - 1].count as f64 / ac[ind].count as f64).log2()
          / ANS_LOG_TAB_SIZE as f64
          * (1u64 << 31) as f64)
          .round() as i32;
        ac[ind].step_log =
          bits::floor_log2_nonzero((ac[ind - 1].count - ac[ind].count) as u32);
        ind += 1;
      }
      // guards against non-possible steps: at the max value [0] stays 0
      // (by init), past the min value everything is forbidden
      ac[ind].delta_lg2 = i32::MAX;
      tables.push(ac);
    }
    tables
  })
}

#[derive(Clone, Copy, Debug)]
struct EntropyDelta {
  // initial count
  freq: HistBin,
  // index of the bin's current value in the allowed-counts table
  count_ind: usize,
  // index of the bin in `counts`
  bin_ind: usize,
}

#[inline]
fn delta_entropy_inc(a: &EntropyDelta, ac: &[CountsEntropy], balance_inc: &[i64]) -> i64 {
  a.freq as i64 * ac[a.count_ind].delta_lg2 as i64
    - balance_inc[ac[a.count_ind].step_log as usize]
}

#[inline]
fn delta_entropy_dec(a: &EntropyDelta, ac: &[CountsEntropy], balance_dec: &[i64]) -> i64 {
  a.freq as i64 * ac[a.count_ind + 1].delta_lg2 as i64
    - balance_dec[ac[a.count_ind + 1].step_log as usize]
}

// Entropy increase per unit of histogram bin change. Truncation is OK,
// accuracy is still better than float.
#[inline]
fn inc_key(a: &EntropyDelta, ac: &[CountsEntropy], balance_inc: &[i64]) -> i64 {
  delta_entropy_inc(a, ac, balance_inc) >> ac[a.count_ind].step_log
}

#[inline]
fn dec_key(a: &EntropyDelta, ac: &[CountsEntropy], balance_dec: &[i64]) -> i64 {
  delta_entropy_dec(a, ac, balance_dec) >> ac[a.count_ind + 1].step_log
}

// We grow/shrink the histogram step by step trying to maximize total
// entropy, i.e. the sum of `freq[n] * lg2[counts[n]]` with a fixed sum of
// `counts[n]` chosen from `allowed_counts[shift]`. The sum is balanced by
// the count in the histogram's highest bin. We start close to a correct
// solution and each round take the step with the best entropy increase
// per unit of bin change. The greedy scheme is not guaranteed to reach
// the global maximum but cannot produce an invalid histogram. Sums of
// `freq` and each `lg2[count]` fit i32, so their products' sums fit i64.
pub(crate) fn rebalance_histogram(
  total: HistBin,
  max_symbol: usize,
  shift: Bitlen,
  counts: &mut [HistBin],
) -> EntroResult<usize> {
  let table_size = ANS_TAB_SIZE as HistBin;
  debug_assert!(max_symbol > 0);
  debug_assert!(max_symbol <= ANS_TAB_SIZE);
  // shift 12 snaps counts exactly like shift 11
  let shift = shift.min(ANS_LOG_TAB_SIZE - 1);

  let lg2 = lg2_lut();
  let ac = &allowed_counts()[shift as usize];

  // entropy change in the balancing bin per step size; a step of size
  // 1 << (ANS_LOG_TAB_SIZE - 1) is not possible
  let mut balance_inc = [0i64; (ANS_LOG_TAB_SIZE - 1) as usize];
  let mut balance_dec = [0i64; (ANS_LOG_TAB_SIZE - 1) as usize];

  // bins that stay adjustable through the allowed-counts table
  let mut bins: Vec<EntropyDelta> = Vec::with_capacity(256);

  let norm = table_size as f64 / total as f64;

  let mut remainder_pos = 0usize; // highest bin, used for balancing
  let mut max_freq: i64 = 0;
  let mut rest = table_size; // reserve of histogram counts to distribute
  for n in 0..max_symbol {
    let freq = counts[n];
    if freq as i64 > max_freq {
      remainder_pos = n;
      max_freq = freq as i64;
    }

    let target = freq as f64 * norm;
    // keep zeros and clamp nonzero counts to [1, table_size)
    let mut count = (target.round() as HistBin).max((freq > 0) as HistBin);
    count = count.min(table_size - 1);
    let inc: HistBin = 1 << smallest_increment_log(count as u32, shift);
    count &= !(inc - 1);

    counts[n] = count;
    rest -= count;
    if target > 1.0 {
      let mut count_ind = 0;
      while ac[count_ind].count != count {
        count_ind += 1;
      }
      bins.push(EntropyDelta {
        freq,
        count_ind,
        bin_ind: n,
      });
    }
  }

  // the balancing bin is not adjustable through the allowed-counts table
  if let Some(pos) = bins.iter().position(|a| a.bin_ind == remainder_pos) {
    bins.remove(pos);
  }
  // from here on `rest` is the height of the balancing bin; it may dip
  // negative but gets tracted back into the positive domain below
  rest += counts[remainder_pos];

  if !bins.is_empty() {
    let max_log = ac[1].step_log;
    loop {
      // update balancing-bin penalties, setting guards and tractors
      for log in 0..=max_log {
        let delta: HistBin = 1 << log;
        let (inc_penalty, dec_penalty) = if rest >= table_size {
          // tract large `rest` into the allowed domain:
          // permit all inc steps, forbid all dec steps
          (0, 0)
        } else if rest > 1 {
          // `rest` is OK, guard against non-possible steps
          let inc = if rest > delta {
            max_freq * (lg2[rest as usize] as i64 - lg2[(rest - delta) as usize] as i64)
          } else {
            i64::MAX // forbidden
          };
          let dec = if rest + delta < table_size {
            max_freq * (lg2[(rest + delta) as usize] as i64 - lg2[rest as usize] as i64)
          } else {
            0 // forbidden
          };
          (inc, dec)
        } else {
          // tract non-positive `rest` into the positive domain:
          // forbid all inc steps, permit all dec steps
          (i64::MAX, i64::MAX)
        };
        balance_inc[log as usize] = inc_penalty;
        balance_dec[log as usize] = dec_penalty;
      }
      // try to increase entropy
      let mut best_inc = 0;
      for i in 1..bins.len() {
        if inc_key(&bins[i], ac, &balance_inc) > inc_key(&bins[best_inc], ac, &balance_inc) {
          best_inc = i;
        }
      }
      if delta_entropy_inc(&bins[best_inc], ac, &balance_inc) > 0 {
        // grow the bin with the best entropy increase
        let e = &mut bins[best_inc];
        rest -= 1 << ac[e.count_ind].step_log;
        e.count_ind -= 1;
      } else {
        // this still means entropy strictly increases each step (or
        // `rest` is tracted toward the positive domain), so the loop
        // terminates
        let mut best_dec = 0;
        for i in 1..bins.len() {
          if dec_key(&bins[i], ac, &balance_dec) < dec_key(&bins[best_dec], ac, &balance_dec) {
            best_dec = i;
          }
        }
        if delta_entropy_dec(&bins[best_dec], ac, &balance_dec) >= 0 {
          break;
        }
        let e = &mut bins[best_dec];
        e.count_ind += 1;
        rest += 1 << ac[e.count_ind].step_log;
      }
    }
    // set all counts besides the balancing bin
    for a in &bins {
      counts[a.bin_ind] = ac[a.count_ind].count;
    }

    // The scheme needs room to grow the balancing bin's logcount. If some
    // earlier bin already uses the full 12-bit width, swap roles with it;
    // both bins are near 2048 then, so the histogram stays close.
    for n in 0..remainder_pos {
      if counts[n] >= table_size / 2 {
        counts[remainder_pos] = counts[n];
        remainder_pos = n;
        break;
      }
    }
  }
  // set the balancing bin
  counts[remainder_pos] = rest;

  if rest > 0 {
    Ok(remainder_pos)
  } else {
    Err(EntroError::invariant(
      "histogram rebalance left a non-positive balancing bin",
    ))
  }
}

pub(crate) struct NormalizedCounts {
  pub omit_pos: usize,
  pub num_symbols: usize,
  pub symbols: [usize; MAX_NUM_SYMBOLS_FOR_SMALL_CODE],
}

/// Rescales `counts[..length]` to sum to exactly `ANS_TAB_SIZE`, with
/// every non-zero count in the allowed set for `shift`. Alphabets of 0 or
/// 1 symbols are handled directly and report the symbols seen so callers
/// can take the small-code path.
pub(crate) fn normalize_counts(
  counts: &mut [HistBin],
  length: usize,
  shift: Bitlen,
) -> EntroResult<NormalizedCounts> {
  let mut symbols = [0usize; MAX_NUM_SYMBOLS_FOR_SMALL_CODE];
  let mut max_symbol = 0;
  let mut symbol_count = 0;
  let mut total: HistBin = 0;
  for n in 0..length {
    if counts[n] > 0 {
      if symbol_count < MAX_NUM_SYMBOLS_FOR_SMALL_CODE {
        symbols[symbol_count] = n;
      }
      symbol_count += 1;
      max_symbol = n + 1;
      total += counts[n];
    }
  }
  if symbol_count == 0 {
    return Ok(NormalizedCounts {
      omit_pos: 0,
      num_symbols: 0,
      symbols,
    });
  }
  if symbol_count == 1 {
    counts[symbols[0]] = ANS_TAB_SIZE as HistBin;
    return Ok(NormalizedCounts {
      omit_pos: 0,
      num_symbols: 1,
      symbols,
    });
  }
  if symbol_count > ANS_TAB_SIZE || max_symbol > ANS_TAB_SIZE {
    return Err(EntroError::invalid_input(
      "too many entries in an ANS histogram",
    ));
  }

  let omit_pos = rebalance_histogram(total, max_symbol, shift, counts)?;
  Ok(NormalizedCounts {
    omit_pos,
    num_symbols: symbol_count,
    symbols,
  })
}
