use crate::ans::alias::{alias_lookup, create_flat_histogram, init_alias_table, AliasEntry};
use crate::ans::normalize::{lg2_lut, normalize_counts, population_count_precision};
use crate::bit_writer::{BitSink, BitWriter, SizeWriter};
use crate::bits;
use crate::constants::{
  Bitlen, HistBin, ANS_LOG_TAB_SIZE, ANS_MAX_ALPHABET_SIZE, ANS_SIGNATURE, ANS_TAB_SIZE,
  LOG_COUNT_BIT_LENGTHS, LOG_COUNT_SYMBOLS, MAX_NUM_SYMBOLS_FOR_SMALL_CODE,
};
use crate::errors::{EntroError, EntroResult, ErrorKind};
use crate::params::AnsHistogramStrategy;

/// Per-symbol entry of a built code table. The ANS path uses
/// `freq`/`reverse_map`, the prefix path `depth`/`bits`.
#[derive(Clone, Debug, Default)]
pub struct EncSymbolInfo {
  pub freq: u16,
  pub reverse_map: Vec<u16>,
  pub depth: u8,
  pub bits: u16,
}

/// rANS encoder state machine. Symbols are fed in reverse stream order;
/// renormalization bits are handed back because they too must land in the
/// stream reversed.
#[derive(Clone, Debug)]
pub struct AnsCoder {
  state: u32,
}

impl Default for AnsCoder {
  fn default() -> Self {
    Self::new()
  }
}

impl AnsCoder {
  pub fn new() -> Self {
    Self {
      state: ANS_SIGNATURE << 16,
    }
  }

  /// Returns `(bits, nbits)` to emit before this symbol in decode order.
  #[inline]
  pub fn put_symbol(&mut self, info: &EncSymbolInfo) -> (u32, Bitlen) {
    let freq = info.freq as u32;
    debug_assert!(freq > 0);
    let mut bits = 0;
    let mut nbits = 0;
    if (self.state >> (32 - ANS_LOG_TAB_SIZE)) >= freq {
      bits = self.state & 0xffff;
      self.state >>= 16;
      nbits = 16;
    }
    self.state = ((self.state / freq) << ANS_LOG_TAB_SIZE)
      + info.reverse_map[(self.state % freq) as usize] as u32;
    (bits, nbits)
  }

  pub fn state(&self) -> u32 {
    self.state
  }
}

/// Fills `freq` and `reverse_map` for every symbol from normalized counts
/// and their alias table. `reverse_map[s][offset]` is the table slot the
/// decoder must land on to produce `(s, offset)`.
pub(crate) fn build_info_table(
  counts: &[HistBin],
  table: &[AliasEntry],
  alphabet_size: usize,
  log_alpha_size: Bitlen,
  info: &mut [EncSymbolInfo],
) {
  let log_entry_size = ANS_LOG_TAB_SIZE - log_alpha_size;
  let entry_size_minus_1 = (1u32 << log_entry_size) - 1;
  // keep a valid table even for empty streams
  for (s, entry) in info.iter_mut().enumerate().take(alphabet_size.max(1)) {
    let freq = if s == alphabet_size {
      ANS_TAB_SIZE as HistBin
    } else {
      counts[s]
    };
    entry.freq = freq as u16;
    entry.reverse_map = vec![0; freq as usize];
  }
  for i in 0..ANS_TAB_SIZE as u32 {
    let s = alias_lookup(table, i, log_entry_size, entry_size_minus_1);
    info[s.value].reverse_map[s.offset as usize] = i as u16;
  }
}

pub(crate) fn store_varlen_u8<W: BitSink>(n: usize, writer: &mut W) {
  debug_assert!(n <= 255);
  if n == 0 {
    writer.write(0, 1);
  } else {
    writer.write(1, 1);
    let nbits = bits::floor_log2_nonzero(n as u32);
    writer.write(nbits as u64, 3);
    writer.write(n as u64 - (1 << nbits), nbits);
  }
}

pub(crate) fn store_varlen_u16<W: BitSink>(n: usize, writer: &mut W) {
  debug_assert!(n <= 65535);
  if n == 0 {
    writer.write(0, 1);
  } else {
    writer.write(1, 1);
    let nbits = bits::floor_log2_nonzero(n as u32);
    writer.write(nbits as u64, 4);
    writer.write(n as u64 - (1 << nbits), nbits);
  }
}

/// Serializes normalized counts: small-tree path for 1-2 symbols,
/// otherwise the shift code, run structure, logcounts under the static
/// code with an RLE escape, then precision refinement bits.
pub(crate) fn encode_counts<W: BitSink>(
  counts: &[HistBin],
  alphabet_size: usize,
  omit_pos: usize,
  num_symbols: usize,
  shift: Bitlen,
  symbols: &[usize; MAX_NUM_SYMBOLS_FOR_SMALL_CODE],
  writer: &mut W,
) -> EntroResult<()> {
  if num_symbols <= 2 {
    // small tree marker, 1-2 literal symbols
    writer.write(1, 1);
    if num_symbols == 0 {
      writer.write(0, 1);
      store_varlen_u8(0, writer);
    } else {
      writer.write(num_symbols as u64 - 1, 1);
      for &symbol in symbols.iter().take(num_symbols) {
        store_varlen_u8(symbol, writer);
      }
    }
    if num_symbols == 2 {
      writer.write(counts[symbols[0]] as u64, ANS_LOG_TAB_SIZE);
    }
    return Ok(());
  }

  // mark non-small tree, non-flat histogram
  writer.write(0, 1);
  writer.write(0, 1);

  // Elias-gamma-like code for the shift; when the bit count equals the
  // upper bound, the terminating zero of the unary part is dropped
  let upper_bound_log = bits::floor_log2_nonzero(ANS_LOG_TAB_SIZE + 1);
  let log = bits::floor_log2_nonzero(shift + 1);
  writer.write((1u64 << log) - 1, log);
  if log != upper_bound_log {
    writer.write(0, 1);
  }
  writer.write((((1u32 << log) - 1) & (shift + 1)) as u64, log);

  // Run lengths of identical counts, stored at the first index of each
  // run. Runs may not include omit_pos: its logcount is not the true one
  // and refinements would go wrong in the decoder.
  let mut same = vec![0u32; alphabet_size];
  let mut last = 0usize;
  for i in 1..alphabet_size {
    if i == omit_pos || i == omit_pos + 1 || counts[i] != counts[last] {
      same[last] = (i - last) as u32;
      last = i;
    }
  }
  let length = if counts[last] != 0 {
    same[last] = (alphabet_size - last) as u32;
    alphabet_size
  } else {
    // exclude the trailing zero run
    last
  };

  // num_symbols >= 3 implies length >= 3, and the check keeps every
  // same[i] storable as a varlen u8
  if length - 3 > 255 {
    return Err(EntroError::rejected(
      "count runs do not fit the histogram format",
    ));
  }
  store_varlen_u8(length - 3, writer);

  let mut logcounts = vec![-1i32; length];
  // The omit_pos logcount must be the first maximum of the array so the
  // decoder can find it; 9 has the shortest static code among candidates.
  let mut omit_log = 9i32;
  for (i, logcount) in logcounts.iter_mut().enumerate() {
    debug_assert!(counts[i] <= ANS_TAB_SIZE as HistBin);
    debug_assert!(counts[i] >= 0);
    if i != omit_pos && counts[i] > 0 {
      *logcount = bits::floor_log2_nonzero(counts[i] as u32) as i32;
      omit_log = omit_log.max(*logcount + (i < omit_pos) as i32);
    }
  }
  logcounts[omit_pos] = omit_log;

  const MIN_REPS: u32 = 4;
  const RLE: usize = ANS_LOG_TAB_SIZE as usize + 1;
  let mut i = 0;
  while i < length {
    let ix = (logcounts[i] + 1) as usize;
    writer.write(
      LOG_COUNT_SYMBOLS[ix] as u64,
      LOG_COUNT_BIT_LENGTHS[ix] as Bitlen,
    );
    if same[i] > MIN_REPS {
      // encode the RLE escape and skip the repeated symbols
      writer.write(
        LOG_COUNT_SYMBOLS[RLE] as u64,
        LOG_COUNT_BIT_LENGTHS[RLE] as Bitlen,
      );
      store_varlen_u8((same[i] - MIN_REPS - 1) as usize, writer);
      i += same[i] as usize - 1;
    }
    i += 1;
  }
  if shift != 0 {
    // otherwise every bitcount is 0
    let mut i = 0;
    while i < length {
      if logcounts[i] > 0 && i != omit_pos {
        let bitcount = population_count_precision(logcounts[i] as Bitlen, shift);
        let drop_bits = logcounts[i] as Bitlen - bitcount;
        debug_assert_eq!(counts[i] & ((1 << drop_bits) - 1), 0);
        writer.write(
          ((counts[i] >> drop_bits) - (1 << bitcount)) as u64,
          bitcount,
        );
      }
      if same[i] > MIN_REPS {
        i += same[i] as usize - 1;
      }
      i += 1;
    }
  }
  Ok(())
}

pub(crate) fn encode_flat_histogram<W: BitSink>(alphabet_size: usize, writer: &mut W) {
  // non-small tree, uniform histogram
  writer.write(0, 1);
  writer.write(1, 1);
  debug_assert!(alphabet_size > 0);
  store_varlen_u8(alphabet_size - 1, writer);
}

/// `sum histogram[i] * (12 - log2(counts[i]))` via the fixed-point LUT.
fn estimate_data_bits(histogram: &[HistBin], counts: &[HistBin]) -> f32 {
  let lg2 = lg2_lut();
  let mut sum: i64 = 0;
  let mut total_histogram: i64 = 0;
  for (&h, &c) in histogram.iter().zip(counts) {
    total_histogram += h as i64;
    if h > 0 {
      debug_assert!(c > 0);
    }
    sum += h as i64 * lg2[c as usize] as i64;
  }
  ((total_histogram as f64 - sum as f64 / (1u64 << 31) as f64) * ANS_LOG_TAB_SIZE as f64) as f32
}

fn estimate_data_bits_flat(histogram: &[HistBin], len: usize) -> f32 {
  let lg2 = lg2_lut();
  let flat_bits = lg2[len] as i64 * ANS_LOG_TAB_SIZE as i64;
  let total_histogram: i64 = histogram.iter().map(|&h| h as i64).sum();
  ((total_histogram * flat_bits) as f64 / (1u64 << 31) as f64) as f32
}

/// Bits to store the histogram with `method` (0 = flat, else shift + 1)
/// plus the estimated bits to code its data. Infinite when the counts
/// cannot be serialized under this method.
fn compute_histo_and_data_cost(
  histogram: &[HistBin],
  mut alphabet_size: usize,
  method: u32,
) -> EntroResult<f32> {
  while alphabet_size > 0 && histogram[alphabet_size - 1] == 0 {
    alphabet_size -= 1;
  }
  if method == 0 {
    return Ok(
      (ANS_LOG_TAB_SIZE + 2) as f32 + estimate_data_bits_flat(&histogram[..alphabet_size], alphabet_size),
    );
  }
  let shift = method - 1;
  let mut counts = histogram[..alphabet_size].to_vec();
  let norm = normalize_counts(&mut counts, alphabet_size, shift)?;
  let mut writer = SizeWriter::default();
  match encode_counts(
    &counts,
    alphabet_size,
    norm.omit_pos,
    norm.num_symbols,
    shift,
    &norm.symbols,
    &mut writer,
  ) {
    Ok(()) => Ok(writer.size as f32 + estimate_data_bits(&histogram[..alphabet_size], &counts)),
    // not representable with this shift; selection falls back elsewhere
    Err(e) if e.kind == ErrorKind::EncodingRejected => Ok(f32::MAX),
    Err(e) => Err(e),
  }
}

/// Picks the cheapest method among flat and the strategy's shifts.
pub(crate) fn compute_best_method(
  histogram: &[HistBin],
  alphabet_size: usize,
  strategy: AnsHistogramStrategy,
) -> EntroResult<(u32, f32)> {
  let mut method = 0u32;
  let mut fcost = compute_histo_and_data_cost(histogram, alphabet_size, 0)?;
  let mut try_shift = |shift: u32, method: &mut u32, fcost: &mut f32| -> EntroResult<()> {
    let c = compute_histo_and_data_cost(histogram, alphabet_size, shift + 1)?;
    if c < *fcost {
      *method = shift + 1;
      *fcost = c;
    }
    Ok(())
  };
  match strategy {
    AnsHistogramStrategy::Precise => {
      for shift in 0..ANS_LOG_TAB_SIZE {
        try_shift(shift, &mut method, &mut fcost)?;
      }
    }
    AnsHistogramStrategy::Approximate => {
      let mut shift = 0;
      while shift <= ANS_LOG_TAB_SIZE {
        try_shift(shift, &mut method, &mut fcost)?;
        shift += 2;
      }
    }
    AnsHistogramStrategy::Fast => {
      for shift in [0, ANS_LOG_TAB_SIZE / 2, ANS_LOG_TAB_SIZE] {
        try_shift(shift, &mut method, &mut fcost)?;
      }
    }
  }
  Ok((method, fcost))
}

/// Estimated cost of storing this histogram as an ANS table and coding
/// its data with it; infinite for alphabets an ANS table cannot hold.
pub(crate) fn ans_population_cost(data: &[HistBin]) -> EntroResult<f32> {
  if data.len() > ANS_MAX_ALPHABET_SIZE {
    return Ok(f32::MAX);
  }
  compute_best_method(data, data.len(), AnsHistogramStrategy::Fast).map(|(_, cost)| cost)
}

/// Builds the symbol table for one cluster and, if a writer is given,
/// stores its serialized form. Returns an estimate of the cost of the
/// histogram plus the data coded with it.
pub(crate) fn build_and_store_ans_encoding_data(
  strategy: AnsHistogramStrategy,
  histogram: &[HistBin],
  alphabet_size: usize,
  log_alpha_size: Bitlen,
  use_prefix_code: bool,
  info: &mut [EncSymbolInfo],
  writer: Option<&mut BitWriter>,
) -> EntroResult<usize> {
  if use_prefix_code {
    if alphabet_size <= 1 {
      return Ok(0);
    }
    let mut histo = vec![0u32; alphabet_size];
    for i in 0..alphabet_size {
      if histogram[i] < 0 {
        return Err(EntroError::invariant("negative count in a prefix histogram"));
      }
      histo[i] = histogram[i] as u32;
    }
    let mut depths = vec![0u8; alphabet_size];
    let mut code_bits = vec![0u16; alphabet_size];
    let mut cost = match writer {
      None => {
        let mut tmp_writer = BitWriter::default();
        crate::prefix::build_and_store_prefix_code(&histo, &mut depths, &mut code_bits, &mut tmp_writer)?;
        tmp_writer.bit_size()
      }
      Some(writer) => {
        let start = writer.bit_size();
        crate::prefix::build_and_store_prefix_code(&histo, &mut depths, &mut code_bits, writer)?;
        writer.bit_size() - start
      }
    };
    for i in 0..alphabet_size {
      info[i].bits = if depths[i] == 0 { 0 } else { code_bits[i] };
      info[i].depth = depths[i];
      // estimated data cost
      cost += histogram[i] as usize * depths[i] as usize;
    }
    return Ok(cost);
  }

  if alphabet_size > ANS_TAB_SIZE {
    return Err(EntroError::invalid_input(
      "alphabet does not fit an ANS table",
    ));
  }
  let (method, fcost) = compute_best_method(histogram, alphabet_size, strategy)?;
  debug_assert!(fcost >= 0.0);

  let mut counts = histogram[..alphabet_size].to_vec();
  if !counts.is_empty() {
    let sum: i64 = counts.iter().map(|&c| c as i64).sum();
    if sum == 0 {
      counts[0] = ANS_TAB_SIZE as HistBin;
    }
  }
  let mut omit_pos = 0;
  let mut num_symbols = 0;
  let mut symbols = [0usize; MAX_NUM_SYMBOLS_FOR_SMALL_CODE];
  if method == 0 {
    if alphabet_size == 0 {
      return Err(EntroError::invariant("flat histogram over an empty alphabet"));
    }
    counts = create_flat_histogram(alphabet_size, ANS_TAB_SIZE as u32);
  } else {
    let norm = normalize_counts(&mut counts, alphabet_size, method - 1)?;
    omit_pos = norm.omit_pos;
    num_symbols = norm.num_symbols;
    symbols = norm.symbols;
  }
  let table = init_alias_table(&counts, ANS_TAB_SIZE as u32, log_alpha_size)?;
  build_info_table(&counts, &table, alphabet_size, log_alpha_size, info);
  if let Some(writer) = writer {
    if method == 0 {
      encode_flat_histogram(alphabet_size, writer);
    } else {
      encode_counts(
        &counts,
        alphabet_size,
        omit_pos,
        num_symbols,
        method - 1,
        &symbols,
        writer,
      )?;
    }
  }
  Ok(fcost as usize)
}
