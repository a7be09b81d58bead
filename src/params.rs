use crate::bit_writer::BitSink;
use crate::constants::Bitlen;
use crate::errors::{EntroError, EntroResult};
use crate::hybrid_uint::HybridUintConfig;

/// How hard to work at merging context histograms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusteringType {
  /// Only 4 clusters.
  Fastest,
  Fast,
  /// Also runs a pairwise merge phase driven by real table costs.
  Best,
}

/// How to pick each cluster's hybrid-uint config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HybridUintMethod {
  /// Keep the default config.
  None,
  /// Force the token-only `(0, 0, 0)` config.
  Fastest000,
  /// Try a handful of candidates.
  Fast,
  /// The fixed choice that suits context maps.
  ContextMap,
  /// Brute-force the full candidate catalogue.
  Best,
}

/// Which LZ77 pre-pass to run over the token streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lz77Method {
  None,
  /// Only run-length matches against the previous value.
  Rle,
  /// Greedy hash-chain matching with one-symbol lazy lookahead.
  Lz77,
  /// Shortest-path parse over all match lengths.
  Optimal,
}

/// Which quantization shifts to evaluate when normalizing a histogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnsHistogramStrategy {
  /// Only shifts 0, 6 and 12.
  Fast,
  /// Even shifts.
  Approximate,
  /// All shifts.
  Precise,
}

#[derive(Clone, Debug)]
pub struct HistogramParams {
  pub clustering: ClusteringType,
  pub uint_method: HybridUintMethod,
  pub lz77_method: Lz77Method,
  pub ans_histogram_strategy: AnsHistogramStrategy,
  /// Per-stream image widths; a non-zero width becomes the stream's LZ77
  /// distance multiplier, unlocking the 2D special distances.
  pub image_widths: Vec<usize>,
  pub max_histograms: usize,
  pub force_huffman: bool,
  /// Whether this call owns the model-wide decisions (prefix-vs-ANS,
  /// LZ77 enablement). Later streaming batches reuse the global state.
  pub initialize_global_state: bool,
  pub streaming_mode: bool,
  /// Visit every symbol in every context so later batches can code
  /// symbols unseen in the first one.
  pub add_missing_symbols: bool,
  /// Append a fixed flat histogram cluster usable by any later batch.
  pub add_fixed_histograms: bool,
  /// Force a deterministic single-cluster flat model over a power-of-two
  /// alphabet. For fuzzing only; release builds cannot set this.
  #[cfg(feature = "fuzzing")]
  pub ans_fuzzer_friendly: bool,
}

impl Default for HistogramParams {
  fn default() -> Self {
    Self {
      clustering: ClusteringType::Best,
      uint_method: HybridUintMethod::Best,
      lz77_method: Lz77Method::None,
      ans_histogram_strategy: AnsHistogramStrategy::Precise,
      image_widths: Vec::new(),
      max_histograms: usize::MAX,
      force_huffman: false,
      initialize_global_state: true,
      streaming_mode: false,
      add_missing_symbols: false,
      add_fixed_histograms: false,
      #[cfg(feature = "fuzzing")]
      ans_fuzzer_friendly: false,
    }
  }
}

impl HistogramParams {
  #[inline]
  pub(crate) fn fuzzer_friendly(&self) -> bool {
    #[cfg(feature = "fuzzing")]
    {
      self.ans_fuzzer_friendly
    }
    #[cfg(not(feature = "fuzzing"))]
    {
      false
    }
  }
}

/// LZ77 portion of the entropy model. `enabled`, `min_symbol` and
/// `min_length` are wire fields; the rest is encoder-side state.
#[derive(Clone, Debug)]
pub struct Lz77Params {
  pub enabled: bool,
  /// Symbols at or above this value in any context denote a length.
  pub min_symbol: u32,
  pub min_length: u32,
  pub length_uint_config: HybridUintConfig,
  /// Index of the synthetic context distance tokens are coded in.
  pub distance_context: u32,
}

impl Default for Lz77Params {
  fn default() -> Self {
    Self {
      enabled: false,
      min_symbol: 224,
      min_length: 3,
      length_uint_config: HybridUintConfig::new(0, 0, 0),
      distance_context: 0,
    }
  }
}

/// One alternative of a 4-way varint field: either a fixed value or a
/// raw-bit payload with an offset.
#[derive(Clone, Copy, Debug)]
enum U32Dist {
  Val(u32),
  BitsOffset(Bitlen, u32),
}

impl U32Dist {
  fn can_encode(&self, x: u32) -> bool {
    match *self {
      U32Dist::Val(v) => x == v,
      U32Dist::BitsOffset(n, off) => x >= off && (x - off) >> n == 0,
    }
  }

  fn payload_bits(&self) -> Bitlen {
    match *self {
      U32Dist::Val(_) => 0,
      U32Dist::BitsOffset(n, _) => n,
    }
  }
}

const MIN_SYMBOL_DISTS: [U32Dist; 4] = [
  U32Dist::Val(224),
  U32Dist::Val(512),
  U32Dist::BitsOffset(13, 512),
  U32Dist::BitsOffset(8, 656),
];
const MIN_LENGTH_DISTS: [U32Dist; 4] = [
  U32Dist::Val(3),
  U32Dist::Val(4),
  U32Dist::BitsOffset(2, 5),
  U32Dist::BitsOffset(8, 9),
];

/// Writes a 2-bit selector choosing the cheapest alternative that can
/// represent `x`, then the payload.
fn write_u32_selector<W: BitSink>(
  x: u32,
  dists: &[U32Dist; 4],
  writer: &mut W,
) -> EntroResult<()> {
  let mut best: Option<(usize, Bitlen)> = None;
  for (i, dist) in dists.iter().enumerate() {
    if !dist.can_encode(x) {
      continue;
    }
    let bits = dist.payload_bits();
    if best.map_or(true, |(_, b)| bits < b) {
      best = Some((i, bits));
    }
  }
  let (selector, _) = best.ok_or_else(|| {
    EntroError::invalid_input(format!(
      "{} is not representable by any field alternative",
      x
    ))
  })?;
  writer.write(selector as u64, 2);
  if let U32Dist::BitsOffset(n, off) = dists[selector] {
    writer.write((x - off) as u64, n);
  }
  Ok(())
}

impl Lz77Params {
  pub(crate) fn store<W: BitSink>(&self, writer: &mut W) -> EntroResult<()> {
    writer.write(self.enabled as u64, 1);
    if !self.enabled {
      return Ok(());
    }
    write_u32_selector(self.min_symbol, &MIN_SYMBOL_DISTS, writer)?;
    write_u32_selector(self.min_length, &MIN_LENGTH_DISTS, writer)?;
    Ok(())
  }
}
