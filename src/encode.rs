use crate::ans::encoding::{
  build_and_store_ans_encoding_data, store_varlen_u16, AnsCoder, EncSymbolInfo,
};
use crate::ans::alias::create_flat_histogram;
use crate::bit_writer::{BitWriter, SizeWriter, MAX_BITS_PER_CALL};
use crate::bits;
use crate::constants::{
  Bitlen, ANS_MAX_ALPHABET_SIZE, ANS_TAB_SIZE, CLUSTERS_LIMIT, PREFIX_MAX_BITS,
};
use crate::context_map::encode_context_map;
use crate::cluster::cluster_histograms;
use crate::errors::{EntroError, EntroResult};
use crate::histogram::{Histogram, HISTOGRAM_ROUNDING};
use crate::hybrid_uint::{store_uint_configs, HybridUintConfig};
use crate::lz77::apply_lz77;
use crate::params::{ClusteringType, HistogramParams, HybridUintMethod, Lz77Params};
use crate::token::Token;

/// The built entropy model: everything a token writer needs, plus the
/// serialized per-cluster histograms for streaming re-emission.
#[derive(Clone, Debug, Default)]
pub struct EntropyEncodingData {
  pub lz77: Lz77Params,
  pub use_prefix_code: bool,
  /// Log2 of the ANS symbol alphabet the tables were built for.
  pub log_alpha_size: Bitlen,
  pub uint_config: Vec<HybridUintConfig>,
  pub encoding_info: Vec<Vec<EncSymbolInfo>>,
  pub encoded_histograms: Vec<BitWriter>,
}

/// Collects per-context symbol counts.
pub(crate) struct HistogramBuilder {
  histograms: Vec<Histogram>,
}

impl HistogramBuilder {
  pub fn new(num_contexts: usize) -> Self {
    Self {
      histograms: vec![Histogram::default(); num_contexts],
    }
  }

  pub fn visit_symbol(&mut self, symbol: usize, histo_idx: usize) {
    debug_assert!(histo_idx < self.histograms.len());
    self.histograms[histo_idx].add(symbol);
  }

  pub fn histo(&self, i: usize) -> &Histogram {
    &self.histograms[i]
  }

  fn num_contexts(&self) -> usize {
    self.histograms.len()
  }

  /// Clusters the collected histograms, selects per-cluster uint configs,
  /// builds the symbol tables, and stores the model (unless cost-only).
  /// Returns the model cost in bits.
  fn build_and_store_entropy_codes(
    &self,
    params: &HistogramParams,
    tokens: &[Vec<Token>],
    codes: &mut EntropyEncodingData,
    context_map: &mut Vec<u8>,
    mut writer: Option<&mut BitWriter>,
  ) -> EntroResult<usize> {
    let prev_histograms = codes.encoding_info.len();
    let mut clustered_histograms: Vec<Histogram> = codes
      .encoding_info
      .iter()
      .map(|info| histogram_from_symbol_info(info, codes.use_prefix_code))
      .collect();
    let context_offset = context_map.len();
    context_map.resize(context_offset + self.num_contexts(), 0);
    if self.num_contexts() > 1 {
      if !params.fuzzer_friendly() {
        let mut histogram_symbols = Vec::new();
        cluster_histograms(
          params,
          &self.histograms,
          CLUSTERS_LIMIT,
          &mut clustered_histograms,
          &mut histogram_symbols,
        )?;
        for (c, &symbol) in histogram_symbols.iter().enumerate() {
          context_map[context_offset + c] = symbol as u8;
        }
      } else {
        debug_assert!(codes.encoding_info.is_empty());
        context_map.iter_mut().for_each(|entry| *entry = 0);
        let max_symbol = self
          .histograms
          .iter()
          .map(|h| h.data.len())
          .max()
          .unwrap_or(0);
        let num_symbols = 1usize << bits::ceil_log2_nonzero(max_symbol as u32 + 1);
        clustered_histograms = vec![Histogram::default()];
        for i in 0..num_symbols {
          clustered_histograms[0].add(i);
        }
      }
      if let Some(writer) = writer.as_deref_mut() {
        encode_context_map(context_map, clustered_histograms.len(), writer)?;
      }
    } else {
      debug_assert!(codes.encoding_info.is_empty());
      clustered_histograms.push(self.histograms[0].clone());
    }

    let mut log_alpha_size: Bitlen = if codes.lz77.enabled { 8 } else { 7 }; // sane default
    if params.fuzzer_friendly() {
      codes.uint_config = vec![HybridUintConfig::new(7, 0, 0)];
    } else {
      choose_uint_configs(
        params,
        tokens,
        context_map,
        &mut clustered_histograms,
        codes,
        &mut log_alpha_size,
      )?;
    }
    if params.streaming_mode {
      log_alpha_size = 8;
    }

    let mut size_writer = SizeWriter::default(); // estimates when cost-only
    let mut cost = 1usize;
    if let Some(writer) = writer.as_deref_mut() {
      writer.write_uint(codes.use_prefix_code as u64, 1);
    }
    if codes.use_prefix_code {
      log_alpha_size = PREFIX_MAX_BITS;
    } else {
      cost += 2;
    }
    match writer.as_deref_mut() {
      None => store_uint_configs(&codes.uint_config, &mut size_writer, log_alpha_size),
      Some(writer) => {
        if !codes.use_prefix_code {
          writer.write_uint((log_alpha_size - 5) as u64, 2);
        }
        store_uint_configs(&codes.uint_config, writer, log_alpha_size);
      }
    }
    if codes.use_prefix_code {
      for histo in &clustered_histograms {
        let alphabet_size = histo.alphabet_size().max(1);
        match writer.as_deref_mut() {
          Some(writer) => store_varlen_u16(alphabet_size - 1, writer),
          None => store_varlen_u16(alphabet_size - 1, &mut size_writer),
        }
      }
    }
    cost += size_writer.size;

    codes.log_alpha_size = log_alpha_size;
    let use_prefix_code = codes.use_prefix_code;
    for c in prev_histograms..clustered_histograms.len() {
      let alphabet_size = clustered_histograms[c].alphabet_size().max(1);
      codes
        .encoding_info
        .push(vec![EncSymbolInfo::default(); alphabet_size]);
      let info = codes.encoding_info.last_mut().unwrap();
      let reservation = 256 + alphabet_size * 24;
      let mut ans_cost = 0;
      if params.streaming_mode {
        let mut histo_writer = BitWriter::default();
        histo_writer.with_max_bits(reservation, |histo_writer| {
          ans_cost = build_and_store_ans_encoding_data(
            params.ans_histogram_strategy,
            &clustered_histograms[c].data,
            alphabet_size,
            log_alpha_size,
            use_prefix_code,
            info,
            Some(histo_writer),
          )?;
          Ok(())
        })?;
        if let Some(writer) = writer.as_deref_mut() {
          writer.append_unaligned(&histo_writer);
        }
        codes.encoded_histograms.push(histo_writer);
      } else if let Some(writer) = writer.as_deref_mut() {
        writer.with_max_bits(reservation, |writer| {
          ans_cost = build_and_store_ans_encoding_data(
            params.ans_histogram_strategy,
            &clustered_histograms[c].data,
            alphabet_size,
            log_alpha_size,
            use_prefix_code,
            info,
            Some(writer),
          )?;
          Ok(())
        })?;
      } else {
        ans_cost = build_and_store_ans_encoding_data(
          params.ans_histogram_strategy,
          &clustered_histograms[c].data,
          alphabet_size,
          log_alpha_size,
          use_prefix_code,
          info,
          None,
        )?;
      }
      cost += ans_cost;
    }
    Ok(cost)
  }
}

/// Reconstructs a cluster histogram from already-built symbol tables, so
/// streaming batches can cluster against the tables of previous ones.
fn histogram_from_symbol_info(encoding_info: &[EncSymbolInfo], use_prefix_code: bool) -> Histogram {
  let mut histo = Histogram::default();
  histo
    .data
    .resize(bits::ceil_div(encoding_info.len(), HISTOGRAM_ROUNDING) * HISTOGRAM_ROUNDING, 0);
  for (i, info) in encoding_info.iter().enumerate() {
    let count = if use_prefix_code {
      if info.depth > 0 {
        1 << (PREFIX_MAX_BITS - info.depth as Bitlen)
      } else {
        0
      }
    } else {
      info.freq as i32
    };
    histo.data[i] = count;
    histo.total_count += count as usize;
  }
  histo
}

const BEST_UINT_CONFIGS: [HybridUintConfig; 28] = [
  HybridUintConfig { split_exponent: 4, msb_in_token: 2, lsb_in_token: 0 }, // default
  HybridUintConfig { split_exponent: 4, msb_in_token: 1, lsb_in_token: 0 }, // less precise
  HybridUintConfig { split_exponent: 4, msb_in_token: 2, lsb_in_token: 1 }, // add sign
  HybridUintConfig { split_exponent: 4, msb_in_token: 2, lsb_in_token: 2 }, // add sign+parity
  HybridUintConfig { split_exponent: 4, msb_in_token: 1, lsb_in_token: 2 }, // parity, less msb
  // same as above, but more direct coding
  HybridUintConfig { split_exponent: 5, msb_in_token: 2, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 1, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 2, lsb_in_token: 1 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 2, lsb_in_token: 2 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 1, lsb_in_token: 2 },
  // same as above, but less direct coding
  HybridUintConfig { split_exponent: 3, msb_in_token: 2, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 3, msb_in_token: 1, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 3, msb_in_token: 2, lsb_in_token: 1 },
  HybridUintConfig { split_exponent: 3, msb_in_token: 1, lsb_in_token: 2 },
  // for near-lossless
  HybridUintConfig { split_exponent: 4, msb_in_token: 1, lsb_in_token: 3 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 1, lsb_in_token: 4 },
  HybridUintConfig { split_exponent: 5, msb_in_token: 2, lsb_in_token: 3 },
  HybridUintConfig { split_exponent: 6, msb_in_token: 1, lsb_in_token: 5 },
  HybridUintConfig { split_exponent: 6, msb_in_token: 2, lsb_in_token: 4 },
  HybridUintConfig { split_exponent: 6, msb_in_token: 0, lsb_in_token: 0 },
  // other
  HybridUintConfig { split_exponent: 0, msb_in_token: 0, lsb_in_token: 0 }, // varlenuint
  HybridUintConfig { split_exponent: 2, msb_in_token: 0, lsb_in_token: 1 }, // good for ctx map
  HybridUintConfig { split_exponent: 7, msb_in_token: 0, lsb_in_token: 0 }, // direct coding
  HybridUintConfig { split_exponent: 8, msb_in_token: 0, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 9, msb_in_token: 0, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 10, msb_in_token: 0, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 11, msb_in_token: 0, lsb_in_token: 0 },
  HybridUintConfig { split_exponent: 12, msb_in_token: 0, lsb_in_token: 0 },
];

const FAST_UINT_CONFIGS: [HybridUintConfig; 4] = [
  HybridUintConfig { split_exponent: 4, msb_in_token: 2, lsb_in_token: 0 }, // default
  HybridUintConfig { split_exponent: 4, msb_in_token: 1, lsb_in_token: 2 }, // parity, less msb
  HybridUintConfig { split_exponent: 0, msb_in_token: 0, lsb_in_token: 0 }, // smallest histograms
  HybridUintConfig { split_exponent: 2, msb_in_token: 0, lsb_in_token: 1 }, // good for ctx map
];

/// Brute-forces a hybrid-uint config per cluster by re-histogramming the
/// tokens under each candidate, then rebuilds the cluster histograms with
/// the winners and derives the final `log_alpha_size`.
fn choose_uint_configs(
  params: &HistogramParams,
  tokens: &[Vec<Token>],
  context_map: &[u8],
  clustered_histograms: &mut [Histogram],
  codes: &mut EntropyEncodingData,
  log_alpha_size: &mut Bitlen,
) -> EntroResult<()> {
  let num_clusters = clustered_histograms.len();
  codes.uint_config = vec![HybridUintConfig::default(); num_clusters];
  match params.uint_method {
    HybridUintMethod::None => return Ok(()),
    HybridUintMethod::Fastest000 => {
      codes.uint_config = vec![HybridUintConfig::new(0, 0, 0); num_clusters];
      return Ok(());
    }
    HybridUintMethod::ContextMap => {
      codes.uint_config = vec![HybridUintConfig::new(2, 0, 1); num_clusters];
      return Ok(());
    }
    HybridUintMethod::Fast | HybridUintMethod::Best => {}
  }
  // adaptive selection needs the whole stream; streaming keeps defaults
  if params.streaming_mode {
    return Ok(());
  }

  let configs: &[HybridUintConfig] = if params.uint_method == HybridUintMethod::Best {
    &BEST_UINT_CONFIGS
  } else {
    &FAST_UINT_CONFIGS
  };

  let mut costs = vec![f32::MAX; num_clusters];
  let mut extra_bits = vec![0u32; num_clusters];
  let mut is_valid = vec![true; num_clusters];
  // wider histograms get infinite population cost anyway
  let max_alpha = ANS_MAX_ALPHABET_SIZE as u32;
  for &cfg in configs {
    is_valid.iter_mut().for_each(|v| *v = true);
    extra_bits.iter_mut().for_each(|e| *e = 0);
    clustered_histograms.iter_mut().for_each(|h| h.clear());

    for stream in tokens {
      for token in stream {
        // lz77 length tokens keep their dedicated config
        if token.is_lz77_length {
          continue;
        }
        let histo = context_map[token.context as usize] as usize;
        let (tok, nbits, _) = cfg.encode(token.value);
        if tok >= max_alpha || (codes.lz77.enabled && tok >= codes.lz77.min_symbol) {
          is_valid[histo] = false;
          continue;
        }
        extra_bits[histo] += nbits;
        clustered_histograms[histo].add(tok as usize);
      }
    }

    for i in 0..num_clusters {
      if !is_valid[i] {
        continue;
      }
      let mut cost = clustered_histograms[i].population_cost()? + extra_bits[i] as f32;
      // signaling cost of the config itself
      cost += bits::ceil_log2_nonzero(cfg.split_exponent + 1) as f32;
      cost += bits::ceil_log2_nonzero(cfg.split_exponent - cfg.msb_in_token + 1) as f32;
      if cost < costs[i] {
        codes.uint_config[i] = cfg;
        costs[i] = cost;
      }
    }
  }

  // rebuild histograms with the chosen configs
  clustered_histograms.iter_mut().for_each(|h| h.clear());
  *log_alpha_size = 5;
  for stream in tokens {
    for token in stream {
      let histo = context_map[token.context as usize] as usize;
      let cfg = if token.is_lz77_length {
        codes.lz77.length_uint_config
      } else {
        codes.uint_config[histo]
      };
      let (mut tok, _, _) = cfg.encode(token.value);
      if token.is_lz77_length {
        tok += codes.lz77.min_symbol;
      }
      clustered_histograms[histo].add(tok as usize);
      while tok >= (1u32 << *log_alpha_size) {
        *log_alpha_size += 1;
      }
    }
  }
  let max_log_alpha_size = if codes.use_prefix_code { PREFIX_MAX_BITS } else { 8 };
  if *log_alpha_size > max_log_alpha_size {
    return Err(EntroError::invalid_input(format!(
      "tokens need a {}-bit alphabet; at most {} bits are possible",
      log_alpha_size, max_log_alpha_size,
    )));
  }
  Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_and_encode_histograms_body(
  params: &HistogramParams,
  mut num_contexts: usize,
  tokens: &mut Vec<Vec<Token>>,
  tokens_lz77: Vec<Vec<Token>>,
  codes: &mut EntropyEncodingData,
  context_map: &mut Vec<u8>,
  mut writer: Option<&mut BitWriter>,
  cost: &mut usize,
) -> EntroResult<()> {
  match writer.as_deref_mut() {
    Some(writer) => codes.lz77.store(writer)?,
    None => {
      let mut size_writer = SizeWriter::default();
      codes.lz77.store(&mut size_writer)?;
      *cost += size_writer.size;
    }
  }
  if codes.lz77.enabled {
    match writer.as_deref_mut() {
      Some(writer) => {
        let start = writer.bit_size();
        codes.lz77.length_uint_config.store(writer, 8);
        *cost += writer.bit_size() - start;
      }
      None => {
        let mut size_writer = SizeWriter::default();
        codes.lz77.length_uint_config.store(&mut size_writer, 8);
        *cost += size_writer.size;
      }
    }
    num_contexts += 1;
    *tokens = tokens_lz77;
  }

  // build per-context histograms
  let mut total_tokens = 0usize;
  let mut builder = HistogramBuilder::new(num_contexts);
  let mut uint_config = HybridUintConfig::default(); // for clustering
  if params.uint_method == HybridUintMethod::ContextMap {
    uint_config = HybridUintConfig::new(2, 0, 1);
  }
  if params.uint_method == HybridUintMethod::Fastest000 {
    uint_config = HybridUintConfig::new(0, 0, 0);
  }
  if params.fuzzer_friendly() {
    uint_config = HybridUintConfig::new(10, 0, 0);
  }
  for stream in tokens.iter() {
    if codes.lz77.enabled {
      for token in stream {
        total_tokens += 1;
        let cfg = if token.is_lz77_length {
          codes.lz77.length_uint_config
        } else {
          uint_config
        };
        let (mut tok, _, _) = cfg.encode(token.value);
        if token.is_lz77_length {
          tok += codes.lz77.min_symbol;
        }
        builder.visit_symbol(tok as usize, token.context as usize);
      }
    } else if num_contexts == 1 {
      for token in stream {
        total_tokens += 1;
        let (tok, _, _) = uint_config.encode(token.value);
        builder.visit_symbol(tok as usize, 0);
      }
    } else {
      for token in stream {
        total_tokens += 1;
        let (tok, _, _) = uint_config.encode(token.value);
        builder.visit_symbol(tok as usize, token.context as usize);
      }
    }
  }

  if params.add_missing_symbols {
    for c in 0..num_contexts {
      for symbol in 0..ANS_MAX_ALPHABET_SIZE {
        builder.visit_symbol(symbol, c);
      }
    }
  }

  if params.initialize_global_state {
    let mut use_prefix_code = params.force_huffman
      || total_tokens < 100
      || params.clustering == ClusteringType::Fastest
      || params.fuzzer_friendly();
    if !use_prefix_code {
      let all_singleton = (0..num_contexts).all(|i| builder.histo(i).shannon_entropy() < 1e-5);
      if all_singleton {
        use_prefix_code = true;
      }
    }
    codes.use_prefix_code = use_prefix_code;
  }

  if params.add_fixed_histograms {
    // a flat histogram over the full alphabet any later batch can use
    let alphabet_size = ANS_MAX_ALPHABET_SIZE;
    let log_alpha_size: Bitlen = 8;
    debug_assert_eq!(alphabet_size, 1 << log_alpha_size);
    let counts = create_flat_histogram(alphabet_size, ANS_TAB_SIZE as u32);
    codes
      .encoding_info
      .push(vec![EncSymbolInfo::default(); alphabet_size]);
    let info = codes.encoding_info.last_mut().unwrap();
    let use_prefix_code = codes.use_prefix_code;
    let mut histo_writer = BitWriter::default();
    histo_writer.with_max_bits(256 + alphabet_size * 24, |histo_writer| {
      build_and_store_ans_encoding_data(
        params.ans_histogram_strategy,
        &counts,
        alphabet_size,
        log_alpha_size,
        use_prefix_code,
        info,
        Some(histo_writer),
      )
      .map(|_| ())
    })?;
    codes.encoded_histograms.push(histo_writer);
  }

  let entropy_bits =
    builder.build_and_store_entropy_codes(params, tokens, codes, context_map, writer)?;
  *cost += entropy_bits;
  Ok(())
}

/// Ingests token streams, optionally rewrites them through the LZ77
/// pre-pass, builds the clustered entropy model, and (with a writer)
/// stores the model header. Returns the total cost in bits; without a
/// writer this is a pure cost probe.
pub fn build_and_encode_histograms(
  params: &HistogramParams,
  num_contexts: usize,
  tokens: &mut Vec<Vec<Token>>,
  codes: &mut EntropyEncodingData,
  context_map: &mut Vec<u8>,
  writer: Option<&mut BitWriter>,
) -> EntroResult<usize> {
  let mut cost = 0usize;
  codes.lz77.distance_context = num_contexts as u32;
  let mut tokens_lz77 = Vec::new();
  apply_lz77(params, num_contexts, tokens, &mut codes.lz77, &mut tokens_lz77);
  if params.fuzzer_friendly() {
    codes.lz77.length_uint_config = HybridUintConfig::new(10, 0, 0);
    codes.lz77.min_symbol = 2048;
  }

  let max_contexts = num_contexts.min(CLUSTERS_LIMIT);
  match writer {
    Some(writer) => writer.with_max_bits(128 + num_contexts * 40 + max_contexts * 96, |writer| {
      build_and_encode_histograms_body(
        params,
        num_contexts,
        tokens,
        tokens_lz77,
        codes,
        context_map,
        Some(writer),
        &mut cost,
      )
    })?,
    None => build_and_encode_histograms_body(
      params,
      num_contexts,
      tokens,
      tokens_lz77,
      codes,
      context_map,
      None,
      &mut cost,
    )?,
  }
  Ok(cost)
}

/// Re-emits a previously built model, using the per-cluster histogram
/// payloads captured in streaming mode.
pub fn encode_histograms(
  context_map: &[u8],
  codes: &EntropyEncodingData,
  writer: &mut BitWriter,
) -> EntroResult<()> {
  writer.with_max_bits(128 + CLUSTERS_LIMIT * 136, |writer| {
    codes.lz77.store(writer)?;
    if codes.lz77.enabled {
      codes.lz77.length_uint_config.store(writer, 8);
    }
    encode_context_map(context_map, codes.encoding_info.len(), writer)?;
    writer.write_uint(codes.use_prefix_code as u64, 1);
    let log_alpha_size = if codes.use_prefix_code {
      PREFIX_MAX_BITS
    } else {
      // streaming always signals the widest ANS alphabet
      writer.write_uint(8 - 5, 2);
      8
    };
    store_uint_configs(&codes.uint_config, writer, log_alpha_size);
    if codes.use_prefix_code {
      for info in &codes.encoding_info {
        store_varlen_u16(info.len() - 1, writer);
      }
    }
    for histo_writer in &codes.encoded_histograms {
      writer.append_unaligned(histo_writer);
    }
    Ok(())
  })
}

// rANS bits build up here before being flushed in reverse.
struct ReverseBitAcc {
  out: Vec<u64>,
  out_nbits: Vec<u8>,
  allbits: u64,
  numallbits: Bitlen,
}

impl ReverseBitAcc {
  fn add(&mut self, bits: u32, nbits: Bitlen) {
    if nbits == 0 {
      return;
    }
    debug_assert_eq!(bits as u64 >> nbits, 0);
    if self.numallbits + nbits > MAX_BITS_PER_CALL {
      self.out.push(self.allbits);
      self.out_nbits.push(self.numallbits as u8);
      self.allbits = 0;
      self.numallbits = 0;
    }
    self.allbits = (self.allbits << nbits) | bits as u64;
    self.numallbits += nbits;
  }
}

/// Writes one token stream against a built model. The ANS path feeds the
/// coder in reverse so a decoder reading forward reproduces the stream.
/// Returns the number of raw extra bits written.
pub fn write_tokens(
  tokens: &[Token],
  codes: &EntropyEncodingData,
  context_map: &[u8],
  context_offset: usize,
  writer: &mut BitWriter,
) -> EntroResult<usize> {
  let mut num_extra_bits = 0usize;
  writer.with_max_bits(46 * tokens.len() + 32 * 1024 * 4, |writer| {
    if codes.use_prefix_code {
      for token in tokens {
        let histo = context_map[context_offset + token.context as usize] as usize;
        let cfg = if token.is_lz77_length {
          codes.lz77.length_uint_config
        } else {
          codes.uint_config[histo]
        };
        let (mut tok, nbits, bits) = cfg.encode(token.value);
        if token.is_lz77_length {
          tok += codes.lz77.min_symbol;
        }
        let info = &codes.encoding_info[histo][tok as usize];
        // the code bits and raw extra bits in one call
        let data = info.bits as u64 | ((bits as u64) << info.depth);
        writer.write_uint(data, info.depth as Bitlen + nbits);
        num_extra_bits += nbits as usize;
      }
      return Ok(());
    }

    let mut acc = ReverseBitAcc {
      out: Vec::with_capacity(tokens.len()),
      out_nbits: Vec::with_capacity(tokens.len()),
      allbits: 0,
      numallbits: 0,
    };
    let mut ans = AnsCoder::new();
    if codes.lz77.enabled || context_map.len() > 1 {
      for token in tokens.iter().rev() {
        let histo = context_map[context_offset + token.context as usize] as usize;
        let cfg = if token.is_lz77_length {
          codes.lz77.length_uint_config
        } else {
          codes.uint_config[histo]
        };
        let (mut tok, nbits, bits) = cfg.encode(token.value);
        if token.is_lz77_length {
          tok += codes.lz77.min_symbol;
        }
        let info = &codes.encoding_info[histo][tok as usize];
        // extra bits first, as this is reversed
        acc.add(bits, nbits);
        num_extra_bits += nbits as usize;
        let (ans_bits, ans_nbits) = ans.put_symbol(info);
        acc.add(ans_bits, ans_nbits);
      }
    } else {
      for token in tokens.iter().rev() {
        let (tok, nbits, bits) = codes.uint_config[0].encode(token.value);
        let info = &codes.encoding_info[0][tok as usize];
        acc.add(bits, nbits);
        num_extra_bits += nbits as usize;
        let (ans_bits, ans_nbits) = ans.put_symbol(info);
        acc.add(ans_bits, ans_nbits);
      }
    }
    writer.write_uint(ans.state() as u64, 32);
    writer.write_uint(acc.allbits, acc.numallbits);
    for i in (0..acc.out.len()).rev() {
      writer.write_uint(acc.out[i], acc.out_nbits[i] as Bitlen);
    }
    Ok(())
  })?;
  Ok(num_extra_bits)
}
