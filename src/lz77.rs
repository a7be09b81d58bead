use std::collections::HashMap;

use crate::bits;
use crate::constants::{NUM_SPECIAL_DISTANCES, PREFIX_MAX_ALPHABET_SIZE, WINDOW_SIZE};
use crate::encode::HistogramBuilder;
use crate::hybrid_uint::HybridUintConfig;
use crate::params::{HistogramParams, Lz77Params, Lz77Method};
use crate::token::Token;

/// Short 2D copy vectors, ordered roughly by distance from the origin.
/// With a distance multiplier (the image width) each `(dx, dy)` pair maps
/// to the 1D distance `dx + dy * multiplier`.
pub(crate) const SPECIAL_DISTANCES: [[i8; 2]; NUM_SPECIAL_DISTANCES] = [
  [0, 1], [1, 0], [1, 1], [-1, 1], [0, 2], [2, 0], [1, 2], [-1, 2],
  [2, 1], [-2, 1], [2, 2], [-2, 2], [0, 3], [3, 0], [1, 3], [-1, 3],
  [3, 1], [-3, 1], [2, 3], [-2, 3], [3, 2], [-3, 2], [0, 4], [4, 0],
  [1, 4], [-1, 4], [4, 1], [-4, 1], [3, 3], [-3, 3], [2, 4], [-2, 4],
  [4, 2], [-4, 2], [0, 5], [3, 4], [-3, 4], [4, 3], [-4, 3], [5, 0],
  [1, 5], [-1, 5], [5, 1], [-5, 1], [2, 5], [-2, 5], [5, 2], [-5, 2],
  [4, 4], [-4, 4], [3, 5], [-3, 5], [5, 3], [-5, 3], [0, 6], [6, 0],
  [1, 6], [-1, 6], [6, 1], [-6, 1], [2, 6], [-2, 6], [6, 2], [-6, 2],
  [4, 5], [-4, 5], [5, 4], [-5, 4], [3, 6], [-3, 6], [6, 3], [-6, 3],
  [0, 7], [7, 0], [1, 7], [-1, 7], [5, 5], [-5, 5], [7, 1], [-7, 1],
  [4, 6], [-4, 6], [6, 4], [-6, 4], [2, 7], [-2, 7], [7, 2], [-7, 2],
  [3, 7], [-3, 7], [7, 3], [-7, 3], [5, 6], [-5, 6], [6, 5], [-6, 5],
  [8, 0], [4, 7], [-4, 7], [7, 4], [-7, 4], [8, 1], [8, 2], [6, 6],
  [-6, 6], [8, 3], [5, 7], [-5, 7], [7, 5], [-7, 5], [8, 4], [6, 7],
  [-6, 7], [7, 6], [-7, 6], [8, 5], [7, 7], [-7, 7], [8, 6], [8, 7],
];

/// 1D distance of the `index`-th special distance code.
#[inline]
pub(crate) fn special_distance(index: usize, multiplier: i32) -> i32 {
  let [dx, dy] = SPECIAL_DISTANCES[index];
  let dist = dx as i32 + multiplier * dy as i32;
  dist.max(1)
}

/// Bit cost estimates per context symbol, derived from a preliminary
/// histogram over the unmodified token streams.
pub(crate) struct SymbolCostEstimator {
  max_alphabet_size: usize,
  bits: Vec<f32>,
  add_symbol_cost: Vec<f32>,
}

impl SymbolCostEstimator {
  pub fn new(
    num_contexts: usize,
    force_huffman: bool,
    tokens: &[Vec<Token>],
    lz77: &Lz77Params,
  ) -> Self {
    let mut builder = HistogramBuilder::new(num_contexts);
    let uint_config = HybridUintConfig::default();
    for stream in tokens {
      for token in stream {
        let cfg = if token.is_lz77_length {
          lz77.length_uint_config
        } else {
          uint_config
        };
        let (tok, _, _) = cfg.encode(token.value);
        let tok = tok + if token.is_lz77_length { lz77.min_symbol } else { 0 };
        builder.visit_symbol(tok as usize, token.context as usize);
      }
    }
    let max_alphabet_size = (0..num_contexts)
      .map(|i| builder.histo(i).data.len())
      .max()
      .unwrap_or(0);
    let mut bits = vec![0.0f32; num_contexts * max_alphabet_size];
    let mut add_symbol_cost = vec![0.0f32; num_contexts];
    for i in 0..num_contexts {
      let histo = builder.histo(i);
      let inv_total = 1.0 / (histo.total_count as f32 + 1e-8);
      let mut total_cost = 0.0;
      for (j, &cnt) in histo.data.iter().enumerate() {
        let cost = if cnt != 0 && cnt as usize != histo.total_count {
          let mut cost = -(cnt as f32 * inv_total).log2();
          if force_huffman {
            cost = cost.ceil();
          }
          cost
        } else if cnt == 0 {
          crate::constants::ANS_LOG_TAB_SIZE as f32 // highest possible cost
        } else {
          0.0
        };
        bits[i * max_alphabet_size + j] = cost;
        total_cost += cost * cnt as f32;
      }
      // Penalty for adding an lz77 symbol to this context (static cost
      // model only). Higher for contexts with very low per-symbol entropy.
      add_symbol_cost[i] = (6.0 - total_cost * inv_total).max(0.0);
    }
    Self {
      max_alphabet_size,
      bits,
      add_symbol_cost,
    }
  }

  pub fn bits(&self, ctx: usize, sym: usize) -> f32 {
    if sym >= self.max_alphabet_size {
      // never observed anywhere
      return crate::constants::ANS_LOG_TAB_SIZE as f32;
    }
    self.bits[ctx * self.max_alphabet_size + sym]
  }

  pub fn len_cost(&self, ctx: usize, len: u32, lz77: &Lz77Params) -> f32 {
    let (tok, nbits, _) = lz77.length_uint_config.encode(len);
    let tok = tok + lz77.min_symbol;
    nbits as f32 + self.bits(ctx, tok as usize)
  }

  pub fn dist_cost(&self, dist_symbol: u32, lz77: &Lz77Params) -> f32 {
    let (tok, nbits, _) = HybridUintConfig::default().encode(dist_symbol);
    nbits as f32 + self.bits(lz77.distance_context as usize, tok as usize)
  }

  pub fn add_symbol_cost(&self, idx: usize) -> f32 {
    self.add_symbol_cost[idx]
  }
}

/// Hash chain over token values for LZ77 matching, with dedicated chains
/// for zero runs. Entries are window-masked indices with -1 sentinels.
struct HashChain {
  data: Vec<u32>,
  size: usize,

  hash_mask: u32,
  hash_shift: u32,

  head: Vec<i32>,
  chain: Vec<u32>,
  val: Vec<i32>,

  // speed up repetitions of zero
  headz: Vec<i32>,
  chainz: Vec<u32>,
  zeros: Vec<u32>,
  numzeros: u32,

  window_size: usize,
  window_mask: usize,
  min_length: usize,
  max_length: usize,

  special_dist_table: HashMap<i32, usize>,
  num_special_distances: usize,

  // window_size to allow all
  maxchainlength: u32,
}

const HASH_NUM_VALUES: usize = 32768;

impl HashChain {
  fn new(
    tokens: &[Token],
    window_size: usize,
    min_length: usize,
    max_length: usize,
    distance_multiplier: usize,
  ) -> Self {
    let data: Vec<u32> = tokens.iter().map(|t| t.value).collect();
    let size = data.len();

    let mut special_dist_table = HashMap::new();
    let mut num_special_distances = 0;
    if distance_multiplier != 0 {
      // Count down, so that when a small multiplier maps several special
      // codes to one distance, the smallest code wins.
      for i in (0..NUM_SPECIAL_DISTANCES).rev() {
        special_dist_table.insert(special_distance(i, distance_multiplier as i32), i);
      }
      num_special_distances = NUM_SPECIAL_DISTANCES;
    }

    Self {
      data,
      size,
      hash_mask: HASH_NUM_VALUES as u32 - 1,
      hash_shift: 5,
      head: vec![-1; HASH_NUM_VALUES],
      chain: (0..window_size as u32).collect(), // self-reference means uninitialized
      val: vec![-1; window_size],
      headz: vec![-1; window_size + 1],
      chainz: (0..window_size as u32).collect(),
      zeros: vec![0; window_size],
      numzeros: 0,
      window_size,
      window_mask: window_size - 1,
      min_length,
      max_length,
      special_dist_table,
      num_special_distances,
      maxchainlength: 256,
    }
  }

  fn get_hash(&self, pos: usize) -> u32 {
    if pos + 2 < self.size {
      let mut result = self.data[pos];
      result ^= self.data[pos + 1] << self.hash_shift;
      result ^= self.data[pos + 2] << (self.hash_shift * 2);
      result & self.hash_mask
    } else {
      // length 2 is too short to match anyway
      0
    }
  }

  fn count_zeros(&self, pos: usize, prevzeros: u32) -> u32 {
    let end = (pos + self.window_size).min(self.size);
    if prevzeros > 0 {
      return if prevzeros >= self.window_mask as u32
        && self.data[end - 1] == 0
        && end == pos + self.window_size
      {
        prevzeros
      } else {
        prevzeros - 1
      };
    }
    let mut num = 0;
    while pos + num < end && self.data[pos + num] == 0 {
      num += 1;
    }
    num as u32
  }

  fn update(&mut self, pos: usize) {
    let hashval = self.get_hash(pos) as usize;
    let wpos = pos & self.window_mask;

    self.val[wpos] = hashval as i32;
    if self.head[hashval] != -1 {
      self.chain[wpos] = self.head[hashval] as u32;
    }
    self.head[hashval] = wpos as i32;

    if pos > 0 && self.data[pos] != self.data[pos - 1] {
      self.numzeros = 0;
    }
    self.numzeros = self.count_zeros(pos, self.numzeros);

    self.zeros[wpos] = self.numzeros;
    if self.headz[self.numzeros as usize] != -1 {
      self.chainz[wpos] = self.headz[self.numzeros as usize] as u32;
    }
    self.headz[self.numzeros as usize] = wpos as i32;
  }

  fn update_range(&mut self, pos: usize, len: usize) {
    for i in 0..len {
      self.update(pos + i);
    }
  }

  fn find_matches<F: FnMut(usize, usize)>(&self, pos: usize, mut found_match: F) {
    let wpos = pos & self.window_mask;
    let hashval = self.get_hash(pos);
    let mut hashpos = self.chain[wpos] as usize;

    let mut prev_dist = 0usize;
    let end = (pos + self.max_length).min(self.size);
    let mut chainlength = 0u32;
    let mut best_len = 0usize;
    loop {
      let dist = if hashpos <= wpos {
        wpos - hashpos
      } else {
        wpos - hashpos + self.window_mask + 1
      };
      if dist < prev_dist {
        break;
      }
      prev_dist = dist;
      let mut len = 0usize;
      if dist > 0 {
        let mut i = pos;
        let mut j = pos - dist;
        if self.numzeros > 3 {
          let mut r = ((self.numzeros - 1).min(self.zeros[hashpos])) as usize;
          if i + r >= end {
            r = end - i - 1;
          }
          i += r;
          j += r;
        }
        while i < end && self.data[i] == self.data[j] {
          i += 1;
          j += 1;
        }
        len = i - pos;
        // This can fire even when the new length is slightly shorter than
        // the best: a cheaper distance symbol may exist at that length.
        if len >= self.min_length && len + 2 >= best_len {
          let dist_symbol = match self.special_dist_table.get(&(dist as i32)) {
            None => self.num_special_distances + dist - 1,
            Some(&code) => code,
          };
          found_match(len, dist_symbol);
          if len > best_len {
            best_len = len;
          }
        }
      }

      chainlength += 1;
      if chainlength >= self.maxchainlength {
        break;
      }

      if self.numzeros >= 3 && len > self.numzeros as usize {
        if hashpos == self.chainz[hashpos] as usize {
          break;
        }
        hashpos = self.chainz[hashpos] as usize;
        if self.zeros[hashpos] != self.numzeros {
          break;
        }
      } else {
        if hashpos == self.chain[hashpos] as usize {
          break;
        }
        hashpos = self.chain[hashpos] as usize;
        if self.val[hashpos] != hashval as i32 {
          // outdated hash value
          break;
        }
      }
    }
  }

  fn find_match(&self, pos: usize) -> (usize, usize) {
    let mut result_dist_symbol = 0usize;
    let mut result_len = 1usize;
    self.find_matches(pos, |len, dist_symbol| {
      if len > result_len || (len == result_len && result_dist_symbol > dist_symbol) {
        result_len = len;
        result_dist_symbol = dist_symbol;
      }
    });
    (result_dist_symbol, result_len)
  }
}

// Static symbol cost models for the greedy pass, measured over a corpus.
fn static_len_cost(len: u32) -> f32 {
  const COST_TABLE: [f32; 17] = [
    2.797667318563126, 3.213177690381199, 2.5706009246743737, 2.408392498667534,
    2.829649191872326, 3.3923087753324577, 4.029267451554331, 4.415576699706408,
    4.509357574741465, 9.21481543803004, 10.020590190114898, 11.858671627804766,
    12.45853300490526, 11.713105831990857, 12.561996324849314, 13.775477692278367,
    13.174027068768641,
  ];
  let (tok, nbits, _) = HybridUintConfig::new(1, 0, 0).encode(len);
  let tok = (tok as usize).min(COST_TABLE.len() - 1);
  COST_TABLE[tok] + nbits as f32
}

// TODO: take usage or non-usage of distance multipliers into account.
fn static_dist_cost(dist: u32) -> f32 {
  const COST_TABLE: [f32; 139] = [
    6.368282626312716, 5.680793277090298, 8.347404197105247, 7.641619201599141,
    6.914328374119438, 7.959808291537444, 8.70023120759855, 8.71378518934703,
    9.379132523982769, 9.110472749092708, 9.159029569270908, 9.430936766731973,
    7.278284055315169, 7.8278514904267755, 10.026641158289236, 9.976049229827066,
    9.64351607048908, 9.563403863480442, 10.171474111762747, 10.45950155077234,
    9.994813912104219, 10.322524683741156, 8.465808729388186, 8.756254166066853,
    10.160930174662234, 10.247329273413435, 10.04090403724809, 10.129398517544082,
    9.342311691539546, 9.07608009102374, 10.104799540677513, 10.378079384990906,
    10.165828974075072, 10.337595322341553, 7.940557464567944, 10.575665823319431,
    11.023344321751955, 10.736144698831827, 11.118277044595054, 7.468468230648442,
    10.738305230932939, 10.906980780216568, 10.163468216353817, 10.17805759656433,
    11.167283670483565, 11.147050200274544, 10.517921919244333, 10.651764778156886,
    10.17074446448919, 11.217636876224745, 11.261630721139484, 11.403140815247259,
    10.892472096873417, 11.1859607804481, 8.017346947551262, 7.895143720278828,
    11.036577113822025, 11.170562110315794, 10.326988722591086, 10.40872184751056,
    11.213498225466386, 11.30580635516863, 10.672272515665442, 10.768069466228063,
    11.145257364153565, 11.64668307145549, 10.593156194627339, 11.207499484844943,
    10.767517766396908, 10.826629811407042, 10.737764794499988, 10.6200448518045,
    10.191315385198092, 8.468384171390085, 11.731295299170432, 11.824619886654398,
    10.41518844301179, 10.16310536548649, 10.539423685097576, 10.495136599328031,
    10.469112847728267, 11.72057686174922, 10.910326337834674, 11.378921834673758,
    11.847759036098536, 11.92071647623854, 10.810628276345282, 11.008601085273893,
    11.910326337834674, 11.949212023423133, 11.298614839104337, 11.611603659010392,
    10.472930394619985, 11.835564720850282, 11.523267392285337, 12.01055816679611,
    8.413029688994023, 11.895784139536406, 11.984679534970505, 11.220654278717394,
    11.716311684833672, 10.61036646226114, 10.89849965960364, 10.203762898863669,
    10.997560826267238, 11.484217379438984, 11.792836176993665, 12.24310468755171,
    11.464858097919262, 12.212747017409377, 11.425595666074955, 11.572048533398757,
    12.742093965163013, 11.381874288645637, 12.191870445817015, 11.683156920035426,
    11.152442115262197, 11.90303691580457, 11.653292787169159, 11.938615382266098,
    16.970641701570223, 16.853602280380002, 17.26240782594733, 16.644655390108507,
    17.14310889757499, 16.910935455445955, 17.505678976959697, 17.213498225466388,
    2.4162310293553024, 3.494587244462329, 3.5258600986408344, 3.4959806589517095,
    3.098390886949687, 3.343454654302911, 3.588847442290287, 4.14614790111827,
    5.152948641990529, 7.433696808092598, 9.716311684833672,
  ];
  let (tok, nbits, _) = HybridUintConfig::new(7, 0, 0).encode(dist);
  let tok = (tok as usize).min(COST_TABLE.len() - 1);
  COST_TABLE[tok] + nbits as f32
}

fn cumulative_sym_cost(
  input: &[Token],
  sce: &SymbolCostEstimator,
  sym_cost: &mut Vec<f32>,
) {
  let uint_config = HybridUintConfig::default();
  sym_cost.clear();
  sym_cost.resize(input.len() + 1, 0.0);
  for i in 0..input.len() {
    let (tok, nbits, _) = uint_config.encode(input[i].value);
    sym_cost[i + 1] = sce.bits(input[i].context as usize, tok as usize) + nbits as f32 + sym_cost[i];
  }
}

fn window_size_for(max_distance: usize) -> usize {
  let mut window_size = 1;
  while window_size < max_distance && window_size < WINDOW_SIZE {
    window_size <<= 1;
  }
  window_size
}

fn apply_lz77_rle(
  params: &HistogramParams,
  num_contexts: usize,
  tokens: &[Vec<Token>],
  lz77: &mut Lz77Params,
  tokens_lz77: &mut Vec<Vec<Token>>,
) {
  let sce = SymbolCostEstimator::new(num_contexts, params.force_huffman, tokens, lz77);
  let mut bit_decrease = 0.0f32;
  let mut total_symbols = 0usize;
  tokens_lz77.resize(tokens.len(), Vec::new());
  let mut sym_cost = Vec::new();
  for (stream, input) in tokens.iter().enumerate() {
    let distance_multiplier = params.image_widths.get(stream).copied().unwrap_or(0);
    let out = &mut tokens_lz77[stream];
    total_symbols += input.len();
    cumulative_sym_cost(input, &sce, &mut sym_cost);
    out.reserve(input.len());
    let mut i = 0;
    while i < input.len() {
      let distance_symbol: u32 = if distance_multiplier != 0 {
        debug_assert_eq!(SPECIAL_DISTANCES[1], [1, 0]);
        1 // special distance (1, 0)
      } else {
        0
      };
      let mut num_to_copy = 0;
      if i > 0 {
        while i + num_to_copy < input.len()
          && input[i + num_to_copy].value == input[i - 1].value
        {
          num_to_copy += 1;
        }
      }
      if num_to_copy == 0 {
        out.push(input[i]);
        i += 1;
        continue;
      }
      let cost = sym_cost[i + num_to_copy] - sym_cost[i];
      if num_to_copy < lz77.min_length as usize {
        out.extend_from_slice(&input[i..i + num_to_copy]);
        i += num_to_copy;
        continue;
      }
      let lz77_len = (num_to_copy - lz77.min_length as usize) as u32;
      let lz77_cost = bits::ceil_log2_nonzero(lz77_len + 1) as f32 + 1.0;
      if cost <= lz77_cost {
        out.extend_from_slice(&input[i..i + num_to_copy]);
        i += num_to_copy;
        continue;
      }
      // the LZ77 length, then the copy distance
      let mut length_token = Token::new(input[i].context, lz77_len);
      length_token.is_lz77_length = true;
      out.push(length_token);
      i += num_to_copy;
      bit_decrease += cost - lz77_cost;
      out.push(Token::new(lz77.distance_context, distance_symbol));
    }
  }

  if bit_decrease > total_symbols as f32 * 0.2 + 16.0 {
    lz77.enabled = true;
  }
}

fn apply_lz77_greedy(
  params: &HistogramParams,
  num_contexts: usize,
  tokens: &[Vec<Token>],
  lz77: &mut Lz77Params,
  tokens_lz77: &mut Vec<Vec<Token>>,
) {
  let sce = SymbolCostEstimator::new(num_contexts, params.force_huffman, tokens, lz77);
  let mut bit_decrease = 0.0f32;
  let mut total_symbols = 0usize;
  tokens_lz77.resize(tokens.len(), Vec::new());
  let mut sym_cost = Vec::new();
  for (stream, input) in tokens.iter().enumerate() {
    let distance_multiplier = params.image_widths.get(stream).copied().unwrap_or(0);
    let out = &mut tokens_lz77[stream];
    total_symbols += input.len();
    cumulative_sym_cost(input, &sce, &mut sym_cost);

    out.reserve(input.len());
    let max_distance = input.len();
    let min_length = lz77.min_length as usize;
    debug_assert!(min_length >= 3);
    let max_length = input.len();

    let window_size = window_size_for(max_distance);
    let mut chain = HashChain::new(input, window_size, min_length, max_length, distance_multiplier);

    // one-symbol lookahead for matches below this length
    const MAX_LAZY_MATCH_LEN: usize = 256;

    // whether the next position was already hashed (by lazy matching)
    let mut already_updated = false;
    let mut i = 0;
    while i < input.len() {
      out.push(input[i]);
      if !already_updated {
        chain.update(i);
      }
      already_updated = false;
      let (mut dist_symbol, mut len) = chain.find_match(i);
      if len >= min_length {
        if len < MAX_LAZY_MATCH_LEN && i + 1 < input.len() {
          // try the match starting at the next symbol
          chain.update(i + 1);
          already_updated = true;
          let (dist_symbol2, len2) = chain.find_match(i + 1);
          if len2 > len {
            // use the lazy match: keep the literal, start the copy at
            // the next symbol
            i += 1;
            already_updated = false;
            len = len2;
            dist_symbol = dist_symbol2;
            out.push(input[i]);
          }
        }

        let cost = sym_cost[i + len] - sym_cost[i];
        let lz77_len = (len - min_length) as u32;
        let lz77_cost = static_len_cost(lz77_len)
          + static_dist_cost(dist_symbol as u32)
          + sce.add_symbol_cost(out.last().unwrap().context as usize);

        if lz77_cost <= cost {
          let last = out.last_mut().unwrap();
          last.value = lz77_len;
          last.is_lz77_length = true;
          out.push(Token::new(lz77.distance_context, dist_symbol as u32));
          bit_decrease += cost - lz77_cost;
        } else {
          // match ignored; the literal is already pushed, push the rest
          out.extend_from_slice(&input[i + 1..i + len]);
        }

        if already_updated {
          chain.update_range(i + 2, len - 2);
          already_updated = false;
        } else {
          chain.update_range(i + 1, len - 1);
        }
        i += len;
      } else {
        // literal, already pushed
        i += 1;
      }
    }
  }

  if bit_decrease > total_symbols as f32 * 0.2 + 16.0 {
    lz77.enabled = true;
  }
}

fn apply_lz77_optimal(
  params: &HistogramParams,
  num_contexts: usize,
  tokens: &[Vec<Token>],
  lz77: &mut Lz77Params,
  tokens_lz77: &mut Vec<Vec<Token>>,
) {
  let mut tokens_for_cost_estimate = Vec::new();
  apply_lz77_greedy(params, num_contexts, tokens, lz77, &mut tokens_for_cost_estimate);
  // if the greedy pass cannot beat no-lz77, the optimal one won't either
  if !lz77.enabled {
    return;
  }

  let sce = SymbolCostEstimator::new(
    num_contexts + 1,
    params.force_huffman,
    &tokens_for_cost_estimate,
    lz77,
  );
  tokens_lz77.resize(tokens.len(), Vec::new());
  let mut sym_cost = Vec::new();
  let mut dist_symbols: Vec<u32> = Vec::new();
  for (stream, input) in tokens.iter().enumerate() {
    let distance_multiplier = params.image_widths.get(stream).copied().unwrap_or(0);
    let out = &mut tokens_lz77[stream];
    cumulative_sym_cost(input, &sce, &mut sym_cost);

    out.reserve(input.len());
    let max_distance = input.len();
    let min_length = lz77.min_length as usize;
    debug_assert!(min_length >= 3);
    let max_length = input.len();

    let window_size = window_size_for(max_distance);
    let mut chain = HashChain::new(input, window_size, min_length, max_length, distance_multiplier);

    #[derive(Clone, Copy)]
    struct MatchInfo {
      len: u32,
      // best distance symbol + 1; 0 means a literal edge
      dist_symbol: u32,
      ctx: u32,
      total_cost: f32,
    }
    // total cost to encode the first N symbols
    let mut prefix_costs = vec![
      MatchInfo {
        len: 0,
        dist_symbol: 0,
        ctx: 0,
        total_cost: f32::MAX,
      };
      input.len() + 1
    ];
    prefix_costs[0].total_cost = 0.0;

    let mut rle_length = 0usize;
    let mut skip_lz77 = 0usize;
    for i in 0..input.len() {
      chain.update(i);
      let lit_cost = prefix_costs[i].total_cost + sym_cost[i + 1] - sym_cost[i];
      if prefix_costs[i + 1].total_cost > lit_cost {
        prefix_costs[i + 1] = MatchInfo {
          len: 1,
          dist_symbol: 0,
          ctx: input[i].context,
          total_cost: lit_cost,
        };
      }
      if skip_lz77 > 0 {
        skip_lz77 -= 1;
        continue;
      }
      dist_symbols.clear();
      chain.find_matches(i, |len, dist_symbol| {
        if dist_symbols.len() <= len {
          dist_symbols.resize(len + 1, dist_symbol as u32);
        }
        if (dist_symbol as u32) < dist_symbols[len] {
          dist_symbols[len] = dist_symbol as u32;
        }
      });
      if dist_symbols.len() <= min_length {
        continue;
      }
      // each length gets the best distance symbol at or above it
      let mut best = *dist_symbols.last().unwrap();
      for j in (min_length..dist_symbols.len()).rev() {
        if dist_symbols[j] < best {
          best = dist_symbols[j];
        }
        dist_symbols[j] = best;
      }
      for j in min_length..dist_symbols.len() {
        // cost model refined by the greedy pass results
        let lz77_cost = sce.len_cost(input[i].context as usize, (j - min_length) as u32, lz77)
          + sce.dist_cost(dist_symbols[j], lz77);
        let cost = prefix_costs[i].total_cost + lz77_cost;
        if prefix_costs[i + j].total_cost > cost {
          prefix_costs[i + j] = MatchInfo {
            len: j as u32,
            dist_symbol: dist_symbols[j] + 1,
            ctx: input[i].context,
            total_cost: cost,
          };
        }
      }
      // Inside an RLE run, skip everything but the first and last few
      // positions; otherwise long runs cost quadratic time.
      let rle_symbol = if distance_multiplier == 0 { 0 } else { 1 };
      if *dist_symbols.last().unwrap() == rle_symbol {
        rle_length += 1;
      } else {
        rle_length = 0;
      }
      if rle_length >= 8 && dist_symbols.len() > 9 {
        skip_lz77 = dist_symbols.len() - 10;
        rle_length = 0;
      }
    }

    let mut pos = input.len();
    while pos > 0 {
      let info = prefix_costs[pos];
      let is_lz77_length = info.dist_symbol != 0;
      if is_lz77_length {
        out.push(Token::new(lz77.distance_context, info.dist_symbol - 1));
      }
      let value = if is_lz77_length {
        info.len - min_length as u32
      } else {
        input[pos - 1].value
      };
      let mut token = Token::new(info.ctx, value);
      token.is_lz77_length = is_lz77_length;
      out.push(token);
      pos -= info.len as usize;
    }
    out.reverse();
  }
}

/// Runs the configured LZ77 pre-pass over `tokens` into `tokens_lz77` and
/// decides `lz77.enabled`. Output streams are only valid when it fired.
pub(crate) fn apply_lz77(
  params: &HistogramParams,
  num_contexts: usize,
  tokens: &[Vec<Token>],
  lz77: &mut Lz77Params,
  tokens_lz77: &mut Vec<Vec<Token>>,
) {
  if params.initialize_global_state {
    lz77.enabled = false;
  }
  lz77.min_symbol = if params.force_huffman {
    (PREFIX_MAX_ALPHABET_SIZE - 32).min(512) as u32
  } else {
    224
  };
  match params.lz77_method {
    Lz77Method::None => {}
    Lz77Method::Rle => apply_lz77_rle(params, num_contexts, tokens, lz77, tokens_lz77),
    Lz77Method::Lz77 => apply_lz77_greedy(params, num_contexts, tokens, lz77, tokens_lz77),
    Lz77Method::Optimal => apply_lz77_optimal(params, num_contexts, tokens, lz77, tokens_lz77),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn literal_stream(values: &[u32]) -> Vec<Vec<Token>> {
    vec![values.iter().map(|&v| Token::new(0, v)).collect()]
  }

  fn params_with(method: Lz77Method) -> HistogramParams {
    HistogramParams {
      lz77_method: method,
      ..Default::default()
    }
  }

  fn run(
    params: &HistogramParams,
    tokens: &[Vec<Token>],
  ) -> (Lz77Params, Vec<Vec<Token>>) {
    let mut lz77 = Lz77Params {
      distance_context: 1,
      ..Default::default()
    };
    let mut out = Vec::new();
    apply_lz77(params, 1, tokens, &mut lz77, &mut out);
    (lz77, out)
  }

  #[test]
  fn test_special_distances() {
    assert_eq!(SPECIAL_DISTANCES[1], [1, 0]);
    assert_eq!(special_distance(1, 0), 1);
    assert_eq!(special_distance(0, 100), 100);
    // distances never drop below 1
    assert_eq!(special_distance(3, 0), 1);
    assert_eq!(special_distance(3, 100), 99);
  }

  #[test]
  fn test_none_keeps_streams_untouched() {
    let tokens = literal_stream(&[1, 2, 3, 1, 2, 3]);
    let (lz77, out) = run(&params_with(Lz77Method::None), &tokens);
    assert!(!lz77.enabled);
    assert!(out.is_empty());
  }

  #[test]
  fn test_rle_runs() {
    // 64 runs of 40 identical values; literals cost ~6 bits each here, so
    // every run is worth a copy
    let mut values = Vec::new();
    for v in 0..64u32 {
      values.extend(std::iter::repeat(v).take(40));
    }
    let tokens = literal_stream(&values);
    let (lz77, out) = run(&params_with(Lz77Method::Rle), &tokens);
    assert!(lz77.enabled);
    let stream = &out[0];
    // per run: one literal, then one length + distance pair
    assert_eq!(stream.len(), 64 * 3);
    let lengths: Vec<&Token> = stream.iter().filter(|t| t.is_lz77_length).collect();
    assert_eq!(lengths.len(), 64);
    assert!(lengths.iter().all(|t| t.value == 39 - lz77.min_length));
    // every length is followed by a distance token in the distance context
    for (i, t) in stream.iter().enumerate() {
      if t.is_lz77_length {
        assert_eq!(stream[i + 1].context, 1);
        assert_eq!(stream[i + 1].value, 0);
      }
    }
  }

  #[test]
  fn test_rle_skips_cheap_runs() {
    // a single-symbol context codes literals at ~0 bits, so a copy never
    // pays off
    let values = vec![0u32; 1024];
    let tokens = literal_stream(&values);
    let (lz77, out) = run(&params_with(Lz77Method::Rle), &tokens);
    assert!(!lz77.enabled);
    assert_eq!(out[0].len(), 1024);
    assert!(out[0].iter().all(|t| !t.is_lz77_length));
  }

  #[test]
  fn test_rle_ignores_alternating_values() {
    let values: Vec<u32> = (0..64).map(|i| i % 2).collect();
    let tokens = literal_stream(&values);
    let (lz77, out) = run(&params_with(Lz77Method::Rle), &tokens);
    assert!(!lz77.enabled);
    // nothing was worth a copy: all literals
    assert_eq!(out[0].len(), 64);
    assert!(out[0].iter().all(|t| !t.is_lz77_length));
  }

  #[test]
  fn test_greedy_finds_period_two_matches() {
    let values: Vec<u32> = (0..4096).map(|i| i % 2).collect();
    let tokens = literal_stream(&values);
    let (lz77, out) = run(&params_with(Lz77Method::Lz77), &tokens);
    assert!(lz77.enabled);
    assert!(out[0].iter().any(|t| t.is_lz77_length));
    assert!(out[0].len() < tokens[0].len());
  }

  #[test]
  fn test_optimal_repeated_block() {
    // a 128-value block repeated 16 times: literals cost ~7 bits, so the
    // parse should cover everything after the first block with matches
    let base: Vec<u32> = (0..128).collect();
    let mut values = Vec::new();
    for _ in 0..16 {
      values.extend_from_slice(&base);
    }
    let tokens = literal_stream(&values);
    let (lz77, out) = run(&params_with(Lz77Method::Optimal), &tokens);
    assert!(lz77.enabled);
    let stream = &out[0];
    assert!(stream.iter().any(|t| t.is_lz77_length));
    assert!(stream.len() < 200, "parse kept {} tokens", stream.len());
    // length tokens each get a distance companion
    let lengths = stream.iter().filter(|t| t.is_lz77_length).count();
    let dists = stream.iter().filter(|t| t.context == 1).count();
    assert_eq!(lengths, dists);
  }

  #[test]
  fn test_optimal_matches_or_beats_greedy() {
    let base: Vec<u32> = (0..64).collect();
    let mut values = Vec::new();
    for _ in 0..32 {
      values.extend_from_slice(&base);
    }
    values.extend(0..64u32);
    let tokens = literal_stream(&values);
    let (greedy_lz77, greedy_out) = run(&params_with(Lz77Method::Lz77), &tokens);
    let (optimal_lz77, optimal_out) = run(&params_with(Lz77Method::Optimal), &tokens);
    assert!(greedy_lz77.enabled);
    assert!(optimal_lz77.enabled);
    // the parse minimizes estimated bits, which tracks token count here
    assert!(optimal_out[0].len() <= greedy_out[0].len() + 8);
  }

  #[test]
  fn test_distance_multiplier_changes_symbols() {
    // runs of different values so the copies actually pay off
    let mut values = Vec::new();
    for v in 0..64u32 {
      values.extend(std::iter::repeat(v).take(40));
    }
    let tokens = literal_stream(&values);

    let mut params = params_with(Lz77Method::Rle);
    let (_, out_plain) = run(&params, &tokens);
    params.image_widths = vec![64];
    let (_, out_mult) = run(&params, &tokens);

    let dist_plain = out_plain[0].last().unwrap();
    let dist_mult = out_mult[0].last().unwrap();
    assert_eq!(dist_plain.context, 1);
    assert_eq!(dist_mult.context, 1);
    assert_eq!(dist_plain.value, 0);
    assert_eq!(dist_mult.value, 1);
  }
}
