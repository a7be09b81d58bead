use std::collections::HashMap;

use crate::ans::alias::{alias_lookup, init_alias_table, AliasEntry};
use crate::bit_writer::BitWriter;
use crate::constants::{
  Bitlen, HistBin, ANS_LOG_TAB_SIZE, ANS_SIGNATURE, ANS_TAB_MASK, ANS_TAB_SIZE,
  NUM_SPECIAL_DISTANCES,
};
use crate::encode::{build_and_encode_histograms, write_tokens, EntropyEncodingData};
use crate::hybrid_uint::HybridUintConfig;
use crate::lz77::special_distance;
use crate::params::{HistogramParams, Lz77Params};
use crate::token::Token;

/// Little-endian bit reader over finished bytes, for decoding what the
/// writer produced. Reads past the end yield zeros.
pub struct BitReader<'a> {
  bytes: &'a [u8],
  bit_idx: usize,
}

impl<'a> BitReader<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, bit_idx: 0 }
  }

  pub fn read(&mut self, n: Bitlen) -> u64 {
    let mut result = 0u64;
    for i in 0..n as usize {
      let idx = self.bit_idx + i;
      let byte = self.bytes.get(idx / 8).copied().unwrap_or(0);
      result |= (((byte >> (idx % 8)) & 1) as u64) << i;
    }
    self.bit_idx += n as usize;
    result
  }
}

/// Raw-bit count implied by a token, as a decoder would derive it.
fn token_nbits(cfg: &HybridUintConfig, token: u32) -> Bitlen {
  let split = 1u32 << cfg.split_exponent;
  if token < split {
    0
  } else {
    let mlb = cfg.msb_in_token + cfg.lsb_in_token;
    ((token - split) >> mlb) + cfg.split_exponent - mlb
  }
}

/// Decodes one stream written by `write_tokens`, replaying the contexts
/// of `tokens_written` the way an image decoder would know them from its
/// own state. Returns the decoded values.
pub fn decode_token_stream(
  bytes: &[u8],
  codes: &EntropyEncodingData,
  context_map: &[u8],
  context_offset: usize,
  tokens_written: &[Token],
) -> Vec<u32> {
  let mut reader = BitReader::new(bytes);
  let mut decoded = Vec::with_capacity(tokens_written.len());

  if codes.use_prefix_code {
    // symbol lookup by (depth, lsb-first code)
    let maps: Vec<HashMap<(u8, u16), u32>> = codes
      .encoding_info
      .iter()
      .map(|info| {
        let mut map = HashMap::new();
        for (sym, entry) in info.iter().enumerate() {
          if entry.depth > 0 {
            map.insert((entry.depth, entry.bits), sym as u32);
          }
        }
        map
      })
      .collect();
    for token in tokens_written {
      let histo = context_map[context_offset + token.context as usize] as usize;
      let cfg = if token.is_lz77_length {
        codes.lz77.length_uint_config
      } else {
        codes.uint_config[histo]
      };
      let (expected_tok, _, _) = cfg.encode(token.value);
      let expected_sym = expected_tok
        + if token.is_lz77_length {
          codes.lz77.min_symbol
        } else {
          0
        };
      let info = &codes.encoding_info[histo][expected_sym as usize];
      let sym = if info.depth == 0 {
        // zero-bit code; a real decoder knows the symbol from the tree
        expected_sym
      } else {
        let mut len = 0u8;
        let mut val = 0u16;
        loop {
          val |= (reader.read(1) as u16) << len;
          len += 1;
          if let Some(&s) = maps[histo].get(&(len, val)) {
            break s;
          }
          assert!(len <= 15, "prefix decode ran away");
        }
      };
      let tok = sym
        - if token.is_lz77_length {
          codes.lz77.min_symbol
        } else {
          0
        };
      let nbits = token_nbits(&cfg, tok);
      let bits = reader.read(nbits) as u32;
      decoded.push(cfg.decode(tok, bits));
    }
    return decoded;
  }

  let log_alpha_size = codes.log_alpha_size;
  let log_entry_size = ANS_LOG_TAB_SIZE - log_alpha_size;
  let entry_mask = (1u32 << log_entry_size) - 1;
  let tables: Vec<Vec<AliasEntry>> = codes
    .encoding_info
    .iter()
    .map(|info| {
      let freqs: Vec<HistBin> = info.iter().map(|e| e.freq as HistBin).collect();
      init_alias_table(&freqs, ANS_TAB_SIZE as u32, log_alpha_size).unwrap()
    })
    .collect();

  let mut state = reader.read(32) as u32;
  let single = !(codes.lz77.enabled || context_map.len() > 1);
  for token in tokens_written {
    let histo = if single {
      0
    } else {
      context_map[context_offset + token.context as usize] as usize
    };
    let slot = alias_lookup(&tables[histo], state & ANS_TAB_MASK, log_entry_size, entry_mask);
    state = slot.freq * (state >> ANS_LOG_TAB_SIZE) + slot.offset;
    if state < (1 << 16) {
      state = (state << 16) | reader.read(16) as u32;
    }
    let sym = slot.value as u32;
    let is_length = codes.lz77.enabled && sym >= codes.lz77.min_symbol;
    assert_eq!(is_length, token.is_lz77_length);
    let (cfg, tok) = if is_length {
      (codes.lz77.length_uint_config, sym - codes.lz77.min_symbol)
    } else {
      (codes.uint_config[histo], sym)
    };
    let nbits = token_nbits(&cfg, tok);
    let bits = reader.read(nbits) as u32;
    decoded.push(cfg.decode(tok, bits));
  }
  assert_eq!(state, ANS_SIGNATURE << 16, "final ANS state mismatch");
  decoded
}

/// Replays an LZ77-rewritten token stream back into the flat value
/// sequence the pre-pass consumed.
pub fn expand_lz77(tokens: &[Token], lz77: &Lz77Params, distance_multiplier: usize) -> Vec<u32> {
  let mut values = Vec::new();
  let mut i = 0;
  while i < tokens.len() {
    let token = tokens[i];
    if token.is_lz77_length {
      let length = token.value as usize + lz77.min_length as usize;
      let dist_token = tokens[i + 1];
      assert_eq!(dist_token.context, lz77.distance_context);
      let dist_symbol = dist_token.value as usize;
      let num_special = if distance_multiplier != 0 {
        NUM_SPECIAL_DISTANCES
      } else {
        0
      };
      let distance = if dist_symbol < num_special {
        special_distance(dist_symbol, distance_multiplier as i32) as usize
      } else {
        dist_symbol - num_special + 1
      };
      for _ in 0..length {
        let value = values[values.len() - distance];
        values.push(value);
      }
      i += 2;
    } else {
      values.push(token.value);
      i += 1;
    }
  }
  values
}

pub struct Encoded {
  pub codes: EntropyEncodingData,
  pub context_map: Vec<u8>,
  pub header: Vec<u8>,
  pub streams: Vec<Vec<u8>>,
  // post-lz77 token streams, as actually written
  pub tokens_written: Vec<Vec<Token>>,
  pub cost: usize,
}

/// Runs the full encoder: model build + header, then one token stream
/// per input stream, each into its own byte buffer.
pub fn encode_pipeline(
  params: &HistogramParams,
  num_contexts: usize,
  mut tokens: Vec<Vec<Token>>,
) -> Encoded {
  let mut codes = EntropyEncodingData::default();
  let mut context_map = Vec::new();
  let mut header_writer = BitWriter::default();
  let cost = build_and_encode_histograms(
    params,
    num_contexts,
    &mut tokens,
    &mut codes,
    &mut context_map,
    Some(&mut header_writer),
  )
  .unwrap();
  let mut streams = Vec::new();
  for stream in &tokens {
    let mut writer = BitWriter::default();
    write_tokens(stream, &codes, &context_map, 0, &mut writer).unwrap();
    streams.push(writer.drain_bytes());
  }
  Encoded {
    codes,
    context_map,
    header: header_writer.drain_bytes(),
    streams,
    tokens_written: tokens,
    cost,
  }
}

/// Asserts every written stream decodes back to its token values.
pub fn assert_streams_recover(encoded: &Encoded) {
  for (bytes, stream) in encoded.streams.iter().zip(&encoded.tokens_written) {
    let decoded = decode_token_stream(bytes, &encoded.codes, &encoded.context_map, 0, stream);
    let expected: Vec<u32> = stream.iter().map(|t| t.value).collect();
    assert_eq!(decoded, expected);
  }
}

pub fn literal_tokens(values: &[u32], context: u32) -> Vec<Token> {
  values.iter().map(|&v| Token::new(context, v)).collect()
}
