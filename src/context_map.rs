use crate::bit_writer::BitWriter;
use crate::bits;
use crate::encode::{build_and_encode_histograms, write_tokens, EntropyEncodingData};
use crate::errors::EntroResult;
use crate::params::{HistogramParams, HybridUintMethod, Lz77Method};
use crate::token::Token;

fn move_to_front(v: &mut Vec<u8>, index: usize) {
  let value = v.remove(index);
  v.insert(0, value);
}

fn move_to_front_transform(v: &[u8]) -> Vec<u8> {
  if v.is_empty() {
    return Vec::new();
  }
  let max_value = *v.iter().max().unwrap();
  let mut mtf: Vec<u8> = (0..=max_value).collect();
  let mut result = Vec::with_capacity(v.len());
  for &value in v {
    let index = mtf.iter().position(|&m| m == value).unwrap();
    result.push(index as u8);
    move_to_front(&mut mtf, index);
  }
  result
}

fn map_tokens(values: &[u8]) -> Vec<Vec<Token>> {
  vec![values.iter().map(|&v| Token::new(0, v as u32)).collect()]
}

/// Encodes the context -> cluster map. A single cluster takes a 3-bit
/// short form; otherwise the cheapest of a raw simple code, an
/// entropy-coded map, and an entropy-coded move-to-front map wins. The
/// entropy-coded forms recurse through the normal histogram pipeline,
/// which terminates because the map's alphabet is tiny.
pub(crate) fn encode_context_map(
  context_map: &[u8],
  num_histograms: usize,
  writer: &mut BitWriter,
) -> EntroResult<()> {
  if num_histograms == 1 {
    // simple code, 0 bits per entry
    writer.write_uint(1, 1);
    writer.write_uint(0, 2);
    return Ok(());
  }

  let transformed_symbols = move_to_front_transform(context_map);
  let params = HistogramParams {
    uint_method: HybridUintMethod::ContextMap,
    lz77_method: Lz77Method::Rle,
    ..Default::default()
  };

  // the probes may rewrite their token streams, so each gets its own
  let ans_cost = {
    let mut tokens = map_tokens(context_map);
    let mut codes = EntropyEncodingData::default();
    let mut sink_context_map = Vec::new();
    build_and_encode_histograms(
      &params,
      1,
      &mut tokens,
      &mut codes,
      &mut sink_context_map,
      None,
    )?
  };
  let mtf_cost = {
    let mut tokens = map_tokens(&transformed_symbols);
    let mut codes = EntropyEncodingData::default();
    let mut sink_context_map = Vec::new();
    build_and_encode_histograms(
      &params,
      1,
      &mut tokens,
      &mut codes,
      &mut sink_context_map,
      None,
    )?
  };
  let use_mtf = mtf_cost < ans_cost;

  let entry_bits = bits::ceil_log2_nonzero(num_histograms as u32) as usize;
  let simple_cost = entry_bits * context_map.len();
  if entry_bits < 4 && simple_cost < ans_cost && simple_cost < mtf_cost {
    writer.write_uint(1, 1);
    writer.write_uint(entry_bits as u64, 2);
    for &entry in context_map {
      writer.write_uint(entry as u64, entry_bits as u32);
    }
  } else {
    writer.write_uint(0, 1);
    writer.write_one(use_mtf);
    let mut tokens = map_tokens(if use_mtf {
      transformed_symbols.as_slice()
    } else {
      context_map
    });
    let mut codes = EntropyEncodingData::default();
    let mut sink_context_map = Vec::new();
    build_and_encode_histograms(
      &params,
      1,
      &mut tokens,
      &mut codes,
      &mut sink_context_map,
      Some(&mut *writer),
    )?;
    write_tokens(&tokens[0], &codes, &sink_context_map, 0, writer)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_move_to_front_transform() {
    assert_eq!(move_to_front_transform(&[]), vec![]);
    assert_eq!(move_to_front_transform(&[0, 0, 0]), vec![0, 0, 0]);
    // repeated values collapse to zeros after their first use
    assert_eq!(
      move_to_front_transform(&[2, 2, 0, 1, 1]),
      vec![2, 0, 1, 2, 0]
    );
  }

  #[test]
  fn test_single_cluster_short_form() {
    let mut writer = BitWriter::default();
    encode_context_map(&[0, 0, 0, 0], 1, &mut writer).unwrap();
    assert_eq!(writer.bit_size(), 3);
    assert_eq!(writer.drain_bytes(), vec![1]);
  }

  #[test]
  fn test_small_map_takes_simple_code() {
    let mut writer = BitWriter::default();
    encode_context_map(&[0, 1, 1, 0], 2, &mut writer).unwrap();
    // marker + entry bits + 4 entries of 1 bit beats any entropy code
    assert_eq!(writer.bit_size(), 1 + 2 + 4);
  }

  #[test]
  fn test_large_map_encodes() {
    // 64 contexts cycling over 8 clusters: simple needs 3 bits each, the
    // entropy code should win and still fit the reservation
    let map: Vec<u8> = (0..64).map(|i| (i % 8) as u8).collect();
    let mut writer = BitWriter::default();
    encode_context_map(&map, 8, &mut writer).unwrap();
    assert!(writer.bit_size() > 0);
  }
}
