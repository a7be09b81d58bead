use crate::constants::{ANS_TAB_SIZE, CLUSTERS_LIMIT};
use crate::params::{HistogramParams, Lz77Method};
use crate::tests::utils::{
  assert_streams_recover, encode_pipeline, expand_lz77, literal_tokens,
};

#[test]
fn test_single_symbol_stream() {
  let values = vec![7u32; 10_000];
  let encoded = encode_pipeline(&HistogramParams::default(), 1, vec![literal_tokens(&values, 0)]);
  // a zero-entropy stream elects the prefix path and codes every token
  // in zero bits
  assert!(encoded.codes.use_prefix_code);
  assert_eq!(encoded.codes.encoding_info.len(), 1);
  assert!(encoded.streams[0].len() * 8 <= 40);
  assert_streams_recover(&encoded);
}

#[test]
fn test_alternating_pairs_rle_fails() {
  let values: Vec<u32> = (0..16).map(|i| i % 2).collect();
  let params = HistogramParams {
    lz77_method: Lz77Method::Rle,
    ..Default::default()
  };
  let encoded = encode_pipeline(&params, 1, vec![literal_tokens(&values, 0)]);
  // period 2 never produces an RLE run
  assert!(!encoded.codes.lz77.enabled);
  assert_streams_recover(&encoded);
}

#[test]
fn test_alternating_stream_greedy_and_optimal() {
  let values: Vec<u32> = (0..1024).map(|i| i % 2).collect();

  let greedy_params = HistogramParams {
    lz77_method: Lz77Method::Lz77,
    ..Default::default()
  };
  let greedy = encode_pipeline(&greedy_params, 1, vec![literal_tokens(&values, 0)]);
  assert!(greedy.codes.lz77.enabled);
  assert_streams_recover(&greedy);
  assert_eq!(
    expand_lz77(&greedy.tokens_written[0], &greedy.codes.lz77, 0),
    values
  );

  let optimal_params = HistogramParams {
    lz77_method: Lz77Method::Optimal,
    ..Default::default()
  };
  let optimal = encode_pipeline(&optimal_params, 1, vec![literal_tokens(&values, 0)]);
  assert!(optimal.codes.lz77.enabled);
  assert_streams_recover(&optimal);
  assert_eq!(
    expand_lz77(&optimal.tokens_written[0], &optimal.codes.lz77, 0),
    values
  );

  // the parse driven by the refined cost model never loses to greedy
  let greedy_bits = greedy.streams[0].len() * 8;
  let optimal_bits = optimal.streams[0].len() * 8;
  assert!(optimal_bits <= greedy_bits + 64);
}

#[test]
fn test_zero_run_stream() {
  // literals in a single-symbol context are nearly free, so the pre-pass
  // correctly decides copies are not worth their signaling
  let values = vec![0u32; 1024];
  let params = HistogramParams {
    lz77_method: Lz77Method::Optimal,
    ..Default::default()
  };
  let encoded = encode_pipeline(&params, 1, vec![literal_tokens(&values, 0)]);
  assert!(!encoded.codes.lz77.enabled);
  // zero-entropy stream: prefix path, zero data bits
  assert!(encoded.streams[0].len() < 32);
  assert_streams_recover(&encoded);
  let decoded_len = encoded.tokens_written[0].len();
  assert_eq!(decoded_len, 1024);
}

#[test]
fn test_uniform_distribution_elects_flat() {
  let values: Vec<u32> = (0..65_536).map(|i| i % 16).collect();
  let encoded = encode_pipeline(&HistogramParams::default(), 1, vec![literal_tokens(&values, 0)]);
  assert!(!encoded.codes.use_prefix_code);
  let info = &encoded.codes.encoding_info[0];
  assert_eq!(info.len(), 16);
  // flat histogram: every count becomes table_size / 16
  assert!(info.iter().all(|e| e.freq as usize == ANS_TAB_SIZE / 16));
  assert_streams_recover(&encoded);
}

#[test]
fn test_uniform_256_recovers() {
  let values: Vec<u32> = (0..65_536).map(|i| i % 256).collect();
  let encoded = encode_pipeline(&HistogramParams::default(), 1, vec![literal_tokens(&values, 0)]);
  assert_streams_recover(&encoded);
}

#[test]
fn test_head_heavy_histogram_pipeline() {
  // ~99% zeros with a wide tail
  let mut values = Vec::new();
  for i in 0..40_000u32 {
    if i % 128 == 0 {
      values.push(1 + (i / 128) % 255);
    } else {
      values.push(0);
    }
  }
  let encoded = encode_pipeline(&HistogramParams::default(), 1, vec![literal_tokens(&values, 0)]);
  assert!(!encoded.codes.use_prefix_code);
  let info = &encoded.codes.encoding_info[0];
  let total: usize = info.iter().map(|e| e.freq as usize).sum();
  assert_eq!(total, ANS_TAB_SIZE);
  assert_streams_recover(&encoded);
}

#[test]
fn test_two_streams_different_distance_multipliers() {
  let mut values = Vec::new();
  for v in 0..64u32 {
    values.extend(std::iter::repeat(v).take(40));
  }
  let tokens = vec![literal_tokens(&values, 0), literal_tokens(&values, 0)];
  let params = HistogramParams {
    lz77_method: Lz77Method::Rle,
    image_widths: vec![0, 64],
    ..Default::default()
  };
  let encoded = encode_pipeline(&params, 1, tokens);
  assert!(encoded.codes.lz77.enabled);
  // the same raw distance takes a special code only where a multiplier
  // is configured
  let dist_a = encoded.tokens_written[0].last().unwrap();
  let dist_b = encoded.tokens_written[1].last().unwrap();
  assert_eq!(dist_a.value, 0);
  assert_eq!(dist_b.value, 1);
  assert_streams_recover(&encoded);
  assert_eq!(
    expand_lz77(&encoded.tokens_written[0], &encoded.codes.lz77, 0),
    values
  );
  assert_eq!(
    expand_lz77(&encoded.tokens_written[1], &encoded.codes.lz77, 64),
    values
  );
}

#[test]
fn test_context_map_structure() {
  // context map covers sources plus the distance context when lz77 fires
  let mut values = Vec::new();
  for v in 0..64u32 {
    values.extend(std::iter::repeat(v).take(40));
  }
  let params = HistogramParams {
    lz77_method: Lz77Method::Rle,
    ..Default::default()
  };
  let encoded = encode_pipeline(&params, 1, vec![literal_tokens(&values, 0)]);
  assert!(encoded.codes.lz77.enabled);
  assert_eq!(encoded.context_map.len(), 2);
  let num_clusters = encoded.codes.encoding_info.len();
  assert!(num_clusters <= CLUSTERS_LIMIT);
  assert!(encoded
    .context_map
    .iter()
    .all(|&c| (c as usize) < num_clusters));
}
