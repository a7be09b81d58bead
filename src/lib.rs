//! Context-modeled entropy coding core for image codecs: hybrid-uint
//! tokenization, greedy context clustering, rANS with alias-table
//! sampling or length-limited prefix codes, and an optional LZ77
//! pre-pass over the token streams.
//!
//! The two entry points are [`build_and_encode_histograms`], which turns
//! token streams into an [`EntropyEncodingData`] model and serializes it,
//! and [`write_tokens`], which codes one stream against a built model.

pub use ans::encoding::EncSymbolInfo;
pub use bit_writer::{BitSink, BitWriter, SizeWriter};
pub use encode::{build_and_encode_histograms, encode_histograms, write_tokens, EntropyEncodingData};
pub use histogram::Histogram;
pub use hybrid_uint::HybridUintConfig;
pub use params::{
  AnsHistogramStrategy, ClusteringType, HistogramParams, HybridUintMethod, Lz77Method, Lz77Params,
};
pub use token::Token;

pub mod constants;
pub mod errors;

mod ans;
mod bit_writer;
mod bits;
mod cluster;
mod context_map;
mod encode;
mod histogram;
mod hybrid_uint;
mod lz77;
mod params;
mod prefix;
mod token;

#[cfg(test)]
mod tests;
