use crate::bit_writer::BitSink;
use crate::bits;
use crate::constants::Bitlen;

/// Controls how an integer splits into a token symbol plus raw extra bits.
///
/// Values below `1 << split_exponent` become the token directly and carry
/// no extra bits. A larger value with highest set bit `n` packs its size
/// class `n`, the `msb_in_token` bits just below the leading one, and its
/// lowest `lsb_in_token` bits into the token; the `n - msb - lsb` middle
/// bits are emitted raw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HybridUintConfig {
  pub split_exponent: Bitlen,
  pub msb_in_token: Bitlen,
  pub lsb_in_token: Bitlen,
}

impl Default for HybridUintConfig {
  fn default() -> Self {
    Self::new(4, 1, 0)
  }
}

impl HybridUintConfig {
  pub fn new(split_exponent: Bitlen, msb_in_token: Bitlen, lsb_in_token: Bitlen) -> Self {
    debug_assert!(msb_in_token + lsb_in_token <= split_exponent);
    Self {
      split_exponent,
      msb_in_token,
      lsb_in_token,
    }
  }

  /// Returns `(token, nbits, bits)`.
  #[inline]
  pub fn encode(&self, value: u32) -> (u32, Bitlen, u32) {
    let split = 1u32 << self.split_exponent;
    if value < split {
      return (value, 0, 0);
    }
    let n = bits::floor_log2_nonzero(value);
    let m = value - (1 << n);
    let token = split
      + ((n - self.split_exponent) << (self.msb_in_token + self.lsb_in_token))
      + ((m >> (n - self.msb_in_token)) << self.lsb_in_token)
      + (m & ((1 << self.lsb_in_token) - 1));
    let nbits = n - self.msb_in_token - self.lsb_in_token;
    let bits = (value >> self.lsb_in_token) & ((1u32 << nbits) - 1);
    (token, nbits, bits)
  }

  /// Exact inverse of [`Self::encode`]: the number of raw bits is implied
  /// by the token, so only their value is needed.
  #[inline]
  pub fn decode(&self, token: u32, bits: u32) -> u32 {
    let split = 1u32 << self.split_exponent;
    if token < split {
      return token;
    }
    let mlb = self.msb_in_token + self.lsb_in_token;
    let t = token - split;
    let n = (t >> mlb) + self.split_exponent;
    let nbits = n - mlb;
    let low = t & ((1 << self.lsb_in_token) - 1);
    let msbs = (t >> self.lsb_in_token) & ((1 << self.msb_in_token) - 1);
    ((((1 << self.msb_in_token) | msbs) << nbits | bits) << self.lsb_in_token) | low
  }

  /// Number of raw bits `encode` would emit for `value`.
  #[inline]
  pub fn nbits(&self, value: u32) -> Bitlen {
    self.encode(value).1
  }

  pub(crate) fn store<W: BitSink>(&self, writer: &mut W, log_alpha_size: Bitlen) {
    writer.write(
      self.split_exponent as u64,
      bits::ceil_log2_nonzero(log_alpha_size + 1),
    );
    if self.split_exponent == log_alpha_size {
      return; // msb/lsb don't matter
    }
    let nbits = bits::ceil_log2_nonzero(self.split_exponent + 1);
    writer.write(self.msb_in_token as u64, nbits);
    let nbits = bits::ceil_log2_nonzero(self.split_exponent - self.msb_in_token + 1);
    writer.write(self.lsb_in_token as u64, nbits);
  }
}

pub(crate) fn store_uint_configs<W: BitSink>(
  configs: &[HybridUintConfig],
  writer: &mut W,
  log_alpha_size: Bitlen,
) {
  for cfg in configs {
    cfg.store(writer, log_alpha_size);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_examples() {
    let cfg = HybridUintConfig::default();
    assert_eq!(cfg.encode(7), (7, 0, 0));
    assert_eq!(cfg.encode(15), (15, 0, 0));
    // 100 = 1100100b: size class 6, msb 1, raw bits 00100b
    assert_eq!(cfg.encode(100), (21, 5, 4));
  }

  #[test]
  fn test_token_only_config() {
    let cfg = HybridUintConfig::new(0, 0, 0);
    assert_eq!(cfg.encode(0), (0, 0, 0));
    let (token, nbits, bits) = cfg.encode(1);
    assert_eq!((token, nbits, bits), (1, 0, 0));
    let (token, nbits, _) = cfg.encode(12);
    assert_eq!(token, 4);
    assert_eq!(nbits, 3);
  }

  #[test]
  fn test_round_trip() {
    let configs = [
      HybridUintConfig::new(0, 0, 0),
      HybridUintConfig::new(2, 0, 1),
      HybridUintConfig::new(4, 1, 0),
      HybridUintConfig::new(4, 2, 2),
      HybridUintConfig::new(5, 1, 2),
      HybridUintConfig::new(7, 0, 0),
      HybridUintConfig::new(12, 3, 4),
    ];
    for cfg in configs {
      let mut value = 0u32;
      let mut step = 1;
      while value < (1 << 30) {
        let (token, nbits, bits) = cfg.encode(value);
        assert_eq!(
          cfg.decode(token, bits),
          value,
          "cfg {:?} value {}",
          cfg,
          value
        );
        // token plus raw bits can never beat the information content
        let min_bits = 32 - (value + 1).leading_zeros();
        assert!(nbits + 32 - token.leading_zeros() + 1 >= min_bits);
        value += step;
        step = step.wrapping_mul(3) / 2 + 1;
      }
    }
  }
}
