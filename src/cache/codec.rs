//! Pluggable payload codecs
//!
//! Codecs are chained by [`CodecPipeline`]. The encoded text carries the
//! names of the codecs that produced it, so a record can always be decoded
//! no matter how the cache is configured when it is read back.
//!
//! [`ObfuscationCodec`] is a placeholder that only base64-encodes its input.
//! It hides nothing from anyone who looks and must not be treated as
//! encryption.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::sync::Arc;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const PLAIN: &str = "plain";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  #[error("compression failed: {0}")]
  Compress(#[source] std::io::Error),
  #[error("decompression failed: {0}")]
  Decompress(#[source] std::io::Error),
  #[error("invalid base64 payload: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("payload is not valid UTF-8")]
  Utf8(#[from] std::string::FromUtf8Error),
  #[error("unknown codec: {0}")]
  Unknown(String),
  #[error("missing codec header")]
  MissingHeader,
}

/// A reversible byte transform
pub trait Codec: Send + Sync {
  /// Name written into the encoded header
  fn name(&self) -> &'static str;
  fn encode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
  fn decode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Gzip compression
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
  level: Compression,
}

impl Default for GzipCodec {
  fn default() -> Self {
    Self {
      level: Compression::default(),
    }
  }
}

impl GzipCodec {
  pub fn new(level: u32) -> Self {
    Self {
      level: Compression::new(level),
    }
  }
}

impl Codec for GzipCodec {
  fn name(&self) -> &'static str {
    "gzip"
  }

  fn encode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), self.level);
    encoder.write_all(input).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
  }

  fn decode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::with_capacity(input.len() * 2);
    decoder
      .read_to_end(&mut out)
      .map_err(CodecError::Decompress)?;
    Ok(out)
  }
}

/// Base64 placeholder for the "encryption" hook. Not a security control.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObfuscationCodec;

impl Codec for ObfuscationCodec {
  fn name(&self) -> &'static str {
    "obfuscate"
  }

  fn encode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.encode(input).into_bytes())
  }

  fn decode(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(input)?)
  }
}

fn codec_by_name(name: &str) -> Option<Arc<dyn Codec>> {
  match name {
    "gzip" => Some(Arc::new(GzipCodec::default())),
    "obfuscate" => Some(Arc::new(ObfuscationCodec)),
    _ => None,
  }
}

/// Whether `bytes` start with the gzip magic number
pub fn is_gzip(bytes: &[u8]) -> bool {
  bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Ordered chain of codecs.
///
/// Encoded format: `<name>[+<name>...]:<base64 payload>`, or `plain:<text>`
/// when the chain is empty.
#[derive(Clone, Default)]
pub struct CodecPipeline {
  codecs: Vec<Arc<dyn Codec>>,
}

impl std::fmt::Debug for CodecPipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.codecs.iter().map(|c| c.name()))
      .finish()
  }
}

impl CodecPipeline {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, codec: impl Codec + 'static) -> Self {
    self.codecs.push(Arc::new(codec));
    self
  }

  /// Pipeline for the cache's `compress` / `encrypt` flags
  pub fn from_flags(compress: bool, obfuscate: bool) -> Self {
    let mut pipeline = Self::new();
    if compress {
      pipeline = pipeline.with(GzipCodec::default());
    }
    if obfuscate {
      pipeline = pipeline.with(ObfuscationCodec);
    }
    pipeline
  }

  pub fn is_empty(&self) -> bool {
    self.codecs.is_empty()
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.codecs.iter().map(|c| c.name()).collect()
  }

  pub fn encode_bytes(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut bytes = input.to_vec();
    for codec in &self.codecs {
      bytes = codec.encode(&bytes)?;
    }
    Ok(bytes)
  }

  pub fn encode_str(&self, plain: &str) -> Result<String, CodecError> {
    if self.codecs.is_empty() {
      return Ok(format!("{}:{}", PLAIN, plain));
    }
    let bytes = self.encode_bytes(plain.as_bytes())?;
    Ok(format!("{}:{}", self.names().join("+"), STANDARD.encode(bytes)))
  }

  /// Decode text produced by any pipeline's `encode_str`.
  pub fn decode_str(encoded: &str) -> Result<String, CodecError> {
    let (header, payload) = encoded.split_once(':').ok_or(CodecError::MissingHeader)?;
    if header == PLAIN {
      return Ok(payload.to_string());
    }

    let mut bytes = STANDARD.decode(payload)?;
    for name in header.split('+').rev() {
      let codec = codec_by_name(name).ok_or_else(|| CodecError::Unknown(name.to_string()))?;
      bytes = codec.decode(&bytes)?;
    }
    Ok(String::from_utf8(bytes)?)
  }
}
