//! Response body compression.
//!
//! Only successful textual bodies at or above a size threshold are encoded.
//! Preference is fixed: brotli, then gzip, then deflate (zlib container).

use std::io::Write;

use axum::http::StatusCode;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// Content codings the server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
}

impl Encoding {
    /// Value for `Content-Encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Best coding offered by an `Accept-Encoding` value.
    ///
    /// Codings listed with `q=0` are treated as refused.
    pub fn negotiate(accept: &str) -> Option<Self> {
        let offered: Vec<String> = accept
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';');
                let name = parts.next()?.trim().to_ascii_lowercase();
                let refused = parts.any(|param| {
                    let param = param.trim();
                    param
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        .is_some_and(|q| q <= 0.0)
                });
                (!name.is_empty() && !refused).then_some(name)
            })
            .collect();

        [Encoding::Brotli, Encoding::Gzip, Encoding::Deflate]
            .into_iter()
            .find(|encoding| offered.iter().any(|name| name == encoding.as_str()))
    }

    /// Encode the whole body.
    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Encoding::Brotli => {
                let mut encoder = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                encoder.write_all(data)?;
                Ok(encoder.into_inner())
            }
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a buffered body qualifies for compression at all.
pub fn should_compress(status: StatusCode, textual: bool, len: usize, min_bytes: usize) -> bool {
    status == StatusCode::OK && textual && len >= min_bytes
}
