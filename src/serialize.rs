//! Response blob codec.
//!
//! Cached responses are stored as a self-describing MessagePack map with
//! the body compressed by the configured codec. Unknown fields in the map
//! are ignored on read; entries written without a compression tag decode
//! as gzip.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Compression;
use crate::error::{Error, Result};
use crate::freshness::unix_now;
use crate::{HttpResponse, HttpVersion};

/// The on-wire record. Field names are part of the stored format.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPayload {
    status: u16,
    url: String,
    http_version: HttpVersion,
    #[serde(default)]
    reason: Option<String>,
    headers: HashMap<String, String>,
    #[serde(default)]
    encoding: Option<String>,
    cached_at: f64,
    #[serde(default)]
    compression: Option<String>,
    #[serde(with = "serde_bytes")]
    body_compressed: Vec<u8>,
}

/// Encodes a response into a storable blob, stamping the current wall
/// clock as `cached_at`.
///
/// `content-encoding` and `content-length` are stripped first: the stored
/// body is the already-decoded payload, so both would lie on replay.
pub fn serialize_response(
    response: &HttpResponse,
    compression: Compression,
) -> Result<Vec<u8>> {
    let mut headers = response.headers.clone();
    headers.retain(|name, _| {
        !name.eq_ignore_ascii_case("content-encoding")
            && !name.eq_ignore_ascii_case("content-length")
    });

    let payload = CachedPayload {
        status: response.status,
        url: response.url.to_string(),
        http_version: response.version,
        reason: response.reason.clone(),
        headers,
        encoding: response.encoding.clone(),
        cached_at: unix_now(),
        compression: Some(compression.tag().to_string()),
        body_compressed: compress(&response.body, compression)?,
    };

    rmp_serde::to_vec_named(&payload)
        .map_err(|err| Error::Corruption(format!("encode failed: {err}")))
}

/// Decodes a blob back into a response plus its `cached_at` stamp.
pub fn deserialize_response(blob: &[u8]) -> Result<(HttpResponse, f64)> {
    let payload: CachedPayload = rmp_serde::from_slice(blob)
        .map_err(|err| Error::Corruption(format!("decode failed: {err}")))?;

    let codec = Compression::from_tag(payload.compression.as_deref());
    let body = decompress(&payload.body_compressed, codec)?;
    let url = Url::parse(&payload.url)
        .map_err(|err| Error::Corruption(format!("bad stored url: {err}")))?;

    let response = HttpResponse {
        status: payload.status,
        url,
        version: payload.http_version,
        reason: payload.reason,
        headers: payload.headers,
        encoding: payload.encoding,
        body,
    };
    Ok((response, payload.cached_at))
}

fn compress(data: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            );
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|err| {
                    Error::Corruption(format!("gzip compression failed: {err}"))
                })
        }
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        Compression::Zstd => zstd::encode_all(data, 3).map_err(|err| {
            Error::Corruption(format!("zstd compression failed: {err}"))
        }),
        Compression::None => Ok(data.to_vec()),
    }
}

fn decompress(data: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::Gzip => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|err| {
                    Error::Corruption(format!("gzip decompression failed: {err}"))
                })?;
            Ok(out)
        }
        Compression::Lz4 => {
            lz4_flex::decompress_size_prepended(data).map_err(|err| {
                Error::Corruption(format!("lz4 decompression failed: {err}"))
            })
        }
        Compression::Zstd => zstd::decode_all(data).map_err(|err| {
            Error::Corruption(format!("zstd decompression failed: {err}"))
        }),
        Compression::None => Ok(data.to_vec()),
    }
}
