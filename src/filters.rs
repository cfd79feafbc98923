//! Stream codec collaborator.
//!
//! The document core never compresses bytes itself: it hands a stream's
//! payload and filter chain to a [`StreamCodec`]. [`StandardCodec`] covers
//! what the reader and writer need (`FlateDecode` both ways with PNG
//! predictors on decode, `LZWDecode` and `ASCIIHexDecode` on decode).

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Encodes and decodes stream payloads for a filter chain.
pub trait StreamCodec: Send + Sync {
    /// Encode `raw` with `filters`, applied so that decoding in list order restores it.
    fn encode(&self, raw: &[u8], filters: &[String]) -> Result<Vec<u8>>;

    /// Decode `data` through `filters` in order, with matching decode parameters.
    fn decode(&self, data: &[u8], filters: &[String], params: &[Option<Dictionary>]) -> Result<Vec<u8>>;
}

/// Default codec backed by flate2 and weezl.
#[derive(Debug, Clone, Copy)]
pub struct StandardCodec {
    level: u32,
}

impl Default for StandardCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl StandardCodec {
    /// Codec compressing at the given zlib level (0-9).
    pub fn with_level(level: u32) -> Self {
        Self { level: level.min(9) }
    }

    fn deflate(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }
}

impl StreamCodec for StandardCodec {
    fn encode(&self, raw: &[u8], filters: &[String]) -> Result<Vec<u8>> {
        let mut data = raw.to_vec();
        for filter in filters.iter().rev() {
            data = match filter.as_str() {
                "FlateDecode" | "Fl" => self.deflate(&data)?,
                other => return Err(Error::UnsupportedFilter(other.to_string())),
            };
        }
        Ok(data)
    }

    fn decode(&self, data: &[u8], filters: &[String], params: &[Option<Dictionary>]) -> Result<Vec<u8>> {
        let mut data = data.to_vec();
        for (i, filter) in filters.iter().enumerate() {
            let parms = params.get(i).and_then(Option::as_ref);
            data = match filter.as_str() {
                "FlateDecode" | "Fl" => {
                    let mut out = Vec::new();
                    ZlibDecoder::new(data.as_slice())
                        .read_to_end(&mut out)
                        .map_err(|e| Error::Decode(format!("FlateDecode: {}", e)))?;
                    apply_predictor(out, parms)?
                },
                "LZWDecode" | "LZW" => {
                    let early = parms
                        .and_then(|p| p.get("EarlyChange"))
                        .and_then(Object::as_integer)
                        .unwrap_or(1);
                    let mut decoder = if early == 0 {
                        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
                    } else {
                        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                    };
                    let out = decoder
                        .decode(&data)
                        .map_err(|e| Error::Decode(format!("LZWDecode: {:?}", e)))?;
                    apply_predictor(out, parms)?
                },
                "ASCIIHexDecode" | "AHx" => {
                    let end = data.iter().position(|&c| c == b'>').unwrap_or(data.len());
                    crate::parser::decode_hex(&data[..end])?
                },
                other => return Err(Error::UnsupportedFilter(other.to_string())),
            };
        }
        Ok(data)
    }
}

/// Filter names declared by a stream dictionary, in application order.
pub fn stream_filters(dict: &Dictionary) -> Vec<String> {
    match dict.get("Filter") {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode parameters declared by a stream dictionary, aligned with [`stream_filters`].
pub fn stream_decode_params(dict: &Dictionary) -> Vec<Option<Dictionary>> {
    match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(d.clone())],
        Some(Object::Array(items)) => items.iter().map(|o| o.as_dict().cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Decode a stream object's payload with `codec`.
pub fn decode_stream(codec: &dyn StreamCodec, stream: &Object) -> Result<Vec<u8>> {
    match stream {
        Object::Stream { dict, data } => {
            codec.decode(data, &stream_filters(dict), &stream_decode_params(dict))
        },
        other => Err(Error::wrong_type("Stream", other.type_name())),
    }
}

fn apply_predictor(data: Vec<u8>, parms: Option<&Dictionary>) -> Result<Vec<u8>> {
    let int = |key: &str, default: i64| {
        parms
            .and_then(|p| p.get(key))
            .and_then(Object::as_integer)
            .unwrap_or(default)
    };
    let predictor = int("Predictor", 1);
    if predictor < 10 {
        if predictor == 2 {
            return Err(Error::UnsupportedFilter("TIFF predictor".to_string()));
        }
        return Ok(data);
    }

    let colors = int("Colors", 1).max(1) as usize;
    let bits = int("BitsPerComponent", 8).max(1) as usize;
    let columns = int("Columns", 1).max(1) as usize;
    let bpp = (colors * bits).div_ceil(8).max(1);
    let row_len = (colors * bits * columns).div_ceil(8);

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < 2 {
            break;
        }
        let filter_type = chunk[0];
        let mut row = chunk[1..].to_vec();
        row.resize(row_len, 0);
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            row[i] = match filter_type {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::Decode(format!("unknown PNG filter type {}", other)))
                },
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
