//! Object parser.
//!
//! Recursive descent over lexer tokens. [`parse_object`] reads one direct
//! object; [`parse_indirect_object`] reads an `N G obj ... endobj` block as
//! found at an xref offset, including stream payloads.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

/// Resolves an indirect `/Length` while a stream is being parsed.
pub type LengthResolver<'r> = &'r dyn Fn(ObjectRef) -> Option<i64>;

/// Decode escape sequences in a literal string body.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd` and line continuations.
pub fn decode_literal_string(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'\n' => {},
            b'0'..=b'7' => {
                let mut code = (next - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    code = code * 8 + (raw[i] - b'0') as u32;
                    i += 1;
                    digits += 1;
                }
                out.push((code & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode a hex string body. An odd trailing digit is padded with `0`.
pub fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    for chunk in digits.chunks(2) {
        let hi = hex_value(chunk[0])?;
        let lo = match chunk.get(1) {
            Some(&c) => hex_value(c)?,
            None => 0,
        };
        out.push(hi << 4 | lo);
    }
    Ok(out)
}

fn hex_value(c: u8) -> Result<u8> {
    (c as char)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or_else(|| Error::Parse {
            offset: 0,
            reason: format!("invalid hex digit '{}'", c as char),
        })
}

fn fail(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse one direct object. Streams must carry a direct `/Length` or be
/// terminated by `endstream`.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_with(input, &|_| None)
}

/// Parse one direct object, resolving indirect stream lengths through `lengths`.
pub fn parse_object_with<'a>(input: &'a [u8], lengths: LengthResolver<'_>) -> IResult<&'a [u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(num) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if num >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(num as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(num)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string(raw)))),
        Token::HexString(raw) => {
            let bytes = decode_hex(raw).map_err(|_| fail(input))?;
            Ok((rest, Object::String(bytes)))
        },
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => {
            let mut items = Vec::new();
            let mut cursor = rest;
            loop {
                if let Ok((after, Token::ArrayEnd)) = token(cursor) {
                    return Ok((after, Object::Array(items)));
                }
                let (after, item) = parse_object_with(cursor, lengths)?;
                items.push(item);
                cursor = after;
            }
        },
        Token::DictStart => {
            let (after_dict, dict) = parse_dictionary_body(rest, lengths)?;
            match token(after_dict) {
                Ok((after_kw, Token::StreamStart)) => {
                    let (after_stream, data) = parse_stream_data(after_kw, &dict, lengths)?;
                    Ok((
                        after_stream,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::from(data),
                        },
                    ))
                },
                _ => Ok((after_dict, Object::Dictionary(dict))),
            }
        },
        _ => Err(fail(input)),
    }
}

fn parse_dictionary_body<'a>(
    mut input: &'a [u8],
    lengths: LengthResolver<'_>,
) -> IResult<&'a [u8], Dictionary> {
    let mut dict = Dictionary::new();
    loop {
        let (after, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((after, dict)),
            Token::Name(key) => {
                let (after_value, value) = parse_object_with(after, lengths)?;
                dict.insert(key, value);
                input = after_value;
            },
            _ => return Err(fail(input)),
        }
    }
}

fn parse_stream_data<'a>(
    input: &'a [u8],
    dict: &Dictionary,
    lengths: LengthResolver<'_>,
) -> IResult<&'a [u8], Vec<u8>> {
    let body = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    let declared = match dict.get("Length") {
        Some(Object::Reference(r)) => lengths(*r),
        Some(other) => other.as_integer(),
        None => None,
    };

    if let Some(len) = declared.filter(|&l| l >= 0).map(|l| l as usize) {
        if len <= body.len() {
            if let Ok((after, Token::StreamEnd)) = token(&body[len..]) {
                return Ok((after, body[..len].to_vec()));
            }
        }
        log::debug!("Stream /Length {} does not reach endstream, scanning", len);
    }

    let pos = find_keyword(body, b"endstream").ok_or_else(|| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))
    })?;
    let mut data = &body[..pos];
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&body[pos + b"endstream".len()..], data.to_vec()))
}

/// Position of the first occurrence of `keyword` in `haystack`.
pub fn find_keyword(haystack: &[u8], keyword: &[u8]) -> Option<usize> {
    haystack.windows(keyword.len()).position(|w| w == keyword)
}

fn header_number(input: &[u8], offset: usize) -> Result<(&[u8], i64)> {
    match token(input) {
        Ok((rest, Token::Integer(n))) if n >= 0 => Ok((rest, n)),
        _ => Err(Error::Parse {
            offset,
            reason: "expected object header".to_string(),
        }),
    }
}

/// Parse an `N G obj <object> endobj` block starting at `input`.
///
/// `offset` is only used for error messages. A missing `endobj` is tolerated.
pub fn parse_indirect_object<'a>(
    input: &'a [u8],
    offset: usize,
    lengths: LengthResolver<'_>,
) -> Result<(ObjectRef, Object)> {
    let (rest, num) = header_number(input, offset)?;
    let (rest, gen) = header_number(rest, offset)?;
    let rest = match token(rest) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => {
            return Err(Error::Parse {
                offset,
                reason: format!("missing 'obj' keyword after {} {}", num, gen),
            })
        },
    };
    let (rest, object) = parse_object_with(rest, lengths).map_err(|_| Error::Parse {
        offset,
        reason: format!("malformed body of object {} {}", num, gen),
    })?;
    if !matches!(token(rest), Ok((_, Token::ObjEnd))) {
        log::debug!("Object {} {} at {} has no endobj", num, gen, offset);
    }
    Ok((ObjectRef::new(num as u32, gen as u16), object))
}

/// Parse a trailer dictionary body following the `trailer` keyword.
pub fn parse_trailer(input: &[u8], offset: usize) -> Result<Dictionary> {
    let input = skip_ws(input);
    let input = input.strip_prefix(b"trailer".as_slice()).unwrap_or(input);
    match parse_object(input) {
        Ok((_, Object::Dictionary(dict))) => Ok(dict),
        _ => Err(Error::Parse {
            offset,
            reason: "trailer is not a dictionary".to_string(),
        }),
    }
}
