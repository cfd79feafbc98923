//! Tokenizer for the object syntax.
//!
//! Built on nom combinators. The parser pulls tokens one at a time and
//! decides structure itself; the lexer only knows about delimiters,
//! numbers, strings, names and the handful of keywords the reader needs.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize, value},
    sequence::{pair, preceded, tuple},
    IResult,
};

/// Lexical token.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal string body without the outer parentheses, escapes undecoded
    LiteralString(&'a [u8]),
    /// Hex string body without the angle brackets
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R`
    R,
}

fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip whitespace and comments. Never fails.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let (rest, _) = take_while::<_, _, nom::error::Error<&[u8]>>(is_whitespace)(input)
            .unwrap_or((input, &input[..0]));
        input = rest;
        match comment(input) {
            Ok((rest, _)) => input = rest,
            Err(_) => return input,
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
    )))(input)?;

    let err = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit));
    let text = std::str::from_utf8(text).map_err(|_| err())?;
    let token = if text.contains('.') {
        Token::Real(text.parse().map_err(|_| err())?)
    } else {
        Token::Integer(text.parse().map_err(|_| err())?)
    };
    Ok((rest, token))
}

fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
            },
            _ => {},
        }
        pos += 1;
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    let (rest, body) = preceded(
        char('<'),
        take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
    )(input)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(body)))
}

/// Decode `#xx` escapes in a raw name.
pub fn decode_name(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, raw) =
        preceded(char('/'), take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)))(input)?;
    Ok((rest, Token::Name(decode_name(raw))))
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, word) = alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
    .or_else(|_: nom::Err<nom::error::Error<&[u8]>>| {
        let (rest, word) = take_while1(|c: u8| c.is_ascii_alphabetic())(input)?;
        let token = match word {
            b"true" => Token::True,
            b"false" => Token::False,
            b"null" => Token::Null,
            b"obj" => Token::ObjStart,
            b"endobj" => Token::ObjEnd,
            b"stream" => Token::StreamStart,
            b"endstream" => Token::StreamEnd,
            b"R" => Token::R,
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Tag,
                )))
            },
        };
        Ok((rest, token))
    })?;
    Ok((rest, word))
}

/// Read the next token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((keyword, name, number, literal_string, hex_string))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_and_reals() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-17 "), Ok((&b" "[..], Token::Integer(-17))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"-2.25"), Ok((&b""[..], Token::Real(-2.25))));
    }

    #[test]
    fn test_nested_literal_string() {
        let (rest, tok) = token(b"(a (b) \\) c) x").unwrap();
        assert_eq!(tok, Token::LiteralString(b"a (b) \\) c"));
        assert_eq!(rest, b" x");
    }

    #[test]
    fn test_hex_string_not_dict() {
        assert_eq!(token(b"<48 69>"), Ok((&b""[..], Token::HexString(b"48 69"))));
        assert_eq!(token(b"<<"), Ok((&b""[..], Token::DictStart)));
    }

    #[test]
    fn test_name_escapes() {
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".to_string()))));
        assert_eq!(token(b"/Type/Page"), Ok((&b"/Page"[..], Token::Name("Type".to_string()))));
    }

    #[test]
    fn test_keywords_and_comments() {
        assert_eq!(token(b"% note\n endobj"), Ok((&b""[..], Token::ObjEnd)));
        assert_eq!(token(b"R]"), Ok((&b"]"[..], Token::R)));
        assert!(token(b"trailer").is_err());
    }
}
