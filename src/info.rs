//! Document information dictionary.
//!
//! Wraps the `/Info` dictionary with typed accessors, the PDF date format
//! (`D:YYYYMMDDHHmmSS+HH'mm'`) and the producer provenance rule applied on
//! every writing close.

use crate::object::{Dictionary, Object};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone};

/// Marker separating the original producer from the tool that modified it.
pub const MODIFIED_USING: &str = "; modified using";

/// Product name used in the producer line.
pub fn product_name() -> &'static str {
    crate::NAME
}

/// Producer line written by this library, e.g. `pdf_graph 0.3.0`.
pub fn producer_version() -> String {
    format!("{} {}", crate::NAME, crate::VERSION)
}

/// Producer for a document being stamped.
///
/// When there is no previous producer, or `version` does not name
/// `product`, the result is `version`. Otherwise any earlier
/// `"; modified using ..."` tail is replaced by one naming `version`.
pub fn add_modified_postfix(producer: Option<&str>, version: &str, product: &str) -> String {
    match producer {
        Some(producer) if version.contains(product) => {
            let base = producer
                .find(MODIFIED_USING)
                .map_or(producer, |idx| &producer[..idx]);
            format!("{}{} {}", base, MODIFIED_USING, version)
        },
        _ => version.to_string(),
    }
}

/// Format a timestamp as a PDF date string.
pub fn format_pdf_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let offset = date.offset().fix().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    format!(
        "D:{}{}{:02}'{:02}'",
        date.format("%Y%m%d%H%M%S"),
        sign,
        minutes / 60,
        minutes % 60
    )
}

/// Current local time as a PDF date string.
pub fn pdf_date_now() -> String {
    format_pdf_date(&Local::now())
}

/// Parse a PDF date string. Missing trailing fields default to their minimum;
/// a missing zone is read as UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(s) => s.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits[..4].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 2, 1)?, field(6, 2, 1)?)?;
    let time = NaiveTime::from_hms_opt(field(8, 2, 0)?, field(10, 2, 0)?, field(12, 2, 0)?)?;

    let zone = &text[digits.len()..];
    let offset_secs = match zone.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let nums: Vec<i32> = zone[1..]
                .split('\'')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            let secs = nums.first().copied().unwrap_or(0) * 3600 + nums.get(1).copied().unwrap_or(0) * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        },
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
}

/// Encode text as a PDF text string: plain bytes for ASCII, UTF-16BE with BOM otherwise.
pub fn encode_text_string(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        return text.as_bytes().to_vec();
    }
    let mut out = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

/// Decode a PDF text string.
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        },
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Mutable view of the `/Info` dictionary.
#[derive(Debug)]
pub struct DocumentInfo<'a> {
    dict: &'a mut Dictionary,
}

impl<'a> DocumentInfo<'a> {
    /// Wrap an info dictionary.
    pub fn new(dict: &'a mut Dictionary) -> Self {
        Self { dict }
    }

    /// Text value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.dict.get(key).and_then(Object::as_string).map(decode_text_string)
    }

    /// Set a text value.
    pub fn put(&mut self, key: &str, value: &str) -> &mut Self {
        self.dict
            .insert(key.to_string(), Object::String(encode_text_string(value)));
        self
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.dict.shift_remove(key);
        self
    }

    /// `/Title`
    pub fn title(&self) -> Option<String> {
        self.get("Title")
    }

    /// Set `/Title`.
    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.put("Title", title)
    }

    /// `/Author`
    pub fn author(&self) -> Option<String> {
        self.get("Author")
    }

    /// Set `/Author`.
    pub fn set_author(&mut self, author: &str) -> &mut Self {
        self.put("Author", author)
    }

    /// Set `/Subject`.
    pub fn set_subject(&mut self, subject: &str) -> &mut Self {
        self.put("Subject", subject)
    }

    /// Set `/Keywords`.
    pub fn set_keywords(&mut self, keywords: &str) -> &mut Self {
        self.put("Keywords", keywords)
    }

    /// Set `/Creator`.
    pub fn set_creator(&mut self, creator: &str) -> &mut Self {
        self.put("Creator", creator)
    }

    /// `/Producer`
    pub fn producer(&self) -> Option<String> {
        self.get("Producer")
    }

    /// Set `/Producer`.
    pub fn set_producer(&mut self, producer: &str) -> &mut Self {
        self.put("Producer", producer)
    }

    /// Stamp `/CreationDate` with the current time.
    pub fn add_creation_date(&mut self) -> &mut Self {
        let now = pdf_date_now();
        self.dict.insert("CreationDate".into(), Object::string(now));
        self
    }

    /// Stamp `/ModDate` with the current time.
    pub fn add_mod_date(&mut self) -> &mut Self {
        let now = pdf_date_now();
        self.dict.insert("ModDate".into(), Object::string(now));
        self
    }

    /// Set several entries at once; `None` values remove the key.
    pub fn set_more_info<'k>(
        &mut self,
        entries: impl IntoIterator<Item = (&'k str, Option<&'k str>)>,
    ) -> &mut Self {
        for (key, value) in entries {
            match value {
                Some(v) => self.put(key, v),
                None => self.remove(key),
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_postfix_without_producer() {
        assert_eq!(add_modified_postfix(None, "pdf_graph 1.0", "pdf_graph"), "pdf_graph 1.0");
    }

    #[test]
    fn test_postfix_appended_once() {
        let first = add_modified_postfix(Some("Acme Writer"), "pdf_graph 1.0", "pdf_graph");
        assert_eq!(first, "Acme Writer; modified using pdf_graph 1.0");
        let second = add_modified_postfix(Some(&first), "pdf_graph 1.1", "pdf_graph");
        assert_eq!(second, "Acme Writer; modified using pdf_graph 1.1");
    }

    #[test]
    fn test_postfix_when_version_lacks_product() {
        assert_eq!(add_modified_postfix(Some("Acme"), "custom build", "pdf_graph"), "custom build");
    }

    #[test]
    fn test_date_format() {
        let offset = FixedOffset::east_opt(2 * 3600 + 30 * 60).unwrap();
        let date = offset.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(format_pdf_date(&date), "D:20240305140709+02'30'");
        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        let date = west.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(format_pdf_date(&date), "D:20240305140709-05'00'");
    }

    #[test]
    fn test_date_parse() {
        let parsed = parse_pdf_date("D:20240305140709+02'30'").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 3, 5));
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.offset().local_minus_utc(), 9000);
        let short = parse_pdf_date("D:1999").unwrap();
        assert_eq!((short.month(), short.day()), (1, 1));
        assert!(parse_pdf_date("garbage").is_none());
    }

    #[test]
    fn test_text_strings() {
        assert_eq!(encode_text_string("plain"), b"plain".to_vec());
        let encoded = encode_text_string("Grüße");
        assert_eq!(&encoded[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text_string(&encoded), "Grüße");
    }

    #[test]
    fn test_info_view() {
        let mut dict = Dictionary::new();
        let mut info = DocumentInfo::new(&mut dict);
        info.set_title("Report").set_author("Kim");
        info.set_more_info([("Subject", Some("Q3")), ("Author", None)]);
        assert_eq!(info.title().as_deref(), Some("Report"));
        assert!(info.author().is_none());
        assert!(dict.contains_key("Subject"));
    }
}
