// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON-lines decoder output parser.
//!
//! Each line is one JSON object tagged by its `type` field:
//! ```text
//! {"type":"MON-SPAN","blocks":[{"bin_center_freqs":[...],"spectrum":[...],"pga":54}]}
//! {"type":"NAV-PVT","year":2024,"month":1,"day":1,"fix_type":3,"lat":51.5,"lon":-0.1}
//! {"type":"ERROR","class":10,"id":49,"message":"checksum mismatch"}
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::{ParseError, PositionFix, Protocol, SpanSnapshot, UbxMessage};

const TYPE_SPAN: &str = "MON-SPAN";
const TYPE_PVT: &str = "NAV-PVT";
const TYPE_ERROR: &str = "ERROR";

/// Parser for JSON-lines decoder output.
#[derive(Debug, Default)]
pub struct JsonLinesParser;

impl JsonLinesParser {
    /// Create a new JSON-lines parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
struct DecodeErrorRecord {
    #[serde(default)]
    class: Option<u8>,
    #[serde(default)]
    id: Option<u8>,
    #[serde(default)]
    message: String,
}

impl Protocol for JsonLinesParser {
    type Message = UbxMessage;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<UbxMessage>, ParseError> {
        let line = input.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_slice(line)?;
        parse_message(value).map(Some)
    }
}

fn parse_message(value: Value) -> Result<UbxMessage, ParseError> {
    let Some(object) = value.as_object() else {
        return Err(ParseError::InvalidFormat(
            "expected a JSON object".to_string(),
        ));
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("type"))?
        .to_owned();

    match kind.as_str() {
        TYPE_SPAN => {
            let snapshot: SpanSnapshot = serde_json::from_value(value)?;
            snapshot.validate()?;
            Ok(UbxMessage::Spectrum(snapshot))
        }
        TYPE_PVT => Ok(UbxMessage::Fix(serde_json::from_value::<PositionFix>(value)?)),
        TYPE_ERROR => {
            let record: DecodeErrorRecord = serde_json::from_value(value)?;
            Ok(UbxMessage::DecodeError {
                class: record.class,
                id: record.id,
                message: record.message,
            })
        }
        _ => Ok(UbxMessage::Unrecognized(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_span() {
        let mut parser = JsonLinesParser::new();
        let line = br#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0],"spectrum":[40.5,41.25],"pga":54}]}"#;
        let result = parser.parse(line).unwrap();
        assert!(matches!(
            result,
            Some(UbxMessage::Spectrum(SpanSnapshot { ref blocks }))
            if blocks.len() == 1
                && blocks[0].pga == 54
                && blocks[0].spectrum == vec![40.5, 41.25]
        ));
    }

    #[test]
    fn test_parse_pvt() {
        let mut parser = JsonLinesParser::new();
        let line = br#"{"type":"NAV-PVT","itow":1000,"year":2024,"month":1,"day":2,"fix_type":3,"num_sv":14,"lat":33.9425,"lon":-118.4081,"height":38.0}"#;
        let result = parser.parse(line).unwrap();
        assert!(matches!(
            result,
            Some(UbxMessage::Fix(ref fix))
            if fix.num_sv == 14
                && (fix.lat - 33.9425).abs() < 1e-9
                && fix.has_position()
        ));
    }

    #[test]
    fn test_parse_decoder_error() {
        let mut parser = JsonLinesParser::new();
        let line = br#"{"type":"ERROR","class":10,"id":49,"message":"checksum mismatch"}"#;
        let result = parser.parse(line).unwrap();
        assert_eq!(
            result,
            Some(UbxMessage::DecodeError {
                class: Some(10),
                id: Some(49),
                message: "checksum mismatch".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_unrecognized_type() {
        let mut parser = JsonLinesParser::new();
        let result = parser.parse(br#"{"type":"NAV-SAT","numSvs":0}"#).unwrap();
        assert_eq!(result, Some(UbxMessage::Unrecognized("NAV-SAT".to_string())));
    }

    #[test]
    fn test_parse_mismatched_block_is_error() {
        let mut parser = JsonLinesParser::new();
        let line = br#"{"type":"MON-SPAN","blocks":[{"bin_center_freqs":[1.0,2.0,3.0],"spectrum":[40.0],"pga":54}]}"#;
        assert!(matches!(
            parser.parse(line),
            Err(ParseError::MismatchedBlock { block: 0, .. })
        ));
    }

    #[test]
    fn test_parse_missing_type() {
        let mut parser = JsonLinesParser::new();
        assert!(matches!(
            parser.parse(br#"{"blocks":[]}"#),
            Err(ParseError::MissingField("type"))
        ));
    }

    #[test]
    fn test_parse_non_object() {
        let mut parser = JsonLinesParser::new();
        assert!(matches!(
            parser.parse(b"[1,2,3]"),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_garbage() {
        let mut parser = JsonLinesParser::new();
        assert!(matches!(parser.parse(b"\xb5b\x0a\x31"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_blank_line() {
        let mut parser = JsonLinesParser::new();
        assert!(parser.parse(b"").unwrap().is_none());
        assert!(parser.parse(b"  \r\n").unwrap().is_none());
    }
}
