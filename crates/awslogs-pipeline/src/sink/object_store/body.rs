// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;

use crate::config::{FileFormat, LogFormat, TimeZone};
use crate::errors::SinkError;
use crate::record::Record;

/// Wrapper for messages that are not JSON objects themselves.
#[derive(Serialize)]
struct TextEntry<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    message: &'a str,
}

/// Settings that decide how a batch becomes an object body.
#[derive(Debug, Clone, Copy)]
pub struct BodyFormat {
    pub file_format: FileFormat,
    pub log_format: Option<LogFormat>,
    pub time_zone: TimeZone,
}

impl BodyFormat {
    /// Renders `records` as a single JSON document.
    pub fn render(&self, records: &[Record]) -> Result<Vec<u8>, SinkError> {
        let mut out = Vec::new();
        let (open, separator, close): (&[u8], &[u8], &[u8]) = match self.file_format {
            FileFormat::JsonHive => (b"", b"\n", b"\n"),
            FileFormat::JsonArray => (b"[", b",", b"]"),
            FileFormat::JsonRecordsArray => (br#"{"Records":["#, b",", b"]}"),
        };

        out.extend_from_slice(open);
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(separator);
            }
            self.write_entry(&mut out, record)?;
        }
        if !records.is_empty() || self.file_format != FileFormat::JsonHive {
            out.extend_from_slice(close);
        }
        Ok(out)
    }

    fn write_entry(&self, out: &mut Vec<u8>, record: &Record) -> Result<(), SinkError> {
        let message = record.message();
        let raw = message.strip_suffix('\n').unwrap_or(message);
        if self.embeds_raw(raw) {
            out.extend_from_slice(raw.as_bytes());
        } else {
            let entry = TextEntry {
                timestamp: self.time_zone.iso_timestamp(record.timestamp()),
                message,
            };
            serde_json::to_writer(&mut *out, &entry)?;
        }
        Ok(())
    }

    fn embeds_raw(&self, message: &str) -> bool {
        match self.log_format {
            Some(LogFormat::Json) => true,
            Some(LogFormat::Text) => false,
            None => is_json_object(message),
        }
    }
}

/// Whether `message` is a complete JSON object.
fn is_json_object(message: &str) -> bool {
    message.starts_with('{')
        && message.ends_with('}')
        && serde_json::from_str::<serde::de::IgnoredAny>(message).is_ok()
}

/// Gzip-compresses `body` at `level` (0-9).
pub fn gzip(body: &[u8], level: u32) -> Result<Vec<u8>, SinkError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn format(file_format: FileFormat, log_format: Option<LogFormat>) -> BodyFormat {
        BodyFormat {
            file_format,
            log_format,
            time_zone: TimeZone::Utc,
        }
    }

    fn render(file_format: FileFormat, records: &[Record]) -> String {
        String::from_utf8(format(file_format, None).render(records).unwrap()).unwrap()
    }

    fn batch() -> Vec<Record> {
        vec![
            Record::new(0, "plain text"),
            Record::new(1_000, "{\"level\":\"info\",\"n\":1}\n"),
        ]
    }

    #[test]
    fn test_json_hive_writes_one_object_per_line() {
        let body = render(FileFormat::JsonHive, &batch());
        assert_eq!(
            body,
            "{\"@timestamp\":\"1970-01-01T00:00:00.000Z\",\"message\":\"plain text\"}\n\
             {\"level\":\"info\",\"n\":1}\n"
        );
    }

    #[test]
    fn test_array_formats_are_valid_json() {
        let array: serde_json::Value =
            serde_json::from_str(&render(FileFormat::JsonArray, &batch())).unwrap();
        assert_eq!(array.as_array().unwrap().len(), 2);
        assert_eq!(array[1]["n"], 1);

        let wrapped: serde_json::Value =
            serde_json::from_str(&render(FileFormat::JsonRecordsArray, &batch())).unwrap();
        assert_eq!(wrapped["Records"][0]["message"], "plain text");
    }

    #[test]
    fn test_brace_delimited_text_is_not_treated_as_json() {
        let body = render(FileFormat::JsonArray, &[Record::new(0, "{not json}")]);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed[0]["message"], "{not json}");
    }

    #[test]
    fn test_log_format_overrides_detection() {
        let records = [Record::new(0, "{\"a\":1}")];
        let text = format(FileFormat::JsonArray, Some(LogFormat::Text))
            .render(&records)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&text).unwrap();
        assert_eq!(parsed[0]["message"], "{\"a\":1}");

        let json = format(FileFormat::JsonArray, Some(LogFormat::Json))
            .render(&records)
            .unwrap();
        assert_eq!(json, b"[{\"a\":1}]");
    }

    #[test]
    fn test_timestamps_follow_time_zone() {
        let zoned = BodyFormat {
            file_format: FileFormat::JsonHive,
            log_format: Some(LogFormat::Text),
            time_zone: "+02:00".parse().unwrap(),
        };
        let body = String::from_utf8(zoned.render(&[Record::new(0, "x")]).unwrap()).unwrap();
        assert!(body.contains("1970-01-01T02:00:00.000+02:00"), "{body}");
    }

    #[test]
    fn test_empty_batches() {
        assert_eq!(render(FileFormat::JsonHive, &[]), "");
        assert_eq!(render(FileFormat::JsonArray, &[]), "[]");
        assert_eq!(render(FileFormat::JsonRecordsArray, &[]), "{\"Records\":[]}");
    }

    #[test]
    fn test_gzip_roundtrip() {
        let body = render(FileFormat::JsonHive, &batch());
        let compressed = gzip(body.as_bytes(), 9).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }
}
