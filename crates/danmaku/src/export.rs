//! Export of aggregated danmaku.
//!
//! Serializes an [`ExportDocument`] into XML (player compatible), JSON, CSV or
//! plain text. Every format keeps the document's record order.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;

use crate::error::{DanmakuError, Result};
use crate::record::{CommentRecord, ExportDocument, ExportFormat};

/// CSV column order.
pub const CSV_HEADER: [&str; 14] = [
    "id",
    "timestampMs",
    "time",
    "mode",
    "fontSize",
    "color",
    "senderHash",
    "text",
    "sendTimeUnix",
    "sendTime",
    "weight",
    "pool",
    "attr",
    "rowId",
];

const CHAT_SERVER: &str = "chat.bilibili.com";

/// Serialize `document` in the given format.
pub fn export(document: &ExportDocument, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Xml => export_xml(document),
        ExportFormat::Json => export_json(&document.records),
        ExportFormat::Csv => Ok(export_csv(&document.records).into_bytes()),
        ExportFormat::Txt => Ok(export_txt(&document.records).into_bytes()),
    }
}

/// Serialize `document` in a format given by name.
///
/// Fails with [`DanmakuError::UnsupportedFormat`] for anything other than
/// xml, json, csv or txt.
pub fn export_named(document: &ExportDocument, format: &str) -> Result<Vec<u8>> {
    export(document, format.parse()?)
}

fn xml_error<E: Display>(e: E) -> DanmakuError {
    DanmakuError::export(format!("XML write failed: {e}"))
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)?;
    Ok(())
}

/// Characters allowed by the XML 1.0 `Char` production.
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..=char::MAX
    )
}

/// Drop characters that no XML 1.0 document may contain, even escaped.
fn xml_safe(value: &str) -> Cow<'_, str> {
    if value.chars().all(is_xml_char) {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(value.chars().filter(|c| is_xml_char(*c)).collect())
    }
}

/// Legacy `p` attribute: seconds,mode,fontsize,color,ctime,pool,midHash,id
fn player_attribute(record: &CommentRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        record.seconds(),
        i32::from(record.mode),
        record.font_size,
        record.color,
        record.send_time_unix,
        i32::from(record.pool),
        record.sender_hash,
        record.id,
    )
}

fn export_xml(document: &ExportDocument) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Comment(BytesText::from_escaped(format!(
            " source: {} generated: {} ",
            document.source,
            document.generated_at.to_rfc3339()
        ))))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("i")))
        .map_err(xml_error)?;

    let chat_id = document.chat_id.unwrap_or(0).to_string();
    let max_limit = document.records.len().to_string();
    write_text_element(&mut writer, "chatserver", CHAT_SERVER)?;
    write_text_element(&mut writer, "chatid", &chat_id)?;
    write_text_element(&mut writer, "mission", "0")?;
    write_text_element(&mut writer, "maxlimit", &max_limit)?;
    write_text_element(&mut writer, "source", "k-v")?;

    for record in &document.records {
        let p = player_attribute(record);
        let p = xml_safe(&p);
        let sender_hash = xml_safe(&record.sender_hash);
        let row_id = xml_safe(&record.row_id);
        let text = xml_safe(&record.text);
        let timestamp_ms = record.timestamp_ms.to_string();
        let mode = i32::from(record.mode).to_string();
        let font_size = record.font_size.to_string();
        let color = record.color.to_string();
        let send_time = record.send_time_unix.to_string();
        let pool = i32::from(record.pool).to_string();

        let mut d = BytesStart::new("d");
        d.push_attribute(("p", p.as_ref()));
        d.push_attribute(("timestampMs", timestamp_ms.as_str()));
        d.push_attribute(("mode", mode.as_str()));
        d.push_attribute(("fontSize", font_size.as_str()));
        d.push_attribute(("color", color.as_str()));
        d.push_attribute(("sendTimeUnix", send_time.as_str()));
        d.push_attribute(("pool", pool.as_str()));
        d.push_attribute(("senderHash", sender_hash.as_ref()));
        d.push_attribute(("rowId", row_id.as_ref()));

        writer.write_event(Event::Start(d)).map_err(xml_error)?;
        writer
            .write_event(Event::Text(BytesText::new(&text)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new("d")))
            .map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("i")))
        .map_err(xml_error)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonRow<'a> {
    #[serde(flatten)]
    record: &'a CommentRecord,
    /// Offset in seconds
    time: f64,
    send_time: Option<String>,
}

fn send_time_iso(record: &CommentRecord) -> Option<String> {
    record
        .sent_at()
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

fn export_json(records: &[CommentRecord]) -> Result<Vec<u8>> {
    let rows: Vec<JsonRow<'_>> = records
        .iter()
        .map(|record| JsonRow {
            record,
            time: record.seconds(),
            send_time: send_time_iso(record),
        })
        .collect();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

/// Parse a JSON export back into records.
pub fn records_from_json(input: &[u8]) -> Result<Vec<CommentRecord>> {
    Ok(serde_json::from_slice(input)?)
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn export_csv(records: &[CommentRecord]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');

    for record in records {
        let row = [
            record.id.to_string(),
            record.timestamp_ms.to_string(),
            format!("{:.3}", record.seconds()),
            i32::from(record.mode).to_string(),
            record.font_size.to_string(),
            record.color.to_string(),
            csv_field(&record.sender_hash),
            csv_field(&record.text),
            record.send_time_unix.to_string(),
            send_time_iso(record).unwrap_or_default(),
            record.weight.to_string(),
            i32::from(record.pool).to_string(),
            record.attr.to_string(),
            csv_field(&record.row_id),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Split CSV text into rows of unquoted fields.
pub fn parse_csv(input: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DanmakuError::export("unterminated quoted CSV field"));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Parse a CSV export back into records.
pub fn records_from_csv(input: &str) -> Result<Vec<CommentRecord>> {
    let mut rows = parse_csv(input)?.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| DanmakuError::export("CSV input has no header row"))?;
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DanmakuError::export(format!("CSV column '{name}' missing")))
    };

    let id = column("id")?;
    let timestamp_ms = column("timestampMs")?;
    let mode = column("mode")?;
    let font_size = column("fontSize")?;
    let color = column("color")?;
    let sender_hash = column("senderHash")?;
    let text = column("text")?;
    let send_time_unix = column("sendTimeUnix")?;
    let weight = column("weight")?;
    let pool = column("pool")?;
    let attr = column("attr")?;
    let row_id = column("rowId")?;

    rows.enumerate()
        .map(|(line, row)| {
            let get = |idx: usize| {
                row.get(idx).map(String::as_str).ok_or_else(|| {
                    DanmakuError::export(format!("CSV row {} is missing columns", line + 2))
                })
            };
            let num = |idx: usize| -> Result<i64> {
                let raw = get(idx)?;
                raw.parse::<i64>().map_err(|e| {
                    DanmakuError::export(format!("CSV row {}: bad number '{raw}': {e}", line + 2))
                })
            };
            Ok(CommentRecord {
                id: num(id)?,
                timestamp_ms: num(timestamp_ms)? as i32,
                mode: (num(mode)? as i32).into(),
                font_size: num(font_size)? as i32,
                color: num(color)? as u32,
                send_time_unix: num(send_time_unix)?,
                pool: (num(pool)? as i32).into(),
                sender_hash: get(sender_hash)?.to_string(),
                row_id: get(row_id)?.to_string(),
                text: get(text)?.to_string(),
                weight: num(weight)? as i32,
                attr: num(attr)? as i32,
                ..Default::default()
            })
        })
        .collect()
}

/// Format a playback offset as `HH:MM:SS.mmm`.
pub fn format_offset(timestamp_ms: i32) -> String {
    let ms = timestamp_ms.max(0) as u64;
    let (secs, millis) = (ms / 1000, ms % 1000);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        millis
    )
}

fn export_txt(records: &[CommentRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push('[');
        out.push_str(&format_offset(record.timestamp_ms));
        out.push_str("]\t");
        out.push_str(&record.text.replace(['\r', '\n'], " "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DanmakuMode, DanmakuPool};
    use crate::testing::record;
    use quick_xml::Reader;

    fn document(format: ExportFormat) -> ExportDocument {
        let mut tricky = record(2, 65_432, "a, \"quoted\"\nline & <tag>");
        tricky.mode = DanmakuMode::Bottom;
        tricky.pool = DanmakuPool::Special;
        tricky.weight = 7;
        tricky.attr = 2;
        ExportDocument::new(
            "av170001",
            format,
            vec![record(1, 1_500, "first"), tricky, record(3, 3_723_004, "弹幕")],
        )
        .with_chat_id(279786)
    }

    #[test]
    fn test_json_round_trip() {
        let doc = document(ExportFormat::Json);
        let bytes = export(&doc, ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert_eq!(value[1]["timestampMs"], 65_432);
        assert_eq!(value[1]["time"], 65.432);
        assert_eq!(value[0]["sendTime"], "2023-11-14T22:13:21Z");

        assert_eq!(records_from_json(&bytes).unwrap(), doc.records);
    }

    #[test]
    fn test_csv_round_trip() {
        let doc = document(ExportFormat::Csv);
        let bytes = export(&doc, ExportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("id,timestampMs,time,mode,"));
        assert_eq!(text.matches("id,timestampMs").count(), 1);
        assert!(text.contains("\"a, \"\"quoted\"\"\nline & <tag>\""));

        assert_eq!(records_from_csv(&text).unwrap(), doc.records);
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_parse_csv_rejects_unterminated_quote() {
        assert!(parse_csv("a,\"b\n").is_err());
    }

    #[test]
    fn test_txt_lines() {
        let doc = document(ExportFormat::Txt);
        let text = String::from_utf8(export(&doc, ExportFormat::Txt).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[00:00:01.500]\tfirst",
                "[00:01:05.432]\ta, \"quoted\" line & <tag>",
                "[01:02:03.004]\t弹幕",
            ]
        );
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "00:00:00.000");
        assert_eq!(format_offset(-20), "00:00:00.000");
        assert_eq!(format_offset(359_999), "00:05:59.999");
    }

    #[test]
    fn test_xml_structure_and_escaping() {
        let doc = document(ExportFormat::Xml);
        let xml = String::from_utf8(export(&doc, ExportFormat::Xml).unwrap()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<chatid>279786</chatid>"));
        assert!(xml.contains("<maxlimit>3</maxlimit>"));
        assert!(xml.contains("&lt;tag&gt;"));
        assert!(xml.contains("p=\"1.5,1,25,16777215,1700000001,0,00000001,1\""));

        let mut reader = Reader::from_str(&xml);
        let mut texts = Vec::new();
        let mut row_ids = Vec::new();
        let mut in_d = false;
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) if e.name().as_ref() == b"d" => {
                    in_d = true;
                    let attr = e.try_get_attribute("rowId").unwrap().unwrap();
                    row_ids.push(attr.unescape_value().unwrap().into_owned());
                }
                Event::Text(t) if in_d => texts.push(t.unescape().unwrap().into_owned()),
                Event::End(e) if e.name().as_ref() == b"d" => in_d = false,
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(row_ids, vec!["1", "2", "3"]);
        assert_eq!(texts[1], "a, \"quoted\"\nline & <tag>");
        assert_eq!(texts[2], "弹幕");
    }

    #[test]
    fn test_xml_drops_forbidden_control_characters() {
        let mut bad = record(4, 10, "a\u{1}b\u{8}c\u{1F}\tok\u{FFFE}");
        bad.sender_hash = "ab\u{0}cd".to_string();
        bad.row_id = "4\u{B}".to_string();
        let doc = ExportDocument::new("av1", ExportFormat::Xml, vec![bad]);
        let xml = String::from_utf8(export(&doc, ExportFormat::Xml).unwrap()).unwrap();

        assert!(xml.chars().all(is_xml_char));

        let mut reader = Reader::from_str(&xml);
        let mut attrs = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) if e.name().as_ref() == b"d" => {
                    for name in ["senderHash", "rowId"] {
                        let attr = e.try_get_attribute(name).unwrap().unwrap();
                        attrs.push(attr.unescape_value().unwrap().into_owned());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(attrs, ["abcd", "4"]);
        assert!(xml.contains(">abc\tok</d>"));
        assert_eq!(xml_safe("plain"), Cow::Borrowed("plain"));
    }

    #[test]
    fn test_export_named_rejects_unknown_format() {
        let doc = document(ExportFormat::Xml);
        assert!(matches!(
            export_named(&doc, "ass"),
            Err(DanmakuError::UnsupportedFormat(_))
        ));
        assert!(export_named(&doc, "TXT").is_ok());
    }

    #[test]
    fn test_exports_keep_document_order() {
        // out of chronological order on purpose: exporters must not re-sort
        let doc = ExportDocument::new(
            "ss1",
            ExportFormat::Txt,
            vec![record(5, 9_000, "later part start"), record(6, 1_000, "next part")],
        );
        let text = String::from_utf8(export(&doc, ExportFormat::Txt).unwrap()).unwrap();
        assert!(text.find("later part start").unwrap() < text.find("next part").unwrap());
        let rows = records_from_csv(
            &String::from_utf8(export(&doc, ExportFormat::Csv).unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(rows[0].id, 5);
    }
}
