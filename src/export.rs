use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Canonical snapshot column order. The header row and every data row follow
/// this list exactly; records may carry extra fields, which are not exported.
pub const EXPORT_FIELDS: [&str; 14] = [
    "id",
    "fullName",
    "studentEmail",
    "studentNumber",
    "rollNumber",
    "branch",
    "gender",
    "scholar",
    "mobileNumber",
    "domain",
    "isVerified",
    "createdAt",
    "updatedAt",
    "verifiedAt",
];

const TIMESTAMP_FIELDS: [&str; 3] = ["createdAt", "updatedAt", "verifiedAt"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type FlatRecord = BTreeMap<String, String>;

/// Renders records as comma-delimited text: one header row, then one row per
/// record with columns in [`EXPORT_FIELDS`] order. Missing fields render
/// empty; timestamp fields are reformatted from RFC 3339 to
/// `YYYY-MM-DD HH:MM:SS` UTC. Pure transformation, no I/O.
pub fn render_snapshot(records: &[FlatRecord]) -> String {
    let mut out = String::new();
    out.push_str(&EXPORT_FIELDS.join(","));
    out.push('\n');
    for record in records {
        let row: Vec<String> = EXPORT_FIELDS
            .iter()
            .map(|field| {
                let raw = record.get(*field).map(String::as_str).unwrap_or("");
                csv_escape(&render_field(field, raw))
            })
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn render_field(field: &str, raw: &str) -> String {
    if raw.is_empty() || !TIMESTAMP_FIELDS.contains(&field) {
        return raw.to_string();
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts
            .with_timezone(&Utc)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
        // Leave unparseable values as-is rather than dropping data.
        Err(_) => raw.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(pairs: &[(&str, &str)]) -> FlatRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_input_renders_header_only() {
        let out = render_snapshot(&[]);
        assert_eq!(
            out,
            "id,fullName,studentEmail,studentNumber,rollNumber,branch,gender,scholar,\
             mobileNumber,domain,isVerified,createdAt,updatedAt,verifiedAt\n"
        );
    }

    #[test]
    fn one_row_per_record_plus_header() {
        let records = vec![
            record(&[("id", "01A"), ("fullName", "Asha Verma")]),
            record(&[("id", "01B"), ("fullName", "Ravi Kumar")]),
        ];
        let out = render_snapshot(&records);
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn missing_fields_render_empty() {
        let out = render_snapshot(&[record(&[("id", "01A")])]);
        let data_row = out.lines().nth(1).unwrap();
        assert_eq!(data_row, "01A,,,,,,,,,,,,,");
    }

    #[test]
    fn timestamps_are_reformatted_to_utc_pattern() {
        let out = render_snapshot(&[record(&[
            ("id", "01A"),
            ("createdAt", "2026-08-30T12:34:56+05:30"),
            ("verifiedAt", "2026-08-30T07:04:56Z"),
        ])]);
        let data_row = out.lines().nth(1).unwrap();
        assert!(data_row.contains("2026-08-30 07:04:56"), "row: {data_row}");
        // Both values are the same instant, one written with an offset.
        assert_eq!(data_row.matches("2026-08-30 07:04:56").count(), 2);
    }

    #[test]
    fn values_with_commas_and_quotes_are_escaped() {
        let out = render_snapshot(&[record(&[
            ("fullName", "Verma, Asha \"AV\""),
            ("branch", "CSE"),
        ])]);
        let data_row = out.lines().nth(1).unwrap();
        assert!(data_row.contains("\"Verma, Asha \"\"AV\"\"\""));
    }

    #[test]
    fn columns_follow_canonical_order_not_record_order() {
        let out = render_snapshot(&[record(&[
            ("domain", "ML"),
            ("id", "01A"),
            ("branch", "CSE"),
        ])]);
        let data_row = out.lines().nth(1).unwrap();
        let cols: Vec<&str> = data_row.split(',').collect();
        assert_eq!(cols[0], "01A");
        assert_eq!(cols[5], "CSE");
        assert_eq!(cols[9], "ML");
    }
}
