//! CSV ingestion for survey frames.
//!
//! Reads delimited text from any `io::Read` source and infers a column
//! type for each field: numeric, date, time, flag, or text. A column only
//! gets a typed representation when every non-missing value parses as that
//! type; anything mixed stays text.

use std::io;

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CreelError, Result};
use crate::frame::table::{Column, FrameBuilder, SurveyFrame};

/// Date layouts accepted during inference, paired with their chrono format.
static DATE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap(), "%Y-%m-%d"),
        (Regex::new(r"^\d{4}/\d{2}/\d{2}$").unwrap(), "%Y/%m/%d"),
        (Regex::new(r"^\d{1,2}/\d{1,2}/\d{4}$").unwrap(), "%m/%d/%Y"),
    ]
});

/// Clock times as `H:MM` or `H:MM:SS`.
static TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$").unwrap());

/// Tokens treated as missing values, compared case-insensitively.
fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed == "."
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    for (pattern, format) in DATE_PATTERNS.iter() {
        if pattern.is_match(value) {
            if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                return Some(date);
            }
        }
    }
    None
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    if !TIME_PATTERN.is_match(value) {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn parse_flag(value: &str) -> Option<bool> {
    // 1/0 are deliberately excluded so count columns stay numeric.
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "t" | "y" => Some(true),
        "false" | "no" | "f" | "n" => Some(false),
        _ => None,
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Candidate types a raw column can still become, narrowed value by value.
#[derive(Debug, Clone, Copy)]
struct TypeCandidates {
    numeric: bool,
    date: bool,
    time: bool,
    flag: bool,
    seen_value: bool,
}

impl TypeCandidates {
    fn new() -> Self {
        TypeCandidates {
            numeric: true,
            date: true,
            time: true,
            flag: true,
            seen_value: false,
        }
    }

    fn observe(&mut self, value: &str) {
        self.seen_value = true;
        self.numeric &= parse_number(value).is_some();
        self.date &= parse_date(value).is_some();
        self.time &= parse_time(value).is_some();
        self.flag &= parse_flag(value).is_some();
    }
}

fn build_column(raw: &[Option<String>], candidates: TypeCandidates) -> Column {
    // Dates and times can never be valid floats, so precedence between the
    // candidate types only matters for flag vs text.
    if candidates.seen_value && candidates.date {
        Column::Date(
            raw.iter()
                .map(|cell| cell.as_deref().and_then(parse_date))
                .collect(),
        )
    } else if candidates.seen_value && candidates.time {
        Column::Time(
            raw.iter()
                .map(|cell| cell.as_deref().and_then(parse_time))
                .collect(),
        )
    } else if candidates.seen_value && candidates.numeric {
        Column::Numeric(
            raw.iter()
                .map(|cell| cell.as_deref().and_then(parse_number))
                .collect(),
        )
    } else if candidates.seen_value && candidates.flag {
        Column::Flag(
            raw.iter()
                .map(|cell| cell.as_deref().and_then(parse_flag))
                .collect(),
        )
    } else {
        Column::Text(raw.to_vec())
    }
}

impl SurveyFrame {
    /// Parses comma-separated data with a header row.
    pub fn from_csv<R: io::Read>(reader: R) -> Result<SurveyFrame> {
        SurveyFrame::from_csv_with(reader, b',')
    }

    /// Parses delimited data with a header row and an explicit delimiter.
    ///
    /// Short rows are padded with missing values and long rows truncated to
    /// the header width, so a stray delimiter does not abort the whole read.
    pub fn from_csv_with<R: io::Read>(reader: R, delimiter: u8) -> Result<SurveyFrame> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            return Err(CreelError::EmptyFrame("no header row found".to_string()));
        }

        let width = headers.len();
        let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
        let mut candidates: Vec<TypeCandidates> = vec![TypeCandidates::new(); width];
        let mut rows = 0usize;

        for record in csv_reader.records() {
            let record = record?;
            for (idx, raw) in raw_columns.iter_mut().enumerate() {
                let cell = record.get(idx).unwrap_or("");
                if is_null_token(cell) {
                    raw.push(None);
                } else {
                    let value = cell.trim().to_string();
                    candidates[idx].observe(&value);
                    raw.push(Some(value));
                }
            }
            rows += 1;
        }

        if rows == 0 {
            return Err(CreelError::EmptyFrame(
                "no data rows after the header".to_string(),
            ));
        }

        let mut builder = FrameBuilder::default();
        for (idx, name) in headers.iter().enumerate() {
            builder = builder.column(name, build_column(&raw_columns[idx], candidates[idx]));
        }
        builder.build()
    }
}
