//! Adaptive summarization of query results into a bounded, prompt-sized form.
//!
//! # Algorithm
//!
//! 1. **Pass-through**: results with at most `max_rows` rows are kept verbatim.
//! 2. **Date axis detection**: first column whose name looks temporal
//!    (date/month/year/time/day/week), else first string column whose sampled
//!    values all parse as dates.
//! 3. **Time series**: sort by the axis, aggregate every numeric column overall
//!    and per category, then sample at a fixed stride, always keeping the last row.
//! 4. **Categorical**: totals and means over the full row set, keep the first
//!    `max_rows` rows (upstream results are ranked by relevance).
//!
//! Every variant keeps the pre-reduction row count.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::dataservice::{QueryPayload, Row};

const DATE_NAME_HINTS: &[&str] = &["date", "month", "year", "time", "day", "week"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| cl100k_base().ok());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_max_samples")]
    pub max_time_series_samples: usize,
    #[serde(default = "default_max_category_groups")]
    pub max_category_groups: usize,
    #[serde(default = "default_date_sample_size")]
    pub date_sample_size: usize,
}

fn default_max_rows() -> usize {
    20
}
fn default_max_samples() -> usize {
    12
}
fn default_max_category_groups() -> usize {
    50
}
fn default_date_sample_size() -> usize {
    5
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_time_series_samples: default_max_samples(),
            max_category_groups: default_max_category_groups(),
            date_sample_size: default_date_sample_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericAggregate {
    pub sum: f64,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnTotals {
    pub total: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSummary {
    pub date_column: String,
    pub date_range: DateRange,
    pub category_column: Option<String>,
    pub category_count: usize,
    pub aggregates: BTreeMap<String, NumericAggregate>,
    /// category value -> numeric column -> aggregate
    pub category_aggregates: BTreeMap<String, BTreeMap<String, NumericAggregate>>,
    pub rows: Vec<Row>,
    pub original_row_count: usize,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalSummary {
    pub totals: BTreeMap<String, ColumnTotals>,
    pub rows: Vec<Row>,
    pub original_row_count: usize,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummarizedResult {
    Small {
        rows: Vec<Row>,
        original_row_count: usize,
    },
    TimeSeries(TimeSeriesSummary),
    Categorical(CategoricalSummary),
    Empty {
        original_row_count: usize,
    },
    Error {
        reason: String,
        original_row_count: usize,
    },
    Raw {
        text: String,
        original_row_count: usize,
    },
}

impl SummarizedResult {
    /// Result for a query that never produced data.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
            original_row_count: 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Small { .. } => "small",
            Self::TimeSeries(_) => "time_series",
            Self::Categorical(_) => "categorical",
            Self::Empty { .. } => "empty",
            Self::Error { .. } => "error",
            Self::Raw { .. } => "raw",
        }
    }

    pub fn original_row_count(&self) -> usize {
        match self {
            Self::Small {
                original_row_count, ..
            }
            | Self::Empty { original_row_count }
            | Self::Error {
                original_row_count, ..
            }
            | Self::Raw {
                original_row_count, ..
            } => *original_row_count,
            Self::TimeSeries(ts) => ts.original_row_count,
            Self::Categorical(cat) => cat.original_row_count,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Small { rows, .. } => rows,
            Self::TimeSeries(ts) => &ts.rows,
            Self::Categorical(cat) => &cat.rows,
            Self::Empty { .. } | Self::Error { .. } | Self::Raw { .. } => &[],
        }
    }

    /// Rows that survive summarization; a raw passthrough counts as one.
    pub fn summarized_row_count(&self) -> usize {
        match self {
            Self::Raw { .. } => 1,
            other => other.rows().len(),
        }
    }

    /// One human-readable line describing the result.
    pub fn summary_line(&self) -> String {
        match self {
            Self::Small {
                original_row_count, ..
            } => format!("All {original_row_count} records."),
            Self::TimeSeries(ts) => ts.summary.clone(),
            Self::Categorical(cat) => cat.summary.clone(),
            Self::Empty { .. } => "Query returned no records.".to_string(),
            Self::Error { reason, .. } => format!("No data available for this query: {reason}"),
            Self::Raw { .. } => "Unstructured response from the data service.".to_string(),
        }
    }

    /// Compact block for the generation prompt: query, one-line summary, JSON body.
    pub fn to_prompt_section(&self, query: &str) -> String {
        let body = match self {
            Self::Raw { text, .. } => text.clone(),
            Self::Empty { .. } | Self::Error { .. } => String::new(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        let mut section = format!(
            "### Query: {query}\nRecords: {} (kept {})\n{}\n",
            self.original_row_count(),
            self.summarized_row_count(),
            self.summary_line()
        );
        if !body.is_empty() {
            section.push_str(&body);
            section.push('\n');
        }
        section
    }
}

/// Summarize whatever the data service returned for `query`.
pub fn summarize(payload: &QueryPayload, query: &str, config: &SummarizerConfig) -> SummarizedResult {
    match payload {
        QueryPayload::Rows(rows) => summarize_rows(rows, query, config),
        QueryPayload::Text(text) => match rows_from_text(text) {
            Some(rows) => summarize_rows(&rows, query, config),
            None => {
                tracing::debug!(query, "data service returned unstructured text");
                SummarizedResult::Raw {
                    text: text.clone(),
                    original_row_count: 1,
                }
            }
        },
    }
}

pub fn summarize_rows(rows: &[Row], query: &str, config: &SummarizerConfig) -> SummarizedResult {
    let total = rows.len();
    if total == 0 {
        return SummarizedResult::Empty {
            original_row_count: 0,
        };
    }
    if total <= config.max_rows {
        return SummarizedResult::Small {
            rows: rows.to_vec(),
            original_row_count: total,
        };
    }

    let columns = column_names(rows);
    let numeric: Vec<&String> = columns
        .iter()
        .filter(|c| is_numeric_column(rows, c))
        .collect();

    let result = match detect_date_column(rows, &columns, config.date_sample_size) {
        Some(date_column) => {
            let numeric: Vec<&String> = numeric
                .into_iter()
                .filter(|c| **c != date_column)
                .collect();
            SummarizedResult::TimeSeries(summarize_time_series(
                rows,
                &columns,
                &date_column,
                &numeric,
                config,
            ))
        }
        None => SummarizedResult::Categorical(summarize_categorical(rows, &numeric, config)),
    };

    tracing::debug!(
        query,
        kind = result.kind(),
        original_rows = total,
        kept_rows = result.summarized_row_count(),
        "summarized query result"
    );
    result
}

/// Token estimate using the cl100k tokenizer, or chars/4 when it is unavailable.
pub fn estimate_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

// =============================================================================
// Time series
// =============================================================================

fn summarize_time_series(
    rows: &[Row],
    columns: &[String],
    date_column: &str,
    numeric: &[&String],
    config: &SummarizerConfig,
) -> TimeSeriesSummary {
    let total = rows.len();

    let mut keyed: Vec<(Option<NaiveDateTime>, &Row)> = rows
        .iter()
        .map(|row| (row.get(date_column).and_then(parse_date_value), row))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let aggregates = aggregate_columns(keyed.iter().map(|(_, row)| *row), numeric);

    let category_column = columns
        .iter()
        .find(|c| {
            c.as_str() != date_column
                && !numeric.iter().any(|n| n == c)
                && rows.iter().any(|r| r.get(c.as_str()).is_some_and(|v| !v.is_null()))
        })
        .cloned();

    let mut category_count = 0;
    let mut category_aggregates = BTreeMap::new();
    if let Some(category) = &category_column {
        let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
        for (_, row) in &keyed {
            let label = row
                .get(category.as_str())
                .map(display_value)
                .unwrap_or_else(|| "(null)".to_string());
            groups.entry(label).or_default().push(row);
        }
        category_count = groups.len();

        let mut ranked: Vec<(String, Vec<&Row>)> = groups.into_iter().collect();
        ranked.sort_by(|(a_name, a_rows), (b_name, b_rows)| {
            b_rows.len().cmp(&a_rows.len()).then_with(|| a_name.cmp(b_name))
        });
        ranked.truncate(config.max_category_groups);

        for (label, group_rows) in ranked {
            category_aggregates.insert(label, aggregate_columns(group_rows.into_iter(), numeric));
        }
    }

    let stride = total.div_ceil(config.max_time_series_samples.max(1)).max(1);
    let mut indices: Vec<usize> = (0..total).step_by(stride).collect();
    if indices.last() != Some(&(total - 1)) {
        indices.push(total - 1);
    }

    let sampled: Vec<Row> = indices
        .into_iter()
        .map(|i| {
            let (key, row) = &keyed[i];
            let mut row = (*row).clone();
            if let Some(dt) = key {
                row.insert(date_column.to_string(), Value::String(format_date(dt)));
            }
            row
        })
        .collect();

    let date_range = date_range(&keyed, date_column);

    let mut summary = format!(
        "Time series of {total} records from {} to {}",
        date_range.start, date_range.end
    );
    if let Some(category) = &category_column {
        summary.push_str(&format!(
            " across {category_count} distinct {category} values"
        ));
    }
    summary.push_str(&format!("; showing {} sampled points.", sampled.len()));

    TimeSeriesSummary {
        date_column: date_column.to_string(),
        date_range,
        category_column,
        category_count,
        aggregates,
        category_aggregates,
        rows: sampled,
        original_row_count: total,
        summary,
    }
}

fn date_range(keyed: &[(Option<NaiveDateTime>, &Row)], date_column: &str) -> DateRange {
    let parsed: Vec<&NaiveDateTime> = keyed.iter().filter_map(|(k, _)| k.as_ref()).collect();
    if let (Some(first), Some(last)) = (parsed.first(), parsed.last()) {
        return DateRange {
            start: format_date(first),
            end: format_date(last),
        };
    }
    let raw = |row: Option<&&Row>| {
        row.and_then(|r| r.get(date_column))
            .map(display_value)
            .unwrap_or_default()
    };
    DateRange {
        start: raw(keyed.first().map(|(_, r)| r)),
        end: raw(keyed.last().map(|(_, r)| r)),
    }
}

// =============================================================================
// Categorical
// =============================================================================

fn summarize_categorical(
    rows: &[Row],
    numeric: &[&String],
    config: &SummarizerConfig,
) -> CategoricalSummary {
    let total = rows.len();
    let totals = aggregate_columns(rows.iter(), numeric)
        .into_iter()
        .map(|(column, agg)| {
            (
                column,
                ColumnTotals {
                    total: agg.sum,
                    mean: agg.mean,
                },
            )
        })
        .collect();

    let kept: Vec<Row> = rows.iter().take(config.max_rows).cloned().collect();
    let summary = format!("Showing top {} of {total} total records.", kept.len());

    CategoricalSummary {
        totals,
        rows: kept,
        original_row_count: total,
        summary,
    }
}

// =============================================================================
// Column inspection
// =============================================================================

/// Column names in first-seen order across all rows.
fn column_names(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn non_null_values<'a>(rows: &'a [Row], column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    rows.iter()
        .filter_map(move |row| row.get(column))
        .filter(|v| !v.is_null())
}

fn is_numeric_column(rows: &[Row], column: &str) -> bool {
    let mut seen = false;
    for value in non_null_values(rows, column) {
        if as_number(value).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

fn detect_date_column(rows: &[Row], columns: &[String], sample_size: usize) -> Option<String> {
    let by_name = columns.iter().find(|column| {
        let lower = column.to_lowercase();
        DATE_NAME_HINTS.iter().any(|hint| lower.contains(hint)) && !is_plain_measure(rows, column)
    });
    if let Some(column) = by_name {
        return Some(column.clone());
    }

    columns
        .iter()
        .find(|column| {
            let sample: Vec<&Value> = non_null_values(rows, column).take(sample_size.max(1)).collect();
            !sample.is_empty()
                && sample.iter().all(|v| v.is_string())
                && sample.iter().all(|v| parse_date_value(v).is_some())
        })
        .cloned()
}

/// A name-matched column full of non-year numbers ("days_to_close") is a
/// measure, not a time axis.
fn is_plain_measure(rows: &[Row], column: &str) -> bool {
    is_numeric_column(rows, column)
        && non_null_values(rows, column).any(|v| match v {
            Value::Number(_) => parse_date_value(v).is_none(),
            _ => false,
        })
}

fn aggregate_columns<'a>(
    rows: impl Iterator<Item = &'a Row>,
    numeric: &[&String],
) -> BTreeMap<String, NumericAggregate> {
    let mut acc: Vec<(f64, f64, f64, usize)> =
        vec![(0.0, f64::NEG_INFINITY, f64::INFINITY, 0); numeric.len()];

    for row in rows {
        for (slot, column) in acc.iter_mut().zip(numeric) {
            if let Some(x) = row.get(column.as_str()).and_then(as_number) {
                slot.0 += x;
                slot.1 = slot.1.max(x);
                slot.2 = slot.2.min(x);
                slot.3 += 1;
            }
        }
    }

    numeric
        .iter()
        .zip(acc)
        .filter(|(_, (_, _, _, count))| *count > 0)
        .map(|(column, (sum, max, min, count))| {
            (
                column.to_string(),
                NumericAggregate {
                    sum,
                    mean: sum / count as f64,
                    max,
                    min,
                    count,
                },
            )
        })
        .collect()
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(null)".to_string(),
        other => other.to_string(),
    }
}

fn rows_from_text(text: &str) -> Option<Vec<Row>> {
    match serde_json::from_str::<Value>(text.trim()).ok()? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

// =============================================================================
// Dates
// =============================================================================

fn parse_date_value(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n
            .as_i64()
            .filter(|y| (1000..=9999).contains(y))
            .and_then(|y| NaiveDate::from_ymd_opt(y as i32, 1, 1))
            .map(|d| d.and_time(NaiveTime::MIN)),
        _ => None,
    }
}

fn parse_date_str(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    // "2024-03" month buckets and bare years
    if s.len() == 7 && s.as_bytes()[4] == b'-' {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i32>()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            .map(|d| d.and_time(NaiveTime::MIN));
    }
    None
}

fn format_date(dt: &NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn parses_common_date_shapes() {
        for s in [
            "2024-03-01",
            "2024-03-01T10:00:00Z",
            "2024-03-01 10:00:00",
            "2024/03/01",
            "03/01/2024",
            "2024-03",
            "2024",
        ] {
            assert!(parse_date_str(s).is_some(), "failed to parse {s}");
        }
        assert!(parse_date_str("Widgets").is_none());
        assert!(parse_date_str("12.5").is_none());
    }

    #[test]
    fn numeric_strings_count_as_numeric() {
        let rows = vec![
            row(json!({"region": "EU", "revenue": "10.5"})),
            row(json!({"region": "US", "revenue": 3})),
            row(json!({"region": "APAC", "revenue": null})),
        ];
        assert!(is_numeric_column(&rows, "revenue"));
        assert!(!is_numeric_column(&rows, "region"));
    }

    #[test]
    fn name_hint_skips_plain_measures() {
        let rows: Vec<Row> = (0..5)
            .map(|i| row(json!({"days_to_close": i * 3, "owner": "a"})))
            .collect();
        let columns = column_names(&rows);
        assert_eq!(detect_date_column(&rows, &columns, 5), None);
    }

    #[test]
    fn sample_based_detection_finds_unhinted_column() {
        let rows: Vec<Row> = (1..=5)
            .map(|d| row(json!({"bucket": format!("2024-01-0{d}"), "n": d})))
            .collect();
        let columns = column_names(&rows);
        assert_eq!(
            detect_date_column(&rows, &columns, 5).as_deref(),
            Some("bucket")
        );
    }

    #[test]
    fn text_payload_that_is_not_rows_is_raw() {
        let result = summarize(
            &QueryPayload::Text("The answer is 42.".into()),
            "q",
            &SummarizerConfig::default(),
        );
        assert_eq!(result.kind(), "raw");
        assert_eq!(result.original_row_count(), 1);
    }

    #[test]
    fn text_payload_with_json_rows_is_summarized() {
        let result = summarize(
            &QueryPayload::Text(r#"[{"a": 1}, {"a": 2}]"#.into()),
            "q",
            &SummarizerConfig::default(),
        );
        assert_eq!(result.kind(), "small");
        assert_eq!(result.original_row_count(), 2);
    }

    #[test]
    fn estimate_tokens_is_positive_for_text() {
        assert!(estimate_tokens("revenue by region for 2024") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }
}
