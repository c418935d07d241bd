//! compareDateRange support: resolving comparison periods, aligning rows
//! across periods, and ordering the merged output.
//!
//! Each period becomes its own sub-query; returned rows are tagged with
//! the period label, the period index, and the row's offset from the
//! period start in granularity units so period 0 day 0 and period 1
//! day 0 line up on a chart's X axis.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{CompilerError, CompilerResult};
use crate::executor::Row;
use crate::result::{PERIOD_DAY_INDEX_KEY, PERIOD_INDEX_KEY, PERIOD_KEY};
use crate::semantic::query::{DateRangeInput, SemanticQuery};
use crate::semantic::time::{self, Granularity};

/// One resolved comparison period.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparePeriod {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

/// Resolve every `compareDateRange` entry to concrete bounds. Unlike
/// ordinary filters, an unresolvable period is a hard error: silently
/// dropping one would shift every later period's index.
pub fn resolve_periods(
    ranges: &[DateRangeInput],
    now: DateTime<Utc>,
) -> CompilerResult<Vec<ComparePeriod>> {
    ranges
        .iter()
        .enumerate()
        .map(|(index, range)| match time::normalize_range(range, now) {
            Some((start, end)) => Ok(ComparePeriod {
                index,
                start,
                end,
                label: format!("{} - {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d")),
            }),
            None => Err(CompilerError::Validation(vec![format!(
                "compareDateRange entry {} could not be resolved",
                index
            )])),
        })
        .collect()
}

/// Clone the query for a single period: the comparison time dimension
/// gets a literal date range, and the comparison list is removed so the
/// sub-query re-enters the regular pipeline.
pub fn period_query(
    query: &SemanticQuery,
    td_index: usize,
    period: &ComparePeriod,
) -> SemanticQuery {
    let mut sub = query.clone();
    if let Some(td) = sub.time_dimensions.get_mut(td_index) {
        td.date_range = Some(DateRangeInput::Range(vec![
            period.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            period.end.to_rfc3339_opts(SecondsFormat::Millis, true),
        ]));
        td.compare_date_range = None;
    }
    sub
}

/// Parse a time value as drivers hand it back: RFC 3339, naive datetime,
/// or bare date strings.
pub fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(time::parse_datetime)
}

/// Tag each row of one period's result with alignment metadata.
pub fn annotate_rows(
    rows: &mut [Row],
    period: &ComparePeriod,
    time_alias: &str,
    granularity: Granularity,
) {
    for row in rows.iter_mut() {
        row.insert(PERIOD_KEY.into(), Value::from(period.label.clone()));
        row.insert(PERIOD_INDEX_KEY.into(), Value::from(period.index as i64));
        if let Some(value) = row.get(time_alias).and_then(parse_time_value) {
            row.insert(
                PERIOD_DAY_INDEX_KEY.into(),
                Value::from(granularity.distance(period.start, value)),
            );
        }
    }
}

/// Sort the merged rows by `(periodIndex, time ascending)` so period 0
/// appears first in its natural order.
pub fn sort_merged(rows: &mut [Row], time_alias: &str) {
    rows.sort_by(|a, b| {
        let index_a = a.get(PERIOD_INDEX_KEY).and_then(Value::as_i64).unwrap_or(0);
        let index_b = b.get(PERIOD_INDEX_KEY).and_then(Value::as_i64).unwrap_or(0);
        index_a.cmp(&index_b).then_with(|| {
            let time_a = a.get(time_alias).and_then(parse_time_value);
            let time_b = b.get(time_alias).and_then(parse_time_value);
            time_a.cmp(&time_b)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        time::parse_datetime("2024-06-15 12:00:00").unwrap()
    }

    fn absolute(start: &str, end: &str) -> DateRangeInput {
        DateRangeInput::Range(vec![start.into(), end.into()])
    }

    #[test]
    fn test_resolve_periods() {
        let periods = resolve_periods(
            &[
                absolute("2024-03-01", "2024-03-05"),
                absolute("2024-02-01", "2024-02-05"),
            ],
            now(),
        )
        .unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].index, 0);
        assert_eq!(periods[0].label, "2024-03-01 - 2024-03-05");
        assert_eq!(
            periods[1].start,
            time::parse_datetime("2024-02-01").unwrap()
        );
    }

    #[test]
    fn test_unresolvable_period_is_an_error() {
        let err = resolve_periods(
            &[
                absolute("2024-03-01", "2024-03-05"),
                DateRangeInput::Expression("garbage".into()),
            ],
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, CompilerError::Validation(_)));
    }

    #[test]
    fn test_period_query_replaces_compare_with_range() {
        let query: SemanticQuery = serde_json::from_value(json!({
            "measures": ["Productivity.totalLinesOfCode"],
            "timeDimensions": [{
                "dimension": "Productivity.date",
                "granularity": "day",
                "compareDateRange": [["2024-03-01", "2024-03-05"], ["2024-02-01", "2024-02-05"]]
            }]
        }))
        .unwrap();
        let periods = resolve_periods(
            &[absolute("2024-03-01", "2024-03-05")],
            now(),
        )
        .unwrap();
        let sub = period_query(&query, 0, &periods[0]);
        let td = &sub.time_dimensions[0];
        assert!(td.compare_date_range.is_none());
        match td.date_range.as_ref().unwrap() {
            DateRangeInput::Range(parts) => {
                assert!(parts[0].starts_with("2024-03-01T00:00:00"));
                assert!(parts[1].starts_with("2024-03-05T23:59:59.999"));
            }
            other => panic!("expected absolute range, got {:?}", other),
        }
    }

    #[test]
    fn test_annotate_rows_day_alignment() {
        let period = ComparePeriod {
            index: 1,
            start: time::parse_datetime("2024-02-01").unwrap(),
            end: time::parse_datetime("2024-02-05 23:59:59.999").unwrap(),
            label: "2024-02-01 - 2024-02-05".into(),
        };
        let mut rows = vec![{
            let mut row = Row::new();
            row.insert("Productivity.date".into(), json!("2024-02-03 00:00:00"));
            row
        }];
        annotate_rows(&mut rows, &period, "Productivity.date", Granularity::Day);
        assert_eq!(rows[0][PERIOD_INDEX_KEY], json!(1));
        assert_eq!(rows[0][PERIOD_DAY_INDEX_KEY], json!(2));
        assert_eq!(rows[0][PERIOD_KEY], json!("2024-02-01 - 2024-02-05"));
    }

    #[test]
    fn test_sort_merged_periods_then_time() {
        let row = |index: i64, date: &str| -> Row {
            let mut r = Row::new();
            r.insert(PERIOD_INDEX_KEY.into(), json!(index));
            r.insert("Productivity.date".into(), json!(date));
            r
        };
        let mut rows = vec![
            row(1, "2024-02-02"),
            row(0, "2024-03-02"),
            row(1, "2024-02-01"),
            row(0, "2024-03-01"),
        ];
        sort_merged(&mut rows, "Productivity.date");
        let keys: Vec<(i64, String)> = rows
            .iter()
            .map(|r| {
                (
                    r[PERIOD_INDEX_KEY].as_i64().unwrap(),
                    r["Productivity.date"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (0, "2024-03-01".to_string()),
                (0, "2024-03-02".to_string()),
                (1, "2024-02-01".to_string()),
                (1, "2024-02-02".to_string()),
            ]
        );
    }
}
