//! Temporal expression detection and resolution.
//!
//! Recognizes explicit periods (quarters, halves, fiscal years, months,
//! ISO and long-form dates, "as of YEAR", bare years), periods relative to
//! a reference date ("last quarter", "year to date"), and indicator words
//! that ask about time ("when", "deadline"). Explicit and relative
//! expressions resolve to a [`DateRange`]; indicators stay unresolved until
//! evidence supplies a period.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};

use crate::models::{DateRange, TemporalKind, TemporalReference};

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec";

static QUARTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bQ([1-4])\s*(?:FY\s*)?'?(\d{4})\b").unwrap()
});

static ORDINAL_QUARTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(first|second|third|fourth|1st|2nd|3rd|4th)\s+quarter\s+(?:of\s+)?(\d{4})\b").unwrap()
});

static HALF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bH([12])\s*(\d{4})\b").unwrap());

static FISCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FY\s*'?(\d{4}|\d{2})|fiscal\s+(?:year\s+)?(\d{4}))\b").unwrap()
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

static LONG_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .unwrap()
});

static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\.?,?\s+(\d{{4}})\b")).unwrap()
});

static MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({MONTHS})\.?\s+(?:of\s+)?(\d{{4}})\b")).unwrap()
});

static AS_OF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bas\s+of\s+(\d{4})\b").unwrap());

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(last|previous|prior|this|current|next|coming)\s+(fiscal\s+year|quarter|year|month)\b").unwrap()
});

static YTD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:year[\s-]to[\s-]date|YTD)\b").unwrap());

static INDICATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(when|deadline|deadlines|due|date|dates|period|timeline|schedule|history|how\s+long)\b")
        .unwrap()
});

/// A matched expression with its byte span.
struct Hit {
    start: usize,
    end: usize,
    reference: TemporalReference,
}

/// Detect every temporal reference in `text`, in order of appearance.
///
/// Relative expressions resolve against `reference_date`. Overlapping
/// matches keep the longest expression.
pub fn extract(text: &str, reference_date: NaiveDate) -> Vec<TemporalReference> {
    let mut hits = explicit_hits(text);
    hits.extend(relative_hits(text, reference_date));
    for m in INDICATOR_RE.find_iter(text) {
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            reference: TemporalReference {
                text: m.as_str().to_string(),
                kind: TemporalKind::Indicator,
                resolved_range: None,
            },
        });
    }
    resolve_overlaps(hits)
}

/// Explicit periods only; used to annotate chunks at ingestion time.
pub fn explicit_periods(text: &str) -> Vec<DateRange> {
    let mut ranges: Vec<DateRange> = Vec::new();
    for hit in resolve_overlaps(explicit_hits(text)) {
        if let Some(range) = hit.resolved_range {
            if !ranges.contains(&range) {
                ranges.push(range);
            }
        }
    }
    ranges
}

/// First explicit expression in `text`, if any.
pub fn first_explicit(text: &str) -> Option<TemporalReference> {
    resolve_overlaps(explicit_hits(text)).into_iter().next()
}

fn resolve_overlaps(mut hits: Vec<Hit>) -> Vec<TemporalReference> {
    hits.sort_by(|a, b| a.start.cmp(&b.start).then((b.end - b.start).cmp(&(a.end - a.start))));
    let mut out = Vec::new();
    let mut covered = 0;
    for hit in hits {
        if hit.start < covered {
            continue;
        }
        covered = hit.end;
        out.push(hit.reference);
    }
    out
}

fn explicit_hits(text: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    let mut push = |re: &Regex, resolve: &dyn Fn(&Captures) -> Option<DateRange>| {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            if let Some(range) = resolve(&caps) {
                hits.push(Hit {
                    start: m.start(),
                    end: m.end(),
                    reference: TemporalReference {
                        text: m.as_str().to_string(),
                        kind: TemporalKind::Explicit,
                        resolved_range: Some(range),
                    },
                });
            }
        }
    };

    push(&QUARTER_RE, &|c| quarter_range(num(c, 2)?, num(c, 1)?));
    push(&ORDINAL_QUARTER_RE, &|c| {
        let q = match c.get(1)?.as_str().to_ascii_lowercase().as_str() {
            "first" | "1st" => 1,
            "second" | "2nd" => 2,
            "third" | "3rd" => 3,
            _ => 4,
        };
        quarter_range(num(c, 2)?, q)
    });
    push(&HALF_RE, &|c| {
        let year = num(c, 2)?;
        let h = num(c, 1)?;
        let (start_month, end_month) = if h == 1 { (1, 6) } else { (7, 12) };
        range(ymd(year, start_month, 1)?, month_end(year, end_month)?, format!("H{h} {year}"))
    });
    push(&FISCAL_RE, &|c| {
        let raw = c.get(1).or_else(|| c.get(2))?.as_str();
        let year = match raw.len() {
            2 => 2000 + raw.parse::<i32>().ok()?,
            _ => raw.parse().ok()?,
        };
        range(ymd(year, 1, 1)?, ymd(year, 12, 31)?, format!("FY{year}"))
    });
    push(&ISO_DATE_RE, &|c| {
        let day = ymd(num(c, 1)?, num(c, 2)? as u32, num(c, 3)? as u32)?;
        range(day, day, day.format("%Y-%m-%d").to_string())
    });
    push(&LONG_DATE_RE, &|c| {
        let day = ymd(num(c, 3)?, month_number(c.get(1)?.as_str())?, num(c, 2)? as u32)?;
        range(day, day, day.format("%Y-%m-%d").to_string())
    });
    push(&DAY_MONTH_RE, &|c| {
        let day = ymd(num(c, 3)?, month_number(c.get(2)?.as_str())?, num(c, 1)? as u32)?;
        range(day, day, day.format("%Y-%m-%d").to_string())
    });
    push(&MONTH_YEAR_RE, &|c| {
        let year = num(c, 2)?;
        let month = month_number(c.get(1)?.as_str())?;
        let start = ymd(year, month, 1)?;
        range(start, month_end(year, month)?, start.format("%B %Y").to_string())
    });
    push(&AS_OF_RE, &|c| year_range(num(c, 1)?));
    push(&YEAR_RE, &|c| year_range(num(c, 1)?));

    hits
}

fn relative_hits(text: &str, today: NaiveDate) -> Vec<Hit> {
    let mut hits = Vec::new();
    for caps in RELATIVE_RE.captures_iter(text) {
        let (Some(m), Some(dir), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let offset = match dir.as_str().to_ascii_lowercase().as_str() {
            "last" | "previous" | "prior" => -1,
            "next" | "coming" => 1,
            _ => 0,
        };
        let unit = unit.as_str().to_ascii_lowercase();
        let resolved = if unit.ends_with("year") {
            year_range(today.year() + offset)
        } else if unit == "quarter" {
            let index = today.year() * 4 + (today.month0() / 3) as i32 + offset;
            quarter_range(index.div_euclid(4), index.rem_euclid(4) + 1)
        } else {
            let index = today.year() * 12 + today.month0() as i32 + offset;
            let (year, month) = (index.div_euclid(12), index.rem_euclid(12) as u32 + 1);
            ymd(year, month, 1).and_then(|start| {
                range(start, month_end(year, month)?, start.format("%B %Y").to_string())
            })
        };
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            reference: TemporalReference {
                text: m.as_str().to_string(),
                kind: TemporalKind::Relative,
                resolved_range: resolved,
            },
        });
    }
    for m in YTD_RE.find_iter(text) {
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            reference: TemporalReference {
                text: m.as_str().to_string(),
                kind: TemporalKind::Relative,
                resolved_range: ymd(today.year(), 1, 1)
                    .and_then(|start| range(start, today, format!("{} YTD", today.year()))),
            },
        });
    }
    hits
}

fn num(caps: &Captures, group: usize) -> Option<i32> {
    caps.get(group)?.as_str().parse().ok()
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    ymd(next_year, next_month, 1)?.pred_opt()
}

fn range(start: NaiveDate, end: NaiveDate, label: String) -> Option<DateRange> {
    Some(DateRange { start, end, label })
}

fn quarter_range(year: i32, quarter: i32) -> Option<DateRange> {
    let first_month = (quarter as u32 - 1) * 3 + 1;
    range(
        ymd(year, first_month, 1)?,
        month_end(year, first_month + 2)?,
        format!("Q{quarter} {year}"),
    )
}

fn year_range(year: i32) -> Option<DateRange> {
    range(ymd(year, 1, 1)?, ymd(year, 12, 31)?, year.to_string())
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let prefix = lower.get(..3)?;
    let month = match prefix {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 5).unwrap()
    }

    fn labels(refs: &[TemporalReference]) -> Vec<String> {
        refs.iter()
            .filter_map(|r| r.resolved_range.as_ref().map(|d| d.label.clone()))
            .collect()
    }

    #[test]
    fn test_quarter_and_fiscal_year() {
        let refs = extract("Controls tested in Q3 2024 and during FY2023.", today());
        assert_eq!(labels(&refs), vec!["Q3 2024", "FY2023"]);
        let q3 = refs[0].resolved_range.as_ref().unwrap();
        assert_eq!(q3.start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(q3.end, NaiveDate::from_ymd_opt(2024, 9, 30).unwrap());
    }

    #[test]
    fn test_longest_match_wins() {
        // "2024" inside "Q3 2024" must not be reported separately.
        let refs = extract("The audit deadline is Q3 2024.", today());
        let explicit: Vec<_> = refs.iter().filter(|r| r.kind == TemporalKind::Explicit).collect();
        assert_eq!(explicit.len(), 1);
        assert_eq!(explicit[0].text, "Q3 2024");
        assert!(refs.iter().any(|r| r.kind == TemporalKind::Indicator && r.text == "deadline"));
    }

    #[test]
    fn test_dates_and_months() {
        let refs = extract("Filed on 2024-03-15, reviewed March 31, 2024, effective June 2023.", today());
        assert_eq!(labels(&refs), vec!["2024-03-15", "2024-03-31", "June 2023"]);
    }

    #[test]
    fn test_as_of_and_ordinal_quarter() {
        let refs = extract("As of 2023 the third quarter of 2022 was restated.", today());
        assert_eq!(labels(&refs), vec!["2023", "Q3 2022"]);
        assert_eq!(refs[0].text, "As of 2023");
    }

    #[test]
    fn test_relative_expressions_use_reference_date() {
        let refs = extract("Compare last quarter with next year and YTD results.", today());
        assert_eq!(labels(&refs), vec!["Q3 2024", "2025", "2024 YTD"]);
        assert!(refs.iter().all(|r| r.kind == TemporalKind::Relative));

        let jan = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let refs = extract("last quarter and last month", jan);
        assert_eq!(labels(&refs), vec!["Q4 2023", "December 2023"]);
    }

    #[test]
    fn test_indicator_only_question() {
        let refs = extract("When is the audit deadline?", today());
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.kind == TemporalKind::Indicator && r.resolved_range.is_none()));
    }

    #[test]
    fn test_no_temporal_content() {
        assert!(extract("Who owns the access review control?", today()).is_empty());
        assert!(explicit_periods("SOX section 404 applies.").is_empty());
    }

    #[test]
    fn test_explicit_periods_dedup() {
        let periods = explicit_periods("Q3 2024 testing. Remediation by Q3 2024.");
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].label, "Q3 2024");
    }
}
