use chrono::{NaiveDate, NaiveDateTime};

/// Canonical rendering of every date the catalog stores.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// One accepted input pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Date(&'static str),
    DateTime(&'static str),
}

impl DateFormat {
    pub fn pattern(&self) -> &'static str {
        match self {
            DateFormat::Date(p) | DateFormat::DateTime(p) => p,
        }
    }

    pub fn parse(&self, input: &str) -> chrono::ParseResult<NaiveDate> {
        match self {
            DateFormat::Date(p) => NaiveDate::parse_from_str(input, p),
            DateFormat::DateTime(p) => NaiveDateTime::parse_from_str(input, p).map(|dt| dt.date()),
        }
    }
}

/// Accepted patterns, tried in order. The first one that parses wins.
pub const ACCEPTED_FORMATS: &[DateFormat] = &[
    DateFormat::Date("%Y-%m-%d"),
    DateFormat::Date("%d/%m/%Y"),
    DateFormat::Date("%d-%m-%Y"),
    DateFormat::Date("%Y/%m/%d"),
    DateFormat::DateTime("%d/%m/%Y %H:%M:%S"),
    DateFormat::DateTime("%Y-%m-%d %H:%M:%S"),
    DateFormat::DateTime("%d-%m-%Y %H:%M:%S"),
    DateFormat::DateTime("%Y/%m/%d %H:%M:%S"),
    DateFormat::DateTime("%Y-%m-%dT%H:%M:%S"),
];

/// Parses `input` against [`ACCEPTED_FORMATS`].
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    ACCEPTED_FORMATS
        .iter()
        .find_map(|format| format.parse(input).ok())
}

/// Strict parse of the canonical `YYYY-MM-DD` form.
pub fn parse_canonical(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, CANONICAL_DATE_FORMAT).ok()
}

pub fn format_canonical(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn april_18() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 18).unwrap()
    }

    #[test]
    fn every_accepted_format_parses() {
        let samples = [
            "2024-04-18",
            "18/04/2024",
            "18-04-2024",
            "2024/04/18",
            "18/04/2024 14:30:00",
            "2024-04-18 14:30:00",
            "18-04-2024 14:30:00",
            "2024/04/18 14:30:00",
            "2024-04-18T14:30:00",
        ];
        assert_eq!(samples.len(), ACCEPTED_FORMATS.len());

        for (sample, format) in samples.iter().zip(ACCEPTED_FORMATS) {
            assert_eq!(format.parse(sample).ok(), Some(april_18()), "{}", format.pattern());
            assert_eq!(parse_date(sample), Some(april_18()), "{}", sample);
        }
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_date("  18/04/2024 "), Some(april_18()));
    }

    #[test]
    fn day_first_wins_over_month_first() {
        // 03/04/2024 is read as 3 April, never 4 March.
        assert_eq!(
            parse_date("03/04/2024"),
            NaiveDate::from_ymd_opt(2024, 4, 3)
        );
    }

    #[test]
    fn unrecognized_inputs_fail() {
        for input in ["", "-", "April 18, 2024", "2024.04.18", "31/02/2024"] {
            assert_eq!(parse_date(input), None, "{}", input);
        }
    }

    #[test]
    fn canonical_parse_is_strict() {
        assert_eq!(parse_canonical("2024-04-18"), Some(april_18()));
        assert_eq!(parse_canonical("18/04/2024"), None);
        assert_eq!(format_canonical(april_18()), "2024-04-18");
    }
}
