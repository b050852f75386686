//! Monthly time periods, canonically labelled `YYYY-MM`.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

const CANONICAL_FORMAT: &str = "%Y-%m";
const DISPLAY_FORMAT: &str = "%b %Y";

/// Matches the first "Jan 2015"-like token of a column header. Full month names and a trailing
/// full stop are tolerated, any other decorative text around the token is ignored.
fn month_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{4})\b")
            .expect("static month/year pattern")
    })
}

/// A calendar month. Ordering is chronological, which is also the ordering of the `YYYY-MM`
/// labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(NaiveDate);

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    /// Derive the period from a metric column header such as
    /// `"Jan 2015 - Installations Quantity"`.
    pub fn from_header(header: &str) -> Option<Self> {
        let captures = month_year_regex().captures(header)?;
        let month = &captures[1];
        let year = &captures[2];
        NaiveDate::parse_from_str(&format!("1 {month} {year}"), "%d %b %Y")
            .ok()
            .map(Self)
    }

    /// Canonical `YYYY-MM` label.
    pub fn label(&self) -> String {
        self.0.format(CANONICAL_FORMAT).to_string()
    }

    /// Human month-year label, e.g. `Jan 2015`.
    pub fn display_label(&self) -> String {
        self.0.format(DISPLAY_FORMAT).to_string()
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl FromStr for Period {
    type Err = String;

    /// Parses either the canonical `YYYY-MM` label or the display label `Jan 2015`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&format!("1 {value}"), "%d %b %Y"))
            .map(Self)
            .map_err(|_| format!("'{value}' is not a YYYY-MM or 'Mon YYYY' period"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_should_parse_from_decorated_headers() {
        let cases = [
            ("Jan 2015 - Installations Quantity", "2015-01"),
            ("SGU Rated Output In kW Dec 2019", "2019-12"),
            ("Installations Quantity (September 2020)", "2020-09"),
            ("feb. 2011 - Output", "2011-02"),
        ];
        for (header, label) in cases {
            assert_eq!(
                Period::from_header(header).map(|p| p.label()),
                Some(label.to_string()),
                "{header} should map to {label}"
            );
        }
    }

    #[test]
    fn period_should_not_parse_without_month_year_token() {
        assert!(Period::from_header("Installations Quantity Total").is_none());
        assert!(Period::from_header("Small Unit Installation Postcode").is_none());
        assert!(Period::from_header("Janitor 15").is_none());
    }

    #[test]
    fn labels_sort_chronologically() {
        let mut periods = vec![
            Period::new(2016, 1).unwrap(),
            Period::new(2015, 11).unwrap(),
            Period::new(2015, 2).unwrap(),
        ];
        periods.sort();
        let labels: Vec<String> = periods.iter().map(Period::label).collect();
        let mut sorted_labels = labels.clone();
        sorted_labels.sort();
        assert_eq!(labels, sorted_labels);
        assert_eq!(labels, vec!["2015-02", "2015-11", "2016-01"]);
    }

    #[test]
    fn period_round_trips_through_both_labels() {
        let period = Period::new(2015, 1).unwrap();
        assert_eq!(period.display_label(), "Jan 2015");
        assert_eq!(period.to_string(), "2015-01");
        assert_eq!("2015-01".parse::<Period>().unwrap(), period);
        assert_eq!("Jan 2015".parse::<Period>().unwrap(), period);
        assert!("2015-13".parse::<Period>().is_err());
    }
}
