use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// These are tedious arrays to aid the lookup of month lengths. Unfortunately the
// `chrono` library does not give us helpers for this.
const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const MONTH_LENGTHS_LEAP: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// How often a recurring obligation falls due.
///
/// Labels that we don't understand are kept verbatim rather than rejected. The
/// period calculator treats them as calendar months, and the original label
/// survives a round trip through storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Periodicity {
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannual,
    Annual,
    Unrecognized(String),
}

/// The length of a single period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Days(i64),
    Months(i32),
}

impl Periodicity {
    /// Parse a periodicity label. Both the English and Spanish names are accepted
    /// since stored obligations use either.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "weekly" | "semanal" => Periodicity::Weekly,
            "biweekly" | "quincenal" => Periodicity::Biweekly,
            "monthly" | "mensual" => Periodicity::Monthly,
            "bimonthly" | "bimestral" => Periodicity::Bimonthly,
            "quarterly" | "trimestral" => Periodicity::Quarterly,
            "semiannual" | "semestral" => Periodicity::Semiannual,
            "annual" | "yearly" | "anual" => Periodicity::Annual,
            _ => Periodicity::Unrecognized(label.to_owned()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Periodicity::Weekly => "weekly",
            Periodicity::Biweekly => "biweekly",
            Periodicity::Monthly => "monthly",
            Periodicity::Bimonthly => "bimonthly",
            Periodicity::Quarterly => "quarterly",
            Periodicity::Semiannual => "semiannual",
            Periodicity::Annual => "annual",
            Periodicity::Unrecognized(label) => label,
        }
    }

    pub fn unit(&self) -> Option<PeriodUnit> {
        match *self {
            Periodicity::Weekly => Some(PeriodUnit::Days(7)),
            // Biweekly obligations are billed twice a month, hence 15 rather than 14.
            Periodicity::Biweekly => Some(PeriodUnit::Days(15)),
            Periodicity::Monthly => Some(PeriodUnit::Months(1)),
            Periodicity::Bimonthly => Some(PeriodUnit::Months(2)),
            Periodicity::Quarterly => Some(PeriodUnit::Months(3)),
            Periodicity::Semiannual => Some(PeriodUnit::Months(6)),
            Periodicity::Annual => Some(PeriodUnit::Months(12)),
            Periodicity::Unrecognized(_) => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.unit().is_some()
    }

    /// The instant exactly one period before `instant`, or `None` for an
    /// unrecognized periodicity.
    pub fn step_back(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.unit()?.shift(instant, -1)
    }

    /// The instant exactly one period after `instant`, or `None` for an
    /// unrecognized periodicity.
    pub fn step_forward(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.unit()?.shift(instant, 1)
    }
}

impl PeriodUnit {
    /// Move `instant` by `steps` whole periods. Month based units keep the day of
    /// month where they can and clamp to the last day where they can't.
    pub fn shift(&self, instant: DateTime<Utc>, steps: i32) -> Option<DateTime<Utc>> {
        match *self {
            PeriodUnit::Days(days) => instant.checked_add_signed(Duration::days(days * steps as i64)),
            PeriodUnit::Months(months) => shift_months(instant, months * steps, instant.day()),
        }
    }
}

impl From<String> for Periodicity {
    fn from(label: String) -> Self {
        Periodicity::parse(&label)
    }
}

impl From<Periodicity> for String {
    fn from(periodicity: Periodicity) -> Self {
        periodicity.label().to_owned()
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Number of days in `month` (January = 1) of `year`
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let index = (month as usize).saturating_sub(1).min(11);

    if is_leap_year(year) {
        MONTH_LENGTHS_LEAP[index]
    } else {
        MONTH_LENGTHS[index]
    }
}

/// Shift `instant` by `months` (negative goes backwards) and land on `day`, keeping
/// the time of day. If the target month is too short for `day` we use its last day
/// instead, so 31 January + 1 month is 28 (or 29) February, never 3 March.
///
/// Returns `None` only when the result would fall outside the range `chrono` can
/// represent.
pub fn shift_months(instant: DateTime<Utc>, months: i32, day: u32) -> Option<DateTime<Utc>> {
    let index = instant.year() * 12 + instant.month0() as i32 + months;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    let day = day.max(1).min(days_in_month(year, month));

    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_time(instant.time())))
}

/// The first instant of the month containing `instant`
pub fn month_start(instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(instant.year(), instant.month(), 1, 0, 0, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn parse_english_labels() {
        assert_eq!(Periodicity::parse("weekly"), Periodicity::Weekly);
        assert_eq!(Periodicity::parse("Quarterly"), Periodicity::Quarterly);
        assert_eq!(Periodicity::parse(" annual "), Periodicity::Annual);
    }

    #[test]
    fn parse_spanish_labels() {
        assert_eq!(Periodicity::parse("quincenal"), Periodicity::Biweekly);
        assert_eq!(Periodicity::parse("mensual"), Periodicity::Monthly);
        assert_eq!(Periodicity::parse("semestral"), Periodicity::Semiannual);
    }

    #[test]
    fn parse_unrecognized_keeps_label() {
        let p = Periodicity::parse("every blue moon");
        assert_eq!(p, Periodicity::Unrecognized("every blue moon".into()));
        assert_eq!(p.label(), "every blue moon");
        assert!(!p.is_recognized());
    }

    #[test]
    fn serde_uses_label() {
        let json = serde_json::to_string(&Periodicity::Bimonthly).unwrap();
        assert_eq!(json, "\"bimonthly\"");

        let p: Periodicity = serde_json::from_str("\"trimestral\"").unwrap();
        assert_eq!(p, Periodicity::Quarterly);
    }

    #[test]
    fn days_in_month_leap_years() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2023, 4), 30);
    }

    #[test]
    fn shift_months_clamps_month_end() {
        assert_eq!(shift_months(at(2023, 1, 31), 1, 31), Some(at(2023, 2, 28)));
        assert_eq!(shift_months(at(2024, 1, 31), 1, 31), Some(at(2024, 2, 29)));
    }

    #[test]
    fn shift_months_backwards_across_year() {
        assert_eq!(shift_months(at(2024, 1, 15), -2, 15), Some(at(2023, 11, 15)));
        assert_eq!(shift_months(at(2024, 3, 31), -1, 31), Some(at(2024, 2, 29)));
    }

    #[test]
    fn shift_months_keeps_time_of_day() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 15).unwrap();
        let shifted = shift_months(instant, 1, 10).unwrap();
        assert_eq!(shifted, Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 15).unwrap());
    }

    #[test]
    fn step_back_each_unit() {
        let due = at(2024, 3, 31);
        assert_eq!(Periodicity::Weekly.step_back(due), Some(at(2024, 3, 24)));
        assert_eq!(Periodicity::Biweekly.step_back(due), Some(at(2024, 3, 16)));
        assert_eq!(Periodicity::Monthly.step_back(due), Some(at(2024, 2, 29)));
        assert_eq!(Periodicity::Bimonthly.step_back(due), Some(at(2024, 1, 31)));
        assert_eq!(Periodicity::Quarterly.step_back(due), Some(at(2023, 12, 31)));
        assert_eq!(Periodicity::Semiannual.step_back(due), Some(at(2023, 9, 30)));
        assert_eq!(Periodicity::Annual.step_back(due), Some(at(2023, 3, 31)));
    }

    #[test]
    fn step_annual_from_leap_day() {
        assert_eq!(Periodicity::Annual.step_forward(at(2024, 2, 29)), Some(at(2025, 2, 28)));
    }

    #[test]
    fn step_unrecognized() {
        let p = Periodicity::Unrecognized("fortnightly-ish".into());
        assert_eq!(p.step_back(at(2024, 1, 1)), None);
    }

    #[test]
    fn month_start_is_midnight_on_the_first() {
        assert_eq!(
            month_start(at(2024, 7, 19)),
            Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap())
        );
    }
}
