use crate::periodicity::{month_start, shift_months, Periodicity};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

/// An inclusive range of instants that counts as "the current period"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// How the current period of an obligation is worked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodStrategy {
    /// The calendar month containing "now"
    CalendarMonth,
    /// The period that ends on `anchor` and starts one period before it
    AnchoredRollback {
        periodicity: Periodicity,
        anchor: DateTime<Utc>,
    },
}

impl PeriodWindow {
    /// The whole calendar month containing `instant`
    pub fn calendar_month(instant: DateTime<Utc>) -> Self {
        let start = month_start(instant);
        let next = start.and_then(|s| shift_months(s, 1, 1));

        match (start, next) {
            (Some(start), Some(next)) => PeriodWindow {
                start,
                end: next - Duration::nanoseconds(1),
            },
            // Only reachable at the very edge of the representable calendar. A
            // degenerate window is still a valid answer there.
            _ => PeriodWindow {
                start: instant,
                end: instant,
            },
        }
    }

    /// The calendar month `month` (January = 1) of `year`
    pub fn month_of(year: i32, month: u32) -> Option<Self> {
        let first = chrono::NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
        Some(Self::calendar_month(Utc.from_utc_datetime(&first)))
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

impl PeriodStrategy {
    /// Pick the strategy for an obligation.
    ///
    /// Monthly obligations always follow the calendar, whatever due date happens to
    /// be stored against them. Every other recognized periodicity rolls back from
    /// its next due date. Anything we can't roll back from (an unrecognized label,
    /// or no due date at all) falls back to the calendar month.
    pub fn for_obligation(periodicity: &Periodicity, next_due: Option<DateTime<Utc>>) -> Self {
        match (periodicity, next_due) {
            (Periodicity::Monthly, _) => PeriodStrategy::CalendarMonth,
            (p, Some(anchor)) if p.is_recognized() => PeriodStrategy::AnchoredRollback {
                periodicity: p.clone(),
                anchor,
            },
            (p, anchor) => {
                debug!(
                    "falling back to calendar month for periodicity '{}' (anchor: {:?})",
                    p, anchor
                );
                PeriodStrategy::CalendarMonth
            }
        }
    }

    /// The current period as seen at `now`
    pub fn window(&self, now: DateTime<Utc>) -> PeriodWindow {
        match self {
            PeriodStrategy::CalendarMonth => PeriodWindow::calendar_month(now),
            PeriodStrategy::AnchoredRollback {
                periodicity,
                anchor,
            } => match periodicity.step_back(*anchor) {
                Some(start) => PeriodWindow {
                    start,
                    end: *anchor,
                },
                None => {
                    debug!("cannot roll back from {} - using calendar month", anchor);
                    PeriodWindow::calendar_month(now)
                }
            },
        }
    }

    /// The first instant of the period after the current one
    pub fn next_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.window(now);
        window.end + Duration::nanoseconds(1)
    }
}
