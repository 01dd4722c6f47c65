use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Calendar component a recurring series advances on each occurrence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePeriod {
    Day,
    Week,
    Month,
    Year,
}

impl RecurrencePeriod {
    /// Step used when the rule carries no explicit amount. Weeks advance in days, so
    /// their implicit step is seven; an explicit amount replaces it verbatim.
    pub fn default_step(self) -> u32 {
        match self {
            RecurrencePeriod::Week => 7,
            RecurrencePeriod::Day | RecurrencePeriod::Month | RecurrencePeriod::Year => 1,
        }
    }

    fn noun(self) -> &'static str {
        match self {
            RecurrencePeriod::Day => "day",
            RecurrencePeriod::Week => "week",
            RecurrencePeriod::Month => "month",
            RecurrencePeriod::Year => "year",
        }
    }
}

/// Recurrence rule carried by a root transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recurrence {
    pub period: RecurrencePeriod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Recurrence {
    pub fn new(period: RecurrencePeriod) -> Self {
        Self {
            period,
            amount: None,
            limit: None,
        }
    }

    pub fn every(mut self, amount: u32) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn limited_to(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_open_ended(&self) -> bool {
        self.limit.is_none()
    }

    pub fn step(&self) -> u32 {
        self.amount.unwrap_or_else(|| self.period.default_step())
    }

    /// Number of occurrences a single generation pass produces for this rule.
    pub fn batch_len(&self, batch_size: usize) -> usize {
        match self.limit {
            Some(limit) => limit as usize,
            None => batch_size,
        }
    }

    /// Date of the `index`-th occurrence counted from `base` (index 1 is the first one
    /// after `base`). Overflowing days and months roll into the next month or year the
    /// way an ordinary calendar constructor normalizes them, so Jan 31 plus one month
    /// lands in early March rather than being clamped to Feb 28.
    pub fn occurrence_date(&self, base: NaiveDate, index: u32) -> Option<NaiveDate> {
        let offset = i64::from(self.step()) * i64::from(index);
        match self.period {
            RecurrencePeriod::Day | RecurrencePeriod::Week => {
                base.checked_add_signed(Duration::days(offset))
            }
            RecurrencePeriod::Month => add_months_normalized(base, offset),
            RecurrencePeriod::Year => add_months_normalized(base, offset.checked_mul(12)?),
        }
    }

    pub fn label(&self) -> String {
        let cadence = match (self.amount, self.period) {
            (None, RecurrencePeriod::Day) | (Some(1), RecurrencePeriod::Day) => "Daily".into(),
            (None, RecurrencePeriod::Week) => "Weekly".into(),
            (None, RecurrencePeriod::Month) | (Some(1), RecurrencePeriod::Month) => {
                "Monthly".into()
            }
            (None, RecurrencePeriod::Year) | (Some(1), RecurrencePeriod::Year) => "Yearly".into(),
            (Some(n), RecurrencePeriod::Week) => {
                format!("Every {} day{}", n, if n > 1 { "s" } else { "" })
            }
            (Some(n), period) => format!(
                "Every {} {}{}",
                n,
                period.noun(),
                if n > 1 { "s" } else { "" }
            ),
        };
        match self.limit {
            Some(limit) => format!("{cadence}, {limit} times"),
            None => cadence,
        }
    }
}

/// Subset of a series targeted by a bulk edit or delete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceScope {
    Accomplished,
    Pending,
    All,
}

impl RecurrenceScope {
    pub fn includes_accomplished(self) -> bool {
        matches!(self, RecurrenceScope::Accomplished | RecurrenceScope::All)
    }

    pub fn includes_pending(self) -> bool {
        matches!(self, RecurrenceScope::Pending | RecurrenceScope::All)
    }
}

fn add_months_normalized(base: NaiveDate, months: i64) -> Option<NaiveDate> {
    let month_index = i64::from(base.year()) * 12 + i64::from(base.month0()) + months;
    let year = i32::try_from(month_index.div_euclid(12)).ok()?;
    let month = u32::try_from(month_index.rem_euclid(12)).ok()? + 1;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    first.checked_add_signed(Duration::days(i64::from(base.day()) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_occurrences_keep_the_day() {
        let rule = Recurrence::new(RecurrencePeriod::Month);
        let base = date(2024, 1, 15);
        for k in 1..=10u32 {
            assert_eq!(rule.occurrence_date(base, k), Some(date(2024, 1 + k, 15)));
        }
        assert_eq!(rule.occurrence_date(base, 12), Some(date(2025, 1, 15)));
    }

    #[test]
    fn month_overflow_rolls_forward() {
        let rule = Recurrence::new(RecurrencePeriod::Month);
        assert_eq!(
            rule.occurrence_date(date(2023, 1, 31), 1),
            Some(date(2023, 3, 3))
        );
        assert_eq!(
            rule.occurrence_date(date(2024, 1, 31), 1),
            Some(date(2024, 3, 2))
        );
    }

    #[test]
    fn leap_day_rolls_into_march_on_common_years() {
        let rule = Recurrence::new(RecurrencePeriod::Year);
        assert_eq!(
            rule.occurrence_date(date(2024, 2, 29), 1),
            Some(date(2025, 3, 1))
        );
        assert_eq!(
            rule.occurrence_date(date(2024, 2, 29), 4),
            Some(date(2028, 2, 29))
        );
    }

    #[test]
    fn week_uses_seven_days_unless_amount_given() {
        let base = date(2024, 12, 30);
        let weekly = Recurrence::new(RecurrencePeriod::Week);
        assert_eq!(weekly.occurrence_date(base, 1), Some(date(2025, 1, 6)));
        assert_eq!(weekly.occurrence_date(base, 2), Some(date(2025, 1, 13)));

        let explicit = Recurrence::new(RecurrencePeriod::Week).every(3);
        assert_eq!(explicit.occurrence_date(base, 1), Some(date(2025, 1, 2)));
    }

    #[test]
    fn dates_strictly_increase_for_every_period() {
        let base = date(2024, 1, 31);
        for period in [
            RecurrencePeriod::Day,
            RecurrencePeriod::Week,
            RecurrencePeriod::Month,
            RecurrencePeriod::Year,
        ] {
            for amount in 1..=4u32 {
                let rule = Recurrence::new(period).every(amount);
                let dates: Vec<_> = (1..=24)
                    .map(|k| rule.occurrence_date(base, k).unwrap())
                    .collect();
                assert!(
                    dates.windows(2).all(|pair| pair[0] < pair[1]),
                    "{period:?} x{amount} not increasing"
                );
            }
        }
    }

    #[test]
    fn day_spacing_is_exact() {
        let rule = Recurrence::new(RecurrencePeriod::Day).every(5);
        let base = date(2024, 2, 27);
        let first = rule.occurrence_date(base, 1).unwrap();
        let second = rule.occurrence_date(base, 2).unwrap();
        assert_eq!((second - first).num_days(), 5);
    }

    #[test]
    fn month_and_year_spacing_is_exact() {
        let base = date(2024, 1, 15);
        let bimonthly = Recurrence::new(RecurrencePeriod::Month).every(2);
        for k in 1..=5u32 {
            assert_eq!(
                bimonthly.occurrence_date(base, k),
                Some(date(2024, 1 + 2 * k, 15))
            );
        }
        assert_eq!(bimonthly.occurrence_date(base, 6), Some(date(2025, 1, 15)));

        let triennial = Recurrence::new(RecurrencePeriod::Year).every(3);
        for k in 1..=4u32 {
            let year = 2024 + 3 * i32::try_from(k).unwrap();
            assert_eq!(triennial.occurrence_date(base, k), Some(date(year, 1, 15)));
        }
    }

    #[test]
    fn batch_len_follows_limit() {
        let open = Recurrence::new(RecurrencePeriod::Day);
        assert_eq!(open.batch_len(200), 200);
        let bounded = open.limited_to(10);
        assert_eq!(bounded.batch_len(200), 10);
    }

    #[test]
    fn labels() {
        assert_eq!(Recurrence::new(RecurrencePeriod::Month).label(), "Monthly");
        assert_eq!(
            Recurrence::new(RecurrencePeriod::Month).every(2).label(),
            "Every 2 months"
        );
        assert_eq!(
            Recurrence::new(RecurrencePeriod::Week).limited_to(4).label(),
            "Weekly, 4 times"
        );
    }
}
