use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::category::CategoryId;
use super::store::{SortDirection, TransactionStore};
use super::transaction::Transaction;

/// Income booked this many days or more before the first of a month belongs
/// to the previous fiscal month.
pub const ANCHOR_TOLERANCE_DAYS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("invalid month {month} in year {year}")]
    InvalidMonth { month: u32, year: i32 },
}

#[derive(Debug, Error)]
pub enum FiscalError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error("loading income transactions: {0}")]
    Store(#[source] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A reporting month anchored to paydays instead of the calendar.
/// `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalMonth {
    pub month: u32,
    pub year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for FiscalMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}: {} to {}", self.year, self.month, self.start, self.end)
    }
}

impl FiscalMonth {
    /// Resolves the fiscal month from income transactions.
    ///
    /// The start is the anchor of `(month, year)`; the end is the day before
    /// the anchor of the following month.
    pub fn resolve(month: u32, year: i32, incomes: &[Transaction]) -> Result<Self, PeriodError> {
        let start = fiscal_start_date(month, year, incomes)?;
        let (next_month, next_year) = next_month(month, year)?;
        let next_start = fiscal_start_date(next_month, next_year, incomes)?;
        let end = next_start
            .pred_opt()
            .ok_or(PeriodError::InvalidMonth { month: next_month, year: next_year })?;
        Ok(FiscalMonth { month, year, start, end })
    }
}

pub fn month_start(month: u32, year: i32) -> Result<NaiveDate, PeriodError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(PeriodError::InvalidMonth { month, year })
}

/// The month after `(month, year)`, rolling December over to January.
pub fn next_month(month: u32, year: i32) -> Result<(u32, i32), PeriodError> {
    match month {
        1..=11 => Ok((month + 1, year)),
        12 => Ok((1, year + 1)),
        _ => Err(PeriodError::InvalidMonth { month, year }),
    }
}

/// Finds the fiscal start of `(month, year)`.
///
/// Incomes are visited in the order given. The first one that is not
/// [`ANCHOR_TOLERANCE_DAYS`] or more before the calendar first wins, no
/// matter how far after it lies. Without a qualifying income the calendar
/// first is returned.
pub fn fiscal_start_date(
    month: u32,
    year: i32,
    incomes: &[Transaction],
) -> Result<NaiveDate, PeriodError> {
    let start_of_month = month_start(month, year)?;

    let anchor = incomes
        .iter()
        .map(|t| t.booking_date)
        .find(|date| {
            let offset = date.signed_duration_since(start_of_month).num_days();
            !(offset < 0 && offset.abs() >= ANCHOR_TOLERANCE_DAYS)
        });

    Ok(anchor.unwrap_or(start_of_month))
}

/// The window that income transactions are fetched from: the first day of
/// the previous month up to the last day of the next month.
pub fn income_window(month: u32, year: i32) -> Result<DateRange, PeriodError> {
    let invalid = PeriodError::InvalidMonth { month, year };
    let first = month_start(month, year)?;
    let start = first.checked_sub_months(Months::new(1)).ok_or(invalid)?;
    let end = start
        .checked_add_months(Months::new(3))
        .and_then(|d| d.pred_opt())
        .ok_or(invalid)?;
    Ok(DateRange::new(start, end))
}

/// Resolves a fiscal month from the transactions of a single income category.
pub async fn fiscal_month_for_income_category<S: TransactionStore>(
    store: &S,
    month: u32,
    year: i32,
    income_category: CategoryId,
) -> Result<FiscalMonth, FiscalError<S::Error>> {
    let window = income_window(month, year)?;
    let incomes = store
        .income_transactions_in_range(window, income_category, SortDirection::Ascending)
        .await
        .map_err(FiscalError::Store)?;
    Ok(FiscalMonth::resolve(month, year, &incomes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn incomes(dates: &[(i32, u32, u32)]) -> Vec<Transaction> {
        dates
            .iter()
            .map(|&(y, m, d)| Transaction::new(date(y, m, d), "Gehalt/Rente", Decimal::new(330042, 2)))
            .collect()
    }

    fn resolve(month: u32, year: i32, dates: &[(i32, u32, u32)]) -> (NaiveDate, NaiveDate) {
        let fm = FiscalMonth::resolve(month, year, &incomes(dates)).unwrap();
        (fm.start, fm.end)
    }

    #[test]
    fn incomes_at_beginning_of_month() {
        let got = resolve(
            2,
            2020,
            &[(2020, 1, 2), (2020, 1, 3), (2020, 2, 1), (2020, 2, 4), (2020, 3, 2), (2020, 3, 3)],
        );
        assert_eq!(got, (date(2020, 2, 1), date(2020, 3, 1)));
    }

    #[test]
    fn incomes_on_the_first() {
        let got = resolve(2, 2020, &[(2020, 1, 1), (2020, 2, 1), (2020, 3, 1)]);
        assert_eq!(got, (date(2020, 2, 1), date(2020, 2, 29)));
    }

    #[test]
    fn incomes_at_end_of_month() {
        let got = resolve(
            2,
            2020,
            &[(2020, 1, 25), (2020, 1, 28), (2020, 2, 25), (2020, 2, 26), (2020, 3, 27), (2020, 3, 29)],
        );
        assert_eq!(got, (date(2020, 1, 25), date(2020, 2, 24)));
    }

    #[test]
    fn one_income_early_one_late() {
        let got = resolve(
            2,
            2020,
            &[(2020, 1, 2), (2020, 1, 29), (2020, 2, 2), (2020, 2, 27), (2020, 3, 1), (2020, 3, 28)],
        );
        assert_eq!(got, (date(2020, 1, 29), date(2020, 2, 26)));
    }

    #[test]
    fn no_income_in_next_month_with_early_payday() {
        let got = resolve(2, 2020, &[(2020, 1, 2), (2020, 1, 3), (2020, 2, 1), (2020, 2, 4)]);
        assert_eq!(got, (date(2020, 2, 1), date(2020, 2, 29)));
    }

    #[test]
    fn no_income_in_next_month_with_late_payday() {
        let got = resolve(2, 2020, &[(2020, 1, 25), (2020, 1, 28), (2020, 2, 25), (2020, 2, 26)]);
        assert_eq!(got, (date(2020, 1, 25), date(2020, 2, 24)));
    }

    #[test]
    fn three_incomes_per_month() {
        let got = resolve(
            4,
            2020,
            &[
                (2020, 3, 8),
                (2020, 3, 29),
                (2020, 3, 31),
                (2020, 4, 6),
                (2020, 4, 26),
                (2020, 4, 28),
                (2020, 5, 11),
                (2020, 5, 26),
            ],
        );
        assert_eq!(got, (date(2020, 3, 29), date(2020, 4, 25)));
    }

    #[test]
    fn falls_back_to_calendar_first_without_incomes() {
        assert_eq!(fiscal_start_date(6, 2021, &[]).unwrap(), date(2021, 6, 1));
    }

    #[test]
    fn income_fifteen_days_early_is_ignored() {
        // 2020-01-17 is exactly 15 days before 2020-02-01.
        let start = fiscal_start_date(2, 2020, &incomes(&[(2020, 1, 17)])).unwrap();
        assert_eq!(start, date(2020, 2, 1));
    }

    #[test]
    fn income_fourteen_days_early_anchors() {
        let start = fiscal_start_date(2, 2020, &incomes(&[(2020, 1, 18)])).unwrap();
        assert_eq!(start, date(2020, 1, 18));
    }

    #[test]
    fn source_order_wins_over_distance() {
        // Feb 10 comes first in the input, so it anchors even though Feb 1 is closer.
        let start = fiscal_start_date(2, 2020, &incomes(&[(2020, 2, 10), (2020, 2, 1)])).unwrap();
        assert_eq!(start, date(2020, 2, 10));
    }

    #[test]
    fn december_rolls_over_to_january() {
        let got = resolve(12, 2020, &[(2020, 11, 30), (2020, 12, 30), (2021, 1, 29)]);
        assert_eq!(got, (date(2020, 11, 30), date(2020, 12, 29)));
    }

    #[test]
    fn end_is_one_day_before_next_start() {
        let data = incomes(&[(2021, 1, 27), (2021, 2, 26), (2021, 3, 29), (2021, 4, 28), (2021, 5, 27)]);
        for month in 2..=4 {
            let fm = FiscalMonth::resolve(month, 2021, &data).unwrap();
            let next = fiscal_start_date(month + 1, 2021, &data).unwrap();
            assert!(fm.start <= fm.end, "{fm}");
            assert_eq!(fm.end.succ_opt().unwrap(), next);
        }
    }

    #[test]
    fn invalid_month_is_rejected() {
        assert_eq!(
            FiscalMonth::resolve(13, 2020, &[]),
            Err(PeriodError::InvalidMonth { month: 13, year: 2020 })
        );
        assert!(fiscal_start_date(0, 2020, &[]).is_err());
    }

    #[test]
    fn income_window_spans_three_months() {
        let window = income_window(1, 2021).unwrap();
        assert_eq!(window, DateRange::new(date(2020, 12, 1), date(2021, 2, 28)));

        let window = income_window(2, 2020).unwrap();
        assert_eq!(window, DateRange::new(date(2020, 1, 1), date(2020, 3, 31)));
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert!(range.contains(date(2024, 1, 1)));
        assert!(range.contains(date(2024, 12, 31)));
        assert!(!range.contains(date(2025, 1, 1)));
    }

    #[test]
    fn fiscal_month_display() {
        let fm = FiscalMonth::resolve(2, 2020, &incomes(&[(2020, 1, 25), (2020, 2, 25)])).unwrap();
        assert_eq!(fm.to_string(), "2020-02: 2020-01-25 to 2020-02-24");
    }

    #[tokio::test]
    async fn fiscal_month_from_store_uses_income_category_only() {
        let income = Category::new(CategoryId(1), "Income");
        let other = Category::new(CategoryId(2), "Groceries");
        let store = MemoryStore::new(vec![income.clone(), other.clone()]);

        let mut seed = incomes(&[(2020, 1, 25), (2020, 2, 25), (2020, 3, 27)]);
        for tx in &mut seed {
            tx.category = Some(income.summary());
        }
        // Closer to Feb 1 than the payday, but not an income.
        let mut noise = Transaction::new(date(2020, 1, 31), "Lastschrift", Decimal::new(-1000, 2));
        noise.category = Some(other.summary());
        seed.push(noise);
        store.extend(seed);

        let fm = fiscal_month_for_income_category(&store, 2, 2020, CategoryId(1))
            .await
            .unwrap();
        assert_eq!((fm.start, fm.end), (date(2020, 1, 25), date(2020, 2, 24)));
    }
}
