//! # Stats
//!
//! Derived reads over the bill and product collections: the dashboard
//! counters, the revenue-by-day series behind the revenue chart, and the
//! bill list filter.
//!
//! Day boundaries are calendar days in the caller's timezone. The store
//! passes `chrono::Local::now()`; tests pass a fixed offset.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{Bill, Product};

// =============================================================================
// Dashboard
// =============================================================================

/// Counters shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DashboardStats {
    pub today_revenue: Money,
    pub today_bills: usize,
    pub total_revenue: Money,
    pub total_products: usize,
    /// Products with stock below `LOW_STOCK_THRESHOLD`.
    pub low_stock: usize,
}

impl DashboardStats {
    /// Computes the counters as of `now`.
    pub fn compute<Tz: TimeZone>(bills: &[Bill], products: &[Product], now: &DateTime<Tz>) -> Self {
        let today = now.date_naive();
        let tz = now.timezone();

        let mut stats = DashboardStats {
            total_products: products.len(),
            low_stock: products.iter().filter(|p| p.is_low_stock()).count(),
            ..Default::default()
        };

        for bill in bills {
            stats.total_revenue += bill.total;
            if bill.created_at.with_timezone(&tz).date_naive() == today {
                stats.today_revenue += bill.total;
                stats.today_bills += 1;
            }
        }

        stats
    }
}

// =============================================================================
// Revenue by Day
// =============================================================================

/// Date range presets for the revenue chart.
///
/// Weeks start on Sunday. "This" ranges end today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevenueRange {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    /// Inclusive on both ends.
    Custom { from: NaiveDate, to: NaiveDate },
}

impl RevenueRange {
    /// Resolves the preset to an inclusive `(start, end)` date pair.
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let week_start = today - Duration::days(today.weekday().num_days_from_sunday() as i64);
        let month_start = today.with_day(1).unwrap_or(today);
        let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);

        match *self {
            RevenueRange::Today => (today, today),
            RevenueRange::Yesterday => {
                let yesterday = today - Duration::days(1);
                (yesterday, yesterday)
            }
            RevenueRange::ThisWeek => (week_start, today),
            RevenueRange::LastWeek => {
                let start = week_start - Duration::days(7);
                (start, start + Duration::days(6))
            }
            RevenueRange::ThisMonth => (month_start, today),
            RevenueRange::LastMonth => {
                let end = month_start - Duration::days(1);
                (end.with_day(1).unwrap_or(end), end)
            }
            RevenueRange::ThisYear => (year_start, today),
            RevenueRange::LastYear => {
                let end = year_start - Duration::days(1);
                let start = NaiveDate::from_ymd_opt(end.year(), 1, 1).unwrap_or(end);
                (start, end)
            }
            RevenueRange::Custom { from, to } => (from, to),
        }
    }
}

/// One point of the revenue chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub revenue: Money,
    pub bills: usize,
}

/// Groups bills in `range` by calendar day, oldest first.
/// Days without bills are omitted.
pub fn revenue_by_day<Tz: TimeZone>(
    bills: &[Bill],
    range: RevenueRange,
    now: &DateTime<Tz>,
) -> Vec<DailyRevenue> {
    let tz = now.timezone();
    let (start, end) = range.resolve(now.date_naive());

    let mut days: std::collections::BTreeMap<NaiveDate, DailyRevenue> = Default::default();
    for bill in bills {
        let date = bill.created_at.with_timezone(&tz).date_naive();
        if date < start || date > end {
            continue;
        }
        let entry = days.entry(date).or_insert_with(|| DailyRevenue {
            date,
            revenue: Money::zero(),
            bills: 0,
        });
        entry.revenue += bill.total;
        entry.bills += 1;
    }

    days.into_values().collect()
}

// =============================================================================
// Bill Search
// =============================================================================

/// Filter for the bill list.
///
/// `text` matches a case-insensitive substring of the bill number, the
/// customer name or the phone. `from` and `to` are inclusive calendar
/// days in the caller's timezone. Unset parts match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BillQuery {
    pub text: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BillQuery {
    /// Query matching bills whose number, customer or phone contains `text`.
    pub fn text(text: impl Into<String>) -> Self {
        BillQuery {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Restricts the query to an inclusive day range.
    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Whether `bill` passes, with days taken in `tz`.
    pub fn matches<Tz: TimeZone>(&self, bill: &Bill, tz: &Tz) -> bool {
        let date = bill.created_at.with_timezone(tz).date_naive();
        if self.from.is_some_and(|from| date < from) || self.to.is_some_and(|to| date > to) {
            return false;
        }

        let needle = match self.text.as_deref().map(|text| text.trim().to_lowercase()) {
            Some(needle) if !needle.is_empty() => needle,
            _ => return true,
        };
        [
            Some(bill.bill_number.as_str()),
            bill.customer_name.as_deref(),
            bill.customer_phone.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Bills matching `query`, in their stored order.
pub fn search_bills<Tz: TimeZone>(bills: &[Bill], query: &BillQuery, tz: &Tz) -> Vec<Bill> {
    bills
        .iter()
        .filter(|bill| query.matches(bill, tz))
        .cloned()
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
