//! Contract expiry resolution.
//!
//! Given an instrument's calendar rule and a reference instant, computes the
//! concrete expiry to trade: nearest unexpired Thursday (weekly) or last
//! Thursday of the month (monthly), shifted backward over exchange holidays,
//! rolled forward once the same-day cutoff has passed. The computed date is
//! always cross-checked against the series actually listed in the catalog.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use thiserror::Error;

use crate::models::ExpiryRule;

/// IST offset, the exchange-local timezone for cutoff comparisons.
const IST_SECS: i32 = 5 * 3600 + 1800;

/// Terminal failure: no listed series covers the computed expiry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no valid expiry on or after {computed} in listed series")]
pub struct NoValidExpiry {
    /// The expiry the calendar rule produced.
    pub computed: NaiveDate,
}

/// Resolves contract expiries against a holiday calendar and cutoff time.
#[derive(Debug, Clone)]
pub struct ExpiryResolver {
    holidays: BTreeSet<NaiveDate>,
    cutoff: NaiveTime,
    exchange_offset: FixedOffset,
}

impl Default for ExpiryResolver {
    fn default() -> Self {
        Self::new(&[], default_cutoff())
    }
}

/// NSE close, the default same-day expiry cutoff.
#[must_use]
pub fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default()
}

impl ExpiryResolver {
    /// Build a resolver with the configured holiday calendar and cutoff.
    #[allow(clippy::expect_used)] // offset is a compile-time constant
    #[must_use]
    pub fn new(holidays: &[NaiveDate], cutoff: NaiveTime) -> Self {
        Self {
            holidays: holidays.iter().copied().collect(),
            cutoff,
            exchange_offset: FixedOffset::east_opt(IST_SECS).expect("IST offset is valid"),
        }
    }

    /// Resolve the expiry to trade.
    ///
    /// An explicit hint wins iff it is listed and unexpired. Otherwise the
    /// calendar rule produces the nearest unexpired candidate, which must be
    /// covered by the listed series.
    ///
    /// # Errors
    ///
    /// Returns [`NoValidExpiry`] when the listed series does not cover the
    /// computed date. Terminal for the alert; never retried.
    pub fn resolve(
        &self,
        rule: ExpiryRule,
        listed: &[NaiveDate],
        reference: DateTime<Utc>,
        hint: Option<NaiveDate>,
    ) -> Result<NaiveDate, NoValidExpiry> {
        let local = reference.with_timezone(&self.exchange_offset);
        let today = local.date_naive();
        let after_cutoff = local.time() >= self.cutoff;

        let expired = |d: NaiveDate| d < today || (d == today && after_cutoff);

        if let Some(h) = hint {
            if listed.contains(&h) && !expired(h) {
                return Ok(h);
            }
        }

        let computed = self.compute(rule, today, &expired);
        if listed.contains(&computed) {
            Ok(computed)
        } else {
            Err(NoValidExpiry { computed })
        }
    }

    /// Nearest unexpired rule-date, holiday-adjusted. Bounded forward scan
    /// so a pathological holiday calendar cannot loop forever.
    fn compute(&self, rule: ExpiryRule, today: NaiveDate, expired: &dyn Fn(NaiveDate) -> bool) -> NaiveDate {
        let mut base = match rule {
            ExpiryRule::WeeklyThursday => next_weekday(today, Weekday::Thu),
            ExpiryRule::MonthlyLastThursday => {
                let this_month = last_weekday_of_month(today.year(), today.month(), Weekday::Thu);
                if this_month >= today {
                    this_month
                } else {
                    let (y, m) = next_month(today.year(), today.month());
                    last_weekday_of_month(y, m, Weekday::Thu)
                }
            }
        };

        for _ in 0..52 {
            let adjusted = self.adjust_backward(base);
            if !expired(adjusted) {
                return adjusted;
            }
            base = match rule {
                ExpiryRule::WeeklyThursday => base + Duration::days(7),
                ExpiryRule::MonthlyLastThursday => {
                    let (y, m) = next_month(base.year(), base.month());
                    last_weekday_of_month(y, m, Weekday::Thu)
                }
            };
        }
        base
    }

    /// Shift backward over holidays and weekends, exchange convention for
    /// expiry days falling on a trading holiday.
    fn adjust_backward(&self, mut date: NaiveDate) -> NaiveDate {
        while self.holidays.contains(&date) || date.weekday() == Weekday::Sat || date.weekday() == Weekday::Sun {
            date -= Duration::days(1);
        }
        date
    }
}

fn next_weekday(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - from.weekday().num_days_from_monday() as i64)
        % 7;
    from + Duration::days(ahead)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let (ny, nm) = next_month(year, month);
    let mut date = NaiveDate::from_ymd_opt(ny, nm, 1).unwrap_or(NaiveDate::MAX) - Duration::days(1);
    while date.weekday() != weekday {
        date -= Duration::days(1);
    }
    date
}

const fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}
