//! Optional age-based filtering of removal candidates.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};

/// Only resources created before the cutoff are removed.
///
/// Inactive by default: with no cutoff every resource passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeFilter {
    /// Resources must be older than this to be removed
    older_than: Option<DateTime<Utc>>,
    /// Resources must have been created before this date to be removed
    created_before: Option<DateTime<Utc>>,
}

impl AgeFilter {
    /// Build a filter from CLI arguments, relative to `now`
    pub fn from_args(
        older_than_str: Option<&str>,
        created_before_str: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let older_than = older_than_str
            .map(|duration_str| {
                let age = parse_duration(duration_str)?;
                now.checked_sub_signed(age)
                    .with_context(|| format!("Duration too large: {}", duration_str))
            })
            .transpose()?;
        let created_before = created_before_str.map(parse_date).transpose()?;

        Ok(AgeFilter {
            older_than,
            created_before,
        })
    }

    /// A filter with a single fixed cutoff.
    pub fn before(cutoff: DateTime<Utc>) -> Self {
        AgeFilter {
            older_than: Some(cutoff),
            created_before: None,
        }
    }

    /// True when a resource created at `created_at` is old enough to remove
    pub fn passes(&self, created_at: DateTime<Utc>) -> bool {
        self.cutoff().map_or(true, |cutoff| created_at < cutoff)
    }

    pub fn is_active(&self) -> bool {
        self.cutoff().is_some()
    }

    /// The effective cutoff: the earlier of the two bounds.
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        match (self.older_than, self.created_before) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Parse a date string in YYYY-MM-DD format as local midnight
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").with_context(|| {
        format!(
            "Invalid date format. Expected YYYY-MM-DD, got: {}",
            date_str
        )
    })?;

    let year = date.year();
    if !(1970..=2100).contains(&year) {
        anyhow::bail!("Year must be between 1970 and 2100, got: {}", year);
    }

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Failed to create midnight time")?;
    let local = Local
        .from_local_datetime(&midnight)
        .single()
        .context("Ambiguous or invalid local time")?;

    Ok(local.with_timezone(&Utc))
}

/// Parse an age with optional unit suffix: h (hours), d (days), w (weeks), m (30-day months).
/// A bare number means days. Examples: "15", "15d", "2w", "3m", "48h"
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim();

    let (num_str, unit) = match duration_str.find(|c: char| c.is_alphabetic()) {
        Some(pos) => {
            let (num, unit) = duration_str.split_at(pos);
            (num, Some(unit))
        }
        None => (duration_str, None),
    };

    let value: i64 = num_str.trim().parse().with_context(|| {
        format!(
            "Invalid duration format. Expected a number, got: {}",
            num_str
        )
    })?;
    if value < 0 {
        anyhow::bail!("Duration must not be negative, got: {}", value);
    }

    let hours = match unit.map(|u| u.to_ascii_lowercase()) {
        None => value * 24,
        Some(u) if u == "d" => value * 24,
        Some(u) if u == "h" => value,
        Some(u) if u == "w" => value * 7 * 24,
        Some(u) if u == "m" => value * 30 * 24,
        Some(unknown) => {
            anyhow::bail!(
                "Invalid duration unit '{}'. Supported units: h (hours), d (days), w (weeks), m (months)",
                unknown
            );
        }
    };

    Duration::try_hours(hours).with_context(|| format!("Duration too large: {}", duration_str))
}
