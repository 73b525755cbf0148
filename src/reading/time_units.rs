//! CF time axis conversion (`<unit> since <reference>`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    seconds_per_step: f64,
    reference: NaiveDateTime,
}

impl TimeAxis {
    pub fn parse(units: &str) -> Result<Self, String> {
        let (unit, reference) = units
            .trim()
            .split_once(" since ")
            .ok_or_else(|| format!("time units `{}` are not of the form `<unit> since <date>`", units))?;

        let seconds_per_step = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            other => return Err(format!("unsupported time unit `{}`", other)),
        };

        let reference = parse_reference(reference.trim())
            .ok_or_else(|| format!("unparseable reference time `{}`", reference.trim()))?;

        Ok(TimeAxis {
            seconds_per_step,
            reference,
        })
    }

    pub fn to_datetime(&self, value: f64) -> Option<DateTime<Utc>> {
        if !value.is_finite() {
            return None;
        }

        let millis = (value * self.seconds_per_step * 1000.0).round();
        let delta = TimeDelta::try_milliseconds(millis as i64)?;

        self.reference
            .checked_add_signed(delta)
            .map(|dt| dt.and_utc())
    }
}

/// `hours since 1900-01-01 00:00:00`, the ERA5 convention.
impl Default for TimeAxis {
    fn default() -> Self {
        TimeAxis {
            seconds_per_step: 3600.0,
            reference: NaiveDate::from_ymd_opt(1900, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        }
    }
}

fn parse_reference(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim_end_matches(" UTC").trim_end_matches('Z');

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// -- Tests -------------------------------------------------------------------
