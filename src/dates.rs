//! Expands a date range into the daily input file paths.
//!
//! ERA5 raw files are stored one per day, under `YYYY/MM/DD` directories
//! between a prefix and a suffix, e.g.
//! `gs://gcp-public-data-arco-era5/raw/date-variable-single_level/2022/01/01/total_precipitation/surface.nc`.

use chrono::{
    format::{Item, StrftimeItems},
    Days, NaiveDate,
};

use crate::error::{PipelineError, PipelineResult};

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> PipelineResult<Self> {
        if start > end {
            return Err(PipelineError::invalid_range(start, end));
        }

        Ok(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range, both ends included.
    pub fn len(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    /// Iterates the days in ascending order. Each call starts from the beginning.
    pub fn iter(&self) -> DaysIter {
        DaysIter {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl IntoIterator for &DateRange {
    type Item = NaiveDate;
    type IntoIter = DaysIter;

    fn into_iter(self) -> DaysIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct DaysIter {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for DaysIter {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        self.next = current
            .checked_add_days(Days::new(1))
            .filter(|d| *d <= self.end);

        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next {
            Some(d) => ((self.end - d).num_days() + 1) as usize,
            None => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DaysIter {}

/// One daily input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: String,
    pub date: NaiveDate,
}

/// A path containing `strftime` date tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    template: String,
}

impl PathTemplate {
    /// Builds the `{prefix}/%Y/%m/%d/{suffix}` layout used by the ERA5 archive.
    pub fn new(prefix: &str, suffix: &str) -> PipelineResult<Self> {
        let template = format!(
            "{}/%Y/%m/%d/{}",
            escape(prefix.trim_end_matches('/')),
            escape(suffix.trim_start_matches('/'))
        );

        Self::parse(&template)
    }

    /// Accepts an explicit template such as `data/%Y%m%d.nc`.
    pub fn parse(template: &str) -> PipelineResult<Self> {
        let items: Vec<Item> = StrftimeItems::new(template).collect();

        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(PipelineError::InvalidRange(format!(
                "template `{}` has an invalid date token",
                template
            )));
        }

        if !items
            .iter()
            .any(|item| matches!(item, Item::Numeric(..) | Item::Fixed(..)))
        {
            return Err(PipelineError::InvalidRange(format!(
                "template `{}` has no date placeholder",
                template
            )));
        }

        Ok(PathTemplate {
            template: template.to_string(),
        })
    }

    pub fn render(&self, date: NaiveDate) -> String {
        date.format(&self.template).to_string()
    }
}

// Literal `%` in a prefix or suffix must not be read as a date token.
fn escape(s: &str) -> String {
    s.replace('%', "%%")
}

/// Lazily produces one file reference per day of `range`, in date order.
pub fn expand<'a>(
    range: &DateRange,
    template: &'a PathTemplate,
) -> impl Iterator<Item = FileRef> + 'a {
    range.iter().map(move |date| FileRef {
        path: template.render(date),
        date,
    })
}

// -- Tests -------------------------------------------------------------------
