//! Cron expressions
//!
//! Accepts the `cron` crate's six/seven-field syntax (with seconds) and
//! classic five-field Unix expressions, which get a `0` seconds field.
//! All times are UTC.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: ::cron::Schedule,
}

impl CronSchedule {
    /// Parse an expression
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let normalized = normalize(expression);
        let schedule =
            ::cron::Schedule::from_str(&normalized).map_err(|e| Error::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Expression as supplied
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

fn normalize(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}
