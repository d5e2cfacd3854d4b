//! Input rules applied by the control surface before a batch is submitted.
//!
//! A batch arrives as free text: `;`-separated blocks, each a `,`-separated
//! argument list `name, topic[, param...]`.

use crate::error::{AutomationError, Result};
use crate::mapping::CategoryMap;
use crate::types::{RunSettings, WorkItem, PARAM_TOPIC};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::time::Duration;

/// Parse batch text into work items for `subject`.
///
/// Subjects with a category rule need one extra argument per rule parameter,
/// each checked against the rule's known values. Empty input gives an empty batch.
pub fn parse_batch(raw: &str, subject: &str, categories: &CategoryMap) -> Result<Vec<WorkItem>> {
    let rule = categories.rule_for(subject);
    let expected = 2 + rule.map(|r| r.params.len()).unwrap_or(0);

    let mut items = Vec::new();
    for block in raw.split(';').map(str::trim).filter(|b| !b.is_empty()) {
        let args: Vec<&str> = block
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();

        if args.len() != expected {
            return Err(AutomationError::InvalidBatch(format!(
                "{} requires {} arguments per student, got {} in \"{}\"",
                subject,
                expected,
                args.len(),
                block
            )));
        }

        let mut item = WorkItem::new(args[0]).with_param(PARAM_TOPIC, args[1]);

        if let Some(rule) = rule {
            for (index, param) in rule.params.iter().enumerate() {
                let value = args[2 + index];
                let allowed = rule.allowed_values(index);
                if !allowed.contains(&value.to_lowercase()) {
                    return Err(AutomationError::InvalidBatch(format!(
                        "\"{}\" is not one of {}",
                        value,
                        allowed.into_iter().collect::<Vec<_>>().join(", ")
                    )));
                }
                item = item.with_param(param.as_str(), value);
            }
        }

        items.push(item);
    }

    Ok(items)
}

/// Combine a `YYYY-MM-DD` date and an `HH:MM` time.
pub fn parse_moment(date: &str, time: &str) -> Result<NaiveDateTime> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| AutomationError::InvalidBatch(format!("bad date '{}': {}", date, e)))?;
    let clock = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|e| AutomationError::InvalidBatch(format!("bad time '{}': {}", time, e)))?;
    Ok(day.and_time(clock))
}

/// Check the batch schedule against the local time `now`.
pub fn validate_settings(
    settings: &RunSettings,
    now: NaiveDateTime,
    min_start_lead: Duration,
) -> Result<()> {
    let start = parse_moment(&settings.start_date, &settings.start_time)?;
    let due = parse_moment(&settings.due_date, &settings.due_time)?;

    let lead = chrono::Duration::from_std(min_start_lead)
        .map_err(|e| AutomationError::Other(e.to_string()))?;
    if start < now + lead {
        return Err(AutomationError::InvalidBatch(format!(
            "Start time must be at least {} mins in future.",
            min_start_lead.as_secs() / 60
        )));
    }
    if due <= start {
        return Err(AutomationError::InvalidBatch(
            "Due date must be AFTER start date.".into(),
        ));
    }
    Ok(())
}
