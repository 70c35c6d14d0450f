use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use time::macros::format_description;
use time::{Duration, PrimitiveDateTime};

/// Clearing timelines in hours, indexed by priority - 1.
pub const TIMELINE_HOURS: [i64; 3] = [12, 18, 36];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityLevel {
    pub number: u8,
    pub timeline: String,
    pub timeline_hours: i64,
    pub deadline: String,
}

/// Clearing deadlines of every priority after a storm, keyed `"1"`..`"3"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PrioritySchedule(BTreeMap<String, PriorityLevel>);

/// Parses a local wall-clock timestamp like `2025-02-03T07:00:00`.
pub fn parse_storm_end(raw: &str) -> Result<PrimitiveDateTime> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    Ok(PrimitiveDateTime::parse(raw.trim(), format)?)
}

impl PrioritySchedule {
    pub fn from_storm_end(end: PrimitiveDateTime) -> Result<Self> {
        let format = format_description!("[weekday repr:short] [hour repr:12 padding:none]:[minute] [period]");
        let mut levels = BTreeMap::new();
        for (i, hours) in TIMELINE_HOURS.iter().enumerate() {
            let number = i as u8 + 1;
            let deadline = (end + Duration::hours(*hours)).format(format)?;
            levels.insert(
                number.to_string(),
                PriorityLevel {
                    number,
                    timeline: format!("{} hours", hours),
                    timeline_hours: *hours,
                    deadline,
                },
            );
        }
        Ok(PrioritySchedule(levels))
    }

    pub fn get(&self, priority: u8) -> Option<&PriorityLevel> {
        self.0.get(&priority.to_string())
    }
}
