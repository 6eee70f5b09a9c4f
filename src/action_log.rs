use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Warning,
    Info,
    InProgress,
    Timeout,
}

/// One executed workflow step. Records are never modified after they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action_name: String,
    pub status: ActionStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ActionRecord {
    pub fn new(action_name: impl Into<String>, status: ActionStatus, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action_name: action_name.into(),
            status,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Append-only, bounded history of a session's steps.
///
/// Once `capacity` is reached the oldest record is evicted for every new one.
/// Timestamps never go backwards: a record stamped earlier than its
/// predecessor (wall clock adjustment) is clamped to the predecessor's time.
#[derive(Debug, Clone)]
pub struct ActionLog {
    records: VecDeque<ActionRecord>,
    capacity: usize,
    evicted: u64,
}

impl ActionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            evicted: 0,
        }
    }

    pub fn append(&mut self, mut record: ActionRecord) {
        if let Some(last) = self.records.back()
            && record.timestamp < last.timestamp
        {
            record.timestamp = last.timestamp;
        }

        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.evicted += 1;
        }

        tracing::debug!(
            action = %record.action_name,
            status = ?record.status,
            "{}",
            record.message
        );
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records dropped by the retention bound so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn last(&self) -> Option<&ActionRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter()
    }

    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.records.iter().cloned().collect()
    }

    /// Position marker: total number of records ever appended.
    pub fn mark(&self) -> u64 {
        self.evicted + self.records.len() as u64
    }

    /// Records appended since `mark`, minus any already evicted.
    pub fn since(&self, mark: u64) -> Vec<ActionRecord> {
        let new = self.mark().saturating_sub(mark) as usize;
        let skip = self.records.len().saturating_sub(new);
        self.records.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_append_preserves_order() {
        let mut log = ActionLog::new(10);
        log.append(ActionRecord::new("navigate", ActionStatus::Success, "a"));
        log.append(ActionRecord::new("extract", ActionStatus::Failed, "b"));

        let names: Vec<_> = log.iter().map(|r| r.action_name.as_str()).collect();
        assert_eq!(names, vec!["navigate", "extract"]);
        assert_eq!(log.last().unwrap().status, ActionStatus::Failed);
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let mut log = ActionLog::new(3);
        for i in 0..5 {
            log.append(ActionRecord::new(format!("step{}", i), ActionStatus::Info, ""));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted(), 2);
        let names: Vec<_> = log.iter().map(|r| r.action_name.clone()).collect();
        assert_eq!(names, vec!["step2", "step3", "step4"]);
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut log = ActionLog::new(10);
        let first = ActionRecord::new("navigate", ActionStatus::Success, "");
        let first_ts = first.timestamp;
        log.append(first);

        let mut skewed = ActionRecord::new("click", ActionStatus::Success, "");
        skewed.timestamp = first_ts - Duration::seconds(30);
        log.append(skewed);

        let records = log.snapshot();
        assert!(records[1].timestamp >= records[0].timestamp);
        assert_eq!(records[1].action_name, "click");
    }

    #[test]
    fn test_since_mark_survives_eviction() {
        let mut log = ActionLog::new(4);
        log.append(ActionRecord::new("old", ActionStatus::Info, ""));
        log.append(ActionRecord::new("old", ActionStatus::Info, ""));
        let mark = log.mark();
        for i in 0..3 {
            log.append(ActionRecord::new(format!("new{}", i), ActionStatus::Info, ""));
        }

        let recent = log.since(mark);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].action_name, "new0");

        for i in 3..6 {
            log.append(ActionRecord::new(format!("new{}", i), ActionStatus::Info, ""));
        }
        assert_eq!(log.since(mark).len(), 4);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut log = ActionLog::new(0);
        log.append(ActionRecord::new("a", ActionStatus::Info, ""));
        log.append(ActionRecord::new("b", ActionStatus::Info, ""));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot()[0].action_name, "b");
    }

    #[test]
    fn test_record_serialization() {
        let record = ActionRecord::new("navigate", ActionStatus::InProgress, "Navigating")
            .with_detail("url", "https://example.com");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["details"]["url"], "https://example.com");
    }
}
