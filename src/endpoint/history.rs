use std::{
    fmt,
    time::{Duration, SystemTime},
};

use crate::unit::UnitId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
    Upload,
    Download,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Canceled,
}

/// One finished attempt to move one unit. Entries never change once
/// recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLogEntry {
    direction: Direction,
    unit_id: UnitId,
    label: String,
    outcome: Outcome,
    bytes: u64,
    duration: Duration,
    timestamp: SystemTime,
}

impl TransferLogEntry {
    pub fn new(
        direction: Direction,
        unit_id: UnitId,
        label: impl Into<String>,
        outcome: Outcome,
        bytes: u64,
        duration: Duration,
    ) -> Self {
        Self {
            direction,
            unit_id,
            label: label.into(),
            outcome,
            bytes,
            duration,
            timestamp: SystemTime::now(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl fmt::Display for TransferLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {:?} ({} bytes in {} ms)",
            self.direction,
            self.label,
            self.outcome,
            self.bytes,
            self.duration.as_millis()
        )
    }
}

/// Append-only record of an endpoint's transfers.
#[derive(Debug, Default)]
pub struct TransferLog {
    entries: Vec<TransferLogEntry>,
}

impl TransferLog {
    pub fn append(&mut self, entry: TransferLogEntry) {
        log::info!("transfer: {}", entry);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TransferLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TransferLogEntry> {
        self.entries.iter().filter(|e| !e.is_success())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn log_keeps_entries_in_order() {
        let mut log = TransferLog::default();
        let first = Uuid::new_v4();
        log.append(TransferLogEntry::new(
            Direction::Upload,
            first,
            "b/1.txt",
            Outcome::Success,
            10,
            Duration::from_millis(5),
        ));
        log.append(TransferLogEntry::new(
            Direction::Upload,
            Uuid::new_v4(),
            "b/2.txt",
            Outcome::Failure,
            0,
            Duration::from_millis(7),
        ));

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].unit_id(), first);
        assert_eq!(log.failures().count(), 1);
        assert!(log.entries()[0].timestamp() <= log.entries()[1].timestamp());
    }
}
