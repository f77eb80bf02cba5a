use std::sync::Mutex;

use chrono::NaiveDate;
use log::debug;

use crate::models::{
    CycleEntry, CycleHistory, DerivedMetrics, PhaseAggregation, Settings, DATE_KEY_FORMAT,
};
use crate::prediction;
use crate::storage::{self, KeyValueStore, StorageError};

const MIN_WINDOW_MONTHS: u32 = 1;
const MAX_WINDOW_MONTHS: u32 = 24;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid date: {0}")]
    InvalidDate(#[from] chrono::ParseError),
    #[error("tracker state lock poisoned")]
    LockPoisoned,
}

/// Host-side state: the loaded history and settings, written through to
/// the store on every change.
pub struct Tracker<S: KeyValueStore> {
    store: S,
    history: Mutex<CycleHistory>,
    settings: Mutex<Settings>,
}

impl<S: KeyValueStore> Tracker<S> {
    pub fn open(store: S) -> Result<Self, TrackerError> {
        let history = storage::load_history(&store)?;
        let settings = storage::load_settings(&store)?;
        Ok(Self {
            store,
            history: Mutex::new(history),
            settings: Mutex::new(settings),
        })
    }

    /// Insert or replace the entry for a `YYYY-MM-DD` date.
    pub fn log_day(&self, date: &str, entry: CycleEntry) -> Result<(), TrackerError> {
        let date = parse_date(date)?;
        let mut history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;

        let mut next = history.clone();
        next.upsert(date, entry);
        storage::save_history(&self.store, &next)?;
        *history = next;

        debug!("logged {date}");
        Ok(())
    }

    /// Remove the entry for a date. Returns whether one existed.
    pub fn clear_day(&self, date: &str) -> Result<bool, TrackerError> {
        let date = parse_date(date)?;
        let mut history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;

        if history.get(date).is_none() {
            return Ok(false);
        }
        let mut next = history.clone();
        next.remove(date);
        storage::save_history(&self.store, &next)?;
        *history = next;

        debug!("cleared {date}");
        Ok(true)
    }

    pub fn entry(&self, date: &str) -> Result<Option<CycleEntry>, TrackerError> {
        let date = parse_date(date)?;
        let history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;
        Ok(history.get(date).cloned())
    }

    /// Read-only copy of the current history.
    pub fn snapshot(&self) -> Result<CycleHistory, TrackerError> {
        let history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;
        Ok(history.clone())
    }

    pub fn settings(&self) -> Result<Settings, TrackerError> {
        let settings = self.settings.lock().map_err(|_| TrackerError::LockPoisoned)?;
        Ok(settings.clone())
    }

    pub fn update_settings(
        &self,
        insight_window_months: u32,
        phase_aggregation: PhaseAggregation,
    ) -> Result<Settings, TrackerError> {
        let mut settings = self.settings.lock().map_err(|_| TrackerError::LockPoisoned)?;
        let next = Settings {
            insight_window_months: insight_window_months
                .clamp(MIN_WINDOW_MONTHS, MAX_WINDOW_MONTHS),
            phase_aggregation,
        };
        storage::save_settings(&self.store, &next)?;
        *settings = next.clone();
        Ok(next)
    }

    /// Averages and predictions use the whole history; the phase breakdown
    /// only covers the trailing insight window ending at `today`.
    pub fn metrics(&self, today: NaiveDate) -> Result<DerivedMetrics, TrackerError> {
        let history = self.snapshot()?;
        let settings = self.settings()?;

        let window = history.trailing_months(today, settings.insight_window_months);
        Ok(prediction::derive_metrics_windowed(
            &history,
            &window,
            settings.phase_aggregation,
        ))
    }

    /// Pretty-printed JSON of the stored history blob.
    pub fn export_data(&self) -> Result<String, TrackerError> {
        let history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;
        serde_json::to_string_pretty(&*history)
            .map_err(|e| TrackerError::Storage(StorageError::Serialization(e)))
    }

    /// Delete all stored data and reset to an empty history.
    pub fn wipe_all_data(&self) -> Result<(), TrackerError> {
        let mut history = self.history.lock().map_err(|_| TrackerError::LockPoisoned)?;
        let mut settings = self.settings.lock().map_err(|_| TrackerError::LockPoisoned)?;
        storage::wipe(&self.store)?;
        *history = CycleHistory::new();
        *settings = Settings::default();
        Ok(())
    }
}

fn parse_date(date: &str) -> Result<NaiveDate, TrackerError> {
    Ok(NaiveDate::parse_from_str(date, DATE_KEY_FORMAT)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Flow, Pain, Phase, Spotting};
    use crate::storage::{FileStore, MemoryStore, HISTORY_KEY};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_KEY_FORMAT).unwrap()
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn log_day_upserts_by_date() {
        let tracker = Tracker::open(MemoryStore::new()).unwrap();
        tracker
            .log_day(
                "2024-04-01",
                CycleEntry {
                    flow: Some(Flow::Light),
                    ..Default::default()
                },
            )
            .unwrap();
        tracker
            .log_day(
                "2024-04-01",
                CycleEntry {
                    flow: Some(Flow::Heavy),
                    pain: Some(Pain::Mild),
                    spotting: Some(Spotting::Yes),
                    ..Default::default()
                },
            )
            .unwrap();

        let entry = tracker.entry("2024-04-01").unwrap().unwrap();
        assert_eq!(entry.flow, Some(Flow::Heavy));
        assert_eq!(entry.pain, Some(Pain::Mild));
        assert_eq!(tracker.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn rejects_malformed_dates() {
        let tracker = Tracker::open(MemoryStore::new()).unwrap();
        let err = tracker.log_day("04/01/2024", CycleEntry::default()).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidDate(_)));
    }

    #[test]
    fn clear_day_reports_whether_entry_existed() {
        let tracker = Tracker::open(MemoryStore::new()).unwrap();
        tracker.log_day("2024-04-01", CycleEntry::default()).unwrap();

        assert!(tracker.clear_day("2024-04-01").unwrap());
        assert!(!tracker.clear_day("2024-04-01").unwrap());
        assert!(tracker.snapshot().unwrap().is_empty());
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let tracker = Tracker::open(ReadOnlyStore).unwrap();
        assert!(tracker.log_day("2024-04-01", CycleEntry::default()).is_err());
        assert!(tracker.snapshot().unwrap().is_empty());
        assert!(tracker
            .update_settings(3, PhaseAggregation::Mean)
            .is_err());
        assert_eq!(tracker.settings().unwrap(), Settings::default());
    }

    #[test]
    fn reopening_restores_history_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = Tracker::open(FileStore::new(dir.path()).unwrap()).unwrap();
            tracker
                .log_day(
                    "2024-04-01",
                    CycleEntry {
                        cycle_length: Some(31),
                        ..Default::default()
                    },
                )
                .unwrap();
            tracker.update_settings(99, PhaseAggregation::Mean).unwrap();
        }

        let tracker = Tracker::open(FileStore::new(dir.path()).unwrap()).unwrap();
        assert_eq!(
            tracker.entry("2024-04-01").unwrap().unwrap().cycle_length,
            Some(31)
        );
        let settings = tracker.settings().unwrap();
        assert_eq!(settings.insight_window_months, MAX_WINDOW_MONTHS);
        assert_eq!(settings.phase_aggregation, PhaseAggregation::Mean);
    }

    #[test]
    fn opens_blob_written_by_host() {
        let store = MemoryStore::new();
        store
            .set(
                HISTORY_KEY,
                r#"{"2024-01-10": {"flow": "Medium", "cycleLength": 30}, "2024-01-11": null}"#,
            )
            .unwrap();

        let tracker = Tracker::open(store).unwrap();
        let metrics = tracker.metrics(date("2024-02-01")).unwrap();
        assert_eq!(metrics.entry_count, 1);
        assert_eq!(metrics.predicted_next_period_date, Some(date("2024-02-09")));
        assert_eq!(metrics.predicted_ovulation_date, Some(date("2024-01-26")));
        assert_eq!(metrics.next_period_label, "Feb 9, 2024");
        assert_eq!(metrics.latest_flow_label(), "Medium");
        assert_eq!(metrics.latest_pain_label(), "Unknown");
    }

    #[test]
    fn phase_breakdown_limited_to_insight_window() {
        let tracker = Tracker::open(MemoryStore::new()).unwrap();
        tracker
            .log_day(
                "2023-01-01",
                CycleEntry {
                    cycle_length: Some(30),
                    ..Default::default()
                },
            )
            .unwrap();

        let metrics = tracker.metrics(date("2024-01-01")).unwrap();
        assert_eq!(metrics.phase_breakdown, None);
        assert_eq!(metrics.average_cycle_length, 30.0);

        let metrics = tracker.metrics(date("2023-03-01")).unwrap();
        let phases = metrics.phase_breakdown.unwrap();
        assert_eq!(phases.get(Phase::Luteal), 16);
    }

    #[test]
    fn export_and_wipe() {
        let tracker = Tracker::open(MemoryStore::new()).unwrap();
        tracker
            .log_day(
                "2024-04-01",
                CycleEntry {
                    feelings: Some("calm".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let exported: serde_json::Value =
            serde_json::from_str(&tracker.export_data().unwrap()).unwrap();
        assert_eq!(exported["2024-04-01"]["feelings"], "calm");

        tracker.wipe_all_data().unwrap();
        assert!(tracker.snapshot().unwrap().is_empty());
        assert_eq!(tracker.export_data().unwrap(), "{}");
    }
}
