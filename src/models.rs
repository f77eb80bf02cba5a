use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_CYCLE_LENGTH: u32 = 28;
pub const DEFAULT_OVULATION_DAY: u32 = 14;
pub const DEFAULT_MENSTRUATION_DURATION: u32 = 5;
/// Ovulation is modelled this many days before the next period starts.
pub const LUTEAL_PHASE_DAYS: u32 = 14;
pub const DEFAULT_INSIGHT_WINDOW_MONTHS: u32 = 6;
/// Longest day count accepted from stored data; larger values count as unset.
pub const MAX_RECORDED_DAYS: u32 = 365;
/// Shown in place of an unset flow or pain level.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Format of history keys in the stored JSON blob.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Flow {
    Light,
    Medium,
    Heavy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Pain {
    None,
    Mild,
    Severe,
}

impl Flow {
    pub fn label(self) -> &'static str {
        match self {
            Flow::Light => "Light",
            Flow::Medium => "Medium",
            Flow::Heavy => "Heavy",
        }
    }
}

impl Pain {
    pub fn label(self) -> &'static str {
        match self {
            Pain::None => "None",
            Pain::Mild => "Mild",
            Pain::Severe => "Severe",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Spotting {
    Yes,
    No,
}

/// One logged calendar day. The date itself is the key in [`CycleHistory`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleEntry {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_choice"
    )]
    pub flow: Option<Flow>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_choice"
    )]
    pub pain: Option<Pain>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_choice"
    )]
    pub spotting: Option<Spotting>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub feelings: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_days"
    )]
    pub cycle_length: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_days"
    )]
    pub ovulation_day: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_days"
    )]
    pub menstruation_duration: Option<u32>,
}

impl CycleEntry {
    pub fn cycle_length_or_default(&self) -> u32 {
        self.cycle_length.unwrap_or(DEFAULT_CYCLE_LENGTH)
    }

    pub fn ovulation_day_or_default(&self) -> u32 {
        self.ovulation_day.unwrap_or(DEFAULT_OVULATION_DAY)
    }

    pub fn menstruation_duration_or_default(&self) -> u32 {
        self.menstruation_duration
            .unwrap_or(DEFAULT_MENSTRUATION_DURATION)
    }

    /// True when the defaulted ovulation day and menstruation duration both
    /// fit inside the defaulted cycle length, and bleeding ends by ovulation.
    pub fn is_consistent(&self) -> bool {
        let cycle = self.cycle_length_or_default();
        let ovulation = self.ovulation_day_or_default();
        let menstruation = self.menstruation_duration_or_default();
        ovulation < cycle && menstruation < cycle && menstruation <= ovulation
    }
}

/// Accepts whole day counts in `1..=MAX_RECORDED_DAYS` as numbers or numeric
/// strings. Anything else (including 0) counts as "not recorded".
fn lenient_days<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let days = match &value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match days.and_then(|d| u32::try_from(d).ok()) {
        Some(0) => Ok(None),
        Some(d) if d <= MAX_RECORDED_DAYS => Ok(Some(d)),
        _ => {
            warn!("ignoring malformed day count {value}");
            Ok(None)
        }
    }
}

/// Decodes a categorical label, treating empty or unknown labels as unset.
fn lenient_choice<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        _ => match serde_json::from_value::<T>(value.clone()) {
            Ok(choice) => Ok(Some(choice)),
            Err(_) => {
                warn!("ignoring unknown label {value}");
                Ok(None)
            }
        },
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(Some(s)),
        Value::Null | Value::String(_) => Ok(None),
        other => {
            warn!("ignoring non-text feelings value {other}");
            Ok(None)
        }
    }
}

/// Logged entries keyed by date, iterated in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CycleHistory {
    entries: BTreeMap<NaiveDate, CycleEntry>,
}

impl CycleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&CycleEntry> {
        self.entries.get(&date)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (NaiveDate, &CycleEntry)> + '_ {
        self.entries.iter().map(|(date, entry)| (*date, entry))
    }

    /// The chronologically latest entry.
    pub fn latest(&self) -> Option<(NaiveDate, &CycleEntry)> {
        self.iter().next_back()
    }

    /// Insert or replace the entry for `date`, returning the previous one.
    pub fn upsert(&mut self, date: NaiveDate, entry: CycleEntry) -> Option<CycleEntry> {
        self.entries.insert(date, entry)
    }

    pub fn remove(&mut self, date: NaiveDate) -> Option<CycleEntry> {
        self.entries.remove(&date)
    }

    /// Entries dated on or after `cutoff`.
    pub fn since(&self, cutoff: NaiveDate) -> CycleHistory {
        Self {
            entries: self
                .entries
                .range(cutoff..)
                .map(|(date, entry)| (*date, entry.clone()))
                .collect(),
        }
    }

    /// Entries within the `months` calendar months leading up to `today`.
    pub fn trailing_months(&self, today: NaiveDate, months: u32) -> CycleHistory {
        let cutoff = today
            .checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDate::MIN);
        self.since(cutoff)
    }
}

impl FromIterator<(NaiveDate, CycleEntry)> for CycleHistory {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, CycleEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for CycleHistory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut entries = BTreeMap::new();

        for (key, value) in raw {
            let Ok(date) = NaiveDate::parse_from_str(&key, DATE_KEY_FORMAT) else {
                warn!("skipping history entry with unparseable date key {key:?}");
                continue;
            };
            // null marks a deleted day
            if value.is_null() {
                continue;
            }
            match serde_json::from_value::<CycleEntry>(value) {
                Ok(entry) => {
                    entries.insert(date, entry);
                }
                Err(err) => warn!("skipping malformed entry for {key}: {err}"),
            }
        }

        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Menstruation,
    Proliferative,
    Follicular,
    Ovulation,
    Secretory,
    Luteal,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Menstruation,
        Phase::Proliferative,
        Phase::Follicular,
        Phase::Ovulation,
        Phase::Secretory,
        Phase::Luteal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Menstruation => "Menstruation",
            Phase::Proliferative => "Proliferative",
            Phase::Follicular => "Follicular",
            Phase::Ovulation => "Ovulation",
            Phase::Secretory => "Secretory",
            Phase::Luteal => "Luteal",
        }
    }

    /// Short explanation shown next to the phase chart.
    pub fn definition(self) -> &'static str {
        match self {
            Phase::Menstruation => "The uterine lining sheds, which results in bleeding.",
            Phase::Proliferative => {
                "The uterine lining thickens in preparation for a potential pregnancy."
            }
            Phase::Follicular => "Follicles in the ovaries mature ahead of ovulation.",
            Phase::Ovulation => "A mature egg is released from the ovary.",
            Phase::Secretory => {
                "After ovulation the uterine lining keeps preparing for implantation."
            }
            Phase::Luteal => "After ovulation the body prepares for a possible pregnancy.",
        }
    }
}

/// Whole-day duration of each cycle phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseBreakdown {
    pub menstruation: u32,
    pub proliferative: u32,
    pub follicular: u32,
    pub ovulation: u32,
    pub secretory: u32,
    pub luteal: u32,
}

impl PhaseBreakdown {
    pub fn get(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Menstruation => self.menstruation,
            Phase::Proliferative => self.proliferative,
            Phase::Follicular => self.follicular,
            Phase::Ovulation => self.ovulation,
            Phase::Secretory => self.secretory,
            Phase::Luteal => self.luteal,
        }
    }

    /// (phase, days) pairs in chart order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, u32)> + '_ {
        Phase::ALL.into_iter().map(|phase| (phase, self.get(phase)))
    }
}

/// How phase durations are combined when the history holds several entries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAggregation {
    /// The chronologically latest entry decides every phase.
    #[default]
    LatestEntry,
    /// Per-phase mean over all entries, rounded to whole days.
    Mean,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub insight_window_months: u32,
    pub phase_aggregation: PhaseAggregation,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            insight_window_months: DEFAULT_INSIGHT_WINDOW_MONTHS,
            phase_aggregation: PhaseAggregation::default(),
        }
    }
}

/// Metrics handed to display surfaces. Recomputed from a history snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedMetrics {
    pub entry_count: usize,
    pub average_cycle_length: f64,
    pub predicted_next_period_date: Option<NaiveDate>,
    pub predicted_ovulation_date: Option<NaiveDate>,
    pub phase_breakdown: Option<PhaseBreakdown>,
    /// "Jan 5, 2025", or the no-data message for an empty history.
    pub next_period_label: String,
    pub latest_flow: Option<Flow>,
    pub latest_pain: Option<Pain>,
}

impl DerivedMetrics {
    pub fn latest_flow_label(&self) -> &'static str {
        self.latest_flow.map_or(UNKNOWN_LABEL, Flow::label)
    }

    pub fn latest_pain_label(&self) -> &'static str {
        self.latest_pain.map_or(UNKNOWN_LABEL, Pain::label)
    }
}
