use chrono::{Duration, NaiveDate};
use log::{debug, warn};

use crate::models::{
    CycleEntry, CycleHistory, DerivedMetrics, PhaseAggregation, PhaseBreakdown,
    DEFAULT_CYCLE_LENGTH, LUTEAL_PHASE_DAYS,
};

/// Shown by display surfaces in place of a prediction when nothing is logged.
pub const NO_DATA_MESSAGE: &str = "No data available";

/// Mean of every explicitly recorded cycle length.
/// Entries without one are left out; with none recorded the result is 28.
pub fn average_cycle_length(history: &CycleHistory) -> f64 {
    let recorded: Vec<f64> = history
        .iter()
        .filter_map(|(_, entry)| entry.cycle_length)
        .map(f64::from)
        .collect();

    if recorded.is_empty() {
        return f64::from(DEFAULT_CYCLE_LENGTH);
    }
    mean(&recorded)
}

/// Latest logged date plus the average cycle length, truncated to whole days.
/// `None` for an empty history.
pub fn predict_next_period_date(history: &CycleHistory) -> Option<NaiveDate> {
    let (last_date, _) = history.latest()?;
    let offset = average_cycle_length(history).trunc() as i64;
    offset_or_default(last_date, offset, i64::from(DEFAULT_CYCLE_LENGTH))
}

/// Ovulation estimated 14 days before the next period, measured from the
/// latest entry and that entry's own cycle length.
pub fn predict_ovulation_date(history: &CycleHistory) -> Option<NaiveDate> {
    let (last_date, entry) = history.latest()?;
    let luteal = i64::from(LUTEAL_PHASE_DAYS);
    let offset = i64::from(entry.cycle_length_or_default()) - luteal;
    offset_or_default(last_date, offset, i64::from(DEFAULT_CYCLE_LENGTH) - luteal)
}

/// `date + offset`, or `date + fallback` when the offset leaves the calendar range.
fn offset_or_default(date: NaiveDate, offset: i64, fallback: i64) -> Option<NaiveDate> {
    Duration::try_days(offset)
        .and_then(|d| date.checked_add_signed(d))
        .or_else(|| {
            warn!("cycle offset of {offset} days from {date} is out of range, using {fallback}");
            date.checked_add_signed(Duration::days(fallback))
        })
}

/// Phase durations of the latest entry. `None` for an empty history.
pub fn compute_phase_breakdown(history: &CycleHistory) -> Option<PhaseBreakdown> {
    compute_phase_breakdown_with(history, PhaseAggregation::LatestEntry)
}

pub fn compute_phase_breakdown_with(
    history: &CycleHistory,
    aggregation: PhaseAggregation,
) -> Option<PhaseBreakdown> {
    let mut per_entry = history.iter().map(|(date, entry)| {
        if !entry.is_consistent() {
            warn!("entry for {date} has phase lengths that do not fit its cycle");
        }
        entry_phases(entry)
    });

    match aggregation {
        PhaseAggregation::LatestEntry => per_entry.next_back(),
        PhaseAggregation::Mean => {
            let all: Vec<PhaseBreakdown> = per_entry.collect();
            if all.is_empty() {
                return None;
            }
            let avg = |field: fn(&PhaseBreakdown) -> u32| -> u32 {
                let values: Vec<f64> = all.iter().map(|b| f64::from(field(b))).collect();
                mean(&values).round() as u32
            };
            Some(PhaseBreakdown {
                menstruation: avg(|b| b.menstruation),
                proliferative: avg(|b| b.proliferative),
                follicular: avg(|b| b.follicular),
                ovulation: avg(|b| b.ovulation),
                secretory: avg(|b| b.secretory),
                luteal: avg(|b| b.luteal),
            })
        }
    }
}

fn entry_phases(entry: &CycleEntry) -> PhaseBreakdown {
    let cycle = entry.cycle_length_or_default();
    let ovulation_day = entry.ovulation_day_or_default();
    let menstruation = entry.menstruation_duration_or_default();

    PhaseBreakdown {
        menstruation,
        proliferative: ovulation_day.saturating_sub(menstruation),
        follicular: ovulation_day,
        ovulation: 1,
        secretory: cycle.saturating_sub(ovulation_day),
        luteal: cycle.saturating_sub(ovulation_day),
    }
}

/// Compute every metric from one snapshot.
pub fn derive_metrics(history: &CycleHistory, aggregation: PhaseAggregation) -> DerivedMetrics {
    derive_metrics_windowed(history, history, aggregation)
}

/// Like [`derive_metrics`], but the phase breakdown is taken from
/// `phase_history` (usually a trailing window of `history`).
pub fn derive_metrics_windowed(
    history: &CycleHistory,
    phase_history: &CycleHistory,
    aggregation: PhaseAggregation,
) -> DerivedMetrics {
    let latest = history.latest().map(|(_, entry)| entry);
    let predicted_next_period_date = predict_next_period_date(history);
    let metrics = DerivedMetrics {
        entry_count: history.len(),
        average_cycle_length: average_cycle_length(history),
        predicted_next_period_date,
        predicted_ovulation_date: predict_ovulation_date(history),
        phase_breakdown: compute_phase_breakdown_with(phase_history, aggregation),
        next_period_label: prediction_label(predicted_next_period_date),
        latest_flow: latest.and_then(|e| e.flow),
        latest_pain: latest.and_then(|e| e.pain),
    };
    debug!(
        "derived metrics over {} entries: avg cycle {:.1} days",
        metrics.entry_count, metrics.average_cycle_length
    );
    metrics
}

/// "Jan 5, 2025"
pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

/// Display label for an optional prediction.
pub fn prediction_label(date: Option<NaiveDate>) -> String {
    date.map(format_display_date)
        .unwrap_or_else(|| NO_DATA_MESSAGE.to_string())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
