//! Free-time aggregation across several accounts over the coming weekdays.
//!
//! One bulk accessibility fetch covers every account and the whole horizon.
//! Busy records are normalized once (offset-corrected), then for each day
//! clipped to the working window, merged across accounts, and inverted into
//! free slots. The interval algebra is pure and independent of the gateway.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde_json::Value;

use crate::config::Config;
use crate::gateway::{AccessibilityMap, AccessibilitySlot, CalendarGateway, GatewayError};
use crate::types::{AccountId, BusyInterval, DayAvailability, FreeSlot, Interval};

/// Short weekday labels, Monday first.
pub const DAY_NAMES: [&str; 7] = ["Пн", "Вт", "Ср", "Чт", "Пт", "Сб", "Вс"];

/// Timestamp shapes the gateway is known to emit. Any embedded offset is dropped.
const GATEWAY_FORMATS: &[&str] = &["%d.%m.%Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("Cannot parse gateway datetime: {0:?}")]
    Datetime(String),
    #[error("Cannot parse offset: {0}")]
    Offset(Value),
}

/// Working window, horizon and minimum bookable length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkdayPolicy {
    pub start_hour: u32,
    pub end_hour: u32,
    pub horizon_days: usize,
    pub min_slot: Duration,
}

impl Default for WorkdayPolicy {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 19,
            horizon_days: 5,
            min_slot: Duration::minutes(30),
        }
    }
}

impl WorkdayPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_hour: config.workday_start_hour,
            end_hour: config.workday_end_hour,
            horizon_days: config.horizon_days,
            min_slot: Duration::minutes(config.min_slot_minutes),
        }
    }

    /// Working window of a day. Hours are offsets from midnight so that 24 is allowed.
    pub fn window(&self, date: NaiveDate) -> Interval {
        let midnight = date.and_time(chrono::NaiveTime::default());
        Interval {
            start: midnight + Duration::hours(i64::from(self.start_hour)),
            end: midnight + Duration::hours(i64::from(self.end_hour)),
        }
    }
}

/// The next `count` weekdays starting at `from` (inclusive), skipping Saturday and Sunday.
pub fn working_days(from: NaiveDate, count: usize) -> Vec<NaiveDate> {
    from.iter_days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .take(count)
        .collect()
}

pub fn parse_gateway_datetime(raw: &str) -> Result<NaiveDateTime, SlotError> {
    let raw = raw.trim();
    for fmt in GATEWAY_FORMATS {
        if fmt.ends_with("%z") {
            if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
                return Ok(dt.naive_local());
            }
        } else if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    Err(SlotError::Datetime(raw.to_string()))
}

/// Offsets arrive as integers, whole-number floats, numeric strings, or not at all.
fn parse_offset(value: &Value) -> Result<i64, SlotError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| SlotError::Offset(value.clone())),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s.trim().parse().map_err(|_| SlotError::Offset(value.clone())),
        _ => Err(SlotError::Offset(value.clone())),
    }
}

/// Convert a busy record into the reference time zone.
///
/// The gateway reports local wall-clock times plus the owner's raw UTC offset
/// in seconds; subtracting it gives the reference time. The offset is not
/// adjusted for daylight-saving transitions. Returns `Ok(None)` for records
/// that are free or collapse to an empty range.
pub fn normalize_slot(slot: &AccessibilitySlot) -> Result<Option<Interval>, SlotError> {
    if !slot.is_busy() {
        return Ok(None);
    }
    let start = parse_gateway_datetime(&slot.date_from)?
        - Duration::seconds(parse_offset(&slot.offset_from)?);
    let end = parse_gateway_datetime(&slot.date_to)?
        - Duration::seconds(parse_offset(&slot.offset_to)?);
    Ok(Interval::new(start, end))
}

/// Intersect with the window; `None` when they do not overlap.
pub fn clip_to_window(interval: Interval, window: Interval) -> Option<Interval> {
    if interval.end <= window.start || interval.start >= window.end {
        return None;
    }
    Interval::new(
        interval.start.max(window.start),
        interval.end.min(window.end),
    )
}

/// Sort by start and fold overlapping or touching intervals into runs.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by_key(|iv| iv.start);
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match merged.last_mut() {
            Some(run) if iv.start <= run.end => run.end = run.end.max(iv.end),
            _ => merged.push(iv),
        }
    }
    merged
}

/// Every uncovered stretch of the window, of any length.
///
/// `merged` must be sorted, non-overlapping and inside the window.
pub fn gaps(merged: &[Interval], window: Interval) -> Vec<Interval> {
    let mut out = Vec::new();
    let mut cursor = window.start;
    for run in merged {
        if cursor < run.start {
            out.push(Interval {
                start: cursor,
                end: run.start,
            });
        }
        cursor = cursor.max(run.end);
    }
    if cursor < window.end {
        out.push(Interval {
            start: cursor,
            end: window.end,
        });
    }
    out
}

/// Gaps of at least `min_slot`.
pub fn free_slots(merged: &[Interval], window: Interval, min_slot: Duration) -> Vec<FreeSlot> {
    gaps(merged, window)
        .into_iter()
        .filter(|gap| gap.duration() >= min_slot)
        .map(|gap| FreeSlot {
            start: gap.start,
            end: gap.end,
        })
        .collect()
}

/// Normalize every account's records once, skipping malformed ones.
pub fn collect_busy(accessibility: &AccessibilityMap, ids: &[AccountId]) -> Vec<BusyInterval> {
    let mut busy = Vec::new();
    for id in ids {
        let Some(slots) = accessibility.get(id) else {
            continue;
        };
        for slot in slots {
            match normalize_slot(slot) {
                Ok(Some(interval)) => busy.push(BusyInterval {
                    account_id: *id,
                    interval,
                }),
                Ok(None) => {}
                Err(e) => log::warn!("Skip slot parse error: {} | {:?}", e, slot),
            }
        }
    }
    busy
}

/// Free slots of one day given everyone's busy intervals.
pub fn day_availability(
    date: NaiveDate,
    policy: &WorkdayPolicy,
    busy: &[BusyInterval],
) -> DayAvailability {
    let window = policy.window(date);
    let clipped: Vec<Interval> = busy
        .iter()
        .filter_map(|b| clip_to_window(b.interval, window))
        .collect();
    let merged = merge_intervals(clipped);
    DayAvailability {
        date,
        window,
        free: free_slots(&merged, window, policy.min_slot),
    }
}

/// Display lines for one day: a label, then one line per slot.
pub fn format_day(day: &DayAvailability) -> Vec<String> {
    let label = format!(
        "{}, {}:",
        DAY_NAMES[day.date.weekday().num_days_from_monday() as usize],
        day.date.format("%d.%m")
    );
    let mut lines = vec![label];
    if day.free.is_empty() {
        lines.push("  нет свободных слотов".to_string());
        return lines;
    }
    for slot in &day.free {
        let suffix = if day.is_all_day(slot) { " (весь день)" } else { "" };
        lines.push(format!(
            "  {}–{}{}",
            slot.start.format("%H:%M"),
            slot.end.format("%H:%M"),
            suffix
        ));
    }
    lines
}

pub struct AvailabilityAggregator {
    gateway: Arc<dyn CalendarGateway>,
    policy: WorkdayPolicy,
}

impl AvailabilityAggregator {
    pub fn new(gateway: Arc<dyn CalendarGateway>, policy: WorkdayPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn policy(&self) -> &WorkdayPolicy {
        &self.policy
    }

    /// Per-weekday free slots for the horizon starting at `today`.
    ///
    /// Always returns one entry per weekday; a failed fetch is the only error.
    pub async fn free_windows(
        &self,
        ids: &[AccountId],
        today: NaiveDate,
    ) -> Result<Vec<DayAvailability>, GatewayError> {
        let days = working_days(today, self.policy.horizon_days);
        let (Some(first), Some(last)) = (days.first(), days.last()) else {
            return Ok(Vec::new());
        };

        let accessibility = self.gateway.accessibility(ids, *first, *last).await?;
        let busy = collect_busy(&accessibility, ids);
        log::debug!(
            "{} busy intervals for {} accounts over {}..={}",
            busy.len(),
            ids.len(),
            first,
            last
        );

        Ok(days
            .into_iter()
            .map(|date| day_availability(date, &self.policy, &busy))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 17).unwrap() // Tuesday
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn iv(h1: u32, m1: u32, h2: u32, m2: u32) -> Interval {
        Interval::new(at(h1, m1), at(h2, m2)).unwrap()
    }

    fn busy(id: AccountId, interval: Interval) -> BusyInterval {
        BusyInterval {
            account_id: id,
            interval,
        }
    }

    fn slot(from: &str, to: &str) -> AccessibilitySlot {
        AccessibilitySlot {
            accessibility: Some("busy".into()),
            date_from: from.into(),
            date_to: to.into(),
            ..AccessibilitySlot::default()
        }
    }

    #[test]
    fn test_merge_sorted_disjoint_and_covering() {
        let input = vec![
            iv(14, 0, 15, 0),
            iv(9, 0, 10, 0),
            iv(9, 30, 11, 0),
            iv(10, 15, 10, 45),
            iv(16, 0, 17, 0),
        ];
        let merged = merge_intervals(input.clone());
        assert_eq!(merged, vec![iv(9, 0, 11, 0), iv(14, 0, 15, 0), iv(16, 0, 17, 0)]);

        for pair in merged.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
        // Every input minute is covered by some run and vice versa.
        let mut t = at(8, 0);
        while t < at(20, 0) {
            let in_input = input.iter().any(|i| i.start <= t && t < i.end);
            let in_merged = merged.iter().any(|i| i.start <= t && t < i.end);
            assert_eq!(in_input, in_merged, "coverage differs at {}", t);
            t += Duration::minutes(5);
        }
    }

    #[test]
    fn test_merge_abutting_intervals() {
        let merged = merge_intervals(vec![iv(10, 0, 11, 0), iv(11, 0, 12, 0)]);
        assert_eq!(merged, vec![iv(10, 0, 12, 0)]);
        assert!(merge_intervals(vec![]).is_empty());
    }

    #[test]
    fn test_gaps_and_runs_tile_window() {
        let window = iv(9, 0, 19, 0);
        let merged = merge_intervals(vec![iv(9, 0, 9, 10), iv(12, 0, 13, 0), iv(18, 40, 19, 0)]);
        let mut pieces: Vec<Interval> = gaps(&merged, window);
        pieces.extend(merged.iter().copied());
        pieces.sort();
        assert_eq!(pieces.first().unwrap().start, window.start);
        assert_eq!(pieces.last().unwrap().end, window.end);
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_min_slot_boundary() {
        let window = iv(9, 0, 19, 0);
        let min = Duration::minutes(30);
        let merged = vec![iv(9, 30, 10, 0), iv(10, 29, 19, 0)];
        let free = free_slots(&merged, window, min);
        // 09:00-09:30 is exactly 30 minutes; 10:00-10:29 is too short.
        assert_eq!(free, vec![FreeSlot { start: at(9, 0), end: at(9, 30) }]);
    }

    #[test]
    fn test_two_accounts_end_to_end() {
        let policy = WorkdayPolicy::default();
        let busy = vec![busy(1, iv(9, 0, 10, 0)), busy(2, iv(9, 30, 11, 0))];
        let result = day_availability(day(), &policy, &busy);
        assert_eq!(result.free, vec![FreeSlot { start: at(11, 0), end: at(19, 0) }]);
        assert!(!result.is_all_day(&result.free[0]));
    }

    #[test]
    fn test_busy_outside_window_is_clipped() {
        let policy = WorkdayPolicy::default();
        let busy = vec![busy(1, iv(7, 0, 9, 45)), busy(1, iv(18, 30, 21, 0)), busy(1, iv(6, 0, 8, 0))];
        let result = day_availability(day(), &policy, &busy);
        assert_eq!(result.free, vec![FreeSlot { start: at(9, 45), end: at(18, 30) }]);
    }

    #[test]
    fn test_normalize_subtracts_offsets() {
        let mut s = slot("17.02.2026 10:00:00", "17.02.2026 11:30:00");
        s.offset_from = json!(3600);
        s.offset_to = json!("3600");
        assert_eq!(normalize_slot(&s).unwrap(), Some(iv(9, 0, 10, 30)));
    }

    #[test]
    fn test_offset_whole_float_accepted() {
        let mut s = slot("17.02.2026 10:00:00", "17.02.2026 11:30:00");
        s.offset_from = json!(3600.0);
        s.offset_to = json!(3600.0);
        assert_eq!(normalize_slot(&s).unwrap(), Some(iv(9, 0, 10, 30)));

        s.offset_to = json!(3600.5);
        assert!(matches!(normalize_slot(&s), Err(SlotError::Offset(_))));
    }

    #[test]
    fn test_normalize_free_and_missing_accessibility() {
        let mut s = slot("17.02.2026 10:00:00", "17.02.2026 11:00:00");
        s.accessibility = Some("free".into());
        assert_eq!(normalize_slot(&s).unwrap(), None);

        s.accessibility = None;
        assert!(normalize_slot(&s).unwrap().is_some());

        s.accessibility = Some("quest".into());
        assert!(normalize_slot(&s).unwrap().is_some());
    }

    #[test]
    fn test_gateway_datetime_formats() {
        assert_eq!(parse_gateway_datetime("17.02.2026 09:00:00").unwrap(), at(9, 0));
        assert_eq!(parse_gateway_datetime("2026-02-17T09:00:00+07:00").unwrap(), at(9, 0));
        assert_eq!(parse_gateway_datetime("2026-02-17 09:00:00").unwrap(), at(9, 0));
        assert!(parse_gateway_datetime("tomorrow").is_err());
    }

    #[test]
    fn test_malformed_slot_skipped() {
        let mut map = AccessibilityMap::new();
        let mut bad_offset = slot("17.02.2026 12:00:00", "17.02.2026 13:00:00");
        bad_offset.offset_from = json!({"x": 1});
        map.insert(
            1,
            vec![
                slot("garbage", "17.02.2026 10:00:00"),
                bad_offset,
                slot("17.02.2026 15:00:00", "17.02.2026 16:00:00"),
            ],
        );
        let busy = collect_busy(&map, &[1, 2]);
        assert_eq!(busy, vec![busy_at(1, iv(15, 0, 16, 0))]);
    }

    fn busy_at(id: AccountId, interval: Interval) -> BusyInterval {
        busy(id, interval)
    }

    #[test]
    fn test_working_days_skip_weekend() {
        let friday = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let days = working_days(friday, 5);
        let labels: Vec<String> = days.iter().map(|d| d.format("%d.%m").to_string()).collect();
        assert_eq!(labels, vec!["20.02", "23.02", "24.02", "25.02", "26.02"]);

        let saturday = NaiveDate::from_ymd_opt(2026, 2, 21).unwrap();
        assert_eq!(working_days(saturday, 1)[0].weekday(), Weekday::Mon);
    }

    #[test]
    fn test_format_day_labels() {
        let policy = WorkdayPolicy::default();
        let free_day = day_availability(day(), &policy, &[]);
        assert_eq!(format_day(&free_day), vec!["Вт, 17.02:", "  09:00–19:00 (весь день)"]);

        let full_day = day_availability(day(), &policy, &[busy(1, iv(8, 0, 20, 0))]);
        assert_eq!(format_day(&full_day), vec!["Вт, 17.02:", "  нет свободных слотов"]);
    }

    #[tokio::test]
    async fn test_aggregator_covers_every_weekday() {
        let mut gw = FakeGateway::default();
        gw.accessibility.insert(
            1,
            vec![slot("17.02.2026 09:00:00", "17.02.2026 10:00:00")],
        );
        gw.accessibility.insert(
            2,
            vec![slot("17.02.2026 09:30:00", "17.02.2026 11:00:00")],
        );
        let aggregator = AvailabilityAggregator::new(Arc::new(gw), WorkdayPolicy::default());

        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).unwrap();
        let days = aggregator.free_windows(&[1, 2], monday).await.unwrap();
        assert_eq!(days.len(), 5);
        assert_eq!(days[0].free.len(), 1);
        assert!(days[0].is_all_day(&days[0].free[0]));
        assert_eq!(days[1].date, day());
        assert_eq!(days[1].free, vec![FreeSlot { start: at(11, 0), end: at(19, 0) }]);
    }

    #[tokio::test]
    async fn test_aggregator_fetch_failure_propagates() {
        let gw = FakeGateway {
            fail_accessibility: true,
            ..FakeGateway::default()
        };
        let aggregator = AvailabilityAggregator::new(Arc::new(gw), WorkdayPolicy::default());
        assert!(aggregator.free_windows(&[1], day()).await.is_err());
    }
}
