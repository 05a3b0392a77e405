//! Per-pipeline "finished after" watermarks.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Lower bound of a pipeline's query window. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Starting point for a fresh process: `now - retention`. Data older than
    /// the backend's retention window is not worth querying.
    pub fn initial(now: DateTime<Utc>, retention: Duration) -> Self {
        Self(now - retention)
    }

    pub fn get(&self) -> DateTime<Utc> {
        self.0
    }

    /// Move to `candidate` if it is later. Returns whether it moved.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.0 {
            self.0 = candidate;
            true
        } else {
            false
        }
    }
}

/// State carried from one ingestion cycle to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleState {
    floor: DateTime<Utc>,
    watermarks: BTreeMap<String, Watermark>,
}

impl CycleState {
    /// Every pipeline starts at `floor` until it has been ingested once.
    pub fn new(floor: DateTime<Utc>) -> Self {
        Self {
            floor,
            watermarks: BTreeMap::new(),
        }
    }

    pub fn starting_at(now: DateTime<Utc>, retention: Duration) -> Self {
        Self::new(Watermark::initial(now, retention).get())
    }

    pub fn watermark(&self, pipeline: &str) -> Watermark {
        self.watermarks
            .get(pipeline)
            .copied()
            .unwrap_or(Watermark::new(self.floor))
    }

    pub fn advance(&mut self, pipeline: &str, candidate: DateTime<Utc>) -> bool {
        let floor = self.floor;
        self.watermarks
            .entry(pipeline.to_string())
            .or_insert_with(|| Watermark::new(floor))
            .advance(candidate)
    }

    /// Lift the floor and every pipeline's watermark to at least `cutoff`.
    ///
    /// Idle pipelines would otherwise keep querying from a point the dedup
    /// store has already forgotten, and re-export whatever it evicted.
    pub fn raise_floor(&mut self, cutoff: DateTime<Utc>) {
        self.floor = self.floor.max(cutoff);
        for mark in self.watermarks.values_mut() {
            mark.advance(cutoff);
        }
    }

    pub fn floor(&self) -> DateTime<Utc> {
        self.floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_watermark_never_regresses() {
        let mut mark = Watermark::new(ts(5));
        assert!(!mark.advance(ts(3)));
        assert_eq!(mark.get(), ts(5));
        assert!(!mark.advance(ts(5)));
        assert!(mark.advance(ts(7)));
        assert_eq!(mark.get(), ts(7));
    }

    #[test]
    fn test_initial_watermark_is_retention_window_back() {
        let now = ts(12);
        let mark = Watermark::initial(now, Duration::days(60));
        assert_eq!(mark.get(), now - Duration::days(60));
    }

    #[test]
    fn test_cycle_state_tracks_pipelines_independently() {
        let mut state = CycleState::new(ts(0));
        assert_eq!(state.watermark("app").get(), ts(0));

        assert!(state.advance("app", ts(4)));
        assert!(!state.advance("app", ts(2)));
        assert!(state.advance("docs", ts(1)));

        assert_eq!(state.watermark("app").get(), ts(4));
        assert_eq!(state.watermark("docs").get(), ts(1));
        assert_eq!(state.watermark("other").get(), ts(0));
    }

    #[test]
    fn test_advance_below_floor_is_ignored() {
        let mut state = CycleState::new(ts(6));
        assert!(!state.advance("app", ts(2)));
        assert_eq!(state.watermark("app").get(), ts(6));
    }

    #[test]
    fn test_raise_floor_lifts_stale_watermarks_only() {
        let mut state = CycleState::new(ts(0));
        state.advance("app", ts(2));
        state.advance("docs", ts(9));

        state.raise_floor(ts(5));

        assert_eq!(state.floor(), ts(5));
        assert_eq!(state.watermark("app").get(), ts(5));
        assert_eq!(state.watermark("docs").get(), ts(9));
        assert_eq!(state.watermark("new").get(), ts(5));

        // an earlier cutoff never lowers anything
        state.raise_floor(ts(1));
        assert_eq!(state.floor(), ts(5));
        assert_eq!(state.watermark("app").get(), ts(5));
    }
}
