//! Turns sparse labelled events into the time bounds of an export.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::ReadHandle;

pub const DEFAULT_START_LABEL: &str = "start_cook";

/// Tried in order when no end label is given.
pub const FALLBACK_END_LABELS: [&str; 2] = ["end_run", "stop_heat"];

/// Inclusive time bounds. A missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

pub fn end_label_candidates(end_label: Option<&str>) -> Vec<&str> {
    match end_label.map(str::trim).filter(|label| !label.is_empty()) {
        Some(label) => vec![label],
        None => FALLBACK_END_LABELS.to_vec(),
    }
}

/// Timestamp of the first candidate label that has at least one event.
pub fn first_matching<'a, I, F>(candidates: I, mut lookup: F) -> Result<Option<DateTime<Utc>>>
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> Result<Option<DateTime<Utc>>>,
{
    for label in candidates {
        if let Some(at) = lookup(label)? {
            return Ok(Some(at));
        }
    }
    Ok(None)
}

/// `lookup` returns the earliest event time for a label, if any.
pub fn resolve_window_with<F>(
    mut lookup: F,
    start_label: &str,
    end_label: Option<&str>,
) -> Result<Window>
where
    F: FnMut(&str) -> Result<Option<DateTime<Utc>>>,
{
    let start = lookup(start_label)?;
    let end = first_matching(end_label_candidates(end_label), &mut lookup)?;
    Ok(Window { start, end })
}

pub fn resolve_window(
    handle: &ReadHandle,
    run_id: &str,
    start_label: &str,
    end_label: Option<&str>,
) -> Result<Window> {
    resolve_window_with(
        |label| handle.first_event_at(run_id, label),
        start_label,
        end_label,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap()
    }

    fn resolve(
        events: &[(&str, u32)],
        start: &str,
        end: Option<&str>,
    ) -> Window {
        let mut earliest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for (label, minute) in events {
            let entry = earliest.entry(*label).or_insert(at(*minute));
            *entry = (*entry).min(at(*minute));
        }
        resolve_window_with(|label| Ok(earliest.get(label).copied()), start, end).unwrap()
    }

    #[test]
    fn start_and_fallback_end() {
        let window = resolve(&[("start_cook", 1), ("end_run", 20)], "start_cook", None);
        assert_eq!(window, Window::new(Some(at(1)), Some(at(20))));
    }

    #[test]
    fn start_only_leaves_end_open() {
        let window = resolve(&[("start_cook", 1)], "start_cook", None);
        assert_eq!(window, Window::new(Some(at(1)), None));
    }

    #[test]
    fn falls_back_to_stop_heat_when_end_run_is_missing() {
        let window = resolve(&[("stop_heat", 30)], "start_cook", None);
        assert_eq!(window, Window::new(None, Some(at(30))));
    }

    #[test]
    fn end_run_wins_over_stop_heat() {
        let window = resolve(&[("stop_heat", 10), ("end_run", 40)], "start_cook", None);
        assert_eq!(window.end, Some(at(40)));
    }

    #[test]
    fn explicit_end_label_disables_fallbacks() {
        let events = [("end_run", 20), ("lid_off", 25)];
        assert_eq!(resolve(&events, "start_cook", Some("lid_off")).end, Some(at(25)));
        assert_eq!(resolve(&events, "start_cook", Some("missing")).end, None);
        assert_eq!(resolve(&events, "start_cook", Some("  ")).end, Some(at(20)));
    }

    #[test]
    fn earliest_occurrence_is_used() {
        let window = resolve(&[("start_cook", 9), ("start_cook", 3)], "start_cook", None);
        assert_eq!(window.start, Some(at(3)));
    }

    #[test]
    fn contains_is_inclusive_and_open_sided() {
        let window = Window::new(Some(at(5)), Some(at(10)));
        assert!(window.contains(at(5)));
        assert!(window.contains(at(10)));
        assert!(!window.contains(at(11)));
        assert!(Window::new(None, Some(at(10))).contains(at(0)));
        assert!(Window::unbounded().contains(at(59)));
    }

    #[test]
    fn first_matching_stops_at_first_hit() {
        let mut asked = Vec::new();
        let found = first_matching(["a", "b", "c"], |label| {
            asked.push(label.to_string());
            Ok((label == "b").then(|| at(7)))
        })
        .unwrap();
        assert_eq!(found, Some(at(7)));
        assert_eq!(asked, vec!["a", "b"]);
    }
}
