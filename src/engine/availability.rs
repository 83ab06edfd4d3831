use chrono::NaiveDate;

use crate::model::*;

// ── Free-date computation ─────────────────────────────────────────

/// Maximal date ranges inside `window` not held by an active booking.
pub fn free_stays(ss: &SuiteState, window: &Stay) -> Vec<Stay> {
    let held: Vec<Stay> = ss
        .overlapping(window)
        .filter(|b| b.is_active())
        .map(|b| b.stay())
        .collect();
    // Already sorted by start: bookings are kept in start order.
    subtract_stays(window, &merge_overlapping(&held))
}

/// Merge sorted stays that overlap or sit on consecutive days.
pub fn merge_overlapping(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && next_day(last.end).is_none_or(|n| stay.start <= n) {
                last.end = last.end.max(stay.end);
                continue;
            }
        merged.push(stay);
    }
    merged
}

/// Days of `window` not covered by `to_remove`, which must be sorted and disjoint.
pub fn subtract_stays(window: &Stay, to_remove: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut cursor = Some(window.start);

    for r in to_remove {
        let Some(current) = cursor else { break };
        if r.end < current {
            continue;
        }
        if r.start > window.end {
            break;
        }
        if r.start > current
            && let Some(before) = r.start.pred_opt() {
                result.push(Stay {
                    start: current,
                    end: before.min(window.end),
                });
            }
        cursor = next_day(r.end);
    }

    if let Some(current) = cursor
        && current <= window.end {
            result.push(Stay {
                start: current,
                end: window.end,
            });
        }

    result
}

fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.succ_opt()
}
