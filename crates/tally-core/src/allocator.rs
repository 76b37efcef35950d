//! # Bill Number Allocator
//!
//! Derives the next human-readable bill number from the current bills.
//!
//! ## Algorithm
//! ```text
//! existing: SS01, SS02, CUSTOM-07, SS05
//!              │
//!              ▼
//!   trailing digit run of each → 1, 2, 7, 5      max = 7
//!              │
//!              ▼
//!   candidate = SS08 ── in existing set? ── yes → SS09 → ...
//!                                        └─ no  → return
//! ```
//!
//! The loop terminates after at most `existing.len() + 1` candidates:
//! each collision consumes one distinct existing number.
//!
//! Allocation is pure. Callers that insert the result must do so under
//! the bill collection's write lock (`tally-db` does this in
//! `BillRepository::create`).

use std::collections::HashSet;

use crate::{BILL_NUMBER_MIN_WIDTH, BILL_NUMBER_PREFIX};

/// Returns the next collision-free bill number.
///
/// ## Example
/// ```rust
/// use tally_core::allocator::next_bill_number;
///
/// assert_eq!(next_bill_number(Vec::<&str>::new()), "SS01");
/// assert_eq!(next_bill_number(["SS09"]), "SS10");
/// assert_eq!(next_bill_number(["SS99"]), "SS100");
/// ```
pub fn next_bill_number<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut max_found: u64 = 0;
    let mut taken: HashSet<&str> = HashSet::new();

    for number in existing {
        // digits are read from the raw value; a trailing space hides them
        if let Some(value) = trailing_number(number) {
            max_found = max_found.max(value);
        }
        taken.insert(number.trim());
    }

    // u128: max_found + existing.len() + 1 always fits
    let mut candidate = u128::from(max_found) + 1;
    loop {
        let formatted = format_bill_number(candidate);
        if !taken.contains(formatted.as_str()) {
            return formatted;
        }
        candidate += 1;
    }
}

/// Formats `n` as `SS` followed by at least two digits.
pub fn format_bill_number(n: u128) -> String {
    format!(
        "{}{:0width$}",
        BILL_NUMBER_PREFIX,
        n,
        width = BILL_NUMBER_MIN_WIDTH
    )
}

/// Parses the longest run of ASCII digits at the end of `s`.
///
/// Runs too large for u64 are ignored, the same as a non-numeric suffix.
fn trailing_number(s: &str) -> Option<u64> {
    let digits_start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;

    s[digits_start..].parse().ok()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_gap() {
        assert_eq!(next_bill_number(["SS01", "SS02", "SS05"]), "SS06");
    }

    #[test]
    fn test_foreign_number_never_collides() {
        let existing = ["SS01", "SS02", "CUSTOM-03", "SS03"];
        let next = next_bill_number(existing);
        assert!(!existing.contains(&next.as_str()));
        assert_eq!(next, "SS04");
    }

    #[test]
    fn test_skips_manually_entered_successor() {
        // max trailing run is 7 (from "X7"), SS08 is free
        assert_eq!(next_bill_number(["SS01", "X7"]), "SS08");
        // "SS4" has max 4 → SS05, which is taken, so SS06
        assert_eq!(next_bill_number(["SS4", "SS05"]), "SS06");
    }

    #[test]
    fn test_collision_loop_visits_each_taken_number_once() {
        // max trailing run = 3 from "A3"; SS04..SS06 are taken under
        // names that do not raise the max beyond 6
        let existing = ["A3", "SS04", "SS05", "SS06"];
        assert_eq!(next_bill_number(existing), "SS07");
    }

    #[test]
    fn test_natural_width_past_99() {
        assert_eq!(next_bill_number(["SS99"]), "SS100");
        assert_eq!(format_bill_number(7), "SS07");
        assert_eq!(format_bill_number(1234), "SS1234");
    }

    #[test]
    fn test_whitespace_and_non_numeric() {
        // trailing space hides the digits, but the trimmed number is taken
        assert_eq!(next_bill_number([" SS02 ", "walk-in", ""]), "SS01");
        assert_eq!(next_bill_number([" SS01 "]), "SS02");
        assert_eq!(next_bill_number([" SS02", "walk-in"]), "SS03");
        assert_eq!(next_bill_number(["walk-in"]), "SS01");
    }

    #[test]
    fn test_u64_max_digit_run_terminates() {
        assert_eq!(
            next_bill_number(["SS18446744073709551615"]),
            "SS18446744073709551616"
        );
        assert_eq!(
            next_bill_number(["SS18446744073709551615", "SS18446744073709551616"]),
            "SS18446744073709551617"
        );
    }

    #[test]
    fn test_oversized_digit_run_is_ignored() {
        assert_eq!(next_bill_number(["SS99999999999999999999999", "SS02"]), "SS03");
    }

    #[test]
    fn test_trailing_number() {
        assert_eq!(trailing_number("SS012"), Some(12));
        assert_eq!(trailing_number("INV-2024-7"), Some(7));
        assert_eq!(trailing_number("SS"), None);
        assert_eq!(trailing_number(""), None);
    }
}
