//! Presentation helpers for slugs, prices, and counters.

use crate::money::Money;

/// Longest slug the backend accepts.
pub const MAX_SLUG_LEN: usize = 64;

/// Derive a URL slug from a display name.
///
/// ASCII letters and digits are kept (lowercased); every other run of
/// characters collapses into a single `-`. Leading and trailing separators are
/// dropped and the result is capped at [`MAX_SLUG_LEN`].
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Render an amount as dollars with thousands separators, e.g. `$1,234.50`.
#[must_use]
pub fn format_money(amount: Money) -> String {
    let cents = amount.cents();
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("${grouped}.{:02}", cents % 100)
}

/// Render a counter compactly: `999`, `1.2K`, `3M`.
///
/// Values are truncated to one decimal place so a count never reads higher
/// than it is.
#[must_use]
pub fn compact_count(count: u64) -> String {
    const UNITS: [(u64, &str); 3] = [
        (1_000_000_000, "B"),
        (1_000_000, "M"),
        (1_000, "K"),
    ];
    for (scale, suffix) in UNITS {
        if count >= scale {
            let tenths = count / (scale / 10);
            let whole = tenths / 10;
            let fraction = tenths % 10;
            return if fraction == 0 {
                format!("{whole}{suffix}")
            } else {
                format!("{whole}.{fraction}{suffix}")
            };
        }
    }
    count.to_string()
}
