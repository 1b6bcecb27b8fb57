//! Invoice number sequence, e.g. `B001-0000125`.

/// Series used for every invoice the clinic issues.
pub const DEFAULT_SERIES: &str = "B001";

const CORRELATIVE_WIDTH: usize = 7;

/// Number following `last` in `series`.
///
/// Starts at 1 when there is no previous number or it cannot be parsed.
pub fn next_number(series: &str, last: Option<&str>) -> String {
    let next = last
        .and_then(|n| n.rsplit_once('-'))
        .and_then(|(_, correlative)| correlative.parse::<u64>().ok())
        .map(|n| n + 1)
        .unwrap_or(1);

    format!("{}-{:0width$}", series, next, width = CORRELATIVE_WIDTH)
}
