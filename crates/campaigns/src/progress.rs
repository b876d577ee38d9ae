/// Completion percentage after `attempted` of `total` recipients, rounded to
/// the nearest integer. An empty campaign is complete.
pub fn percent(attempted: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let attempted = attempted.min(total);
    ((attempted * 100 + total / 2) / total) as u8
}
