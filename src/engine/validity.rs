/// Decides whether a raw field value is a candidate for quoting.
///
/// `invalid` is the form-level validity flag reported alongside the edit.
/// The last-character digit check is a lightweight guard against partial
/// input like `12.` or `12e`; the parse below is the authoritative check.
pub fn is_candidate(raw: &str, invalid: bool) -> bool {
    if invalid || raw.is_empty() {
        return false;
    }

    if !raw.chars().next_back().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }

    raw.parse::<f64>().is_ok_and(|value| value > 0.0)
}
