/// Normalizes a Russian phone number to `+7XXXXXXXXXX`.
///
/// Only digits count: eleven digits starting with 7 or 8 keep the last ten,
/// ten digits are taken as the national number. Anything else is `None`.
/// The `normalize_phone` SQL function applies the same rules.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let national = match digits.len() {
        11 if digits.starts_with('7') || digits.starts_with('8') => &digits[1..],
        10 => digits.as_str(),
        _ => return None,
    };
    Some(format!("+7{national}"))
}
