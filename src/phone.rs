//! Phone number canonicalisation shared by subscriptions, payload rules and the chat listener.

const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

/// Canonical `+<digits>` form, or `None` when the input is not a plausible number.
///
/// Spaces, dashes, dots and parentheses are dropped; a single leading `+` is allowed.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut digits = String::with_capacity(body.len() + 1);
    digits.push('+');
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    let count = digits.len() - 1;
    if (MIN_DIGITS..=MAX_DIGITS).contains(&count) {
        Some(digits)
    } else {
        None
    }
}

pub fn is_valid_phone(raw: &str) -> bool {
    normalize_phone(raw).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_adds_plus() {
        assert_eq!(normalize_phone("+15551234").as_deref(), Some("+15551234"));
        assert_eq!(normalize_phone("+1 (555) 123-4").as_deref(), Some("+15551234"));
        assert_eq!(normalize_phone("79161234567").as_deref(), Some("+79161234567"));
        assert_eq!(normalize_phone(" 8.916.123.45.67 ").as_deref(), Some("+89161234567"));
    }

    #[test]
    fn rejects_letters_short_and_long_numbers() {
        assert!(normalize_phone("").is_none());
        assert!(normalize_phone("+").is_none());
        assert!(normalize_phone("123456").is_none());
        assert!(normalize_phone("1234567890123456").is_none());
        assert!(normalize_phone("+1555abc1234").is_none());
        assert!(normalize_phone("++15551234").is_none());
    }
}
