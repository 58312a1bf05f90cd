//! Type normalizers for raw field text.
//!
//! Each normalizer is total over its declared input shape; malformed input
//! (an unmapped month name, an unparseable rating) is a normalization error
//! that the extractor converts into a per-record extraction failure.

use serde_json::Value;

/// Why a raw value could not be normalized.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NormalizeError(pub String);

/// The fixed month-name table for dotted dates. Genitive forms, as the dates
/// appear inline after the day number.
const MONTHS: [(&str, &str); 12] = [
    ("января", "01"),
    ("февраля", "02"),
    ("марта", "03"),
    ("апреля", "04"),
    ("мая", "05"),
    ("июня", "06"),
    ("июля", "07"),
    ("августа", "08"),
    ("сентября", "09"),
    ("октября", "10"),
    ("ноября", "11"),
    ("декабря", "12"),
];

const MONTHS_EN: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Normalize a "D month-name YYYY" date to the canonical `YYYY.MM.DD` form.
///
/// The canonical form is fixed-width and zero-padded, so lexicographic
/// comparison orders it chronologically. An unmapped month name is malformed
/// input, never silently defaulted.
pub fn dotted_date(text: &str) -> Result<String, NormalizeError> {
    let lower = text.trim().to_lowercase();
    let mut parts = lower.split_whitespace();
    let (Some(day), Some(month), Some(year)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(NormalizeError(format!("not a day/month/year triple: '{text}'")));
    };

    let month_num = MONTHS
        .iter()
        .find(|(name, _)| *name == month)
        .map(|(_, num)| *num)
        .ok_or_else(|| NormalizeError(format!("unmapped month name: '{month}'")))?;

    if day.is_empty() || !day.chars().all(|c| c.is_ascii_digit()) {
        return Err(NormalizeError(format!("not a day number: '{day}'")));
    }
    let day = if day.len() == 1 {
        format!("0{day}")
    } else {
        day.to_string()
    };

    Ok(format!("{year}.{month_num}.{day}"))
}

/// Normalize a platform-native English date line to an ISO-8601 instant.
///
/// Accepts trailing "Month D, YYYY" inside arbitrary prose ("Reviewed in the
/// United States on March 5, 2023"). Midnight UTC; the source carries no
/// finer resolution.
pub fn iso_datetime(text: &str) -> Result<String, NormalizeError> {
    let lower = text.to_lowercase();
    for (idx, name) in MONTHS_EN.iter().enumerate() {
        let Some(pos) = lower.find(name) else {
            continue;
        };
        let tail = &text[pos + name.len()..];
        let digits: String = tail
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let year: String = tail
            .chars()
            .skip_while(|c| *c != ',')
            .skip(1)
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() || year.len() != 4 {
            break;
        }
        let day: u8 = digits
            .parse()
            .map_err(|_| NormalizeError(format!("not a day number: '{digits}'")))?;
        if day == 0 || day > 31 {
            return Err(NormalizeError(format!("day out of range: {day}")));
        }
        return Ok(format!(
            "{year}-{:02}-{day:02}T00:00:00.000Z",
            idx + 1
        ));
    }
    Err(NormalizeError(format!("no native date found in: '{text}'")))
}

/// Strip every non-digit character and parse the remainder as an integer.
///
/// No digits at all yields the policy default: 0 in general, 1 for
/// helpful-vote phrasings where a missing leading count means "a person".
pub fn count(text: &str, empty_default: i64) -> i64 {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return empty_default;
    }
    digits.parse().unwrap_or(i64::MAX)
}

/// Parse the leading float of a rating line ("4.0 out of 5 stars" → 4.0).
pub fn rating(text: &str) -> Result<f64, NormalizeError> {
    let first = text
        .split_whitespace()
        .next()
        .ok_or_else(|| NormalizeError("empty rating text".to_string()))?;
    first
        .replace(',', ".")
        .parse()
        .map_err(|_| NormalizeError(format!("not a rating: '{first}'")))
}

/// Split "Key: Value" lines into a flat lowercased-key map, source order.
///
/// Lines without a colon are skipped; only the first colon splits.
pub fn key_value_lines(text: &str) -> Value {
    let mut object = serde_json::Map::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        object.insert(key, Value::String(value.trim().to_string()));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_date_pads_single_digit_day() {
        assert_eq!(dotted_date("5 марта 2023").unwrap(), "2023.03.05");
        assert_eq!(dotted_date("14 ноября 2022").unwrap(), "2022.11.14");
    }

    #[test]
    fn test_dotted_date_case_insensitive() {
        assert_eq!(dotted_date("1 Января 2023").unwrap(), "2023.01.01");
    }

    #[test]
    fn test_dotted_date_unmapped_month_is_fatal() {
        assert!(dotted_date("5 brumaire 2023").is_err());
        assert!(dotted_date("март 2023").is_err());
    }

    #[test]
    fn test_iso_datetime_from_prose() {
        assert_eq!(
            iso_datetime("Reviewed in the United States on March 5, 2023").unwrap(),
            "2023-03-05T00:00:00.000Z"
        );
        assert_eq!(
            iso_datetime("December 31, 2022").unwrap(),
            "2022-12-31T00:00:00.000Z"
        );
    }

    #[test]
    fn test_iso_datetime_rejects_undateable_text() {
        assert!(iso_datetime("no date here").is_err());
        assert!(iso_datetime("March sometime").is_err());
    }

    #[test]
    fn test_count_strips_separators() {
        assert_eq!(count("1,234 people found this helpful", 1), 1234);
        assert_eq!(count("12 345", 0), 12345);
    }

    #[test]
    fn test_count_empty_default_policy() {
        // "a person found this helpful" carries no leading number.
        assert_eq!(count("found this helpful", 1), 1);
        assert_eq!(count("", 0), 0);
    }

    #[test]
    fn test_rating_leading_float() {
        assert_eq!(rating("4.0 out of 5 stars").unwrap(), 4.0);
        assert_eq!(rating("3,5 von 5 Sternen").unwrap(), 3.5);
        assert!(rating("stars").is_err());
    }

    #[test]
    fn test_key_value_lines() {
        let value = key_value_lines("Color: Red\nSize: Large\nno separator line");
        assert_eq!(value, json!({"color": "Red", "size": "Large"}));
    }
}
