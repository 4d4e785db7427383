//! Display-string parsing helpers.
//!
//! Hosts report parameter values as formatted text ("-6.0 dB", "1.20 kHz",
//! "Hall"). These helpers pull a number and a unit out of that text on a
//! best-effort basis.

/// Value used for "-inf dB" readouts.
pub const NEG_INF_DB: f64 = -144.0;

/// Unit suffixes recognized after a number, longest first.
const UNIT_SUFFIXES: &[(&str, &str)] = &[
    ("semitones", "st"),
    ("semi", "st"),
    ("cents", "ct"),
    ("khz", "Hz"),
    ("sec", "s"),
    ("hz", "Hz"),
    ("db", "dB"),
    ("ms", "ms"),
    ("st", "st"),
    ("ct", "ct"),
    (":1", ":1"),
    ("%", "%"),
    ("s", "s"),
    ("x", "x"),
];

pub fn normalize_token(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Lowercase words of a name, split at non-alphanumerics and where a
/// lowercase letter is followed by an uppercase one ("ReaVerbate" -> "rea",
/// "verbate").
pub fn words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn is_neg_infinity(lower: &str) -> bool {
    ["-inf", "-∞", "−inf", "−∞"].iter().any(|marker| lower.contains(marker))
}

/// Extract the first number from a display string.
///
/// A `k` right after the number ("1.2 kHz", "10k") scales by 1000.
/// Returns `None` for pure labels.
pub fn parse_display_number(text: &str) -> Option<f64> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if is_neg_infinity(&lower) {
        return Some(NEG_INF_DB);
    }

    let chars: Vec<char> = lower.chars().collect();
    let first_digit = chars.iter().position(|c| c.is_ascii_digit())?;

    let mut begin = first_digit;
    if begin > 0 && chars[begin - 1] == '.' {
        begin -= 1;
    }
    let negative = begin > 0 && matches!(chars[begin - 1], '-' | '−');

    let mut end = first_digit;
    let is_number_char = |c: char| c.is_ascii_digit() || c == '.' || c == ',';
    while end < chars.len() && is_number_char(chars[end]) {
        end += 1;
    }

    let mut token: String = chars[begin..end].iter().collect();
    while token.ends_with('.') || token.ends_with(',') {
        token.pop();
    }

    let mut value: f64 = normalize_separators(&token).parse().ok()?;
    if negative {
        value = -value;
    }

    let suffix: String = chars[end..].iter().collect();
    if suffix.trim_start().starts_with('k') {
        value *= 1000.0;
    }

    value.is_finite().then_some(value)
}

/// "1,000" -> "1000", "0,5" -> "0.5", "1,234.5" -> "1234.5".
fn normalize_separators(token: &str) -> String {
    if !token.contains(',') {
        return token.to_string();
    }
    if token.contains('.') {
        return token.replace(',', "");
    }
    let groups: Vec<&str> = token.split(',').collect();
    let thousands = groups.len() > 1 && groups[1..].iter().all(|g| g.len() == 3);
    if thousands {
        token.replace(',', "")
    } else {
        token.replacen(',', ".", 1).replace(',', "")
    }
}

/// Infer the unit from the text after the last digit.
pub fn infer_unit(text: &str) -> Option<String> {
    let lower = text.trim().to_lowercase();
    if is_neg_infinity(&lower) && lower.contains("db") {
        return Some("dB".to_string());
    }
    if lower.ends_with(":1") {
        return Some(":1".to_string());
    }
    let last_digit = lower.rfind(|c: char| c.is_ascii_digit())?;
    let tail = lower[last_digit + 1..].trim();
    if tail.is_empty() {
        return None;
    }
    UNIT_SUFFIXES
        .iter()
        .find(|(suffix, _)| tail.starts_with(suffix))
        .map(|(_, unit)| unit.to_string())
}

/// True when a display string reads as a number rather than a label.
///
/// Known unit suffixes are stripped first, then digits must outnumber
/// letters ("5 Hz" and "-12.0 dB" are numeric, "Room 2" is not).
pub fn is_numeric_display(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if is_neg_infinity(&lower) {
        return true;
    }

    let mut body = lower.as_str();
    for (suffix, _) in UNIT_SUFFIXES {
        if let Some(stripped) = body.strip_suffix(suffix) {
            body = stripped.trim_end();
            break;
        }
    }
    if let Some(stripped) = body.strip_suffix('k') {
        body = stripped;
    }

    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    let letters = body.chars().filter(|c| c.is_alphabetic()).count();
    digits > 0 && digits > letters
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("VST: ReaVerbate (Cockos)", &["vst", "rea", "verbate", "cockos"])]
    #[case("ReaEQ", &["rea", "eq"])]
    #[case("Pre-Delay", &["pre", "delay"])]
    #[case("Band 1 Gain", &["band", "1", "gain"])]
    #[case("  ", &[])]
    fn splits_words(#[case] text: &str, #[case] expected: &[&str]) {
        assert_eq!(words(text), expected);
    }

    #[rstest]
    #[case("-6.0 dB", Some(-6.0))]
    #[case("1.20 kHz", Some(1200.0))]
    #[case("250 Hz", Some(250.0))]
    #[case("0.10 s", Some(0.1))]
    #[case("35%", Some(35.0))]
    #[case(".5", Some(0.5))]
    #[case("1,000 Hz", Some(1000.0))]
    #[case("0,75", Some(0.75))]
    #[case("-inf dB", Some(NEG_INF_DB))]
    #[case("4.0:1", Some(4.0))]
    #[case("Hall", None)]
    #[case("", None)]
    fn parses_display_numbers(#[case] text: &str, #[case] expected: Option<f64>) {
        match (parse_display_number(text), expected) {
            (Some(got), Some(want)) => {
                assert!((got - want).abs() < 1e-9, "{text}: {got} != {want}")
            }
            (got, want) => assert_eq!(got, want, "{text}"),
        }
    }

    #[rstest]
    #[case("-6.0 dB", Some("dB"))]
    #[case("1.2 kHz", Some("Hz"))]
    #[case("120 ms", Some("ms"))]
    #[case("2.00 s", Some("s"))]
    #[case("50%", Some("%"))]
    #[case("-3 st", Some("st"))]
    #[case("4.0:1", Some(":1"))]
    #[case("0.5", None)]
    #[case("Plate", None)]
    fn infers_units(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(infer_unit(text).as_deref(), expected);
    }

    #[test]
    fn numeric_vs_label_strings() {
        assert!(is_numeric_display("5 Hz"));
        assert!(is_numeric_display("-12.0 dB"));
        assert!(is_numeric_display("10.00 kHz"));
        assert!(is_numeric_display("-inf dB"));
        assert!(!is_numeric_display("Room 2"));
        assert!(!is_numeric_display("Hall"));
        assert!(!is_numeric_display("Off"));
    }
}
