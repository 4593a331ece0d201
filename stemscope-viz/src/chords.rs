//! Chord label helpers for the chord progression view
//!
//! Pure lookup functions. The minor-quality detection and the Roman numeral
//! mapping are deliberately simple: numerals are relative to C major and the
//! quality check does not consult the track key. Known simplification, not
//! music theory.

/// Whether a chord label names a minor chord.
///
/// Heuristic: an `m` that is not the start of `maj`. Misclassifies labels
/// carrying an incidental `m` in a non-quality position (e.g. slash-bass
/// spellings); acceptable for chart coloring.
pub fn is_minor(label: &str) -> bool {
    let bytes = label.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'm' && !label[i..].starts_with("maj") {
            return true;
        }
    }
    false
}

/// Map a chord label to a Roman numeral, relative to C major.
///
/// Unknown roots pass through unchanged so the chart still renders a label.
pub fn roman_numeral(label: &str) -> String {
    const NUMERALS: [&str; 7] = ["I", "II", "III", "IV", "V", "VI", "VII"];
    const NOTES: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];

    let Some(root) = label.chars().next() else {
        return label.to_string();
    };
    let Some(position) = NOTES.iter().position(|&n| n == root) else {
        return label.to_string();
    };

    let mut roman = NUMERALS[position].to_string();
    if is_minor(label) {
        roman = roman.to_lowercase();
    }

    // Quality suffixes, most specific first
    if label.contains("maj7") {
        roman.push_str("maj7");
    } else if label.contains('7') {
        roman.push('7');
    }
    if label.contains("dim") {
        roman.push('°');
    }
    if label.contains("aug") {
        roman.push('+');
    }

    roman
}

/// Chart color for a chord, warm for major and cool for minor, with opacity
/// scaled by confidence (0.5 at zero confidence up to 1.0).
pub fn chord_color(label: &str, confidence: f64) -> String {
    let opacity = 0.5 + confidence.clamp(0.0, 1.0) * 0.5;
    if is_minor(label) {
        format!("rgba(59, 130, 246, {:.2})", opacity)
    } else {
        format!("rgba(251, 146, 60, {:.2})", opacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_detection() {
        assert!(is_minor("Am"));
        assert!(is_minor("F#m7"));
        assert!(is_minor("Dm"));
        assert!(!is_minor("C"));
        assert!(!is_minor("Cmaj7"));
        assert!(!is_minor("G7"));
    }

    #[test]
    fn test_minor_after_maj_prefix() {
        // "Cmaj7m" is nonsense but exercises the maj skip followed by a
        // genuine quality m
        assert!(is_minor("Cmajm"));
    }

    #[test]
    fn test_roman_numerals_in_c() {
        assert_eq!(roman_numeral("C"), "I");
        assert_eq!(roman_numeral("G"), "V");
        assert_eq!(roman_numeral("Am"), "vi");
        assert_eq!(roman_numeral("Em"), "iii");
    }

    #[test]
    fn test_roman_numeral_qualities() {
        assert_eq!(roman_numeral("G7"), "V7");
        assert_eq!(roman_numeral("Cmaj7"), "Imaj7");
        // "dim" trips the minor heuristic, which happens to match the
        // lowercase-numeral convention for diminished chords
        assert_eq!(roman_numeral("Bdim"), "vii°");
        assert_eq!(roman_numeral("Caug"), "I+");
    }

    #[test]
    fn test_unknown_root_passes_through() {
        assert_eq!(roman_numeral("N.C."), "N.C.");
        assert_eq!(roman_numeral(""), "");
    }

    #[test]
    fn test_chord_color_buckets() {
        assert!(chord_color("Am", 1.0).starts_with("rgba(59"));
        assert!(chord_color("C", 1.0).starts_with("rgba(251"));
        // Opacity floor at 0.5
        assert!(chord_color("C", 0.0).ends_with("0.50)"));
        assert!(chord_color("C", 1.0).ends_with("1.00)"));
    }
}
