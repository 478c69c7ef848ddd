// Size tokens as printed by squeue (`%m`) and `df -h`: a number with a single trailing unit
// character.  Everything is normalized to MB, with binary multiples.
//
//   K  value / 1024
//   M  value
//   G  value * 1024
//   T  value * 1024 * 1024
//
// A token without one of those suffixes, or whose number does not parse, is worth 0.0, so that one
// bad field does not cost us the whole scrape.  Callers that want to know when it happens use
// `parse_size`.

use std::str::FromStr;

pub fn normalize(token: &str) -> f64 {
    parse_size(token).unwrap_or(0.0)
}

/// Like `normalize` but returns None where `normalize` would silently return zero.

pub fn parse_size(token: &str) -> Option<f64> {
    let token = token.trim();
    let mut chars = token.chars();
    let factor = match chars.next_back()? {
        'K' => 1.0 / 1024.0,
        'M' => 1.0,
        'G' => 1024.0,
        'T' => 1024.0 * 1024.0,
        _ => return None,
    };
    match f64::from_str(chars.as_str()) {
        Ok(v) if v.is_finite() => Some(v * factor),
        _ => None,
    }
}

#[test]
fn test_normalize_cross_suffix() {
    assert!(normalize("2G") == 2048.0);
    assert!(normalize("2048M") == 2048.0);
    assert!(normalize("2097152K") == 2048.0);
    assert!(normalize("1T") == 1048576.0);
    assert!(normalize("1.5G") == 1536.0);
    assert!(normalize("512K") == 0.5);
}

#[test]
fn test_normalize_garbage() {
    assert!(normalize("") == 0.0);
    assert!(normalize("garbage") == 0.0);
    assert!(normalize("G") == 0.0);
    assert!(normalize("12") == 0.0);
    assert!(normalize("12X") == 0.0);
    assert!(normalize("1.2.3G") == 0.0);
    assert!(normalize("nanG") == 0.0);
}

#[test]
fn test_parse_size() {
    assert!(parse_size(" 4G ") == Some(4096.0));
    assert!(parse_size("4") == None);
    assert!(parse_size("") == None);
    assert!(parse_size("xM") == None);
}
