//! Detection artifact file names: `detected_<category>_<epoch_s>_<conf_x100>.jpg`.

use crate::error::DecodeError;

pub const DETECTION_PREFIX: &str = "detected_";
pub const DETECTION_EXT: &str = ".jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionName {
    pub category: String,
    pub epoch_s: i64,
    pub confidence_x100: u32,
}

/// Anything outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn sanitize_category(category: &str) -> String {
    category
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect()
}

/// File name the vision side should save a hit under so the ground station can
/// recover category and confidence from the path alone.
pub fn detection_file_name(category: &str, epoch_s: i64, confidence: f32) -> String {
    let x100 = (confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("{}{}_{}_{}{}", DETECTION_PREFIX, sanitize_category(category), epoch_s, x100, DETECTION_EXT)
}

/// Last `/`-separated component of a wire path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Categories may themselves contain `_`, so the last two segments are taken
/// as epoch and confidence and everything in between is the category.
pub fn parse_detection_name(name: &str) -> Result<DetectionName, DecodeError> {
    let bad = |reason| DecodeError::DetectionName { name: name.to_string(), reason };

    let stem = name.strip_suffix(DETECTION_EXT).ok_or_else(|| bad("missing .jpg extension"))?;
    let segments: Vec<&str> = stem.split('_').collect();
    if segments.len() < 4 {
        return Err(bad("fewer than four '_' segments"));
    }
    if segments[0] != "detected" {
        return Err(bad("missing detected_ prefix"));
    }

    let n = segments.len();
    let confidence_x100: u32 = segments[n - 1].parse().map_err(|_| bad("confidence is not an integer"))?;
    if confidence_x100 > 100 {
        return Err(bad("confidence above 100"));
    }
    let epoch_s: i64 = segments[n - 2].parse().map_err(|_| bad("timestamp is not an integer"))?;
    let category = segments[1..n - 2].join("_");
    if category.is_empty() {
        return Err(bad("empty category"));
    }

    Ok(DetectionName { category, epoch_s, confidence_x100 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_sanitizes_and_rounds() {
        assert_eq!(detection_file_name("traffic light", 1_700_000_000, 0.876), "detected_traffic_light_1700000000_88.jpg");
        assert_eq!(detection_file_name("café/β", 5, 0.7), "detected_caf___5_70.jpg");
        assert_eq!(detection_file_name("bird", 5, 1.4), "detected_bird_5_100.jpg");
    }

    #[test]
    fn underscores_in_category_survive() {
        let parsed = parse_detection_name("detected_traffic_light_1700000000_88.jpg").unwrap();
        assert_eq!(parsed.category, "traffic_light");
        assert_eq!(parsed.epoch_s, 1_700_000_000);
        assert_eq!(parsed.confidence_x100, 88);
    }

    #[test]
    fn malformed_names() {
        for name in [
            "detected_bird_87.jpg",
            "detected_bird_1700000000_87.png",
            "spotted_bird_1700000000_87.jpg",
            "detected_bird_soon_87.jpg",
            "detected_bird_1700000000_high.jpg",
            "detected_bird_1700000000_187.jpg",
            "detected__1700000000_87.jpg",
        ] {
            assert!(parse_detection_name(name).is_err(), "{name} should not parse");
        }
    }

    #[test]
    fn basename_of_wire_path() {
        assert_eq!(basename("detected_images/detected_dog_1_2.jpg"), "detected_dog_1_2.jpg");
        assert_eq!(basename("detected_dog_1_2.jpg"), "detected_dog_1_2.jpg");
    }
}
