//! Coal-bearing states served by the API, their districts and the anchor
//! points predictions are scattered around.

pub const INDIAN_STATES: [&str; 7] = [
    "Jharkhand",
    "Odisha",
    "Chhattisgarh",
    "West Bengal",
    "Madhya Pradesh",
    "Telangana",
    "Maharashtra",
];

const DISTRICTS: [(&str, &[&str]); 7] = [
    ("Jharkhand", &["Dhanbad", "Bokaro", "Ramgarh", "Giridih"]),
    ("Odisha", &["Angul", "Talcher", "Jharsuguda", "Sundargarh"]),
    ("Chhattisgarh", &["Korba", "Raigarh", "Surguja", "Bilaspur"]),
    ("West Bengal", &["Purulia", "Bardhaman", "Birbhum"]),
    ("Madhya Pradesh", &["Singrauli", "Shahdol", "Umaria"]),
    ("Telangana", &["Adilabad", "Khammam", "Karimnagar"]),
    ("Maharashtra", &["Chandrapur", "Nagpur", "Yavatmal"]),
];

/// `(lat, lon)` centres of known coalfields per state.
pub const ANCHORS: [(&str, &[(f64, f64)]); 7] = [
    ("Jharkhand", &[(23.5, 86.0), (23.8, 86.2), (24.0, 85.8)]),
    ("Odisha", &[(21.5, 84.0), (21.8, 85.2), (22.0, 84.5)]),
    ("Chhattisgarh", &[(22.0, 82.5), (22.5, 83.0), (23.0, 82.8)]),
    ("West Bengal", &[(23.5, 87.0), (23.8, 87.2)]),
    ("Madhya Pradesh", &[(23.8, 81.5), (24.0, 82.0)]),
    ("Telangana", &[(18.5, 79.5), (19.0, 79.8)]),
    ("Maharashtra", &[(19.5, 79.0), (20.0, 79.5)]),
];

/// Districts of `state`; empty for states outside the catalog.
pub fn districts(state: &str) -> &'static [&'static str] {
    DISTRICTS
        .iter()
        .find(|(s, _)| *s == state)
        .map(|(_, d)| *d)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_has_districts_and_anchors() {
        for state in INDIAN_STATES {
            assert!(!districts(state).is_empty(), "{}", state);
            assert!(ANCHORS.iter().any(|(s, a)| *s == state && !a.is_empty()));
        }
        assert!(districts("Kerala").is_empty());
    }
}
