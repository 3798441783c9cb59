//! Known trouble-code descriptions
//!
//! Covers the generic powertrain codes the scanner sees most often plus the
//! network codes relevant to a lost-module diagnosis. Manufacturer-specific
//! codes decode to their formatted string only.

/// Look up the standard description for a formatted code
pub fn describe(code: &str) -> Option<&'static str> {
    KNOWN_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, description)| *description)
}

const KNOWN_CODES: &[(&str, &str)] = &[
    ("P0100", "Mass air flow circuit malfunction"),
    ("P0101", "Mass air flow circuit range/performance"),
    ("P0110", "Intake air temperature sensor circuit malfunction"),
    ("P0115", "Engine coolant temperature sensor circuit malfunction"),
    ("P0128", "Coolant thermostat below regulating temperature"),
    ("P0171", "System too lean, bank 1"),
    ("P0172", "System too rich, bank 1"),
    ("P0174", "System too lean, bank 2"),
    ("P0300", "Random/multiple cylinder misfire detected"),
    ("P0301", "Cylinder 1 misfire detected"),
    ("P0302", "Cylinder 2 misfire detected"),
    ("P0303", "Cylinder 3 misfire detected"),
    ("P0304", "Cylinder 4 misfire detected"),
    ("P0420", "Catalyst system efficiency below threshold, bank 1"),
    ("P0430", "Catalyst system efficiency below threshold, bank 2"),
    ("P0442", "Evaporative emission system leak detected, small leak"),
    ("P0500", "Vehicle speed sensor malfunction"),
    ("P0562", "System voltage low"),
    ("P0700", "Transmission control system malfunction"),
    ("P0715", "Input/turbine speed sensor circuit malfunction"),
    ("U0100", "Lost communication with engine control module"),
    ("U0101", "Lost communication with transmission control module"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve_to_a_description() {
        assert_eq!(describe("P0171"), Some("System too lean, bank 1"));
        assert_eq!(
            describe("P0300"),
            Some("Random/multiple cylinder misfire detected")
        );
        assert_eq!(
            describe("U0100"),
            Some("Lost communication with engine control module")
        );
    }

    #[test]
    fn manufacturer_codes_have_no_description() {
        assert_eq!(describe("P1234"), None);
        assert_eq!(describe("C0561"), None);
        assert_eq!(describe(""), None);
    }
}
