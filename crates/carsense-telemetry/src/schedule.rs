//! Weighted round-robin poll schedule
//!
//! Safety-class parameters are visited `safety_weight` times per cycle for
//! every visit of a comfort-class parameter. The cycle is precomputed at
//! construction, so `next()` is a cursor bump.

use carsense_core::config::{PidSpec, PollClass};

pub struct PollSchedule {
    specs: Vec<PidSpec>,
    /// Indices into `specs`, one full weighted cycle
    cycle: Vec<usize>,
    cursor: usize,
}

impl PollSchedule {
    pub fn new(specs: Vec<PidSpec>, safety_weight: u32) -> Self {
        let weight = safety_weight.max(1) as usize;
        let safety: Vec<usize> = specs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.class == PollClass::Safety)
            .map(|(i, _)| i)
            .collect();
        let comfort: Vec<usize> = specs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.class == PollClass::Comfort)
            .map(|(i, _)| i)
            .collect();

        // Each of `weight` rounds visits every safety parameter; comfort
        // parameters are spread one round each so the cycle stays even
        let mut cycle = Vec::new();
        for round in 0..weight {
            cycle.extend_from_slice(&safety);
            for (i, &c) in comfort.iter().enumerate() {
                if i % weight == round {
                    cycle.push(c);
                }
            }
        }

        Self {
            specs,
            cycle,
            cursor: 0,
        }
    }

    /// Next parameter to poll, or `None` for an empty table
    pub fn next(&mut self) -> Option<&PidSpec> {
        if self.cycle.is_empty() {
            return None;
        }
        let index = self.cycle[self.cursor];
        self.cursor = (self.cursor + 1) % self.cycle.len();
        Some(&self.specs[index])
    }

    /// Visits in one full cycle
    pub fn cycle_len(&self) -> usize {
        self.cycle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(id: &str, class: PollClass) -> PidSpec {
        PidSpec {
            id: id.to_string(),
            name: id.to_string(),
            pid: 0x0C,
            unit: "u".to_string(),
            scale: 1.0,
            offset: 0.0,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            class,
        }
    }

    #[test]
    fn safety_parameters_get_weighted_visits() {
        let mut schedule = PollSchedule::new(
            vec![
                spec("rpm", PollClass::Safety),
                spec("fuel", PollClass::Comfort),
                spec("coolant", PollClass::Comfort),
            ],
            3,
        );

        let mut rpm = 0;
        let mut fuel = 0;
        let mut coolant = 0;
        for _ in 0..schedule.cycle_len() {
            match schedule.next().unwrap().id.as_str() {
                "rpm" => rpm += 1,
                "fuel" => fuel += 1,
                "coolant" => coolant += 1,
                other => panic!("unexpected parameter {other}"),
            }
        }

        assert_eq!(rpm, 3);
        assert_eq!(fuel, 1);
        assert_eq!(coolant, 1);
    }

    #[test]
    fn comfort_polls_are_spread_between_safety_polls() {
        let mut schedule = PollSchedule::new(
            vec![
                spec("rpm", PollClass::Safety),
                spec("fuel", PollClass::Comfort),
                spec("coolant", PollClass::Comfort),
                spec("oil", PollClass::Comfort),
            ],
            2,
        );

        let order: Vec<String> = (0..schedule.cycle_len())
            .map(|_| schedule.next().unwrap().id.clone())
            .collect();
        // Rounds alternate: every round starts with the safety parameter
        assert_eq!(order, vec!["rpm", "fuel", "oil", "rpm", "coolant"]);
    }

    #[test]
    fn empty_table_yields_nothing() {
        let mut schedule = PollSchedule::new(Vec::new(), 3);
        assert!(schedule.next().is_none());
    }

    #[test]
    fn schedule_wraps_around() {
        let mut schedule = PollSchedule::new(vec![spec("rpm", PollClass::Safety)], 1);
        assert_eq!(schedule.next().unwrap().id, "rpm");
        assert_eq!(schedule.next().unwrap().id, "rpm");
    }
}
