use crate::{models::Priority, Error};
use std::{collections::BTreeMap, time::Duration};

/// Sends High events every second, Normal every 2 and Low every 4.
pub const REAL_TIME: &str = "REAL_TIME";
/// Sends High events every 3 seconds, Normal every 6 and Low every 12.
pub const NEAR_REAL_TIME: &str = "NEAR_REAL_TIME";
/// Sends High events every 9 seconds, Normal every 18 and Low every 36.
pub const BEST_EFFORT: &str = "BEST_EFFORT";

const BUILT_IN: [(&str, [i64; 3]); 3] = [
    (REAL_TIME, [4, 2, 1]),
    (NEAR_REAL_TIME, [12, 6, 3]),
    (BEST_EFFORT, [36, 18, 9]),
];

/// Upload intervals in seconds per priority. `None` means the priority is not sent by the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransmitProfile {
    pub(crate) low: Option<u64>,
    pub(crate) normal: Option<u64>,
    pub(crate) high: Option<u64>,
}

impl TransmitProfile {
    /// Build a profile from `[low, normal, high]` seconds.
    ///
    /// `-1` turns a priority and every lower one off. Timers are rounded up to a multiple of
    /// the next higher timer. Returns `None` for zero or anything below `-1`.
    pub(crate) fn from_timers([low, normal, high]: [i64; 3]) -> Option<Self> {
        if [low, normal, high].iter().any(|t| *t == 0 || *t < -1) {
            return None;
        }
        let enabled = |t: i64| u64::try_from(t).ok();
        let high = enabled(high);
        let normal = high.and_then(|h| enabled(normal).map(|n| round_up(n, h)));
        let low = normal.and_then(|n| enabled(low).map(|l| round_up(l, n)));
        Some(TransmitProfile { low, normal, high })
    }

    /// Interval of the scheduler timer before backoff.
    pub(crate) fn high_interval(&self) -> Option<Duration> {
        self.high.map(Duration::from_secs)
    }

    /// Lowest priority flushed at the given timer tick, counting from 1.
    ///
    /// Returns the priority and whether the tick counter starts over.
    pub(crate) fn priority_for_tick(&self, tick: u64) -> Option<(Priority, bool)> {
        let high = self.high?;
        let elapsed = tick.saturating_mul(high);
        match (self.low, self.normal) {
            (Some(low), _) if elapsed >= low => Some((Priority::Low, true)),
            (_, Some(normal)) if elapsed % normal == 0 => Some((Priority::Normal, false)),
            _ => Some((Priority::High, false)),
        }
    }
}

fn round_up(value: u64, multiple_of: u64) -> u64 {
    value.div_ceil(multiple_of) * multiple_of
}

/// Named transmit profiles with one active at a time.
#[derive(Debug, Clone)]
pub(crate) struct TransmitProfiles {
    profiles: BTreeMap<String, TransmitProfile>,
    current: String,
}

impl Default for TransmitProfiles {
    fn default() -> Self {
        let profiles = BUILT_IN
            .iter()
            .filter_map(|(name, timers)| {
                TransmitProfile::from_timers(*timers).map(|p| (name.to_string(), p))
            })
            .collect();
        TransmitProfiles {
            profiles,
            current: REAL_TIME.to_string(),
        }
    }
}

impl TransmitProfiles {
    pub(crate) fn current(&self) -> TransmitProfile {
        self.profiles
            .get(&self.current)
            .copied()
            .unwrap_or(TransmitProfile {
                low: Some(4),
                normal: Some(2),
                high: Some(1),
            })
    }

    pub(crate) fn current_name(&self) -> &str {
        &self.current
    }

    /// Switch to the named profile. Unknown names leave the active profile unchanged.
    pub(crate) fn set(&mut self, name: &str) -> bool {
        if !self.profiles.contains_key(name) {
            return false;
        }
        self.current = name.to_string();
        true
    }

    /// Add custom profiles of `[low, normal, high]` seconds.
    ///
    /// Valid profiles are added even if others are rejected. Built-in profiles cannot be
    /// replaced.
    pub(crate) fn load(&mut self, profiles: BTreeMap<String, [i64; 3]>) -> Result<(), Error> {
        let mut invalid = Vec::new();
        for (name, timers) in profiles {
            let built_in = BUILT_IN.iter().any(|(n, _)| *n == name);
            match TransmitProfile::from_timers(timers) {
                Some(profile) if !built_in && !name.is_empty() => {
                    self.profiles.insert(name, profile);
                }
                _ => invalid.push(name),
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            tracing::warn!(?invalid, "skipping invalid transmit profiles");
            Err(Error::InvalidTransmitProfiles(invalid))
        }
    }

    /// Same as [`load`](Self::load) with profiles given as a JSON object of name to
    /// `[low, normal, high]`.
    pub(crate) fn load_json(&mut self, json: &str) -> Result<(), Error> {
        let profiles = serde_json::from_str(json).map_err(Error::DeserializeTransmitProfiles)?;
        self.load(profiles)
    }

    /// Remove custom profiles and activate [`REAL_TIME`].
    pub(crate) fn reset(&mut self) {
        *self = TransmitProfiles::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case([4, 2, 1], Some((Some(4), Some(2), Some(1))) ; "real time")]
    #[test_case([10, 3, 2], Some((Some(12), Some(4), Some(2))) ; "rounded up")]
    #[test_case([-1, 5, 2], Some((None, Some(6), Some(2))) ; "low off")]
    #[test_case([30, -1, 2], Some((None, None, Some(2))) ; "normal off turns low off")]
    #[test_case([30, 10, -1], Some((None, None, None)) ; "all off")]
    #[test_case([4, 0, 1], None ; "zero")]
    #[test_case([4, 2, -2], None ; "below minus one")]
    fn from_timers(timers: [i64; 3], expected: Option<(Option<u64>, Option<u64>, Option<u64>)>) {
        let profile = TransmitProfile::from_timers(timers);
        assert_eq!(expected, profile.map(|p| (p.low, p.normal, p.high)));
    }

    #[test]
    fn near_real_time_cadence() {
        let profile = TransmitProfile::from_timers([12, 6, 3]).unwrap();
        let cadence: Vec<_> = (1..=4)
            .map(|tick| profile.priority_for_tick(tick).unwrap())
            .collect();
        assert_eq!(
            vec![
                (Priority::High, false),
                (Priority::Normal, false),
                (Priority::High, false),
                (Priority::Low, true),
            ],
            cadence
        );
    }

    #[test]
    fn disabled_profile_has_no_ticks() {
        let profile = TransmitProfile::from_timers([-1, -1, -1]).unwrap();
        assert_eq!(None, profile.priority_for_tick(1));
        assert_eq!(None, profile.high_interval());
    }

    #[test]
    fn load_set_and_reset() {
        let mut profiles = TransmitProfiles::default();
        assert_eq!(REAL_TIME, profiles.current_name());
        assert!(!profiles.set("CUSTOM"));

        let result = profiles.load(BTreeMap::from([
            ("CUSTOM".to_string(), [20, 10, 5]),
            ("BROKEN".to_string(), [20, 0, 5]),
            (REAL_TIME.to_string(), [8, 4, 2]),
        ]));
        match result {
            Err(Error::InvalidTransmitProfiles(names)) => {
                assert_eq!(vec!["BROKEN".to_string(), REAL_TIME.to_string()], names)
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(profiles.set("CUSTOM"));
        assert_eq!(Some(5), profiles.current().high);
        assert!(!profiles.set("BROKEN"));

        profiles.reset();
        assert_eq!(REAL_TIME, profiles.current_name());
        assert!(!profiles.set("CUSTOM"));
    }

    #[test]
    fn load_json() {
        let mut profiles = TransmitProfiles::default();
        profiles
            .load_json(r#"{"SLOW": [120, 60, 30]}"#)
            .expect("valid profiles");
        assert!(profiles.set("SLOW"));
        assert_eq!(Some(120), profiles.current().low);

        assert!(matches!(
            profiles.load_json("[1, 2]"),
            Err(Error::DeserializeTransmitProfiles(_))
        ));
    }
}
