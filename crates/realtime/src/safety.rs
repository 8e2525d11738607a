use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde::Deserialize;
use utility::geo;

pub const MAX_ACCURACY_M: f64 = 100.0;
pub const MAX_SPEED_KMH: f64 = 120.0;
/// Server-side throttle; the driver client already rate-limits itself.
pub const MIN_UPDATE_INTERVAL_MS: i64 = 2000;
pub const MAX_JUMP_M: f64 = 500.0;

/// The raw `driver:location:update` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub passenger_count: Option<i64>,
}

struct SafetyRecord {
    latitude: f64,
    longitude: f64,
    last_update_ms: i64,
}

/// Per-driver plausibility gate in front of every location write. History
/// is keyed by driver and reset on disconnect, so a reconnecting client
/// replaying its offline buffer is never punished for the gap.
#[derive(Default)]
pub struct SafetyValidator {
    history: Mutex<HashMap<String, SafetyRecord>>,
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SafetyRecord>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Checks one update. `Err` carries the rejection reason for logging
    /// and the `location:rejected` reply; accepted updates advance the
    /// driver's history.
    pub fn validate(
        &self,
        driver_id: &str,
        update: &LocationUpdate,
        now_ms: i64,
    ) -> Result<(), String> {
        if !update.latitude.is_finite()
            || !update.longitude.is_finite()
            || !(-90.0..=90.0).contains(&update.latitude)
            || !(-180.0..=180.0).contains(&update.longitude)
        {
            return Err("coordinates out of range".to_owned());
        }
        if let Some(accuracy) = update.accuracy {
            if !accuracy.is_finite() || accuracy > MAX_ACCURACY_M {
                return Err(format!("GPS accuracy {accuracy:.0}m above limit"));
            }
        }
        if let Some(speed) = update.speed {
            if !speed.is_finite() || speed > MAX_SPEED_KMH {
                return Err(format!("speed {speed:.0} km/h above limit"));
            }
        }
        if let Some(count) = update.passenger_count {
            if count < 0 {
                return Err("negative passenger count".to_owned());
            }
        }

        let mut history = self.lock();
        if let Some(record) = history.get(driver_id) {
            if now_ms - record.last_update_ms < MIN_UPDATE_INTERVAL_MS {
                return Err("updates throttled to one per 2s".to_owned());
            }
            let jump_m = geo::haversine_distance(
                record.latitude,
                record.longitude,
                update.latitude,
                update.longitude,
            ) * 1000.0;
            if jump_m > MAX_JUMP_M {
                return Err(format!("position jump of {jump_m:.0}m rejected"));
            }
        }
        history.insert(
            driver_id.to_owned(),
            SafetyRecord {
                latitude: update.latitude,
                longitude: update.longitude,
                last_update_ms: now_ms,
            },
        );
        Ok(())
    }

    pub fn last_accepted(&self, driver_id: &str) -> Option<(f64, f64)> {
        self.lock()
            .get(driver_id)
            .map(|record| (record.latitude, record.longitude))
    }

    /// Forgets the driver's history; called on disconnect so buffered
    /// replays are judged fresh.
    pub fn clear(&self, driver_id: &str) {
        self.lock().remove(driver_id);
    }

    pub fn tracked_drivers(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(latitude: f64, longitude: f64) -> LocationUpdate {
        LocationUpdate {
            bus_id: "b1".to_owned(),
            latitude,
            longitude,
            speed: Some(30.0),
            heading: None,
            accuracy: Some(10.0),
            passenger_count: Some(12),
        }
    }

    #[test]
    fn accepts_a_clean_update() {
        let validator = SafetyValidator::new();
        assert!(validator.validate("d1", &update(17.385, 78.486), 10_000).is_ok());
        assert!(validator.last_accepted("d1").is_some());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let validator = SafetyValidator::new();
        assert!(validator.validate("d1", &update(91.0, 78.0), 0).is_err());
        assert!(validator.validate("d1", &update(17.0, 181.0), 0).is_err());
        assert!(validator.validate("d1", &update(f64::NAN, 78.0), 0).is_err());
        assert!(validator.last_accepted("d1").is_none());
    }

    #[test]
    fn rejects_poor_accuracy_and_excess_speed() {
        let validator = SafetyValidator::new();
        let mut bad_accuracy = update(17.0, 78.0);
        bad_accuracy.accuracy = Some(150.0);
        assert!(validator.validate("d1", &bad_accuracy, 0).is_err());

        let mut too_fast = update(17.0, 78.0);
        too_fast.speed = Some(130.0);
        assert!(validator.validate("d1", &too_fast, 0).is_err());
    }

    #[test]
    fn throttles_rapid_updates() {
        let validator = SafetyValidator::new();
        assert!(validator.validate("d1", &update(17.0, 78.0), 10_000).is_ok());
        assert!(validator.validate("d1", &update(17.0001, 78.0), 11_000).is_err());
        assert!(validator.validate("d1", &update(17.0001, 78.0), 12_000).is_ok());
    }

    #[test]
    fn rejects_teleport_jumps() {
        let validator = SafetyValidator::new();
        assert!(validator.validate("d1", &update(17.0, 78.0), 10_000).is_ok());
        // ~1.1 km jump two seconds later
        let jumped = validator.validate("d1", &update(17.01, 78.0), 12_500);
        assert!(jumped.is_err());
        // history still points at the last accepted position
        let (latitude, _) = validator.last_accepted("d1").unwrap();
        assert_eq!(latitude, 17.0);
    }

    #[test]
    fn rejects_negative_passenger_count() {
        let validator = SafetyValidator::new();
        let mut bad = update(17.0, 78.0);
        bad.passenger_count = Some(-1);
        assert!(validator.validate("d1", &bad, 0).is_err());
    }

    #[test]
    fn clear_makes_replay_safe_after_disconnect() {
        let validator = SafetyValidator::new();
        assert!(validator.validate("d1", &update(17.0, 78.0), 10_000).is_ok());
        validator.clear("d1");
        // far away and soon after, but history is gone: accepted
        assert!(validator.validate("d1", &update(17.2, 78.2), 10_500).is_ok());
    }

    #[test]
    fn accepted_invariants() {
        let validator = SafetyValidator::new();
        let mut now = 0;
        let mut last: Option<(f64, f64)> = None;
        for i in 0..20 {
            now += 2_100;
            let point = update(17.0 + i as f64 * 0.003, 78.0);
            if validator.validate("d1", &point, now).is_ok() {
                if let Some((lat, lng)) = last {
                    let dist = geo::haversine_distance(lat, lng, point.latitude, point.longitude);
                    assert!(dist * 1000.0 <= MAX_JUMP_M);
                }
                last = Some((point.latitude, point.longitude));
            }
        }
    }
}
