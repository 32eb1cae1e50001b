//! Push-style transaction identifiers.
//!
//! A push id is 20 characters long: 8 characters encode the millisecond
//! timestamp and 12 characters are random. Ids produced by one generator
//! within the same millisecond increment the random suffix instead of
//! drawing a new one, so they sort lexicographically in generation order.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Alphabet ordered by ASCII value so ids compare correctly as strings.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// Length of every generated id.
pub const PUSH_ID_LEN: usize = TIMESTAMP_LEN + RANDOM_LEN;

#[derive(Debug)]
struct GeneratorState {
    last_time: u64,
    last_random: [u8; RANDOM_LEN],
}

/// Generates process-unique, time-ordered string identifiers.
#[derive(Debug)]
pub struct PushId {
    state: Mutex<GeneratorState>,
}

impl PushId {
    /// Creates a new generator.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_time: 0,
                last_random: [0; RANDOM_LEN],
            }),
        }
    }

    /// Returns the process-wide generator.
    pub fn global() -> &'static PushId {
        static GLOBAL: OnceLock<PushId> = OnceLock::new();
        GLOBAL.get_or_init(PushId::new)
    }

    /// Generates a new id.
    pub fn make(&self) -> String {
        self.make_at(now_millis())
    }

    /// Generates an id for the given millisecond timestamp.
    ///
    /// A timestamp earlier than the last one seen is clamped forward so the
    /// generator never emits an id that sorts before a previous one.
    pub fn make_at(&self, millis: u64) -> String {
        let mut state = self.state.lock();
        let now = millis.max(state.last_time);

        if now == state.last_time && state.last_time != 0 {
            increment(&mut state.last_random);
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }
        state.last_time = now;

        let mut id = Vec::with_capacity(PUSH_ID_LEN);
        let mut stamp = [0u8; TIMESTAMP_LEN];
        let mut remaining = now;
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        id.extend_from_slice(&stamp);
        id.extend(state.last_random.iter().map(|&c| PUSH_CHARS[c as usize]));

        // PUSH_CHARS is pure ASCII.
        id.into_iter().map(char::from).collect()
    }
}

impl Default for PushId {
    fn default() -> Self {
        Self::new()
    }
}

fn increment(random: &mut [u8; RANDOM_LEN]) {
    for slot in random.iter_mut().rev() {
        if *slot == 63 {
            *slot = 0;
        } else {
            *slot += 1;
            return;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_have_fixed_length() {
        let id = PushId::new().make();
        assert_eq!(id.len(), PUSH_ID_LEN);
        assert!(id.bytes().all(|b| PUSH_CHARS.contains(&b)));
    }

    #[test]
    fn same_millisecond_ids_are_ordered() {
        let generator = PushId::new();
        let ids: Vec<String> = (0..500).map(|_| generator.make_at(1_700_000_000_000)).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn clock_regression_does_not_reorder() {
        let generator = PushId::new();
        let later = generator.make_at(2_000);
        let earlier = generator.make_at(1_000);
        assert!(earlier > later);
    }

    #[test]
    fn increment_carries() {
        let mut random = [0u8; RANDOM_LEN];
        random[RANDOM_LEN - 1] = 63;
        increment(&mut random);
        assert_eq!(random[RANDOM_LEN - 1], 0);
        assert_eq!(random[RANDOM_LEN - 2], 1);
    }

    #[test]
    fn global_generator_is_shared() {
        let a = PushId::global().make();
        let b = PushId::global().make();
        assert_ne!(a, b);
    }
}
