//! IdGenerator port - message id generation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID from the injected [`Clock`] plus random bits

use crate::domain::MessageId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator produces ids for outbound messages.
///
/// # Thread Safety
/// - `Send + Sync` so one generator can be shared by every publisher call
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;
}

/// UlidGenerator builds ULIDs whose timestamp part comes from the clock.
///
/// With a `FixedClock` the timestamp part is deterministic while the random
/// part still keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        MessageId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_message_id();
        let id2 = id_gen.generate_message_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn ulid_generator_uses_clock_for_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_message_id();
        let id2 = id_gen.generate_message_id();

        let expected_ms = fixed_time.timestamp_millis() as u64;
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), expected_ms);
        assert_eq!(id2.as_ulid().timestamp_ms(), expected_ms);
    }
}
