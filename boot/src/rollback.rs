//! Hardware rollback-protection counters (spec §6).
//!
//! The engine never assumes a particular non-volatile counter backend;
//! platforms implement [`RollbackPolicy`] over whatever one-time-
//! programmable or monotonic-counter peripheral they have.

use crate::error::Result;

/// Per-image monotonic security counter, with an optional one-way lock
/// so a confirmed image's counter floor cannot be lowered again (spec
/// §4.7 step 5: "update rollback-protection counters monotonically and
/// (if supported) lock them").
pub trait RollbackPolicy {
    /// Current counter floor for `image_index`. A candidate image's
    /// security-counter TLV must be `>=` this value.
    fn counter(&self, image_index: u8) -> Result<u32>;

    /// Raise the stored counter. Implementations must reject attempts
    /// to lower it.
    fn set_counter(&mut self, image_index: u8, value: u32) -> Result<()>;

    /// Prevent further increases until the next power cycle, on
    /// platforms that support it. The default is a no-op.
    fn lock(&mut self, image_index: u8) -> Result<()> {
        let _ = image_index;
        Ok(())
    }
}

/// A [`RollbackPolicy`] with no hardware backing: counters always read
/// zero and writes are accepted but not retained. Suitable for the
/// hosted simulator and for platforms that do not enable hardware
/// rollback protection.
#[derive(Debug, Default)]
pub struct NoRollback;

impl RollbackPolicy for NoRollback {
    fn counter(&self, _image_index: u8) -> Result<u32> {
        Ok(0)
    }

    fn set_counter(&mut self, _image_index: u8, _value: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rollback_always_permits() {
        let r = NoRollback;
        assert_eq!(r.counter(0).unwrap(), 0);
    }
}
