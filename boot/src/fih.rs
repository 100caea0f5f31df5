//! Fault-injection hardening primitives (spec §9).
//!
//! These are deliberately not elided by composing a plain `bool`: every
//! high-consequence decision in `validator` and `bootloader` is threaded
//! through [`FihInt`] so a single skipped instruction that would flip a
//! `bool` result has to also produce a value that still validates as the
//! doubled representation of the same outcome.
//!
//! Grounded on
//! `original_source/boot/bootutil/include/bootutil/fault_injection_hardening.h`.
//! `FIH_ENABLE_DOUBLE_VARS`, `FIH_ENABLE_CFI` and `FIH_ENABLE_DELAY` map to
//! this crate's `fih-medium` and `fih-high` features (`fih-low` gets the
//! CFI counter only, matching `MCUBOOT_FIH_PROFILE_LOW`).

const MASK: i32 = 0xA5C3_5A3Cu32 as i32;

const POSITIVE: i32 = 0x5555_AAAA;
const NEGATIVE: i32 = -0x5555_AAAB;

/// A value that carries its own corruption check: `val ^ msk` must equal
/// the fixed `MASK` constant, or the value has been tampered with (or
/// partially skipped by a fault).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FihInt {
    val: i32,
    msk: i32,
}

impl FihInt {
    pub const fn encode(x: i32) -> Self {
        FihInt { val: x, msk: x ^ MASK }
    }

    /// Decode back to a plain integer, panicking via [`Panic`](crate::error::Error::Panic)
    /// semantics (by returning `None`) if the doubled representation does
    /// not check out.
    pub fn decode(self) -> Option<i32> {
        if self.val ^ self.msk == MASK {
            Some(self.val)
        } else {
            None
        }
    }

    fn validate(self) -> bool {
        self.val ^ self.msk == MASK
    }
}

pub const FIH_SUCCESS: FihInt = FihInt::encode(POSITIVE);
pub const FIH_FAILURE: FihInt = FihInt::encode(NEGATIVE);

/// Randomised micro-delay source. Under `fih-high` a platform provides a
/// real one (typically backed by the hardware RNG); the default
/// implementation for `()` is a no-op, matching `FIH_ENABLE_DELAY` being
/// compiled out under lower profiles.
pub trait DelayRandom {
    fn delay(&mut self);
}

impl DelayRandom for () {
    fn delay(&mut self) {}
}

/// A delay source that spins a fixed, non-random number of volatile
/// iterations. Used when `fih-high` is not enabled but we still want the
/// "two evaluations separated in time" shape preserved, per spec §9.
#[derive(Default)]
pub struct SpinDelay;

impl DelayRandom for SpinDelay {
    fn delay(&mut self) {
        let mut counter: u32 = 0;
        for _ in 0..10u32 {
            counter = counter.wrapping_add(1);
            core::hint::black_box(&mut counter);
        }
    }
}

/// Compare two `FihInt`s for equality, validating both operands and
/// inserting a delay between the two halves of the comparison so a
/// single-instruction-skip attack aimed at the first half doesn't also
/// land on the second.
pub fn fih_eq(x: FihInt, y: FihInt, delay: &mut impl DelayRandom) -> bool {
    if !x.validate() || !y.validate() {
        return false;
    }
    let first = x.val == y.val;
    delay.delay();
    let second = x.msk == y.msk;
    first && second
}

pub fn fih_not_eq(x: FihInt, y: FihInt, delay: &mut impl DelayRandom) -> bool {
    !fih_eq(x, y, delay)
}

/// Evaluate a high-consequence boolean predicate twice, with a delay
/// between the two evaluations, and require both runs to agree before
/// treating the result as true. This is the "doubled variable" pattern
/// from spec §9 applied directly to a `bool`-producing check, for call
/// sites (e.g. "is this image valid?") where the check itself, not just
/// its encoding, is worth re-running.
pub fn double_checked(mut check: impl FnMut() -> bool, delay: &mut impl DelayRandom) -> FihInt {
    let first = check();
    delay.delay();
    let second = check();
    if first && second {
        FIH_SUCCESS
    } else {
        FIH_FAILURE
    }
}

/// Control-flow-integrity balance counter (spec §9's "CFI counter").
/// Incremented on entry to a sensitive function, decremented on return;
/// imbalance at the end of `boot_go` means some sensitive call was
/// skipped and is treated as a tampering attempt.
///
/// Lives as a field of the engine context (`BootLoader`), never as a
/// free-standing global, per spec §9 "Global mutable state".
#[derive(Debug, Default, Clone, Copy)]
pub struct Cfi {
    balance: i32,
}

impl Cfi {
    pub const fn new() -> Self {
        Cfi { balance: 0 }
    }

    pub fn enter(&mut self) {
        self.balance += 1;
    }

    pub fn exit(&mut self) {
        self.balance -= 1;
    }

    /// True once every `enter` has been matched by an `exit`.
    pub fn is_balanced(&self) -> bool {
        self.balance == 0
    }
}

/// Run a sensitive closure under CFI accounting, matching the
/// `FIH_CALL`/`FIH_RET` call pattern: `cfi.enter()` before, `cfi.exit()`
/// after, regardless of the closure's outcome.
pub fn cfi_call<T>(cfi: &mut Cfi, f: impl FnOnce() -> T) -> T {
    cfi.enter();
    let result = f();
    cfi.exit();
    result
}
