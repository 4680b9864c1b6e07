//! Policy-selected counters and flags.
//!
//! Every tracker in this crate is generic over a [`ThreadPolicy`], which picks
//! the concrete [`Counter`] and [`Flag`] implementations at compile time:
//!
//! - [`NoSync`]: plain `Cell` storage. The types are `!Sync`, so the compiler
//!   refuses to share them across threads.
//! - [`StdAtomic`]: `AtomicU64`/`AtomicBool` with acquire loads, release
//!   stores and acquire-release read-modify-write operations.
//! - [`CustomAtomic`]: reserved policy tag; delegates to the std atomics.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Thread-safety policy tag carried by a configuration descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSafetyPolicy {
    /// No cross-thread guarantees. Single-threaded configurations only.
    None,
    /// Standard atomics.
    #[default]
    Atomic,
    /// Platform-specific atomics. Currently identical to `Atomic`.
    CustomAtomic,
}

impl ThreadSafetyPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" | "single" | "unsync" => Self::None,
            "custom" | "custom_atomic" | "custom-atomic" => Self::CustomAtomic,
            _ => Self::Atomic,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Atomic => "atomic",
            Self::CustomAtomic => "custom_atomic",
        }
    }

    /// Returns true if counters built under this policy may be shared.
    #[must_use]
    pub const fn is_thread_safe(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Numeric cell with the full counter vocabulary.
///
/// `increment`/`decrement`/`add`/`sub` return the new value; the `post*`
/// forms return the value observed before the update. Arithmetic wraps.
pub trait Counter {
    fn new(initial: u64) -> Self;
    fn get(&self) -> u64;
    fn set(&self, value: u64);
    fn increment(&self) -> u64;
    fn decrement(&self) -> u64;
    fn postincrement(&self) -> u64;
    fn postdecrement(&self) -> u64;
    fn add(&self, value: u64) -> u64;
    fn sub(&self, value: u64) -> u64;
    fn postadd(&self, value: u64) -> u64;
    fn postsub(&self, value: u64) -> u64;
    /// Store `value` iff it is greater than the current value. Returns the
    /// value stored after the call. Never lowers the stored value.
    fn exchange_if_greater(&self, value: u64) -> u64;
    /// Increment only if the current value is non-zero. Returns 0 when the
    /// precondition fails, otherwise the incremented value.
    fn conditional_increment(&self) -> u64;
    /// Subtract, clamping at zero. Returns the new value.
    fn saturating_sub(&self, value: u64) -> u64;
}

/// Boolean cell.
pub trait Flag {
    fn new(initial: bool) -> Self;
    fn set(&self);
    fn clear(&self);
    fn is_set(&self) -> bool;
    /// Set the flag and return its previous state.
    fn test_and_set(&self) -> bool;
}

/// Compile-time selection of counter and flag implementations.
pub trait ThreadPolicy: 'static {
    type Counter: Counter;
    type Flag: Flag;
    const POLICY: ThreadSafetyPolicy;
}

/// Single-threaded policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSync;

/// Standard atomic policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdAtomic;

/// Custom atomic policy; shares the std atomic implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomAtomic;

impl ThreadPolicy for NoSync {
    type Counter = UnsyncCounter;
    type Flag = UnsyncFlag;
    const POLICY: ThreadSafetyPolicy = ThreadSafetyPolicy::None;
}

impl ThreadPolicy for StdAtomic {
    type Counter = AtomicCounter;
    type Flag = AtomicFlag;
    const POLICY: ThreadSafetyPolicy = ThreadSafetyPolicy::Atomic;
}

impl ThreadPolicy for CustomAtomic {
    type Counter = AtomicCounter;
    type Flag = AtomicFlag;
    const POLICY: ThreadSafetyPolicy = ThreadSafetyPolicy::CustomAtomic;
}

// ---------------------------------------------------------------------------
// Unsynchronized
// ---------------------------------------------------------------------------

/// Counter without any cross-thread guarantee.
#[derive(Debug, Default)]
pub struct UnsyncCounter {
    value: Cell<u64>,
}

impl UnsyncCounter {
    fn update(&self, f: impl FnOnce(u64) -> u64) -> (u64, u64) {
        let old = self.value.get();
        let new = f(old);
        self.value.set(new);
        (old, new)
    }
}

impl Counter for UnsyncCounter {
    fn new(initial: u64) -> Self {
        Self {
            value: Cell::new(initial),
        }
    }

    fn get(&self) -> u64 {
        self.value.get()
    }

    fn set(&self, value: u64) {
        self.value.set(value);
    }

    fn increment(&self) -> u64 {
        self.update(|v| v.wrapping_add(1)).1
    }

    fn decrement(&self) -> u64 {
        self.update(|v| v.wrapping_sub(1)).1
    }

    fn postincrement(&self) -> u64 {
        self.update(|v| v.wrapping_add(1)).0
    }

    fn postdecrement(&self) -> u64 {
        self.update(|v| v.wrapping_sub(1)).0
    }

    fn add(&self, value: u64) -> u64 {
        self.update(|v| v.wrapping_add(value)).1
    }

    fn sub(&self, value: u64) -> u64 {
        self.update(|v| v.wrapping_sub(value)).1
    }

    fn postadd(&self, value: u64) -> u64 {
        self.update(|v| v.wrapping_add(value)).0
    }

    fn postsub(&self, value: u64) -> u64 {
        self.update(|v| v.wrapping_sub(value)).0
    }

    fn exchange_if_greater(&self, value: u64) -> u64 {
        self.update(|v| v.max(value)).1
    }

    fn conditional_increment(&self) -> u64 {
        match self.value.get() {
            0 => 0,
            _ => self.increment(),
        }
    }

    fn saturating_sub(&self, value: u64) -> u64 {
        self.update(|v| v.saturating_sub(value)).1
    }
}

/// Flag without any cross-thread guarantee.
#[derive(Debug, Default)]
pub struct UnsyncFlag {
    value: Cell<bool>,
}

impl Flag for UnsyncFlag {
    fn new(initial: bool) -> Self {
        Self {
            value: Cell::new(initial),
        }
    }

    fn set(&self) {
        self.value.set(true);
    }

    fn clear(&self) {
        self.value.set(false);
    }

    fn is_set(&self) -> bool {
        self.value.get()
    }

    fn test_and_set(&self) -> bool {
        self.value.replace(true)
    }
}

// ---------------------------------------------------------------------------
// Atomic
// ---------------------------------------------------------------------------

/// Counter backed by `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    /// Const constructor for use in statics.
    #[must_use]
    pub const fn const_new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// CAS retry loop applying `f` until it either declines (returns `None`)
    /// or the swap lands. Returns the value observed by the final attempt.
    fn update_with(&self, f: impl FnMut(u64) -> Option<u64>) -> Result<u64, u64> {
        self.value.fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
    }
}

impl Counter for AtomicCounter {
    fn new(initial: u64) -> Self {
        Self::const_new(initial)
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    fn decrement(&self) -> u64 {
        self.value.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }

    fn postincrement(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel)
    }

    fn postdecrement(&self) -> u64 {
        self.value.fetch_sub(1, Ordering::AcqRel)
    }

    fn add(&self, value: u64) -> u64 {
        self.value.fetch_add(value, Ordering::AcqRel).wrapping_add(value)
    }

    fn sub(&self, value: u64) -> u64 {
        self.value.fetch_sub(value, Ordering::AcqRel).wrapping_sub(value)
    }

    fn postadd(&self, value: u64) -> u64 {
        self.value.fetch_add(value, Ordering::AcqRel)
    }

    fn postsub(&self, value: u64) -> u64 {
        self.value.fetch_sub(value, Ordering::AcqRel)
    }

    fn exchange_if_greater(&self, value: u64) -> u64 {
        match self.update_with(|current| (value > current).then_some(value)) {
            Ok(_) => value,
            Err(current) => current,
        }
    }

    fn conditional_increment(&self) -> u64 {
        match self.update_with(|current| (current != 0).then(|| current.wrapping_add(1))) {
            Ok(previous) => previous.wrapping_add(1),
            Err(_) => 0,
        }
    }

    fn saturating_sub(&self, value: u64) -> u64 {
        match self.update_with(|current| Some(current.saturating_sub(value))) {
            Ok(previous) => previous.saturating_sub(value),
            Err(current) => current,
        }
    }
}

/// Flag backed by `AtomicBool`.
#[derive(Debug, Default)]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    /// Const constructor for use in statics.
    #[must_use]
    pub const fn const_new(initial: bool) -> Self {
        Self {
            value: AtomicBool::new(initial),
        }
    }
}

impl Flag for AtomicFlag {
    fn new(initial: bool) -> Self {
        Self::const_new(initial)
    }

    fn set(&self) {
        self.value.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.value.store(false, Ordering::Release);
    }

    fn is_set(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    fn test_and_set(&self) -> bool {
        self.value.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_counter<C: Counter>() {
        let c = C::new(5);
        assert_eq!(c.get(), 5);
        assert_eq!(c.increment(), 6);
        assert_eq!(c.postincrement(), 6);
        assert_eq!(c.get(), 7);
        assert_eq!(c.decrement(), 6);
        assert_eq!(c.postdecrement(), 6);
        assert_eq!(c.get(), 5);
        assert_eq!(c.add(10), 15);
        assert_eq!(c.postadd(5), 15);
        assert_eq!(c.sub(10), 10);
        assert_eq!(c.postsub(4), 10);
        assert_eq!(c.get(), 6);
        c.set(42);
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn unsync_counter_arithmetic() {
        exercise_counter::<UnsyncCounter>();
    }

    #[test]
    fn atomic_counter_arithmetic() {
        exercise_counter::<AtomicCounter>();
    }

    #[test]
    fn exchange_if_greater_never_lowers() {
        let c = AtomicCounter::new(10);
        assert_eq!(c.exchange_if_greater(5), 10);
        assert_eq!(c.get(), 10);
        assert_eq!(c.exchange_if_greater(20), 20);
        assert_eq!(c.exchange_if_greater(20), 20);

        let u = UnsyncCounter::new(10);
        assert_eq!(u.exchange_if_greater(3), 10);
        assert_eq!(u.exchange_if_greater(11), 11);
    }

    #[test]
    fn conditional_increment_requires_nonzero() {
        let c = AtomicCounter::new(0);
        assert_eq!(c.conditional_increment(), 0);
        assert_eq!(c.get(), 0);
        c.set(3);
        assert_eq!(c.conditional_increment(), 4);

        let u = UnsyncCounter::new(0);
        assert_eq!(u.conditional_increment(), 0);
        u.set(1);
        assert_eq!(u.conditional_increment(), 2);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let c = AtomicCounter::new(7);
        assert_eq!(c.saturating_sub(10), 0);
        assert_eq!(c.get(), 0);
        let u = UnsyncCounter::new(7);
        assert_eq!(u.saturating_sub(2), 5);
        assert_eq!(u.saturating_sub(9), 0);
    }

    #[test]
    fn flags_test_and_set() {
        let f = AtomicFlag::new(false);
        assert!(!f.test_and_set());
        assert!(f.test_and_set());
        f.clear();
        assert!(!f.is_set());

        let u = UnsyncFlag::new(true);
        assert!(u.is_set());
        u.clear();
        assert!(!u.test_and_set());
        assert!(u.is_set());
    }

    #[test]
    fn policy_tags_match_markers() {
        assert_eq!(NoSync::POLICY, ThreadSafetyPolicy::None);
        assert_eq!(StdAtomic::POLICY, ThreadSafetyPolicy::Atomic);
        assert_eq!(CustomAtomic::POLICY, ThreadSafetyPolicy::CustomAtomic);
        assert!(!ThreadSafetyPolicy::None.is_thread_safe());
        assert_eq!(
            ThreadSafetyPolicy::from_str_loose("CUSTOM"),
            ThreadSafetyPolicy::CustomAtomic
        );
    }
}
