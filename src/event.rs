//! Event registration primitives for the connection driver.
//!
//! Two kinds of event reactivate a connection: readiness of its socket, and
//! a manual wake raised by the query engine when a deferred result becomes
//! available. [`NetworkEvent`] records what the socket registration currently
//! asks for (the driver consults it before sleeping); [`WakeEvent`] is an
//! FD-less event any thread may raise.

use std::sync::Arc;

use tokio::io::Interest;
use tokio::sync::Notify;

/// Readiness interest mask for a socket registration.
///
/// `PERSIST` keeps the registration armed across deliveries, matching the
/// level-triggered wait the driver performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const READ: EventMask = EventMask(0b001);
    pub const WRITE: EventMask = EventMask(0b010);
    pub const PERSIST: EventMask = EventMask(0b100);

    pub const READ_PERSIST: EventMask = EventMask(0b101);
    pub const WRITE_PERSIST: EventMask = EventMask(0b110);

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// The tokio readiness interest equivalent to this mask.
    pub fn interest(self) -> Interest {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            // default to read interest for an empty mask; the driver never
            // arms one
            _ => Interest::READABLE,
        }
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// Registration state binding a socket to the driver's readiness wait.
///
/// Arm/disarm stands in for event-loop register/unregister: a disarmed
/// event means the driver will not wake for socket readiness at all, which
/// is exactly the WAIT_RESULT requirement.
#[derive(Debug)]
pub struct NetworkEvent {
    mask: EventMask,
    armed: bool,
}

impl NetworkEvent {
    pub fn new() -> Self {
        Self {
            mask: EventMask::READ_PERSIST,
            armed: false,
        }
    }

    /// Re-registers with a new mask.
    pub fn rearm(&mut self, mask: EventMask) {
        self.mask = mask;
        self.armed = true;
    }

    /// Unregisters; the driver stops waking for socket readiness.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }
}

impl Default for NetworkEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// A manual event: raised programmatically, not bound to any FD.
///
/// The query engine holds a clone as an opaque completion token; `raise`
/// before `wait` is not lost (the permit is stored), so completion racing
/// ahead of the driver entering WAIT_RESULT is safe.
#[derive(Debug)]
pub struct WakeEvent {
    notify: Notify,
}

impl WakeEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
        })
    }

    /// Raises the event. Callable from any thread.
    pub fn raise(&self) {
        self.notify.notify_one();
    }

    /// Waits for the event on the owning driver.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_bits() {
        let mask = EventMask::READ | EventMask::PERSIST;
        assert!(mask.contains(EventMask::READ));
        assert!(mask.contains(EventMask::PERSIST));
        assert!(!mask.contains(EventMask::WRITE));
        assert_eq!(mask, EventMask::READ_PERSIST);
    }

    #[test]
    fn test_rearm_replaces_mask() {
        let mut ev = NetworkEvent::new();
        assert!(!ev.is_armed());

        ev.rearm(EventMask::READ_PERSIST);
        assert!(ev.is_armed());
        assert!(ev.mask().contains(EventMask::READ));

        ev.rearm(EventMask::WRITE_PERSIST);
        assert!(ev.mask().contains(EventMask::WRITE));
        assert!(!ev.mask().contains(EventMask::READ));

        ev.disarm();
        assert!(!ev.is_armed());
    }

    #[tokio::test]
    async fn test_wake_raised_before_wait_is_not_lost() {
        let wake = WakeEvent::new();
        wake.raise();
        // must complete immediately thanks to the stored permit
        wake.wait().await;
    }

    #[tokio::test]
    async fn test_wake_from_another_task() {
        let wake = WakeEvent::new();
        let raiser = wake.clone();
        tokio::spawn(async move {
            raiser.raise();
        });
        wake.wait().await;
    }
}
