//! # Load/Unload Lifecycle
//!
//! The host owns one slot per loaded configuration and reports its events
//! here. `Load` allocates a fresh `Settings`; `Discard` drops it, which
//! destroys the pool exactly once.

use tracing::debug;

use crate::backend::CachePool;
use crate::settings::Settings;

/// Configuration lifecycle events raised by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The configuration was compiled and is about to be used.
    Load,
    /// The configuration became active.
    Warm,
    /// The configuration went idle but may come back.
    Cold,
    /// The configuration is being unloaded for good.
    Discard,
}

/// Applies a lifecycle event to the host-owned settings slot.
pub fn on_event<P: CachePool>(slot: &mut Option<Settings<P>>, event: Event) {
    match event {
        Event::Load => {
            // A slot is loaded once; a stale store is torn down first.
            if slot.replace(Settings::new()).is_some() {
                debug!(target: "mcb::config", "replaced settings from a previous load");
            }
        }
        Event::Discard => {
            if slot.take().is_some() {
                debug!(target: "mcb::config", "memcached settings discarded");
            }
        }
        Event::Warm | Event::Cold => {}
    }
}
