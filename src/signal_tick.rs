//! The signal-to-pipe tick bridge.
//!
//! A `SIGALRM` handler writes one byte to a self-pipe already registered
//! with the reactor's `Poll`, then `alarm(TIMESLOT)` is set again on every
//! tick to keep the cycle going. `signal-hook` plus `signal-hook-mio` do this
//! without a hand-rolled pipe and signal handler: the crate owns the
//! self-pipe and the async-signal-safe handler, and its `Signals` type
//! implements `mio::event::Source` so it registers alongside every other
//! descriptor in the same `Poll` — the reactor observes "time passed" as an
//! ordinary read event rather than through a separate timer mechanism.

use std::time::Duration;

use mio::{Interest, Registry, Token};
use signal_hook::consts::SIGALRM;
use signal_hook::low_level::alarm;
use signal_hook_mio::v1_0::Signals;

use crate::error::EngineError;

/// Owns the `SIGALRM`-backed self-pipe and its registration.
pub struct SignalTick {
    signals: Signals,
}

impl SignalTick {
    /// Registers the tick source under `token` and arms the first alarm.
    pub fn new(registry: &Registry, token: Token, timeslot: Duration) -> Result<Self, EngineError> {
        let mut signals = Signals::new([SIGALRM]).map_err(EngineError::SignalRegistration)?;
        registry
            .register(&mut signals, token, Interest::READABLE)
            .map_err(EngineError::SignalRegistration)?;
        alarm::set(timeslot.as_secs() as u32);
        Ok(Self { signals })
    }

    /// Drains any pending signals and re-arms the alarm if at least one
    /// fired. Returns whether a tick actually occurred, so the caller can
    /// defer expiry work until after the rest of the event batch has been
    /// serviced.
    pub fn drain_and_rearm(&mut self, timeslot: Duration) -> bool {
        let mut fired = false;
        for _ in self.signals.pending() {
            fired = true;
        }
        if fired {
            alarm::set(timeslot.as_secs() as u32);
        }
        fired
    }
}
