//! Per-thread disposition table and resolver.

use spin::Mutex;

use super::types::{default_disposition, Disposition, HandleEntry, SaFlags, SigSet, SignalNumber};

/// Per-thread signal-handle table. One [`spin::Mutex`] per signal rather
/// than one lock for the whole table: `SA_RESETHAND`'s atomic clear-on-use
/// only needs to exclude other resolutions of the *same* signal, and a
/// single shared lock would serialize unrelated signals' deliveries across
/// cores for no reason.
pub struct DispositionTable {
    entries: [Mutex<HandleEntry>; super::types::SIGNAL_COUNT],
}

impl Default for DispositionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispositionTable {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| Mutex::new(HandleEntry::Default)),
        }
    }

    /// `sigaction`-shaped install, returning the previous entry. Refuses to
    /// install anything but `Default` over SIGKILL/SIGSTOP.
    pub fn install(&self, sig: SignalNumber, new: HandleEntry) -> Result<HandleEntry, ()> {
        if sig.is_unmaskable() && !matches!(new, HandleEntry::Default) {
            return Err(());
        }
        let mut slot = self.entries[sig.index()].lock();
        Ok(std::mem::replace(&mut slot, new))
    }

    /// Resolves the effective disposition for `sig`, applying
    /// `SA_RESETHAND` if set.
    pub fn resolve(&self, sig: SignalNumber) -> Disposition {
        let mut slot = self.entries[sig.index()].lock();

        let captured = *slot;
        if let HandleEntry::Handler { flags, .. } = captured {
            if flags.contains(SaFlags::SA_RESETHAND) {
                *slot = HandleEntry::Default;
            }
        }
        drop(slot);

        match captured {
            HandleEntry::Ignore => Disposition::Ignore,
            HandleEntry::Handler {
                handler,
                restorer,
                flags,
                mask,
            } => Disposition::Handler {
                handler,
                restorer,
                flags,
                mask,
            },
            HandleEntry::Default => default_disposition(sig),
        }
    }

    /// True if the entry (ignoring `SA_RESETHAND`) currently resolves to
    /// ignore, without consuming a `SA_RESETHAND` entry. Used by the
    /// append path to decide whether to discard silently.
    pub fn is_currently_ignored(&self, sig: SignalNumber) -> bool {
        match *self.entries[sig.index()].lock() {
            HandleEntry::Ignore => true,
            HandleEntry::Default => matches!(default_disposition(sig), Disposition::Ignore),
            HandleEntry::Handler { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::types::SIGUSR1;

    #[test]
    fn reset_hand_clears_after_one_resolution() {
        let table = DispositionTable::new();
        let sig = SignalNumber::new(SIGUSR1).unwrap();
        table
            .install(
                sig,
                HandleEntry::Handler {
                    handler: 0x1000,
                    restorer: 0x2000,
                    flags: SaFlags::SA_RESETHAND,
                    mask: SigSet::empty(),
                },
            )
            .unwrap();

        let first = table.resolve(sig);
        assert!(matches!(first, Disposition::Handler { handler: 0x1000, .. }));

        let second = table.resolve(sig);
        // SIGUSR1 defaults to terminate.
        assert!(matches!(second, Disposition::Terminate));
    }

    #[test]
    fn kill_and_stop_reject_non_default_install() {
        let table = DispositionTable::new();
        for signo in [super::super::types::SIGKILL, super::super::types::SIGSTOP] {
            let sig = SignalNumber::new(signo).unwrap();
            let result = table.install(
                sig,
                HandleEntry::Handler {
                    handler: 0x1,
                    restorer: 0x2,
                    flags: SaFlags::empty(),
                    mask: SigSet::empty(),
                },
            );
            assert!(result.is_err());
            assert!(table.install(sig, HandleEntry::Ignore).is_err());
        }
    }
}
