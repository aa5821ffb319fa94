//! Signal numbers, records, flags, and dispositions.

use bitflags::bitflags;

/// The classic signal range this crate emulates; numbers beyond 31 (real
/// time signals) are a declared non-goal.
pub const MIN_SIGNUM: i32 = 1;
pub const MAX_SIGNUM: i32 = 31;
pub const SIGNAL_COUNT: usize = MAX_SIGNUM as usize;

macro_rules! signal_consts {
    ($($name:ident = $val:expr),* $(,)?) => {
        $(pub const $name: i32 = $val;)*
    };
}

signal_consts! {
    SIGHUP = 1, SIGINT = 2, SIGQUIT = 3, SIGILL = 4, SIGTRAP = 5,
    SIGABRT = 6, SIGBUS = 7, SIGFPE = 8, SIGKILL = 9, SIGUSR1 = 10,
    SIGSEGV = 11, SIGUSR2 = 12, SIGPIPE = 13, SIGALRM = 14, SIGTERM = 15,
    SIGSTKFLT = 16, SIGCHLD = 17, SIGCONT = 18, SIGSTOP = 19, SIGTSTP = 20,
    SIGTTIN = 21, SIGTTOU = 22, SIGURG = 23, SIGXCPU = 24, SIGXFSZ = 25,
    SIGVTALRM = 26, SIGPROF = 27, SIGWINCH = 28, SIGIO = 29, SIGPWR = 30,
    SIGSYS = 31,
}

/// A validated signal number in `1..=31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalNumber(i32);

impl SignalNumber {
    pub const fn new(signo: i32) -> Option<Self> {
        if signo >= MIN_SIGNUM && signo <= MAX_SIGNUM {
            Some(Self(signo))
        } else {
            None
        }
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    /// Zero-based index into a `[T; SIGNAL_COUNT]` table.
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub const fn is_unmaskable(self) -> bool {
        self.0 == SIGKILL || self.0 == SIGSTOP
    }
}

impl core::fmt::Display for SignalNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Mirrors the subset of `sigaction` flags this crate interprets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaFlags: u32 {
        const SA_RESETHAND = 1 << 0;
        const SA_ONSTACK   = 1 << 1;
        const SA_SIGINFO   = 1 << 2;
        const SA_RESTORER  = 1 << 3;
    }
}

bitflags! {
    /// Flags placed into the delivered `ucontext`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UContextFlags: u32 {
        const UC_STRICT_RESTORE_SS = 1 << 0;
        const UC_FP_XSTATE         = 1 << 1;
    }
}

/// A 1..=31 signal mask, stored as a bitset with bit `n-1` for signal `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet(u32);

impl SigSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn full() -> Self {
        // All 31 bits set, SIGKILL/SIGSTOP sanitized out below by callers
        // that build a mask from user input.
        Self((1u32 << SIGNAL_COUNT) - 1)
    }

    pub fn contains(self, sig: SignalNumber) -> bool {
        self.0 & (1 << sig.index()) != 0
    }

    /// Inserts `sig`, refusing SIGKILL/SIGSTOP.
    pub fn insert(&mut self, sig: SignalNumber) {
        if !sig.is_unmaskable() {
            self.0 |= 1 << sig.index();
        }
    }

    pub fn remove(&mut self, sig: SignalNumber) {
        self.0 &= !(1 << sig.index());
    }

    /// Union, with SIGKILL/SIGSTOP always scrubbed afterward.
    pub fn union(self, other: Self) -> Self {
        Self(self.sanitized().0 | other.sanitized().0)
    }

    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    fn sanitized(self) -> Self {
        let mut s = self;
        s.remove(SignalNumber::new(SIGKILL).unwrap());
        s.remove(SignalNumber::new(SIGSTOP).unwrap());
        s
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// `si_code` values the classifier assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigCode {
    MapErr,
    AccErr,
    AdrErr,
    IntDiv,
    IllOpc,
    /// Signal raised by `append_signal`, not by a hardware fault.
    User,
    /// Host-syscall emulation sequence, disabled by default because no
    /// [`crate::pal::PalHostKind`] in this crate emulates syscalls yet.
    HostSyscallOpcode,
}

/// A heap-allocated signal record.
/// Owned by exactly one ring slot until fetched, then by the delivering
/// code path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRecord {
    pub signo: SignalNumber,
    pub code: SigCode,
    pub sender_pid: u32,
    pub fault_addr: usize,
    pub syscall_nr: i64,
    pub errno: i32,
    pub trap_no: i32,
}

impl SignalRecord {
    pub fn from_sender(signo: SignalNumber, sender_pid: u32) -> Self {
        Self {
            signo,
            code: SigCode::User,
            sender_pid,
            fault_addr: 0,
            syscall_nr: 0,
            errno: 0,
            trap_no: 0,
        }
    }

    pub fn fault(signo: SignalNumber, code: SigCode, fault_addr: usize) -> Self {
        Self {
            signo,
            code,
            sender_pid: 0,
            fault_addr,
            syscall_nr: 0,
            errno: 0,
            trap_no: 0,
        }
    }
}

/// The resolved disposition for a pending signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignore,
    Terminate,
    TerminateWithCore,
    Handler {
        handler: usize,
        restorer: usize,
        flags: SaFlags,
        mask: SigSet,
    },
}

/// What a thread has installed for one signal, i.e. one slot of its
/// signal-handle table. `Default` means "no entry was present; fall back
/// to the process-wide default table."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEntry {
    Default,
    Ignore,
    Handler {
        handler: usize,
        restorer: usize,
        flags: SaFlags,
        mask: SigSet,
    },
}

impl Default for HandleEntry {
    fn default() -> Self {
        HandleEntry::Default
    }
}

/// The compile-time default-disposition table. Index with
/// `SignalNumber::index()`.
pub const DEFAULT_DISPOSITIONS: [Disposition; SIGNAL_COUNT] = {
    use Disposition::{Ignore, Terminate, TerminateWithCore};
    let mut table = [Terminate; SIGNAL_COUNT];
    table[SIGHUP as usize - 1] = Terminate;
    table[SIGINT as usize - 1] = Terminate;
    table[SIGQUIT as usize - 1] = TerminateWithCore;
    table[SIGILL as usize - 1] = TerminateWithCore;
    table[SIGTRAP as usize - 1] = TerminateWithCore;
    table[SIGABRT as usize - 1] = TerminateWithCore;
    table[SIGBUS as usize - 1] = TerminateWithCore;
    table[SIGFPE as usize - 1] = TerminateWithCore;
    table[SIGKILL as usize - 1] = Terminate;
    table[SIGUSR1 as usize - 1] = Terminate;
    table[SIGSEGV as usize - 1] = TerminateWithCore;
    table[SIGUSR2 as usize - 1] = Terminate;
    table[SIGPIPE as usize - 1] = Terminate;
    table[SIGALRM as usize - 1] = Terminate;
    table[SIGTERM as usize - 1] = Terminate;
    table[SIGSTKFLT as usize - 1] = Terminate;
    table[SIGCHLD as usize - 1] = Ignore;
    table[SIGCONT as usize - 1] = Ignore;
    table[SIGSTOP as usize - 1] = Ignore;
    table[SIGTSTP as usize - 1] = Ignore;
    table[SIGTTIN as usize - 1] = Ignore;
    table[SIGTTOU as usize - 1] = Ignore;
    table[SIGURG as usize - 1] = Ignore;
    table[SIGXCPU as usize - 1] = TerminateWithCore;
    table[SIGXFSZ as usize - 1] = TerminateWithCore;
    table[SIGVTALRM as usize - 1] = Terminate;
    table[SIGPROF as usize - 1] = Terminate;
    table[SIGWINCH as usize - 1] = Ignore;
    table[SIGIO as usize - 1] = Terminate;
    table[SIGPWR as usize - 1] = Terminate;
    table[SIGSYS as usize - 1] = TerminateWithCore;
    table
};

pub fn default_disposition(sig: SignalNumber) -> Disposition {
    DEFAULT_DISPOSITIONS[sig.index()]
}

/// Encodes a POSIX wait status for a signal-terminated process.
pub const CORE_DUMP_BIT: i32 = 0x80;

pub fn encode_wait_status(signo: SignalNumber, with_core: bool) -> i32 {
    let core_bit = if with_core { CORE_DUMP_BIT } else { 0 };
    core_bit | signo.get()
}
