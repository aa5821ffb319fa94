//! Fault classifier.
//!
//! Turns a PAL upcall into either a fatal [`InternalFault`] or a
//! [`SignalRecord`] ready to enqueue. The MEMFAULT decision table's
//! check order matters and must not be reordered: the probe-range check
//! must run before the internal-text check, since a probe can
//! legitimately run from library-OS code.

use crate::error::{InternalFault, InternalFaultReason};
use crate::pal::{PalOps, VmaInfo, VmaLookup};
use crate::process::thread::TestRange;

use super::types::{SigCode, SignalNumber, SIGFPE, SIGILL, SIGSEGV, SIGSYS, SIGTERM};
use super::types::SignalRecord;

/// The classifier's two possible outcomes for the fault-bearing events
/// (ARITH, MEMFAULT, ILLEGAL); QUIT/SUSPEND/RESUME are handled separately
/// by [`classify_control`] since they never fault on an address.
pub enum Classified {
    /// Redirect the interrupted context's instruction pointer here and
    /// resume without delivering a signal.
    ProbeRedirect(usize),
    Deliver(SignalRecord),
    Internal(InternalFault),
}

pub enum EventArg {
    FaultAddress(usize),
    SyscallNumber { ip: usize, opcode: [u8; 2] },
    None,
}

/// Classifies an ARITH, MEMFAULT, or ILLEGAL upcall.
pub fn classify(
    tag: crate::pal::EventTag,
    arg: EventArg,
    fault_ip: usize,
    pal: &dyn PalOps,
    vma: &dyn VmaLookup,
    probe_range: Option<&TestRange>,
    current_tid_is_internal: bool,
) -> Classified {
    use crate::pal::EventTag;

    match tag {
        EventTag::Arith => Classified::Deliver(SignalRecord::fault(
            SignalNumber::new(SIGFPE).unwrap(),
            SigCode::IntDiv,
            0,
        )),
        EventTag::Illegal => classify_illegal(arg, fault_ip, pal, current_tid_is_internal),
        EventTag::MemFault => {
            let addr = match arg {
                EventArg::FaultAddress(a) => a,
                _ => 0,
            };
            classify_memfault(addr, fault_ip, pal, vma, probe_range, current_tid_is_internal)
        }
        EventTag::Quit | EventTag::Suspend | EventTag::Resume => {
            unreachable!("control events are handled by classify_control")
        }
    }
}

/// QUIT/SUSPEND/RESUME translation.
pub enum ControlOutcome {
    Deliver(SignalRecord),
    WakeOnly,
}

pub fn classify_control(tag: crate::pal::EventTag) -> ControlOutcome {
    use crate::pal::EventTag;
    match tag {
        EventTag::Quit => ControlOutcome::Deliver(SignalRecord::from_sender(
            SignalNumber::new(SIGTERM).unwrap(),
            0,
        )),
        EventTag::Suspend => ControlOutcome::Deliver(SignalRecord::from_sender(
            SignalNumber::new(super::types::SIGINT).unwrap(),
            0,
        )),
        EventTag::Resume => ControlOutcome::WakeOnly,
        _ => unreachable!("non-control event passed to classify_control"),
    }
}

fn is_internal_ip(ip: usize, pal: &dyn PalOps) -> bool {
    pal.libos_text_range().contains(&ip) || pal.pal_text_range().contains(&ip)
}

fn classify_memfault(
    addr: usize,
    fault_ip: usize,
    pal: &dyn PalOps,
    vma: &dyn VmaLookup,
    probe_range: Option<&TestRange>,
    current_tid_is_internal: bool,
) -> Classified {
    if let Some(range) = probe_range {
        if range.contains(addr) {
            return Classified::ProbeRedirect(range.cont_addr);
        }
    }

    if is_internal_ip(fault_ip, pal) || current_tid_is_internal {
        return Classified::Internal(InternalFault {
            site: fault_ip,
            reason: if current_tid_is_internal {
                InternalFaultReason::FaultOnInternalThread
            } else if pal.libos_text_range().contains(&fault_ip) {
                InternalFaultReason::FaultInLibOsText
            } else {
                InternalFaultReason::FaultInPalText
            },
        });
    }

    if addr == 0 {
        return deliver_segv_maperr(addr);
    }

    let vma_info = match vma.lookup(addr) {
        Some(v) => v,
        None => return deliver_segv_maperr(addr),
    };

    if vma_info.internal {
        return Classified::Internal(InternalFault {
            site: fault_ip,
            reason: InternalFaultReason::FaultOnInternalVma,
        });
    }

    classify_vma_fault(addr, &vma_info)
}

fn deliver_segv_maperr(addr: usize) -> Classified {
    Classified::Deliver(SignalRecord::fault(
        SignalNumber::new(SIGSEGV).unwrap(),
        SigCode::MapErr,
        addr,
    ))
}

fn classify_vma_fault(addr: usize, vma: &VmaInfo) -> Classified {
    if vma.file_backed {
        if let Some(file_end) = vma.file_end {
            if addr >= file_end {
                return Classified::Deliver(SignalRecord::fault(
                    SignalNumber::new(super::types::SIGBUS).unwrap(),
                    SigCode::AdrErr,
                    addr,
                ));
            }
        }
        if !vma.writable {
            return Classified::Deliver(SignalRecord::fault(
                SignalNumber::new(SIGSEGV).unwrap(),
                SigCode::AccErr,
                addr,
            ));
        }
        return Classified::Deliver(SignalRecord::fault(
            SignalNumber::new(super::types::SIGBUS).unwrap(),
            SigCode::AdrErr,
            addr,
        ));
    }

    // Anonymous VMA.
    Classified::Deliver(SignalRecord::fault(
        SignalNumber::new(SIGSEGV).unwrap(),
        SigCode::AccErr,
        addr,
    ))
}

/// The two-byte sequence this PAL uses to mark a direct-host-syscall
/// opcode. Unreachable while every [`crate::pal::PalHostKind`] reports
/// `emulates_syscalls() == false`, kept so a future host that traps
/// syscall opcodes has somewhere to plug in.
const HOST_SYSCALL_OPCODE: [u8; 2] = [0x0f, 0x05];

fn classify_illegal(
    arg: EventArg,
    fault_ip: usize,
    pal: &dyn PalOps,
    current_tid_is_internal: bool,
) -> Classified {
    if is_internal_ip(fault_ip, pal) || current_tid_is_internal {
        return Classified::Internal(InternalFault {
            site: fault_ip,
            reason: InternalFaultReason::FaultOnInternalThread,
        });
    }

    if let EventArg::SyscallNumber { opcode, .. } = arg {
        if pal.host_kind().emulates_syscalls() && opcode == HOST_SYSCALL_OPCODE {
            return Classified::Deliver(SignalRecord::fault(
                SignalNumber::new(SIGSYS).unwrap(),
                SigCode::HostSyscallOpcode,
                fault_ip,
            ));
        }
    }

    Classified::Deliver(SignalRecord::fault(
        SignalNumber::new(SIGILL).unwrap(),
        SigCode::IllOpc,
        fault_ip,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pal::unix::UnixHost;
    use std::collections::HashMap;

    struct FakeVma(HashMap<usize, VmaInfo>);
    impl VmaLookup for FakeVma {
        fn lookup(&self, addr: usize) -> Option<VmaInfo> {
            self.0
                .iter()
                .map(|(_, v)| *v)
                .find(|v| v.contains(addr))
        }
    }

    #[test]
    fn null_deref_is_segv_maperr() {
        let pal = UnixHost::default();
        let vma = FakeVma(HashMap::new());
        let result = classify_memfault(0, 0x4000, &pal, &vma, None, false);
        match result {
            Classified::Deliver(rec) => {
                assert_eq!(rec.signo.get(), SIGSEGV);
                assert!(matches!(rec.code, SigCode::MapErr));
            }
            _ => panic!("expected SIGSEGV"),
        }
    }

    #[test]
    fn write_to_readonly_file_mapping_is_segv_accerr() {
        let pal = UnixHost::default();
        let mut map = HashMap::new();
        map.insert(
            0,
            VmaInfo {
                start: 0x1000,
                end: 0x2000,
                writable: false,
                internal: false,
                file_backed: true,
                file_end: Some(0x2000),
            },
        );
        let vma = FakeVma(map);
        let result = classify_memfault(0x1500, 0x4000, &pal, &vma, None, false);
        match result {
            Classified::Deliver(rec) => {
                assert_eq!(rec.signo.get(), SIGSEGV);
                assert!(matches!(rec.code, SigCode::AccErr));
            }
            _ => panic!("expected SIGSEGV/ACCERR"),
        }
    }

    #[test]
    fn past_eof_file_mapping_is_sigbus_adrerr() {
        let pal = UnixHost::default();
        let mut map = HashMap::new();
        map.insert(
            0,
            VmaInfo {
                start: 0x1000,
                end: 0x3000,
                writable: true,
                internal: false,
                file_backed: true,
                file_end: Some(0x1800),
            },
        );
        let vma = FakeVma(map);
        let result = classify_memfault(0x2000, 0x4000, &pal, &vma, None, false);
        match result {
            Classified::Deliver(rec) => {
                assert_eq!(rec.signo.get(), super::super::types::SIGBUS);
                assert!(matches!(rec.code, SigCode::AdrErr));
            }
            _ => panic!("expected SIGBUS/ADRERR"),
        }
    }

    #[test]
    fn probe_range_redirects_instead_of_delivering() {
        let pal = UnixHost::default();
        let vma = FakeVma(HashMap::new());
        let range = TestRange {
            start: 0x8000,
            end: 0x9000,
            cont_addr: 0xdead,
            has_fault: false,
        };
        let result = classify_memfault(0x8100, 0x4000, &pal, &vma, Some(&range), false);
        match result {
            Classified::ProbeRedirect(addr) => assert_eq!(addr, 0xdead),
            _ => panic!("expected probe redirect"),
        }
    }
}
