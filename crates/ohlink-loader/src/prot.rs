//! Segment permissions to host protection flags.

use bitflags::bitflags;
use libc::c_int;
use ohlink_format::SegPerms;

bitflags! {
    /// `PROT_*` bits as accepted by `mmap`/`mprotect`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NativeProt: c_int {
        const READ = libc::PROT_READ;
        const WRITE = libc::PROT_WRITE;
        const EXEC = libc::PROT_EXEC;
    }
}

impl NativeProt {
    /// Protection used while a page is being filled.
    pub const SCRATCH: NativeProt = NativeProt::READ.union(NativeProt::WRITE);
}

/// Translates image permissions into host protection.
///
/// Write-only and execute-only pages cannot be expressed by the MMUs this
/// loader targets, so any request for write or execute also gets read.
/// Rounding never removes a requested capability.
pub fn translate(perms: SegPerms) -> NativeProt {
    let mut prot = NativeProt::empty();
    if perms.contains(SegPerms::READ) {
        prot |= NativeProt::READ;
    }
    if perms.contains(SegPerms::WRITE) {
        prot |= NativeProt::READ | NativeProt::WRITE;
    }
    if perms.contains(SegPerms::EXECUTE) {
        prot |= NativeProt::READ | NativeProt::EXEC;
    }
    prot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_combinations() {
        let r = SegPerms::READ;
        let w = SegPerms::WRITE;
        let x = SegPerms::EXECUTE;
        let cases = [
            (SegPerms::empty(), NativeProt::empty()),
            (r, NativeProt::READ),
            (w, NativeProt::READ | NativeProt::WRITE),
            (x, NativeProt::READ | NativeProt::EXEC),
            (r | w, NativeProt::READ | NativeProt::WRITE),
            (r | x, NativeProt::READ | NativeProt::EXEC),
            (w | x, NativeProt::all()),
            (r | w | x, NativeProt::all()),
        ];
        for (perms, expected) in cases {
            assert_eq!(translate(perms), expected, "{:?}", perms);
        }
    }

    #[test]
    fn never_drops_a_requested_capability() {
        for bits in 0..8u8 {
            let perms = SegPerms::from_bits_truncate(bits);
            let prot = translate(perms);
            if perms.contains(SegPerms::WRITE) {
                assert!(prot.contains(NativeProt::WRITE));
            }
            if perms.contains(SegPerms::EXECUTE) {
                assert!(prot.contains(NativeProt::EXEC));
            }
            if !perms.is_empty() {
                assert!(prot.contains(NativeProt::READ));
            }
        }
    }
}
