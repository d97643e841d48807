//! Process hardening for sandboxed commands
//!
//! # What gets removed
//!
//! Each process has several capability sets:
//!
//! ```text
//! ┌───────────────────┬─────────────────────────────────────────────┐
//! │  Bounding (B)     │ Absolute ceiling, inherited across exec      │
//! │  Permitted (P)    │ Caps this process CAN raise                  │
//! │  Effective (E)    │ Caps the kernel checks right now             │
//! │  Inheritable (I)  │ Caps passed to children after exec           │
//! │  Ambient (A)      │ Caps kept by unprivileged children           │
//! └───────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! A sandboxed command gets every set emptied, plus `no_new_privs`, so
//! setuid binaries inside the workspace cannot hand anything back.

use std::io;

// ═══════════════════════════════════════════════════════════════════════════
// CapabilityDropper
// ═══════════════════════════════════════════════════════════════════════════
// USAGE:
//   Build the dropper in the parent (allocation happens here), then call
//   apply_in_child() from Command::pre_exec, after fork and before exec.
// ═══════════════════════════════════════════════════════════════════════════

pub struct CapabilityDropper {
    caps_to_drop: Vec<caps::Capability>,
    no_new_privs: bool,
}

impl CapabilityDropper {
    /// Empty dropper, nothing removed
    pub fn new() -> Self {
        Self {
            caps_to_drop: Vec::new(),
            no_new_privs: false,
        }
    }

    /// Drop every capability known to the kernel headers and set no_new_privs
    pub fn drop_all() -> Self {
        let mut caps_to_drop: Vec<caps::Capability> = caps::all().into_iter().collect();
        caps_to_drop.sort_by_key(|cap| cap.index());
        Self {
            caps_to_drop,
            no_new_privs: true,
        }
    }

    pub fn drop_cap(&mut self, cap: caps::Capability) -> &mut Self {
        self.caps_to_drop.push(cap);
        self
    }

    pub fn with_no_new_privs(&mut self, enabled: bool) -> &mut Self {
        self.no_new_privs = enabled;
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // apply_in_child() - runs between fork and exec
    // ═══════════════════════════════════════════════════════════════════════
    // Order matters:
    //   1. Bounding set (needs CAP_SETPCAP, fails quietly when unprivileged,
    //      in which case there is nothing to drop anyway)
    //   2. Ambient, Inheritable, Permitted, Effective (shrinking never needs
    //      privilege)
    //   3. PR_SET_NO_NEW_PRIVS
    //
    // Only raw syscalls happen here; no allocation.
    // ═══════════════════════════════════════════════════════════════════════
    pub fn apply_in_child(&self) -> io::Result<()> {
        for &cap in &self.caps_to_drop {
            let _ = caps::drop(None, caps::CapSet::Bounding, cap);
        }

        let _ = caps::clear(None, caps::CapSet::Ambient);
        for set in [
            caps::CapSet::Inheritable,
            caps::CapSet::Permitted,
            caps::CapSet::Effective,
        ] {
            caps::clear(None, set)
                .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
        }

        if self.no_new_privs {
            set_no_new_privs()?;
        }

        Ok(())
    }

    pub fn drop_count(&self) -> usize {
        self.caps_to_drop.len()
    }

    /// Names of the capabilities being dropped (for logging)
    pub fn caps_being_dropped(&self) -> Vec<String> {
        self.caps_to_drop.iter().map(|cap| cap.to_string()).collect()
    }
}

impl Default for CapabilityDropper {
    fn default() -> Self {
        Self::drop_all()
    }
}

/// Set `PR_SET_NO_NEW_PRIVS` on the calling process
pub fn set_no_new_privs() -> io::Result<()> {
    // SAFETY: prctl with PR_SET_NO_NEW_PRIVS only reads its integer arguments.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Get the current capabilities of this process (for debugging)
pub fn get_current_caps() -> String {
    let mut output = String::from("Current process capabilities:\n");

    for (name, set) in [
        ("Effective", caps::CapSet::Effective),
        ("Permitted", caps::CapSet::Permitted),
        ("Inheritable", caps::CapSet::Inheritable),
        ("Ambient", caps::CapSet::Ambient),
    ] {
        output.push_str(&format!("  {}:", name));
        match caps::read(None, set) {
            Ok(current) if current.is_empty() => output.push_str(" (none)\n"),
            Ok(current) => {
                output.push('\n');
                let mut names: Vec<String> = current.iter().map(|c| c.to_string()).collect();
                names.sort();
                for cap in names {
                    output.push_str(&format!("    - {}\n", cap));
                }
            }
            Err(_) => output.push_str(" (unable to read)\n"),
        }
    }

    output
}
