//! The power-off action.

use crate::event::Trigger;
use nix::sys::reboot::{reboot, RebootMode};

/// Power the machine off immediately and exit.
///
/// This skips init and any orderly shutdown: nothing is synced and no
/// process is signalled. If the kernel refuses, the process exits anyway.
pub fn power_off(trigger: &Trigger) -> ! {
    log::debug!("Powering off: {}", trigger);
    let Err(e) = reboot(RebootMode::RB_POWER_OFF);
    log::error!("Power-off request failed: {}", e);
    std::process::exit(0)
}
