//! The monitor loop: one blocking `poll` over every source.

use crate::chord::{Chord, ChordTracker, KeyGroup};
use crate::event::Trigger;
use crate::input::{
    decode_key_events, find_panic_devices, read_records, InputDevice, RecordSource,
    EVENT_BUFFER_RECORDS, INPUT_EVENT_SIZE,
};
use crate::netlink::{recv_datagram, UeventSocket, UeventSource, UEVENT_BUFFER_SIZE};
use crate::shutdown::power_off;
use crate::target::{TargetDevice, TargetSet};
use crate::uevent::UeventDecoder;
use anyhow::{anyhow, bail, Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::convert::Infallible;
use std::os::fd::AsFd;

/// Builder for the shutdown monitor.
#[derive(Default)]
pub struct MonitorBuilder {
    targets: Vec<TargetDevice>,
    groups: Vec<KeyGroup>,
}

impl MonitorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch a block device for removal.
    pub fn add_target(mut self, target: TargetDevice) -> Self {
        self.targets.push(target);
        self
    }

    /// Add a group to the panic chord.
    pub fn add_group(mut self, group: KeyGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Open the uevent socket and, if a chord is configured, every input
    /// device able to report it.
    pub fn build(self) -> Result<Monitor> {
        if self.targets.is_empty() && self.groups.is_empty() {
            bail!("Nothing to monitor: no devices and no panic keys configured");
        }

        let chord = Chord::new(self.groups);
        let devices = if chord.is_empty() {
            Vec::new()
        } else {
            find_panic_devices(&chord)?
        };
        let socket = UeventSocket::open()?;

        Ok(Monitor {
            devices,
            socket,
            tracker: ChordTracker::new(chord),
            decoder: UeventDecoder::new(TargetSet::new(self.targets)),
        })
    }
}

/// A ready-to-run monitor. Owns every descriptor it waits on.
pub struct Monitor {
    devices: Vec<InputDevice>,
    socket: UeventSocket,
    tracker: ChordTracker,
    decoder: UeventDecoder,
}

impl Monitor {
    pub fn devices(&self) -> &[InputDevice] {
        &self.devices
    }

    /// Wait for events forever.
    ///
    /// Only returns on a transport error; a detected trigger powers the
    /// machine off and exits from inside the loop.
    pub fn run(self) -> Result<Infallible> {
        let Monitor {
            devices,
            socket,
            mut tracker,
            decoder,
        } = self;

        let mut fds: Vec<PollFd> = devices
            .iter()
            .map(|d| PollFd::new(d.as_fd(), PollFlags::POLLIN))
            .chain(std::iter::once(PollFd::new(socket.as_fd(), PollFlags::POLLIN)))
            .collect();
        let socket_idx = devices.len();

        let mut event_buf = vec![0u8; INPUT_EVENT_SIZE * EVENT_BUFFER_RECORDS];
        let mut uevent_buf = vec![0u8; UEVENT_BUFFER_SIZE];
        let mut device_revents = vec![PollFlags::empty(); socket_idx];

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("Failed to wait for events"),
            }

            let socket_revents = fds[socket_idx].revents().unwrap_or(PollFlags::empty());
            for (revents, fd) in device_revents.iter_mut().zip(&fds) {
                *revents = fd.revents().unwrap_or(PollFlags::empty());
            }

            if let Some(trigger) = dispatch_wake(
                &socket,
                socket_revents,
                &decoder,
                &mut uevent_buf,
                &devices,
                &device_revents,
                &mut tracker,
                &mut event_buf,
            )? {
                power_off(&trigger);
            }
        }
    }
}

/// Handle every descriptor that one `poll` reported ready.
///
/// The socket goes first: if the root device vanished, a keyboard hanging up
/// in the same wake must not turn the power-off into a restart that can no
/// longer succeed.
#[allow(clippy::too_many_arguments)]
fn dispatch_wake<S, D>(
    socket: &S,
    socket_revents: PollFlags,
    decoder: &UeventDecoder,
    uevent_buf: &mut [u8],
    devices: &[D],
    device_revents: &[PollFlags],
    tracker: &mut ChordTracker,
    event_buf: &mut [u8],
) -> Result<Option<Trigger>>
where
    S: UeventSource + ?Sized,
    D: RecordSource,
{
    if !socket_revents.is_empty() {
        if let Some(trigger) = handle_uevent(socket, decoder, uevent_buf) {
            return Ok(Some(trigger));
        }
    }

    for (device, revents) in devices.iter().zip(device_revents) {
        if let Some(trigger) = handle_input(device, *revents, tracker, event_buf)? {
            return Ok(Some(trigger));
        }
    }

    Ok(None)
}

fn handle_input<D: RecordSource + ?Sized>(
    device: &D,
    revents: PollFlags,
    tracker: &mut ChordTracker,
    buf: &mut [u8],
) -> Result<Option<Trigger>> {
    if revents.is_empty() {
        return Ok(None);
    }
    // Unplugged keyboards report POLLHUP/POLLERR; without this check a
    // hung-up descriptor would wake poll forever.
    if !revents.contains(PollFlags::POLLIN) {
        return Err(anyhow!(
            "Input device {} reported {:?}",
            device.path().display(),
            revents
        ));
    }

    let Some(records) = read_records(device, buf)? else {
        return Ok(None);
    };
    apply_records(tracker, records)
        .with_context(|| format!("Bad read from input device {}", device.path().display()))
}

/// Feed raw input records to the tracker, checking the chord after each key.
fn apply_records(tracker: &mut ChordTracker, records: &[u8]) -> Result<Option<Trigger>> {
    for event in decode_key_events(records)? {
        tracker.apply_key_event(event.key, event.pressed);
        if tracker.all_groups_active() {
            return Ok(Some(Trigger::PanicChord));
        }
    }
    Ok(None)
}

/// Receive and decode one uevent.
///
/// A failing uevent socket may itself be a symptom of the root device going
/// away, so any non-transient receive error is a trigger, not an error.
fn handle_uevent<S: UeventSource + ?Sized>(
    socket: &S,
    decoder: &UeventDecoder,
    buf: &mut [u8],
) -> Option<Trigger> {
    match recv_datagram(socket, buf) {
        Ok(Some(datagram)) => decoder.decode(datagram),
        Ok(None) => None,
        Err(e) => {
            log::error!("Failed to receive uevent: {}", e);
            Some(Trigger::UeventChannelLost)
        }
    }
}
