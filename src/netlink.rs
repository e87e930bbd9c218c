//! Kernel uevent socket.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::socket::{
    bind, recv, socket, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

/// Multicast group the kernel itself sends uevents to.
const KERNEL_UEVENT_GROUP: u32 = 1;

/// Receive buffer size; uevents are bounded well below this.
pub const UEVENT_BUFFER_SIZE: usize = 16384;

/// A `NETLINK_KOBJECT_UEVENT` socket subscribed to kernel uevents.
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    pub fn open() -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .context("Failed to create netlink socket!")?;

        // Port id 0 lets the kernel pick one for us.
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, KERNEL_UEVENT_GROUP))
            .context("Failed to bind netlink socket!")?;

        Ok(Self { fd })
    }
}

/// Something uevent datagrams can be received from.
pub trait UeventSource {
    /// One `recv(2)` into `buf`.
    fn recv_raw(&self, buf: &mut [u8]) -> Result<usize, Errno>;
}

impl UeventSource for UeventSocket {
    fn recv_raw(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        recv(self.fd.as_raw_fd(), buf, MsgFlags::empty())
    }
}

/// Receive one datagram into `buf`.
///
/// Returns `Ok(None)` if nothing was actually pending (`EAGAIN`/`EINTR`).
/// Any other error, including `ENOBUFS` after the kernel dropped messages,
/// is returned to the caller.
pub fn recv_datagram<'a, S: UeventSource + ?Sized>(
    source: &S,
    buf: &'a mut [u8],
) -> Result<Option<&'a [u8]>, Errno> {
    match source.recv_raw(buf) {
        Ok(n) => Ok(Some(&buf[..n])),
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(e),
    }
}

impl AsFd for UeventSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
