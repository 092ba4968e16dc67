use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::packet::HardwareAddr;

// linux/if_packet.h
#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// AF_PACKET socket bound to one interface and one ether type.
#[derive(Debug)]
pub(crate) struct PacketSocket {
    inner: AsyncFd<Socket>,
}

impl PacketSocket {
    pub const MAX_FRAME: usize = 1514;

    pub fn open(ifindex: u32, ether_type: u16) -> io::Result<Self> {
        let protocol = ether_type.to_be() as libc::c_int;
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(protocol)))?;
        socket.set_nonblocking(true)?;

        // Safety: all-zero is a valid sockaddr_ll.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = ether_type.to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            inner: AsyncFd::new(socket)?,
        })
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&self, frame: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.write(frame)
            }) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    pub fn add_membership(&self, ifindex: u32, group: HardwareAddr) -> io::Result<()> {
        self.membership(libc::PACKET_ADD_MEMBERSHIP, ifindex, group)
    }

    pub fn drop_membership(&self, ifindex: u32, group: HardwareAddr) -> io::Result<()> {
        self.membership(libc::PACKET_DROP_MEMBERSHIP, ifindex, group)
    }

    fn membership(&self, op: libc::c_int, ifindex: u32, group: HardwareAddr) -> io::Result<()> {
        let mut mr_address = [0u8; 8];
        mr_address[..6].copy_from_slice(&group.0);
        let mreq = PacketMreq {
            mr_ifindex: ifindex as libc::c_int,
            mr_type: libc::PACKET_MR_MULTICAST as libc::c_ushort,
            mr_alen: 6,
            mr_address,
        };
        let ret = unsafe {
            libc::setsockopt(
                self.inner.get_ref().as_raw_fd(),
                libc::SOL_PACKET,
                op,
                &mreq as *const PacketMreq as *const libc::c_void,
                std::mem::size_of::<PacketMreq>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
