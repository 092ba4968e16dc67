use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::config::PeerConfig;
use crate::error::Error;

// linux/tcp.h
const TCP_MD5SIG: libc::c_int = 14;
const TCP_MD5SIG_MAXKEYLEN: usize = 80;

#[repr(C)]
struct TcpMd5Sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    tcpm_ifindex: libc::c_int,
    tcpm_key: [u8; TCP_MD5SIG_MAXKEYLEN],
}

/// Installs an RFC 2385 signature key for segments exchanged with `peer`.
pub(crate) fn set_tcp_md5sig(sock: &Socket, peer: &SocketAddr, key: &str) -> io::Result<()> {
    if key.len() > TCP_MD5SIG_MAXKEYLEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "md5 key is too long",
        ));
    }
    let addr = SockAddr::from(*peer);
    // Safety: all-zero is a valid bit pattern for this plain C struct.
    let mut sig: TcpMd5Sig = unsafe { std::mem::zeroed() };
    // Safety: addr.len() never exceeds the size of sockaddr_storage.
    unsafe {
        std::ptr::copy_nonoverlapping(
            addr.as_ptr() as *const u8,
            &mut sig.tcpm_addr as *mut libc::sockaddr_storage as *mut u8,
            addr.len() as usize,
        );
    }
    sig.tcpm_keylen = key.len() as u16;
    sig.tcpm_key[..key.len()].copy_from_slice(key.as_bytes());
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::IPPROTO_TCP,
            TCP_MD5SIG,
            &sig as *const TcpMd5Sig as *const libc::c_void,
            std::mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Opens the TCP connection for a session with every per-peer socket option applied.
#[tracing::instrument(skip(config), fields(peer.addr = %config.addr, peer.asn = config.asn))]
pub(crate) async fn connect(config: &PeerConfig) -> Result<TcpStream, Error> {
    let peer = SocketAddr::new(config.addr, config.port);
    let sock = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_nonblocking(true)?;

    if let Some(password) = &config.password {
        set_tcp_md5sig(&sock, &peer, password)?;
    }
    if !config.is_ibgp() {
        let ttl = if config.ebgp_multihop { 255 } else { 1 };
        match peer {
            SocketAddr::V4(_) => sock.set_ttl(ttl)?,
            SocketAddr::V6(_) => sock.set_unicast_hops_v6(ttl)?,
        }
    }
    if let Some(src) = config.src_addr {
        sock.bind(&SocketAddr::new(src, 0).into())?;
    }
    let tcp_keepalive = TcpKeepalive::new().with_interval(Duration::new(30, 0));
    sock.set_tcp_keepalive(&tcp_keepalive)?;
    sock.set_nodelay(true)?;

    let tcp_sock = TcpSocket::from_std_stream(sock.into());
    match timeout(
        Duration::from_secs(PeerConfig::CONNECT_TIMEOUT),
        tcp_sock.connect(peer),
    )
    .await
    {
        Ok(res) => Ok(res?),
        Err(_) => Err(Error::ConnectTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn failed_set_tcp_md5sig_key_too_long() {
        let sock = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let peer: SocketAddr = "127.0.0.1:179".parse().unwrap();
        let err = set_tcp_md5sig(&sock, &peer, &"k".repeat(81)).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, err.kind());
    }

    #[tokio::test]
    async fn works_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let mut conf = PeerConfig::new(65000, 65001, local.ip());
        conf.port = local.port();
        let (accepted, stream) = tokio::join!(listener.accept(), connect(&conf));
        let stream = stream.unwrap();
        let (_, remote) = accepted.unwrap();
        assert_eq!(stream.local_addr().unwrap(), remote);
        assert!(stream.nodelay().unwrap());
    }
}
