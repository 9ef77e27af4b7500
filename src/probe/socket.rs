use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// One received ICMP message
#[derive(Debug)]
pub struct RecvResult {
    pub len: usize,
    pub source: IpAddr,
    /// TTL/hop-limit of the reply, from ancillary data
    pub response_ttl: Option<u8>,
}

/// ICMP socket used for a single echo exchange.
///
/// Opens RAW when privileged, otherwise the unprivileged DGRAM kind. On
/// platforms that support it the kernel is asked to report the reply TTL.
#[derive(Debug)]
pub struct EchoSocket {
    socket: Socket,
    ipv6: bool,
    is_dgram: bool,
}

impl EchoSocket {
    pub fn open(ipv6: bool) -> Result<Self> {
        let (domain, protocol) = if ipv6 {
            (Domain::IPV6, Protocol::ICMPV6)
        } else {
            (Domain::IPV4, Protocol::ICMPV4)
        };

        let (socket, is_dgram) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(socket) => (socket, false),
            Err(raw_err) => {
                let socket = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|e| {
                    anyhow!(
                        "Insufficient permissions for ICMP sockets (raw: {}, dgram: {}).\n\n\
                         Fix options:\n\
                         \u{2022} Run with sudo\n\
                         \u{2022} Add capability: sudo setcap cap_net_raw+ep <binary>\n\
                         \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'",
                        raw_err,
                        e
                    )
                })?;
                (socket, true)
            }
        };

        let echo = Self {
            socket,
            ipv6,
            is_dgram,
        };
        if let Err(e) = echo.report_ttl() {
            tracing::debug!(error = %e, "could not enable TTL reporting");
        }
        Ok(echo)
    }

    /// True for SOCK_DGRAM: the kernel owns the identifier and strips IP headers
    pub fn is_dgram(&self) -> bool {
        self.is_dgram
    }

    /// Only raw IPv4 sockets deliver the IP header with each message
    pub fn has_ip_header(&self) -> bool {
        !self.is_dgram && !self.ipv6
    }

    pub fn send_to(&self, packet: &[u8], target: IpAddr) -> Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(target, 0));
        Ok(self.socket.send_to(packet, &addr)?)
    }

    /// Wait up to `timeout` for the next ICMP message
    pub fn recv(&self, buffer: &mut [u8], timeout: Duration) -> Result<RecvResult> {
        // Zero would mean "block forever"
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        self.recv_message(buffer)
    }

    fn unspecified_addr(&self) -> SockAddr {
        let ip: IpAddr = if self.ipv6 {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        SockAddr::from(SocketAddr::new(ip, 0))
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd"))]
    fn report_ttl(&self) -> Result<()> {
        use std::os::fd::AsRawFd;

        if self.ipv6 {
            self.socket.set_recv_hoplimit_v6(true)?;
            return Ok(());
        }

        let on: libc::c_int = 1;
        // SAFETY: valid fd and a c_int option value of the advertised size
        let ret = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_RECVTTL,
                (&on as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd")))]
    fn report_ttl(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd"))]
    fn recv_message(&self, buffer: &mut [u8]) -> Result<RecvResult> {
        use socket2::{MaybeUninitSlice, MsgHdrMut};

        const CONTROL_SIZE: usize = 64;

        let mut source = self.unspecified_addr();
        let mut control = [0u8; CONTROL_SIZE];
        let (len, control_len) = {
            let mut bufs = [MaybeUninitSlice::new(as_uninit(buffer))];
            let mut msg = MsgHdrMut::new()
                .with_addr(&mut source)
                .with_buffers(&mut bufs)
                .with_control(as_uninit(&mut control));
            let len = self.socket.recvmsg(&mut msg, 0)?;
            (len, msg.control_len().min(CONTROL_SIZE))
        };

        Ok(RecvResult {
            len,
            source: source_ip(&source)?,
            response_ttl: ttl_from_control(&control[..control_len], self.ipv6),
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd")))]
    fn recv_message(&self, buffer: &mut [u8]) -> Result<RecvResult> {
        let (len, source) = self.socket.recv_from(as_uninit(buffer))?;
        Ok(RecvResult {
            len,
            source: source_ip(&source)?,
            response_ttl: None,
        })
    }
}

/// Check that some ICMP socket can be opened, before the loop starts.
/// Returns true when only the unprivileged kind is available.
pub fn check_permissions(ipv6: bool) -> Result<bool> {
    EchoSocket::open(ipv6).map(|socket| socket.is_dgram())
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: same layout, and the kernel only ever writes initialized bytes
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

fn source_ip(addr: &SockAddr) -> Result<IpAddr> {
    addr.as_socket()
        .map(|s| s.ip())
        .ok_or_else(|| anyhow!("Message from a non-IP address"))
}

/// TTL (IPv4) or hop limit (IPv6) from a received control buffer.
///
/// Linux reports `IP_TTL` as an int; BSDs report `IP_RECVTTL` as one byte.
#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd"))]
fn ttl_from_control(control: &[u8], ipv6: bool) -> Option<u8> {
    let header_len = std::mem::size_of::<libc::cmsghdr>();
    // SAFETY: pure arithmetic
    let data_offset = unsafe { libc::CMSG_LEN(0) } as usize;

    let mut offset = 0;
    while offset + header_len <= control.len() {
        // SAFETY: bounds checked above, read_unaligned tolerates any alignment
        let header: libc::cmsghdr =
            unsafe { std::ptr::read_unaligned(control[offset..].as_ptr().cast()) };
        let len = header.cmsg_len as usize;
        if len < data_offset || offset + len > control.len() {
            return None;
        }

        let wanted = if ipv6 {
            header.cmsg_level == libc::IPPROTO_IPV6 && header.cmsg_type == libc::IPV6_HOPLIMIT
        } else {
            header.cmsg_level == libc::IPPROTO_IP
                && (header.cmsg_type == libc::IP_TTL || header.cmsg_type == libc::IP_RECVTTL)
        };
        if wanted {
            let data = &control[offset + data_offset..offset + len];
            return match data {
                [ttl] => Some(*ttl),
                [a, b, c, d, ..] => Some(i32::from_ne_bytes([*a, *b, *c, *d]) as u8),
                _ => None,
            };
        }

        // SAFETY: pure arithmetic
        offset += unsafe { libc::CMSG_SPACE((len - data_offset) as libc::c_uint) } as usize;
    }
    None
}

#[cfg(all(test, any(target_os = "linux", target_os = "android", target_vendor = "apple", target_os = "freebsd")))]
mod tests {
    use super::*;

    fn message(level: libc::c_int, kind: libc::c_int, data: &[u8]) -> Vec<u8> {
        let len = unsafe { libc::CMSG_LEN(data.len() as libc::c_uint) } as usize;
        let space = unsafe { libc::CMSG_SPACE(data.len() as libc::c_uint) } as usize;
        let mut header: libc::cmsghdr = unsafe { std::mem::zeroed() };
        header.cmsg_len = len as _;
        header.cmsg_level = level;
        header.cmsg_type = kind;

        let mut buf = vec![0u8; space];
        unsafe { std::ptr::write_unaligned(buf.as_mut_ptr().cast(), header) };
        let offset = unsafe { libc::CMSG_LEN(0) } as usize;
        buf[offset..offset + data.len()].copy_from_slice(data);
        buf
    }

    #[test]
    fn test_ttl_from_int_message() {
        let control = message(libc::IPPROTO_IP, libc::IP_TTL, &57i32.to_ne_bytes());
        assert_eq!(ttl_from_control(&control, false), Some(57));
    }

    #[test]
    fn test_ttl_from_byte_message() {
        let control = message(libc::IPPROTO_IP, libc::IP_RECVTTL, &[118]);
        assert_eq!(ttl_from_control(&control, false), Some(118));
    }

    #[test]
    fn test_hop_limit_after_other_message() {
        let mut control = message(libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT + 1, &[0; 4]);
        control.extend(message(libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT, &64i32.to_ne_bytes()));
        assert_eq!(ttl_from_control(&control, true), Some(64));
        assert_eq!(ttl_from_control(&control, false), None);
    }

    #[test]
    fn test_truncated_control() {
        let control = message(libc::IPPROTO_IP, libc::IP_TTL, &57i32.to_ne_bytes());
        assert_eq!(ttl_from_control(&control[..control.len() - 6], false), None);
        assert_eq!(ttl_from_control(&[], false), None);
    }
}
