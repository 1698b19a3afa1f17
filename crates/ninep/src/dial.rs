//! Dial address parsing: `proto!host[!service]`, `proto!path`, and bare
//! `host[:port]` forms.

use std::ffi::CString;

use crate::error::{Error, Result};

/// A parsed network or local-socket address to connect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialAddr {
    /// `tcp`/`tcp4`/`tcp6`/`udp`/`udp4`/`udp6` style network address.
    Net { proto: String, host: String, port: u16 },
    /// `unix`/`unixpacket` style local socket path.
    Path { proto: String, path: String },
}

/// Parse a dial string of the form `proto!host[!service]`, `proto!path`
/// (for `unix`/`unixpacket`), or bare `host[:port]` (defaults to `tcp`).
pub fn parse(addr: &str) -> Result<DialAddr> {
    if addr.is_empty() {
        return Err(Error::Namespace("empty dial address".into()));
    }

    if let Some((proto, rest)) = addr.split_once('!') {
        return parse_with_proto(proto, rest);
    }

    // Bare host[:port], default to tcp; no port at all defaults to the
    // v9fs service port, same as `proto!host` with no `!service` suffix.
    if let Some((host, port)) = addr.rsplit_once(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Namespace(format!("invalid port in dial address: {}", addr)))?;
        return Ok(DialAddr::Net {
            proto: "tcp".to_owned(),
            host: host.to_owned(),
            port,
        });
    }

    Ok(DialAddr::Net {
        proto: "tcp".to_owned(),
        host: addr.to_owned(),
        port: crate::fcall::V9FS_PORT,
    })
}

fn parse_with_proto(proto: &str, rest: &str) -> Result<DialAddr> {
    match proto {
        "unix" | "unixpacket" => Ok(DialAddr::Path {
            proto: proto.to_owned(),
            path: rest.to_owned(),
        }),
        "tcp" | "tcp4" | "tcp6" | "udp" | "udp4" | "udp6" => {
            let (host, service) = match rest.split_once('!') {
                Some((h, s)) => (h, Some(s)),
                None => (rest, None),
            };
            let port = match service {
                Some(s) => resolve_service(s, proto)?,
                None => crate::fcall::V9FS_PORT,
            };
            Ok(DialAddr::Net {
                proto: proto.to_owned(),
                host: host.to_owned(),
                port,
            })
        }
        other => Err(Error::Namespace(format!("unknown dial protocol: {}", other))),
    }
}

fn resolve_service(service: &str, proto: &str) -> Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }

    let service_c = CString::new(service)
        .map_err(|_| Error::Namespace(format!("invalid service name: {}", service)))?;
    let sock_proto = if proto.starts_with("udp") { "udp" } else { "tcp" };
    let proto_c = CString::new(sock_proto).unwrap();

    // SAFETY: both CStrings outlive the call; getservbyname returns a
    // pointer into libc's internal static buffer which we copy out of
    // immediately and never retain.
    let ent = unsafe { libc::getservbyname(service_c.as_ptr(), proto_c.as_ptr()) };
    if ent.is_null() {
        return Err(Error::Namespace(format!("unknown service: {}", service)));
    }
    // SAFETY: ent is non-null and s_port is a plain field read.
    let port = unsafe { (*ent).s_port };
    Ok(u16::from_be(port as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_host_service() {
        let addr = parse("tcp!example.com!9999").unwrap();
        assert_eq!(
            addr,
            DialAddr::Net {
                proto: "tcp".to_owned(),
                host: "example.com".to_owned(),
                port: 9999,
            }
        );
    }

    #[test]
    fn parses_tcp_host_without_service_uses_v9fs_port() {
        let addr = parse("tcp!example.com").unwrap();
        assert_eq!(
            addr,
            DialAddr::Net {
                proto: "tcp".to_owned(),
                host: "example.com".to_owned(),
                port: crate::fcall::V9FS_PORT,
            }
        );
    }

    #[test]
    fn parses_unix_path() {
        let addr = parse("unix!/tmp/ninep.sock").unwrap();
        assert_eq!(
            addr,
            DialAddr::Path {
                proto: "unix".to_owned(),
                path: "/tmp/ninep.sock".to_owned(),
            }
        );
    }

    #[test]
    fn parses_bare_host_port() {
        let addr = parse("example.com:564").unwrap();
        assert_eq!(
            addr,
            DialAddr::Net {
                proto: "tcp".to_owned(),
                host: "example.com".to_owned(),
                port: 564,
            }
        );
    }

    #[test]
    fn rejects_unknown_proto() {
        assert!(parse("sctp!example.com").is_err());
    }

    #[test]
    fn bare_host_with_no_port_defaults_to_v9fs_port() {
        let addr = parse("192.169.0.0").unwrap();
        assert_eq!(
            addr,
            DialAddr::Net {
                proto: "tcp".to_owned(),
                host: "192.169.0.0".to_owned(),
                port: crate::fcall::V9FS_PORT,
            }
        );
    }

    #[test]
    fn rejects_empty_address() {
        let err = parse("").unwrap_err();
        assert_eq!(err.errno(), crate::error::errno::EINVAL);
    }

    #[test]
    fn rejects_all_bangs() {
        let err = parse("!!!").unwrap_err();
        assert_eq!(err.errno(), crate::error::errno::EINVAL);
    }
}
