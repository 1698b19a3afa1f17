//! 9P error representations.
//!
//! 9P2000 and 9P2000.u represent remote errors as strings (`Rerror.ename`),
//! with 9P2000.u additionally carrying a numeric errno alongside the
//! string. Locally raised errors (bad wire shapes, namespace/mount
//! violations) get their own variants rather than being forced through
//! errno.

use std::io;
use std::io::ErrorKind::*;
use std::fmt;

use self::errno::*;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

fn errno_from_ioerror(e: &io::Error) -> nix::errno::Errno {
    e.raw_os_error().map(nix::errno::Errno::from_raw).unwrap_or(match e.kind() {
        NotFound => ENOENT,
        PermissionDenied => EPERM,
        ConnectionRefused => ECONNREFUSED,
        ConnectionReset => ECONNRESET,
        ConnectionAborted => ECONNABORTED,
        NotConnected => ENOTCONN,
        AddrInUse => EADDRINUSE,
        AddrNotAvailable => EADDRNOTAVAIL,
        BrokenPipe => EPIPE,
        AlreadyExists => EEXIST,
        WouldBlock => EAGAIN,
        InvalidInput => EINVAL,
        InvalidData => EINVAL,
        TimedOut => ETIMEDOUT,
        WriteZero => EAGAIN,
        Interrupted => EINTR,
        _ => EIO,
    })
}

/// Errors produced by this crate.
///
/// `errno()` gives every variant a POSIX errno for callers that need one,
/// mirroring the way 9P2000.u carries a numeric errno alongside its error
/// string.
#[derive(Debug)]
pub enum Error {
    /// A local errno-shaped failure (path resolution, permission checks).
    No(nix::errno::Errno),
    /// Transport I/O failure.
    Io(io::Error),
    /// The peer's wire data didn't have the shape this protocol requires.
    Protocol(String),
    /// An `Rerror` response from the remote server.
    Remote { message: String, errno: Option<nix::errno::Errno> },
    /// A namespace or mount-table operation couldn't be satisfied locally.
    Namespace(String),
}

impl Error {
    pub fn errno(&self) -> nix::errno::Errno {
        match *self {
            Error::No(e) => e,
            Error::Io(ref e) => errno_from_ioerror(e),
            Error::Protocol(_) => EPROTO,
            Error::Remote { errno, .. } => errno.unwrap_or(EIO),
            Error::Namespace(_) => EINVAL,
        }
    }

    pub fn remote(message: impl Into<String>) -> Error {
        Error::Remote { message: message.into(), errno: None }
    }

    pub fn remote_with_errno(message: impl Into<String>, errno: i32) -> Error {
        Error::Remote { message: message.into(), errno: Some(nix::errno::Errno::from_raw(errno)) }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::No(ref e) => write!(f, "system error: {}", e),
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
            Error::Protocol(ref s) => write!(f, "protocol error: {}", s),
            Error::Remote { ref message, .. } => write!(f, "remote error: {}", message),
            Error::Namespace(ref s) => write!(f, "namespace error: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(e: nix::errno::Errno) -> Self {
        Error::No(e)
    }
}

/// Errno, error numbers.
pub mod errno {
    pub use nix::errno::Errno::*;
}

/// 9P error strings, imported from include/net/9p/error.c of the Linux
/// kernel (9P2000 legacy string set).
pub mod string {
    pub const EPERM: &str = "Operation not permitted";
    pub const EPERM_WSTAT: &str = "wstat prohibited";
    pub const ENOENT: &str = "No such file or directory";
    pub const ENOENT_DIR: &str = "directory entry not found";
    pub const ENOENT_FILE: &str = "file not found";
    pub const EINTR: &str = "Interrupted system call";
    pub const EIO: &str = "Input/output error";
    pub const ENXIO: &str = "No such device or address";
    pub const E2BIG: &str = "Argument list too long";
    pub const EBADF: &str = "Bad file descriptor";
    pub const EAGAIN: &str = "Resource temporarily unavailable";
    pub const ENOMEM: &str = "Cannot allocate memory";
    pub const EACCES: &str = "Permission denied";
    pub const EFAULT: &str = "Bad address";
    pub const ENOTBLK: &str = "Block device required";
    pub const EBUSY: &str = "Device or resource busy";
    pub const EEXIST: &str = "File exists";
    pub const EXDEV: &str = "Invalid cross-device link";
    pub const ENODEV: &str = "No such device";
    pub const ENOTDIR: &str = "Not a directory";
    pub const EISDIR: &str = "Is a directory";
    pub const EINVAL: &str = "Invalid argument";
    pub const ENFILE: &str = "Too many open files in system";
    pub const EMFILE: &str = "Too many open files";
    pub const ETXTBSY: &str = "Text file busy";
    pub const EFBIG: &str = "File too large";
    pub const ENOSPC: &str = "No space left on device";
    pub const ESPIPE: &str = "Illegal seek";
    pub const EROFS: &str = "Read-only file system";
    pub const EMLINK: &str = "Too many links";
    pub const EPIPE: &str = "Broken pipe";
    pub const EDEADLK: &str = "Resource deadlock avoided";
    pub const ENAMETOOLONG: &str = "File name too long";
    pub const ENOLCK: &str = "No locks available";
    pub const ENOSYS: &str = "Function not implemented";
    pub const ENOTEMPTY: &str = "Directory not empty";
    pub const ELOOP: &str = "Too many levels of symbolic links";
    pub const ENODATA: &str = "No data available";
    pub const EREMOTE: &str = "Object is remote";
    pub const ENOLINK: &str = "Link has been severed";
    pub const ECOMM: &str = "Communication error on send";
    pub const EPROTO: &str = "Protocol error";
    pub const EBADMSG: &str = "Bad message";
    pub const ENOTSOCK: &str = "Socket operation on non-socket";
    pub const EMSGSIZE: &str = "Message too long";
    pub const EOPNOTSUPP: &str = "Operation not supported";
    pub const ENETDOWN: &str = "Network is down";
    pub const ENETUNREACH: &str = "Network is unreachable";
    pub const ECONNABORTED: &str = "Software caused connection abort";
    pub const ECONNRESET: &str = "Connection reset by peer";
    pub const ENOBUFS: &str = "No buffer space available";
    pub const EISCONN: &str = "Transport endpoint is already connected";
    pub const ENOTCONN: &str = "Transport endpoint is not connected";
    pub const ETIMEDOUT: &str = "Connection timed out";
    pub const ECONNREFUSED: &str = "Connection refused";
    pub const EHOSTDOWN: &str = "Host is down";
    pub const EHOSTUNREACH: &str = "No route to host";
    pub const EALREADY: &str = "Operation already in progress";
    pub const EINPROGRESS: &str = "Operation now in progress";
    pub const EDQUOT: &str = "Disk quota exceeded";
    pub const EBADF2: &str = "fid unknown or out of range";
    pub const EACCES2: &str = "permission denied";
    pub const ENOENT_FILE2: &str = "file does not exist";
    pub const ECONNREFUSED2: &str = "authentication failed";
    pub const ESPIPE2: &str = "bad offset in directory read";
    pub const EBADF3: &str = "bad use of fid";
    pub const EPERM_CONV: &str = "wstat can't convert between files and directories";
    pub const ENOTEMPTY2: &str = "directory is not empty";
    pub const EEXIST2: &str = "file exists";
    pub const EEXIST3: &str = "file already exists";
    pub const EBADF4: &str = "fid already in use";
    pub const ETXTBSY2: &str = "file in use";
    pub const EINVAL2: &str = "illegal mode";
    pub const ENAMETOOLONG2: &str = "illegal name";
    pub const ENOTDIR2: &str = "not a directory";
    pub const EPERM_GRP: &str = "not a member of proposed group";
    pub const EACCES3: &str = "not owner";
    pub const EROFS2: &str = "read only file system";
    pub const EINVAL3: &str = "unknown group";
    pub const EINVAL4: &str = "unknown user";
    pub const EPROTO2: &str = "bogus wstat buffer";
    pub const EAGAIN2: &str = "exclusive use file already open";
    pub const ENOENT_PATH: &str = "illegal path element";
    pub const EPROTO3: &str = "protocol botch";
    pub const ENOSPC2: &str = "file system is full";
}
