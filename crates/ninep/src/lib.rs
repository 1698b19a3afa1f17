//! A 9P2000/9P2000.u client and a Plan 9 style per-process namespace/mount
//! engine built on top of it.
//!
//! [`client::Client`] speaks the wire protocol over any
//! `AsyncRead + AsyncWrite` transport. [`ns::Namespace`] layers the
//! Plan 9 namespace model on top of one or more clients: attach points,
//! a mount table supporting union directories and bind mounts, and
//! path-aware walk/open/create/stat/remove operations.
//!
//! ```no_run
//! use ninep::{client::Client, ns::Namespace, path};
//!
//! # async fn go() -> ninep::error::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:564").await?;
//! let client = Client::connect(stream, ninep::fcall::MSIZE).await?;
//!
//! let ns = Namespace::new();
//! ns.attach(client, "glenda", "").await?;
//! let fid = ns.fwalk_to(None, &path::parse("/")).await?;
//! let _stat = ns.fstat(&fid).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dial;
pub mod error;
pub mod fcall;
pub mod idpool;
pub mod mount;
pub mod ns;
pub mod path;
pub mod serialize;

pub use client::Client;
pub use error::{Error, Result};
pub use fcall::{FCall, Qid, Stat};
pub use ns::{Fid, Namespace};
