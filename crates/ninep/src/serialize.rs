//! Serialize/deserialize 9P messages into/from binary.

use crate::fcall::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{Read, Result};
use std::mem;
use std::ops::{Shl, Shr};

macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_truncate(decode!($buf))
    };
}

fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, >>, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write a raw byte slice with no length prefix, updating the byte count.
    pub fn encode_raw(&mut self, data: &[u8]) -> Result<usize> {
        self.writer.write_all(data)?;
        self.bytes += data.len();
        Ok(data.len())
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A wrapper class of ReadBytesExt to provide operator overloads
/// for deserializing
#[derive(Clone, Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }
    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
    /// Get inner reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(mut self, rhs: &'a mut T) -> Self::Output {
        match self.decode() {
            Ok(r) => {
                *rhs = r;
                SResult(Ok(self))
            }
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        match self.0 {
            Ok(mut decoder) => match decoder.decode() {
                Ok(r) => {
                    *rhs = r;
                    SResult(Ok(decoder))
                }
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        bytes += w.write_all(self.as_bytes()).and(Ok(self.len()))?;
        Ok(bytes)
    }
}

impl Encodable for Qid {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w) << &self.typ.bits() << &self.version << &self.path {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.0.len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(&self.0)?;
        Ok(bytes)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match self
            .iter()
            .fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s)
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        String::from_utf8(read_exact(r, len as usize)?)
            .map_err(|_| io_err!(InvalidData, "invalid UTF-8 sequence"))
    }
}

impl Decodable for Qid {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(Qid {
            typ: decode!(QidType, *r),
            version: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::new();
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

fn encode_stat_fields<W: WriteBytesExt>(stat: &Stat, w: &mut W, dotu: bool) -> Result<usize> {
    let buf = Encoder::new(w)
        << &stat.typ
        << &stat.dev
        << &stat.qid
        << &stat.mode
        << &stat.atime
        << &stat.mtime
        << &stat.length
        << &stat.name
        << &stat.uid
        << &stat.gid
        << &stat.muid;
    let buf = if dotu {
        buf << &stat.extension << &stat.n_uid << &stat.n_gid << &stat.n_muid
    } else {
        buf
    };
    match buf {
        SResult(Ok(enc)) => Ok(enc.bytes_written()),
        SResult(Err(e)) => Err(e),
    }
}

/// Encodes a `Stat`, gated by whether the connection negotiated 9P2000.u.
///
/// `Stat` has no direct `Encodable` impl because its wire shape depends on
/// the connection's `dotu` flag; callers go through `encode_stat`/
/// `decode_stat` instead of `<<`/`>>`. The record is self-length-prefixed:
/// a leading `size[2]` counts every byte that follows it, matching
/// `Stat::size`, so a reader can skip a whole record without decoding it.
pub fn encode_stat<W: WriteBytesExt>(stat: &Stat, w: &mut W, dotu: bool) -> Result<usize> {
    let mut body = Vec::new();
    encode_stat_fields(stat, &mut body, dotu)?;
    let mut written = (body.len() as u16).encode(w)?;
    w.write_all(&body)?;
    written += body.len();
    Ok(written)
}

fn decode_stat_fields<R: ReadBytesExt>(r: &mut R, dotu: bool) -> Result<Stat> {
    let mut buf = r;
    let typ = decode!(buf);
    let dev = decode!(buf);
    let qid = decode!(buf);
    let mode = decode!(buf);
    let atime = decode!(buf);
    let mtime = decode!(buf);
    let length = decode!(buf);
    let name = decode!(buf);
    let uid = decode!(buf);
    let gid = decode!(buf);
    let muid = decode!(buf);
    let (extension, n_uid, n_gid, n_muid) = if dotu {
        (decode!(buf), decode!(buf), decode!(buf), decode!(buf))
    } else {
        (String::new(), NONUNAME, NONUNAME, NONUNAME)
    };
    Ok(Stat {
        typ,
        dev,
        qid,
        mode,
        atime,
        mtime,
        length,
        name,
        uid,
        gid,
        muid,
        extension,
        n_uid,
        n_gid,
        n_muid,
    })
}

/// Decode a `Stat`, consuming its own leading `size[2]` length prefix
/// first (see [`encode_stat`]).
pub fn decode_stat<R: ReadBytesExt>(r: &mut R, dotu: bool) -> Result<Stat> {
    let mut buf = r;
    let _size: u16 = decode!(buf);
    decode_stat_fields(buf, dotu)
}

/// Decode one length-prefixed `Stat` ("Dir") record from the front of a
/// directory-read buffer, returning the value and the number of bytes it
/// occupies (`size + 2`) so a caller can advance a cursor across a run of
/// consecutive records (`size[2] body size[2] body ...`) without relying
/// on the field decode consuming exactly `size` bytes itself.
pub fn unpack_dir(buf: &[u8], dotu: bool) -> Result<(Stat, usize)> {
    if buf.len() < 2 {
        return res!(io_err!(UnexpectedEof, "truncated dir entry"));
    }
    let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let total = size + 2;
    if buf.len() < total {
        return res!(io_err!(UnexpectedEof, "truncated dir entry"));
    }
    let mut body = &buf[2..total];
    let stat = decode_stat_fields(&mut body, dotu)?;
    Ok((stat, total))
}

/// Encode a `Msg`, gated by whether the connection negotiated 9P2000.u.
///
/// `Rerror.errno` and `Stat.extension`/`n_uid`/`n_gid`/`n_muid` only appear
/// on the wire when `dotu` is set.
pub fn encode_msg<W: WriteBytesExt>(msg: &Msg, w: &mut W, dotu: bool) -> Result<usize> {
    let typ = MsgType::from(&msg.body);
    let buf = Encoder::new(w) << &(typ as u8) << &msg.tag;

    let written = match msg.body {
        FCall::TVersion { ref msize, ref version } => (buf << msize << version).written(),
        FCall::RVersion { ref msize, ref version } => (buf << msize << version).written(),
        FCall::TAuth { ref afid, ref uname, ref aname, ref n_uname } => {
            (buf << afid << uname << aname << n_uname).written()
        }
        FCall::RAuth { ref aqid } => (buf << aqid).written(),
        FCall::TAttach { ref fid, ref afid, ref uname, ref aname, ref n_uname } => {
            (buf << fid << afid << uname << aname << n_uname).written()
        }
        FCall::RAttach { ref qid } => (buf << qid).written(),
        FCall::RError { ref ename, ref errno } => {
            if dotu {
                (buf << ename << errno).written()
            } else {
                (buf << ename).written()
            }
        }
        FCall::TFlush { ref oldtag } => (buf << oldtag).written(),
        FCall::RFlush => buf.written(),
        FCall::TWalk { ref fid, ref newfid, ref wnames } => {
            (buf << fid << newfid << wnames).written()
        }
        FCall::RWalk { ref wqids } => (buf << wqids).written(),
        FCall::TOpen { ref fid, ref mode } => (buf << fid << mode).written(),
        FCall::ROpen { ref qid, ref iounit } => (buf << qid << iounit).written(),
        FCall::TCreate { ref fid, ref name, ref perm, ref mode, ref extension } => {
            let buf = buf << fid << name << perm << mode;
            if dotu { (buf << extension).written() } else { buf.written() }
        }
        FCall::RCreate { ref qid, ref iounit } => (buf << qid << iounit).written(),
        FCall::TRead { ref fid, ref offset, ref count } => {
            (buf << fid << offset << count).written()
        }
        FCall::RRead { ref data } => (buf << data).written(),
        FCall::TWrite { ref fid, ref offset, ref data } => {
            (buf << fid << offset << data).written()
        }
        FCall::RWrite { ref count } => (buf << count).written(),
        FCall::TClunk { ref fid } => (buf << fid).written(),
        FCall::RClunk => buf.written(),
        FCall::TRemove { ref fid } => (buf << fid).written(),
        FCall::RRemove => buf.written(),
        FCall::TStat { ref fid } => (buf << fid).written(),
        FCall::RStat { ref stat } => match buf {
            SResult(Ok(mut enc)) => {
                let mut statbuf = Vec::new();
                encode_stat(stat, &mut statbuf, dotu)?;
                enc.encode(&(statbuf.len() as u16))?;
                enc.encode_raw(&statbuf)?;
                Ok(enc.bytes_written())
            }
            SResult(Err(e)) => Err(e),
        },
        FCall::TWStat { ref fid, ref stat } => match buf << fid {
            SResult(Ok(mut enc)) => {
                let mut statbuf = Vec::new();
                encode_stat(stat, &mut statbuf, dotu)?;
                enc.encode(&(statbuf.len() as u16))?;
                enc.encode_raw(&statbuf)?;
                Ok(enc.bytes_written())
            }
            SResult(Err(e)) => Err(e),
        },
        FCall::RWStat => buf.written(),
    };

    written
}

impl<W: WriteBytesExt> SResult<Encoder<W>> {
    fn written(self) -> Result<usize> {
        match self {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

/// Decode a `Msg`, gated by whether the connection negotiated 9P2000.u.
pub fn decode_msg<R: ReadBytesExt>(r: &mut R, dotu: bool) -> Result<Msg> {
    use crate::fcall::MsgType::*;

    let mut buf = r;

    let msg_type = MsgType::from_u8(decode!(buf));
    let tag = decode!(buf);
    let body = match msg_type {
        Some(TVersion) => FCall::TVersion {
            msize: decode!(buf),
            version: decode!(buf),
        },
        Some(RVersion) => FCall::RVersion {
            msize: decode!(buf),
            version: decode!(buf),
        },
        Some(TAuth) => FCall::TAuth {
            afid: decode!(buf),
            uname: decode!(buf),
            aname: decode!(buf),
            n_uname: decode!(buf),
        },
        Some(RAuth) => FCall::RAuth { aqid: decode!(buf) },
        Some(TAttach) => FCall::TAttach {
            fid: decode!(buf),
            afid: decode!(buf),
            uname: decode!(buf),
            aname: decode!(buf),
            n_uname: decode!(buf),
        },
        Some(RAttach) => FCall::RAttach { qid: decode!(buf) },
        Some(RError) => {
            let ename = decode!(buf);
            let errno = if dotu { decode!(buf) } else { 0 };
            FCall::RError { ename, errno }
        }
        Some(TFlush) => FCall::TFlush {
            oldtag: decode!(buf),
        },
        Some(RFlush) => FCall::RFlush,
        Some(TWalk) => FCall::TWalk {
            fid: decode!(buf),
            newfid: decode!(buf),
            wnames: decode!(buf),
        },
        Some(RWalk) => FCall::RWalk {
            wqids: decode!(buf),
        },
        Some(TOpen) => FCall::TOpen {
            fid: decode!(buf),
            mode: decode!(buf),
        },
        Some(ROpen) => FCall::ROpen {
            qid: decode!(buf),
            iounit: decode!(buf),
        },
        Some(TCreate) => {
            let fid = decode!(buf);
            let name = decode!(buf);
            let perm = decode!(buf);
            let mode = decode!(buf);
            let extension = if dotu { decode!(buf) } else { String::new() };
            FCall::TCreate { fid, name, perm, mode, extension }
        }
        Some(RCreate) => FCall::RCreate {
            qid: decode!(buf),
            iounit: decode!(buf),
        },
        Some(TRead) => FCall::TRead {
            fid: decode!(buf),
            offset: decode!(buf),
            count: decode!(buf),
        },
        Some(RRead) => FCall::RRead { data: decode!(buf) },
        Some(TWrite) => FCall::TWrite {
            fid: decode!(buf),
            offset: decode!(buf),
            data: decode!(buf),
        },
        Some(RWrite) => FCall::RWrite {
            count: decode!(buf),
        },
        Some(TClunk) => FCall::TClunk { fid: decode!(buf) },
        Some(RClunk) => FCall::RClunk,
        Some(TRemove) => FCall::TRemove { fid: decode!(buf) },
        Some(RRemove) => FCall::RRemove,
        Some(TStat) => FCall::TStat { fid: decode!(buf) },
        Some(RStat) => {
            let _size: u16 = decode!(buf);
            FCall::RStat {
                stat: decode_stat(&mut buf, dotu)?,
            }
        }
        Some(TWStat) => {
            let fid = decode!(buf);
            let _size: u16 = decode!(buf);
            FCall::TWStat {
                fid,
                stat: decode_stat(&mut buf, dotu)?,
            }
        }
        Some(RWStat) => FCall::RWStat,
        Some(TError) | None => return res!(io_err!(InvalidData, "invalid message type")),
    };

    Ok(Msg { tag, body })
}

/// Overwrite the 2-byte tag field of an already-encoded frame in place.
///
/// `buf` must hold a complete encoded `Msg` with no length prefix (the
/// caller's framing layer owns that): `type[1] tag[2] ...`.
pub fn set_tag(buf: &mut [u8], tag: u16) {
    debug_assert!(buf.len() >= 3, "frame too short to carry a tag");
    buf[1] = (tag & 0xff) as u8;
    buf[2] = (tag >> 8) as u8;
}

/// Helper function to read a 9P message from a byte-oriented stream
pub fn read_msg<R: ReadBytesExt>(r: &mut R, dotu: bool) -> Result<Msg> {
    decode_msg(r, dotu)
}

/// Helper function to write a 9P message into a byte-oriented stream
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg, dotu: bool) -> Result<usize> {
    encode_msg(msg, w, dotu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut encoder = Vec::new();
        for i in 0..10 {
            (&(i as u8)).encode(&mut encoder).unwrap();
        }
        assert_eq!(expected, encoder);
    }

    #[test]
    fn decoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut decoder = Cursor::new(expected.clone());
        let mut actual: Vec<u8> = Vec::new();
        while let Ok(i) = Decodable::decode(&mut decoder) {
            actual.push(i);
        }
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_version() {
        let expected = Msg {
            tag: NOTAG,
            body: FCall::RVersion {
                msize: MSIZE,
                version: P92000U.to_owned(),
            },
        };
        let mut buf = Vec::new();
        encode_msg(&expected, &mut buf, true).unwrap();

        let mut readbuf = Cursor::new(buf);
        let actual = decode_msg(&mut readbuf, true).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_walk() {
        let expected = Msg {
            tag: 7,
            body: FCall::TWalk {
                fid: 1,
                newfid: 2,
                wnames: vec!["a".to_owned(), "b".to_owned()],
            },
        };
        let mut buf = Vec::new();
        encode_msg(&expected, &mut buf, false).unwrap();
        let mut readbuf = Cursor::new(buf);
        let actual = decode_msg(&mut readbuf, false).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_rerror_dotu() {
        let expected = Msg {
            tag: 3,
            body: FCall::RError {
                ename: "no such file".to_owned(),
                errno: 2,
            },
        };
        let mut buf = Vec::new();
        encode_msg(&expected, &mut buf, true).unwrap();
        let mut readbuf = Cursor::new(buf);
        let actual = decode_msg(&mut readbuf, true).unwrap();
        assert_eq!(expected, actual);
    }

    fn sample_stat(name: &str) -> Stat {
        Stat {
            typ: 0,
            dev: 0,
            qid: Qid::default(),
            mode: 0,
            atime: 0,
            mtime: 0,
            length: 0,
            name: name.to_owned(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
            extension: String::new(),
            n_uid: NONUNAME,
            n_gid: NONUNAME,
            n_muid: NONUNAME,
        }
    }

    #[test]
    fn msg_encode_decode_rstat() {
        let expected = Msg {
            tag: 5,
            body: FCall::RStat { stat: sample_stat("a") },
        };
        let mut buf = Vec::new();
        encode_msg(&expected, &mut buf, false).unwrap();
        let mut readbuf = Cursor::new(buf);
        let actual = decode_msg(&mut readbuf, false).unwrap();
        assert_eq!(expected, actual);
    }

    /// Rstat's outer length (the `n` in `stat[n]`) wraps the whole
    /// self-prefixed record, so it is always the record's own inner
    /// `size` plus the two bytes of that `size` field itself.
    #[test]
    fn rstat_outer_length_is_inner_size_plus_two() {
        let msg = Msg { tag: 1, body: FCall::RStat { stat: sample_stat("a") } };
        let mut buf = Vec::new();
        encode_msg(&msg, &mut buf, false).unwrap();
        // byte layout: type[1] tag[2] n[2] size[2] ...
        let n = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        let inner_size = u16::from_le_bytes([buf[5], buf[6]]) as usize;
        assert_eq!(n, inner_size + 2);
    }

    #[test]
    fn unpack_dir_reports_size_plus_two_and_advances() {
        let mut buf = Vec::new();
        encode_stat(&sample_stat("x"), &mut buf, false).unwrap();
        encode_stat(&sample_stat("y"), &mut buf, false).unwrap();

        let (first, consumed) = unpack_dir(&buf, false).unwrap();
        assert_eq!(first.name, "x");
        let (second, consumed2) = unpack_dir(&buf[consumed..], false).unwrap();
        assert_eq!(second.name, "y");
        assert_eq!(consumed + consumed2, buf.len());
    }

    #[test]
    fn unpack_dir_truncated_buffer_errors() {
        assert!(unpack_dir(&[0x01], false).is_err());
        let mut buf = Vec::new();
        encode_stat(&sample_stat("x"), &mut buf, false).unwrap();
        assert!(unpack_dir(&buf[..buf.len() - 1], false).is_err());
    }

    #[test]
    fn set_tag_overwrites_in_place() {
        let msg = Msg {
            tag: 0,
            body: FCall::TFlush { oldtag: 9 },
        };
        let mut buf = Vec::new();
        encode_msg(&msg, &mut buf, false).unwrap();
        set_tag(&mut buf, 0xbeef);
        let mut readbuf = Cursor::new(buf);
        let decoded = decode_msg(&mut readbuf, false).unwrap();
        assert_eq!(decoded.tag, 0xbeef);
    }
}
