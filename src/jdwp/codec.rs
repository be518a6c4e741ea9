//! Packet framing and primitive codec.
//!
//! JDWP packets are big-endian with an 11 byte header: length (including the
//! header), id, flags, then command set/command for commands or a 16-bit
//! error code for replies. Both sides open with a 14 byte `JDWP-Handshake`
//! preamble.

use super::types::{IdSizes, Location, Value, tag};
use super::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

pub const HANDSHAKE: &[u8; 14] = b"JDWP-Handshake";
pub const HEADER_LEN: usize = 11;
pub const FLAG_REPLY: u8 = 0x80;

/// A framed packet, command or reply.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u32,
    pub flags: u8,
    /// Command set and command for commands, (0, 0) for replies.
    pub command: (u8, u8),
    /// Reply error code, 0 for commands.
    pub error: u16,
    pub data: Bytes,
}

impl Packet {
    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    pub fn command(id: u32, set: u8, cmd: u8, data: Bytes) -> Self {
        Self {
            id,
            flags: 0,
            command: (set, cmd),
            error: 0,
            data,
        }
    }

    pub fn reply(id: u32, error: u16, data: Bytes) -> Self {
        Self {
            id,
            flags: FLAG_REPLY,
            command: (0, 0),
            error,
            data,
        }
    }
}

/// Exchange the handshake preamble over a fresh connection.
pub fn handshake(stream: &mut (impl Read + Write)) -> Result<(), Error> {
    stream.write_all(HANDSHAKE)?;
    stream.flush()?;
    let mut buf = [0u8; HANDSHAKE.len()];
    stream.read_exact(&mut buf)?;
    if &buf != HANDSHAKE {
        return Err(Error::Handshake);
    }
    Ok(())
}

/// Read one framed packet. An EOF before the header is a disconnect.
pub fn read_packet(stream: &mut impl Read) -> Result<Packet, Error> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Err(Error::MalformedPacket("length below header size"));
    }
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    let mut data = vec![0u8; length - HEADER_LEN];
    stream.read_exact(&mut data)?;

    let packet = if flags & FLAG_REPLY != 0 {
        Packet::reply(id, u16::from_be_bytes([header[9], header[10]]), data.into())
    } else {
        Packet::command(id, header[9], header[10], data.into())
    };
    Ok(packet)
}

/// Write one framed packet.
pub fn write_packet(stream: &mut impl Write, packet: &Packet) -> Result<(), Error> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + packet.data.len());
    buf.put_u32((HEADER_LEN + packet.data.len()) as u32);
    buf.put_u32(packet.id);
    buf.put_u8(packet.flags);
    if packet.is_reply() {
        buf.put_u16(packet.error);
    } else {
        buf.put_u8(packet.command.0);
        buf.put_u8(packet.command.1);
    }
    buf.extend_from_slice(&packet.data);
    stream.write_all(&buf)?;
    stream.flush()?;
    Ok(())
}

/// Packet payload writer.
#[derive(Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// UTF-8 string prefixed with its byte length.
    pub fn put_string(&mut self, s: &str) {
        self.buf.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Id narrowed to the negotiated width.
    pub fn put_id(&mut self, width: usize, id: u64) {
        let bytes = id.to_be_bytes();
        self.buf.extend_from_slice(&bytes[8 - width..]);
    }

    pub fn put_location(&mut self, sizes: &IdSizes, loc: &Location) {
        self.put_u8(loc.type_tag);
        self.put_id(sizes.reference_type, loc.class);
        self.put_id(sizes.method, loc.method);
        self.put_u64(loc.index);
    }

    /// Tag byte followed by the value payload.
    pub fn put_tagged_value(&mut self, sizes: &IdSizes, value: &Value) {
        self.put_u8(value.tag());
        self.put_untagged_value(sizes, value);
    }

    pub fn put_untagged_value(&mut self, sizes: &IdSizes, value: &Value) {
        match value {
            Value::Void => {}
            Value::Boolean(v) => self.put_u8(*v as u8),
            Value::Byte(v) => self.put_u8(*v as u8),
            Value::Char(v) => self.put_u16(*v),
            Value::Short(v) => self.put_u16(*v as u16),
            Value::Int(v) => self.put_i32(*v),
            Value::Long(v) => self.put_i64(*v),
            Value::Float(v) => self.buf.put_f32(*v),
            Value::Double(v) => self.buf.put_f64(*v),
            Value::Object(id) | Value::String(id) | Value::Array(id) | Value::Thread(id) => {
                self.put_id(sizes.object, *id)
            }
        }
    }
}

/// Packet payload reader with explicit underflow errors.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::MalformedPacket("payload truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i32(&mut self) -> Result<i32, Error> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i64(&mut self) -> Result<i64, Error> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub fn string(&mut self) -> Result<String, Error> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::MalformedPacket("non-utf8 string"))
    }

    pub fn id(&mut self, width: usize) -> Result<u64, Error> {
        let bytes = self.take(width)?;
        let mut out = [0u8; 8];
        out[8 - width..].copy_from_slice(bytes);
        Ok(u64::from_be_bytes(out))
    }

    pub fn location(&mut self, sizes: &IdSizes) -> Result<Location, Error> {
        Ok(Location {
            type_tag: self.u8()?,
            class: self.id(sizes.reference_type)?,
            method: self.id(sizes.method)?,
            index: self.u64()?,
        })
    }

    /// Tag byte followed by the value payload.
    pub fn tagged_value(&mut self, sizes: &IdSizes) -> Result<Value, Error> {
        let t = self.u8()?;
        self.value_of_tag(sizes, t)
    }

    pub fn value_of_tag(&mut self, sizes: &IdSizes, t: u8) -> Result<Value, Error> {
        let value = match t {
            tag::VOID => Value::Void,
            tag::BOOLEAN => Value::Boolean(self.u8()? != 0),
            tag::BYTE => Value::Byte(self.u8()? as i8),
            tag::CHAR => Value::Char(self.u16()?),
            tag::SHORT => Value::Short(self.u16()? as i16),
            tag::INT => Value::Int(self.i32()?),
            tag::LONG => Value::Long(self.i64()?),
            tag::FLOAT => Value::Float(self.f32()?),
            tag::DOUBLE => Value::Double(self.f64()?),
            tag::STRING => Value::String(self.id(sizes.object)?),
            tag::ARRAY => Value::Array(self.id(sizes.object)?),
            tag::THREAD => Value::Thread(self.id(sizes.object)?),
            tag::OBJECT | tag::THREAD_GROUP | tag::CLASS_LOADER | tag::CLASS_OBJECT => {
                Value::Object(self.id(sizes.object)?)
            }
            _ => return Err(Error::UnknownTag(t)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trip() {
        let mut enc = Encoder::new();
        enc.put_string("LTest;");
        let packet = Packet::command(7, 1, 2, enc.finish());

        let mut wire = Vec::new();
        write_packet(&mut wire, &packet).unwrap();
        let read = read_packet(&mut wire.as_slice()).unwrap();

        assert_eq!(read.id, 7);
        assert!(!read.is_reply());
        assert_eq!(read.command, (1, 2));
        let mut dec = Decoder::new(&read.data);
        assert_eq!(dec.string().unwrap(), "LTest;");
    }

    #[test]
    fn narrow_id_round_trip() {
        let mut enc = Encoder::new();
        enc.put_id(4, 0xCAFE);
        let data = enc.finish();
        assert_eq!(data.len(), 4);
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.id(4).unwrap(), 0xCAFE);
    }

    #[test]
    fn tagged_value_round_trip() {
        let sizes = IdSizes::default();
        for value in [
            Value::Int(-3),
            Value::Boolean(true),
            Value::Double(2.5),
            Value::String(42),
            Value::Object(0),
        ] {
            let mut enc = Encoder::new();
            enc.put_tagged_value(&sizes, &value);
            let data = enc.finish();
            let mut dec = Decoder::new(&data);
            assert_eq!(dec.tagged_value(&sizes).unwrap(), value);
        }
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut dec = Decoder::new(&[0, 0]);
        assert!(matches!(dec.i32(), Err(Error::MalformedPacket(_))));
    }
}
