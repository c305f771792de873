//! Raw evdev plumbing: the packed frame format read from and written to
//! `/dev/input/event*`, a re-chunking buffer for partial reads, and the
//! ioctls used to probe devices.

#![allow(non_camel_case_types)]

use ::byteorder::{ByteOrder, LittleEndian};
use ::nix::{convert_ioctl_res, ioctl_read, ioctl_read_buf, ioctl_write_int, ioctl_write_ptr, request_code_read};
use ::std::time::Duration;

// Event families. See https://www.kernel.org/doc/Documentation/input/event-codes.txt
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_LED: u16 = 0x11;

// Codes within the families the decoder understands.
pub const CODE_X: u16 = 0x00;
pub const CODE_Y: u16 = 0x01;
pub const CODE_SCANCODE: u16 = 0x04;
pub const CODE_SLOT: u16 = 0x2f;
pub const CODE_SLOT_X: u16 = 0x35;
pub const CODE_SLOT_Y: u16 = 0x36;
pub const CODE_SLOT_ID: u16 = 0x39;

// Capability bit numbers for EVIOCGBIT(0).
pub const EV_BIT_KEY: u32 = 0x01;
pub const EV_BIT_REL: u32 = 0x02;
pub const EV_BIT_ABS: u32 = 0x03;
pub const EV_BIT_LED: u32 = 0x11;

// Bus types reported in input_id.bustype.
pub const BUS_USB: u16 = 0x03;
pub const BUS_BLUETOOTH: u16 = 0x05;

pub const KEY_MAX: usize = 0x2ff;

/// One packed little-endian frame as exchanged with the device file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub sec: u32,
    pub usec: u32,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

pub const RAW_EVENT_SIZE: usize = 16;

impl RawEvent {
    pub fn new(type_: u16, code: u16, value: i32) -> RawEvent {
        RawEvent { sec: 0, usec: 0, type_, code, value }
    }

    pub fn parse(buf: &[u8]) -> RawEvent {
        RawEvent {
            sec: LittleEndian::read_u32(&buf[0..4]),
            usec: LittleEndian::read_u32(&buf[4..8]),
            type_: LittleEndian::read_u16(&buf[8..10]),
            code: LittleEndian::read_u16(&buf[10..12]),
            value: LittleEndian::read_i32(&buf[12..16]),
        }
    }

    pub fn encode(&self) -> [u8; RAW_EVENT_SIZE] {
        let mut buf = [0u8; RAW_EVENT_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.sec);
        LittleEndian::write_u32(&mut buf[4..8], self.usec);
        LittleEndian::write_u16(&mut buf[8..10], self.type_);
        LittleEndian::write_u16(&mut buf[10..12], self.code);
        LittleEndian::write_i32(&mut buf[12..16], self.value);
        buf
    }

    /// Kernel timestamp of the frame.
    pub fn time(&self) -> Duration {
        Duration::new(u64::from(self.sec), self.usec.saturating_mul(1000))
    }
}

/// Accumulates bytes from arbitrarily-chunked reads and yields whole frames.
/// A trailing partial frame stays buffered until the rest arrives; if the
/// stream ends first it is a malformed frame and the caller discards it.
#[derive(Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    offset: usize,
}

impl FrameBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.offset > 0 {
            self.pending.drain(..self.offset);
            self.offset = 0;
        }
        self.pending.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Option<RawEvent> {
        if self.pending.len() - self.offset < RAW_EVENT_SIZE {
            return None;
        }
        let frame = RawEvent::parse(&self.pending[self.offset..self.offset + RAW_EVENT_SIZE]);
        self.offset += RAW_EVENT_SIZE;
        Some(frame)
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn residue(&self) -> usize {
        self.pending.len() - self.offset
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct input_id {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

ioctl_read!(eviocgid, b'E', 0x02, input_id);
ioctl_read_buf!(eviocgname, b'E', 0x06, u8);
ioctl_read_buf!(eviocgled, b'E', 0x19, u8);
ioctl_write_int!(eviocgrab, b'E', 0x90);
ioctl_write_ptr!(eviocsclockid, b'E', 0xa0, ::libc::c_int);

pub unsafe fn eviocgbit(
    fd: ::libc::c_int,
    ev: u32,
    len: ::libc::c_int,
    buf: *mut u8,
) -> ::nix::Result<i32> {
    convert_ioctl_res!(::nix::libc::ioctl(
        fd,
        request_code_read!(b'E', 0x20 + ev, len) as ::libc::c_ulong,
        buf
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_codec_round_trip() {
        let frame = RawEvent { sec: 12, usec: 345678, type_: EV_ABS, code: CODE_SLOT_ID, value: -1 };
        assert_eq!(RawEvent::parse(&frame.encode()), frame);
    }

    #[test]
    fn frame_time() {
        let frame = RawEvent { sec: 2, usec: 500_000, ..RawEvent::default() };
        assert_eq!(frame.time(), Duration::from_millis(2500));
    }

    #[test]
    fn frames_survive_rechunking() {
        let frames = [
            RawEvent::new(EV_KEY, 30, 1),
            RawEvent::new(EV_SYN, 0, 0),
            RawEvent::new(EV_REL, CODE_X, -7),
        ];
        let mut bytes = Vec::new();
        for frame in &frames {
            bytes.extend_from_slice(&frame.encode());
        }

        // Feed the same byte stream at every possible split position and
        // expect identical frame sequences.
        for split in 0..bytes.len() {
            let mut buffer = FrameBuffer::default();
            buffer.extend(&bytes[..split]);
            let mut got = Vec::new();
            while let Some(frame) = buffer.next_frame() {
                got.push(frame);
            }
            buffer.extend(&bytes[split..]);
            while let Some(frame) = buffer.next_frame() {
                got.push(frame);
            }
            assert_eq!(got, frames);
            assert_eq!(buffer.residue(), 0);
        }
    }

    #[test]
    fn short_tail_is_held_back() {
        let mut buffer = FrameBuffer::default();
        buffer.extend(&RawEvent::new(EV_SYN, 0, 0).encode()[..10]);
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.residue(), 10);
    }
}
