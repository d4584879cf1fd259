//! Extension traits for protocol buffer handling.
use bytes::{Buf, BufMut, Bytes};

/// Counts are usize in rust while the wire wants fixed-width integers;
/// these panic on overflow instead of wrapping, since a frame that large
/// is already broken.
pub trait UsizeExt {
    fn to_u32(self) -> u32;
    fn to_u16(self) -> u16;
}

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// Decoding helpers for message payloads received from the client.
///
/// Unlike the sending side, a malformed payload here is client input, not a
/// programming error, so these return `None` instead of panicking.
pub trait BytesExt {
    /// Split off bytes up to the next nul terminator, consuming it.
    fn get_nul_bytes(&mut self) -> Option<Bytes>;

    /// Split off a nul terminated UTF-8 string.
    fn get_nul_string(&mut self) -> Option<String>;
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Option<Bytes> {
        let end = self.iter().position(|e| matches!(e, b'\0'))?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Some(me)
    }

    fn get_nul_string(&mut self) -> Option<String> {
        let b = self.get_nul_bytes()?;
        String::from_utf8(b.to_vec()).ok()
    }
}
