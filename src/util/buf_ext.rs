use bytes::{Buf, Bytes};

/// A read went past the end of the buffer. Datagrams arrive from the network, so this is a
///  regular outcome of parsing rather than a bug.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
#[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
pub struct BufferUnderflow {
    pub needed: usize,
    pub remaining: usize,
}

macro_rules! try_read_impl {
    ($try_reader: ident, $ty:ty, $getter: ident) => {
        fn $try_reader(&mut self) -> Result<$ty, BufferUnderflow> {
            self.ensure_remaining(size_of::<$ty>())?;
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads in network byte order. The unchecked getters of [Buf] panic on
///  underflow, which is not acceptable for attacker-controlled input.
pub trait BufExt: Buf {
    fn ensure_remaining(&self, needed: usize) -> Result<(), BufferUnderflow> {
        if self.remaining() < needed {
            return Err(BufferUnderflow { needed, remaining: self.remaining() });
        }
        Ok(())
    }

    try_read_impl!(try_read_u8, u8, get_u8);
    try_read_impl!(try_read_u16, u16, get_u16);
    try_read_impl!(try_read_u32, u32, get_u32);

    fn try_read_bytes(&mut self, len: usize) -> Result<Bytes, BufferUnderflow> {
        self.ensure_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }
}

impl <T: Buf> BufExt for T {
}
