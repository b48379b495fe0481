//! Plain-value byte codec used by boxing.

/// Fixed-size plain values that round-trip through a boxed payload.
///
/// Encoding is little-endian so a zero-initialized payload decodes to the
/// type's zero value.
pub trait ValueBits: Copy {
    const SIZE: usize;

    fn write_bits(self, buf: &mut [u8]);
    fn read_bits(buf: &[u8]) -> Self;
}

macro_rules! impl_value_bits {
    ($($t:ty),* $(,)?) => {
        $(
            impl ValueBits for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_bits(self, buf: &mut [u8]) {
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn read_bits(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&buf[..Self::SIZE]);
                    Self::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_value_bits!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl ValueBits for bool {
    const SIZE: usize = 1;

    fn write_bits(self, buf: &mut [u8]) {
        buf[0] = self as u8;
    }

    fn read_bits(buf: &[u8]) -> Self {
        buf[0] != 0
    }
}
