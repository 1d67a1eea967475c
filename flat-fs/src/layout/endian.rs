//! 大端序整数，按 1 字节对齐

use core::fmt;

macro_rules! big_endian {
    ($name:ident, $int:ty, $bytes:literal) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name([u8; $bytes]);

        impl $name {
            #[inline]
            pub const fn new(value: $int) -> Self {
                Self(value.to_be_bytes())
            }

            #[inline]
            pub const fn get(self) -> $int {
                <$int>::from_be_bytes(self.0)
            }

            #[inline]
            pub fn set(&mut self, value: $int) {
                self.0 = value.to_be_bytes();
            }

            /// 以 `-1` 表示空的块号
            #[inline]
            pub fn block(self) -> Option<u32> {
                u32::try_from(self.get()).ok()
            }

            #[inline]
            pub fn set_block(&mut self, block: Option<u32>) {
                self.set(block.map_or(-1, |block| block as $int));
            }
        }

        impl From<$int> for $name {
            #[inline]
            fn from(value: $int) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for $int {
            #[inline]
            fn from(value: $name) -> Self {
                value.get()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.get(), f)
            }
        }
    };
}

big_endian!(BeI32, i32, 4);
big_endian!(BeI16, i16, 2);

impl BeI16 {
    pub const NONE: Self = Self::new(-1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_big_endian() {
        assert_eq!(BeI32::new(0x0102_0304).0, [1, 2, 3, 4]);
        assert_eq!(BeI16::new(-1).0, [0xFF, 0xFF]);
        assert_eq!(BeI16::new(0x0203).get(), 0x0203);
    }

    #[test]
    fn negative_is_unmapped() {
        assert_eq!(BeI16::NONE.block(), None);
        assert_eq!(BeI16::new(42).block(), Some(42));

        let mut ptr = BeI32::default();
        ptr.set_block(None);
        assert_eq!(ptr.get(), -1);
        ptr.set_block(Some(7));
        assert_eq!(ptr.get(), 7);
    }
}
