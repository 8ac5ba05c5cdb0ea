//! The memory source capability.
//!
//! A `MemorySource` attaches ("hooks") to a running process and reads raw
//! bytes at emulated addresses. Typed reads are big-endian because the
//! emulated console is.
//!
//! Implementations are not required to be safe for concurrent access: the
//! daemon gives exactly one task ownership of the source.

use crate::error::SourceResult;

/// Hook-and-read access to a target process.
pub trait MemorySource: Send {
    /// Attaches to the target process.
    ///
    /// Called again after a failure or after [`unhook`](Self::unhook); an
    /// implementation may replace any stale handle it still holds.
    fn hook(&mut self) -> SourceResult<()>;

    /// Releases the target process. Must be safe to call when not hooked.
    fn unhook(&mut self);

    /// Returns true while the source holds a usable hook.
    fn is_hooked(&self) -> bool;

    /// Fills `buf` with the bytes starting at `address`.
    fn read_into(&mut self, address: u32, buf: &mut [u8]) -> SourceResult<()>;

    /// Reads one byte.
    fn read_u8(&mut self, address: u32) -> SourceResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(address, &mut buf)?;
        Ok(u8::from_be_bytes(buf))
    }

    /// Reads a big-endian IEEE-754 `f32`.
    fn read_f32(&mut self, address: u32) -> SourceResult<f32> {
        let mut buf = [0u8; 4];
        self.read_into(address, &mut buf)?;
        Ok(f32::from_be_bytes(buf))
    }
}

impl<S: MemorySource + ?Sized> MemorySource for Box<S> {
    fn hook(&mut self) -> SourceResult<()> {
        (**self).hook()
    }

    fn unhook(&mut self) {
        (**self).unhook()
    }

    fn is_hooked(&self) -> bool {
        (**self).is_hooked()
    }

    fn read_into(&mut self, address: u32, buf: &mut [u8]) -> SourceResult<()> {
        (**self).read_into(address, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    /// Flat byte image starting at a fixed base address.
    struct Image {
        base: u32,
        bytes: Vec<u8>,
    }

    impl MemorySource for Image {
        fn hook(&mut self) -> SourceResult<()> {
            Ok(())
        }

        fn unhook(&mut self) {}

        fn is_hooked(&self) -> bool {
            true
        }

        fn read_into(&mut self, address: u32, buf: &mut [u8]) -> SourceResult<()> {
            let start = address
                .checked_sub(self.base)
                .ok_or(SourceError::InvalidAddress {
                    address,
                    len: buf.len(),
                })? as usize;
            let src = self
                .bytes
                .get(start..start + buf.len())
                .ok_or(SourceError::InvalidAddress {
                    address,
                    len: buf.len(),
                })?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn test_typed_reads_are_big_endian() {
        let mut bytes = vec![0x07];
        bytes.extend_from_slice(&1.5f32.to_be_bytes());
        let mut image = Image {
            base: 0x8000_0000,
            bytes,
        };

        assert_eq!(image.read_u8(0x8000_0000).unwrap(), 7);
        assert_eq!(image.read_f32(0x8000_0001).unwrap(), 1.5);
    }

    #[test]
    fn test_short_read_is_an_error() {
        let mut image = Image {
            base: 0x8000_0000,
            bytes: vec![0; 2],
        };
        let err = image.read_f32(0x8000_0000).unwrap_err();
        assert!(matches!(err, SourceError::InvalidAddress { len: 4, .. }));
    }

    #[test]
    fn test_boxed_source_delegates() {
        let mut boxed: Box<dyn MemorySource> = Box::new(Image {
            base: 0,
            bytes: vec![9],
        });
        assert!(boxed.is_hooked());
        assert_eq!(boxed.read_u8(0).unwrap(), 9);
    }
}
