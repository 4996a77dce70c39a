use funty::Unsigned;
use memmap2::{Mmap, MmapAsRawDesc};
use std::marker::PhantomData;
use std::ops::Deref;

/// An immutable memory-mapped slice of unsigned integers, used to read
/// encoded corpus files without copying them.
pub struct MmapSlice<T: Unsigned> {
    mmap: Mmap,
    _element_type: PhantomData<T>,
}

impl<T: Unsigned> MmapSlice<T> {
    pub fn new<F: MmapAsRawDesc>(file: F) -> std::io::Result<Self> {
        let raw = unsafe { Mmap::map(file)? };

        // Sanity check that the file size is a multiple of the element size.
        if raw.len() % std::mem::size_of::<T>() != 0 {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "file size is not a multiple of the code size",
            ))
        } else {
            Ok(MmapSlice {
                mmap: raw,
                _element_type: PhantomData,
            })
        }
    }

    /// Number of codes in the map.
    pub fn len(&self) -> usize {
        self.mmap.len() / std::mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        // An empty map may not be aligned for T.
        if self.is_empty() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr() as *const T, self.len()) }
    }
}

impl<T: Unsigned> Deref for MmapSlice<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}
