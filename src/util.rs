use funty::Unsigned;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Essentially np.bincount(data) in parallel.
pub fn par_bincount<T: Unsigned>(data: &[T]) -> Vec<usize> {
    let max = match data.par_iter().max() {
        Some(m) => m.as_usize(),
        None => return Vec::new(),
    };

    let counts: Vec<AtomicUsize> = (0..=max).map(|_| AtomicUsize::new(0)).collect();
    data.par_iter().for_each(|x| {
        counts[x.as_usize()].fetch_add(1, Ordering::Relaxed);
    });
    counts.into_iter().map(|c| c.into_inner()).collect()
}

/// Return a zero-copy view of the given slice with the given type.
/// The resulting view has the same lifetime as the provided slice.
#[inline]
pub fn transmute_slice<T, U>(slice: &[T]) -> &[U] {
    // SAFETY: We use floor division to ensure that we can't read past the end of the slice.
    let new_len = std::mem::size_of_val(slice) / std::mem::size_of::<U>();
    unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const U, new_len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmute_codes() {
        let codes: Vec<u32> = vec![0, 4, 300, u32::MAX];
        let bytes = transmute_slice::<u32, u8>(&codes);
        assert_eq!(bytes.len(), 16);

        for (chunk, code) in bytes.chunks(4).zip(&codes) {
            assert_eq!(u32::from_ne_bytes(chunk.try_into().unwrap()), *code);
        }
    }

    #[test]
    fn test_par_bincount() {
        let counts: Vec<u32> = vec![2, 2, 5, 2, 3];
        assert_eq!(par_bincount(&counts), vec![0, 0, 3, 1, 0, 1]);
        assert!(par_bincount::<u32>(&[]).is_empty());
    }
}
