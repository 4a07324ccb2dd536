/// Every block size and every payload address is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Smallest payload ever handed out. A freed block must be able to hold its
/// two free-list links.
pub const MIN_PAYLOAD: usize = ALIGNMENT * 2;

/// Rounds `value` up to the next multiple of `ALIGNMENT`.
///
/// Returns `None` if the rounded value does not fit in a `usize`.
///
/// ```rust
/// use freelist::align::align_up;
///
/// assert_eq!(align_up(13), Some(16));
/// assert_eq!(align_up(16), Some(16));
/// assert_eq!(align_up(usize::MAX), None);
/// ```
#[inline]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

#[inline]
pub const fn align_down(value: usize) -> usize {
    value & !(ALIGNMENT - 1)
}

#[inline]
pub const fn is_aligned(value: usize) -> bool {
    value & (ALIGNMENT - 1) == 0
}

/// Payload size actually reserved for a request of `requested` bytes.
///
/// Never smaller than `MIN_PAYLOAD`, always a multiple of `ALIGNMENT`.
#[inline]
pub const fn request_size(requested: usize) -> Option<usize> {
    if requested <= MIN_PAYLOAD {
        return Some(MIN_PAYLOAD);
    }
    align_up(requested)
}
