use std::ops::Deref;

/// Pads `T` out to its own cache line so neighbouring fields cannot
/// false-share with it. Used for the two words producers hammer from
/// different threads: a queue's write index and the ring's request id
/// counter.
///
/// Line size is picked per target: 128 B on aarch64 (Apple M-series and
/// Neoverse prefetch in pairs), 256 B on s390x, 64 B everywhere else.
#[cfg_attr(target_arch = "aarch64", repr(align(128)))]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    not(any(target_arch = "aarch64", target_arch = "s390x")),
    repr(align(64))
)]
pub(crate) struct LinePadded<T>(T);

impl<T> LinePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for LinePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}
