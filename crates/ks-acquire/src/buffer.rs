//! Ring buffers of raw ADC samples, one per logical channel.
//!
//! The arena is allocated once (typically as a `static`) and shared between
//! the sampler interrupt and the main loop. The sampler is the only writer;
//! readers take a [`Snapshot`] copy inside a critical section.

use core::cell::RefCell;

use critical_section::Mutex;
use ks_core::timing::{Timer, loop_timing};
use ks_core::{ChannelId, MAX_CHANNELS};

/// Samples kept per channel on the reference hardware.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Fixed-capacity circular store of raw samples for one channel.
///
/// `head` is the slot the next sample lands in and always stays in `[0, N)`.
/// Once full, each push overwrites the oldest sample.
#[derive(Clone, Debug)]
pub struct ChannelBuffer<const N: usize> {
    samples: [u16; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Default for ChannelBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ChannelBuffer<N> {
    pub const fn new() -> Self {
        assert!(N > 0, "channel buffer capacity must be nonzero");
        Self {
            samples: [0; N],
            head: 0,
            len: 0,
        }
    }

    /// Append one sample, overwriting the oldest once full.
    #[inline]
    pub fn push(&mut self, sample: u16) {
        self.samples[self.head] = sample;
        self.head = if self.head + 1 == N { 0 } else { self.head + 1 };
        if self.len < N {
            self.len += 1;
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// Number of valid samples (saturates at capacity).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Copy the buffer out. Plain memcpy; callers sharing the buffer with
    /// the sampler go through [`SampleArena::snapshot`].
    pub fn snapshot(&self) -> Snapshot<N> {
        Snapshot {
            samples: self.samples,
            head: self.head,
            len: self.len,
        }
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Owned copy of a [`ChannelBuffer`], detached from the sampler.
#[derive(Clone, Debug)]
pub struct Snapshot<const N: usize> {
    samples: [u16; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Snapshot<N> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid samples in storage order (not chronological once wrapped).
    ///
    /// Order does not matter for moment statistics, so this avoids the
    /// rotation done by [`Snapshot::chronological`].
    pub fn valid(&self) -> &[u16] {
        if self.len == N {
            &self.samples
        } else {
            &self.samples[..self.len]
        }
    }

    /// Valid samples oldest first.
    pub fn chronological(&self) -> impl Iterator<Item = u16> + '_ {
        let start = if self.len == N { self.head } else { 0 };
        (0..self.len).map(move |i| self.samples[(start + i) % N])
    }
}

/// Fixed arena holding one buffer per addressable channel.
///
/// Indexed by [`ChannelId`] so channel ids from configuration map straight
/// to storage without a lookup table. Channels the sampler never visits
/// simply stay empty.
pub struct SampleArena<const N: usize> {
    buffers: Mutex<RefCell<[ChannelBuffer<N>; MAX_CHANNELS]>>,
}

impl<const N: usize> Default for SampleArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SampleArena<N> {
    pub const fn new() -> Self {
        Self {
            buffers: Mutex::new(RefCell::new(
                [const { ChannelBuffer::new() }; MAX_CHANNELS],
            )),
        }
    }

    /// Append from the sampler. Called in interrupt context.
    #[inline]
    pub fn append(&self, channel: ChannelId, sample: u16) {
        critical_section::with(|cs| {
            self.buffers.borrow_ref_mut(cs)[usize::from(channel.raw())].push(sample);
        });
    }

    /// Copy one channel's buffer. The critical section covers the copy only.
    pub fn snapshot(&self, channel: ChannelId) -> Snapshot<N> {
        let timer = Timer::start();
        let snap = critical_section::with(|cs| {
            self.buffers.borrow_ref(cs)[usize::from(channel.raw())].snapshot()
        });
        timer.stop_into(&loop_timing::SNAPSHOT_COPY);
        snap
    }

    /// Number of valid samples currently held for `channel`.
    pub fn len(&self, channel: ChannelId) -> usize {
        critical_section::with(|cs| self.buffers.borrow_ref(cs)[usize::from(channel.raw())].len())
    }

    /// Drop every recorded sample (used when the channel list changes).
    pub fn clear(&self) {
        critical_section::with(|cs| {
            for buf in self.buffers.borrow_ref_mut(cs).iter_mut() {
                buf.clear();
            }
        });
    }
}
