//! Two-level analog multiplexer cascade.
//!
//! Two 8:1 muxes share a single ADC pin: the secondary mux output is wired
//! into one input of the primary mux (the *cascade input*). Both select
//! lines come from one 74HC595 shift register: primary select in bits 0-2,
//! secondary select in bits 3-5.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use ks_core::{ChannelId, KsError, KsResult, MUX_WIDTH};

/// Physical route to one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxAddress {
    /// Input `sub` of the primary mux, read directly.
    Primary { sub: u8 },
    /// Input `sub` of the secondary mux, read through primary input `via`.
    Secondary { sub: u8, via: u8 },
}

impl MuxAddress {
    /// Primary mux input that has to be selected for this route.
    pub fn primary_select(self) -> u8 {
        match self {
            Self::Primary { sub } => sub,
            Self::Secondary { via, .. } => via,
        }
    }
}

/// Where the secondary mux joins the primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeLayout {
    cascade_input: u8,
}

impl CascadeLayout {
    /// Reference board: secondary mux feeds primary input 4.
    pub const REFERENCE_CASCADE_INPUT: u8 = 4;

    pub fn new(cascade_input: u8) -> KsResult<Self> {
        if cascade_input >= MUX_WIDTH {
            return Err(KsError::IndexOob {
                what: "cascade input",
                index: usize::from(cascade_input),
                len: usize::from(MUX_WIDTH),
            });
        }
        Ok(Self { cascade_input })
    }

    pub fn cascade_input(self) -> u8 {
        self.cascade_input
    }

    /// A primary channel id that is physically taken by the cascade.
    pub fn is_occupied(self, channel: ChannelId) -> bool {
        !channel.is_secondary() && channel.sub_channel() == self.cascade_input
    }

    pub fn address(self, channel: ChannelId) -> MuxAddress {
        if channel.is_secondary() {
            MuxAddress::Secondary {
                sub: channel.sub_channel(),
                via: self.cascade_input,
            }
        } else {
            MuxAddress::Primary {
                sub: channel.sub_channel(),
            }
        }
    }
}

impl Default for CascadeLayout {
    fn default() -> Self {
        Self {
            cascade_input: Self::REFERENCE_CASCADE_INPUT,
        }
    }
}

/// Channel-select and raw-read capability used by the sampler.
///
/// Implementations run in interrupt context: they must not allocate or
/// block beyond the settle delay of the analog path.
pub trait MuxDriver {
    type Error: core::fmt::Debug;

    fn select(&mut self, address: MuxAddress) -> Result<(), Self::Error>;

    fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

/// Single-shot ADC conversion. `embedded-hal` 1.0 has no ADC trait.
pub trait AnalogRead {
    type Error: core::fmt::Debug;

    fn read(&mut self) -> Result<u16, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftMuxError<P, A> {
    Pin(P),
    Adc(A),
}

/// Settling time between switching the muxes and starting a conversion.
const SETTLE_US: u32 = 5;

const PRIMARY_MASK: u8 = 0b0000_0111;
const SECONDARY_SHIFT: u8 = 3;
const SECONDARY_MASK: u8 = 0b0011_1000;

/// Compute the shift-register byte for `address`, keeping bits of the
/// other mux (and the unused top bits) from `previous`.
pub fn latch_byte(address: MuxAddress, previous: u8) -> u8 {
    match address {
        MuxAddress::Primary { sub } => (previous & !PRIMARY_MASK) | (sub & PRIMARY_MASK),
        MuxAddress::Secondary { sub, via } => {
            let secondary = (sub & PRIMARY_MASK) << SECONDARY_SHIFT;
            (previous & !(PRIMARY_MASK | SECONDARY_MASK)) | secondary | (via & PRIMARY_MASK)
        }
    }
}

/// Bit-banged 74HC595 driving both mux select lines, plus the ADC pin.
pub struct ShiftRegisterMux<L, C, D, A, T> {
    latch: L,
    clock: C,
    data: D,
    adc: A,
    delay: T,
    // None until the first shift; the register content is unknown at reset.
    state: Option<u8>,
}

impl<L, C, D, A, T, E> ShiftRegisterMux<L, C, D, A, T>
where
    L: OutputPin<Error = E>,
    C: OutputPin<Error = E>,
    D: OutputPin<Error = E>,
    A: AnalogRead,
    T: DelayNs,
{
    pub fn new(latch: L, clock: C, data: D, adc: A, delay: T) -> Self {
        Self {
            latch,
            clock,
            data,
            adc,
            delay,
            state: None,
        }
    }

    /// Last byte latched into the shift register.
    pub fn state(&self) -> Option<u8> {
        self.state
    }

    fn shift_out(&mut self, byte: u8) -> Result<(), E> {
        self.latch.set_low()?;
        for bit in (0..8).rev() {
            if byte & (1 << bit) != 0 {
                self.data.set_high()?;
            } else {
                self.data.set_low()?;
            }
            self.clock.set_high()?;
            self.clock.set_low()?;
        }
        self.latch.set_high()
    }

    pub fn release(self) -> (L, C, D, A, T) {
        (self.latch, self.clock, self.data, self.adc, self.delay)
    }
}

impl<L, C, D, A, T, E> MuxDriver for ShiftRegisterMux<L, C, D, A, T>
where
    L: OutputPin<Error = E>,
    C: OutputPin<Error = E>,
    D: OutputPin<Error = E>,
    A: AnalogRead,
    T: DelayNs,
    E: core::fmt::Debug,
{
    type Error = ShiftMuxError<E, A::Error>;

    fn select(&mut self, address: MuxAddress) -> Result<(), Self::Error> {
        let byte = latch_byte(address, self.state.unwrap_or(0));
        if self.state != Some(byte) {
            self.shift_out(byte).map_err(ShiftMuxError::Pin)?;
            self.state = Some(byte);
        }
        self.delay.delay_us(SETTLE_US);
        Ok(())
    }

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        self.adc.read().map_err(ShiftMuxError::Adc)
    }
}
