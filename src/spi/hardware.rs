use std::thread;
use std::time::{
	Duration,
	Instant,
};

// bit positions in the `bitbang` register
const PIN_MOSI:    u8 = 1 << 0;
const PIN_CLK:     u8 = 1 << 1;
const PIN_CS:      u8 = 1 << 2;
const PIN_MISO_EN: u8 = 1 << 3;

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

/// Levels of the four output lines; always written together.
///
/// `chip_select` is the line level: the flash is selected while it is low.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OutPins {
	pub clock: bool,
	pub mosi: bool,
	pub chip_select: bool,
	pub miso_enable: bool,
}

impl OutPins {
	/// CS high, CLK low: no transaction in progress
	pub fn idle() -> Self {
		OutPins {
			clock: false,
			mosi: false,
			chip_select: true,
			miso_enable: false,
		}
	}

	/// CS low, CLK low
	pub fn selected() -> Self {
		OutPins {
			chip_select: false,
			..OutPins::idle()
		}
	}

	pub fn with_clock(self, clock: bool) -> Self {
		OutPins { clock, ..self }
	}

	pub fn bits(self) -> u8 {
		let mut bits = 0;
		if self.mosi { bits |= PIN_MOSI; }
		if self.clock { bits |= PIN_CLK; }
		if self.chip_select { bits |= PIN_CS; }
		if self.miso_enable { bits |= PIN_MISO_EN; }
		bits
	}

	pub fn from_bits(bits: u8) -> Self {
		OutPins {
			clock: 0 != bits & PIN_CLK,
			mosi: 0 != bits & PIN_MOSI,
			chip_select: 0 != bits & PIN_CS,
			miso_enable: 0 != bits & PIN_MISO_EN,
		}
	}
}

/// Register interface of the SPI flash core.
///
/// None of these can fail; they are plain register accesses.
pub trait Hardware {
	fn set_pins(&mut self, pins: OutPins);
	fn read_miso(&mut self) -> bool;

	// `true` hands the pins to `set_pins`, `false` restores memory-mapped access
	fn set_bitbang_enabled(&mut self, enabled: bool);

	fn delay_ms(&mut self, ms: u64) {
		reliable_sleep(Duration::from_millis(ms));
	}
}

#[cfg(test)]
mod test {
	use super::OutPins;

	fn check_bits(pins: OutPins, bits: u8) {
		assert_eq!(pins.bits(), bits, "failed packing {:?}", pins);
		assert_eq!(OutPins::from_bits(bits), pins, "failed unpacking 0x{:02x}", bits);
	}

	#[test]
	fn pack_pins() {
		check_bits(OutPins::selected(), 0b0000);
		check_bits(OutPins::idle(), 0b0100);
		check_bits(OutPins { mosi: true, ..OutPins::selected() }, 0b0001);
		check_bits(OutPins::selected().with_clock(true), 0b0010);
		check_bits(OutPins { mosi: true, ..OutPins::selected() }.with_clock(true), 0b0011);
		check_bits(OutPins { miso_enable: true, ..OutPins::selected() }, 0b1000);
		check_bits(OutPins { miso_enable: true, ..OutPins::selected() }.with_clock(true), 0b1010);
	}

	#[test]
	fn unused_register_bits_ignored() {
		assert_eq!(OutPins::from_bits(0xf4), OutPins::idle());
	}
}
