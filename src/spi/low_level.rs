use super::{
	Hardware,
	OutPins,
};

/// An open transaction: CS is held low until this is dropped.
///
/// Borrows the hardware mutably, so no other transaction (nested or not)
/// can be started while it is alive.
pub struct Transaction<'a, H: ?Sized+LowLevel+'a>(&'a mut H);

impl<'a, H: ?Sized+LowLevel> Transaction<'a, H> {
	pub fn transmit_byte(&mut self, value: u8) {
		self.0.transmit_byte(value)
	}

	pub fn receive_byte(&mut self) -> u8 {
		self.0.receive_byte()
	}

	pub fn transmit(&mut self, data: &[u8]) {
		for b in data {
			self.0.transmit_byte(*b);
		}
	}

	pub fn receive(&mut self, target: &mut [u8]) {
		for t in target.iter_mut() {
			*t = self.0.receive_byte();
		}
	}
}

impl<'a, H: ?Sized+LowLevel> Drop for Transaction<'a, H> {
	fn drop(&mut self) {
		self.0.end_transaction();
	}
}

// bit loops; only reachable through an open `Transaction`, so bytes are never
// clocked without CS framing
trait InternalLowLevel: Hardware {
	// send 8 bits, highest first; the flash samples MOSI on the rising CLK
	// edge, so MOSI is set up while CLK is low and kept while CLK is high.
	fn transmit_byte(&mut self, value: u8) {
		for bit in (0..8).rev() {
			let pins = OutPins {
				mosi: 0 != value & (1 << bit),
				..OutPins::selected()
			};
			self.set_pins(pins);
			self.set_pins(pins.with_clock(true));
			self.set_pins(pins);
		}
	}

	// receive 8 bits, highest first.
	//
	// MISO_EN needs to be up before the first CLK so the core stops driving
	// MOSI. MISO is sampled right after raising CLK, before dropping it
	// again; the target flash has been fine with that so far.
	fn receive_byte(&mut self) -> u8 {
		let pins = OutPins {
			miso_enable: true,
			..OutPins::selected()
		};
		self.set_pins(pins);

		let mut result = 0u8;
		for _ in 0..8 {
			self.set_pins(pins.with_clock(true));
			result = (result << 1) | (self.read_miso() as u8);
			self.set_pins(pins);
		}
		result
	}

	// CS high, CLK low
	fn end_transaction(&mut self) {
		self.set_pins(OutPins::idle());
	}
}

impl<H: Hardware+?Sized> InternalLowLevel for H {
}

pub trait LowLevel: Hardware {
	// CS and CLK go low in the same write
	fn begin_transaction(&mut self) -> Transaction<Self> {
		self.set_pins(OutPins::selected());

		Transaction(self)
	}
}

impl<H: Hardware+?Sized> LowLevel for H {
}
