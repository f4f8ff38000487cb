//! Simulated NOR flash (W25Q128JV-like) wired to the bit-bang register.
//!
//! Decodes the pin writes the way the chip would: MOSI is shifted in on
//! rising CLK while MISO_EN is low, response bits are shifted out on rising
//! CLK while MISO_EN is high. Instructions take effect when CS goes high.
//!
//! Every transaction is logged (bytes sent by the master only), and anything
//! a real chip could misinterpret (CS edges with CLK high, MOSI changing
//! while CLK is high, CS released mid-byte) is recorded as a violation.

use super::{
	Hardware,
	OutPins,
	PAGE_SIZE,
};

const STATUS_BUSY: u8 = 0x01;
const STATUS_WEL: u8 = 0x02;

const DEFAULT_SIZE: usize = 1 << 20;

struct Frame {
	sent: Vec<u8>,
	// complete bytes shifted out so far
	received: usize,
}

pub struct SimFlash {
	manufacturer: u8,
	device: u8,
	memory_type: u8,
	capacity: u8,
	unique_id: [u8; 8],
	// addresses wrap around at the end
	memory: Vec<u8>,
	status: u8,
	// status reads reporting BUSY after erase / program
	busy_polls: u32,
	busy_remaining: u32,
	bitbang_enabled: bool,
	powered_down: bool,

	pins: OutPins,
	miso: bool,
	shift_in: u8,
	bits_in: u32,
	shift_out: u8,
	bits_out: u32,
	frame: Option<Frame>,

	transactions: Vec<Vec<u8>>,
	chip_select_rising_edges: usize,
	violations: Vec<String>,
	pin_writes: usize,
	slept_ms: u64,
}

impl SimFlash {
	pub fn new() -> Self {
		SimFlash {
			manufacturer: 0xef,
			device: 0x17,
			memory_type: 0x40,
			capacity: 0x18,
			unique_id: [0xe4, 0x68, 0x1c, 0xa1, 0x07, 0x36, 0x42, 0x2b],
			memory: vec![0xff; DEFAULT_SIZE],
			status: 0,
			busy_polls: 1,
			busy_remaining: 0,
			bitbang_enabled: false,
			powered_down: false,

			pins: OutPins::idle(),
			miso: true,
			shift_in: 0,
			bits_in: 0,
			shift_out: 0,
			bits_out: 0,
			frame: None,

			transactions: Vec::new(),
			chip_select_rising_edges: 0,
			violations: Vec::new(),
			pin_writes: 0,
			slept_ms: 0,
		}
	}

	pub fn with_id(mut self, manufacturer: u8, device: u8, memory_type: u8, capacity: u8) -> Self {
		self.manufacturer = manufacturer;
		self.device = device;
		self.memory_type = memory_type;
		self.capacity = capacity;
		self
	}

	pub fn with_unique_id(mut self, unique_id: [u8; 8]) -> Self {
		self.unique_id = unique_id;
		self
	}

	pub fn with_busy_polls(mut self, polls: u32) -> Self {
		self.busy_polls = polls;
		self
	}

	// needs to be a power of two and hold at least one 64K block
	pub fn with_size(mut self, size: usize) -> crate::AResult<Self> {
		ensure!(size.is_power_of_two() && size >= 0x1_0000, "invalid simulated flash size 0x{:x}", size);
		self.memory = vec![0xff; size];
		Ok(self)
	}

	// overwrites the whole status register; keeps it until changed by an instruction
	pub fn set_status(&mut self, status: u8) {
		self.status = status;
		self.busy_remaining = 0;
	}

	pub fn status(&self) -> u8 {
		self.status
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn transactions(&self) -> &[Vec<u8>] {
		&self.transactions
	}

	pub fn chip_select_rising_edges(&self) -> usize {
		self.chip_select_rising_edges
	}

	pub fn violations(&self) -> &[String] {
		&self.violations
	}

	pub fn pins(&self) -> OutPins {
		self.pins
	}

	pub fn pin_writes(&self) -> usize {
		self.pin_writes
	}

	pub fn slept_ms(&self) -> u64 {
		self.slept_ms
	}

	pub fn is_bitbang_enabled(&self) -> bool {
		self.bitbang_enabled
	}

	pub fn is_powered_down(&self) -> bool {
		self.powered_down
	}

	fn violation(&mut self, msg: String) {
		warn!("simulated flash: {}", msg);
		self.violations.push(msg);
	}

	fn start_frame(&mut self) {
		self.shift_in = 0;
		self.bits_in = 0;
		self.bits_out = 0;
		self.frame = Some(Frame {
			sent: Vec::new(),
			received: 0,
		});
	}

	fn finish_frame(&mut self) {
		let frame = match self.frame.take() {
			Some(frame) => frame,
			None => return,
		};
		self.chip_select_rising_edges += 1;
		if self.bits_in != 0 || self.bits_out != 0 {
			self.violation(format!("CS released in the middle of a byte ({} bits sent, {} bits received)", self.bits_in, self.bits_out));
		}
		self.bits_in = 0;
		self.bits_out = 0;
		trace!("simulated flash: transaction {:02x?}, {} bytes received", frame.sent, frame.received);
		self.execute(&frame.sent);
		self.transactions.push(frame.sent);
	}

	fn clock_in(&mut self, bit: bool) {
		if self.bits_out != 0 {
			self.violation(format!("sending after {} bits of a received byte", self.bits_out));
			self.bits_out = 0;
		}
		self.shift_in = (self.shift_in << 1) | (bit as u8);
		self.bits_in += 1;
		if self.bits_in == 8 {
			let byte = self.shift_in;
			self.shift_in = 0;
			self.bits_in = 0;
			if let Some(frame) = &mut self.frame {
				frame.sent.push(byte);
			}
		}
	}

	fn clock_out(&mut self) {
		if self.bits_in != 0 {
			self.violation(format!("receiving after {} bits of a sent byte", self.bits_in));
			self.shift_in = 0;
			self.bits_in = 0;
		}
		if self.bits_out == 0 {
			self.shift_out = self.next_response_byte();
		}
		self.miso = 0 != self.shift_out & 0x80;
		self.shift_out <<= 1;
		self.bits_out = (self.bits_out + 1) % 8;
		if self.bits_out == 0 {
			if let Some(frame) = &mut self.frame {
				frame.received += 1;
			}
		}
	}

	fn poll_status(&mut self) -> u8 {
		let status = self.status;
		if self.busy_remaining > 0 {
			self.busy_remaining -= 1;
			if 0 == self.busy_remaining {
				self.status &= !STATUS_BUSY;
			}
		}
		status
	}

	// MISO floats high when the chip isn't driving it
	fn next_response_byte(&mut self) -> u8 {
		let (opcode, sent, index) = match &self.frame {
			Some(frame) if !frame.sent.is_empty() => (frame.sent[0], frame.sent.len(), frame.received),
			_ => return 0xff,
		};
		if self.powered_down {
			return 0xff;
		}

		match opcode {
			0x05 => self.poll_status(),
			0x90 if sent >= 4 => if 0 == index % 2 { self.manufacturer } else { self.device },
			0x9f => match index {
				0 => self.manufacturer,
				1 => self.memory_type,
				2 => self.capacity,
				_ => 0xff,
			},
			// four dummy bytes first
			0x4b if index >= 4 && index < 12 => self.unique_id[index - 4],
			_ => 0xff,
		}
	}

	fn address(&self, bytes: &[u8]) -> usize {
		let address = (bytes[0] as usize) << 16 | (bytes[1] as usize) << 8 | (bytes[2] as usize);
		address & (self.memory.len() - 1)
	}

	// WEL is cleared by every erase / program instruction, even if it wasn't set
	fn take_write_enable(&mut self) -> bool {
		let enabled = 0 != self.status & STATUS_WEL;
		self.status &= !STATUS_WEL;
		enabled
	}

	fn start_busy(&mut self) {
		if self.busy_polls > 0 {
			self.status |= STATUS_BUSY;
			self.busy_remaining = self.busy_polls;
		}
	}

	fn execute(&mut self, sent: &[u8]) {
		let opcode = match sent.first() {
			Some(opcode) => *opcode,
			None => return,
		};

		if self.powered_down {
			// only "release power-down" wakes it up, everything else is ignored
			if 0xab == opcode {
				self.powered_down = false;
			}
			return;
		}
		if 0 != self.status & STATUS_BUSY {
			return;
		}

		match opcode {
			0x06 => self.status |= STATUS_WEL,
			0x04 => self.status &= !STATUS_WEL,
			0x20 | 0x52 | 0xd8 if 4 == sent.len() => {
				if !self.take_write_enable() {
					debug!("simulated flash: erase without WEL ignored");
					return;
				}
				let size = match opcode {
					0x20 => 0x1000,
					0x52 => 0x8000,
					_ => 0x1_0000,
				};
				let start = self.address(&sent[1..4]) & !(size - 1);
				for b in &mut self.memory[start..start + size] {
					*b = 0xff;
				}
				self.start_busy();
			},
			0x02 if sent.len() > 4 => {
				if !self.take_write_enable() {
					debug!("simulated flash: page program without WEL ignored");
					return;
				}
				let address = self.address(&sent[1..4]);
				let page = address & !(PAGE_SIZE - 1);
				for (i, b) in sent[4..].iter().enumerate() {
					// wraps within the page
					let offset = (address - page + i) % PAGE_SIZE;
					self.memory[page + offset] &= *b;
				}
				self.start_busy();
			},
			0xb9 => self.powered_down = true,
			_ => (),
		}
	}
}

impl Default for SimFlash {
	fn default() -> Self {
		SimFlash::new()
	}
}

impl Hardware for SimFlash {
	fn set_pins(&mut self, pins: OutPins) {
		self.pin_writes += 1;
		let old = self.pins;
		self.pins = pins;

		// the core ignores the register while memory-mapped
		if !self.bitbang_enabled {
			return;
		}

		if old.chip_select != pins.chip_select {
			if pins.clock || old.clock {
				self.violation(format!("CS changed with CLK high ({:?} -> {:?})", old, pins));
			}
			if pins.chip_select {
				self.finish_frame();
			} else {
				self.start_frame();
			}
			return;
		}
		if pins.chip_select {
			return;
		}

		if old.clock && pins.clock && old.mosi != pins.mosi && !pins.miso_enable {
			self.violation(format!("MOSI changed while CLK high ({:?} -> {:?})", old, pins));
		}
		if !old.clock && pins.clock {
			if pins.miso_enable {
				self.clock_out();
			} else {
				if old.mosi != pins.mosi {
					self.violation(format!("MOSI changed together with rising CLK ({:?} -> {:?})", old, pins));
				}
				self.clock_in(pins.mosi);
			}
		}
	}

	fn read_miso(&mut self) -> bool {
		self.miso
	}

	fn set_bitbang_enabled(&mut self, enabled: bool) {
		if !enabled && self.frame.is_some() {
			self.violation("memory-mapped mode enabled during a transaction".to_string());
			self.frame = None;
		}
		self.bitbang_enabled = enabled;
	}

	fn delay_ms(&mut self, ms: u64) {
		self.slept_ms += ms;
	}
}

#[cfg(test)]
mod test {
	use super::SimFlash;
	use crate::spi::{
		FlashOperations,
		Hardware,
		LowLevel,
		OutPins,
	};

	fn bitbanged() -> SimFlash {
		let mut sim = SimFlash::new().with_busy_polls(0);
		sim.set_bitbang_enabled(true);
		sim
	}

	fn send(sim: &mut SimFlash, data: &[u8]) {
		let mut tx = sim.begin_transaction();
		tx.transmit(data);
	}

	#[test]
	fn erase_needs_write_enable() {
		let mut sim = bitbanged();
		sim.begin_write(0x2000, &[0x00; 4]);
		assert_eq!(&sim.memory()[0x2000..0x2004], &[0x00; 4]);

		// without WREN
		send(&mut sim, &[0x20, 0x00, 0x20, 0x00]);
		assert_eq!(&sim.memory()[0x2000..0x2004], &[0x00; 4]);

		sim.begin_erase_4k(0x2abc);
		assert_eq!(&sim.memory()[0x2000..0x2004], &[0xff; 4]);
		assert_eq!(sim.status() & 0x02, 0);
	}

	#[test]
	fn program_only_clears_bits() {
		let mut sim = bitbanged();
		sim.begin_write(0x10, &[0xf0]);
		sim.begin_write(0x10, &[0x3c]);
		assert_eq!(sim.memory()[0x10], 0x30);
	}

	#[test]
	fn sized_memory() {
		for &size in [0usize, 0x1000, 0x8000, 0x1_8000].iter() {
			assert!(SimFlash::new().with_size(size).is_err(), "accepted size 0x{:x}", size);
		}

		let mut sim = SimFlash::new().with_busy_polls(0).with_size(0x2_0000).unwrap();
		sim.set_bitbang_enabled(true);
		assert_eq!(sim.memory().len(), 0x2_0000);
		// addresses wrap at the end of the chip
		sim.begin_write(0x2_0010, &[0x5a]);
		assert_eq!(sim.memory()[0x10], 0x5a);
	}

	#[test]
	fn program_wraps_within_page() {
		let mut sim = bitbanged();
		sim.begin_write(0x01fe, &[0x01, 0x02, 0x03, 0x04]);
		assert_eq!(&sim.memory()[0x01fe..0x0200], &[0x01, 0x02]);
		assert_eq!(&sim.memory()[0x0100..0x0102], &[0x03, 0x04]);
		assert_eq!(sim.memory()[0x0200], 0xff);
	}

	#[test]
	fn busy_ignores_instructions() {
		let mut sim = bitbanged().with_busy_polls(2);
		sim.begin_erase_4k(0);
		assert!(sim.is_busy());
		sim.begin_write(0, &[0x00]);
		assert!(sim.is_busy());
		assert!(!sim.is_busy());
		assert_eq!(sim.memory()[0], 0xff);
	}

	#[test]
	fn powered_down_chip_stays_silent() {
		let mut sim = bitbanged();
		sim.hold();
		assert_eq!(sim.identify().0, [0xff; 5]);
		sim.unhold();
		assert_eq!(sim.identify().0, [0xef, 0x17, 0xef, 0x40, 0x18]);
	}

	#[test]
	fn ignores_pins_while_memory_mapped() {
		let mut sim = SimFlash::new();
		sim.set_pins(OutPins::selected());
		sim.set_pins(OutPins::idle());
		assert_eq!(sim.pin_writes(), 2);
		assert!(sim.transactions().is_empty());
		assert!(sim.violations().is_empty());
	}

	#[test]
	fn detects_chip_select_with_clock_high() {
		let mut sim = bitbanged();
		sim.set_pins(OutPins::idle().with_clock(true));
		sim.set_pins(OutPins::selected().with_clock(true));
		assert_eq!(sim.violations().len(), 1);
	}

	#[test]
	fn detects_partial_byte() {
		let mut sim = bitbanged();
		sim.set_pins(OutPins::selected());
		sim.set_pins(OutPins::selected().with_clock(true));
		sim.set_pins(OutPins::selected());
		sim.set_pins(OutPins::idle());
		assert_eq!(sim.violations().len(), 1);
		assert_eq!(sim.transactions(), &[Vec::<u8>::new()][..]);
	}

	#[test]
	fn detects_mosi_change_on_rising_clock() {
		let mut sim = bitbanged();
		sim.set_pins(OutPins::selected());
		sim.set_pins(OutPins { mosi: true, ..OutPins::selected() }.with_clock(true));
		assert_eq!(sim.violations().len(), 1);
	}
}
