use std::cmp::min;
use std::fmt;

use super::{
	Command,
	Data,
	Dummy,
	Hardware,
	LowLevel,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum EraseSize {
	Sector4K,
	Block32K,
	Block64K,
}

impl EraseSize {
	pub fn command(self) -> Command {
		match self {
			EraseSize::Sector4K => Command::Erase4K,
			EraseSize::Block32K => Command::Erase32K,
			EraseSize::Block64K => Command::Erase64K,
		}
	}

	pub fn bytes(self) -> u32 {
		match self {
			EraseSize::Sector4K => 0x1000,
			EraseSize::Block32K => 0x8000,
			EraseSize::Block64K => 0x1_0000,
		}
	}
}

impl std::str::FromStr for EraseSize {
	type Err = failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match &*s.to_ascii_lowercase() {
			"4k" => Ok(EraseSize::Sector4K),
			"32k" => Ok(EraseSize::Block32K),
			"64k" => Ok(EraseSize::Block64K),
			_ => bail!("unknown erase size {:?} (expected 4k, 32k or 64k)", s),
		}
	}
}

/// Result of `identify`: 0x90 response followed by the 0x9f response.
///
/// Not validated in any way.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FlashId(pub [u8; 5]);

impl FlashId {
	pub fn manufacturer(&self) -> u8 {
		self.0[0]
	}

	pub fn device(&self) -> u8 {
		self.0[1]
	}

	// manufacturer as reported by the JEDEC ID instruction
	pub fn jedec_manufacturer(&self) -> u8 {
		self.0[2]
	}

	pub fn memory_type(&self) -> u8 {
		self.0[3]
	}

	pub fn capacity(&self) -> u8 {
		self.0[4]
	}
}

impl fmt::Display for FlashId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f,
			"manufacturer 0x{:02x}, device 0x{:02x} (JEDEC: manufacturer 0x{:02x}, type 0x{:02x}, capacity 0x{:02x})",
			self.manufacturer(),
			self.device(),
			self.jedec_manufacturer(),
			self.memory_type(),
			self.capacity(),
		)
	}
}

/// Flash instructions on top of a bit-banged bus.
///
/// Expects the core to be in bit-bang mode (see `SpiFlash`). Erase and
/// program only start the operation; poll `is_busy` until it is done.
pub trait FlashOperations: LowLevel {
	/// Run `command` as one transaction (plus the WREN transaction before
	/// it if needed).
	///
	/// Sends up to the descriptor's maximum from `send` or receives into
	/// `recv`, depending on the data direction; returns the number of payload
	/// bytes actually transferred.
	fn execute(&mut self, command: Command, address: u32, send: &[u8], recv: &mut [u8]) -> usize {
		let d = command.descriptor();
		if d.write_enable {
			self.execute(Command::WriteEnable, 0, &[], &mut []);
		}

		let mut tx = self.begin_transaction();
		for _ in 0..d.repeat {
			tx.transmit_byte(d.opcode);
		}
		for shift in (0..d.address_bytes).rev() {
			tx.transmit_byte((address >> (8 * shift)) as u8);
		}
		match d.dummy {
			Dummy::None => (),
			Dummy::Transmit(n) => for _ in 0..n {
				tx.transmit_byte(0x00);
			},
			Dummy::Receive(n) => for _ in 0..n {
				tx.receive_byte();
			},
		}
		match d.data {
			Data::None => 0,
			Data::Receive(n) => {
				let n = min(n, recv.len());
				tx.receive(&mut recv[..n]);
				n
			},
			Data::Transmit { max } => {
				let n = min(max, send.len());
				tx.transmit(&send[..n]);
				n
			},
		}
	}

	fn read_status(&mut self) -> u8 {
		let mut status = [0u8; 1];
		self.execute(Command::ReadStatus, 0, &[], &mut status);
		status[0]
	}

	// status bit 0: erase / program in progress
	fn is_busy(&mut self) -> bool {
		0 != self.read_status() & 0x01
	}

	fn write_enable(&mut self) {
		self.execute(Command::WriteEnable, 0, &[], &mut []);
	}

	fn identify(&mut self) -> FlashId {
		let mut id = [0u8; 5];
		self.execute(Command::ManufacturerDeviceId, 0, &[], &mut id[..2]);
		self.execute(Command::JedecId, 0, &[], &mut id[2..]);
		FlashId(id)
	}

	fn read_unique_id(&mut self) -> [u8; 8] {
		let mut uuid = [0u8; 8];
		self.execute(Command::ReadUniqueId, 0, &[], &mut uuid);
		uuid
	}

	fn begin_erase(&mut self, size: EraseSize, address: u32) {
		self.execute(size.command(), address, &[], &mut []);
	}

	fn begin_erase_4k(&mut self, address: u32) {
		self.begin_erase(EraseSize::Sector4K, address)
	}

	fn begin_erase_32k(&mut self, address: u32) {
		self.begin_erase(EraseSize::Block32K, address)
	}

	fn begin_erase_64k(&mut self, address: u32) {
		self.begin_erase(EraseSize::Block64K, address)
	}

	/// Page program; anything after the first `PAGE_SIZE` bytes of `data` is
	/// dropped silently. Returns the number of bytes sent.
	fn begin_write(&mut self, address: u32, data: &[u8]) -> usize {
		self.execute(Command::PageProgram, address, data, &mut [])
	}

	// get the chip back into plain SPI mode and awake
	fn reset(&mut self) {
		self.execute(Command::ExitExtendedMode, 0, &[], &mut []);
		self.execute(Command::Wake, 0, &[], &mut []);
	}

	fn hold(&mut self) {
		self.execute(Command::PowerDown, 0, &[], &mut []);
	}

	fn unhold(&mut self) {
		self.execute(Command::Wake, 0, &[], &mut []);
	}
}

impl<H: Hardware+?Sized> FlashOperations for H {
}
