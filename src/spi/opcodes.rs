/// Program instructions can't cross a page; the flash would wrap around
/// within the page.
pub const PAGE_SIZE: usize = 256;

/// Bytes clocked between address and data phase; contents are ignored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dummy {
	None,
	// send zero bytes
	Transmit(usize),
	// clock in and discard
	Receive(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Data {
	None,
	Receive(usize),
	// longer payloads are cut off at `max`
	Transmit { max: usize },
}

/// Wire encoding of a single instruction (one CS framing).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Descriptor {
	pub opcode: u8,
	// how often the opcode byte is sent
	pub repeat: usize,
	// big endian, lowest `address_bytes` bytes of the address
	pub address_bytes: usize,
	pub dummy: Dummy,
	pub data: Data,
	// needs a separate WREN instruction before
	pub write_enable: bool,
}

const fn simple(opcode: u8) -> Descriptor {
	Descriptor {
		opcode,
		repeat: 1,
		address_bytes: 0,
		dummy: Dummy::None,
		data: Data::None,
		write_enable: false,
	}
}

const fn erase(opcode: u8) -> Descriptor {
	Descriptor {
		address_bytes: 3,
		write_enable: true,
		..simple(opcode)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Command {
	WriteEnable,
	ReadStatus,
	ManufacturerDeviceId,
	JedecId,
	ReadUniqueId,
	Erase4K,
	Erase32K,
	Erase64K,
	PageProgram,
	// eight 0xff bytes: leave QPI mode or terminate continuous read mode
	ExitExtendedMode,
	// "release power-down / read electronic signature"; wakes the chip
	Wake,
	// "power-down"; only `Wake` gets the chip back
	PowerDown,
}

// indexed by `Command as usize`
static DESCRIPTORS: [Descriptor; 12] = [
	/* WriteEnable */          simple(0x06),
	/* ReadStatus */           Descriptor { data: Data::Receive(1), ..simple(0x05) },
	/* ManufacturerDeviceId */ Descriptor { dummy: Dummy::Transmit(3), data: Data::Receive(2), ..simple(0x90) },
	/* JedecId */              Descriptor { data: Data::Receive(3), ..simple(0x9f) },
	/* ReadUniqueId */         Descriptor { dummy: Dummy::Receive(4), data: Data::Receive(8), ..simple(0x4b) },
	/* Erase4K */              erase(0x20),
	/* Erase32K */             erase(0x52),
	/* Erase64K */             erase(0xd8),
	/* PageProgram */          Descriptor { data: Data::Transmit { max: PAGE_SIZE }, ..erase(0x02) },
	/* ExitExtendedMode */     Descriptor { repeat: 8, ..simple(0xff) },
	/* Wake */                 simple(0xab),
	/* PowerDown */            simple(0xb9),
];

impl Command {
	pub const ALL: [Command; 12] = [
		Command::WriteEnable,
		Command::ReadStatus,
		Command::ManufacturerDeviceId,
		Command::JedecId,
		Command::ReadUniqueId,
		Command::Erase4K,
		Command::Erase32K,
		Command::Erase64K,
		Command::PageProgram,
		Command::ExitExtendedMode,
		Command::Wake,
		Command::PowerDown,
	];

	pub fn descriptor(self) -> &'static Descriptor {
		&DESCRIPTORS[self as usize]
	}

	pub fn opcode(self) -> u8 {
		self.descriptor().opcode
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn table_order_matches_commands() {
		for (index, command) in Command::ALL.iter().enumerate() {
			assert_eq!(*command as usize, index, "{:?} out of order", command);
		}
	}

	#[test]
	fn opcodes() {
		let opcodes: Vec<(Command, u8)> = Command::ALL.iter().map(|c| (*c, c.opcode())).collect();
		assert_eq!(opcodes, vec![
			(Command::WriteEnable, 0x06),
			(Command::ReadStatus, 0x05),
			(Command::ManufacturerDeviceId, 0x90),
			(Command::JedecId, 0x9f),
			(Command::ReadUniqueId, 0x4b),
			(Command::Erase4K, 0x20),
			(Command::Erase32K, 0x52),
			(Command::Erase64K, 0xd8),
			(Command::PageProgram, 0x02),
			(Command::ExitExtendedMode, 0xff),
			(Command::Wake, 0xab),
			(Command::PowerDown, 0xb9),
		]);
	}

	#[test]
	fn only_array_modifications_need_write_enable() {
		for command in Command::ALL.iter() {
			let d = command.descriptor();
			let modifies = match command {
				Command::Erase4K | Command::Erase32K | Command::Erase64K | Command::PageProgram => true,
				_ => false,
			};
			assert_eq!(d.write_enable, modifies, "{:?}", command);
			assert_eq!(d.address_bytes, if modifies { 3 } else { 0 }, "{:?}", command);
		}
	}
}
