/// Bit-banged SPI master for the NOR flash on the LiteX SPI flash core
/// (W25Q128JV on the OrangeCrab).
///
/// The core normally maps the flash into memory; writing 1 to `bitbang_en`
/// hands the pins over to software, which then drives them through a single
/// 4-bit `bitbang` register:
/// - bit 0: MOSI
/// - bit 1: CLK
/// - bit 2: CS (active low)
/// - bit 3: MISO_EN (tri-state MOSI driver, needed for receiving)
///
/// MISO is sampled through the separate `miso` register.
///
/// Bytes are shifted MSB first. Sending a bit takes three register writes
/// (data with CLK low, CLK up, CLK down); the flash samples on the rising
/// edge. Receiving samples MISO right after raising CLK.
///
/// Every instruction is framed by CS low ... CS high; instructions that
/// modify the array (erase, page program) need a separate WREN (0x06)
/// instruction framed on its own right before them.

mod hardware;
mod low_level;
mod mode;
mod opcodes;
mod operations;
pub mod sim;

pub use self::hardware::{
	Hardware,
	OutPins,
	reliable_sleep,
};

pub use self::low_level::{
	LowLevel,
	Transaction,
};

pub use self::mode::{
	Mode,
	ScopedBitBang,
	SpiFlash,
};

pub use self::opcodes::{
	Command,
	Data,
	Descriptor,
	Dummy,
	PAGE_SIZE,
};

pub use self::operations::{
	EraseSize,
	FlashId,
	FlashOperations,
};
