use std::ops::{
	Deref,
	DerefMut,
};

use super::{
	EraseSize,
	FlashId,
	FlashOperations,
	Hardware,
	OutPins,
};

// after waking the chip from power-down (tRES1 is 3µs)
const RESET_DELAY_MS: u64 = 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Mode {
	// core reads the flash on its own, flash appears as plain memory
	MemoryMapped,
	// pins driven by software
	BitBang,
}

/// Flash behind the SPI flash core, tracking which mode the core is in.
///
/// Instructions are only issued in bit-bang mode, i.e. between `init` and
/// `teardown`; otherwise they fail without touching the bus.
pub struct SpiFlash<H: Hardware> {
	hardware: H,
	mode: Mode,
}

impl<H: Hardware> SpiFlash<H> {
	// the core comes out of reset memory-mapped (`bitbang_en` = 0)
	pub fn new(hardware: H) -> Self {
		SpiFlash {
			hardware,
			mode: Mode::MemoryMapped,
		}
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	pub fn hardware(&self) -> &H {
		&self.hardware
	}

	// for callers polling `is_busy`
	pub fn delay_ms(&mut self, ms: u64) {
		self.hardware.delay_ms(ms)
	}

	pub fn into_inner(self) -> H {
		self.hardware
	}

	/// Switch to bit-bang mode and reset the chip, so it accepts plain SPI
	/// commands even if it was left in QPI or power-down.
	///
	/// Never fails at the moment.
	pub fn init(&mut self) -> crate::AResult<()> {
		// CS deasserted before the core hands over the pins
		self.hardware.set_pins(OutPins::idle());
		self.hardware.set_bitbang_enabled(true);
		self.mode = Mode::BitBang;
		debug!("SPI flash: bit-bang mode enabled");

		self.hardware.reset();
		self.hardware.delay_ms(RESET_DELAY_MS);
		Ok(())
	}

	/// Back to memory-mapped mode.
	pub fn teardown(&mut self) {
		self.hardware.set_bitbang_enabled(false);
		self.mode = Mode::MemoryMapped;
		debug!("SPI flash: memory-mapped mode restored");
	}

	/// `init` now, `teardown` when the returned guard is dropped.
	pub fn bitbang(&mut self) -> crate::AResult<ScopedBitBang<H>> {
		self.init()?;
		Ok(ScopedBitBang { flash: Some(self) })
	}

	fn bus(&mut self, what: &str) -> crate::AResult<&mut H> {
		ensure!(self.mode == Mode::BitBang, "SPI flash: {} not possible in {:?} mode", what, self.mode);
		Ok(&mut self.hardware)
	}

	pub fn read_status(&mut self) -> crate::AResult<u8> {
		Ok(self.bus("read status")?.read_status())
	}

	pub fn is_busy(&mut self) -> crate::AResult<bool> {
		Ok(self.bus("read status")?.is_busy())
	}

	pub fn identify(&mut self) -> crate::AResult<FlashId> {
		let id = self.bus("identify")?.identify();
		debug!("SPI flash: {}", id);
		Ok(id)
	}

	pub fn read_unique_id(&mut self) -> crate::AResult<[u8; 8]> {
		Ok(self.bus("read unique id")?.read_unique_id())
	}

	pub fn begin_erase(&mut self, size: EraseSize, address: u32) -> crate::AResult<()> {
		debug!("SPI flash: erase {:?} at 0x{:06x}", size, address);
		self.bus("erase")?.begin_erase(size, address);
		Ok(())
	}

	pub fn begin_erase_4k(&mut self, address: u32) -> crate::AResult<()> {
		self.begin_erase(EraseSize::Sector4K, address)
	}

	pub fn begin_erase_32k(&mut self, address: u32) -> crate::AResult<()> {
		self.begin_erase(EraseSize::Block32K, address)
	}

	pub fn begin_erase_64k(&mut self, address: u32) -> crate::AResult<()> {
		self.begin_erase(EraseSize::Block64K, address)
	}

	/// Page program; returns the number of bytes sent (at most `PAGE_SIZE`).
	pub fn begin_write(&mut self, address: u32, data: &[u8]) -> crate::AResult<usize> {
		let sent = self.bus("write")?.begin_write(address, data);
		if sent < data.len() {
			debug!("SPI flash: write at 0x{:06x} truncated from {} to {} bytes", address, data.len(), sent);
		} else {
			debug!("SPI flash: write {} bytes at 0x{:06x}", sent, address);
		}
		Ok(sent)
	}

	pub fn hold(&mut self) -> crate::AResult<()> {
		self.bus("hold")?.hold();
		Ok(())
	}

	pub fn unhold(&mut self) -> crate::AResult<()> {
		self.bus("unhold")?.unhold();
		Ok(())
	}
}

pub struct ScopedBitBang<'a, H: Hardware + 'a> {
	flash: Option<&'a mut SpiFlash<H>>, // none if already closed
}

impl<'a, H: Hardware> ScopedBitBang<'a, H> {
	pub fn close(mut self) {
		if let Some(flash) = self.flash.take() {
			flash.teardown();
		}
	}
}

impl<'a, H: Hardware> Drop for ScopedBitBang<'a, H> {
	fn drop(&mut self) {
		if let Some(flash) = self.flash.take() {
			flash.teardown();
		}
	}
}

impl<'a, H: Hardware> Deref for ScopedBitBang<'a, H> {
	type Target = SpiFlash<H>;

	fn deref(&self) -> &Self::Target {
		match &self.flash {
			Some(flash) => &**flash,
			None => unreachable!(),
		}
	}
}

impl<'a, H: Hardware> DerefMut for ScopedBitBang<'a, H> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		match &mut self.flash {
			Some(flash) => &mut **flash,
			None => unreachable!(),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::spi::sim::SimFlash;

	#[test]
	fn starts_memory_mapped() {
		let mut flash = SpiFlash::new(SimFlash::new());
		assert_eq!(flash.mode(), Mode::MemoryMapped);
		assert!(flash.identify().is_err());
		assert!(flash.is_busy().is_err());
		assert!(flash.begin_erase_4k(0).is_err());
		assert!(flash.begin_write(0, &[0u8; 4]).is_err());
		assert!(flash.hold().is_err());
		// nothing reached the bus
		assert_eq!(flash.hardware().pin_writes(), 0);
		assert!(flash.hardware().transactions().is_empty());
	}

	#[test]
	fn init_resets_chip() {
		let mut flash = SpiFlash::new(SimFlash::new());
		flash.init().unwrap();
		assert_eq!(flash.mode(), Mode::BitBang);
		let sim = flash.hardware();
		assert!(sim.is_bitbang_enabled());
		assert_eq!(sim.transactions(), &[vec![0xffu8; 8], vec![0xab]][..]);
		assert_eq!(sim.slept_ms(), RESET_DELAY_MS);
		assert!(sim.violations().is_empty(), "{:?}", sim.violations());
	}

	#[test]
	fn init_wakes_powered_down_chip() {
		let mut flash = SpiFlash::new(SimFlash::new().with_id(0xef, 0x40, 0x18, 0x18));
		flash.init().unwrap();
		flash.hold().unwrap();
		assert!(flash.hardware().is_powered_down());
		flash.teardown();
		flash.init().unwrap();
		assert!(!flash.hardware().is_powered_down());
		assert_eq!(flash.identify().unwrap().manufacturer(), 0xef);
	}

	#[test]
	fn teardown_restores_memory_mapped() {
		let mut flash = SpiFlash::new(SimFlash::new());
		flash.init().unwrap();
		flash.teardown();
		assert_eq!(flash.mode(), Mode::MemoryMapped);
		assert!(!flash.hardware().is_bitbang_enabled());
		assert!(flash.read_unique_id().is_err());
	}

	#[test]
	fn scoped_bitbang() {
		let mut flash = SpiFlash::new(SimFlash::new().with_id(0xc2, 0x17, 0x20, 0x18));
		{
			let mut bb = flash.bitbang().unwrap();
			assert_eq!(bb.mode(), Mode::BitBang);
			assert_eq!(bb.identify().unwrap().0, [0xc2, 0x17, 0xc2, 0x20, 0x18]);
		}
		assert_eq!(flash.mode(), Mode::MemoryMapped);
		assert!(!flash.hardware().is_bitbang_enabled());

		flash.bitbang().unwrap().close();
		assert_eq!(flash.mode(), Mode::MemoryMapped);
	}

	#[test]
	fn mode_follows_core_register() {
		let mut flash = SpiFlash::new(SimFlash::new());
		let check = |flash: &SpiFlash<SimFlash>, mode: Mode| {
			assert_eq!(flash.mode(), mode);
			assert_eq!(flash.hardware().is_bitbang_enabled(), mode == Mode::BitBang);
		};
		check(&flash, Mode::MemoryMapped);

		flash.init().unwrap();
		check(&flash, Mode::BitBang);
		let writes = flash.hardware().pin_writes();
		flash.delay_ms(5);
		check(&flash, Mode::BitBang);
		assert_eq!(flash.hardware().pin_writes(), writes);
		assert_eq!(flash.hardware().slept_ms(), RESET_DELAY_MS + 5);

		flash.teardown();
		check(&flash, Mode::MemoryMapped);
		flash.delay_ms(1);
		check(&flash, Mode::MemoryMapped);

		{
			let bb = flash.bitbang().unwrap();
			check(&*bb, Mode::BitBang);
		}
		check(&flash, Mode::MemoryMapped);
	}

	#[test]
	fn erase_then_program() {
		let mut flash = SpiFlash::new(SimFlash::new().with_busy_polls(2));
		flash.init().unwrap();
		flash.begin_erase_4k(0x1000).unwrap();
		while flash.is_busy().unwrap() {}
		assert_eq!(flash.begin_write(0x1000, b"OrangeCrab").unwrap(), 10);
		while flash.is_busy().unwrap() {}
		flash.teardown();
		assert_eq!(&flash.hardware().memory()[0x1000..0x100a], b"OrangeCrab");
		assert_eq!(flash.hardware().memory()[0x100a], 0xff);
	}
}
