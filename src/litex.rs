//! LiteX SPI flash core (bit-bang capable `SpiFlash` module) accessed from
//! Linux user space by mapping its CSRs through `/dev/mem`.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::io::FromRawFd;
use std::ptr;

use libc::{
	MAP_SHARED,
	O_CLOEXEC,
	O_RDWR,
	O_SYNC,
	PROT_READ,
	PROT_WRITE,
	_SC_PAGESIZE,
	c_void,
	mmap,
	munmap,
	off_t,
	sysconf,
};

use crate::spi::{
	Hardware,
	OutPins,
};

/// CSR base of the SPI flash core in the OrangeCrab test SoC
pub const DEFAULT_CSR_BASE: u64 = 0xf000_4800;

// register offsets (32-bit CSR data width)
const CSR_BITBANG:    usize = 0x00;
const CSR_MISO:       usize = 0x04;
const CSR_BITBANG_EN: usize = 0x08;
const CSR_LEN:        usize = 0x0c;

#[derive(Debug)]
pub struct LiteXSpiFlash {
	ptr: ptr::NonNull<u8>, // start of the page-aligned mapping
	len: usize,
	offset: usize, // of the CSR block within the mapping
	base: u64,
}

impl Drop for LiteXSpiFlash {
	fn drop(&mut self) {
		let res = unsafe {
			munmap(
				self.ptr.as_ptr() as *mut c_void,
				self.len,
			)
		};
		if 0 != res {
			error!("CSR 0x{:08x}: munmap failed: {}", self.base, io::Error::last_os_error());
		}
	}
}

impl LiteXSpiFlash {
	pub fn base(&self) -> u64 {
		self.base
	}

	fn read_csr(&self, register: usize) -> u32 {
		assert!(register + 4 <= CSR_LEN);
		unsafe { ptr::read_volatile(self.ptr.as_ptr().add(self.offset + register) as *const u32) }
	}

	fn write_csr(&mut self, register: usize, data: u32) {
		assert!(register + 4 <= CSR_LEN);
		unsafe { ptr::write_volatile(self.ptr.as_ptr().add(self.offset + register) as *mut u32, data) }
	}
}

impl Hardware for LiteXSpiFlash {
	fn set_pins(&mut self, pins: OutPins) {
		trace!("CSR 0x{:08x}: bitbang <- {:?}", self.base, pins);
		self.write_csr(CSR_BITBANG, pins.bits() as u32);
	}

	fn read_miso(&mut self) -> bool {
		0 != self.read_csr(CSR_MISO) & 0x01
	}

	fn set_bitbang_enabled(&mut self, enabled: bool) {
		trace!("CSR 0x{:08x}: bitbang_en <- {}", self.base, enabled as u32);
		self.write_csr(CSR_BITBANG_EN, enabled as u32);
	}
}

// TODO: lock against a second process bit-banging the same core
pub fn open(base: u64) -> crate::AResult<LiteXSpiFlash> {
	with_context!(("CSR 0x{:08x}: map /dev/mem", base), {
		ensure!(0 == base & 3, "CSR base not 32-bit aligned");

		let page_size = unsafe { sysconf(_SC_PAGESIZE) };
		ensure!(page_size > 0, "couldn't determine page size");
		let page_size = page_size as u64;

		let map_base = base & !(page_size - 1);
		let offset = (base - map_base) as usize;
		// CSR block might cross a page boundary
		let len = (offset + CSR_LEN + page_size as usize - 1) & !(page_size as usize - 1);

		let path = CString::new("/dev/mem")?;
		let fd = unsafe { libc::open(path.as_ptr(), O_RDWR | O_CLOEXEC | O_SYNC) };
		if -1 == fd {
			return Err(io::Error::last_os_error().into());
		}
		// now get fd managed to prevent resource leak
		let _f = unsafe { fs::File::from_raw_fd(fd) };

		let area = unsafe {
			mmap(
				ptr::null_mut(),
				len,
				PROT_READ | PROT_WRITE,
				MAP_SHARED,
				fd,
				map_base as off_t,
			)
		};
		if area == libc::MAP_FAILED {
			return Err(io::Error::last_os_error().into());
		}
		let ptr = match ptr::NonNull::new(area as *mut u8) {
			None => bail!("mmap returned NULL"),
			Some(ptr) => ptr,
		};
		debug!("CSR 0x{:08x}: mapped {} bytes at {:p}", base, len, area);

		Ok(LiteXSpiFlash {
			ptr,
			len,
			offset,
			base,
		})
	})
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn registers_fit_block() {
		for register in [CSR_BITBANG, CSR_MISO, CSR_BITBANG_EN].iter() {
			assert!(register + 4 <= CSR_LEN);
			assert_eq!(register & 3, 0);
		}
	}

	#[test]
	fn default_base_aligned() {
		assert_eq!(DEFAULT_CSR_BASE & 3, 0);
	}
}
