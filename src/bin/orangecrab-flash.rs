#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate orangecrab_flash;
use orangecrab_flash::*;

use std::fs;
use std::process::exit;

use orangecrab_flash::spi::{
	EraseSize,
	Hardware,
	PAGE_SIZE,
	SpiFlash,
};

// 64K block erase takes up to 2s on the W25Q128JV
const MAX_BUSY_POLLS: u32 = 5000;
const BUSY_POLL_INTERVAL_MS: u64 = 1;

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid paramater {}: {}", name, e);
		e.context(msg).into()
	})
}

// hex with "0x" prefix, decimal otherwise
fn get_address(matches: &clap::ArgMatches, name: &str) -> AResult<u64> {
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	let parsed = if param.starts_with("0x") || param.starts_with("0X") {
		u64::from_str_radix(&param[2..], 16)
	} else {
		param.parse::<u64>()
	};
	parsed.map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid address {} {:?}: {}", name, param, e);
		e.context(msg).into()
	})
}

fn get_flash_address(matches: &clap::ArgMatches, name: &str) -> AResult<u32> {
	let address = get_address(matches, name)?;
	ensure!(address < (1 << 24), "address 0x{:x} doesn't fit into 24 bits", address);
	Ok(address as u32)
}

fn format_bytes(data: &[u8]) -> String {
	let parts: Vec<String> = data.iter().map(|b| format!("\"0x{:02x}\"", b)).collect();
	parts.join(",")
}

// erase / program only start the operation
fn wait_idle<H: Hardware>(flash: &mut SpiFlash<H>, what: &str) -> AResult<()> {
	for _ in 0..MAX_BUSY_POLLS {
		if !flash.is_busy()? {
			return Ok(());
		}
		flash.delay_ms(BUSY_POLL_INTERVAL_MS);
	}
	bail!("SPI flash still busy after {} ({} polls)", what, MAX_BUSY_POLLS);
}

fn bringup<H: Hardware>(flash: &mut SpiFlash<H>) -> AResult<()> {
	let id = flash.identify()?;
	println!("{{\"spi id\":[{}]}}", format_bytes(&id.0));

	let uuid = flash.read_unique_id()?;
	println!("{{\"spi uuid\":[{}]}}", format_bytes(&uuid));

	Ok(())
}

fn erase<H: Hardware>(flash: &mut SpiFlash<H>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let size: EraseSize = get_param(sub_m, "SIZE")?;
	let address = get_flash_address(sub_m, "ADDRESS")?;
	if 0 != address & (size.bytes() - 1) {
		warn!("Erase address 0x{:06x} not aligned, erasing the whole {:?} around it", address, size);
	}

	flash.begin_erase(size, address)?;
	if !sub_m.is_present("no_wait") {
		wait_idle(flash, "erase")?;
		info!("Erased {:?} at 0x{:06x}", size, address & !(size.bytes() - 1));
	}
	Ok(())
}

fn write<H: Hardware>(flash: &mut SpiFlash<H>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let mut address = get_flash_address(sub_m, "ADDRESS")?;
	let file = sub_m.value_of("FILE").ok_or_else(|| format_err!("missing parameter FILE"))?;
	let data = fs::read(file).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("read {}: {}", file, e);
		failure::Error::from(e.context(msg))
	})?;
	ensure!((address as usize) + data.len() <= (1 << 24), "data doesn't fit into flash");

	// one page program instruction per page
	let mut remaining = &data[..];
	while !remaining.is_empty() {
		let page_left = PAGE_SIZE - (address as usize % PAGE_SIZE);
		let chunk = &remaining[..std::cmp::min(page_left, remaining.len())];
		let sent = flash.begin_write(address, chunk)?;
		wait_idle(flash, "page program")?;
		address += sent as u32;
		remaining = &remaining[sent..];
	}
	info!("Wrote {} bytes", data.len());
	Ok(())
}

fn run<H: Hardware>(hardware: H, matches: &clap::ArgMatches) -> AResult<()> {
	let mut spi = SpiFlash::new(hardware);
	let mut flash = spi.bitbang()?;

	match matches.subcommand() {
		("bringup", _) => {
			bringup(&mut *flash)
		},
		("id", _) => {
			println!("{}", flash.identify()?);
			Ok(())
		},
		("uuid", _) => {
			let uuid = flash.read_unique_id()?;
			let hex: Vec<String> = uuid.iter().map(|b| format!("{:02x}", b)).collect();
			println!("{}", hex.join(""));
			Ok(())
		},
		("status", _) => {
			let status = flash.read_status()?;
			println!("0x{:02x}{}", status, if 0 != status & 0x01 { " [BUSY]" } else { "" });
			Ok(())
		},
		("erase", Some(sub_m)) => {
			erase(&mut *flash, sub_m)
		},
		("write", Some(sub_m)) => {
			write(&mut *flash, sub_m)
		},
		("hold", _) => {
			flash.hold()
		},
		("unhold", _) => {
			flash.unhold()
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg csr_base: --("csr-base") +takes_value "CSR base address of the SPI flash core (default: 0xf0004800)")
		(@arg simulate: --simulate "use a simulated flash instead of /dev/mem")
		(@subcommand bringup =>
			(about: "print flash ID and unique ID in bring-up report format")
		)
		(@subcommand id =>
			(about: "read manufacturer / device ID and JEDEC ID")
		)
		(@subcommand uuid =>
			(about: "read factory programmed 64-bit unique ID")
		)
		(@subcommand status =>
			(about: "read status register 1")
		)
		(@subcommand erase =>
			(about: "erase sector / block containing ADDRESS")
			(@arg no_wait: --("no-wait") "don't wait for the erase to finish")
			(@arg SIZE: +required "erase size (4k, 32k or 64k)")
			(@arg ADDRESS: +required "flash address (0x prefix for hex)")
		)
		(@subcommand write =>
			(about: "program FILE at ADDRESS (needs to be erased first)")
			(@arg ADDRESS: +required "flash address (0x prefix for hex)")
			(@arg FILE: +required "file to write")
		)
		(@subcommand hold =>
			(about: "put flash into power-down")
		)
		(@subcommand unhold =>
			(about: "release flash from power-down")
		)
	).get_matches();

	if matches.is_present("simulate") {
		info!("Using simulated flash");
		return run(spi::sim::SimFlash::new(), &matches);
	}

	let base = if matches.is_present("csr_base") {
		get_address(&matches, "csr_base")?
	} else {
		litex::DEFAULT_CSR_BASE
	};
	let hardware = litex::open(base)?;
	run(hardware, &matches)
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		// eprintln!("Backtrace: {:?}", e.backtrace());
		exit(1);
	}
}
