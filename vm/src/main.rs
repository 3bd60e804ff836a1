use clap::Parser;
use rv32_vm::bus::RAM_BASE;
use rv32_vm::emulator::{Emulator, ExitStatus};
use std::fs;

#[derive(Parser, Debug)]
#[command(author, version, about = "RV32IMAC_Zicsr_Zicntr system emulator with M/S/U modes and Sv32", long_about = None)]
struct Args {
    /// Image to load, optionally suffixed with @addr
    /// (e.g. boot.bin@0x80000000). ELF images are detected by magic and
    /// loaded by program header; flat binaries default to the RAM base.
    #[arg(long = "bin", value_name = "PATH[@ADDR]")]
    bin: Vec<String>,

    /// Maximum number of cycles to run (0 = unlimited).
    #[arg(long, default_value_t = 100_000)]
    cycles: u64,

    /// Memory size in KiB.
    #[arg(long, default_value_t = 256 * 1024)]
    memsize: u64,

    /// Print per-instruction execution tracing.
    #[arg(long)]
    trace: bool,

    /// Enable tracing upon reaching this PC (repeatable).
    #[arg(long = "ton-pc", value_name = "PC", value_parser = parse_u32)]
    ton_pc: Vec<u32>,

    /// Disable tracing upon reaching this PC (repeatable).
    #[arg(long = "toff-pc", value_name = "PC", value_parser = parse_u32)]
    toff_pc: Vec<u32>,

    /// Exit with the CPU-provided exit code, or -1 on timeout.
    #[arg(long)]
    cpuret: bool,

    /// Print memory contents between START and END (exclusive) after
    /// execution finishes (repeatable).
    #[arg(long = "dump", num_args = 2, value_names = ["START", "END"], value_parser = parse_u32)]
    dump: Vec<u32>,
}

/// Accept both decimal and 0x-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("invalid address {:?}: {}", s, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let ram_size = args
        .memsize
        .checked_mul(1024)
        .and_then(|b| usize::try_from(b).ok())
        .ok_or("requested memory size is too large")?;

    let mut emu = Emulator::with_memory(ram_size);
    emu.cpu.trace = args.trace;
    emu.trace_on_pc = args.ton_pc.clone();
    emu.trace_off_pc = args.toff_pc.clone();

    for spec in &args.bin {
        let (path, addr) = match spec.rsplit_once('@') {
            Some((path, addr)) => (path, Some(parse_u32(addr)?)),
            None => (spec.as_str(), None),
        };
        let image = fs::read(path)?;
        match addr {
            // An explicit address always means a flat load.
            Some(addr) => emu.load_bin(&image, addr)?,
            None if image.starts_with(b"\x7fELF") => {
                let entry = emu.load_elf(&image)?;
                log::info!("loaded ELF {:?}, entry {:#010x}", path, entry);
            }
            None => emu.load_bin(&image, RAM_BASE)?,
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let (status, cycles) = emu.run(args.cycles, &mut out)?;

    let rc = match status {
        ExitStatus::Requested(code) => {
            println!("CPU requested halt. Exit code {}", code);
            println!("Ran for {} cycles", cycles);
            if args.cpuret {
                code as i32
            } else {
                0
            }
        }
        ExitStatus::TimedOut => {
            println!("Timed out.");
            if args.cpuret {
                -1
            } else {
                0
            }
        }
    };

    for range in args.dump.chunks(2) {
        emu.dump_range(range[0], range[1], &mut out)?;
    }

    std::process::exit(rc);
}
