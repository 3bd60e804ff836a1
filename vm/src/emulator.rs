use crate::bus::{Bus, SystemBus, RAM_BASE, RAM_SIZE_DEFAULT};
use crate::cpu::Cpu;
use crate::Trap;
use goblin::elf::{program_header::PT_LOAD, Elf};
use std::io::Write;

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The guest wrote the test harness exit register.
    Requested(u32),
    /// The cycle budget ran out first.
    TimedOut,
}

/// Host-side wrapper tying one hart to the platform bus: image loading, the
/// run loop with its cycle budget and timer cadence, and output draining.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: SystemBus,

    /// Enable tracing when the PC reaches one of these addresses.
    pub trace_on_pc: Vec<u32>,
    /// Disable tracing when the PC reaches one of these addresses.
    pub trace_off_pc: Vec<u32>,
}

/// The mtimer is stepped and its IRQ line resampled once per this many
/// instructions.
const TIMER_CADENCE_MASK: u64 = 0xfff;

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_memory(RAM_SIZE_DEFAULT)
    }

    pub fn with_memory(ram_size: usize) -> Self {
        Self {
            cpu: Cpu::new(RAM_BASE),
            bus: SystemBus::new(ram_size),
            trace_on_pc: Vec::new(),
            trace_off_pc: Vec::new(),
        }
    }

    /// Load a flat binary image at an absolute address in RAM.
    pub fn load_bin(&mut self, image: &[u8], addr: u32) -> Result<(), Box<dyn std::error::Error>> {
        let ram_size = self.bus.dram.data.len() as u64;
        if addr < RAM_BASE {
            return Err(format!(
                "load address {:#010x} is below the RAM base {:#010x}",
                addr, RAM_BASE
            )
            .into());
        }
        let offset = u64::from(addr - RAM_BASE);
        if offset + image.len() as u64 > ram_size {
            return Err(format!(
                "binary ({} bytes) loaded at {:#010x} extends past the end of RAM",
                image.len(),
                addr
            )
            .into());
        }
        self.bus.dram.write_bytes(offset as u32, image)?;
        log::debug!("loaded {} bytes at {:#010x}", image.len(), addr);
        Ok(())
    }

    /// Load an ELF image by program header and point the PC at its entry.
    /// Returns the entry address.
    pub fn load_elf(&mut self, image: &[u8]) -> Result<u32, Box<dyn std::error::Error>> {
        let elf = Elf::parse(image)?;
        for ph in &elf.program_headers {
            if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
                continue;
            }
            let file_size = ph.p_filesz as usize;
            let file_offset = ph.p_offset as usize;
            if file_offset + file_size > image.len() {
                return Err(
                    format!("ELF segment exceeds file bounds (offset {:#x})", file_offset).into(),
                );
            }
            let target = (if ph.p_paddr != 0 { ph.p_paddr } else { ph.p_vaddr }) as u32;
            self.load_bin(&image[file_offset..file_offset + file_size], target)?;
            if ph.p_memsz > ph.p_filesz {
                let bss_off = target - RAM_BASE + ph.p_filesz as u32;
                self.bus
                    .dram
                    .zero_range(bss_off, (ph.p_memsz - ph.p_filesz) as usize)?;
            }
            log::debug!(
                "loaded segment at {:#010x} (filesz {:#x}, memsz {:#x})",
                target,
                ph.p_filesz,
                ph.p_memsz
            );
        }
        self.cpu.pc = elf.entry as u32;
        Ok(elf.entry as u32)
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<(), Trap> {
        self.cpu.step(&mut self.bus)
    }

    /// Drain all buffered device output (test harness first, then UART)
    /// into `out`.
    pub fn drain_output(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        while let Some(b) = self.bus.testio.pop_output() {
            out.write_all(&[b])?;
        }
        while let Some(b) = self.bus.uart.pop_output() {
            out.write_all(&[b])?;
        }
        Ok(())
    }

    /// Run until the guest requests a halt or the cycle budget is used up
    /// (`max_cycles == 0` means unlimited). Device output is streamed to
    /// `out`; architectural traps are handled by the guest and do not stop
    /// the loop.
    pub fn run(&mut self, max_cycles: u64, out: &mut dyn Write) -> std::io::Result<(ExitStatus, u64)> {
        let mut cyc: u64 = 0;
        loop {
            if max_cycles != 0 && cyc >= max_cycles {
                return Ok((ExitStatus::TimedOut, cyc));
            }

            let result = self.step();
            cyc += 1;
            self.drain_output(out)?;

            if let Err(Trap::Exit(code)) = result {
                out.flush()?;
                return Ok((ExitStatus::Requested(code), cyc));
            }

            // Advance the platform timer and resample the timer IRQ line.
            if cyc & TIMER_CADENCE_MASK == 0 {
                self.bus.mtimer.step_time();
                let irq = self.bus.mtimer.irq_status(0);
                self.cpu.csr.set_irq_t(irq);
            }

            // Trace gates keyed on the PC.
            if !self.cpu.trace && self.trace_on_pc.contains(&self.cpu.pc) {
                println!("(Trace enabled at PC {:08x})", self.cpu.pc);
                self.cpu.trace = true;
            } else if self.cpu.trace && self.trace_off_pc.contains(&self.cpu.pc) {
                println!("(Trace disabled at PC {:08x})", self.cpu.pc);
                self.cpu.trace = false;
            }
        }
    }

    /// Hex-dump physical memory between `start` and `end` (exclusive).
    pub fn dump_range(&mut self, start: u32, end: u32, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "Dumping memory from {:08x} to {:08x}:", start, end)?;
        for (i, addr) in (start..end).enumerate() {
            match self.bus.read8(addr) {
                Some(b) => write!(out, "{:02x}", b)?,
                None => write!(out, "??")?,
            }
            write!(out, "{}", if i % 16 == 15 { '\n' } else { ' ' })?;
        }
        writeln!(out)?;
        Ok(())
    }
}
