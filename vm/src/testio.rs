use crate::bus::BusError;
use std::collections::VecDeque;

pub const TESTIO_SIZE: u32 = 12;

const PUTCHAR: u32 = 0x0;
const PUTHEX: u32 = 0x4;
const EXIT: u32 = 0x8;

/// Write-only test harness device: byte output, hex-dword output, and a
/// simulation-exit register. Output is buffered for the host to drain;
/// writing `EXIT` surfaces the requested code through the bus error path so
/// the in-flight step unwinds to the host loop.
pub struct TestIo {
    output: VecDeque<u8>,
}

impl Default for TestIo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestIo {
    pub fn new() -> Self {
        Self {
            output: VecDeque::new(),
        }
    }

    pub fn write32(&mut self, offset: u32, data: u32) -> Result<(), BusError> {
        match offset {
            PUTCHAR => {
                self.output.push_back(data as u8);
                Ok(())
            }
            PUTHEX => {
                self.output.extend(format!("{:08x}\n", data).bytes());
                Ok(())
            }
            EXIT => Err(BusError::Exit(data)),
            _ => Err(BusError::Fault),
        }
    }

    pub fn pop_output(&mut self) -> Option<u8> {
        self.output.pop_front()
    }
}
