// test_bus.rs
//
// Behavioral I2C peripherals for host tests. Both mocks implement the async
// I2c trait through `transaction`, the method the provided write/read/
// write_read helpers funnel into.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{
    Error, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl Error for BusFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

/// A delay provider that completes instantly; drivers account elapsed time
/// from the steps they request, so tests stay wall-clock free.
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Txn {
    pub device: u8,
    pub write_len: usize,
    pub read_len: usize,
}

/// EEPROM model: 2-byte word address writes, internal write cycle emulated
/// by NACKing the next `busy_polls` zero-length handshakes after each data
/// write.
pub struct FakeEeprom {
    pub mem: [u8; 1024],
    pub txns: heapless::Vec<Txn, 128>,
    pub busy_polls: u8,
    pub pending_busy: u8,
    pub fail_writes: bool,
    pub fail_reads: bool,
}

impl FakeEeprom {
    pub fn new() -> Self {
        Self {
            mem: [0xFF; 1024],
            txns: heapless::Vec::new(),
            busy_polls: 0,
            pending_busy: 0,
            fail_writes: false,
            fail_reads: false,
        }
    }

    fn log(&mut self, device: u8, write_len: usize, read_len: usize) {
        self.txns
            .push(Txn {
                device,
                write_len,
                read_len,
            })
            .ok();
    }
}

impl ErrorType for FakeEeprom {
    type Error = BusFault;
}

impl I2c for FakeEeprom {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), BusFault> {
        match operations {
            // Zero-length addressing handshake: the completion poll.
            [Operation::Write(w)] if w.is_empty() => {
                self.log(address, 0, 0);
                if self.pending_busy > 0 {
                    self.pending_busy -= 1;
                    return Err(BusFault);
                }
                Ok(())
            }
            // Data write: word address prefix plus payload.
            [Operation::Write(w)] => {
                self.log(address, w.len(), 0);
                if self.fail_writes {
                    return Err(BusFault);
                }
                assert!(w.len() >= 2, "data write without address prefix");
                let base = u16::from_be_bytes([w[0], w[1]]) as usize;
                self.mem[base..base + w.len() - 2].copy_from_slice(&w[2..]);
                self.pending_busy = self.busy_polls;
                Ok(())
            }
            // Random read: address write followed by a data read.
            [Operation::Write(w), Operation::Read(r)] => {
                let (w_len, r_len) = (w.len(), r.len());
                self.log(address, w_len, r_len);
                if self.fail_reads {
                    return Err(BusFault);
                }
                let base = u16::from_be_bytes([w[0], w[1]]) as usize;
                r.copy_from_slice(&self.mem[base..base + r_len]);
                Ok(())
            }
            _ => panic!("unexpected transaction shape"),
        }
    }
}

/// Register-file sensor model (barometer / accelerometer style): one-byte
/// register pointer, auto-incrementing reads.
pub struct RegBus {
    pub regs: [u8; 256],
    pub writes: heapless::Vec<(u8, u8), 32>,
    pub fail: bool,
    /// Data served at DATAX0 (0x32) while the self-test bit of register
    /// 0x31 is set; models the shifted output the self-test exercises.
    pub self_test_data: Option<[u8; 6]>,
}

impl RegBus {
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            writes: heapless::Vec::new(),
            fail: false,
            self_test_data: None,
        }
    }

    pub fn written(&self, reg: u8) -> Option<u8> {
        self.writes
            .iter()
            .rev()
            .find(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
    }
}

impl ErrorType for RegBus {
    type Error = BusFault;
}

impl I2c for RegBus {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), BusFault> {
        if self.fail {
            return Err(BusFault);
        }
        match operations {
            [Operation::Write(w)] if w.len() == 2 => {
                self.regs[w[0] as usize] = w[1];
                self.writes.push((w[0], w[1])).ok();
                Ok(())
            }
            [Operation::Write(w), Operation::Read(r)] if w.len() == 1 => {
                let reg = w[0] as usize;
                if reg == 0x32 && self.regs[0x31] & 0x80 != 0 {
                    if let Some(st) = self.self_test_data {
                        let n = 6.min(r.len());
                        r[..n].copy_from_slice(&st[..n]);
                        return Ok(());
                    }
                }
                r.copy_from_slice(&self.regs[reg..reg + r.len()]);
                Ok(())
            }
            _ => panic!("unexpected transaction shape"),
        }
    }
}
