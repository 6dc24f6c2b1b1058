//! Packet copies between the PMA and buffers or queues
//!
//! The PMA only supports half-word accesses. Bytes are packed two to a
//! half-word, low byte first. An odd trailing byte occupies the low half
//! of the last half-word.

use crate::{
    queue::{InputQueue, OutputQueue},
    ral::Registers,
};

/// Yields the bytes of a packet buffer
struct PmaReader<'r, R> {
    regs: &'r R,
    addr: usize,
    word: Option<u16>,
}

impl<'r, R: Registers> PmaReader<'r, R> {
    fn new(regs: &'r R, addr: usize) -> Self {
        PmaReader {
            regs,
            addr,
            word: None,
        }
    }
}

impl<R: Registers> Iterator for PmaReader<'_, R> {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        match self.word.take() {
            Some(word) => Some((word >> 8) as u8),
            None => {
                let word = self.regs.read_pma(self.addr);
                self.addr += 2;
                self.word = Some(word);
                Some(word as u8)
            }
        }
    }
}

/// Packs bytes into a packet buffer
struct PmaWriter<'r, R> {
    regs: &'r R,
    addr: usize,
    low: Option<u8>,
}

impl<'r, R: Registers> PmaWriter<'r, R> {
    fn new(regs: &'r R, addr: usize) -> Self {
        PmaWriter {
            regs,
            addr,
            low: None,
        }
    }

    fn push(&mut self, byte: u8) {
        match self.low.take() {
            Some(low) => {
                self.regs.write_pma(self.addr, low as u16 | (byte as u16) << 8);
                self.addr += 2;
            }
            None => self.low = Some(byte),
        }
    }

    /// Writes the half-full word of an odd-length packet
    fn finish(mut self) {
        if let Some(low) = self.low.take() {
            self.regs.write_pma(self.addr, low as u16);
        }
    }
}

/// Copy `buffer.len()` bytes out of the packet buffer at `addr`
pub fn read_to_buffer<R: Registers>(regs: &R, addr: usize, buffer: &mut [u8]) {
    for (dst, src) in buffer.iter_mut().zip(PmaReader::new(regs, addr)) {
        *dst = src;
    }
}

/// Copy `n` bytes out of the packet buffer at `addr`, into `queue`
///
/// Returns the number of bytes that fit in the queue.
pub fn read_to_queue<R: Registers>(
    regs: &R,
    addr: usize,
    queue: &InputQueue<'_>,
    n: usize,
) -> usize {
    let mut bytes = PmaReader::new(regs, addr);
    let stored = queue.put(n, || bytes.next().unwrap_or(0));
    queue.commit(stored);
    stored
}

/// Copy all of `buffer` into the packet buffer at `addr`
pub fn write_from_buffer<R: Registers>(regs: &R, addr: usize, buffer: &[u8]) {
    let mut writer = PmaWriter::new(regs, addr);
    buffer.iter().for_each(|&byte| writer.push(byte));
    writer.finish();
}

/// Copy `n` bytes from `queue` into the packet buffer at `addr`
pub fn write_from_queue<R: Registers>(regs: &R, addr: usize, queue: &OutputQueue<'_>, n: usize) {
    let mut writer = PmaWriter::new(regs, addr);
    let taken = queue.take(n, |byte| writer.push(byte));
    writer.finish();
    queue.commit(taken);
}
