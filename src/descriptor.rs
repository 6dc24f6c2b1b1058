//! Buffer descriptor table
//!
//! The table sits at the start of the packet memory. Each endpoint owns
//! one eight-byte entry describing where its TX and RX buffers live, and
//! how many bytes they hold.
//!
//! Isochronous endpoints are always double buffered by the hardware. The
//! second buffer of each direction reuses the slots of the opposite
//! direction, so the `…1` accessors are aliases of the `…0` slots.

use crate::ral::Registers;

/// Size of one table entry, in bytes
pub const ENTRY_SIZE: usize = 8;
/// Size of the whole table, in bytes
pub const TABLE_SIZE: usize = ENTRY_SIZE * crate::ENDPOINTS;

/// Mask for the received byte count in an RX count slot
pub const RXCOUNT_COUNT_MASK: u16 = 0x3FF;

/// Block size flag, set when the RX buffer is sized in 32 byte blocks
const BL_SIZE: u16 = 1 << 15;
const NUM_BLOCK_OFFSET: u32 = 10;
const NUM_BLOCK_MASK: u16 = 0x1F << NUM_BLOCK_OFFSET;

/// Slot offsets within an entry
mod slot {
    pub const TXADDR0: usize = 0;
    pub const TXCOUNT0: usize = 2;
    pub const RXADDR0: usize = 4;
    pub const RXCOUNT0: usize = 6;

    pub const TXADDR1: usize = RXADDR0;
    pub const TXCOUNT1: usize = RXCOUNT0;
    pub const RXADDR1: usize = TXADDR0;
    pub const RXCOUNT1: usize = TXCOUNT0;
}

/// Encodes an RX buffer size for an RX count slot
///
/// Sizes up to 62 bytes are counted in two byte blocks. Larger sizes are
/// rounded up to a count of 32 byte blocks, and set the block size flag.
pub fn rx_count_blocks(out_maxsize: u16) -> u16 {
    if out_maxsize == 0 {
        0
    } else if out_maxsize > 62 {
        ((((out_maxsize - 1) | 0x1F) + 1) / 32) << NUM_BLOCK_OFFSET | BL_SIZE
    } else {
        ((((out_maxsize - 1) | 1) + 1) / 2) << NUM_BLOCK_OFFSET
    }
}

/// The number of bytes covered by an encoded RX buffer size
pub fn rx_block_bytes(rx_count: u16) -> usize {
    let blocks = ((rx_count & NUM_BLOCK_MASK) >> NUM_BLOCK_OFFSET) as usize;
    if rx_count & BL_SIZE != 0 {
        blocks * 32
    } else {
        blocks * 2
    }
}

/// One endpoint's entry in the buffer descriptor table
pub struct Descriptor<'r, R> {
    regs: &'r R,
    base: usize,
}

impl<'r, R: Registers> Descriptor<'r, R> {
    /// The table is always placed at the start of the PMA
    pub fn new(regs: &'r R, endpoint: usize) -> Self {
        debug_assert!(endpoint < crate::ENDPOINTS);
        Descriptor {
            regs,
            base: endpoint * ENTRY_SIZE,
        }
    }

    fn read(&self, slot: usize) -> u16 {
        self.regs.read_pma(self.base + slot)
    }

    fn write(&self, slot: usize, value: u16) {
        self.regs.write_pma(self.base + slot, value)
    }

    pub fn tx_addr0(&self) -> usize {
        self.read(slot::TXADDR0) as usize
    }
    pub fn set_tx_addr0(&self, addr: usize) {
        self.write(slot::TXADDR0, addr as u16)
    }
    pub fn tx_count0(&self) -> u16 {
        self.read(slot::TXCOUNT0)
    }
    pub fn set_tx_count0(&self, count: u16) {
        self.write(slot::TXCOUNT0, count)
    }
    pub fn rx_addr0(&self) -> usize {
        self.read(slot::RXADDR0) as usize
    }
    pub fn set_rx_addr0(&self, addr: usize) {
        self.write(slot::RXADDR0, addr as u16)
    }
    pub fn rx_count0(&self) -> u16 {
        self.read(slot::RXCOUNT0)
    }
    pub fn set_rx_count0(&self, count: u16) {
        self.write(slot::RXCOUNT0, count)
    }

    pub fn set_tx_addr1(&self, addr: usize) {
        self.write(slot::TXADDR1, addr as u16)
    }
    pub fn tx_count1(&self) -> u16 {
        self.read(slot::TXCOUNT1)
    }
    pub fn set_tx_count1(&self, count: u16) {
        self.write(slot::TXCOUNT1, count)
    }
    pub fn set_rx_addr1(&self, addr: usize) {
        self.write(slot::RXADDR1, addr as u16)
    }
    pub fn rx_count1(&self) -> u16 {
        self.read(slot::RXCOUNT1)
    }
    pub fn set_rx_count1(&self, count: u16) {
        self.write(slot::RXCOUNT1, count)
    }
}

#[cfg(test)]
mod test {
    use super::{rx_block_bytes, rx_count_blocks, Descriptor};
    use crate::sim::Sim;

    #[test]
    fn rx_count_small_buffers() {
        assert_eq!(rx_count_blocks(1), 1 << 10);
        assert_eq!(rx_count_blocks(2), 1 << 10);
        assert_eq!(rx_count_blocks(3), 2 << 10);
        assert_eq!(rx_count_blocks(8), 4 << 10);
        assert_eq!(rx_count_blocks(62), 31 << 10);
    }

    #[test]
    fn rx_count_large_buffers() {
        assert_eq!(rx_count_blocks(63), 2 << 10 | 0x8000);
        assert_eq!(rx_count_blocks(64), 2 << 10 | 0x8000);
        assert_eq!(rx_count_blocks(65), 3 << 10 | 0x8000);
        assert_eq!(rx_count_blocks(512), 16 << 10 | 0x8000);
    }

    #[test]
    fn rx_count_covers_max_size() {
        for max in 1..=62u16 {
            let encoded = rx_count_blocks(max);
            assert_eq!(encoded, max.div_ceil(2) << 10, "{max}");
            assert!(rx_block_bytes(encoded) >= max as usize, "{max}");
        }
        for max in 63..=512u16 {
            let encoded = rx_count_blocks(max);
            assert_eq!(encoded, max.div_ceil(32) << 10 | 0x8000, "{max}");
            assert!(rx_block_bytes(encoded) >= max as usize, "{max}");
        }
    }

    #[test]
    fn aliased_slots() {
        let sim = Sim::new();
        let desc = Descriptor::new(&sim, 2);
        desc.set_tx_addr0(0x80);
        desc.set_tx_count0(5);
        desc.set_rx_addr0(0xC0);
        desc.set_rx_count0(rx_count_blocks(64));

        assert_eq!(desc.rx_count1(), 5);
        assert_eq!(desc.tx_count1(), rx_count_blocks(64));

        desc.set_tx_addr1(0x80);
        assert_eq!(desc.rx_addr0(), 0x80);
        desc.set_rx_addr1(0xC0);
        assert_eq!(desc.tx_addr0(), 0xC0);

        assert_eq!(sim.pma_word(16), 0xC0);
        assert_eq!(sim.pma_word(20), 0x80);
    }
}
