//! Interface II ROM cartridge
//!
//! A 16 KiB cartridge that asserts /ROMCS, replacing the internal ROM in
//! slots 0 and 1 while inserted.

use crate::memory::{Memory, MemorySource, PageId, PageView, PAGE_SIZE};

pub struct If2 {
    /// Arena pages holding the cartridge image while inserted
    rom: Option<[PageId; 2]>,
}

impl If2 {
    pub fn new() -> Self {
        If2 { rom: None }
    }

    pub fn active(&self) -> bool {
        self.rom.is_some()
    }

    /// Insert a cartridge image of up to 16 KiB
    pub fn insert(&mut self, memory: &mut Memory, data: &[u8]) {
        let pages = self.rom.unwrap_or_else(|| {
            [memory.alloc_page(0xFF), memory.alloc_page(0xFF)]
        });
        for (half, page) in pages.iter().enumerate() {
            let buf = memory.page_mut(*page);
            buf.fill(0xFF);
            let start = half * PAGE_SIZE;
            if data.len() > start {
                let n = (data.len() - start).min(PAGE_SIZE);
                buf[..n].copy_from_slice(&data[start..start + n]);
            }
        }
        self.rom = Some(pages);
    }

    pub fn eject(&mut self) {
        self.rom = None;
    }

    /// The ROMCS pair while a cartridge is inserted
    pub fn romcs_pages(&self) -> Option<[PageView; 2]> {
        self.rom.map(|pages| {
            core::array::from_fn(|half| PageView {
                page: pages[half],
                writable: false,
                contended: false,
                source: MemorySource::Cartridge,
                page_num: half as u8,
                offset: (half * PAGE_SIZE) as u16,
            })
        })
    }

    /// Cartridge contents, for snapshots
    pub fn rom_bytes(&self, memory: &Memory) -> Option<Vec<u8>> {
        self.rom.map(|pages| {
            let mut out = Vec::with_capacity(2 * PAGE_SIZE);
            out.extend_from_slice(&memory.page(pages[0])[..]);
            out.extend_from_slice(&memory.page(pages[1])[..]);
            out
        })
    }
}

impl Default for If2 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_pages() {
        let mut memory = Memory::new();
        let mut if2 = If2::new();
        assert!(!if2.active());
        assert!(if2.romcs_pages().is_none());

        let mut cart = vec![0u8; 0x4000];
        cart[0] = 0xAF;
        cart[0x2000] = 0xC9;
        if2.insert(&mut memory, &cart);
        assert!(if2.active());

        let pages = if2.romcs_pages().unwrap();
        assert_eq!(memory.page(pages[0].page)[0], 0xAF);
        assert_eq!(memory.page(pages[1].page)[0], 0xC9);
        assert!(!pages[0].writable);
        assert_eq!(pages[0].source, MemorySource::Cartridge);

        if2.eject();
        assert!(!if2.active());
    }
}
