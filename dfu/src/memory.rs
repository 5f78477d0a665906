use std::sync::LazyLock;

use nonempty::NonEmpty;
use regex::Regex;

static LAYOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?\s*(?P<name>[^/]*?)\s*/0x(?P<base>[[:xdigit:]]+)U?/(?P<sectors>.+)$")
        .expect("static regex")
});
static SECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<count>\d+)\*(?P<size>\d+)\s*(?P<unit>[KMB]?)\s*(?P<access>[a-g])")
        .expect("static regex")
});

/// Memory map published by a DfuSe alternate setting
///
/// The bootloader describes each alternate setting with a string
/// descriptor such as `@Internal Flash  /0x08000000/128*02Kg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    pub name: String,
    pub sectors: NonEmpty<MemorySector>,
}

/// Run of equally sized pages sharing the same access rights
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySector {
    pub start: u32,
    pub pages: u32,
    pub page_size: u32,
    access: u8,
}

impl MemorySector {
    const READABLE: u8 = 1;
    const ERASABLE: u8 = 2;
    const WRITABLE: u8 = 4;

    pub fn end(&self) -> u32 {
        self.start + self.pages * self.page_size
    }
    pub fn contains(&self, addr: u32) -> bool {
        (self.start..self.end()).contains(&addr)
    }
    pub fn readable(&self) -> bool {
        self.access & Self::READABLE != 0
    }
    pub fn erasable(&self) -> bool {
        self.access & Self::ERASABLE != 0
    }
    pub fn writable(&self) -> bool {
        self.access & Self::WRITABLE != 0
    }
}

impl MemoryLayout {
    /// Parse a DfuSe interface string, `None` if it does not describe memory.
    pub fn parse(desc: &str) -> Option<Self> {
        let caps = LAYOUT_RE.captures(desc.trim())?;
        let mut addr = u32::from_str_radix(&caps["base"], 16).ok()?;

        let mut sectors = Vec::new();
        for sc in SECTOR_RE.captures_iter(&caps["sectors"]) {
            let pages: u32 = sc["count"].parse().ok()?;
            let size: u32 = sc["size"].parse().ok()?;
            let page_size = match &sc["unit"] {
                "K" => size * 1024,
                "M" => size * 1024 * 1024,
                _ => size,
            };
            let access = sc["access"].as_bytes()[0] - b'a' + 1;
            sectors.push(MemorySector {
                start: addr,
                pages,
                page_size,
                access,
            });
            addr = addr.checked_add(pages.checked_mul(page_size)?)?;
        }

        Some(MemoryLayout {
            name: caps["name"].to_string(),
            sectors: NonEmpty::from_vec(sectors)?,
        })
    }

    pub fn start(&self) -> u32 {
        self.sectors.first().start
    }

    pub fn end(&self) -> u32 {
        self.sectors.last().end()
    }

    pub fn sector_at(&self, addr: u32) -> Option<&MemorySector> {
        self.sectors.iter().find(|s| s.contains(addr))
    }

    /// Start addresses of the erasable pages overlapping `[start, start + len)`.
    pub fn erase_pages(&self, start: u32, len: u32) -> Vec<u32> {
        let end = start.saturating_add(len);
        self.sectors
            .iter()
            .filter(|s| s.erasable() && s.start < end && start < s.end())
            .flat_map(|s| {
                let first = (start.max(s.start) - s.start) / s.page_size;
                let last = (end.min(s.end()) - s.start).div_ceil(s.page_size);
                (first..last).map(move |page| s.start + page * s.page_size)
            })
            .collect()
    }
}
