//! In-memory ISP register file emulator
//!
//! Models the flash regions (APROM, LDROM, SPROM, user configuration,
//! OTP rows, XOM descriptors, security key pages) behind the named
//! register interface. Commands execute synchronously on the trigger
//! write; programming clears bits (1 -> 0) and erasing restores 0xFF,
//! as on the real array.
//!
//! Multi-word program model: a burst starts on the trigger and consumes
//! a word pair whenever the second register of a pair slot is written.
//! Pair acknowledge flags read clear immediately, the engine busy flag
//! holds until a full burst worth of data was consumed. The
//! fault-injection knobs force the stuck-acknowledge and early-busy-drop
//! paths a healthy part never takes.
//!
//! XOM regions activate as soon as their descriptor is fully
//! programmed, standing in for the power-on activation of real
//! hardware.

use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use nustorage_core::isp::{
    cmd, map, IspCtl, IspReg, IspRegisterFile, IspSts, KpKeySts, KpKeyTrg, MpSts,
    KEY_STATUS_UNLOCKED,
};

/// Configuration for the ISP emulator
#[derive(Debug, Clone)]
pub struct DummyIspConfig {
    /// APROM size in bytes
    pub aprom_size: usize,
    /// LDROM size in bytes
    pub ldrom_size: usize,
    /// Value reported by the data flash base address register
    pub data_flash_base: u32,
}

impl Default for DummyIspConfig {
    fn default() -> Self {
        Self {
            aprom_size: 0x8_0000,
            ldrom_size: 0x1000,
            data_flash_base: 0x0007_E000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct XomRegion {
    active: bool,
    base: u32,
    pages: u8,
    desc: [u32; 3],
}

impl Default for XomRegion {
    fn default() -> Self {
        Self {
            active: false,
            base: 0,
            pages: 0,
            // Descriptor words sit in erased flash until configured.
            desc: [0xFFFF_FFFF; 3],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    addr: u32,
    fed: usize,
    pairs: u32,
}

/// Software model of the ISP flash engine
pub struct DummyIsp {
    config: DummyIspConfig,
    aprom: Vec<u8>,
    ldrom: Vec<u8>,
    sprom: Vec<u8>,
    user_config: [u32; 4],
    otp: Vec<u32>,
    otp_lock: Vec<u32>,
    xom: [XomRegion; 4],
    kprom: [u32; 8],

    key: [u32; 3],
    key_present: bool,
    key_locked: bool,
    key_match: bool,
    forbid: bool,
    cfg_locked: bool,
    sp_locked: bool,
    kpmax: u32,
    kemax: u32,
    kpcnt: u32,
    kecnt: u32,

    ctl: u32,
    cmd: u32,
    addr: u32,
    dat: u32,
    mpdat: [u32; 4],
    mp_dirty: [bool; 4],
    kpkey: [u32; 3],
    fault: bool,
    allone: u32,
    checksum: u32,
    burst: Option<Burst>,

    hang: bool,
    force_fault: bool,
    mp_hang_after_pairs: Option<u32>,
    mp_drop_busy_after_pairs: Option<u32>,
}

const CONFIG_ERASED: [u32; 4] = [
    0xFFFF_FFFF,
    0xFFFF_FFFF,
    map::CONFIG_RESERVED_ERASED,
    0xFFFF_FFFF,
];

const CTL_WRITABLE: u32 = IspCtl::ISPEN.bits()
    | IspCtl::BS.bits()
    | IspCtl::APUEN.bits()
    | IspCtl::CFGUEN.bits()
    | IspCtl::LDUEN.bits();

impl DummyIsp {
    /// Create an emulator with the given configuration; all flash
    /// regions start erased
    pub fn new(config: DummyIspConfig) -> Self {
        let aprom = vec![0xFF; config.aprom_size];
        let ldrom = vec![0xFF; config.ldrom_size];
        Self {
            aprom,
            ldrom,
            sprom: vec![0xFF; map::PAGE_SIZE as usize],
            user_config: CONFIG_ERASED,
            otp: vec![0xFFFF_FFFF; map::OTP_ROWS as usize * 2],
            otp_lock: vec![0xFFFF_FFFF; map::OTP_ROWS as usize],
            xom: [XomRegion::default(); 4],
            kprom: [0xFFFF_FFFF; 8],
            key: [0; 3],
            key_present: false,
            key_locked: false,
            key_match: false,
            forbid: false,
            cfg_locked: false,
            sp_locked: false,
            kpmax: 0,
            kemax: 0,
            kpcnt: 0,
            kecnt: 0,
            ctl: 0,
            cmd: 0,
            addr: 0,
            dat: 0,
            mpdat: [0; 4],
            mp_dirty: [false; 4],
            kpkey: [0; 3],
            fault: false,
            allone: 0,
            checksum: 0,
            burst: None,
            hang: false,
            force_fault: false,
            mp_hang_after_pairs: None,
            mp_drop_busy_after_pairs: None,
            config,
        }
    }

    /// Create an emulator with the default configuration
    pub fn new_default() -> Self {
        Self::new(DummyIspConfig::default())
    }

    /// APROM contents
    pub fn aprom(&self) -> &[u8] {
        &self.aprom
    }

    /// Mutable APROM contents
    pub fn aprom_mut(&mut self) -> &mut [u8] {
        &mut self.aprom
    }

    /// Wedge (or free) the engine: busy indications never clear while
    /// set, so every bounded poll runs its budget out
    pub fn set_hang(&mut self, hang: bool) {
        self.hang = hang;
    }

    /// Make the next triggered command fail with the fail flag set
    pub fn inject_fault(&mut self) {
        self.force_fault = true;
    }

    /// Stick the pair-acknowledge flags once `pairs` word pairs of a
    /// burst were consumed
    pub fn hang_burst_after(&mut self, pairs: u32) {
        self.mp_hang_after_pairs = Some(pairs);
    }

    /// Drop the burst busy flag early, once `pairs` word pairs of a
    /// burst were consumed
    pub fn drop_burst_busy_after(&mut self, pairs: u32) {
        self.mp_drop_busy_after_pairs = Some(pairs);
    }

    fn and_word(mem: &mut [u8], offset: usize, value: u32) {
        let bytes = value.to_le_bytes();
        for (i, b) in bytes.iter().enumerate() {
            mem[offset + i] &= b;
        }
    }

    fn word_of(mem: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            mem[offset],
            mem[offset + 1],
            mem[offset + 2],
            mem[offset + 3],
        ])
    }

    fn in_active_xom(&self, addr: u32) -> bool {
        self.xom.iter().any(|region| {
            region.active
                && addr >= region.base
                && addr < region.base + u32::from(region.pages) * map::PAGE_SIZE
        })
    }

    fn program_word(&mut self, addr: u32, value: u32) {
        let a = addr as usize;

        if a + 4 <= self.aprom.len() {
            if self.in_active_xom(addr) {
                self.fault = true;
            } else {
                Self::and_word(&mut self.aprom, a, value);
            }
            return;
        }

        if addr >= map::LDROM_BASE && (addr - map::LDROM_BASE) as usize + 4 <= self.ldrom.len() {
            let o = (addr - map::LDROM_BASE) as usize;
            Self::and_word(&mut self.ldrom, o, value);
            return;
        }

        if addr >= map::SPROM_BASE && (addr - map::SPROM_BASE) as usize + 4 <= self.sprom.len() {
            let o = (addr - map::SPROM_BASE) as usize;
            Self::and_word(&mut self.sprom, o, value);
            return;
        }

        if (map::XOM_BASE..map::XOM_BASE + 0x40).contains(&addr) {
            let off = addr - map::XOM_BASE;
            let slot = (off / 0x10) as usize;
            let word = ((off % 0x10) / 4) as usize;
            if word < 3 {
                self.xom[slot].desc[word] &= value;
                if word == 2 {
                    let region = &mut self.xom[slot];
                    region.base = region.desc[0];
                    region.pages = region.desc[1] as u8;
                    region.active = true;
                    debug!(
                        "XOM region {} activated: base {:#010x}, {} pages",
                        slot, region.base, region.pages
                    );
                }
            }
            return;
        }

        if (map::CONFIG_BASE..map::CONFIG_BASE + 0x10).contains(&addr) {
            if self.ctl & IspCtl::CFGUEN.bits() == 0 {
                self.fault = true;
                return;
            }
            let i = ((addr - map::CONFIG_BASE) / 4) as usize;
            self.user_config[i] &= value;
            return;
        }

        if (map::KPROM_BASE..map::KPROM_BASE + 0x400).contains(&addr) {
            let idx = ((addr - map::KPROM_BASE) / 4) as usize;
            if idx < self.kprom.len() {
                self.kprom[idx] &= value;
            }
            if addr == map::KPROM_BASE + 0x14 {
                self.latch_key();
            }
            return;
        }

        if (map::OTP_BASE..map::OTP_BASE + map::OTP_LOCK_OFFSET).contains(&addr) {
            let idx = ((addr - map::OTP_BASE) / 4) as usize;
            let row = idx / 2;
            if self.otp_lock[row] != 0xFFFF_FFFF {
                self.fault = true;
            } else {
                self.otp[idx] &= value;
            }
            return;
        }

        let lock_base = map::OTP_BASE + map::OTP_LOCK_OFFSET;
        if (lock_base..lock_base + map::OTP_ROWS * 4).contains(&addr) {
            let row = ((addr - lock_base) / 4) as usize;
            self.otp_lock[row] &= value;
            return;
        }

        self.fault = true;
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        let a = addr as usize;

        if a + 4 <= self.aprom.len() {
            if self.in_active_xom(addr) {
                // Execute-only: software reads are refused.
                self.fault = true;
                return 0xFFFF_FFFF;
            }
            return Self::word_of(&self.aprom, a);
        }

        if addr >= map::LDROM_BASE && (addr - map::LDROM_BASE) as usize + 4 <= self.ldrom.len() {
            return Self::word_of(&self.ldrom, (addr - map::LDROM_BASE) as usize);
        }

        if addr >= map::SPROM_BASE && (addr - map::SPROM_BASE) as usize + 4 <= self.sprom.len() {
            return Self::word_of(&self.sprom, (addr - map::SPROM_BASE) as usize);
        }

        if (map::XOM_BASE..map::XOM_BASE + 0x40).contains(&addr) {
            let off = addr - map::XOM_BASE;
            let slot = (off / 0x10) as usize;
            let word = ((off % 0x10) / 4) as usize;
            return if word < 3 { self.xom[slot].desc[word] } else { 0xFFFF_FFFF };
        }

        if (map::CONFIG_BASE..map::CONFIG_BASE + 0x10).contains(&addr) {
            return self.user_config[((addr - map::CONFIG_BASE) / 4) as usize];
        }

        if (map::KPROM_BASE..map::KPROM_BASE + 0x400).contains(&addr) {
            let idx = ((addr - map::KPROM_BASE) / 4) as usize;
            return if idx < self.kprom.len() { self.kprom[idx] } else { 0xFFFF_FFFF };
        }

        if (map::OTP_BASE..map::OTP_BASE + map::OTP_LOCK_OFFSET).contains(&addr) {
            return self.otp[((addr - map::OTP_BASE) / 4) as usize];
        }

        let lock_base = map::OTP_BASE + map::OTP_LOCK_OFFSET;
        if (lock_base..lock_base + map::OTP_ROWS * 4).contains(&addr) {
            return self.otp_lock[((addr - lock_base) / 4) as usize];
        }

        self.fault = true;
        0xFFFF_FFFF
    }

    fn erase_range(&mut self, addr: u32, len: u32) {
        let start = addr as usize;
        let end = (start + len as usize).min(self.aprom.len());
        if start < end {
            for b in &mut self.aprom[start..end] {
                *b = 0xFF;
            }
        }
    }

    fn erase_page(&mut self, addr: u32) {
        if addr == map::SPROM_BASE {
            if self.dat != map::ERASE_KEY {
                self.fault = true;
                return;
            }
            for b in &mut self.sprom {
                *b = 0xFF;
            }
            return;
        }

        if (map::CONFIG_BASE..map::CONFIG_BASE + map::PAGE_SIZE).contains(&addr) {
            if self.ctl & IspCtl::CFGUEN.bits() == 0 {
                self.fault = true;
                return;
            }
            self.user_config = CONFIG_ERASED;
            return;
        }

        if addr == map::KPROM_BASE || addr == map::KPROM_BASE + 0x200 {
            if addr == map::KPROM_BASE {
                self.kprom = [0xFFFF_FFFF; 8];
                self.key_present = false;
                self.key_locked = false;
                self.key_match = false;
                self.forbid = false;
                self.kpcnt = 0;
                self.kecnt = 0;
                self.cfg_locked = false;
                self.sp_locked = false;
            }
            return;
        }

        if (addr as usize) < self.aprom.len() {
            // An active XOM page only goes away through the authorized
            // erase of its base page.
            for slot in 0..self.xom.len() {
                let region = self.xom[slot];
                if !region.active {
                    continue;
                }
                if addr == region.base && self.dat == map::ERASE_KEY {
                    self.erase_range(region.base, u32::from(region.pages) * map::PAGE_SIZE);
                    self.xom[slot] = XomRegion::default();
                    debug!("XOM region {} erased", slot);
                    return;
                }
                if addr >= region.base
                    && addr < region.base + u32::from(region.pages) * map::PAGE_SIZE
                {
                    self.fault = true;
                    return;
                }
            }
            self.erase_range(addr, map::PAGE_SIZE);
            return;
        }

        if addr >= map::LDROM_BASE && ((addr - map::LDROM_BASE) as usize) < self.ldrom.len() {
            let start = (addr - map::LDROM_BASE) as usize;
            let end = (start + map::PAGE_SIZE as usize).min(self.ldrom.len());
            for b in &mut self.ldrom[start..end] {
                *b = 0xFF;
            }
            return;
        }

        self.fault = true;
    }

    fn erase_bank(&mut self, addr: u32) {
        let half = self.aprom.len() as u32 / 2;
        if addr < half {
            self.erase_range(0, half);
        } else if (addr as usize) < self.aprom.len() {
            self.erase_range(half, half);
        } else {
            self.fault = true;
        }
    }

    fn flash_slice(&self, addr: u32, count: u32) -> Option<&[u8]> {
        let (start, mem): (usize, &[u8]) = if (addr as usize) < self.aprom.len() {
            (addr as usize, &self.aprom)
        } else if addr >= map::LDROM_BASE
            && ((addr - map::LDROM_BASE) as usize) < self.ldrom.len()
        {
            ((addr - map::LDROM_BASE) as usize, &self.ldrom)
        } else if addr >= map::SPROM_BASE
            && ((addr - map::SPROM_BASE) as usize) < self.sprom.len()
        {
            ((addr - map::SPROM_BASE) as usize, &self.sprom)
        } else {
            return None;
        };
        mem.get(start..start + count as usize)
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    fn latch_key(&mut self) {
        self.key = [self.kprom[0], self.kprom[1], self.kprom[2]];
        self.kpmax = self.kprom[3];
        self.kemax = self.kprom[4];
        let lock_ctrl = self.kprom[5];
        // A clear lock-control bit engages the protection.
        self.cfg_locked = lock_ctrl & 0x1 == 0;
        self.sp_locked = lock_ctrl & 0x2 == 0;
        self.key_present = true;
        self.key_locked = true;
        self.key_match = false;
        self.forbid = false;
        self.kpcnt = 0;
        self.kecnt = 0;
        debug!("security key latched, kpmax={}, kemax={}", self.kpmax, self.kemax);
    }

    fn run_key_compare(&mut self, trg: u32) {
        if self.forbid || !self.key_locked {
            self.key_match = false;
            return;
        }
        if self.kpkey == self.key {
            self.key_match = true;
            self.key_locked = false;
        } else {
            self.key_match = false;
            if trg & KpKeyTrg::TCEN.bits() != 0 {
                self.kpcnt += 1;
                self.kecnt += 1;
                if self.kpcnt >= self.kpmax || self.kecnt >= self.kemax {
                    self.forbid = true;
                }
            }
        }
    }

    fn commit_pair(&mut self, lo: usize) {
        let addr = match self.burst.as_mut() {
            Some(burst) => {
                let addr = burst.addr + burst.fed as u32;
                burst.fed += 8;
                burst.pairs += 1;
                addr
            }
            None => return,
        };
        let (w0, w1) = (self.mpdat[lo], self.mpdat[lo + 1]);
        self.program_word(addr, w0);
        self.program_word(addr + 4, w1);
        self.mp_dirty[lo] = false;
        self.mp_dirty[lo + 1] = false;
        if self.burst.map(|b| b.fed >= map::MULTI_WORD_PROG_LEN) == Some(true) {
            self.burst = None;
        }
    }

    fn mpsts(&self) -> u32 {
        let mut sts = 0;
        let pairs = self.burst.map(|b| b.pairs).unwrap_or(0);
        if let Some(limit) = self.mp_hang_after_pairs {
            if pairs >= limit {
                sts |= (MpSts::D0 | MpSts::D1 | MpSts::D2 | MpSts::D3).bits();
            }
        }
        let busy = match self.burst {
            Some(burst) => match self.mp_drop_busy_after_pairs {
                Some(limit) if burst.pairs >= limit => false,
                _ => true,
            },
            None => false,
        };
        if busy {
            sts |= MpSts::MPBUSY.bits();
        }
        sts
    }

    fn execute(&mut self) {
        if self.hang {
            return;
        }
        if self.ctl & IspCtl::ISPEN.bits() == 0 {
            // ISP disabled: the command is refused.
            self.fault = true;
            return;
        }
        if self.force_fault {
            self.force_fault = false;
            self.fault = true;
            return;
        }

        match self.cmd {
            cmd::READ => self.dat = self.read_word(self.addr),
            cmd::READ_64 => {
                self.mpdat[0] = self.read_word(self.addr);
                self.mpdat[1] = self.read_word(self.addr + 4);
            }
            cmd::PROGRAM => self.program_word(self.addr, self.dat),
            cmd::PROGRAM_64 => {
                self.program_word(self.addr, self.mpdat[0]);
                self.program_word(self.addr + 4, self.mpdat[1]);
            }
            cmd::PAGE_ERASE => self.erase_page(self.addr),
            cmd::BLOCK_ERASE => {
                for page in 0..map::BLOCK_PAGES {
                    self.erase_page(self.addr + page * map::PAGE_SIZE);
                }
            }
            cmd::BANK_ERASE => self.erase_bank(self.addr),
            cmd::PROGRAM_MUL => {
                self.burst = Some(Burst {
                    addr: self.addr,
                    fed: 0,
                    pairs: 0,
                });
                if self.mp_dirty[0] && self.mp_dirty[1] {
                    self.commit_pair(0);
                }
                if self.mp_dirty[2] && self.mp_dirty[3] {
                    self.commit_pair(2);
                }
            }
            cmd::RUN_CKS => match self.flash_slice(self.addr, self.dat) {
                Some(slice) => self.checksum = Self::crc32(slice),
                None => self.fault = true,
            },
            cmd::READ_CKS => self.dat = self.checksum,
            cmd::RUN_ALL_ONE => match self.flash_slice(self.addr, self.dat) {
                Some(slice) => {
                    self.allone = if slice.iter().all(|&b| b == 0xFF) {
                        map::ALLONE_YES
                    } else {
                        map::ALLONE_NOT
                    };
                }
                None => self.fault = true,
            },
            cmd::READ_ALL_ONE => self.dat = self.allone,
            _ => self.fault = true,
        }
    }

    fn kpkeysts(&self) -> u32 {
        let mut sts = KEY_STATUS_UNLOCKED;
        if self.hang {
            sts |= KpKeySts::KEYBUSY.bits();
        }
        if self.key_locked {
            sts |= KpKeySts::KEYLOCK.bits();
        }
        if self.key_match {
            sts |= KpKeySts::KEYMATCH.bits();
        }
        if self.forbid {
            sts |= KpKeySts::FORBID.bits();
        }
        if self.key_present {
            sts |= KpKeySts::KEYFLAG.bits();
        }
        if self.cfg_locked {
            sts |= KpKeySts::CFGFLAG.bits();
        }
        if self.sp_locked {
            sts |= KpKeySts::SPFLAG.bits();
        }
        sts
    }
}

impl IspRegisterFile for DummyIsp {
    fn read(&mut self, reg: IspReg) -> u32 {
        match reg {
            IspReg::Cmd => self.cmd,
            IspReg::Addr => self.addr,
            IspReg::Dat => self.dat,
            IspReg::Trg => u32::from(self.hang),
            IspReg::Ctl => {
                let mut ctl = self.ctl;
                if self.fault {
                    ctl |= IspCtl::ISPFF.bits();
                }
                ctl
            }
            IspReg::Sts => {
                let mut sts = 0;
                if self.hang {
                    sts |= IspSts::ISPBUSY.bits();
                }
                if self.fault {
                    sts |= IspSts::ISPFF.bits();
                }
                sts
            }
            IspReg::MpDat0 => self.mpdat[0],
            IspReg::MpDat1 => self.mpdat[1],
            IspReg::MpDat2 => self.mpdat[2],
            IspReg::MpDat3 => self.mpdat[3],
            IspReg::MpSts => self.mpsts(),
            IspReg::Dfba => self.config.data_flash_base,
            IspReg::XomSts => {
                let mut bits = 0;
                for (i, region) in self.xom.iter().enumerate() {
                    if region.active {
                        bits |= 1 << i;
                    }
                }
                bits
            }
            IspReg::Xom0Sts | IspReg::Xom1Sts | IspReg::Xom2Sts | IspReg::Xom3Sts => {
                let slot = match reg {
                    IspReg::Xom0Sts => 0,
                    IspReg::Xom1Sts => 1,
                    IspReg::Xom2Sts => 2,
                    _ => 3,
                };
                let region = &self.xom[slot];
                (region.base << 8) | u32::from(region.pages)
            }
            IspReg::KpKey0 => self.kpkey[0],
            IspReg::KpKey1 => self.kpkey[1],
            IspReg::KpKey2 => self.kpkey[2],
            IspReg::KpKeyTrg => 0,
            IspReg::KpKeySts => self.kpkeysts(),
            IspReg::KpCnt => (self.kpcnt & 0xF) | ((self.kpmax & 0xF) << 8),
            IspReg::KpKeyCnt => (self.kecnt & 0x3F) | ((self.kemax & 0x3F) << 8),
        }
    }

    fn write(&mut self, reg: IspReg, value: u32) {
        match reg {
            IspReg::Cmd => self.cmd = value,
            IspReg::Addr => {
                self.addr = value;
                // A new target address abandons any drained burst.
                self.burst = None;
            }
            IspReg::Dat => self.dat = value,
            IspReg::Trg => {
                if value & 0x1 != 0 {
                    self.execute();
                }
            }
            IspReg::Ctl => {
                if value & IspCtl::ISPFF.bits() != 0 {
                    self.fault = false;
                }
                self.ctl = value & CTL_WRITABLE;
            }
            IspReg::Sts => {
                if value & IspSts::ISPFF.bits() != 0 {
                    self.fault = false;
                }
                if value & IspSts::ALLONE.bits() != 0 {
                    self.allone = 0;
                }
            }
            IspReg::MpDat0 => {
                self.mpdat[0] = value;
                self.mp_dirty[0] = true;
            }
            IspReg::MpDat1 => {
                self.mpdat[1] = value;
                self.mp_dirty[1] = true;
                if self.burst.is_some() && self.mp_dirty[0] {
                    self.commit_pair(0);
                }
            }
            IspReg::MpDat2 => {
                self.mpdat[2] = value;
                self.mp_dirty[2] = true;
            }
            IspReg::MpDat3 => {
                self.mpdat[3] = value;
                self.mp_dirty[3] = true;
                if self.burst.is_some() && self.mp_dirty[2] {
                    self.commit_pair(2);
                }
            }
            IspReg::KpKey0 => self.kpkey[0] = value,
            IspReg::KpKey1 => self.kpkey[1] = value,
            IspReg::KpKey2 => self.kpkey[2] = value,
            IspReg::KpKeyTrg => {
                if value & KpKeyTrg::KPKEYGO.bits() != 0 {
                    self.run_key_compare(value);
                }
            }
            // Status registers are read-only.
            IspReg::MpSts
            | IspReg::Dfba
            | IspReg::XomSts
            | IspReg::Xom0Sts
            | IspReg::Xom1Sts
            | IspReg::Xom2Sts
            | IspReg::Xom3Sts
            | IspReg::KpKeySts
            | IspReg::KpCnt
            | IspReg::KpKeyCnt => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nustorage_core::isp::{AllOnes, BootSelect, BootSource, FlashController};
    use nustorage_core::Error;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn controller(isp: &mut DummyIsp) -> FlashController<&mut DummyIsp> {
        let mut fmc = FlashController::new(isp);
        fmc.open();
        fmc
    }

    #[test]
    fn test_erase_write_read_roundtrip() {
        init_logs();
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        fmc.erase(0x1000).unwrap();
        assert_eq!(fmc.read(0x1000).unwrap(), 0xFFFF_FFFF);

        fmc.write(0x1000, 0x1234_5678).unwrap();
        assert_eq!(fmc.read(0x1000).unwrap(), 0x1234_5678);
        assert_eq!(fmc.last_error(), None);
    }

    #[test]
    fn test_write_64_roundtrip() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        fmc.write_64(0x2000, 0xDEAD_BEEF, 0xCAFE_F00D).unwrap();
        assert_eq!(fmc.read_64(0x2000).unwrap(), (0xDEAD_BEEF, 0xCAFE_F00D));
    }

    #[test]
    fn test_command_without_open_faults() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = FlashController::new(&mut isp);
        assert_eq!(fmc.write(0x1000, 0), Err(Error::ProgramFault));
    }

    #[test]
    fn test_read_timeout_when_engine_wedged() {
        let mut isp = DummyIsp::new_default();
        isp.set_hang(true);
        let mut fmc = FlashController::new(&mut isp);
        fmc.open();
        assert_eq!(fmc.read(0), Err(Error::Timeout));
        assert_eq!(fmc.last_error(), Some(Error::Timeout));
    }

    #[test]
    fn test_injected_fault_reports_program_fault() {
        let mut isp = DummyIsp::new_default();
        isp.inject_fault();
        let mut fmc = FlashController::new(&mut isp);
        fmc.open();
        assert_eq!(fmc.erase(0x1000), Err(Error::ProgramFault));
        // The fail flag was cleared; the next erase goes through.
        assert_eq!(fmc.erase(0x1000), Ok(()));
    }

    #[test]
    fn test_sprom_erase_routing() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);
        assert_eq!(fmc.erase(nustorage_core::isp::map::SPROM_BASE), Ok(()));
    }

    #[test]
    fn test_write_multiple_full_bursts() {
        init_logs();
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(fmc.write_multiple(0x4000, &data), Ok(1024));

        drop(fmc);
        assert_eq!(&isp.aprom()[0x4000..0x4400], &data[..]);
    }

    #[test]
    fn test_write_multiple_short_tail_underreports_but_programs() {
        // The acknowledge accounting trails the data fed into the
        // engine, so a drained tail burst reports fewer bytes than it
        // programmed. Kept as-is; see the driver notes on the early
        // busy-drop ambiguity.
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let data = [0xA5u8; 16];
        assert_eq!(fmc.write_multiple(0x4000, &data), Ok(8));

        drop(fmc);
        assert_eq!(&isp.aprom()[0x4000..0x4010], &data[..]);
    }

    #[test]
    fn test_write_multiple_count_is_bounded_and_aligned() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let data = [0x5Au8; 40];
        let programmed = fmc.write_multiple(0, &data).unwrap();
        assert!(programmed <= 40);
        assert_eq!(programmed % 8, 0);
    }

    #[test]
    fn test_write_multiple_burst_timeout_keeps_progress() {
        let mut isp = DummyIsp::new_default();
        isp.hang_burst_after(4);
        let mut fmc = FlashController::new(&mut isp);
        fmc.open();

        let data = [0xC3u8; 1024];
        match fmc.write_multiple(0, &data) {
            Err(Error::BurstTimeout { programmed }) => {
                assert!(programmed % 8 == 0);
                assert!(programmed < 1024);
            }
            other => panic!("expected burst timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_write_multiple_early_busy_drop_returns_progress() {
        init_logs();
        let mut isp = DummyIsp::new_default();
        isp.drop_burst_busy_after(3);
        let mut fmc = FlashController::new(&mut isp);
        fmc.open();

        let data = [0x3Cu8; 1024];
        let programmed = fmc.write_multiple(0, &data).unwrap();
        assert!(programmed > 0);
        assert!(programmed < 1024);
        assert_eq!(programmed % 8, 0);
    }

    #[test]
    fn test_xom_lifecycle() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        assert_eq!(fmc.xom_state(1), Ok(false));
        fmc.config_xom(1, 0x4000, 2).unwrap();
        assert_eq!(fmc.xom_state(1), Ok(true));

        // Configuring an active region is refused.
        assert_eq!(fmc.config_xom(1, 0x8000, 1), Err(Error::XomActive));

        fmc.erase_xom(1).unwrap();
        assert_eq!(fmc.xom_state(1), Ok(false));
        assert_eq!(fmc.erase_xom(1), Err(Error::XomInactive));
    }

    #[test]
    fn test_xom_protects_its_pages() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        fmc.write(0x4000, 0x1122_3344).unwrap();
        fmc.config_xom(0, 0x4000, 1).unwrap();

        // Programs inside the region fault; reads come back all-ones
        // (the read path does not consult the fail flag).
        assert_eq!(fmc.write(0x4000, 0), Err(Error::ProgramFault));
        assert_eq!(fmc.read(0x4000), Ok(0xFFFF_FFFF));
    }

    #[test]
    fn test_otp_lifecycle() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        fmc.write_otp(7, 0x0102_0304, 0x0506_0708).unwrap();
        assert_eq!(fmc.read_otp(7), Ok((0x0102_0304, 0x0506_0708)));
        assert_eq!(fmc.otp_is_locked(7), Ok(false));

        fmc.lock_otp(7).unwrap();
        assert_eq!(fmc.otp_is_locked(7), Ok(true));
        assert_eq!(fmc.write_otp(7, 0, 0), Err(Error::ProgramFault));
    }

    #[test]
    fn test_config_words_roundtrip() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        fmc.write_config(&[0xFFFF_FFFE, 0x0001_F000]).unwrap();

        let mut readback = [0u32; 2];
        fmc.read_config(&mut readback).unwrap();
        assert_eq!(readback, [0xFFFF_FFFE, 0x0001_F000]);
    }

    #[test]
    fn test_checksum_of_erased_region() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);
        // CRC32 over 512 bytes of 0xFF.
        assert_eq!(fmc.checksum(0, 512), Ok(0xBD7B_C39F));
    }

    #[test]
    fn test_check_all_ones() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        assert_eq!(fmc.check_all_ones(0x1000, 512), Ok(AllOnes::Yes));
        fmc.write(0x1000, 0).unwrap();
        assert_eq!(fmc.check_all_ones(0x1000, 512), Ok(AllOnes::No));
    }

    #[test]
    fn test_key_compare_consumes_retry_budget() {
        init_logs();
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let key = [0x1111_1111, 0x2222_2222, 0x3333_3333];
        fmc.set_key(key, 3, 3, false, false).unwrap();

        let wrong = [0, 0, 0];
        assert_eq!(fmc.compare_key(wrong), Err(Error::KeyMismatch));
        assert_eq!(fmc.compare_key(wrong), Err(Error::KeyMismatch));
        assert_eq!(fmc.compare_key(wrong), Err(Error::KeyMismatch));
        // Budget exhausted: even the correct key is refused now.
        assert_eq!(fmc.compare_key(key), Err(Error::Forbidden));
    }

    #[test]
    fn test_key_compare_match_unlocks() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let key = [0xAAAA_AAAA, 0xBBBB_BBBB, 0xCCCC_CCCC];
        fmc.set_key(key, 5, 5, true, false).unwrap();
        assert_eq!(fmc.compare_key(key), Ok(()));
    }

    #[test]
    fn test_set_key_twice_is_refused() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        let key = [1, 2, 3];
        fmc.set_key(key, 3, 3, false, false).unwrap();
        assert_eq!(fmc.set_key(key, 3, 3, false, false), Err(Error::KeyLocked));
    }

    #[test]
    fn test_compare_without_key_reports_not_locked() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);
        assert_eq!(fmc.compare_key([0, 0, 0]), Err(Error::KeyNotLocked));
    }

    #[test]
    fn test_boot_source_selection() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);

        assert_eq!(fmc.boot_source(), BootSource::Aprom);
        fmc.select_boot(BootSelect::Ldrom);
        assert_eq!(fmc.boot_source(), BootSource::Ldrom);
        fmc.select_boot(BootSelect::Aprom);
        assert_eq!(fmc.boot_source(), BootSource::Aprom);
    }

    #[test]
    fn test_data_flash_base() {
        let mut isp = DummyIsp::new_default();
        let mut fmc = controller(&mut isp);
        assert_eq!(fmc.data_flash_base(), 0x0007_E000);
    }
}
