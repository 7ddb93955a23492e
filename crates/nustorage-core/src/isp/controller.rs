//! Flash controller operations
//!
//! Every operation follows the same shape: load the command, address and
//! data registers, set the trigger bit, then poll a busy indication for
//! a fixed iteration budget. Exhausting the budget is a definite
//! [`Error::Timeout`]; a set fail flag is cleared (write 1) and reported
//! as [`Error::ProgramFault`]. Nothing is retried here - retry policy
//! belongs to the caller.

use log::{debug, warn};

use crate::error::{Error, Result};

use super::map;
use super::regs::{
    cmd, IspCtl, IspReg, IspRegisterFile, IspSts, KpKeySts, KpKeyTrg, MpSts, ISPTRG_GO,
    KEY_STATUS_UNLOCKED, KPCNT_KPMAX_MASK, KPCNT_KPMAX_SHIFT, KPKEYCNT_KPKEMAX_MASK,
    KPKEYCNT_KPKEMAX_SHIFT,
};

/// Currently active boot source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSource {
    /// Booted from the application flash
    Aprom,
    /// Booted from the loader flash
    Ldrom,
    /// Booted from the on-chip boot loader
    BootLoader,
}

/// Boot source selectable for the next reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSelect {
    /// Boot from the application flash
    Aprom,
    /// Boot from the loader flash
    Ldrom,
}

/// Verdict of the erased-state (all-ones) query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllOnes {
    /// Every scanned word reads all ones
    Yes,
    /// At least one scanned bit is programmed
    No,
}

/// Driver for the ISP flash engine
///
/// Holds the injected register file and the latched outcome of the most
/// recent operation. The latch is cleared on entry to every operation
/// and set on failure; it lives on the controller instance, never in
/// process-wide state. A single logical caller is assumed; the latch is
/// not synchronized.
pub struct FlashController<R> {
    regs: R,
    last_error: Option<Error>,
}

impl<R: IspRegisterFile> FlashController<R> {
    /// Create a controller over the given register file
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            last_error: None,
        }
    }

    /// Consume the controller and return the register file
    pub fn into_inner(self) -> R {
        self.regs
    }

    /// Outcome latched by the most recent operation (`None` on success)
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Enable the ISP function
    pub fn open(&mut self) {
        let ctl = self.regs.read(IspReg::Ctl);
        self.regs.write(IspReg::Ctl, ctl | IspCtl::ISPEN.bits());
    }

    /// Disable the ISP function
    pub fn close(&mut self) {
        let ctl = self.regs.read(IspReg::Ctl);
        self.regs.write(IspReg::Ctl, ctl & !IspCtl::ISPEN.bits());
    }

    /// Report which memory the part booted from
    pub fn boot_source(&mut self) -> BootSource {
        let ctl = self.regs.read(IspReg::Ctl);
        if ctl & IspCtl::BL.bits() != 0 {
            BootSource::BootLoader
        } else if ctl & IspCtl::BS.bits() != 0 {
            BootSource::Ldrom
        } else {
            BootSource::Aprom
        }
    }

    /// Select the boot source taken after the next system reset
    pub fn select_boot(&mut self, source: BootSelect) {
        let ctl = self.regs.read(IspReg::Ctl);
        match source {
            BootSelect::Ldrom => self.regs.write(IspReg::Ctl, ctl | IspCtl::BS.bits()),
            BootSelect::Aprom => self.regs.write(IspReg::Ctl, ctl & !IspCtl::BS.bits()),
        }
    }

    /// Base address of the data flash region, if one is configured
    pub fn data_flash_base(&mut self) -> u32 {
        self.regs.read(IspReg::Dfba)
    }

    fn begin(&mut self) {
        self.last_error = None;
    }

    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(err);
        err
    }

    /// Poll `reg` until `mask` reads clear, for at most `budget`
    /// iterations. Returns false when the budget ran out.
    fn poll_clear(&mut self, reg: IspReg, mask: u32, budget: u32) -> bool {
        for _ in 0..budget {
            if self.regs.read(reg) & mask == 0 {
                return true;
            }
        }
        false
    }

    /// Set the trigger bit and wait for it to drop again
    fn trigger_and_wait(&mut self, budget: u32) -> Result<()> {
        self.regs.write(IspReg::Trg, ISPTRG_GO);
        if self.poll_clear(IspReg::Trg, ISPTRG_GO, budget) {
            Ok(())
        } else {
            Err(self.fail(Error::Timeout))
        }
    }

    /// Set the trigger bit and wait for the status busy bit to drop
    fn trigger_and_wait_busy(&mut self, budget: u32) -> Result<()> {
        self.regs.write(IspReg::Trg, ISPTRG_GO);
        if self.poll_clear(IspReg::Sts, IspSts::ISPBUSY.bits(), budget) {
            Ok(())
        } else {
            Err(self.fail(Error::Timeout))
        }
    }

    /// Check the fail flag in `reg`; clear it (write 1) and report a
    /// fault when set
    fn check_fault(&mut self, reg: IspReg, mask: u32) -> Result<()> {
        let sts = self.regs.read(reg);
        if sts & mask != 0 {
            self.regs.write(reg, sts | mask);
            return Err(self.fail(Error::ProgramFault));
        }
        Ok(())
    }

    /// Program one word; trigger-polled with the fail flag checked in
    /// the status register
    fn program_word(&mut self, addr: u32, data: u32) -> Result<()> {
        self.regs.write(IspReg::Cmd, cmd::PROGRAM);
        self.regs.write(IspReg::Addr, addr);
        self.regs.write(IspReg::Dat, data);
        self.trigger_and_wait(map::TIMEOUT_WRITE)?;
        self.check_fault(IspReg::Sts, IspSts::ISPFF.bits())
    }

    /// Erase the flash page at `page_addr` (page-aligned).
    ///
    /// The reserved SPROM base routes to the dedicated SPROM erase.
    pub fn erase(&mut self, page_addr: u32) -> Result<()> {
        self.begin();

        if page_addr == map::SPROM_BASE {
            return self.erase_sprom();
        }

        self.regs.write(IspReg::Cmd, cmd::PAGE_ERASE);
        self.regs.write(IspReg::Addr, page_addr);
        self.trigger_and_wait(map::TIMEOUT_ERASE)?;
        self.check_fault(IspReg::Ctl, IspCtl::ISPFF.bits())
    }

    /// Erase the SPROM page; requires the erase authorization key in the
    /// data register
    pub fn erase_sprom(&mut self) -> Result<()> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::PAGE_ERASE);
        self.regs.write(IspReg::Addr, map::SPROM_BASE);
        self.regs.write(IspReg::Dat, map::ERASE_KEY);
        self.trigger_and_wait(map::TIMEOUT_ERASE)?;
        self.check_fault(IspReg::Ctl, IspCtl::ISPFF.bits())
    }

    /// Erase a four-page block at `block_addr` (block-aligned)
    pub fn erase_block(&mut self, block_addr: u32) -> Result<()> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::BLOCK_ERASE);
        self.regs.write(IspReg::Addr, block_addr);
        self.trigger_and_wait(map::TIMEOUT_ERASE)?;
        self.check_fault(IspReg::Ctl, IspCtl::ISPFF.bits())
    }

    /// Erase a whole flash bank at `bank_addr`
    pub fn erase_bank(&mut self, bank_addr: u32) -> Result<()> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::BANK_ERASE);
        self.regs.write(IspReg::Addr, bank_addr);
        self.trigger_and_wait(map::TIMEOUT_BANK_ERASE)?;
        self.check_fault(IspReg::Ctl, IspCtl::ISPFF.bits())
    }

    /// Read one word from a word-aligned address
    pub fn read(&mut self, addr: u32) -> Result<u32> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::READ);
        self.regs.write(IspReg::Addr, addr);
        self.trigger_and_wait(map::TIMEOUT_READ)?;
        Ok(self.regs.read(IspReg::Dat))
    }

    /// Read a double word from a double-word-aligned address
    pub fn read_64(&mut self, addr: u32) -> Result<(u32, u32)> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::READ_64);
        self.regs.write(IspReg::Addr, addr);
        self.regs.write(IspReg::Dat, 0);
        self.trigger_and_wait_busy(map::TIMEOUT_READ)?;
        self.check_fault(IspReg::Sts, IspSts::ISPFF.bits())?;
        Ok((self.regs.read(IspReg::MpDat0), self.regs.read(IspReg::MpDat1)))
    }

    /// Program one word at a word-aligned address
    pub fn write(&mut self, addr: u32, data: u32) -> Result<()> {
        self.begin();
        self.program_word(addr, data)
    }

    /// Program a double word at a double-word-aligned address
    pub fn write_64(&mut self, addr: u32, data0: u32, data1: u32) -> Result<()> {
        self.begin();
        self.regs.write(IspReg::Cmd, cmd::PROGRAM_64);
        self.regs.write(IspReg::Addr, addr);
        self.regs.write(IspReg::MpDat0, data0);
        self.regs.write(IspReg::MpDat1, data1);
        self.trigger_and_wait_busy(map::TIMEOUT_WRITE)?;
        self.check_fault(IspReg::Sts, IspSts::ISPFF.bits())
    }

    /// Stream a data chunk into APROM through the multi-word program
    /// engine.
    ///
    /// `addr` must be 8-byte aligned and inside APROM; the length is
    /// rounded down to a multiple of 8. Returns the number of bytes
    /// acknowledged by the engine, which is always a multiple of 8 and
    /// never exceeds the rounded request.
    ///
    /// The engine double-buffers two word pairs per burst. If its busy
    /// flag drops while pairs are still being supplied, the burst is
    /// treated as completed early and the bytes acknowledged so far are
    /// returned; whether that early completion can mask a genuine
    /// failure is an open hardware question, so the branch logs a
    /// warning. A stalled acknowledge poll aborts with
    /// [`Error::BurstTimeout`], which carries the progress count.
    pub fn write_multiple(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        self.begin();

        if addr >= map::APROM_END || addr % 8 != 0 {
            return Err(self.fail(Error::InvalidAddress));
        }

        let len = data.len() - data.len() % 8;
        let total_words = len / 4;
        let word_at = |i: usize| {
            let o = i * 4;
            u32::from_le_bytes([data[o], data[o + 1], data[o + 2], data[o + 3]])
        };

        debug!("multi-word program: {:#010x}, {} bytes", addr, len);

        let mut burst_addr = addr;
        let mut next = 0usize;
        let mut programmed = 0usize;

        while next < total_words {
            self.regs.write(IspReg::Addr, burst_addr);
            self.regs.write(IspReg::MpDat0, word_at(next));
            self.regs.write(IspReg::MpDat1, word_at(next + 1));
            next += 2;
            let mut fed = 8usize;
            if next < total_words {
                self.regs.write(IspReg::MpDat2, word_at(next));
                self.regs.write(IspReg::MpDat3, word_at(next + 1));
                next += 2;
                fed = 16;
            }
            self.regs.write(IspReg::Cmd, cmd::PROGRAM_MUL);
            self.regs.write(IspReg::Trg, ISPTRG_GO);

            loop {
                if !self.poll_clear(
                    IspReg::MpSts,
                    (MpSts::D0 | MpSts::D1).bits(),
                    map::TIMEOUT_WRITE,
                ) {
                    return Err(self.fail(Error::BurstTimeout {
                        programmed: programmed as u32,
                    }));
                }
                programmed += 8;
                if next >= total_words || fed == map::MULTI_WORD_PROG_LEN {
                    break;
                }
                if self.regs.read(IspReg::MpSts) & MpSts::MPBUSY.bits() == 0 {
                    warn!(
                        "multi-word program: busy dropped after D0/D1 ack at {:#010x}",
                        burst_addr
                    );
                    return Ok(programmed);
                }
                self.regs.write(IspReg::MpDat0, word_at(next));
                self.regs.write(IspReg::MpDat1, word_at(next + 1));
                next += 2;
                fed += 8;

                if !self.poll_clear(
                    IspReg::MpSts,
                    (MpSts::D2 | MpSts::D3).bits(),
                    map::TIMEOUT_WRITE,
                ) {
                    return Err(self.fail(Error::BurstTimeout {
                        programmed: programmed as u32,
                    }));
                }
                programmed += 8;
                if next >= total_words || fed == map::MULTI_WORD_PROG_LEN {
                    break;
                }
                if self.regs.read(IspReg::MpSts) & MpSts::MPBUSY.bits() == 0 {
                    warn!(
                        "multi-word program: busy dropped after D2/D3 ack at {:#010x}",
                        burst_addr
                    );
                    return Ok(programmed);
                }
                self.regs.write(IspReg::MpDat2, word_at(next));
                self.regs.write(IspReg::MpDat3, word_at(next + 1));
                next += 2;
                fed += 8;
            }

            if next >= total_words && fed != map::MULTI_WORD_PROG_LEN {
                // Input ran out mid-burst; the engine drains on its own.
                return Ok(programmed);
            }

            if !self.poll_clear(IspReg::MpSts, MpSts::MPBUSY.bits(), map::TIMEOUT_WRITE) {
                return Err(self.fail(Error::BurstTimeout {
                    programmed: programmed as u32,
                }));
            }
            // Engine idle: everything fed so far is committed.
            programmed = next * 4;
            burst_addr += map::MULTI_WORD_PROG_LEN as u32;
        }

        Ok(programmed)
    }

    fn xom_descriptor_base(region: u32) -> u32 {
        map::XOM_BASE + region * 0x10
    }

    /// Whether XOM region `region` is active; the state is read fresh
    /// from the summary status register, never cached.
    ///
    /// Out-of-range regions are rejected before any register access.
    pub fn xom_state(&mut self, region: u32) -> Result<bool> {
        self.begin();
        if region >= map::XOM_REGIONS {
            return Err(self.fail(Error::InvalidXomRegion));
        }
        let active = self.regs.read(IspReg::XomSts) & 0xF;
        Ok(active & (1 << region) != 0)
    }

    /// Program the descriptor (base address and page count) of an
    /// inactive XOM region. Activation is reported by the hardware
    /// status register once the descriptor takes effect.
    pub fn config_xom(&mut self, region: u32, base: u32, pages: u8) -> Result<()> {
        self.begin();
        if region >= map::XOM_REGIONS {
            return Err(self.fail(Error::InvalidXomRegion));
        }
        if self.regs.read(IspReg::XomSts) & (1 << region) != 0 {
            return Err(self.fail(Error::XomActive));
        }

        let desc = Self::xom_descriptor_base(region);
        self.program_word(desc, base)?;
        self.program_word(desc + 0x4, u32::from(pages))?;
        self.program_word(desc + 0x8, 0)
    }

    /// Erase an active XOM region; its page address is taken from the
    /// region's descriptor status register
    pub fn erase_xom(&mut self, region: u32) -> Result<()> {
        self.begin();
        let sts_reg = match IspReg::xom_status(region) {
            Some(reg) => reg,
            None => return Err(self.fail(Error::InvalidXomRegion)),
        };
        if self.regs.read(IspReg::XomSts) & (1 << region) == 0 {
            return Err(self.fail(Error::XomInactive));
        }

        let page_addr = (self.regs.read(sts_reg) & 0xFFFF_FF00) >> 8;
        self.regs.write(IspReg::Cmd, cmd::PAGE_ERASE);
        self.regs.write(IspReg::Addr, page_addr);
        self.regs.write(IspReg::Dat, map::ERASE_KEY);
        self.trigger_and_wait(map::TIMEOUT_ERASE)?;
        self.check_fault(IspReg::Ctl, IspCtl::ISPFF.bits())
    }

    fn enable_config_update(&mut self) {
        let ctl = self.regs.read(IspReg::Ctl);
        self.regs.write(IspReg::Ctl, ctl | IspCtl::CFGUEN.bits());
    }

    fn disable_config_update(&mut self) {
        let ctl = self.regs.read(IspReg::Ctl);
        self.regs.write(IspReg::Ctl, ctl & !IspCtl::CFGUEN.bits());
    }

    /// Read the user configuration words into `config`
    pub fn read_config(&mut self, config: &mut [u32]) -> Result<()> {
        for (i, word) in config.iter_mut().enumerate() {
            *word = self.read(map::CONFIG_BASE + 4 * i as u32)?;
        }
        Ok(())
    }

    /// Erase then reprogram the user configuration words.
    ///
    /// The whole region is erased first, the erased state is verified,
    /// then every word is programmed and read back. Any failing step
    /// aborts the sequence; configuration update mode is disabled again
    /// on every exit path.
    pub fn write_config(&mut self, config: &[u32]) -> Result<()> {
        self.enable_config_update();

        if let Err(e) = self.erase(map::CONFIG_BASE) {
            self.disable_config_update();
            return Err(e);
        }

        let erased = self
            .read(map::CONFIG_BASE)
            .and_then(|w0| self.read(map::CONFIG_BASE + 4).map(|w1| (w0, w1)))
            .and_then(|(w0, w1)| self.read(map::CONFIG_BASE + 8).map(|w2| (w0, w1, w2)));
        match erased {
            Ok((0xFFFF_FFFF, 0xFFFF_FFFF, map::CONFIG_RESERVED_ERASED)) => {}
            Ok(_) => {
                self.disable_config_update();
                return Err(self.fail(Error::VerifyFailed));
            }
            Err(e) => {
                self.disable_config_update();
                return Err(e);
            }
        }

        for (i, &word) in config.iter().enumerate() {
            let addr = map::CONFIG_BASE + 4 * i as u32;
            if let Err(e) = self.write(addr, word) {
                self.disable_config_update();
                return Err(e);
            }
            match self.read(addr) {
                Ok(readback) if readback == word => {}
                Ok(_) => {
                    self.disable_config_update();
                    return Err(self.fail(Error::VerifyFailed));
                }
                Err(e) => {
                    self.disable_config_update();
                    return Err(e);
                }
            }
        }

        self.disable_config_update();
        Ok(())
    }

    /// Run the checksum calculation over `count` bytes starting at
    /// `addr`; both must be multiples of 512
    pub fn checksum(&mut self, addr: u32, count: u32) -> Result<u32> {
        self.begin();

        if addr % 512 != 0 || count % 512 != 0 {
            return Err(self.fail(Error::InvalidAlignment));
        }

        self.regs.write(IspReg::Cmd, cmd::RUN_CKS);
        self.regs.write(IspReg::Addr, addr);
        self.regs.write(IspReg::Dat, count);
        self.trigger_and_wait_busy(map::TIMEOUT_CHKSUM)?;

        self.regs.write(IspReg::Cmd, cmd::READ_CKS);
        self.regs.write(IspReg::Addr, addr);
        self.trigger_and_wait_busy(map::TIMEOUT_CHKSUM)?;

        Ok(self.regs.read(IspReg::Dat))
    }

    /// Scan `count` bytes starting at `addr` for the fully erased
    /// (all-ones) state
    pub fn check_all_ones(&mut self, addr: u32, count: u32) -> Result<AllOnes> {
        self.begin();

        // Clear the previous verdict latch.
        self.regs.write(IspReg::Sts, IspSts::ALLONE.bits());

        self.regs.write(IspReg::Cmd, cmd::RUN_ALL_ONE);
        self.regs.write(IspReg::Addr, addr);
        self.regs.write(IspReg::Dat, count);
        self.trigger_and_wait_busy(map::TIMEOUT_CHKALLONE)?;

        // The verdict read may return 0 while the scan is settling;
        // reissue until a terminal value appears, on a shared budget.
        let mut budget = map::TIMEOUT_CHKALLONE;
        loop {
            self.regs.write(IspReg::Cmd, cmd::READ_ALL_ONE);
            self.regs.write(IspReg::Addr, addr);
            self.regs.write(IspReg::Trg, ISPTRG_GO);
            loop {
                if budget == 0 {
                    return Err(self.fail(Error::Timeout));
                }
                budget -= 1;
                if self.regs.read(IspReg::Sts) & IspSts::ISPBUSY.bits() == 0 {
                    break;
                }
            }
            match self.regs.read(IspReg::Dat) {
                0 => continue,
                map::ALLONE_YES => return Ok(AllOnes::Yes),
                map::ALLONE_NOT => return Ok(AllOnes::No),
                _ => return Err(self.fail(Error::CommandFailed)),
            }
        }
    }

    fn otp_row_addr(row: u32) -> u32 {
        map::OTP_BASE + row * 8
    }

    fn otp_lock_addr(row: u32) -> u32 {
        map::OTP_BASE + map::OTP_LOCK_OFFSET + row * 4
    }

    /// Program a 64-bit value into OTP row `row`
    pub fn write_otp(&mut self, row: u32, low: u32, high: u32) -> Result<()> {
        self.begin();
        if row >= map::OTP_ROWS {
            return Err(self.fail(Error::InvalidOtpRow));
        }
        self.program_word(Self::otp_row_addr(row), low)?;
        self.program_word(Self::otp_row_addr(row) + 4, high)
    }

    /// Read the 64-bit value of OTP row `row`
    pub fn read_otp(&mut self, row: u32) -> Result<(u32, u32)> {
        self.begin();
        if row >= map::OTP_ROWS {
            return Err(self.fail(Error::InvalidOtpRow));
        }
        self.regs.write(IspReg::Cmd, cmd::READ_64);
        self.regs.write(IspReg::Addr, Self::otp_row_addr(row));
        self.regs.write(IspReg::Dat, 0);
        self.trigger_and_wait_busy(map::TIMEOUT_WRITE)?;
        self.check_fault(IspReg::Sts, IspSts::ISPFF.bits())?;
        Ok((self.regs.read(IspReg::MpDat0), self.regs.read(IspReg::MpDat1)))
    }

    /// Set the write-once lock bit of OTP row `row`
    pub fn lock_otp(&mut self, row: u32) -> Result<()> {
        self.begin();
        if row >= map::OTP_ROWS {
            return Err(self.fail(Error::InvalidOtpRow));
        }
        self.program_word(Self::otp_lock_addr(row), 0)
    }

    /// Whether OTP row `row` is locked
    pub fn otp_is_locked(&mut self, row: u32) -> Result<bool> {
        self.begin();
        if row >= map::OTP_ROWS {
            return Err(self.fail(Error::InvalidOtpRow));
        }
        self.regs.write(IspReg::Cmd, cmd::READ);
        self.regs.write(IspReg::Addr, Self::otp_lock_addr(row));
        self.trigger_and_wait(map::TIMEOUT_READ)?;
        self.check_fault(IspReg::Sts, IspSts::ISPFF.bits())?;
        Ok(self.regs.read(IspReg::Dat) != 0xFFFF_FFFF)
    }

    /// Program the security key, its mismatch limits and the optional
    /// CONFIG/SPROM write locks.
    ///
    /// Fails with [`Error::KeyLocked`] when a key is already locked in.
    /// After programming, the lock bits, both protection flags and both
    /// limits are read back and verified; each mismatch reports its own
    /// error variant.
    pub fn set_key(
        &mut self,
        key: [u32; 3],
        kpmax: u32,
        kemax: u32,
        lock_config: bool,
        lock_sprom: bool,
    ) -> Result<()> {
        self.begin();

        if self.regs.read(IspReg::KpKeySts) != KEY_STATUS_UNLOCKED {
            return Err(self.fail(Error::KeyLocked));
        }

        if self.erase(map::KPROM_BASE).is_err() {
            return Err(self.fail(Error::KeyEraseFailed));
        }
        if self.erase(map::KPROM_BASE + 0x200).is_err() {
            return Err(self.fail(Error::KeyEraseFailed));
        }

        // Lock-control semantics are inverted: a clear bit engages the
        // write protection.
        let mut lock_ctrl = 0u32;
        if !lock_config {
            lock_ctrl |= 0x1;
        }
        if !lock_sprom {
            lock_ctrl |= 0x2;
        }

        self.write(map::KPROM_BASE, key[0])?;
        self.write(map::KPROM_BASE + 0x4, key[1])?;
        self.write(map::KPROM_BASE + 0x8, key[2])?;
        self.write(map::KPROM_BASE + 0xC, kpmax)?;
        self.write(map::KPROM_BASE + 0x10, kemax)?;
        self.write(map::KPROM_BASE + 0x14, lock_ctrl)?;

        if !self.poll_clear(
            IspReg::KpKeySts,
            KpKeySts::KEYBUSY.bits(),
            map::TIMEOUT_WRITE,
        ) {
            return Err(self.fail(Error::Timeout));
        }

        let sts = self.regs.read(IspReg::KpKeySts);
        if sts & KpKeySts::KEYLOCK.bits() == 0 {
            return Err(self.fail(Error::KeyLockFailed));
        }
        let cfg_locked = sts & KpKeySts::CFGFLAG.bits() != 0;
        if cfg_locked != lock_config {
            return Err(self.fail(Error::ConfigLockFailed));
        }
        let sprom_locked = sts & KpKeySts::SPFLAG.bits() != 0;
        if sprom_locked != lock_sprom {
            return Err(self.fail(Error::SpromLockFailed));
        }
        let kpmax_rb = (self.regs.read(IspReg::KpCnt) & KPCNT_KPMAX_MASK) >> KPCNT_KPMAX_SHIFT;
        if kpmax_rb != kpmax {
            return Err(self.fail(Error::PowerOnLimitMismatch));
        }
        let kemax_rb =
            (self.regs.read(IspReg::KpKeyCnt) & KPKEYCNT_KPKEMAX_MASK) >> KPKEYCNT_KPKEMAX_SHIFT;
        if kemax_rb != kemax {
            return Err(self.fail(Error::TotalLimitMismatch));
        }

        debug!("security key programmed, kpmax={}, kemax={}", kpmax, kemax);
        Ok(())
    }

    /// Compare `key` against the locked-in security key.
    ///
    /// Each comparison consumes one retry attempt; once the budget is
    /// exhausted the engine refuses further comparisons with
    /// [`Error::Forbidden`] regardless of key correctness.
    pub fn compare_key(&mut self, key: [u32; 3]) -> Result<()> {
        self.begin();

        let sts = self.regs.read(IspReg::KpKeySts);
        if sts & KpKeySts::FORBID.bits() != 0 {
            return Err(self.fail(Error::Forbidden));
        }
        if sts & KpKeySts::KEYLOCK.bits() == 0 {
            return Err(self.fail(Error::KeyNotLocked));
        }

        self.regs.write(IspReg::KpKey0, key[0]);
        self.regs.write(IspReg::KpKey1, key[1]);
        self.regs.write(IspReg::KpKey2, key[2]);
        self.regs.write(
            IspReg::KpKeyTrg,
            (KpKeyTrg::KPKEYGO | KpKeyTrg::TCEN).bits(),
        );

        if !self.poll_clear(
            IspReg::KpKeySts,
            KpKeySts::KEYBUSY.bits(),
            map::TIMEOUT_READ,
        ) {
            return Err(self.fail(Error::Timeout));
        }

        let sts = self.regs.read(IspReg::KpKeySts);
        if sts & KpKeySts::KEYMATCH.bits() == 0 {
            return Err(self.fail(Error::KeyMismatch));
        }
        if sts & KpKeySts::KEYLOCK.bits() != 0 {
            return Err(self.fail(Error::UnlockFailed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Register file that fails the test on any access; used to prove
    /// parameter validation happens before hardware is touched.
    struct NoTouch;

    impl IspRegisterFile for NoTouch {
        fn read(&mut self, reg: IspReg) -> u32 {
            panic!("unexpected register read: {:?}", reg);
        }

        fn write(&mut self, reg: IspReg, _value: u32) {
            panic!("unexpected register write: {:?}", reg);
        }
    }

    #[test]
    fn xom_state_rejects_out_of_range_without_register_access() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.xom_state(4), Err(Error::InvalidXomRegion));
        assert_eq!(fmc.xom_state(u32::MAX), Err(Error::InvalidXomRegion));
        assert_eq!(fmc.last_error(), Some(Error::InvalidXomRegion));
    }

    #[test]
    fn erase_xom_rejects_out_of_range_without_register_access() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.erase_xom(4), Err(Error::InvalidXomRegion));
    }

    #[test]
    fn checksum_rejects_misaligned_arguments() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.checksum(0x100, 512), Err(Error::InvalidAlignment));
        assert_eq!(fmc.checksum(0, 100), Err(Error::InvalidAlignment));
    }

    #[test]
    fn write_multiple_rejects_bad_addresses() {
        let mut fmc = FlashController::new(NoTouch);
        let buf = [0u8; 16];
        assert_eq!(
            fmc.write_multiple(map::APROM_END, &buf),
            Err(Error::InvalidAddress)
        );
        assert_eq!(fmc.write_multiple(4, &buf), Err(Error::InvalidAddress));
    }

    #[test]
    fn otp_operations_reject_out_of_range_rows() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.write_otp(256, 0, 0), Err(Error::InvalidOtpRow));
        assert_eq!(fmc.read_otp(256), Err(Error::InvalidOtpRow));
        assert_eq!(fmc.lock_otp(256), Err(Error::InvalidOtpRow));
        assert_eq!(fmc.otp_is_locked(256), Err(Error::InvalidOtpRow));
    }

    #[test]
    fn config_xom_rejects_out_of_range_region() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.config_xom(4, 0x10000, 1), Err(Error::InvalidXomRegion));
    }

    #[test]
    fn write_multiple_on_empty_input_is_a_no_op() {
        let mut fmc = FlashController::new(NoTouch);
        assert_eq!(fmc.write_multiple(0, &[]), Ok(0));
        // Lengths below one pair round down to nothing.
        assert_eq!(fmc.write_multiple(0, &[0u8; 7]), Ok(0));
    }
}
