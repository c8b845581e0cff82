//! Flash manager (component G)
//!
//! Drives ECU reprogramming above the UDS engine: enter the programming session, unlock
//! security, erase overlapping unprotected regions, then download/transfer/exit each block in
//! ascending address order, with an optional verify pass.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::flash::parser::{FlashBlock, FlashFile};
use crate::uds::{RoutineSubFunction, SeedToKey, SessionType, UdsClient};
use crate::{DiagError, DiagServerResult};

/// Error produced by [`FlashManager::program`]'s state machine itself, distinct from the
/// ordinary [`DiagError`] variants (`NegativeResponse`, `Timeout`, `SecurityDenied`, ...) that
/// propagate straight through from the underlying [`UdsClient`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlashError {
    /// The flash file failed its own structural validation (overlapping blocks).
    #[error("failed to load flash file: {0}")]
    FileLoad(String),
    /// Entering the programming session was rejected by the ECU.
    #[error("ECU rejected entry into the programming session")]
    BootloaderEntry,
    /// A verify-pass read did not match the written bytes.
    #[error("verification mismatch at address 0x{address:08X}")]
    VerificationMismatch {
        /// The block address that failed verification.
        address: u32,
    },
    /// A block's address fell outside every configured flash region.
    #[error("address 0x{address:08X} is outside any configured flash region")]
    InvalidAddress {
        /// The offending address.
        address: u32,
    },
    /// A block overlapped a region marked protected in the configuration.
    #[error("address 0x{address:08X} falls inside a protected region")]
    RegionProtected {
        /// The offending address.
        address: u32,
    },
}

/// A flashable memory region. Erase only runs over regions that are not `protected` and that
/// overlap the file being programmed; writing to a block that overlaps a `protected` region
/// fails the run before any bytes are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion {
    /// The region's starting address.
    pub address: u32,
    /// The region's size in bytes.
    pub size: u32,
    /// Whether this region is write-protected.
    pub protected: bool,
}

impl FlashRegion {
    fn overlaps(&self, block: &FlashBlock) -> bool {
        let region_end = self.address.wrapping_add(self.size);
        self.address < block.end_address() && block.address < region_end
    }
}

/// Flash manager configuration.
#[derive(Clone)]
pub struct FlashConfig {
    /// Bytes per `TransferData` chunk; the ECU's `RequestDownload` response may negotiate a
    /// smaller maximum, in which case the smaller of the two is used.
    pub block_size: u32,
    /// Per-service response deadline, milliseconds.
    pub timeout_ms: u32,
    /// Re-read and compare every block after writing.
    pub verify_after_write: bool,
    /// Run the erase stage before writing.
    pub erase_before_write: bool,
    /// Security level to unlock before erasing/writing. `0` skips the unlock stage entirely.
    pub security_level: u8,
    /// Seed-to-key algorithm for `security_level`. Required if `security_level != 0`.
    pub seed_to_key: Option<SeedToKey>,
    /// Flashable regions. Empty means "no region restrictions": erase is skipped and every
    /// address is considered writable.
    pub regions: Vec<FlashRegion>,
    /// Manufacturer routine identifier the erase stage invokes via `RoutineControl`. Spec.md
    /// §4.7 calls `0xFF00` a placeholder pending manufacturer-specific configuration.
    pub erase_routine_id: u16,
}

impl std::fmt::Debug for FlashConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashConfig")
            .field("block_size", &self.block_size)
            .field("timeout_ms", &self.timeout_ms)
            .field("verify_after_write", &self.verify_after_write)
            .field("erase_before_write", &self.erase_before_write)
            .field("security_level", &self.security_level)
            .field("seed_to_key", &self.seed_to_key.as_ref().map(|_| "<fn>"))
            .field("regions", &self.regions)
            .field("erase_routine_id", &self.erase_routine_id)
            .finish()
    }
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            timeout_ms: 5000,
            verify_after_write: false,
            erase_before_write: true,
            security_level: 0,
            seed_to_key: None,
            regions: Vec::new(),
            erase_routine_id: 0xFF00,
        }
    }
}

/// The state machine's current stage, also the first argument to every [`ProgressSink`] call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlashStage {
    /// No programming run in progress (initial state, and the state a failed run returns to).
    Idle,
    /// `DiagnosticSessionControl(Programming)` is in flight.
    EnteringProgramming,
    /// The security-access seed/key handshake is in flight.
    Unlocking,
    /// Erase routines are running over overlapping, unprotected regions.
    Erasing,
    /// Blocks are being downloaded in ascending address order.
    Writing,
    /// Written blocks are being re-read and compared.
    Verifying,
    /// The run completed successfully.
    Done,
}

/// Callback invoked at every stage transition and block boundary: `(stage, current, total,
/// message)`.
pub type ProgressSink = Box<dyn Fn(FlashStage, u64, u64, &str) + Send + Sync>;

/// Statistics for a completed [`FlashManager::program`] run.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct FlashStats {
    /// Blocks successfully written.
    pub blocks_written: u64,
    /// Total bytes written across every block.
    pub bytes_written: u64,
    /// Blocks that failed to write. Always `0` on `Ok` — a failing block terminates the run.
    pub blocks_failed: u64,
    /// Wall-clock time for the whole run.
    pub elapsed: Duration,
    /// `bytes_written / elapsed`, in bytes/second.
    pub throughput_bytes_per_sec: f64,
}

/// Drives an ECU through a full flash-programming sequence over a [`UdsClient`].
pub struct FlashManager {
    uds: Arc<UdsClient>,
    config: FlashConfig,
    stage: Mutex<FlashStage>,
}

impl std::fmt::Debug for FlashManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashManager")
            .field("stage", &self.current_stage())
            .finish()
    }
}

impl FlashManager {
    /// Builds a flash manager over an existing [`UdsClient`], shared so the caller can keep
    /// using it (e.g. to read DTCs) alongside programming runs.
    pub fn new(uds: Arc<UdsClient>, config: FlashConfig) -> Self {
        Self {
            uds,
            config,
            stage: Mutex::new(FlashStage::Idle),
        }
    }

    /// The state machine's current stage.
    pub fn current_stage(&self) -> FlashStage {
        *self.stage.lock().unwrap()
    }

    /// Shuts down the underlying [`UdsClient`].
    pub fn shutdown(&self) {
        self.uds.shutdown();
    }

    fn set_stage(&self, stage: FlashStage) {
        *self.stage.lock().unwrap() = stage;
    }

    /// Runs the full EnteringProgramming -> Unlocking -> Erasing -> Writing -> (Verifying)
    /// sequence against `file`. Any stage's failure resets to [`FlashStage::Idle`] and returns
    /// its error; best-effort cleanup (`RequestTransferExit`, session back to
    /// [`SessionType::Default`]) is attempted first.
    pub fn program(&self, file: &FlashFile, progress: Option<ProgressSink>) -> DiagServerResult<FlashStats> {
        let report = |stage: FlashStage, current: u64, total: u64, message: &str| {
            if let Some(sink) = progress.as_ref() {
                sink(stage, current, total, message);
            }
        };

        if !file.validate() {
            return Err(DiagError::Flash(FlashError::FileLoad(
                "flash file contains overlapping blocks".into(),
            )));
        }
        let start = Instant::now();

        self.set_stage(FlashStage::EnteringProgramming);
        report(FlashStage::EnteringProgramming, 0, 1, "entering programming session");
        if self.uds.diagnostic_session_control(SessionType::Programming).is_err() {
            self.set_stage(FlashStage::Idle);
            return Err(DiagError::Flash(FlashError::BootloaderEntry));
        }

        if self.config.security_level != 0 {
            self.set_stage(FlashStage::Unlocking);
            report(FlashStage::Unlocking, 0, 1, "unlocking security access");
            let Some(algorithm) = self.config.seed_to_key.as_ref() else {
                self.set_stage(FlashStage::Idle);
                return Err(DiagError::Protocol(
                    "security_level configured without a seed_to_key algorithm".into(),
                ));
            };
            if let Err(e) = self.uds.unlock_security_level(self.config.security_level, algorithm) {
                self.set_stage(FlashStage::Idle);
                return Err(e);
            }
        }

        self.set_stage(FlashStage::Erasing);
        if self.config.erase_before_write {
            let regions: Vec<&FlashRegion> = self
                .config
                .regions
                .iter()
                .filter(|r| !r.protected && file.blocks.iter().any(|b| r.overlaps(b)))
                .collect();
            let total = regions.len() as u64;
            for (i, region) in regions.iter().enumerate() {
                report(
                    FlashStage::Erasing,
                    i as u64,
                    total,
                    &format!("erasing region at 0x{:08X}", region.address),
                );
                let mut params = Vec::with_capacity(8);
                params.extend_from_slice(&region.address.to_be_bytes());
                params.extend_from_slice(&region.size.to_be_bytes());
                if let Err(e) = self
                    .uds
                    .routine_control(RoutineSubFunction::Start, self.config.erase_routine_id, &params)
                {
                    self.set_stage(FlashStage::Idle);
                    return Err(e);
                }
            }
        }

        if !self.config.regions.is_empty() {
            for block in &file.blocks {
                if let Some(region) = self.config.regions.iter().find(|r| r.protected && r.overlaps(block)) {
                    self.set_stage(FlashStage::Idle);
                    return Err(DiagError::Flash(FlashError::RegionProtected {
                        address: region.address.max(block.address),
                    }));
                }
                if !self.config.regions.iter().any(|r| r.overlaps(block)) {
                    self.set_stage(FlashStage::Idle);
                    return Err(DiagError::Flash(FlashError::InvalidAddress { address: block.address }));
                }
            }
        }

        self.set_stage(FlashStage::Writing);
        let mut sorted_blocks = file.blocks.clone();
        sorted_blocks.sort_by_key(|b| b.address);
        let total_blocks = sorted_blocks.len() as u64;
        let mut stats = FlashStats::default();

        for (i, block) in sorted_blocks.iter().enumerate() {
            report(
                FlashStage::Writing,
                i as u64,
                total_blocks,
                &format!("writing block at 0x{:08X} ({} bytes)", block.address, block.bytes.len()),
            );
            match self.write_block(block) {
                Ok(()) => {
                    stats.blocks_written += 1;
                    stats.bytes_written += block.bytes.len() as u64;
                }
                Err(e) => {
                    log::error!("flash write failed at 0x{:08X}: {e}", block.address);
                    let _ = self.uds.request_transfer_exit();
                    let _ = self.uds.diagnostic_session_control(SessionType::Default);
                    self.set_stage(FlashStage::Idle);
                    return Err(e);
                }
            }
        }

        if self.config.verify_after_write {
            self.set_stage(FlashStage::Verifying);
            for (i, block) in sorted_blocks.iter().enumerate() {
                report(
                    FlashStage::Verifying,
                    i as u64,
                    total_blocks,
                    &format!("verifying block at 0x{:08X}", block.address),
                );
                if let Err(e) = self.verify_block(i, block) {
                    self.set_stage(FlashStage::Idle);
                    return Err(e);
                }
            }
        }

        stats.elapsed = start.elapsed();
        let secs = stats.elapsed.as_secs_f64();
        stats.throughput_bytes_per_sec = if secs > 0.0 { stats.bytes_written as f64 / secs } else { 0.0 };

        self.set_stage(FlashStage::Done);
        report(FlashStage::Done, total_blocks, total_blocks, "programming complete");
        Ok(stats)
    }

    /// Downloads one block: `RequestDownload`, chunked `TransferData` at `block_size` (capped
    /// by the ECU's negotiated maximum, if smaller), then `RequestTransferExit`.
    fn write_block(&self, block: &FlashBlock) -> DiagServerResult<()> {
        let negotiated_max = self.uds.request_download(block.address, block.bytes.len() as u32)?;
        // `negotiated_max` counts TransferData's own 2-byte SID+sequence header.
        let chunk_size = if negotiated_max > 2 {
            (self.config.block_size as usize).min(negotiated_max as usize - 2)
        } else {
            self.config.block_size as usize
        }
        .max(1);

        let mut sequence: u8 = 1;
        for chunk in block.bytes.chunks(chunk_size) {
            self.uds.transfer_data(sequence, chunk)?;
            sequence = if sequence == 0xFF { 0x01 } else { sequence + 1 };
        }
        self.uds.request_transfer_exit()?;
        Ok(())
    }

    /// Re-reads `block` via `ReadMemoryByAddress` (service `0x23`), falling back to a
    /// per-block DID (`0x1000 + index`) if the ECU doesn't support it (NRC `0x11`, service not
    /// supported).
    fn verify_block(&self, index: usize, block: &FlashBlock) -> DiagServerResult<()> {
        let read = match self.uds.read_memory_by_address(block.address, block.bytes.len() as u32) {
            Ok(bytes) => bytes,
            Err(DiagError::NegativeResponse { nrc: 0x11, .. }) => {
                self.uds.read_data_by_identifier(0x1000 + index as u16)?
            }
            Err(e) => return Err(e),
        };
        if read != block.bytes {
            return Err(DiagError::Flash(FlashError::VerificationMismatch { address: block.address }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test;
