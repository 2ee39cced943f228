// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The upgrade controller.
//!
//! ```text
//! Init -> DownloadBin -> CheckBin -> ProgramBin -> TestRunApp -> CheckAppOk -> Done
//!              ^                                                      |
//!              |                Error <--------- any failure ---------+
//!              |                  |
//!              +-- RecoverPrevious (x3) -> RecoverBackup (x3) -> RecoveryFailed <-> CheckCloud
//! ```
//!
//! `Error` returns to the tier the failed download belonged to, which is
//! persisted alongside the attempt count, so recovery only moves forward.
//!
//! The state is written to `BootInfo` on every transition, and before the
//! first page is erased. Progress inside a state lives in memory only and is
//! lost on reset, which is why a reset inside `DownloadBin..=ProgramBin`
//! lands in `Error`.

use consts::{
    BOOT_UPGRADE_DONE_KEY, SHARED_APP_OK_KEY, SHARED_UPGRADE_PENDING_KEY,
};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use embedded_storage::Storage;

use crate::boot::BootReport;
use crate::config::UpgradeConfig;
use crate::context::UpgradeContext;
use crate::flash::{Programmer, RamResident};
use crate::image::{ImageCheck, ValidImage};
use crate::install::Installer;
use crate::modem::{HttpResponse, Modem};
use crate::net::NetworkSession;
use crate::nvm::NvmError;
use crate::poll::{Millis, Operation, Poll};
use crate::records::{BootField, Records, SharedField};
use crate::report::UpgradeReport;
use crate::state::{RecoveryTier, UpgradeFlags, UpgradeState};

/// Everything the controller drives.
pub struct Resources<F, S, M> {
    pub programmer: Programmer<F>,
    pub records: Records<S>,
    pub modem: M,
}

/// How the bootloader should leave the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exit {
    /// Nothing left to do, boot the installed application.
    Boot,
    /// Run the freshly installed application so it can prove itself.
    TestApp,
}

/// In-memory progress of the current state.
enum Phase {
    Idle,
    Download(NetworkSession<'static>),
    Check(ImageCheck),
    Program(Installer),
    Report(Option<NetworkSession<'static>>),
    CloudQuery(NetworkSession<'static>),
    CloudHeader(ImageCheck),
}

#[derive(Debug, Clone, Copy)]
struct Stall {
    cloud_at: Millis,
    backup_at: Millis,
}

type Step = Result<Poll<Exit>, NvmError>;

pub struct Controller {
    config: UpgradeConfig,
    ctx: UpgradeContext,
    dev_id: u32,
    phase: Phase,
    response: Option<HttpResponse>,
    image: Option<ValidImage>,
    stall: Option<Stall>,
}

impl Controller {
    /// Load the bookkeeping and decide, once per boot, where to start.
    pub fn new<S: Storage>(config: UpgradeConfig, records: &mut Records<S>, boot: &BootReport) -> Result<Self, NvmError> {
        let ctx = UpgradeContext::load(records)?;
        let dev_id = records.boot(BootField::DevId)?;
        let mut controller = Self {
            config,
            ctx,
            dev_id,
            phase: Phase::Idle,
            response: None,
            image: None,
            stall: None,
        };
        controller.enter(records, boot)?;
        Ok(controller)
    }

    pub fn state(&self) -> UpgradeState {
        self.ctx.state
    }

    pub fn context(&self) -> &UpgradeContext {
        &self.ctx
    }

    fn enter<S: Storage>(&mut self, records: &mut Records<S>, boot: &BootReport) -> Result<(), NvmError> {
        let cfg = &self.config;
        let ctx = &mut self.ctx;

        if boot.first_run {
            info!("first run, nothing to do");
            return ctx.set_state(records, UpgradeState::DoNothing);
        }

        if ctx.app_num_iwdg_reset >= cfg.iwdg_critical_threshold || boot.iwdg_resets >= cfg.iwdg_critical_threshold {
            error!(
                "watchdog resets app {} total {}, recovery failed",
                ctx.app_num_iwdg_reset, boot.iwdg_resets
            );
            records.set_shared(SharedField::AppOkKey, 0)?;
            ctx.set_in_progress(records, true)?;
            ctx.raise(records, UpgradeFlags::IWDG_RESET)?;
            return ctx.set_state(records, UpgradeState::RecoveryFailed);
        }

        if ctx.app_num_iwdg_reset >= cfg.iwdg_storm_threshold && !ctx.in_progress {
            warn!("application keeps hitting the watchdog ({}), restoring backup", ctx.app_num_iwdg_reset);
            records.set_shared(SharedField::AppOkKey, 0)?;
            ctx.set_app_ok(records, false)?;
            ctx.commit(records, BootField::UpgNumRecoveryAttempts, 0)?;
            ctx.raise(records, UpgradeFlags::IWDG_RESET)?;
            ctx.set_state(records, UpgradeState::RecoverBackup)?;
            return ctx.set_in_progress(records, true);
        }

        if ctx.in_progress {
            if ctx.state.is_critical() {
                warn!("reset during {}, content cannot be trusted", ctx.state);
                let flag = match ctx.state {
                    UpgradeState::ProgramBin => UpgradeFlags::PROG_ERROR,
                    _ => UpgradeFlags::DOWNLOAD_ERROR,
                };
                return ctx.fail(records, flag);
            }
            info!("resuming upgrade at {}", ctx.state);
            return Ok(());
        }

        let pending = records.shared(SharedField::UpgPending)? == SHARED_UPGRADE_PENDING_KEY;
        let app_alive = records.shared(SharedField::AppOkKey)? == SHARED_APP_OK_KEY;

        if app_alive && !ctx.app_ok {
            info!("application reported ok");
            ctx.set_app_ok(records, true)?;
        }

        if pending && ctx.app_ok {
            let current = records.shared(SharedField::AppCurrVersion)?;
            let next = records.shared(SharedField::AppNextVersion)?;
            info!("upgrade requested v{} -> v{}", current, next);

            ctx.commit(records, BootField::AppVersion, current)?;
            ctx.commit(records, BootField::AppPreviousVersion, current)?;
            ctx.commit(records, BootField::AppUpdateVersion, next)?;
            ctx.commit(records, BootField::UpgFlags, 0)?;
            ctx.commit(records, BootField::UpgNumRecoveryAttempts, 0)?;
            ctx.commit(records, BootField::UpgRecoveryTier, RecoveryTier::Update as u32)?;
            ctx.commit(records, BootField::AppNumFailRuns, 0)?;
            ctx.set_new_app_installed(records, false)?;
            // The running application has to prove itself again after the attempt.
            records.set_shared(SharedField::AppOkKey, 0)?;
            ctx.set_app_ok(records, false)?;
            records.set_boot(BootField::UpgDone, 0)?;
            ctx.set_state(records, UpgradeState::Init)?;
            ctx.set_in_progress(records, true)?;

            // Only now that the attempt is open is the request consumed.
            return records.set_shared(SharedField::UpgPending, 0);
        }

        if pending {
            warn!("upgrade requested but the running application never reported ok");
        }
        ctx.set_state(records, UpgradeState::DoNothing)
    }

    fn goto<S: Storage>(&mut self, records: &mut Records<S>, state: UpgradeState) -> Step {
        self.phase = Phase::Idle;
        self.ctx.set_state(records, state)?;
        Ok(Poll::Busy)
    }

    fn fail<S: Storage>(&mut self, records: &mut Records<S>, flags: UpgradeFlags) -> Step {
        self.phase = Phase::Idle;
        self.ctx.fail(records, flags)?;
        Ok(Poll::Busy)
    }

    fn init<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        self.response = None;
        self.image = None;
        if self.ctx.app_update_version == 0 || self.ctx.app_version == 0 {
            error!(
                "bad versions update {} current {}",
                self.ctx.app_update_version, self.ctx.app_version
            );
            return self.fail(records, UpgradeFlags::DATA_ERROR);
        }
        self.ctx
            .commit(records, BootField::UpgVersionToDownload, self.ctx.app_update_version)?;
        self.goto(records, UpgradeState::DownloadBin)
    }

    fn download<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        S: Storage,
        M: Modem,
    {
        if !matches!(self.phase, Phase::Download(_)) {
            let version = self.ctx.version_to_download;
            let Some(url) = self.config.binary_url(version) else {
                return self.fail(&mut res.records, UpgradeFlags::DATA_ERROR);
            };
            info!("downloading v{} from {}", version, url.as_str());
            self.response = None;
            self.phase = Phase::Download(NetworkSession::new(url, self.config.apn, self.config.download_timeout_ms));
        }
        let Phase::Download(session) = &mut self.phase else {
            return Ok(Poll::Busy);
        };

        match session.poll(&mut res.modem, now) {
            Poll::Busy => Ok(Poll::Busy),
            Poll::Success(response) => {
                self.response = Some(response);
                self.goto(&mut res.records, UpgradeState::CheckBin)
            }
            Poll::Timeout | Poll::Error => self.fail(&mut res.records, UpgradeFlags::DOWNLOAD_ERROR),
        }
    }

    fn check<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        S: Storage,
        M: Modem,
    {
        if !matches!(self.phase, Phase::Check(_)) {
            let Some(response) = self.response else {
                return self.fail(&mut res.records, UpgradeFlags::DOWNLOAD_ERROR);
            };
            self.image = None;
            self.phase = Phase::Check(ImageCheck::new(response, self.ctx.version_to_download));
        }
        let Phase::Check(check) = &mut self.phase else {
            return Ok(Poll::Busy);
        };

        match check.poll(&mut res.modem, now) {
            Poll::Busy => Ok(Poll::Busy),
            Poll::Success(Ok(image)) => {
                info!("image v{} ok, {} bytes", image.version, image.len);
                self.image = Some(image);
                self.goto(&mut res.records, UpgradeState::ProgramBin)
            }
            Poll::Success(Err(e)) => {
                warn!("image rejected: {}", e);
                self.fail(&mut res.records, e.into())
            }
            Poll::Timeout | Poll::Error => self.fail(&mut res.records, UpgradeFlags::DOWNLOAD_ERROR),
        }
    }

    fn program<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        F: NorFlash + ReadNorFlash + RamResident,
        S: Storage,
        M: Modem,
    {
        if !matches!(self.phase, Phase::Program(_)) {
            let Some(image) = self.image else {
                return self.fail(&mut res.records, UpgradeFlags::DOWNLOAD_ERROR);
            };
            // From here on the installed application is no longer trusted.
            res.records.set_shared(SharedField::AppOkKey, 0)?;
            self.ctx.set_app_ok(&mut res.records, false)?;
            self.ctx.set_new_app_installed(&mut res.records, false)?;
            info!("programming v{}", image.version);
            self.phase = Phase::Program(Installer::new(image));
            return Ok(Poll::Busy);
        }
        let Phase::Program(installer) = &mut self.phase else {
            return Ok(Poll::Busy);
        };

        match installer.poll(res, now) {
            Poll::Busy => Ok(Poll::Busy),
            Poll::Success(Ok(())) => {
                self.ctx.set_new_app_installed(&mut res.records, true)?;
                // The application runs its first-run setup on the next jump.
                res.records.set_boot(BootField::AppInitKey, 0)?;
                self.ctx.commit(&mut res.records, BootField::AppNumFailRuns, 0)?;
                self.goto(&mut res.records, UpgradeState::TestRunApp)
            }
            Poll::Success(Err(e)) => {
                error!("programming failed: {}", e);
                self.fail(&mut res.records, e.into())
            }
            Poll::Timeout | Poll::Error => self.fail(&mut res.records, UpgradeFlags::DOWNLOAD_ERROR),
        }
    }

    fn test_run<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        self.goto(records, UpgradeState::CheckAppOk)?;
        Ok(Poll::Success(Exit::TestApp))
    }

    fn check_app_ok<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        if records.shared(SharedField::AppOkKey)? == SHARED_APP_OK_KEY {
            info!("new application reported ok");
            self.ctx.set_app_ok(records, true)?;
            return self.goto(records, UpgradeState::Done);
        }

        let runs = self.ctx.app_num_fail_runs.saturating_add(1);
        self.ctx.commit(records, BootField::AppNumFailRuns, runs)?;
        if runs <= self.config.max_test_run_retries {
            warn!("new application silent, run {}", runs);
            return Ok(Poll::Success(Exit::TestApp));
        }
        error!("new application never reported ok");
        self.fail(records, UpgradeFlags::TEST_ERROR)
    }

    fn error<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        S: Storage,
        M: Modem,
    {
        if !matches!(self.phase, Phase::Report(_)) {
            error!("upgrade to v{} failed: {}", self.ctx.version_to_download, self.ctx.flags);
            res.records.set_shared(SharedField::UpgFlags, self.ctx.flags.bits())?;

            let report = UpgradeReport::new(self.dev_id, &self.ctx);
            let session = self.config.report_url().and_then(|mut url| match report.append_to(&mut url) {
                Ok(()) => Some(NetworkSession::new(url, self.config.apn, self.config.report_timeout_ms)),
                Err(e) => {
                    warn!("report skipped: {}", e);
                    None
                }
            });
            self.phase = Phase::Report(session);
        }
        let Phase::Report(session) = &mut self.phase else {
            return Ok(Poll::Busy);
        };
        if let Some(session) = session {
            match session.poll(&mut res.modem, now) {
                Poll::Busy => return Ok(Poll::Busy),
                Poll::Success(_) => info!("failure reported"),
                Poll::Timeout | Poll::Error => warn!("failure report not delivered"),
            }
        }

        let records = &mut res.records;
        if records.shared(SharedField::AppOkKey)? == SHARED_APP_OK_KEY {
            info!("running application is still ok");
            return self.goto(records, UpgradeState::Done);
        }

        let next = match self.ctx.recovery_tier {
            RecoveryTier::Update if self.ctx.app_previous_version != 0 => UpgradeState::RecoverPrevious,
            RecoveryTier::Previous => UpgradeState::RecoverPrevious,
            RecoveryTier::Update | RecoveryTier::Backup => UpgradeState::RecoverBackup,
            RecoveryTier::Cloud => UpgradeState::RecoveryFailed,
        };
        self.goto(records, next)
    }

    fn recover_previous<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        let previous = self.ctx.app_previous_version;
        if previous == 0 {
            warn!("no previous version to restore");
            return self.goto(records, UpgradeState::RecoverBackup);
        }
        self.ctx.enter_tier(records, RecoveryTier::Previous)?;
        let attempts = self.ctx.bump_recovery_attempts(records)?;
        if attempts > self.config.max_recovery_attempts {
            warn!("previous version failed {} times, escalating", attempts - 1);
            return self.goto(records, UpgradeState::RecoverBackup);
        }
        info!("restoring previous v{}, attempt {}", previous, attempts);
        self.ctx.commit(records, BootField::UpgVersionToDownload, previous)?;
        self.goto(records, UpgradeState::DownloadBin)
    }

    fn recover_backup<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        self.ctx.enter_tier(records, RecoveryTier::Backup)?;
        let attempts = self.ctx.bump_recovery_attempts(records)?;
        if attempts > self.config.max_recovery_attempts {
            error!("backup version failed {} times", attempts - 1);
            return self.goto(records, UpgradeState::RecoveryFailed);
        }
        let backup = self.config.backup_version;
        info!("restoring backup v{}, attempt {}", backup, attempts);
        self.ctx.commit(records, BootField::UpgVersionToDownload, backup)?;
        self.goto(records, UpgradeState::DownloadBin)
    }

    fn recovery_failed<S: Storage>(&mut self, records: &mut Records<S>, now: Millis) -> Step {
        let stall = *self.stall.get_or_insert(Stall {
            cloud_at: now + self.config.cloud_check_interval_ms,
            backup_at: now + self.config.backup_retry_interval_ms,
        });

        if now >= stall.backup_at {
            info!("retrying backup");
            self.stall = None;
            self.ctx.commit(records, BootField::UpgNumRecoveryAttempts, 0)?;
            return self.goto(records, UpgradeState::RecoverBackup);
        }
        if now >= stall.cloud_at {
            self.stall = Some(Stall {
                cloud_at: now + self.config.cloud_check_interval_ms,
                ..stall
            });
            return self.goto(records, UpgradeState::CheckCloud);
        }
        Ok(Poll::Busy)
    }

    fn check_cloud<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        S: Storage,
        M: Modem,
    {
        if !matches!(self.phase, Phase::CloudQuery(_) | Phase::CloudHeader(_)) {
            let Some(url) = self.config.latest_url() else {
                return self.goto(&mut res.records, UpgradeState::RecoveryFailed);
            };
            self.phase = Phase::CloudQuery(NetworkSession::new(url, self.config.apn, self.config.report_timeout_ms));
        }

        match &mut self.phase {
            Phase::CloudQuery(session) => match session.poll(&mut res.modem, now) {
                Poll::Busy => Ok(Poll::Busy),
                Poll::Success(response) => {
                    self.phase = Phase::CloudHeader(ImageCheck::header_only(response));
                    Ok(Poll::Busy)
                }
                Poll::Timeout | Poll::Error => self.goto(&mut res.records, UpgradeState::RecoveryFailed),
            },
            Phase::CloudHeader(check) => match check.poll(&mut res.modem, now) {
                Poll::Busy => Ok(Poll::Busy),
                Poll::Success(Ok(latest)) if latest.version != 0 => {
                    info!("cloud offers v{}", latest.version);
                    self.ctx.enter_tier(&mut res.records, RecoveryTier::Cloud)?;
                    self.ctx
                        .commit(&mut res.records, BootField::UpgVersionToDownload, latest.version)?;
                    self.goto(&mut res.records, UpgradeState::DownloadBin)
                }
                _ => self.goto(&mut res.records, UpgradeState::RecoveryFailed),
            },
            _ => Ok(Poll::Busy),
        }
    }

    fn done<S: Storage>(&mut self, records: &mut Records<S>) -> Step {
        if self.ctx.new_app_installed {
            let version = self.ctx.version_to_download;
            self.ctx.commit(records, BootField::AppVersion, version)?;
            records.set_shared(SharedField::AppCurrVersion, version)?;
        }
        records.set_shared(SharedField::UpgFlags, self.ctx.flags.bits())?;
        self.ctx.commit(records, BootField::UpgNumRecoveryAttempts, 0)?;
        self.ctx.commit(records, BootField::AppNumFailRuns, 0)?;
        self.ctx.commit(records, BootField::AppNumIwdgReset, 0)?;
        records.set_boot(BootField::UpgDone, BOOT_UPGRADE_DONE_KEY)?;
        self.ctx.set_in_progress(records, false)?;
        info!("upgrade finished, running v{}", self.ctx.app_version);
        Ok(Poll::Success(Exit::Boot))
    }

    fn step<F, S, M>(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Step
    where
        F: NorFlash + ReadNorFlash + RamResident,
        S: Storage,
        M: Modem,
    {
        match self.ctx.state {
            UpgradeState::DoNothing => Ok(Poll::Success(Exit::Boot)),
            UpgradeState::Init => self.init(&mut res.records),
            UpgradeState::DownloadBin => self.download(res, now),
            UpgradeState::CheckBin => self.check(res, now),
            UpgradeState::ProgramBin => self.program(res, now),
            UpgradeState::TestRunApp => self.test_run(&mut res.records),
            UpgradeState::CheckAppOk => self.check_app_ok(&mut res.records),
            UpgradeState::Done => self.done(&mut res.records),
            UpgradeState::Error => self.error(res, now),
            UpgradeState::RecoverPrevious => self.recover_previous(&mut res.records),
            UpgradeState::RecoverBackup => self.recover_backup(&mut res.records),
            UpgradeState::RecoveryFailed => self.recovery_failed(&mut res.records, now),
            UpgradeState::CheckCloud => self.check_cloud(res, now),
        }
    }
}

impl<F, S, M> Operation<Resources<F, S, M>> for Controller
where
    F: NorFlash + ReadNorFlash + RamResident,
    S: Storage,
    M: Modem,
{
    type Output = Exit;

    fn poll(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Poll<Exit> {
        match self.step(res, now) {
            Ok(poll) => poll,
            Err(e) => {
                error!("persistent store failure in {}: {}", self.ctx.state, e);
                Poll::Error
            }
        }
    }
}
