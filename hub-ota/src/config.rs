// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt::Write;

use consts::{
    BACKUP_RETRY_INTERVAL_MS, BACKUP_VERSION, CLOUD_APN, CLOUD_BASE_URL, CLOUD_CHECK_INTERVAL_MS, DOWNLOAD_TIMEOUT_MS,
    IWDG_CRITICAL_THRESHOLD, IWDG_STORM_THRESHOLD, MAX_RECOVERY_ATTEMPTS, MAX_TEST_RUN_RETRIES, REPORT_TIMEOUT_MS,
};

use crate::net::Url;

/// Runtime policy of the upgrade controller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpgradeConfig {
    pub base_url: &'static str,
    pub apn: &'static str,
    pub download_timeout_ms: u64,
    pub report_timeout_ms: u64,
    /// Period of the header-only check while recovery has failed.
    pub cloud_check_interval_ms: u64,
    /// Period of the blind backup retry while recovery has failed.
    pub backup_retry_interval_ms: u64,
    /// Attempts per recovery tier before escalating.
    pub max_recovery_attempts: u32,
    /// Extra runs granted to a freshly installed application.
    pub max_test_run_retries: u32,
    pub iwdg_storm_threshold: u32,
    pub iwdg_critical_threshold: u32,
    pub backup_version: u32,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            base_url: CLOUD_BASE_URL,
            apn: CLOUD_APN,
            download_timeout_ms: DOWNLOAD_TIMEOUT_MS,
            report_timeout_ms: REPORT_TIMEOUT_MS,
            cloud_check_interval_ms: CLOUD_CHECK_INTERVAL_MS,
            backup_retry_interval_ms: BACKUP_RETRY_INTERVAL_MS,
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS,
            max_test_run_retries: MAX_TEST_RUN_RETRIES,
            iwdg_storm_threshold: IWDG_STORM_THRESHOLD,
            iwdg_critical_threshold: IWDG_CRITICAL_THRESHOLD,
            backup_version: BACKUP_VERSION,
        }
    }
}

impl UpgradeConfig {
    /// `<base>/hub/bin/hub_005.bin`
    pub fn binary_url(&self, version: u32) -> Option<Url> {
        let mut url = Url::new();
        write!(url, "{}/hub/bin/hub_{:03}.bin", self.base_url, version).ok()?;
        Some(url)
    }

    /// Header of the most recent binary on the server.
    pub fn latest_url(&self) -> Option<Url> {
        let mut url = Url::new();
        write!(url, "{}/hub/latest", self.base_url).ok()?;
        Some(url)
    }

    /// Report endpoint, the payload is appended as a query.
    pub fn report_url(&self) -> Option<Url> {
        let mut url = Url::new();
        write!(url, "{}/hub/report?s=", self.base_url).ok()?;
        Some(url)
    }
}
