//! Linux power-state adapter backed by `/sys/class/power_supply/`.
//!
//! The kernel exposes one directory per supply. Mains supplies carry an
//! `online` attribute; battery supplies carry a `status` attribute. Either is
//! enough to answer the single question the daemon asks: is the machine
//! running on battery right now?
//!
//! sysfs has no change notifications usable from a plain poll loop, so the
//! properties "signal" is synthesized by the event loop's periodic poll. The
//! adapter still honors the boundary contract: the signal carries no payload
//! and subscribers must re-read the property.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use super::PowerService;

const SYSFS_POWER_SUPPLY: &str = "/sys/class/power_supply";

pub struct SysfsPower {
    root: PathBuf,
    watching: bool,
}

impl SysfsPower {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(SYSFS_POWER_SUPPLY))
    }

    /// Build an adapter rooted at an arbitrary directory. Used by tests to
    /// point at a synthetic sysfs tree.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            watching: false,
        }
    }

    fn read_attr(&self, supply: &str, attr: &str) -> Option<String> {
        fs::read_to_string(self.root.join(supply).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl Default for SysfsPower {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerService for SysfsPower {
    fn on_battery(&mut self) -> Result<bool> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("power supply tree {:?} unavailable", self.root))?;

        let mut mains_online = None;
        let mut battery_discharging = None;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            match self.read_attr(&name, "type").as_deref() {
                Some("Mains") => {
                    if let Some(online) = self.read_attr(&name, "online") {
                        mains_online = Some(online == "1");
                    }
                }
                Some("Battery") => {
                    if let Some(status) = self.read_attr(&name, "status") {
                        // "Charging", "Full" and "Not charging" all mean wall
                        // power is present.
                        battery_discharging = Some(status == "Discharging");
                    }
                }
                _ => {}
            }
        }

        // A mains supply answers directly; otherwise fall back to battery
        // status. A tree with neither is treated as service unavailable and
        // left to the caller's fallback policy.
        match (mains_online, battery_discharging) {
            (Some(online), _) => Ok(!online),
            (None, Some(discharging)) => Ok(discharging),
            (None, None) => bail!("no usable supply under {:?}", self.root),
        }
    }

    fn watch_properties(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            bail!("power supply tree {:?} unavailable", self.root);
        }
        self.watching = true;
        Ok(())
    }

    fn unwatch_properties(&mut self) {
        self.watching = false;
    }
}
