//! Configuration loading and validation.
//!
//! Settings live in a flat TOML file, `lumend.toml`, found under the XDG
//! config directory (`~/.config/lumend/lumend.toml`). A default file is
//! generated on first start. Most options are optional and fall back to the
//! defaults in [`crate::constants`]; values are range-checked on load so a
//! broken file fails fast with a pointed message instead of misbehaving at
//! 3 AM.
//!
//! Day/night boundary times come either from the `sunset`/`sunrise` keys or,
//! when `latitude`/`longitude` are set, from solar calculations.

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::logger::Log;
use crate::state::{DayPhase, PowerSource};

/// All daemon settings, as read from `lumend.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Wall-clock sunset time, `HH:MM:SS`. Ignored when coordinates are set.
    pub sunset: String,
    /// Wall-clock sunrise time, `HH:MM:SS`. Ignored when coordinates are set.
    pub sunrise: String,
    /// Geographic coordinates for solar sunset/sunrise calculation.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Half-width of a day/night boundary window, in minutes. The window
    /// spans this duration on each side of the event's center time.
    pub event_duration: Option<u64>,

    pub day_temp: Option<u32>,   // Kelvin
    pub night_temp: Option<u32>, // Kelvin
    pub smooth_temp: Option<bool>,
    pub temp_trans_step: Option<u32>,       // Kelvin per smoothing step
    pub temp_trans_timeout_ms: Option<u64>, // between smoothing steps
    /// Spread boundary temperature changes over the whole boundary window.
    pub long_transition: Option<bool>,
    /// Drive temperature continuously from the backlight level instead of
    /// from the day phase.
    pub ambient_temp: Option<bool>,
    pub disable_night_light: Option<bool>,

    pub disable_dimmer: Option<bool>,
    /// Backlight fraction while dimmed, `0.0..=1.0`.
    pub dim_pct: Option<f64>,
    pub dim_timeout_ac: Option<u64>,      // seconds of idle before dimming
    pub dim_timeout_battery: Option<u64>, // seconds of idle before dimming
    pub smooth_dim: Option<bool>,
    pub dim_trans_step: Option<f64>,
    pub dim_trans_timeout_ms: Option<u64>,
}

/// Contents written when no configuration file exists yet.
const DEFAULT_CONFIG: &str = r#"# lumend configuration

# Day/night boundary times (ignored when latitude/longitude are set)
sunset = "19:00:00"
sunrise = "06:00:00"
# latitude = 40.7128
# longitude = -74.0060

# Half-width of a boundary window in minutes
event_duration = 30

# Color temperature
day_temp = 6500                # Kelvin
night_temp = 4000              # Kelvin
smooth_temp = true
temp_trans_step = 50           # Kelvin per step
temp_trans_timeout_ms = 300    # milliseconds between steps
long_transition = false
ambient_temp = false
disable_night_light = false

# Idle dimming
disable_dimmer = false
dim_pct = 0.2                  # backlight fraction while dimmed
dim_timeout_ac = 45            # seconds
dim_timeout_battery = 20       # seconds
smooth_dim = true
dim_trans_step = 0.05
dim_trans_timeout_ms = 30
"#;

impl Config {
    /// Load the configuration from `path`, or from the default location,
    /// generating a default file there first if none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            Self::write_default(&path)?;
            Log::log_decorated(&format!("Created default configuration at {:?}", path));
        }

        Self::load_from_path(&path)
    }

    /// Load and validate the configuration from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("cannot parse configuration file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("cannot determine the user configuration directory")?;
        Ok(base.join("lumend").join("lumend.toml"))
    }

    fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create configuration directory {:?}", parent))?;
        }
        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("cannot write default configuration to {:?}", path))
    }

    /// Range-check everything that can be range-checked.
    pub fn validate(&self) -> Result<()> {
        self.schedule_times()?;

        for (name, temp) in [
            ("day_temp", self.day_temp.unwrap_or(DEFAULT_DAY_TEMP)),
            ("night_temp", self.night_temp.unwrap_or(DEFAULT_NIGHT_TEMP)),
        ] {
            if !(MINIMUM_TEMP..=MAXIMUM_TEMP).contains(&temp) {
                bail!(
                    "{} = {} is out of range ({}..={} Kelvin)",
                    name,
                    temp,
                    MINIMUM_TEMP,
                    MAXIMUM_TEMP
                );
            }
        }

        let duration = self.event_duration.unwrap_or(DEFAULT_EVENT_DURATION);
        if !(MINIMUM_EVENT_DURATION..=MAXIMUM_EVENT_DURATION).contains(&duration) {
            bail!(
                "event_duration = {} is out of range ({}..={} minutes)",
                duration,
                MINIMUM_EVENT_DURATION,
                MAXIMUM_EVENT_DURATION
            );
        }

        let dim_pct = self.dim_pct.unwrap_or(DEFAULT_DIM_PCT);
        if !(0.0..=1.0).contains(&dim_pct) {
            bail!("dim_pct = {} must be a fraction within 0.0..=1.0", dim_pct);
        }

        for (name, timeout) in [
            ("dim_timeout_ac", self.dim_timeout_ac.unwrap_or(DEFAULT_DIM_TIMEOUT_AC)),
            (
                "dim_timeout_battery",
                self.dim_timeout_battery.unwrap_or(DEFAULT_DIM_TIMEOUT_BATTERY),
            ),
        ] {
            if !(MINIMUM_DIM_TIMEOUT..=MAXIMUM_DIM_TIMEOUT).contains(&timeout) {
                bail!(
                    "{} = {} is out of range ({}..={} seconds)",
                    name,
                    timeout,
                    MINIMUM_DIM_TIMEOUT,
                    MAXIMUM_DIM_TIMEOUT
                );
            }
        }

        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    bail!("latitude = {} must be within -90..=90 degrees", lat);
                }
                if !(-180.0..=180.0).contains(&lon) {
                    bail!("longitude = {} must be within -180..=180 degrees", lon);
                }
            }
            (None, None) => {}
            _ => bail!("latitude and longitude must be set together"),
        }

        Ok(())
    }

    /// Parsed configured sunset/sunrise times.
    pub fn schedule_times(&self) -> Result<(NaiveTime, NaiveTime)> {
        let sunset = NaiveTime::parse_from_str(&self.sunset, "%H:%M:%S")
            .with_context(|| format!("sunset = {:?} is not a valid HH:MM:SS time", self.sunset))?;
        let sunrise = NaiveTime::parse_from_str(&self.sunrise, "%H:%M:%S")
            .with_context(|| format!("sunrise = {:?} is not a valid HH:MM:SS time", self.sunrise))?;
        Ok((sunset, sunrise))
    }

    // ═══ Resolved accessors ═══

    /// The configured temperature for a day phase.
    pub fn temp_for(&self, phase: DayPhase) -> u32 {
        match phase {
            DayPhase::Day => self.day_temp.unwrap_or(DEFAULT_DAY_TEMP),
            DayPhase::Night => self.night_temp.unwrap_or(DEFAULT_NIGHT_TEMP),
        }
    }

    /// Persist a new temperature for a day phase. External callers change
    /// configuration this way; the file on disk is left alone.
    pub fn set_temp_for(&mut self, phase: DayPhase, temp: u32) {
        match phase {
            DayPhase::Day => self.day_temp = Some(temp),
            DayPhase::Night => self.night_temp = Some(temp),
        }
    }

    /// Magnitude of the full day/night temperature swing.
    pub fn temp_swing(&self) -> u32 {
        self.temp_for(DayPhase::Day)
            .abs_diff(self.temp_for(DayPhase::Night))
    }

    pub fn dim_timeout_for(&self, source: PowerSource) -> u64 {
        match source {
            PowerSource::Ac => self.dim_timeout_ac.unwrap_or(DEFAULT_DIM_TIMEOUT_AC),
            PowerSource::Battery => self
                .dim_timeout_battery
                .unwrap_or(DEFAULT_DIM_TIMEOUT_BATTERY),
        }
    }

    pub fn set_dim_timeout_for(&mut self, source: PowerSource, secs: u64) {
        match source {
            PowerSource::Ac => self.dim_timeout_ac = Some(secs),
            PowerSource::Battery => self.dim_timeout_battery = Some(secs),
        }
    }

    /// Boundary window half-width in seconds.
    pub fn event_duration_secs(&self) -> i64 {
        (self.event_duration.unwrap_or(DEFAULT_EVENT_DURATION) * 60) as i64
    }

    pub fn smooth_temp_enabled(&self) -> bool {
        self.smooth_temp.unwrap_or(DEFAULT_SMOOTH_TEMP)
    }

    pub fn temp_step(&self) -> u32 {
        self.temp_trans_step.unwrap_or(DEFAULT_TEMP_TRANS_STEP)
    }

    pub fn temp_timeout_ms(&self) -> u64 {
        self.temp_trans_timeout_ms
            .unwrap_or(DEFAULT_TEMP_TRANS_TIMEOUT_MS)
    }

    pub fn long_transition_enabled(&self) -> bool {
        self.long_transition.unwrap_or(DEFAULT_LONG_TRANSITION)
    }

    pub fn ambient_mode(&self) -> bool {
        self.ambient_temp.unwrap_or(DEFAULT_AMBIENT_TEMP)
    }

    pub fn night_light_disabled(&self) -> bool {
        self.disable_night_light.unwrap_or(false)
    }

    pub fn dimmer_disabled(&self) -> bool {
        self.disable_dimmer.unwrap_or(false)
    }

    pub fn dim_target_pct(&self) -> f64 {
        self.dim_pct.unwrap_or(DEFAULT_DIM_PCT)
    }

    pub fn smooth_dim_enabled(&self) -> bool {
        self.smooth_dim.unwrap_or(DEFAULT_SMOOTH_DIM)
    }

    pub fn dim_step(&self) -> f64 {
        self.dim_trans_step.unwrap_or(DEFAULT_DIM_TRANS_STEP)
    }

    pub fn dim_timeout_ms(&self) -> u64 {
        self.dim_trans_timeout_ms
            .unwrap_or(DEFAULT_DIM_TRANS_TIMEOUT_MS)
    }

    /// A configuration with every default applied, for tests.
    #[cfg(any(test, feature = "testing-support"))]
    pub fn for_tests() -> Self {
        Self {
            sunset: DEFAULT_SUNSET.to_string(),
            sunrise: DEFAULT_SUNRISE.to_string(),
            latitude: None,
            longitude: None,
            event_duration: None,
            day_temp: None,
            night_temp: None,
            smooth_temp: None,
            temp_trans_step: None,
            temp_trans_timeout_ms: None,
            long_transition: None,
            ambient_temp: None,
            disable_night_light: None,
            disable_dimmer: None,
            dim_pct: None,
            dim_timeout_ac: None,
            dim_timeout_battery: None,
            smooth_dim: None,
            dim_trans_step: None,
            dim_trans_timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumend.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config_template_is_valid() {
        let (_dir, path) = write_config(DEFAULT_CONFIG);
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.day_temp, Some(DEFAULT_DAY_TEMP));
        assert_eq!(config.dim_timeout_ac, Some(DEFAULT_DIM_TIMEOUT_AC));
    }

    #[test]
    fn test_minimal_config_falls_back_to_defaults() {
        let (_dir, path) = write_config("sunset = \"19:00:00\"\nsunrise = \"06:00:00\"\n");
        let config = Config::load_from_path(&path).unwrap();

        assert_eq!(config.temp_for(DayPhase::Day), DEFAULT_DAY_TEMP);
        assert_eq!(config.temp_for(DayPhase::Night), DEFAULT_NIGHT_TEMP);
        assert_eq!(config.dim_timeout_for(PowerSource::Battery), DEFAULT_DIM_TIMEOUT_BATTERY);
        assert_eq!(config.dim_target_pct(), DEFAULT_DIM_PCT);
        assert!(!config.long_transition_enabled());
    }

    #[test]
    fn test_out_of_range_temperature_is_rejected() {
        let (_dir, path) = write_config(
            "sunset = \"19:00:00\"\nsunrise = \"06:00:00\"\nnight_temp = 100\n",
        );
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_invalid_time_is_rejected() {
        let (_dir, path) = write_config("sunset = \"25:99:00\"\nsunrise = \"06:00:00\"\n");
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_dim_pct_must_be_a_fraction() {
        let (_dir, path) = write_config(
            "sunset = \"19:00:00\"\nsunrise = \"06:00:00\"\ndim_pct = 30.0\n",
        );
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_lone_latitude_is_rejected() {
        let (_dir, path) = write_config(
            "sunset = \"19:00:00\"\nsunrise = \"06:00:00\"\nlatitude = 40.0\n",
        );
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_set_temp_for_persists_in_memory() {
        let mut config = Config::for_tests();
        config.set_temp_for(DayPhase::Night, 3500);
        assert_eq!(config.temp_for(DayPhase::Night), 3500);
        assert_eq!(config.temp_swing(), DEFAULT_DAY_TEMP - 3500);
    }

    #[test]
    fn test_event_duration_secs() {
        let mut config = Config::for_tests();
        config.event_duration = Some(30);
        assert_eq!(config.event_duration_secs(), 1800);
    }
}
