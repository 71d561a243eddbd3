//! Persistent device settings: calibration, radio parameters and Wi-Fi credentials.
//!
//! Values live in a flat key/value store as UTF-8 text. Missing or unreadable keys fall back to
//! per-key defaults on load; writes are validated before anything touches the store, so a
//! rejected value leaves the previous one in place.

mod sled_store;

pub use sled_store::SledStore;

use std::collections::BTreeMap;
use std::str::FromStr;

use log::warn;
use thiserror::Error;

use crate::tank::{
    Calibration, CalibrationError, DEFAULT_CAPACITY_LITERS, DEFAULT_FAR_CM, DEFAULT_NEAR_CM,
};

/// Store keys, shared with other tools that read the same database.
pub mod keys {
    pub const LORA_FREQUENCY: &str = "lora_freq";
    pub const LORA_NETWORK_ID: &str = "lora_netid";
    pub const LORA_ADDRESS: &str = "lora_addr";
    pub const NEAR_DISTANCE: &str = "min_distance";
    pub const FAR_DISTANCE: &str = "max_distance";
    pub const TANK_CAPACITY: &str = "tank_capacity";
    pub const WIFI_SSID: &str = "wifi_ssid";
    pub const WIFI_PASSWORD: &str = "wifi_pass";
}

pub const DEFAULT_LORA_FREQUENCY: &str = "865000000";
pub const DEFAULT_LORA_NETWORK_ID: u8 = 6;
pub const DEFAULT_LORA_ADDRESS: u16 = 2;
const MIN_LORA_FREQUENCY_HZ: u64 = 100_000_000;
const MAX_LORA_ADDRESS: u16 = 255;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("value for `{key}` is not valid UTF-8")]
    Encoding { key: String },

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("invalid radio settings: {0}")]
    InvalidRadio(String),

    #[error("Wi-Fi SSID must not be empty")]
    EmptySsid,
}

/// Flat key/value persistence. Writes are durable when `put`/`put_many`/`remove` return.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
    /// Write all entries or none of them.
    fn put_many(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError>;
    fn remove(&mut self, key: &str) -> Result<(), SettingsError>;
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn put_many(&mut self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        for (key, value) in entries {
            self.values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Read `key` as `T`, using `default` when the key is missing or does not parse.
fn get_or<T: FromStr>(store: &dyn SettingsStore, key: &str, default: T) -> Result<T, SettingsError> {
    match store.get(key)? {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("Ignoring unparseable setting {}={:?}", key, raw);
                Ok(default)
            }
        },
    }
}

/// Load the stored calibration. An inconsistent stored triple yields the defaults.
pub fn load_calibration(store: &dyn SettingsStore) -> Result<Calibration, SettingsError> {
    let near = get_or(store, keys::NEAR_DISTANCE, DEFAULT_NEAR_CM)?;
    let far = get_or(store, keys::FAR_DISTANCE, DEFAULT_FAR_CM)?;
    let capacity = get_or(store, keys::TANK_CAPACITY, DEFAULT_CAPACITY_LITERS)?;
    match Calibration::new(near, far, capacity) {
        Ok(calibration) => Ok(calibration),
        Err(e) => {
            warn!("Stored calibration rejected ({}); using defaults", e);
            Ok(Calibration::default())
        }
    }
}

/// Validate and persist a calibration. On error nothing is written.
pub fn save_calibration(
    store: &mut dyn SettingsStore,
    near_cm: i32,
    far_cm: i32,
    capacity_liters: f32,
) -> Result<Calibration, SettingsError> {
    let calibration = Calibration::new(near_cm, far_cm, capacity_liters)?;
    let near = calibration.near_cm().to_string();
    let far = calibration.far_cm().to_string();
    let capacity = calibration.capacity_liters().to_string();
    store.put_many(&[
        (keys::NEAR_DISTANCE, near.as_str()),
        (keys::FAR_DISTANCE, far.as_str()),
        (keys::TANK_CAPACITY, capacity.as_str()),
    ])?;
    Ok(calibration)
}

/// Modem parameters applied at startup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RadioSettings {
    /// Band in Hz as decimal digits, passed verbatim to `AT+BAND`.
    pub frequency: String,
    pub network_id: u8,
    pub address: u16,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_LORA_FREQUENCY.to_string(),
            network_id: DEFAULT_LORA_NETWORK_ID,
            address: DEFAULT_LORA_ADDRESS,
        }
    }
}

impl RadioSettings {
    pub fn load(store: &dyn SettingsStore) -> Result<Self, SettingsError> {
        let settings = Self {
            frequency: get_or(
                store,
                keys::LORA_FREQUENCY,
                DEFAULT_LORA_FREQUENCY.to_string(),
            )?,
            network_id: get_or(store, keys::LORA_NETWORK_ID, DEFAULT_LORA_NETWORK_ID)?,
            address: get_or(store, keys::LORA_ADDRESS, DEFAULT_LORA_ADDRESS)?,
        };
        if let Err(e) = settings.validate() {
            warn!("Stored radio settings rejected ({}); using defaults", e);
            return Ok(Self::default());
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let frequency = self.frequency.trim();
        if frequency.is_empty() || !frequency.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SettingsError::InvalidRadio(format!(
                "frequency {:?} is not a decimal Hz value",
                self.frequency
            )));
        }
        match frequency.parse::<u64>() {
            Ok(hz) if hz >= MIN_LORA_FREQUENCY_HZ => {}
            _ => {
                return Err(SettingsError::InvalidRadio(format!(
                    "frequency {} Hz is below {} Hz",
                    frequency, MIN_LORA_FREQUENCY_HZ
                )))
            }
        }
        if self.address > MAX_LORA_ADDRESS {
            return Err(SettingsError::InvalidRadio(format!(
                "address {} exceeds {}",
                self.address, MAX_LORA_ADDRESS
            )));
        }
        Ok(())
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        self.validate()?;
        let network_id = self.network_id.to_string();
        let address = self.address.to_string();
        store.put_many(&[
            (keys::LORA_FREQUENCY, self.frequency.trim()),
            (keys::LORA_NETWORK_ID, network_id.as_str()),
            (keys::LORA_ADDRESS, address.as_str()),
        ])
    }

    /// Commands that apply these settings, in the order the modem expects them.
    pub fn configuration_commands(&self) -> Vec<String> {
        vec![
            format!("AT+ADDRESS={}", self.address),
            format!("AT+NETWORKID={}", self.network_id),
            format!("AT+BAND={}", self.frequency.trim()),
        ]
    }
}

/// Station-mode credentials. Absent when no SSID was stored.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl WifiCredentials {
    pub fn load(store: &dyn SettingsStore) -> Result<Option<Self>, SettingsError> {
        let ssid = store.get(keys::WIFI_SSID)?.unwrap_or_default();
        if ssid.trim().is_empty() {
            return Ok(None);
        }
        let password = store.get(keys::WIFI_PASSWORD)?.unwrap_or_default();
        Ok(Some(Self { ssid, password }))
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        if self.ssid.trim().is_empty() {
            return Err(SettingsError::EmptySsid);
        }
        store.put_many(&[
            (keys::WIFI_SSID, self.ssid.as_str()),
            (keys::WIFI_PASSWORD, self.password.as_str()),
        ])
    }

    pub fn clear(store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        store.remove(keys::WIFI_SSID)?;
        store.remove(keys::WIFI_PASSWORD)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(load_calibration(&store).unwrap(), Calibration::default());
        assert_eq!(RadioSettings::load(&store).unwrap(), RadioSettings::default());
        assert!(WifiCredentials::load(&store).unwrap().is_none());
    }

    #[test]
    fn garbage_value_falls_back_per_key() {
        let mut store = MemoryStore::new();
        store.put(keys::NEAR_DISTANCE, "twenty").unwrap();
        store.put(keys::FAR_DISTANCE, "150").unwrap();
        let calibration = load_calibration(&store).unwrap();
        assert_eq!(calibration.near_cm(), DEFAULT_NEAR_CM);
        assert_eq!(calibration.far_cm(), 150);
    }

    #[test]
    fn radio_commands_follow_modem_order() {
        let settings = RadioSettings {
            frequency: "915000000".into(),
            network_id: 18,
            address: 7,
        };
        assert_eq!(
            settings.configuration_commands(),
            vec!["AT+ADDRESS=7", "AT+NETWORKID=18", "AT+BAND=915000000"]
        );
    }

    #[test]
    fn rejects_bad_radio_settings() {
        let mut store = MemoryStore::new();
        let bad_freq = RadioSettings {
            frequency: "868MHz".into(),
            ..RadioSettings::default()
        };
        assert!(matches!(
            bad_freq.save(&mut store),
            Err(SettingsError::InvalidRadio(_))
        ));
        let low_freq = RadioSettings {
            frequency: "43300".into(),
            ..RadioSettings::default()
        };
        assert!(low_freq.validate().is_err());
        let bad_addr = RadioSettings {
            address: 300,
            ..RadioSettings::default()
        };
        assert!(bad_addr.validate().is_err());
        assert!(store.get(keys::LORA_FREQUENCY).unwrap().is_none());
    }

    #[test]
    fn wifi_round_trip_and_clear() {
        let mut store = MemoryStore::new();
        let creds = WifiCredentials {
            ssid: "farm".into(),
            password: "hunter2".into(),
        };
        creds.save(&mut store).unwrap();
        assert_eq!(WifiCredentials::load(&store).unwrap(), Some(creds));
        WifiCredentials::clear(&mut store).unwrap();
        assert!(WifiCredentials::load(&store).unwrap().is_none());

        let empty = WifiCredentials {
            ssid: " ".into(),
            password: String::new(),
        };
        assert!(matches!(empty.save(&mut store), Err(SettingsError::EmptySsid)));
    }

    /// Store whose writes all fail, as a full or read-only disk would.
    struct FullStore(MemoryStore);

    impl SettingsStore for FullStore {
        fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
            self.0.get(key)
        }

        fn put(&mut self, _key: &str, _value: &str) -> Result<(), SettingsError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        fn put_many(&mut self, _entries: &[(&str, &str)]) -> Result<(), SettingsError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
            self.0.remove(key)
        }
    }

    #[test]
    fn failed_write_leaves_previous_values_whole() {
        let mut seeded = MemoryStore::new();
        save_calibration(&mut seeded, 40, 200, 1200.0).unwrap();
        RadioSettings::default().save(&mut seeded).unwrap();
        let mut store = FullStore(seeded);

        assert!(matches!(
            save_calibration(&mut store, 25, 180, 800.0),
            Err(SettingsError::Io(_))
        ));
        let calibration = load_calibration(&store).unwrap();
        assert_eq!(
            (calibration.near_cm(), calibration.far_cm()),
            (40, 200)
        );
        assert_eq!(calibration.capacity_liters(), 1200.0);

        let radio = RadioSettings {
            frequency: "915000000".into(),
            network_id: 9,
            address: 4,
        };
        assert!(radio.save(&mut store).is_err());
        assert_eq!(RadioSettings::load(&store).unwrap(), RadioSettings::default());
    }
}
