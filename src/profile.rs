//! Account profiles and the sequencer connection state.
//!
//! A profile is a flat JSON object stored as `<account_dir>/<name>.json`. The special
//! file `default.json` only names the profile loaded at start-up:
//!
//! ```json
//! { "default_account_name": "lab" }
//! ```
//!
//! [`ProfileStore`] lists, loads and saves profiles and keeps track of the current one.
//! [`ConnectionController`] tracks whether the board named by the current profile's
//! `ip_address` is connected. Both publish their state changes on an [`EventBus`]; they
//! never touch any user interface.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AppResult, SweepError};
use crate::events::{AppEvent, ConnectionStatus, EventBus};

/// Name of the profile that can never be overwritten.
pub const DEFAULT_PROFILE: &str = "default";

const DEFAULT_KEY: &str = "default_account_name";
const NAME_KEY: &str = "account_name";

/// One account's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    name: String,
    settings: BTreeMap<String, Value>,
}

impl Profile {
    /// Empty profile called `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: BTreeMap::new(),
        }
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Editable settings, without the bookkeeping keys.
    pub fn settings(&self) -> &BTreeMap<String, Value> {
        &self.settings
    }

    /// Setting `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Set `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.settings.insert(key.to_string(), value.into());
    }

    /// `ip_address` of the board, as a string.
    pub fn ip_address(&self) -> AppResult<String> {
        match self.settings.get("ip_address") {
            Some(Value::String(ip)) => Ok(ip.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(SweepError::Profile(format!(
                "profile '{}' has no ip_address",
                self.name
            ))),
        }
    }

    fn from_json(name: &str, json: BTreeMap<String, Value>) -> Self {
        let settings = json
            .into_iter()
            .filter(|(k, _)| k != DEFAULT_KEY && k != NAME_KEY)
            .collect();
        Self {
            name: name.to_string(),
            settings,
        }
    }
}

/// Profiles on disk plus the current selection.
pub struct ProfileStore {
    dir: PathBuf,
    bus: EventBus,
    current: Option<Profile>,
}

impl ProfileStore {
    /// Store reading and writing profiles in `dir`.
    pub fn new(dir: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            dir: dir.into(),
            bus,
            current: None,
        }
    }

    /// Profile folder.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Profile loaded last, if any.
    pub fn current(&self) -> Option<&Profile> {
        self.current.as_ref()
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Names of every `*.json` file in the account directory, sorted.
    pub fn list(&self) -> AppResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a profile without making it current.
    pub fn read(&self, name: &str) -> AppResult<Profile> {
        let path = self.path_of(name);
        let text = fs::read_to_string(&path)
            .map_err(|e| SweepError::Profile(format!("reading {}: {e}", path.display())))?;
        let json: BTreeMap<String, Value> = serde_json::from_str(&text)?;
        Ok(Profile::from_json(name, json))
    }

    /// Make `name` the current profile.
    pub fn load(&mut self, name: &str) -> AppResult<&Profile> {
        info!(account = name, "Loading account");
        let profile = self.read(name)?;
        self.bus.publish(AppEvent::AccountLoaded(name.to_string()));
        Ok(self.current.insert(profile))
    }

    /// Name stored in `default.json`.
    pub fn default_name(&self) -> AppResult<String> {
        let text = fs::read_to_string(self.path_of(DEFAULT_PROFILE))?;
        let json: BTreeMap<String, Value> = serde_json::from_str(&text)?;
        match json.get(DEFAULT_KEY) {
            Some(Value::String(name)) => Ok(name.clone()),
            _ => Err(SweepError::Profile(format!(
                "default.json has no string '{DEFAULT_KEY}'"
            ))),
        }
    }

    /// Load the profile named in `default.json`.
    pub fn load_default(&mut self) -> AppResult<&Profile> {
        let name = self.default_name()?;
        self.load(&name)
    }

    /// Replace the current profile's settings in memory.
    pub fn update_current(&mut self, key: &str, value: impl Into<Value>) -> AppResult<()> {
        match self.current.as_mut() {
            Some(profile) => {
                profile.set(key, value);
                Ok(())
            }
            None => Err(SweepError::Profile("no account loaded".into())),
        }
    }

    /// Write the current profile back under its own name.
    pub fn save(&mut self) -> AppResult<PathBuf> {
        let name = self.current_name()?;
        self.save_as(&name)
    }

    /// Write the current profile under `new_name`.
    ///
    /// `default` is refused. Saving under a different name publishes
    /// [`AppEvent::AccountCreated`] and loads the new profile.
    pub fn save_as(&mut self, new_name: &str) -> AppResult<PathBuf> {
        if new_name == DEFAULT_PROFILE {
            warn!("Cannot overwrite default account");
            return Err(SweepError::Profile("cannot overwrite default account".into()));
        }
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| SweepError::Profile("no account loaded".into()))?;
        let mut json = current.settings.clone();
        json.insert(NAME_KEY.to_string(), Value::String(new_name.to_string()));

        info!(account = new_name, "Saving account");
        fs::create_dir_all(&self.dir)?;
        let path = self.path_of(new_name);
        fs::write(&path, serde_json::to_string_pretty(&json)?)?;

        if current.name != new_name {
            self.bus.publish(AppEvent::AccountCreated(new_name.to_string()));
            self.load(new_name)?;
        }
        Ok(path)
    }

    /// Record the current profile as the start-up default.
    pub fn set_default(&self) -> AppResult<()> {
        let name = self.current_name()?;
        info!(account = %name, "Setting default account");
        let path = self.path_of(DEFAULT_PROFILE);
        let mut json: BTreeMap<String, Value> = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        json.insert(DEFAULT_KEY.to_string(), Value::String(name));
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_string_pretty(&json)?)?;
        Ok(())
    }

    fn current_name(&self) -> AppResult<String> {
        self.current
            .as_ref()
            .map(|p| p.name.clone())
            .ok_or_else(|| SweepError::Profile("no account loaded".into()))
    }
}

/// Connection state as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection requested
    Disconnected,
    /// Waiting for the connection owner to report on this address
    Connecting(String),
    /// Board reachable at this address
    Connected(String),
    /// The last attempt at this address failed
    Failed(String),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "not connected"),
            ConnectionState::Connecting(ip) => write!(f, "connecting to {ip}"),
            ConnectionState::Connected(ip) => write!(f, "connected at {ip}"),
            ConnectionState::Failed(ip) => write!(f, "connection to {ip} failed"),
        }
    }
}

/// Tracks the board connection requested from a profile.
///
/// The controller never opens a socket: it publishes [`AppEvent::DeviceConnected`] with
/// the address and waits for whoever owns the link to report back through
/// [`ConnectionController::handle_connection_update`].
pub struct ConnectionController {
    bus: EventBus,
    state: ConnectionState,
}

impl ConnectionController {
    /// Disconnected controller publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Whether the board reported a successful connection.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Request a connection to `profile`'s `ip_address`. Returns `false` when already
    /// connected.
    pub fn connect(&mut self, profile: &Profile) -> AppResult<bool> {
        if self.is_connected() {
            warn!("Sequencer is already connected");
            return Ok(false);
        }
        let ip = profile.ip_address()?;
        info!(ip_address = %ip, "Trying to connect");
        self.state = ConnectionState::Connecting(ip.clone());
        self.bus.publish(AppEvent::DeviceConnected(ip));
        Ok(true)
    }

    /// Drop the connection. Returns `false` when nothing was connected.
    pub fn disconnect(&mut self) -> bool {
        let ConnectionState::Connected(ip) = &self.state else {
            warn!("Sequencer is already disconnected");
            return false;
        };
        info!(ip_address = %ip, "Disconnecting");
        self.state = ConnectionState::Disconnected;
        self.bus.publish(AppEvent::DeviceDisconnected);
        true
    }

    /// Result of a connection attempt reported by the link owner.
    pub fn handle_connection_update(&mut self, ip_address: &str, status: ConnectionStatus) {
        self.state = match status {
            ConnectionStatus::Success => {
                info!(ip_address, "Connected");
                ConnectionState::Connected(ip_address.to_string())
            }
            ConnectionStatus::Failure => {
                warn!(ip_address, "Connection failed");
                ConnectionState::Failed(ip_address.to_string())
            }
        };
        self.bus.publish(AppEvent::ConnectionUpdated {
            ip_address: ip_address.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed(dir: &Path) {
        fs::write(
            dir.join("default.json"),
            r#"{"default_account_name": "lab"}"#,
        )
        .unwrap();
        fs::write(
            dir.join("lab.json"),
            r#"{"account_name": "lab", "ip_address": "192.168.1.10", "outer_folder": "Z:/data"}"#,
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "not a profile").unwrap();
    }

    #[test]
    fn lists_and_loads_default() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut store = ProfileStore::new(dir.path(), bus);

        assert_eq!(store.list().unwrap(), vec!["default", "lab"]);
        let profile = store.load_default().unwrap();
        assert_eq!(profile.name(), "lab");
        assert_eq!(profile.ip_address().unwrap(), "192.168.1.10");
        assert!(profile.get("account_name").is_none());
        assert_eq!(rx.try_recv().unwrap(), AppEvent::AccountLoaded("lab".into()));
    }

    #[test]
    fn save_as_default_is_refused() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let mut store = ProfileStore::new(dir.path(), EventBus::default());
        store.load("lab").unwrap();

        assert!(matches!(store.save_as("default"), Err(SweepError::Profile(_))));
        assert_eq!(store.default_name().unwrap(), "lab");
    }

    #[test]
    fn save_as_creates_and_loads_copy() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let bus = EventBus::default();
        let mut store = ProfileStore::new(dir.path(), bus.clone());
        store.load("lab").unwrap();
        store.update_current("ip_address", "10.0.0.2").unwrap();
        let mut rx = bus.subscribe();

        store.save_as("lab copy").unwrap();

        assert_eq!(store.current().unwrap().name(), "lab copy");
        assert_eq!(rx.try_recv().unwrap(), AppEvent::AccountCreated("lab copy".into()));
        assert_eq!(rx.try_recv().unwrap(), AppEvent::AccountLoaded("lab copy".into()));
        let saved = store.read("lab copy").unwrap();
        assert_eq!(saved.ip_address().unwrap(), "10.0.0.2");
        let raw: BTreeMap<String, Value> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("lab copy.json")).unwrap())
                .unwrap();
        assert_eq!(raw["account_name"], "lab copy");
    }

    #[test]
    fn saving_under_same_name_emits_nothing() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let bus = EventBus::default();
        let mut store = ProfileStore::new(dir.path(), bus.clone());
        store.load("lab").unwrap();
        let mut rx = bus.subscribe();

        store.save().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_default_rewrites_default_json() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let mut store = ProfileStore::new(dir.path(), EventBus::default());
        store.load("lab").unwrap();
        store.save_as("cooldown9").unwrap();
        store.set_default().unwrap();
        assert_eq!(store.default_name().unwrap(), "cooldown9");
    }

    #[test]
    fn connection_follows_updates() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut conn = ConnectionController::new(bus);
        let mut profile = Profile::new("lab");
        profile.set("ip_address", "192.168.1.10");

        assert!(!conn.disconnect());
        assert!(conn.connect(&profile).unwrap());
        assert_eq!(conn.state().to_string(), "connecting to 192.168.1.10");
        assert_eq!(rx.try_recv().unwrap(), AppEvent::DeviceConnected("192.168.1.10".into()));

        conn.handle_connection_update("192.168.1.10", ConnectionStatus::Failure);
        assert!(!conn.is_connected());
        assert_eq!(conn.state().to_string(), "connection to 192.168.1.10 failed");

        conn.handle_connection_update("192.168.1.10", ConnectionStatus::Success);
        assert!(conn.is_connected());
        assert!(!conn.connect(&profile).unwrap());

        assert!(conn.disconnect());
        assert_eq!(conn.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn connect_needs_an_address() {
        let mut conn = ConnectionController::new(EventBus::default());
        assert!(conn.connect(&Profile::new("empty")).is_err());
        assert_eq!(conn.state(), &ConnectionState::Disconnected);
    }
}
