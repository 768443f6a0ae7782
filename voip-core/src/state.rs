//! Persistent proxy-capability state (spec §6.1). Remembers whether a
//! SOCKS5 proxy has been observed to support UDP/TCP so the next call can
//! skip the availability probe. Grounded on the teacher's `serde_json`
//! config-snapshot style (`config.rs` in this crate uses the same
//! immutable-snapshot-at-construction idiom); this module is the one piece
//! that's read and written across calls, so it goes through a small trait
//! rather than being folded into `EngineConfig`.

use std::io;

use serde::{Deserialize, Serialize};

use crate::socket::ProxyCapabilities;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProxyStateWire {
    server: String,
    udp: bool,
    tcp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentStateWire {
    ver: u32,
    proxy: Option<ProxyStateWire>,
}

#[derive(Debug, Clone, Default)]
pub struct PersistentState {
    pub proxy_server: Option<String>,
    pub proxy_capabilities: Option<ProxyCapabilities>,
}

impl PersistentState {
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        let wire: PersistentStateWire = serde_json::from_str(data)?;
        Ok(match wire.proxy {
            Some(p) => PersistentState {
                proxy_server: Some(p.server),
                proxy_capabilities: Some(ProxyCapabilities { udp: p.udp, tcp: p.tcp }),
            },
            None => PersistentState::default(),
        })
    }

    pub fn to_json(&self) -> String {
        let wire = PersistentStateWire {
            ver: CURRENT_VERSION,
            proxy: match (&self.proxy_server, self.proxy_capabilities) {
                (Some(server), Some(caps)) => Some(ProxyStateWire { server: server.clone(), udp: caps.udp, tcp: caps.tcp }),
                _ => None,
            },
        };
        serde_json::to_string(&wire).expect("PersistentStateWire always serializes")
    }

    pub fn remember_proxy(&mut self, server: String, capabilities: ProxyCapabilities) {
        self.proxy_server = Some(server);
        self.proxy_capabilities = Some(capabilities);
    }

    /// Returns cached capabilities only if they were recorded for this exact
    /// proxy server; a different `server` string means a fresh probe is
    /// still needed.
    pub fn capabilities_for(&self, server: &str) -> Option<ProxyCapabilities> {
        if self.proxy_server.as_deref() == Some(server) {
            self.proxy_capabilities
        } else {
            None
        }
    }
}

/// Where a `PersistentState` is loaded from and saved to between calls.
/// Implemented by a file-backed store in production, an in-memory one in
/// tests.
pub trait PersistentStateStore {
    fn load(&self) -> io::Result<PersistentState>;
    fn save(&self, state: &PersistentState) -> io::Result<()>;
}

pub struct FileStateStore {
    path: std::path::PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        FileStateStore { path: path.into() }
    }
}

impl PersistentStateStore for FileStateStore {
    fn load(&self) -> io::Result<PersistentState> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => PersistentState::from_json(&contents).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PersistentState::default()),
            Err(e) => Err(e),
        }
    }

    fn save(&self, state: &PersistentState) -> io::Result<()> {
        std::fs::write(&self.path, state.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut state = PersistentState::default();
        state.remember_proxy("proxy.example:1080".to_string(), ProxyCapabilities { udp: false, tcp: true });
        let json = state.to_json();
        let parsed = PersistentState::from_json(&json).unwrap();
        assert_eq!(parsed.proxy_server.as_deref(), Some("proxy.example:1080"));
        assert_eq!(parsed.capabilities_for("proxy.example:1080"), Some(ProxyCapabilities { udp: false, tcp: true }));
    }

    #[test]
    fn capabilities_are_scoped_to_the_recorded_server() {
        let mut state = PersistentState::default();
        state.remember_proxy("a:1080".to_string(), ProxyCapabilities { udp: true, tcp: true });
        assert!(state.capabilities_for("b:1080").is_none());
    }

    #[test]
    fn empty_document_parses_to_default_state() {
        let state = PersistentState::from_json(r#"{"ver":1}"#).unwrap();
        assert!(state.proxy_server.is_none());
    }
}
