//! Per-room role keys and share links
//!
//! Each room has a random 256-bit player key and spectator key. Keys travel
//! in the URL fragment of a share link and are persisted client-side in a
//! JSON key store.
//!
//! The room signing key is an Ed25519 key whose seed is
//! `HKDF-SHA256(ikm = player key, salt = room id)`. Anyone holding the player
//! key can therefore recompute the public half for a spectator link without
//! storing it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::{TabletopError, TabletopResult};
use crate::types::RoomId;

const SIGNING_KEY_INFO: &[u8] = b"tabletop room signing key v1";

/// A 256-bit role key, hex encoded when stored or shared
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleKey([u8; 32]);

impl RoleKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(raw: &str) -> TabletopResult<Self> {
        let bytes = hex::decode(raw.trim())
            .map_err(|e| TabletopError::Crypto(format!("role key is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TabletopError::Crypto("role key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "RoleKey({}…)", &self.to_hex()[..8])
    }
}

impl TryFrom<String> for RoleKey {
    type Error = TabletopError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<RoleKey> for String {
    fn from(key: RoleKey) -> Self {
        key.to_hex()
    }
}

/// Derive the room signing key from the player key
pub fn derive_room_signing_key(player_key: &RoleKey, room_id: &RoomId) -> TabletopResult<SigningKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(room_id.as_str().as_bytes()), player_key.as_bytes());
    let mut seed = [0u8; 32];
    hkdf.expand(SIGNING_KEY_INFO, &mut seed)
        .map_err(|e| TabletopError::Crypto(format!("hkdf expand failed: {e}")))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Public half of the room signing key, base64url encoded
pub fn room_signing_public_key(player_key: &RoleKey, room_id: &RoomId) -> TabletopResult<String> {
    let signing = derive_room_signing_key(player_key, room_id)?;
    Ok(URL_SAFE_NO_PAD.encode(signing.verifying_key().to_bytes()))
}

/// Sign `message` as the room; returns a base64url signature
pub fn sign_as_room(player_key: &RoleKey, room_id: &RoomId, message: &[u8]) -> TabletopResult<String> {
    let signing = derive_room_signing_key(player_key, room_id)?;
    Ok(URL_SAFE_NO_PAD.encode(signing.sign(message).to_bytes()))
}

/// Check a room signature against the public key from a spectator link
pub fn verify_room_signature(public_key: &str, message: &[u8], signature: &str) -> TabletopResult<()> {
    let public: [u8; 32] = URL_SAFE_NO_PAD
        .decode(public_key)
        .map_err(|e| TabletopError::Crypto(format!("bad public key encoding: {e}")))?
        .try_into()
        .map_err(|_| TabletopError::Crypto("public key must be 32 bytes".into()))?;
    let verifying = VerifyingKey::from_bytes(&public)
        .map_err(|e| TabletopError::Crypto(format!("invalid public key: {e}")))?;
    let signature: [u8; 64] = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| TabletopError::Crypto(format!("bad signature encoding: {e}")))?
        .try_into()
        .map_err(|_| TabletopError::Crypto("signature must be 64 bytes".into()))?;
    verifying
        .verify(message, &Signature::from_bytes(&signature))
        .map_err(|e| TabletopError::Crypto(format!("room signature rejected: {e}")))
}

/// Key material held for one room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_key: Option<RoleKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectator_key: Option<RoleKey>,
    /// Room signing public key, when known without the player key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_signing_public_key: Option<String>,
}

impl RoomKeys {
    /// Fresh player and spectator keys for a new room
    pub fn generate() -> Self {
        Self {
            player_key: Some(RoleKey::generate()),
            spectator_key: Some(RoleKey::generate()),
            room_signing_public_key: None,
        }
    }

    /// Stored public key, or one derived from the player key
    pub fn signing_public_key(&self, room_id: &RoomId) -> TabletopResult<Option<String>> {
        if let Some(stored) = &self.room_signing_public_key {
            return Ok(Some(stored.clone()));
        }
        self.player_key
            .as_ref()
            .map(|key| room_signing_public_key(key, room_id))
            .transpose()
    }

    pub fn player_link(&self) -> Option<RoleLink> {
        self.player_key.clone().map(|key| RoleLink::Player { key })
    }

    pub fn spectator_link(&self, room_id: &RoomId) -> TabletopResult<Option<RoleLink>> {
        let Some(key) = self.spectator_key.clone() else {
            return Ok(None);
        };
        Ok(Some(RoleLink::Spectator {
            key,
            room_signing_public_key: self.signing_public_key(room_id)?,
        }))
    }

    /// Fold a link received from someone else into the stored keys
    pub fn absorb(&mut self, link: RoleLink) {
        match link {
            RoleLink::Player { key } => self.player_key = Some(key),
            RoleLink::Spectator {
                key,
                room_signing_public_key,
            } => {
                self.spectator_key = Some(key);
                if room_signing_public_key.is_some() {
                    self.room_signing_public_key = room_signing_public_key;
                }
            }
        }
    }
}

/// Role carried by a share link fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleLink {
    /// `#k=<playerKey>`
    Player { key: RoleKey },
    /// `#s=<spectatorKey>&rk=<roomSigningPublicKey>`
    Spectator {
        key: RoleKey,
        room_signing_public_key: Option<String>,
    },
}

impl RoleLink {
    pub fn to_fragment(&self) -> String {
        match self {
            RoleLink::Player { key } => format!("#k={}", key.to_hex()),
            RoleLink::Spectator {
                key,
                room_signing_public_key: Some(rk),
            } => format!("#s={}&rk={rk}", key.to_hex()),
            RoleLink::Spectator { key, .. } => format!("#s={}", key.to_hex()),
        }
    }

    /// Parse a fragment, with or without the leading `#`
    pub fn parse_fragment(fragment: &str) -> TabletopResult<Self> {
        let fragment = fragment.trim().trim_start_matches('#');
        let mut params: BTreeMap<&str, &str> = BTreeMap::new();
        for pair in fragment.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| TabletopError::InvalidLink(format!("malformed parameter {pair:?}")))?;
            params.insert(name, value);
        }

        match (params.get("k"), params.get("s")) {
            (Some(_), Some(_)) => Err(TabletopError::InvalidLink(
                "link carries both a player and a spectator key".into(),
            )),
            (Some(k), None) => Ok(RoleLink::Player {
                key: RoleKey::from_hex(k)?,
            }),
            (None, Some(s)) => Ok(RoleLink::Spectator {
                key: RoleKey::from_hex(s)?,
                room_signing_public_key: params
                    .get("rk")
                    .filter(|rk| !rk.is_empty())
                    .map(|rk| rk.to_string()),
            }),
            (None, None) => Err(TabletopError::InvalidLink("link carries no role key".into())),
        }
    }
}

/// JSON file of room keys, keyed by room id
#[derive(Debug)]
pub struct RoomKeyStore {
    path: PathBuf,
    rooms: BTreeMap<RoomId, RoomKeys>,
}

impl RoomKeyStore {
    /// Open the store; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> TabletopResult<Self> {
        let path = path.as_ref().to_path_buf();
        let rooms = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened room key store");
        Ok(Self { path, rooms })
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&RoomKeys> {
        self.rooms.get(room_id)
    }

    /// Keys for `room_id`, generating and saving new ones if absent
    pub fn get_or_generate(&mut self, room_id: &RoomId) -> TabletopResult<RoomKeys> {
        if let Some(keys) = self.rooms.get(room_id) {
            return Ok(keys.clone());
        }
        let keys = RoomKeys::generate();
        self.rooms.insert(room_id.clone(), keys.clone());
        self.save()?;
        info!(%room_id, "Generated room keys");
        Ok(keys)
    }

    pub fn insert(&mut self, room_id: RoomId, keys: RoomKeys) -> TabletopResult<()> {
        self.rooms.insert(room_id, keys);
        self.save()
    }

    pub fn remove(&mut self, room_id: &RoomId) -> TabletopResult<bool> {
        let removed = self.rooms.remove(room_id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&RoomId, &RoomKeys)> {
        self.rooms.iter()
    }

    fn save(&self) -> TabletopResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.rooms)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn room() -> RoomId {
        RoomId::from("r1")
    }

    #[test]
    fn test_role_key_hex_round_trip_and_length() {
        let key = RoleKey::generate();
        assert_eq!(key.to_hex().len(), 64);
        assert_eq!(RoleKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(RoleKey::from_hex("abcd").is_err());
        assert!(RoleKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = RoleKey::generate();
        assert!(!format!("{key:?}").contains(&key.to_hex()));
    }

    #[test]
    fn test_signing_key_is_deterministic_per_room() {
        let key = RoleKey::generate();
        let a = room_signing_public_key(&key, &room()).unwrap();
        assert_eq!(a, room_signing_public_key(&key, &room()).unwrap());
        assert_ne!(a, room_signing_public_key(&key, &RoomId::from("r2")).unwrap());
    }

    #[test]
    fn test_spectator_can_verify_room_signature() {
        let keys = RoomKeys::generate();
        let player_key = keys.player_key.clone().unwrap();
        let link = keys.spectator_link(&room()).unwrap().unwrap();
        let RoleLink::Spectator {
            room_signing_public_key: Some(rk),
            ..
        } = RoleLink::parse_fragment(&link.to_fragment()).unwrap()
        else {
            panic!("expected spectator link with rk");
        };
        let sig = sign_as_room(&player_key, &room(), b"state-hash").unwrap();
        verify_room_signature(&rk, b"state-hash", &sig).unwrap();
        assert!(verify_room_signature(&rk, b"other", &sig).is_err());
    }

    #[test]
    fn test_fragment_parsing() {
        let key = RoleKey::generate();
        let player = RoleLink::Player { key: key.clone() };
        assert_eq!(player.to_fragment(), format!("#k={}", key.to_hex()));
        assert_eq!(RoleLink::parse_fragment(&player.to_fragment()).unwrap(), player);

        let bare = RoleLink::parse_fragment(&format!("s={}", key.to_hex())).unwrap();
        assert_eq!(
            bare,
            RoleLink::Spectator {
                key: key.clone(),
                room_signing_public_key: None,
            }
        );

        assert!(RoleLink::parse_fragment("#").is_err());
        assert!(RoleLink::parse_fragment("#k=zz").is_err());
        assert!(RoleLink::parse_fragment(&format!("#k={0}&s={0}", key.to_hex())).is_err());
        assert!(RoleLink::parse_fragment("#garbage").is_err());
    }

    #[test]
    fn test_store_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("rooms.json");
        let keys = {
            let mut store = RoomKeyStore::open(&path).unwrap();
            store.get_or_generate(&room()).unwrap()
        };
        let mut store = RoomKeyStore::open(&path).unwrap();
        assert_eq!(store.get(&room()), Some(&keys));
        assert_eq!(store.get_or_generate(&room()).unwrap(), keys);
        assert!(store.remove(&room()).unwrap());
        assert!(RoomKeyStore::open(&path).unwrap().get(&room()).is_none());
    }

    #[test]
    fn test_absorb_spectator_link_keeps_public_key() {
        let mut keys = RoomKeys {
            player_key: None,
            spectator_key: None,
            room_signing_public_key: None,
        };
        let spectator = RoleKey::generate();
        keys.absorb(RoleLink::Spectator {
            key: spectator.clone(),
            room_signing_public_key: Some("pk".into()),
        });
        assert_eq!(keys.spectator_key, Some(spectator));
        assert_eq!(keys.signing_public_key(&room()).unwrap(), Some("pk".into()));
        assert!(keys.player_link().is_none());
    }
}
