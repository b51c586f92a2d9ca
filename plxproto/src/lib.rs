//! # plxproto - Formats réseau du protocole Plex
//!
//! Cette crate définit les deux formats d'échange du protocole de
//! télécommande Plex côté lecteur :
//!
//! - les datagrammes de découverte orientés ligne ([`announce`]),
//! - les documents XML `MediaContainer` ([`container`]).
//!
//! ## Fonctionnalités
//!
//! - ✅ Encodage/décodage des datagrammes `HELLO`/`BYE`/`M-SEARCH`/`200 OK`
//! - ✅ Documents XML à attributs avec tolérance aux champs inconnus
//! - ✅ Vocabulaires du protocole : types de lecteur, états, capacités

pub mod announce;
pub mod container;

mod identity;

pub use identity::DeviceInfo;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Type de média pris en charge par un lecteur.
///
/// Sert de clé de routage : un seul lecteur par type est enregistré sur le
/// device, et chaque `Timeline` sortante est étiquetée avec ce type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerType {
    Music,
    Photo,
    Video,
}

impl PlayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerType::Music => "music",
            PlayerType::Photo => "photo",
            PlayerType::Video => "video",
        }
    }
}

impl fmt::Display for PlayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Erreur retournée pour un type de lecteur hors vocabulaire.
#[derive(Debug, Error)]
#[error("unknown player type: {0}")]
pub struct UnknownPlayerType(pub String);

impl FromStr for PlayerType {
    type Err = UnknownPlayerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "music" => Ok(PlayerType::Music),
            "photo" => Ok(PlayerType::Photo),
            "video" => Ok(PlayerType::Video),
            other => Err(UnknownPlayerType(other.to_string())),
        }
    }
}

/// État de lecture d'un lecteur à un instant donné.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Paused,
    Playing,
    Buffering,
    Error,
}

impl PlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayState::Stopped => "stopped",
            PlayState::Paused => "paused",
            PlayState::Playing => "playing",
            PlayState::Buffering => "buffering",
            PlayState::Error => "error",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacité annoncée par un lecteur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Timeline,
    Playback,
    Navigation,
    Mirror,
    Playqueues,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Timeline => "timeline",
            Capability::Playback => "playback",
            Capability::Navigation => "navigation",
            Capability::Mirror => "mirror",
            Capability::Playqueues => "playqueues",
        }
    }

    /// Joint une liste de capacités au format attendu sur le fil (`a,b,c`).
    pub fn join(caps: &[Capability]) -> String {
        caps.iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_type_round_trip() {
        for t in [PlayerType::Music, PlayerType::Photo, PlayerType::Video] {
            assert_eq!(t.as_str().parse::<PlayerType>().unwrap(), t);
        }
        assert!("movie".parse::<PlayerType>().is_err());
    }

    #[test]
    fn test_capability_join() {
        assert_eq!(
            Capability::join(&[Capability::Timeline, Capability::Playback]),
            "timeline,playback"
        );
        assert_eq!(Capability::join(&[]), "");
    }
}
