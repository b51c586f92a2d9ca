//! # Datagrammes de découverte
//!
//! Le protocole de découverte Plex est orienté ligne, dans un style
//! « HTTP 0.9 » : une ligne de requête, puis des lignes `Clé: Valeur`,
//! séparées par un unique `\n` (pas de CRLF). Quatre messages existent :
//!
//! - `HELLO * HTTP/1.0` : annonce l'arrivée du device (multicast, port 32413)
//! - `BYE * HTTP/1.0` : annonce son départ (même destination)
//! - `M-SEARCH * HTTP/1.0` : requête de recherche d'une télécommande
//! - `HTTP/1.0 200 OK` : réponse unicast à une recherche
//!
//! Le décodage est tolérant : les clés inconnues sont conservées dans
//! l'ordre ; une ligne sans séparateur `:` invalide tout le datagramme.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

use crate::DeviceInfo;

/// Groupe multicast de la découverte Plex.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 250);

/// Port UDP sur lequel le device écoute les recherches (`M-SEARCH`).
pub const DEVICE_SEARCH_PORT: u16 = 32412;

/// Port UDP de destination des annonces `HELLO`/`BYE`.
pub const DEVICE_ANNOUNCE_PORT: u16 = 32413;

/// Taille maximale d'un datagramme de découverte.
pub const MAX_DATAGRAM: usize = 1024;

/// Nature d'un datagramme de découverte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// Annonce d'arrivée du device.
    Hello,
    /// Annonce de départ du device.
    Bye,
    /// Recherche émise par une télécommande.
    Search,
    /// Réponse unicast à une recherche.
    Ok,
}

impl DatagramKind {
    /// Première ligne du datagramme pour cette nature de message.
    pub fn line(&self) -> &'static str {
        match self {
            DatagramKind::Hello => "HELLO * HTTP/1.0",
            DatagramKind::Bye => "BYE * HTTP/1.0",
            DatagramKind::Search => "M-SEARCH * HTTP/1.0",
            DatagramKind::Ok => "HTTP/1.0 200 OK",
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        match line {
            "HELLO * HTTP/1.0" => Some(DatagramKind::Hello),
            "BYE * HTTP/1.0" => Some(DatagramKind::Bye),
            "M-SEARCH * HTTP/1.0" => Some(DatagramKind::Search),
            "HTTP/1.0 200 OK" => Some(DatagramKind::Ok),
            _ => None,
        }
    }
}

impl fmt::Display for DatagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line())
    }
}

/// Erreur de décodage d'un datagramme. L'appelant journalise et ignore le
/// datagramme fautif sans changer d'état.
#[derive(Debug, Error)]
pub enum DatagramError {
    #[error("datagram is not valid UTF-8")]
    InvalidUtf8,

    #[error("empty datagram")]
    Empty,

    #[error("unrecognised request line: {0:?}")]
    UnrecognisedLine(String),

    #[error("malformed field line: {0:?}")]
    MalformedField(String),
}

/// Un datagramme de découverte décodé ou en cours de construction.
///
/// Les champs sont conservés dans leur ordre d'apparition, clés inconnues
/// comprises, pour que l'encodage soit déterministe et qu'un aller-retour
/// encode/décode soit sans perte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub kind: DatagramKind,
    fields: Vec<(String, String)>,
}

impl Datagram {
    pub fn new(kind: DatagramKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    /// Construit le datagramme d'annonce standard du device : identité
    /// complète plus le port TCP de l'API de contrôle.
    pub fn for_device(kind: DatagramKind, info: &DeviceInfo, api_port: u16) -> Self {
        let mut msg = Self::new(kind);
        msg.push("Content-Type", "plex/media-player");
        msg.push("Name", &info.name);
        msg.push("Port", api_port.to_string());
        msg.push("Product", &info.product);
        msg.push("Protocol", "plex");
        msg.push("Protocol-Version", "1");
        msg.push("Resource-Identifier", &info.id);
        msg.push("Version", &info.version);
        msg
    }

    /// Ajoute un champ en fin de message.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Valeur du premier champ portant cette clé.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Tous les champs, dans l'ordre du message.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Encode le datagramme au format fil (séparateur `\n`, sans CRLF).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::from(self.kind.line());
        for (k, v) in &self.fields {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
        }
        out.into_bytes()
    }

    /// Décode un datagramme reçu du réseau.
    ///
    /// # Errors
    ///
    /// Toute ligne de champ sans `:` invalide le datagramme entier, de même
    /// qu'une première ligne hors des quatre messages connus.
    pub fn parse(bytes: &[u8]) -> Result<Self, DatagramError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DatagramError::InvalidUtf8)?;
        let mut lines = text.split('\n');

        let first = lines.next().ok_or(DatagramError::Empty)?.trim_end_matches('\r');
        if first.is_empty() {
            return Err(DatagramError::Empty);
        }
        let kind = DatagramKind::from_line(first)
            .ok_or_else(|| DatagramError::UnrecognisedLine(first.to_string()))?;

        let mut msg = Self::new(kind);
        for line in lines {
            let line = line.trim_end_matches('\r');
            // Une ligne vide termine le message.
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| DatagramError::MalformedField(line.to_string()))?;
            msg.push(key, value.trim());
        }
        Ok(msg)
    }
}

impl FromStr for Datagram {
    type Err = DatagramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}
