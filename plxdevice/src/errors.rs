use std::io;

use plxproto::PlayerType;
use thiserror::Error;

/// Erreurs fatales du démarrage du device.
///
/// Toute variante implique que les services déjà liés ont été relâchés
/// avant le retour de l'erreur.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("cannot start: no players added")]
    NoPlayers,

    #[error("error creating api socket: {0}")]
    ApiBind(#[source] io::Error),

    #[error("error creating discovery socket: {0}")]
    DiscoveryBind(#[source] io::Error),

    #[error("error sending HELLO: {0}")]
    Hello(#[source] io::Error),
}

/// Rejet d'un enregistrement de lecteur.
#[derive(Debug, Error)]
pub enum AddPlayerError {
    /// Un lecteur de ce type est déjà enregistré ; le type est la clé de
    /// routage et doit rester unique.
    #[error("a {0} player is already registered")]
    DuplicateType(PlayerType),
}

/// Échec de préparation d'une commande `playMedia`.
///
/// Absorbée par le handler : la commande est ignorée et la requête répond
/// 200 quand même.
#[derive(Debug, Error)]
pub enum PlayMediaError {
    #[error("error fetching media container from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error decoding media container from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: quick_xml::de::DeError,
    },
}
