//! # plxdevice - Moteur de session du lecteur Plex
//!
//! Cette crate implémente la moitié « device » du protocole de
//! télécommande LAN de Plex : le programme s'annonce comme lecteur
//! compatible sur le réseau local, accepte les commandes d'une ou
//! plusieurs télécommandes (applications mobiles, client web, companion)
//! et leur rediffuse l'état de lecture des moteurs embarqués.
//!
//! ## Fonctionnalités
//!
//! - 📡 Répondeur de découverte multicast (`HELLO`/`BYE`/`M-SEARCH`)
//! - 🎛 API de contrôle HTTP sur un port attribué par l'OS
//! - 🔔 Diffusion des timelines aux télécommandes abonnées (POST) et en
//!   long-poll, avec écho du dernier `commandID` vu de chacune
//! - 🎵 Plusieurs moteurs de lecture, un par type de média
//!
//! ## Utilisation
//!
//! Le moteur de lecture reste extérieur à la crate : il fournit un flux de
//! timelines et consomme un flux de commandes, branchés sur le device par
//! [`Device::add_player`]. Voir l'exemple de [`Device`].

mod api;
mod controllers;
mod device;
mod discovery;
mod errors;
mod players;

pub use device::Device;
pub use errors::{AddPlayerError, PlayMediaError, StartError};
pub use players::{PlayMedia, PlayerCommand, PlayerTimeline};

pub use plxproto::{Capability, DeviceInfo, PlayState, PlayerType};
