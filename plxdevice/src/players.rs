//! Player registry: one record per media engine, keyed by media type.
//!
//! The registry owns each engine's latest timeline cell and the write end
//! of its command channel. The per-engine update pump lives in
//! [`Device::add_player`](crate::Device::add_player); this module only
//! holds the shared table.

use std::sync::Mutex;

use plxproto::container::{Player, Timeline};
use plxproto::{Capability, DeviceInfo, PlayState, PlayerType};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::AddPlayerError;

/// Snapshot of one engine's playback state, authored by the engine.
///
/// `Stopped` implies no media coordinates and a zero position; values
/// violating that are normalised when they enter the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerTimeline {
    pub state: PlayState,
    /// Position in milliseconds since the start of the media.
    pub time: i64,
    /// Media duration in milliseconds.
    pub duration: i64,
    pub container_key: Option<String>,
    pub rating_key: Option<i64>,
    pub key: Option<String>,
}

impl PlayerTimeline {
    /// The idle timeline: stopped, no media.
    pub fn stopped() -> Self {
        Self::default()
    }

    pub(crate) fn normalized(mut self) -> Self {
        if self.state == PlayState::Stopped {
            self.time = 0;
            self.container_key = None;
            self.rating_key = None;
            self.key = None;
        }
        self
    }

    pub(crate) fn to_wire(&self, player_type: PlayerType) -> Timeline {
        Timeline {
            state: self.state.to_string(),
            player_type: player_type.to_string(),
            time: self.time,
            duration: self.duration,
            container_key: self.container_key.clone().unwrap_or_default(),
            rating_key: self.rating_key.unwrap_or_default(),
            key: self.key.clone().unwrap_or_default(),
        }
    }
}

/// Command sent to an engine when a controller asks for something.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Play,
    Pause,
    Stop,
    PlayMedia(PlayMedia),
}

/// Payload of a `playMedia` command: the media document fetched from the
/// Plex server, plus the coordinates the controller asked us to play.
#[derive(Debug, Clone)]
pub struct PlayMedia {
    /// Base URL of the server the container came from.
    pub server_url: String,
    pub container: plxproto::container::MediaContainer,
    pub container_key: String,
    pub key: String,
    pub offset_ms: i64,
}

struct PlayerRecord {
    player_type: PlayerType,
    capabilities: Vec<Capability>,
    latest: Option<PlayerTimeline>,
    commands: mpsc::Sender<PlayerCommand>,
}

/// Table of registered engines, in registration order.
///
/// The mutex is never held across channel sends or network I/O; callers
/// take snapshots and release it.
pub(crate) struct PlayerRegistry {
    records: Mutex<Vec<PlayerRecord>>,
}

impl PlayerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(
        &self,
        player_type: PlayerType,
        capabilities: Vec<Capability>,
        commands: mpsc::Sender<PlayerCommand>,
    ) -> Result<(), AddPlayerError> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.player_type == player_type) {
            return Err(AddPlayerError::DuplicateType(player_type));
        }
        records.push(PlayerRecord {
            player_type,
            capabilities,
            latest: None,
            commands,
        });
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Replaces the engine's latest timeline cell.
    pub(crate) fn update_timeline(&self, player_type: PlayerType, timeline: PlayerTimeline) {
        let timeline = timeline.normalized();
        let mut records = self.records.lock().unwrap();
        if let Some(rec) = records.iter_mut().find(|r| r.player_type == player_type) {
            debug!("timeline {} from {} player", timeline.state, player_type);
            rec.latest = Some(timeline);
        }
    }

    /// Snapshot of the known timelines, in registration order, each tagged
    /// with its engine's type.
    pub(crate) fn collect_timelines(&self) -> Vec<Timeline> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .filter_map(|r| r.latest.as_ref().map(|t| t.to_wire(r.player_type)))
            .collect()
    }

    /// Write end of the engine's command channel, if that type is known.
    pub(crate) fn command_sink(&self, player_type: PlayerType) -> Option<mpsc::Sender<PlayerCommand>> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.player_type == player_type)
            .map(|r| r.commands.clone())
    }

    /// One `Player` element per registered engine, for `/resources`.
    pub(crate) fn describe(&self, info: &DeviceInfo) -> Vec<Player> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .map(|r| Player {
                title: info.name.clone(),
                machine_identifier: info.id.clone(),
                product: info.product.clone(),
                version: info.version.clone(),
                protocol_version: "1".to_string(),
                protocol_capabilities: Capability::join(&r.capabilities),
                device_class: "htpc".to_string(),
            })
            .collect()
    }
}
