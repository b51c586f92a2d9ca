//! # Documents `MediaContainer`
//!
//! Toutes les stanzas XML du protocole partagent la même racine
//! `MediaContainer`, avec des éléments à attributs uniquement. Deux règles
//! gouvernent le format :
//!
//! - au décodage, les attributs inconnus sont ignorés (le fil peut évoluer) ;
//! - à l'encodage, les attributs vides (chaîne vide, zéro) sont omis.

use serde::{Deserialize, Serialize};

use crate::PlayerType;

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Racine de tous les documents du protocole.
///
/// Selon le contexte, le conteneur porte des `Timeline` (notifications
/// d'état), des `Player` (réponse `/resources`) ou les collections de
/// médias renvoyées par un serveur Plex (`Track`, `Photo`, `Video`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "MediaContainer")]
pub struct MediaContainer {
    #[serde(rename = "@commandID", default, skip_serializing_if = "String::is_empty")]
    pub command_id: String,

    #[serde(rename = "@machineIdentifier", default, skip_serializing_if = "String::is_empty")]
    pub machine_identifier: String,

    #[serde(rename = "Timeline", default, skip_serializing_if = "Vec::is_empty")]
    pub timelines: Vec<Timeline>,

    #[serde(rename = "Player", default, skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<Player>,

    #[serde(rename = "Track", default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<Track>,

    #[serde(rename = "Photo", default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,

    #[serde(rename = "Video", default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<Video>,
}

impl MediaContainer {
    /// Encode le document en XML (sans déclaration, comme sur le fil).
    pub fn to_xml(&self) -> Result<String, quick_xml::se::SeError> {
        quick_xml::se::to_string(self)
    }

    /// Décode un document reçu. Les attributs inconnus sont ignorés.
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::de::DeError> {
        quick_xml::de::from_str(xml)
    }

    /// Déduit le type de lecteur destinataire d'après la collection
    /// peuplée : des pistes pour la musique, des photos ou des vidéos pour
    /// les deux autres lecteurs.
    pub fn inferred_player_type(&self) -> Option<PlayerType> {
        if !self.tracks.is_empty() {
            Some(PlayerType::Music)
        } else if !self.photos.is_empty() {
            Some(PlayerType::Photo)
        } else if !self.videos.is_empty() {
            Some(PlayerType::Video)
        } else {
            None
        }
    }
}

/// État instantané d'un lecteur, étiqueté par type de média.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(rename = "@state", default, skip_serializing_if = "String::is_empty")]
    pub state: String,

    #[serde(rename = "@type", default, skip_serializing_if = "String::is_empty")]
    pub player_type: String,

    /// Position de lecture en millisecondes.
    #[serde(rename = "@time", default, skip_serializing_if = "is_zero")]
    pub time: i64,

    /// Durée du média en millisecondes.
    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,

    #[serde(rename = "@containerKey", default, skip_serializing_if = "String::is_empty")]
    pub container_key: String,

    #[serde(rename = "@ratingKey", default, skip_serializing_if = "is_zero")]
    pub rating_key: i64,

    #[serde(rename = "@key", default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// Description d'un lecteur dans la réponse `/resources`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Player {
    #[serde(rename = "@title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(rename = "@machineIdentifier", default, skip_serializing_if = "String::is_empty")]
    pub machine_identifier: String,

    #[serde(rename = "@product", default, skip_serializing_if = "String::is_empty")]
    pub product: String,

    #[serde(rename = "@version", default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(rename = "@protocolVersion", default, skip_serializing_if = "String::is_empty")]
    pub protocol_version: String,

    #[serde(rename = "@protocolCapabilities", default, skip_serializing_if = "String::is_empty")]
    pub protocol_capabilities: String,

    #[serde(rename = "@deviceClass", default, skip_serializing_if = "String::is_empty")]
    pub device_class: String,
}

/// Piste audio d'un conteneur renvoyé par un serveur Plex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(rename = "@playQueueItemID", default, skip_serializing_if = "is_zero")]
    pub play_queue_item_id: i64,

    #[serde(rename = "@ratingKey", default, skip_serializing_if = "is_zero")]
    pub rating_key: i64,

    #[serde(rename = "@key", default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(rename = "@parentRatingKey", default, skip_serializing_if = "is_zero")]
    pub parent_rating_key: i64,

    #[serde(rename = "@grandparentRatingKey", default, skip_serializing_if = "is_zero")]
    pub grandparent_rating_key: i64,

    #[serde(rename = "@guid", default, skip_serializing_if = "String::is_empty")]
    pub guid: String,

    #[serde(rename = "@title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(rename = "@titleSort", default, skip_serializing_if = "String::is_empty")]
    pub title_sort: String,

    #[serde(rename = "@grandparentKey", default, skip_serializing_if = "String::is_empty")]
    pub grandparent_key: String,

    #[serde(rename = "@parentKey", default, skip_serializing_if = "String::is_empty")]
    pub parent_key: String,

    #[serde(rename = "@grandparentTitle", default, skip_serializing_if = "String::is_empty")]
    pub grandparent_title: String,

    #[serde(rename = "@parentTitle", default, skip_serializing_if = "String::is_empty")]
    pub parent_title: String,

    #[serde(rename = "@originalTitle", default, skip_serializing_if = "String::is_empty")]
    pub original_title: String,

    #[serde(rename = "@summary", default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(rename = "@index", default, skip_serializing_if = "is_zero")]
    pub index: i64,

    #[serde(rename = "@parentIndex", default, skip_serializing_if = "is_zero")]
    pub parent_index: i64,

    #[serde(rename = "@viewCount", default, skip_serializing_if = "is_zero")]
    pub view_count: i64,

    #[serde(rename = "@lastViewedAt", default, skip_serializing_if = "is_zero")]
    pub last_viewed_at: i64,

    #[serde(rename = "@thumb", default, skip_serializing_if = "String::is_empty")]
    pub thumb: String,

    #[serde(rename = "@parentThumb", default, skip_serializing_if = "String::is_empty")]
    pub parent_thumb: String,

    #[serde(rename = "@grandparentThumb", default, skip_serializing_if = "String::is_empty")]
    pub grandparent_thumb: String,

    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,

    #[serde(rename = "@addedAt", default, skip_serializing_if = "is_zero")]
    pub added_at: i64,

    #[serde(rename = "@updatedAt", default, skip_serializing_if = "is_zero")]
    pub updated_at: i64,

    #[serde(rename = "Media", default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

/// Déclinaison technique d'une piste.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "@id", default, skip_serializing_if = "is_zero")]
    pub id: i64,

    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,

    #[serde(rename = "@bitrate", default, skip_serializing_if = "is_zero")]
    pub bitrate: i64,

    #[serde(rename = "@audioChannels", default, skip_serializing_if = "is_zero")]
    pub audio_channels: i64,

    #[serde(rename = "@audioCodec", default, skip_serializing_if = "String::is_empty")]
    pub audio_codec: String,

    #[serde(rename = "@container", default, skip_serializing_if = "String::is_empty")]
    pub container: String,

    #[serde(rename = "Part", default, skip_serializing_if = "Option::is_none")]
    pub part: Option<Part>,
}

/// Fragment adressable d'un média.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(rename = "@id", default, skip_serializing_if = "is_zero")]
    pub id: i64,

    #[serde(rename = "@key", default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,

    #[serde(rename = "@file", default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    #[serde(rename = "@size", default, skip_serializing_if = "is_zero")]
    pub size: i64,

    #[serde(rename = "@container", default, skip_serializing_if = "String::is_empty")]
    pub container: String,

    #[serde(rename = "Stream", default, skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<Stream>,
}

/// Flux élémentaire d'un fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(rename = "@id", default, skip_serializing_if = "is_zero")]
    pub id: i64,

    #[serde(rename = "@streamType", default, skip_serializing_if = "is_zero")]
    pub stream_type: i64,

    #[serde(rename = "@selected", default, skip_serializing_if = "is_zero")]
    pub selected: i64,

    #[serde(rename = "@codec", default, skip_serializing_if = "String::is_empty")]
    pub codec: String,

    #[serde(rename = "@index", default, skip_serializing_if = "is_zero")]
    pub index: i64,

    #[serde(rename = "@channels", default, skip_serializing_if = "is_zero")]
    pub channels: i64,

    #[serde(rename = "@bitrate", default, skip_serializing_if = "is_zero")]
    pub bitrate: i64,

    #[serde(rename = "@bitrateMode", default, skip_serializing_if = "String::is_empty")]
    pub bitrate_mode: String,

    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,

    #[serde(rename = "@samplingRate", default, skip_serializing_if = "is_zero")]
    pub sampling_rate: i64,
}

/// Photo d'un conteneur serveur.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(rename = "@ratingKey", default, skip_serializing_if = "is_zero")]
    pub rating_key: i64,

    #[serde(rename = "@key", default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(rename = "@title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,
}

/// Vidéo d'un conteneur serveur.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(rename = "@ratingKey", default, skip_serializing_if = "is_zero")]
    pub rating_key: i64,

    #[serde(rename = "@key", default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(rename = "@title", default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(rename = "@duration", default, skip_serializing_if = "is_zero")]
    pub duration: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_round_trip() {
        let mc = MediaContainer {
            command_id: "6".to_string(),
            machine_identifier: "862b2506-ba0a-11e4-b501-cf0a1568e6a3".to_string(),
            timelines: vec![Timeline {
                state: "playing".to_string(),
                player_type: "music".to_string(),
                time: 12_000,
                duration: 180_000,
                container_key: "/playQueues/7".to_string(),
                rating_key: 42,
                key: "/library/metadata/42".to_string(),
            }],
            ..Default::default()
        };

        let xml = mc.to_xml().unwrap();
        let back = MediaContainer::from_xml(&xml).unwrap();
        assert_eq!(back, mc);
    }

    #[test]
    fn test_empty_attributes_are_omitted() {
        let mc = MediaContainer {
            machine_identifier: "abc".to_string(),
            timelines: vec![Timeline {
                state: "stopped".to_string(),
                player_type: "music".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let xml = mc.to_xml().unwrap();
        assert!(!xml.contains("commandID"));
        assert!(!xml.contains("time="));
        assert!(!xml.contains("containerKey"));
        assert!(xml.contains(r#"state="stopped""#));
        assert!(xml.contains(r#"type="music""#));
    }

    #[test]
    fn test_unknown_attributes_are_ignored() {
        let xml = r#"<MediaContainer size="3" futureField="x" machineIdentifier="abc">
            <Timeline state="paused" type="video" shuffled="0"/>
        </MediaContainer>"#;

        let mc = MediaContainer::from_xml(xml).unwrap();
        assert_eq!(mc.machine_identifier, "abc");
        assert_eq!(mc.timelines.len(), 1);
        assert_eq!(mc.timelines[0].state, "paused");
    }

    #[test]
    fn test_decode_track_collection() {
        let xml = r#"<MediaContainer machineIdentifier="srv">
            <Track ratingKey="101" key="/library/metadata/101" title="First" duration="215000">
                <Media id="9" audioCodec="flac" container="flac">
                    <Part id="12" key="/library/parts/12/file.flac" size="31337">
                        <Stream id="30" streamType="2" codec="flac" channels="2"/>
                    </Part>
                </Media>
            </Track>
            <Track ratingKey="102" key="/library/metadata/102" title="Second"/>
        </MediaContainer>"#;

        let mc = MediaContainer::from_xml(xml).unwrap();
        assert_eq!(mc.tracks.len(), 2);
        assert_eq!(mc.tracks[0].rating_key, 101);
        assert_eq!(mc.tracks[0].duration, 215_000);
        let media = mc.tracks[0].media.as_ref().unwrap();
        assert_eq!(media.audio_codec, "flac");
        assert_eq!(media.part.as_ref().unwrap().streams.len(), 1);
        assert_eq!(mc.inferred_player_type(), Some(PlayerType::Music));
    }

    #[test]
    fn test_inference_by_collection() {
        let photos = MediaContainer {
            photos: vec![Photo {
                key: "/photo/1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(photos.inferred_player_type(), Some(PlayerType::Photo));

        let videos = MediaContainer {
            videos: vec![Video {
                key: "/video/1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(videos.inferred_player_type(), Some(PlayerType::Video));

        assert_eq!(MediaContainer::default().inferred_player_type(), None);
    }

    #[test]
    fn test_resources_document() {
        let mc = MediaContainer {
            players: vec![Player {
                title: "sharkbait".to_string(),
                machine_identifier: "862b2506".to_string(),
                product: "Plexible".to_string(),
                version: "0.1.0".to_string(),
                protocol_version: "1".to_string(),
                protocol_capabilities: "timeline,playback".to_string(),
                device_class: "htpc".to_string(),
            }],
            ..Default::default()
        };

        let xml = mc.to_xml().unwrap();
        let back = MediaContainer::from_xml(&xml).unwrap();
        assert_eq!(back.players.len(), 1);
        assert_eq!(back.players[0].device_class, "htpc");
    }
}
