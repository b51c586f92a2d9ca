//! Moteur de lecture de démonstration.
//!
//! Une machine à états minimale qui honore l'interface moteur du device :
//! elle consomme les commandes, fait avancer la position d'une seconde par
//! seconde en lecture et émet une timeline après chaque transition. Aucun
//! son n'est produit — le moteur sert à exercer le protocole de bout en
//! bout.

use std::time::Duration;

use plxdevice::{PlayMedia, PlayerCommand, PlayerTimeline};
use plxproto::PlayState;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Démarre le moteur et retourne les deux extrémités à brancher sur
/// [`Device::add_player`](plxdevice::Device::add_player) : le flux de
/// timelines émis et le puits de commandes consommé.
pub fn spawn() -> (mpsc::Receiver<PlayerTimeline>, mpsc::Sender<PlayerCommand>) {
    let (timeline_tx, timeline_rx) = mpsc::channel(8);
    let (command_tx, command_rx) = mpsc::channel(1);
    tokio::spawn(run(timeline_tx, command_rx));
    (timeline_rx, command_tx)
}

async fn run(
    timelines: mpsc::Sender<PlayerTimeline>,
    mut commands: mpsc::Receiver<PlayerCommand>,
) {
    info!("player loop started");

    let mut ticker = time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut current = PlayerTimeline::stopped();
    let mut ticking = false;

    // État initial annoncé avant la première commande.
    if timelines.send(current.clone()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = ticker.tick(), if ticking => {
                current.time += 1_000;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    PlayerCommand::PlayMedia(play_media) => {
                        debug!("starting playback of {}", play_media.container_key);
                        current = starting_timeline(&play_media);
                        ticking = true;
                        ticker.reset();
                    }
                    PlayerCommand::Play => {
                        current.state = PlayState::Playing;
                        ticking = true;
                    }
                    PlayerCommand::Pause => {
                        current.state = PlayState::Paused;
                        ticking = false;
                    }
                    PlayerCommand::Stop => {
                        current = PlayerTimeline::stopped();
                        ticking = false;
                    }
                }
            }
        }

        if timelines.send(current.clone()).await.is_err() {
            break;
        }
    }

    info!("player loop ended");
}

fn starting_timeline(play_media: &PlayMedia) -> PlayerTimeline {
    let first = play_media.container.tracks.first();
    PlayerTimeline {
        state: PlayState::Playing,
        time: play_media.offset_ms,
        duration: first.map(|t| t.duration).unwrap_or_default(),
        container_key: Some(play_media.container_key.clone()),
        rating_key: first.map(|t| t.rating_key),
        key: first.map(|t| t.key.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plxproto::container::{MediaContainer, Track};

    #[tokio::test]
    async fn test_initial_timeline_is_stopped() {
        let (mut timelines, _commands) = spawn();
        let first = timelines.recv().await.unwrap();
        assert_eq!(first.state, PlayState::Stopped);
    }

    #[tokio::test]
    async fn test_play_media_then_stop() {
        let (mut timelines, commands) = spawn();
        assert_eq!(timelines.recv().await.unwrap().state, PlayState::Stopped);

        let container = MediaContainer {
            tracks: vec![Track {
                rating_key: 7,
                key: "/x/1".to_string(),
                duration: 215_000,
                ..Default::default()
            }],
            ..Default::default()
        };
        commands
            .send(PlayerCommand::PlayMedia(PlayMedia {
                server_url: "http://10.0.0.1:32400".to_string(),
                container,
                container_key: "/x".to_string(),
                key: "/x/1".to_string(),
                offset_ms: 0,
            }))
            .await
            .unwrap();

        let playing = timelines.recv().await.unwrap();
        assert_eq!(playing.state, PlayState::Playing);
        assert_eq!(playing.container_key.as_deref(), Some("/x"));
        assert_eq!(playing.rating_key, Some(7));
        assert_eq!(playing.duration, 215_000);

        commands.send(PlayerCommand::Stop).await.unwrap();
        let stopped = timelines.recv().await.unwrap();
        assert_eq!(stopped.state, PlayState::Stopped);
        assert!(stopped.container_key.is_none());
        assert_eq!(stopped.time, 0);
    }
}
