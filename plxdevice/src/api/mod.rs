//! # API de contrôle HTTP
//!
//! Traduit les endpoints de télécommande Plex en opérations sur les
//! registres et en commandes synchrones vers les lecteurs :
//!
//! - `GET /resources` : description du device et de ses lecteurs
//! - `GET /player/timeline/poll` : long-poll de l'état courant
//! - `GET /player/timeline/subscribe` / `unsubscribe` : abonnements push
//! - `GET /player/playback/{cmd}` : commandes de lecture
//!
//! Chaque route honore le préambule `OPTIONS` avec les en-têtes CORS, et
//! chaque réponse porte l'identité du device (`X-Plex-Client-Identifier`,
//! `X-Plex-Protocol`).

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use plxproto::container::MediaContainer;
use plxproto::PlayerType;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::controllers::ControllerRegistry;
use crate::device::SharedState;
use crate::errors::PlayMediaError;
use crate::players::{PlayMedia, PlayerCommand};

/// Durée maximale de stationnement d'un long-poll.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Durée maximale de récupération d'un conteneur `playMedia`.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const CLIENT_ID_HEADER: &str = "X-Plex-Client-Identifier";

const ALLOWED_METHODS: &str = "POST, GET, OPTIONS, DELETE, PUT, HEAD";

const ALLOWED_HEADERS: &str = "x-plex-version, x-plex-platform-version, x-plex-username, \
     x-plex-client-identifier, x-plex-target-client-identifier, x-plex-device-name, \
     x-plex-platform, x-plex-product, accept-language, accept, x-plex-device";

pub(crate) fn router(shared: Arc<SharedState>) -> Router {
    Router::new()
        .route("/resources", get(resources))
        .route("/player/timeline/poll", get(poll))
        .route("/player/timeline/subscribe", get(subscribe))
        .route("/player/timeline/unsubscribe", get(unsubscribe))
        .route("/player/playback/{cmd}", get(playback))
        .layer(middleware::from_fn_with_state(shared.clone(), plex_headers))
        .with_state(shared)
}

/// Préambule `OPTIONS` et en-têtes communs de toutes les réponses.
async fn plex_headers(
    State(shared): State<Arc<SharedState>>,
    req: Request,
    next: Next,
) -> Response {
    debug!("{} {}", req.method(), req.uri().path());

    if req.method() == Method::OPTIONS {
        return (
            StatusCode::OK,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
            ],
        )
            .into_response();
    }

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert("X-Plex-Protocol", HeaderValue::from_static("1.0"));
    if let Ok(id) = HeaderValue::from_str(&shared.info.id) {
        headers.insert(CLIENT_ID_HEADER, id);
    }
    resp
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn xml_response(container: &MediaContainer) -> Response {
    match container.to_xml() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("failed to encode response document: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn resources(State(shared): State<Arc<SharedState>>) -> Response {
    let container = MediaContainer {
        players: shared.players.describe(&shared.info),
        ..Default::default()
    };
    debug!("sending resources response");
    xml_response(&container)
}

#[derive(Deserialize)]
struct PollQuery {
    #[serde(rename = "commandID", default)]
    command_id: String,
    #[serde(default)]
    wait: String,
}

/// Retire le record de polling quel que soit le chemin de sortie du
/// handler, y compris l'abandon de la future quand le client raccroche.
struct PollGuard {
    controllers: ControllerRegistry,
    client_id: String,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        let controllers = self.controllers.clone();
        let client_id = std::mem::take(&mut self.client_id);
        tokio::spawn(async move {
            controllers.forget(&client_id).await;
        });
    }
}

async fn poll(
    State(shared): State<Arc<SharedState>>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = header_value(&headers, CLIENT_ID_HEADER);

    let mut delivered = None;
    if query.wait == "1" {
        debug!("controller {} waiting for a timeline update", client_id);
        let (tx, rx) = oneshot::channel();
        shared
            .controllers
            .register_polling(&client_id, tx, &query.command_id)
            .await;
        let _guard = PollGuard {
            controllers: shared.controllers.clone(),
            client_id: client_id.clone(),
        };

        // Livraison du fan-out, échéance des 30 s, ou record oublié :
        // les deux derniers cas retombent sur l'instantané courant.
        delivered = match tokio::time::timeout(POLL_TIMEOUT, rx).await {
            Ok(Ok(container)) => Some(container),
            _ => None,
        };
    }

    let container = delivered.unwrap_or_else(|| MediaContainer {
        command_id: query.command_id.clone(),
        machine_identifier: shared.info.id.clone(),
        timelines: shared.players.collect_timelines(),
        ..Default::default()
    });

    let mut resp = xml_response(&container);
    resp.headers_mut().insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("X-Plex-Client-Identifier"),
    );
    resp
}

#[derive(Deserialize)]
struct PlaybackQuery {
    #[serde(rename = "type", default)]
    player_type: String,
    #[serde(rename = "commandID", default)]
    command_id: String,
    #[serde(rename = "containerKey", default)]
    container_key: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    offset: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: String,
}

async fn playback(
    State(shared): State<Arc<SharedState>>,
    Path(cmd): Path<String>,
    Query(query): Query<PlaybackQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = header_value(&headers, CLIENT_ID_HEADER);
    if !client_id.is_empty() && !query.command_id.is_empty() {
        shared
            .controllers
            .update_command_id(&client_id, &query.command_id)
            .await;
    }

    let requested_type = PlayerType::from_str(&query.player_type).ok();

    let (command, target_type) = match cmd.as_str() {
        "play" => (Some(PlayerCommand::Play), requested_type),
        "pause" => (Some(PlayerCommand::Pause), requested_type),
        "stop" => (Some(PlayerCommand::Stop), requested_type),
        "playMedia" => match fetch_play_media(&shared, &query).await {
            Ok(play_media) => {
                // Sans paramètre `type`, la collection peuplée du conteneur
                // désigne le lecteur destinataire.
                let inferred = requested_type.or_else(|| play_media.container.inferred_player_type());
                (Some(PlayerCommand::PlayMedia(play_media)), inferred)
            }
            Err(e) => {
                warn!("ignoring playMedia command: {}", e);
                (None, None)
            }
        },
        other => {
            warn!("ignoring unknown playback command {:?}", other);
            (None, None)
        }
    };

    if let Some(command) = command {
        match target_type.and_then(|t| shared.players.command_sink(t).map(|s| (t, s))) {
            Some((player_type, sink)) => {
                debug!("sending {} command to {} player", cmd, player_type);
                // Envoi synchrone : un lecteur qui ne lit plus ses
                // commandes bloque la requête qui les émet.
                if sink.send(command).await.is_err() {
                    warn!("{} player went away, dropping {} command", player_type, cmd);
                }
            }
            None => {
                warn!(
                    "no player registered for type {:?}, dropping {} command",
                    query.player_type, cmd
                );
            }
        }
    }

    StatusCode::OK.into_response()
}

async fn fetch_play_media(
    shared: &SharedState,
    query: &PlaybackQuery,
) -> Result<PlayMedia, PlayMediaError> {
    let server_url = format!("{}://{}:{}", query.protocol, query.address, query.port);
    let url = format!("{}{}", server_url, query.container_key);
    debug!("fetching media container from {}", url);

    let body = shared
        .http
        .get(&url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|source| PlayMediaError::Fetch {
            url: url.clone(),
            source,
        })?
        .text()
        .await
        .map_err(|source| PlayMediaError::Fetch {
            url: url.clone(),
            source,
        })?;

    let container = MediaContainer::from_xml(&body).map_err(|source| PlayMediaError::Decode {
        url: url.clone(),
        source,
    })?;

    Ok(PlayMedia {
        server_url,
        container,
        container_key: query.container_key.clone(),
        key: query.key.clone(),
        offset_ms: query.offset.parse().unwrap_or(0),
    })
}

#[derive(Deserialize)]
struct SubscribeQuery {
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    port: String,
    #[serde(rename = "commandID", default)]
    command_id: String,
}

async fn subscribe(
    State(shared): State<Arc<SharedState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = header_value(&headers, CLIENT_ID_HEADER);
    if client_id.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let protocol = if query.protocol.is_empty() {
        "http"
    } else {
        query.protocol.as_str()
    };
    // L'hôte vient de l'adresse TCP du pair, jamais de la requête : un
    // contrôleur ne peut pas faire poster les timelines ailleurs que chez
    // lui.
    let url = format!("{}://{}:{}/", protocol, peer.ip(), query.port);

    shared
        .controllers
        .register_subscribing(&client_id, url, &query.command_id)
        .await;

    let snapshot = shared.players.collect_timelines();
    shared
        .controllers
        .notify_subscriber(&client_id, &shared.info.id, &snapshot)
        .await;

    StatusCode::OK.into_response()
}

async fn unsubscribe(State(shared): State<Arc<SharedState>>, headers: HeaderMap) -> Response {
    let client_id = header_value(&headers, CLIENT_ID_HEADER);
    shared.controllers.forget(&client_id).await;
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::PlayerTimeline;
    use crate::Device;
    use plxproto::{Capability, DeviceInfo, PlayState};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const DEVICE_ID: &str = "862b2506-ba0a-11e4-b501-cf0a1568e6a3";

    struct Harness {
        base: String,
        client: reqwest::Client,
        timelines: mpsc::Sender<PlayerTimeline>,
        commands: mpsc::Receiver<PlayerCommand>,
    }

    /// Démarre l'API seule sur un port éphémère, avec un lecteur `music`
    /// factice dont le test garde les deux extrémités de canal.
    async fn start_device() -> Harness {
        let device = Device::new(DeviceInfo::new(DEVICE_ID, "sharkbait", "Plexible", "0.1.0"));
        let (timeline_tx, timeline_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(1);
        device
            .add_player(
                PlayerType::Music,
                vec![Capability::Timeline, Capability::Playback],
                timeline_rx,
                command_tx,
            )
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(device.shared());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Harness {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            timelines: timeline_tx,
            commands: command_rx,
        }
    }

    async fn push_timeline(harness: &Harness, timeline: PlayerTimeline) {
        harness.timelines.send(timeline).await.unwrap();
        // Laisse la pompe consommer la mise à jour.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_resources_lists_players() {
        let harness = start_device().await;

        let resp = harness
            .client
            .get(format!("{}/resources", harness.base))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("X-Plex-Protocol").unwrap(),
            "1.0"
        );
        assert_eq!(
            resp.headers().get("X-Plex-Client-Identifier").unwrap(),
            DEVICE_ID
        );
        let body = resp.text().await.unwrap();
        assert_eq!(body.matches("<Player").count(), 1);
        assert!(body.contains(r#"protocolCapabilities="timeline,playback""#));
        assert!(body.contains(r#"deviceClass="htpc""#));
    }

    #[tokio::test]
    async fn test_options_preamble() {
        let harness = start_device().await;

        let resp = harness
            .client
            .request(Method::OPTIONS, format!("{}/resources", harness.base))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Methods").unwrap(),
            ALLOWED_METHODS
        );
        assert!(resp
            .headers()
            .get("Access-Control-Allow-Headers")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("x-plex-client-identifier"));
    }

    #[tokio::test]
    async fn test_poll_without_wait_returns_snapshot() {
        let harness = start_device().await;
        push_timeline(&harness, PlayerTimeline::stopped()).await;

        let resp = harness
            .client
            .get(format!("{}/player/timeline/poll?commandID=5", harness.base))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();

        let body = resp.text().await.unwrap();
        assert!(body.contains(r#"commandID="5""#));
        assert!(body.contains(&format!(r#"machineIdentifier="{}""#, DEVICE_ID)));
        assert!(body.contains(r#"state="stopped""#));
        assert!(body.contains(r#"type="music""#));
    }

    #[tokio::test]
    async fn test_parked_poll_released_by_playback_command() {
        let mut harness = start_device().await;
        push_timeline(&harness, PlayerTimeline::stopped()).await;

        let parked = tokio::spawn({
            let client = harness.client.clone();
            let url = format!(
                "{}/player/timeline/poll?wait=1&commandID=5",
                harness.base
            );
            async move {
                client
                    .get(url)
                    .header(CLIENT_ID_HEADER, "c1")
                    .send()
                    .await
                    .unwrap()
                    .text()
                    .await
                    .unwrap()
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // La commande play passe par le même contrôleur avec un commandID
        // plus récent, et le lecteur factice émet l'état `playing`.
        let resp = harness
            .client
            .get(format!(
                "{}/player/playback/play?type=music&commandID=6",
                harness.base
            ))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let command = tokio::time::timeout(Duration::from_secs(1), harness.commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(command, PlayerCommand::Play));

        harness
            .timelines
            .send(PlayerTimeline {
                state: PlayState::Playing,
                time: 0,
                duration: 180_000,
                ..Default::default()
            })
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(2), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(body.contains(r#"commandID="6""#));
        assert!(body.contains(r#"state="playing""#));
    }

    #[tokio::test]
    async fn test_parked_poll_falls_back_when_forgotten() {
        let harness = start_device().await;
        push_timeline(&harness, PlayerTimeline::stopped()).await;

        let parked = tokio::spawn({
            let client = harness.client.clone();
            let url = format!(
                "{}/player/timeline/poll?wait=1&commandID=9",
                harness.base
            );
            async move {
                client
                    .get(url)
                    .header(CLIENT_ID_HEADER, "c1")
                    .send()
                    .await
                    .unwrap()
                    .text()
                    .await
                    .unwrap()
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // L'oubli du record ferme le canal de livraison ; le handler
        // retombe sur l'instantané avec le commandID d'origine.
        harness
            .client
            .get(format!("{}/player/timeline/unsubscribe", harness.base))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(2), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(body.contains(r#"commandID="9""#));
        assert!(body.contains(r#"state="stopped""#));
    }

    #[tokio::test]
    async fn test_subscribe_receives_initial_snapshot() {
        let harness = start_device().await;
        push_timeline(&harness, PlayerTimeline::stopped()).await;

        // Faux contrôleur : capture les POST sur `:/timeline`.
        let (posted_tx, mut posted_rx) = mpsc::channel::<String>(4);
        let controller = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller_port = controller.local_addr().unwrap().port();
        let app = Router::new().without_v07_checks().route(
            "/:/timeline",
            axum::routing::post(move |body: String| {
                let posted_tx = posted_tx.clone();
                async move {
                    posted_tx.send(body).await.unwrap();
                    StatusCode::OK
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(controller, app).await.unwrap();
        });

        let resp = harness
            .client
            .get(format!(
                "{}/player/timeline/subscribe?protocol=http&port={}&commandID=1",
                harness.base, controller_port
            ))
            .header(CLIENT_ID_HEADER, "c2")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body = tokio::time::timeout(Duration::from_secs(2), posted_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(body.contains(r#"commandID="1""#));
        assert!(body.contains(&format!(r#"machineIdentifier="{}""#, DEVICE_ID)));
        assert!(body.contains(r#"state="stopped""#));

        // Après unsubscribe, les mises à jour suivantes ne POSTent plus.
        harness
            .client
            .get(format!("{}/player/timeline/unsubscribe", harness.base))
            .header(CLIENT_ID_HEADER, "c2")
            .send()
            .await
            .unwrap();
        push_timeline(
            &harness,
            PlayerTimeline {
                state: PlayState::Playing,
                ..Default::default()
            },
        )
        .await;
        assert!(posted_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_play_media_fetches_and_dispatches() {
        let mut harness = start_device().await;

        // Faux serveur Plex : renvoie un conteneur d'une piste pour /x.
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server.local_addr().unwrap().port();
        let app = Router::new().route(
            "/x",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
                    r#"<MediaContainer>
                        <Track ratingKey="7" key="/x/1" title="Demo" duration="215000"/>
                    </MediaContainer>"#,
                )
            }),
        );
        tokio::spawn(async move {
            axum::serve(server, app).await.unwrap();
        });

        let resp = harness
            .client
            .get(format!(
                "{}/player/playback/playMedia?type=music&containerKey=/x&key=/x/1&offset=0&protocol=http&address=127.0.0.1&port={}&commandID=2",
                harness.base, server_port
            ))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let command = tokio::time::timeout(Duration::from_secs(2), harness.commands.recv())
            .await
            .unwrap()
            .unwrap();
        let PlayerCommand::PlayMedia(play_media) = command else {
            panic!("expected a playMedia command");
        };
        assert_eq!(play_media.container_key, "/x");
        assert_eq!(play_media.key, "/x/1");
        assert_eq!(play_media.offset_ms, 0);
        assert_eq!(play_media.container.tracks.len(), 1);
        assert_eq!(play_media.container.tracks[0].rating_key, 7);
        assert!(play_media.server_url.starts_with("http://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_unknown_command_and_type_answer_200() {
        let mut harness = start_device().await;

        let resp = harness
            .client
            .get(format!(
                "{}/player/playback/rewind?type=music&commandID=3",
                harness.base
            ))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        // Type inconnu : 200 aussi, aucune commande transmise.
        let resp = harness
            .client
            .get(format!(
                "{}/player/playback/play?type=photo&commandID=4",
                harness.base
            ))
            .header(CLIENT_ID_HEADER, "c1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        assert!(harness.commands.try_recv().is_err());
    }
}
