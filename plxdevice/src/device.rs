//! # Superviseur du device
//!
//! [`Device`] assemble les trois services d'E/S — API de contrôle,
//! répondeur de découverte, pompes de timelines — autour de l'état partagé
//! et orchestre leur démarrage et leur arrêt ordonnés.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use plxproto::{Capability, DeviceInfo, PlayerType};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api;
use crate::controllers::ControllerRegistry;
use crate::discovery::DiscoveryResponder;
use crate::errors::{AddPlayerError, StartError};
use crate::players::{PlayerCommand, PlayerRegistry, PlayerTimeline};

/// État partagé entre les handlers HTTP, les pompes et la découverte.
pub(crate) struct SharedState {
    pub(crate) info: DeviceInfo,
    pub(crate) players: PlayerRegistry,
    pub(crate) controllers: ControllerRegistry,
    pub(crate) http: reqwest::Client,
}

struct Running {
    api_port: u16,
    shutdown: CancellationToken,
    api_task: JoinHandle<()>,
    discovery: DiscoveryResponder,
}

/// Le cœur du lecteur Plex : enregistre les moteurs de lecture, expose
/// l'API de contrôle et la découverte, diffuse les timelines.
///
/// # Exemple
///
/// ```rust,no_run
/// # use plxdevice::Device;
/// # use plxproto::{Capability, DeviceInfo, PlayerType};
/// # use tokio::sync::mpsc;
/// # #[tokio::main]
/// # async fn main() {
/// let device = Device::new(DeviceInfo::new("uuid", "salon", "Plexible", "0.1.0"));
///
/// let (timeline_tx, timeline_rx) = mpsc::channel(8);
/// let (command_tx, mut command_rx) = mpsc::channel(1);
/// device
///     .add_player(PlayerType::Music, vec![Capability::Timeline], timeline_rx, command_tx)
///     .unwrap();
/// # let _ = (timeline_tx, command_rx.try_recv());
///
/// device.start().await.unwrap();
/// // ... le moteur pousse ses timelines, les télécommandes pilotent ...
/// device.stop().await;
/// # }
/// ```
pub struct Device {
    shared: Arc<SharedState>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Device {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            shared: Arc::new(SharedState {
                info,
                players: PlayerRegistry::new(),
                controllers: ControllerRegistry::new(),
                http: reqwest::Client::new(),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Enregistre un moteur de lecture et démarre sa pompe de timelines.
    ///
    /// Le moteur garde l'extrémité écriture de `timelines` et l'extrémité
    /// lecture de `commands` ; fermer `timelines` termine proprement la
    /// pompe. Un seul moteur par type.
    ///
    /// # Errors
    ///
    /// [`AddPlayerError::DuplicateType`] si un moteur de ce type existe.
    pub fn add_player(
        &self,
        player_type: PlayerType,
        capabilities: Vec<Capability>,
        mut timelines: mpsc::Receiver<PlayerTimeline>,
        commands: mpsc::Sender<PlayerCommand>,
    ) -> Result<(), AddPlayerError> {
        self.shared.players.add(player_type, capabilities, commands)?;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            debug!("{} player timeline pump started", player_type);
            while let Some(timeline) = timelines.recv().await {
                shared.players.update_timeline(player_type, timeline);
                let snapshot = shared.players.collect_timelines();
                shared.controllers.notify_all(&shared.info.id, &snapshot).await;
            }
            debug!("{} player timeline pump ended", player_type);
        });
        Ok(())
    }

    /// Démarre les services dans l'ordre : API de contrôle (port attribué
    /// par l'OS), répondeur de découverte, annonce `HELLO`. Tout échec
    /// démonte ce qui était déjà lié avant de remonter l'erreur.
    pub async fn start(&self) -> Result<(), StartError> {
        if self.shared.players.is_empty() {
            return Err(StartError::NoPlayers);
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(StartError::ApiBind)?;
        let api_port = listener.local_addr().map_err(StartError::ApiBind)?.port();

        let shutdown = CancellationToken::new();
        let api_task = {
            let app = api::router(Arc::clone(&self.shared));
            let token = shutdown.clone();
            tokio::spawn(async move {
                info!("🚀 control API listening on port {}", api_port);
                let served = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
                match served {
                    Ok(()) => info!("control API shut down"),
                    Err(e) => error!("control API stopped with an error: {}", e),
                }
            })
        };

        let discovery = match DiscoveryResponder::start(self.shared.info.clone(), api_port) {
            Ok(discovery) => discovery,
            Err(e) => {
                shutdown.cancel();
                let _ = api_task.await;
                return Err(StartError::DiscoveryBind(e));
            }
        };

        if let Err(e) = discovery.hello() {
            tokio::task::spawn_blocking(move || discovery.abort())
                .await
                .ok();
            shutdown.cancel();
            let _ = api_task.await;
            return Err(StartError::Hello(e));
        }

        info!("✅ device {} ready on port {}", self.shared.info.name, api_port);
        *running = Some(Running {
            api_port,
            shutdown,
            api_task,
            discovery,
        });
        Ok(())
    }

    /// Arrête les services dans l'ordre inverse : `BYE` (au mieux), arrêt
    /// et jonction de la boucle de découverte, puis arrêt gracieux de
    /// l'API. Sans effet si le device n'est pas démarré.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let Running {
            shutdown,
            api_task,
            discovery,
            ..
        } = running;

        tokio::task::spawn_blocking(move || discovery.stop())
            .await
            .ok();

        shutdown.cancel();
        if api_task.await.is_err() {
            error!("control API task ended abnormally");
        }
        info!("👋 device stopped");
    }

    /// Port TCP de l'API, une fois le device démarré.
    pub async fn api_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.api_port)
    }

    pub(crate) fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }
}
