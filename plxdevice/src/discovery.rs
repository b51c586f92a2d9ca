//! # Répondeur de découverte
//!
//! Rend le device trouvable sur le segment local : écoute le groupe
//! multicast sur le port de recherche, répond en unicast à chaque requête
//! avec le port TCP de l'API de contrôle, et annonce l'arrivée (`HELLO`) et
//! le départ (`BYE`) du device sur le port d'annonce.
//!
//! La boucle d'écoute tourne sur un thread dédié avec un timeout de lecture
//! d'une seconde, et s'arrête quand le token d'annulation est déclenché.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use plxproto::announce::{
    Datagram, DatagramKind, DEVICE_ANNOUNCE_PORT, DEVICE_SEARCH_PORT, DISCOVERY_GROUP,
    MAX_DATAGRAM,
};
use plxproto::DeviceInfo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct DiscoveryResponder {
    socket: Arc<UdpSocket>,
    info: DeviceInfo,
    api_port: u16,
    stop: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl DiscoveryResponder {
    /// Lie le socket de découverte, rejoint le groupe multicast et démarre
    /// la boucle d'écoute. N'envoie pas encore le `HELLO` : le superviseur
    /// le déclenche une fois tous les services liés.
    pub(crate) fn start(info: DeviceInfo, api_port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DEVICE_SEARCH_PORT))?;
        socket.join_multicast_v4(&DISCOVERY_GROUP, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;

        let socket = Arc::new(socket);
        let stop = CancellationToken::new();

        let listener = {
            let socket = Arc::clone(&socket);
            let info = info.clone();
            let stop = stop.clone();
            std::thread::spawn(move || listen_loop(socket, info, api_port, stop))
        };

        info!("📡 listening for discovery requests on udp/{}", DEVICE_SEARCH_PORT);
        Ok(Self {
            socket,
            info,
            api_port,
            stop,
            listener: Some(listener),
        })
    }

    /// Annonce l'arrivée du device. Un échec ici est fatal au démarrage :
    /// sans `HELLO`, le device resterait invisible des télécommandes.
    pub(crate) fn hello(&self) -> io::Result<()> {
        info!("👋 announcing player to network");
        self.announce(DatagramKind::Hello)
    }

    /// Arrête la boucle d'écoute après avoir annoncé le départ du device.
    /// L'échec du `BYE` est journalisé seulement : l'arrêt continue.
    pub(crate) fn stop(self) {
        info!("removing player from network");
        self.shutdown(true)
    }

    /// Démontage sans annonce, pour les échecs de démarrage.
    pub(crate) fn abort(self) {
        self.shutdown(false)
    }

    fn shutdown(mut self, announce_bye: bool) {
        if announce_bye {
            if let Err(e) = self.announce(DatagramKind::Bye) {
                warn!("error sending BYE: {}", e);
            }
        }
        self.stop.cancel();
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }

    fn announce(&self, kind: DatagramKind) -> io::Result<()> {
        let msg = Datagram::for_device(kind, &self.info, self.api_port);
        debug!("{}: {:?}", kind.line(), msg.fields());
        let dest = SocketAddr::from((DISCOVERY_GROUP, DEVICE_ANNOUNCE_PORT));
        self.socket.send_to(&msg.encode(), dest).map(|_| ())
    }
}

fn listen_loop(socket: Arc<UdpSocket>, info: DeviceInfo, api_port: u16, stop: CancellationToken) {
    info!("discovery loop running");
    let mut buf = [0u8; MAX_DATAGRAM];

    while !stop.is_cancelled() {
        match socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                match Datagram::parse(&buf[..n]) {
                    Ok(query) => {
                        debug!("discovery request {:?} from {}", query.kind, src);
                        let reply = Datagram::for_device(DatagramKind::Ok, &info, api_port);
                        if let Err(e) = socket.send_to(&reply.encode(), src) {
                            warn!("error answering discovery request from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        debug!("dropping discovery datagram from {}: {}", src, e);
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                warn!("discovery read error: {}", e);
            }
        }
    }

    info!("discovery loop ending");
}
