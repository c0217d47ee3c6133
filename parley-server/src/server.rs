//! Accept loop

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::auth::AuthService;
use crate::connection::{self, ConnectionError, ConnectionParams};
use crate::hub::Hub;
use crate::session::KeyValueStore;

/// Listening server sharing one Hub and one auth service across connections
pub struct Server<B> {
    listener: TcpListener,
    hub: Arc<Hub>,
    auth: Arc<AuthService<B>>,
}

impl<B: KeyValueStore> Server<B> {
    /// Bind the listening socket
    pub async fn bind(
        addr: SocketAddr,
        hub: Arc<Hub>,
        auth: Arc<AuthService<B>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, hub, auth))
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener, hub: Arc<Hub>, auth: Arc<AuthService<B>>) -> Self {
        Self {
            listener,
            hub,
            auth,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until `shutdown` flips to true, then close every
    /// registered connection
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening");
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer_addr)) => {
                            let params = ConnectionParams {
                                peer_addr,
                                hub: self.hub.clone(),
                                auth: self.auth.clone(),
                                shutdown: shutdown.clone(),
                            };
                            tokio::spawn(async move {
                                if let Err(e) = connection::handle_connection(socket, params).await {
                                    log_connection_error(&e, peer_addr);
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
            }
        }

        info!("shutting down");
        self.hub.close_all().await;
    }
}

fn log_connection_error(error: &ConnectionError, peer_addr: SocketAddr) {
    match error {
        // Scanners and plain HTTP requests end up here
        ConnectionError::HandshakeTimeout | ConnectionError::WebSocket(_) => {
            debug!(peer = %peer_addr, error = %error, "connection ended during handshake")
        }
        ConnectionError::Json(_) => error!(peer = %peer_addr, error = %error, "connection error"),
    }
}
