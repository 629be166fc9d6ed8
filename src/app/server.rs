//! Listener setup and the accept loop

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::http::build_router;
use crate::net::{broadcast, datagram, handler};

use super::AppState;

/// Addresses the server actually bound (useful with port 0)
#[derive(Debug, Clone, Copy)]
pub struct LocalAddrs {
    pub tcp: SocketAddr,
    pub udp: SocketAddr,
    pub http: Option<SocketAddr>,
}

/// A bound but not yet running server
pub struct GameServer {
    state: AppState,
    tcp: TcpListener,
    udp: Arc<UdpSocket>,
    http: Option<TcpListener>,
}

impl GameServer {
    /// Bind every listener named in the configuration
    pub async fn bind(state: AppState) -> anyhow::Result<Self> {
        let config = Arc::clone(&state.config);

        let tcp = TcpListener::bind(config.tcp_addr)
            .await
            .with_context(|| format!("binding control listener on {}", config.tcp_addr))?;
        let udp = UdpSocket::bind(config.udp_addr)
            .await
            .with_context(|| format!("binding state socket on {}", config.udp_addr))?;
        let http = match config.http_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("binding status listener on {addr}"))?,
            ),
            None => None,
        };

        Ok(Self {
            state,
            tcp,
            udp: Arc::new(udp),
            http,
        })
    }

    pub fn local_addrs(&self) -> anyhow::Result<LocalAddrs> {
        Ok(LocalAddrs {
            tcp: self.tcp.local_addr()?,
            udp: self.udp.local_addr()?,
            http: self.http.as_ref().map(TcpListener::local_addr).transpose()?,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` flips (or its sender is dropped)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addrs = self.local_addrs()?;
        info!(tcp = %addrs.tcp, udp = %addrs.udp, "Game server listening");

        let broadcaster = tokio::spawn(broadcast::run_broadcast_loop(
            self.state.clone(),
            Arc::clone(&self.udp),
            shutdown.clone(),
        ));
        let receiver = tokio::spawn(datagram::run_receiver(
            Arc::clone(&self.state.engine),
            Arc::clone(&self.udp),
            shutdown.clone(),
        ));

        let status = self.http.map(|listener| {
            info!(addr = ?addrs.http, "Status endpoint listening");
            let router = build_router(self.state.clone());
            let mut stop = shutdown.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = stop.changed().await;
                    })
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "Status server failed");
                }
            })
        });

        loop {
            tokio::select! {
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "Control connection accepted");
                        tokio::spawn(handler::handle_connection(
                            stream,
                            peer,
                            self.state.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Shutting down game server");
        drop(self.tcp);

        for task in [Some(broadcaster), Some(receiver), status].into_iter().flatten() {
            if let Err(e) = task.await {
                error!(error = %e, "Server task panicked");
            }
        }

        Ok(())
    }
}
