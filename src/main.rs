use log::{error, info};
use tokio::net::{TcpListener, UdpSocket};

use chat_hub::adapter::{tcp, udp};
use chat_hub::{server, Config, Hub};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let (hub, hub_task) = Hub::start(config.hub());

    let tcp_listener = match TcpListener::bind(config.tcp_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind TCP {}: {e}", config.tcp_addr);
            std::process::exit(1);
        }
    };
    let udp_socket = match UdpSocket::bind(config.udp_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("cannot bind UDP {}: {e}", config.udp_addr);
            std::process::exit(1);
        }
    };
    info!("TCP chat on {}, UDP status on {}", config.tcp_addr, config.udp_addr);

    let tcp_task = tokio::spawn(tcp::listen(
        tcp_listener,
        hub.clone(),
        config.default_room.clone(),
        config.tcp_session(),
    ));
    let udp_task = tokio::spawn(udp::listen(
        udp_socket,
        hub.clone(),
        config.tcp_session(),
        config.udp_watcher_ttl,
    ));

    server::run(hub.clone(), &config, shutdown_signal()).await;

    tcp_task.abort();
    udp_task.abort();
    hub.shutdown();
    let _ = hub_task.await;
    info!("hub stopped");
}
