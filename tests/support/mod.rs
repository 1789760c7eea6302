use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    path::Path,
    process::{Child, Command},
    sync::Arc,
    time::Duration,
};

use fwdproxy::discovery::EndpointRecord;
use fwdproxy::{Dispatcher, DispatcherSettings, EndpointDirectory, StaticRegistry};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::mpsc,
    task::JoinHandle,
    time::sleep,
};

pub const SERVICE: &str = "billing";

// -----------------------------------------------------------------------------
// ----- In-process proxy ------------------------------------------------------

#[allow(dead_code)]
pub struct Proxy {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    pub directory: Arc<EndpointDirectory>,
    pub registry: Arc<StaticRegistry>,
    accept: JoinHandle<Result<(), fwdproxy::ProxyError>>,
}

#[allow(dead_code)]
impl Proxy {
    pub async fn start(backend_ports: &[u16]) -> Proxy {
        Self::start_with(backend_ports, DispatcherSettings::default()).await
    }

    pub async fn start_with(backend_ports: &[u16], settings: DispatcherSettings) -> Proxy {
        let registry = Arc::new(StaticRegistry::new());
        registry.set_records(SERVICE, records(backend_ports));

        let directory = Arc::new(EndpointDirectory::new(
            SERVICE,
            registry.clone(),
            Duration::from_secs(15),
        ));
        directory.refresh().await.expect("initial refresh");

        let dispatcher = Arc::new(Dispatcher::new(directory.clone(), settings));
        let addr = dispatcher
            .listen("127.0.0.1:0".parse().unwrap())
            .expect("bind proxy");

        let runner = dispatcher.clone();
        let accept = tokio::spawn(async move { runner.accept().await });

        Proxy {
            addr,
            dispatcher,
            directory,
            registry,
            accept,
        }
    }

    /// Wait until every session task has returned.
    pub async fn wait_idle(&self) {
        for _ in 0..200 {
            if self.dispatcher.stats().active == 0 {
                return;
            }
            sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "sessions still active: {:?}",
            self.dispatcher.stats()
        );
    }

    pub async fn shutdown(self) {
        self.dispatcher.close();
        self.accept
            .await
            .expect("accept task")
            .expect("accept loop result");
    }
}

pub fn records(ports: &[u16]) -> Vec<EndpointRecord> {
    ports
        .iter()
        .map(|p| EndpointRecord::new("127.0.0.1", *p))
        .collect()
}

// -----------------------------------------------------------------------------
// ----- Test backends ---------------------------------------------------------

/// Backend that reads each connection to EOF and reports what it got.
#[allow(dead_code)]
pub async fn spawn_sink_backend() -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let _ = stream.read_to_end(&mut received).await;
                let _ = tx.send(received);
            });
        }
    });

    (port, rx)
}

/// Backend that writes `payload` to every connection and closes it.
#[allow(dead_code)]
pub async fn spawn_source_backend(payload: Arc<Vec<u8>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let payload = payload.clone();
            tokio::spawn(async move {
                let _ = stream.write_all(&payload).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    port
}

/// Backend that echoes every byte back until the client goes away.
#[allow(dead_code)]
pub async fn spawn_echo_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.into_split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });

    port
}

#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Deterministic, non-repeating-looking bytes.
#[allow(dead_code)]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect()
}

// -----------------------------------------------------------------------------
// ----- Binary ----------------------------------------------------------------

#[allow(dead_code)]
pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = StdTcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

#[allow(dead_code)]
pub fn spawn_fwdproxy(port: u16, service: &str, registry_file: &Path) -> Child {
    let exe = env!("CARGO_BIN_EXE_fwdproxy");

    Command::new(exe)
        .arg("-l")
        .arg(port.to_string())
        .arg("-s")
        .arg(service)
        .env("FWDPROXY_HOST", "127.0.0.1")
        .env("FWDPROXY_REGISTRY_FILE", registry_file)
        .env("FWDPROXY_REFRESH_INTERVAL", "100ms")
        .spawn()
        .expect("spawn fwdproxy")
}

#[allow(dead_code)]
pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("fwdproxy did not start listening on {addr}");
}
