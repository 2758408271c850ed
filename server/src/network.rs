use crate::setup::{ServerMetrics, ServerSetup};
use log::{debug, info, trace, warn};
use rand::seq::SliceRandom;
use shared::{Request, Response};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

pub const MULTIPART_PARTS: u8 = 10;

/// Events sent from helper tasks to the main server loop
#[derive(Debug)]
enum ServerEvent {
    LoadFinished,
}

/// A single-session BattlEye RCon server for tests.
pub struct MockServer {
    socket: Arc<UdpSocket>,
    setup: ServerSetup,
    metrics: Arc<ServerMetrics>,
    stop: Arc<Notify>,
}

/// Handle on a mock server running in the background.
pub struct MockServerHandle {
    pub addr: SocketAddr,
    pub metrics: Arc<ServerMetrics>,
    stop: Arc<Notify>,
    task: JoinHandle<io::Result<()>>,
}

impl MockServerHandle {
    /// Stops the server and waits for its loop to end.
    pub async fn stop(self) -> io::Result<()> {
        self.stop.notify_one();
        self.join().await
    }

    pub async fn join(self) -> io::Result<()> {
        self.task
            .await
            .map_err(|err| io::Error::other(err.to_string()))?
    }
}

/// Per-session state owned by the server loop.
#[derive(Debug, Default)]
struct Session {
    client: Option<SocketAddr>,
    logged_in: bool,
    load_started: bool,
}

impl MockServer {
    pub async fn bind(addr: &str, setup: ServerSetup) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Mock server listening on {}", socket.local_addr()?);

        Ok(MockServer {
            socket,
            setup,
            metrics: Arc::new(ServerMetrics::default()),
            stop: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> io::Result<MockServerHandle> {
        let addr = self.local_addr()?;
        let metrics = self.metrics();
        let stop = Arc::clone(&self.stop);
        let task = tokio::spawn(self.run());
        Ok(MockServerHandle {
            addr,
            metrics,
            stop,
            task,
        })
    }

    /// Serves until the console load is done, `max_run` elapses or the
    /// server is stopped.
    pub async fn run(self) -> io::Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut session = Session::default();
        let mut buffer = [0u8; shared::MAX_DATAGRAM_SIZE];

        let max_run = self.setup.max_run;
        let deadline = async move {
            match max_run {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    info!("Mock server stopped");
                    break;
                }

                _ = &mut deadline => {
                    info!("Mock server reached its maximum run time");
                    self.send_shutdown(&session).await?;
                    break;
                }

                Some(event) = event_rx.recv() => match event {
                    ServerEvent::LoadFinished => {
                        info!("Console load finished");
                        self.send_shutdown(&session).await?;
                        break;
                    }
                },

                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, addr)) => {
                        self.handle_datagram(&buffer[..len], addr, &mut session, &event_tx)
                            .await?;
                    }
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        Ok(())
    }

    async fn handle_datagram(
        &self,
        buf: &[u8],
        addr: SocketAddr,
        session: &mut Session,
        event_tx: &mpsc::UnboundedSender<ServerEvent>,
    ) -> io::Result<()> {
        let request = match Request::decode(buf) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", addr, e);
                self.metrics.record_corrupted();
                return Ok(());
            }
        };

        match request {
            Request::Login { password } => {
                self.metrics.record_login();
                if self.setup.login_server_down {
                    debug!("Ignoring login from {}", addr);
                    return Ok(());
                }

                let success = password == self.setup.password;
                info!(
                    "Login from {} {}",
                    addr,
                    if success { "accepted" } else { "rejected" }
                );
                self.send(&Response::Login { success }, addr).await?;

                if success {
                    session.client = Some(addr);
                    session.logged_in = true;
                    if self.setup.has_console_load() && !session.load_started {
                        session.load_started = true;
                        self.spawn_console_load(addr, event_tx.clone());
                    }
                }
            }

            Request::Command { sequence, command } => {
                if self.setup.only_login || !session.logged_in {
                    trace!("Ignoring command C#{:03}", sequence);
                    return Ok(());
                }

                if command.is_empty() {
                    self.metrics.record_keep_alive();
                    if self.setup.dont_answer_keep_alive {
                        trace!("Not answering keep-alive C#{:03}", sequence);
                        return Ok(());
                    }
                } else {
                    self.metrics.record_command();
                }

                for response in self.responses_for(sequence, &command) {
                    self.send(&response, addr).await?;
                }
            }

            Request::Acknowledge { sequence } => {
                trace!("M#{:03} acknowledged", sequence);
                self.metrics.record_ack();
            }
        }

        Ok(())
    }

    fn responses_for(&self, sequence: u8, command: &str) -> Vec<Response> {
        match command {
            "" => vec![Response::Command {
                sequence,
                body: String::new(),
            }],
            "getplayers" => vec![Response::Command {
                sequence,
                body: players_listing(3),
            }],
            "getplayersmulti" => multipart_response(sequence, self.setup.disordered_multi_part),
            _ => vec![Response::Command {
                sequence,
                body: "Unknown command".to_string(),
            }],
        }
    }

    /// Spawns task that pushes the configured console messages to `client`
    fn spawn_console_load(&self, client: SocketAddr, event_tx: mpsc::UnboundedSender<ServerEvent>) {
        let socket = Arc::clone(&self.socket);
        let metrics = Arc::clone(&self.metrics);
        let setup = self.setup.clone();

        tokio::spawn(async move {
            let mut index: u64 = 0;
            while setup.console_messages < 0 || index < setup.console_messages as u64 {
                let message = Response::Message {
                    sequence: (index % 256) as u8,
                    text: format!("Console message #{}", index),
                };
                let mut bytes = message.encode();
                if setup.corrupt_console_messages {
                    bytes[2] ^= 0xFF;
                }

                let copies = if setup.repeated_console_messages { 2 } else { 1 };
                for _ in 0..copies {
                    if let Err(e) = socket.send_to(&bytes, client).await {
                        warn!("Failed to send console message: {}", e);
                        return;
                    }
                }
                metrics.record_console_message();
                index += 1;

                if setup.message_interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(setup.message_interval).await;
                }
            }

            let _ = event_tx.send(ServerEvent::LoadFinished);
        });
    }

    async fn send(&self, response: &Response, addr: SocketAddr) -> io::Result<()> {
        self.socket.send_to(&response.encode(), addr).await?;
        Ok(())
    }

    async fn send_shutdown(&self, session: &Session) -> io::Result<()> {
        if let Some(client) = session.client {
            debug!("Sending shutdown signal to {}", client);
            self.send(&Response::Shutdown, client).await?;
        }
        Ok(())
    }
}

pub fn players_listing(count: usize) -> String {
    let mut listing = String::from("Players on server:\n[#] [IP Address]:[Port] [Ping] [GUID] [Name]\n");
    for id in 0..count {
        listing.push_str(&format!(
            "{}   10.0.0.{}:2304    {}   {:032x}(OK) Player{}\n",
            id,
            id + 10,
            30 + id,
            id,
            id
        ));
    }
    listing.push_str(&format!("({} players in total)", count));
    listing
}

/// The ten parts of the `getplayersmulti` response, optionally shuffled.
pub fn multipart_response(sequence: u8, disordered: bool) -> Vec<Response> {
    let mut parts: Vec<Response> = (0..MULTIPART_PARTS)
        .map(|index| {
            let mut body = String::new();
            if index == 0 {
                body.push_str("Players on server:\n");
            }
            body.push_str(&format!(
                "{}   10.0.0.{}:2304    42   {:032x}(OK) Player{} (part {:03}/{:03})\n",
                index,
                index + 10,
                index,
                index,
                index + 1,
                MULTIPART_PARTS
            ));
            Response::CommandPart {
                sequence,
                total: MULTIPART_PARTS,
                index,
                body: body.into_bytes(),
            }
        })
        .collect();

    if disordered {
        parts.shuffle(&mut rand::thread_rng());
    }
    parts
}
