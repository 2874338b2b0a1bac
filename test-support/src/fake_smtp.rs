use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{
    net::{IpAddr, TcpStream},
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tokio::{
    sync::watch::{self, error::RecvError},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "quotes.test";

/// Collects message data and publishes each complete message on a watch channel.
#[derive(Clone)]
struct RecordingHandler {
    pending: Vec<u8>,
    delivered: Arc<watch::Sender<String>>,
}

impl Handler for RecordingHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let message = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
        debug!("Relay received message:\n{message}");
        self.delivered.send_replace(message);
        response::OK
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> Response {
        debug!("Relay accepted credentials for {authentication_id}");
        response::AUTH_OK
    }
}

/// Refuses every greeting and sender, so each delivery ends in an SMTP error reply.
#[derive(Clone)]
struct RefusingHandler;

impl Handler for RefusingHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> Response {
        response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> Response {
        response::INTERNAL_ERROR
    }
}

/// An SMTP relay on [`SMTP_PORT`] which keeps the content of the last message it received.
pub struct FakeSmtpServer {
    handler: Mutex<Option<RecordingHandler>>,
    received: tokio::sync::Mutex<watch::Receiver<String>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(String::new());
        Self {
            handler: Mutex::new(Some(RecordingHandler {
                pending: Vec::new(),
                delivered: Arc::new(sender),
            })),
            received: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Starts the relay on first call and waits until it accepts connections.
    pub fn start(&self) {
        if let Some(handler) = self.handler.lock().unwrap().take() {
            spawn_relay(handler, SMTP_PORT);
        }
    }

    /// Waits for the next message delivered after the last call.
    pub async fn last_mail_content(&self) -> Result<String, RecvError> {
        let mut received = self.received.lock().await;
        received.changed().await?;
        let content = received.borrow_and_update().clone();
        Ok(content)
    }

    /// Discards any message left over from an earlier test.
    pub async fn flush(&self) {
        let mut received = self.received.lock().await;
        let _ = timeout(Duration::from_millis(100), received.changed()).await;
        received.borrow_and_update();
    }

    pub fn url() -> String {
        format!("smtp://localhost:{SMTP_PORT}")
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts, once per process, a relay on [`POISONED_SMTP_PORT`] which refuses every message.
pub fn start_poisoned_smtp_server() {
    static POISONED: Once = Once::new();
    POISONED.call_once(|| spawn_relay(RefusingHandler, POISONED_SMTP_PORT));
}

fn spawn_relay<H: Handler + Clone + Send + 'static>(handler: H, port: u16) {
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("0.0.0.0:{port}"))
        .unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });

    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("Fake SMTP relay did not start listening on port {port}");
}
