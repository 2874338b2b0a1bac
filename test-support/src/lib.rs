pub mod fake_recaptcha;
pub mod fake_resend;
pub mod fake_smtp;

use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::sync::Once;
use tokio::net::TcpListener;

pub fn setup_logging() {
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| {
        CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )])
        .unwrap();
    });
}

/// Binds a listener on an ephemeral local port and returns its address.
pub(crate) async fn bind_local() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    (listener, format!("http://{address}"))
}

/// A URL on which nothing is listening.
pub async fn unreachable_url() -> String {
    let (listener, url) = bind_local().await;
    drop(listener);
    url
}
