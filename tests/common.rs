//! Test utilities & fixtures.
//! A scripted modem on the far end of an in-memory duplex stream.

use std::time::Duration;

use gsmlink::modem::{EngineSettings, ModemSession};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Settings tuned for fast tests: tiny guard, shortest poll.
#[allow(dead_code)]
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        command_timeout: Duration::from_secs(2),
        guard_interval: Duration::from_millis(1),
        poll_interval: Duration::from_millis(20),
        urc_release_timeout: Duration::from_secs(2),
        ..EngineSettings::default()
    }
}

/// The modem side of a session.
pub struct FakeModem {
    stream: DuplexStream,
}

#[allow(dead_code)]
impl FakeModem {
    /// Read one request line (up to and including `\r`) and return it without
    /// the terminator. Panics after two seconds of silence.
    pub async fn read_request(&mut self) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            tokio::time::timeout(Duration::from_secs(2), self.stream.read_exact(&mut byte))
                .await
                .expect("request within 2s")
                .expect("stream open");
            if byte[0] == b'\r' {
                return String::from_utf8(line).expect("ascii request");
            }
            line.push(byte[0]);
        }
    }

    /// Read exactly `expected.len()` bytes and compare.
    pub async fn expect_bytes(&mut self, expected: &[u8]) {
        let mut got = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), self.stream.read_exact(&mut got))
            .await
            .expect("bytes within 2s")
            .expect("stream open");
        assert_eq!(got, expected);
    }

    /// True if nothing arrives from the engine within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        let mut byte = [0u8; 1];
        tokio::time::timeout(wait, self.stream.read(&mut byte))
            .await
            .is_err()
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to engine");
        self.stream.flush().await.expect("flush");
    }

    /// Read a request, check it, echo it and answer with `OK`.
    pub async fn answer_ok(&mut self, request: &str, info: &[&str]) {
        assert_eq!(self.read_request().await, request);
        let mut reply = format!("{request}\r\r\n");
        for line in info {
            reply.push_str(line);
            reply.push_str("\r\n\r\n");
        }
        reply.push_str("OK\r\n");
        self.send(reply.as_bytes()).await;
    }
}

/// Start a session wired to a fake modem.
pub fn start_session(settings: EngineSettings) -> (ModemSession, FakeModem) {
    let (engine_side, modem_side) = tokio::io::duplex(4096);
    let session = ModemSession::start(engine_side, settings);
    (session, FakeModem { stream: modem_side })
}

/// Poll `check` until it holds or a second passes.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
