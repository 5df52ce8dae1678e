mod common;

use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use common::{eventually, fast_settings, start_session};
use gsmlink::modem::{Command, EngineError, EngineSettings, ModemSession, PrefixConsumer, Status};
use gsmlink::validation::RequestError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_test::{assert_err, assert_ok};

/// A transport that may move between threads but not be shared, like a
/// serial port handle.
struct UnsyncStream {
    inner: DuplexStream,
    _unsync: PhantomData<Cell<()>>,
}

impl AsyncRead for UnsyncStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnsyncStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[tokio::test]
async fn simple_command_returns_ok_and_transcript() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CGNSPWR=1");
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await;
        (status, cmd)
    });

    assert_eq!(modem.read_request().await, "AT+CGNSPWR=1");
    modem.send(b"AT+CGNSPWR=1\r").await;
    modem.send(b"\r\nOK\r\n").await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(assert_ok!(status), Status::Ok);
    assert_eq!(cmd.status(), Status::Ok);
    assert_eq!(cmd.response(), "AT+CGNSPWR=1\r\r\nOK\r\n");
    assert!(!cmd.is_truncated());
    assert_eq!(session.metrics().commands_issued, 1);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn information_lines_are_captured() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CSQ");
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });
    modem.answer_ok("AT+CSQ", &["+CSQ: 20,0"]).await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(cmd.info_lines(), vec!["+CSQ: 20,0"]);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn error_final_code_is_reported_in_band() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CPIN?");
        engine.execute(&mut cmd, Duration::from_secs(2)).await
    });
    assert_eq!(modem.read_request().await, "AT+CPIN?");
    modem.send(b"AT+CPIN?\r\r\n+CME ERROR: 10\r\nERROR\r\n").await;

    let status = task.await.unwrap().unwrap();
    assert_eq!(status, Status::Error);
    assert!(matches!(status.into_result(), Err(EngineError::Rejected(Status::Error))));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn silence_times_out_and_late_answer_is_discarded() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let mut slow = Command::new("AT+COPS=?");
    let status = {
        let exec = engine.execute(&mut slow, Duration::from_millis(150));
        let (status, request) = tokio::join!(exec, modem.read_request());
        assert_eq!(request, "AT+COPS=?");
        status.unwrap()
    };
    assert_eq!(status, Status::Timeout);
    assert_eq!(slow.status(), Status::Timeout);
    assert_eq!(session.metrics().commands_timed_out, 1);

    // The answer shows up after the caller gave up.
    modem.send(b"AT+COPS=?\r\r\n+COPS: (2,\"NET\")\r\n\r\nOK\r\n").await;
    assert!(eventually(|| session.metrics().desync_discards >= 1).await);

    let next = tokio::spawn({
        let engine = session.engine();
        async move {
            let mut cmd = Command::new("AT");
            let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
            (status, cmd)
        }
    });
    modem.answer_ok("AT", &[]).await;
    let (status, cmd) = next.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(cmd.response(), "AT\r\r\nOK\r\n");
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn partial_leftovers_are_purged_before_next_command() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let mut first = Command::new("AT+CGNSINF");
    let (status, _) = tokio::join!(
        engine.execute(&mut first, Duration::from_millis(100)),
        async {
            modem.read_request().await;
            // Echo only; the final code never comes.
            modem.send(b"AT+CGNSINF\r\r\n+CGNSINF: 1,").await;
        }
    );
    assert_eq!(status.unwrap(), Status::Timeout);
    assert_eq!(first.response(), "");

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+GSN");
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });
    modem.answer_ok("AT+GSN", &["867856030000000"]).await;
    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(cmd.info_lines(), vec!["867856030000000"]);
    assert!(session.metrics().desync_discards >= 1);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_callers_never_interleave() {
    let (session, mut modem) = start_session(fast_settings());

    let spawn_cmd = |request: &'static str| {
        let engine = session.engine();
        tokio::spawn(async move {
            let mut cmd = Command::new(request);
            let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
            (status, cmd)
        })
    };
    let a = spawn_cmd("AT+CREG?");
    let b = spawn_cmd("AT+CGATT?");

    let first = modem.read_request().await;
    // The other caller must not write until this exchange is finished.
    assert!(modem.is_quiet(Duration::from_millis(100)).await);
    modem.send(format!("{first}\r\r\nOK\r\n").as_bytes()).await;
    let second = modem.read_request().await;
    assert_ne!(first, second);
    modem.send(format!("{second}\r\r\nOK\r\n").as_bytes()).await;

    for handle in [a, b] {
        let (status, cmd) = handle.await.unwrap();
        assert_eq!(status, Status::Ok);
        assert!(cmd.response().starts_with(cmd.request()));
    }
    assert_eq!(session.metrics().commands_issued, 2);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn guard_interval_spaces_commands() {
    let guard = Duration::from_millis(80);
    let settings = EngineSettings {
        guard_interval: guard,
        ..fast_settings()
    };
    let (session, mut modem) = start_session(settings);
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut first = Command::new("AT");
        engine.execute(&mut first, Duration::from_secs(2)).await.unwrap();
        let finished = Instant::now();
        let mut second = Command::new("ATE0");
        engine.execute(&mut second, Duration::from_secs(2)).await.unwrap();
        finished
    });

    modem.answer_ok("AT", &[]).await;
    assert_eq!(modem.read_request().await, "ATE0");
    let second_seen = Instant::now();
    modem.send(b"ATE0\r\r\nOK\r\n").await;

    let first_finished = task.await.unwrap();
    assert!(second_seen.duration_since(first_finished) >= guard - Duration::from_millis(10));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn data_entry_sends_payload_and_terminator() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+BTSPPSEND").with_payload(b"$GPRMC,hello".to_vec());
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });

    assert_eq!(modem.read_request().await, "AT+BTSPPSEND");
    modem.send(b"AT+BTSPPSEND\r> ").await;
    modem.expect_bytes(b"$GPRMC,hello\x1A").await;
    modem.send(b"\r\nSEND OK\r\n").await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::SendOk);
    assert_eq!(cmd.response(), "AT+BTSPPSEND\r> \r\nSEND OK\r\n");
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn notification_during_data_entry_stays_in_transcript() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+BTSPPSEND").with_payload(b"ping".to_vec());
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });

    assert_eq!(modem.read_request().await, "AT+BTSPPSEND");
    modem.send(b"AT+BTSPPSEND\r> ").await;
    modem.expect_bytes(b"ping\x1A").await;
    modem.send(b"\r\n+BTDISCONN: \"phone\"\r\n").await;
    modem.send(b"\r\nSEND OK\r\n").await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::SendOk);
    assert_eq!(
        cmd.response(),
        "AT+BTSPPSEND\r> \r\n+BTDISCONN: \"phone\"\r\n\r\nSEND OK\r\n"
    );
    assert_eq!(session.metrics().urcs_dispatched, 0);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn prompt_without_payload_sends_bare_terminator() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CMGS=\"+15550100\"");
        engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap()
    });

    assert_eq!(modem.read_request().await, "AT+CMGS=\"+15550100\"");
    modem.send(b"AT+CMGS=\"+15550100\"\r\r\n> ").await;
    modem.expect_bytes(b"\x1A").await;
    modem.send(b"\r\nERROR\r\n").await;

    assert_eq!(task.await.unwrap(), Status::Error);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn long_transcript_is_truncated_to_capacity() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CGMR").with_response_capacity(12);
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });
    modem.answer_ok("AT+CGMR", &["Revision:1418B05SIM800L24"]).await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert!(cmd.is_truncated());
    assert_eq!(cmd.response(), "AT+CGMR\r\r\nRe");
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn notification_interleaved_with_transcript_is_split_out() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CBC");
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });
    assert_eq!(modem.read_request().await, "AT+CBC");
    modem
        .send(b"\r\n+CPIN: READY\r\nAT+CBC\r\r\n+CBC: 0,87,4123\r\n\r\nOK\r\n")
        .await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(cmd.info_lines(), vec!["+CBC: 0,87,4123"]);
    assert!(!cmd.response().contains("+CPIN"));
    assert!(eventually(|| session.metrics().urcs_unclaimed == 1).await);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn notification_split_across_command_start_survives() {
    let (session, mut modem) = start_session(fast_settings());
    let (consumer, mut rx) = PrefixConsumer::new("network", &["+CREG"]);
    session.urc_registry().register(0, Arc::new(consumer));

    // Half a notification is already buffered when the command starts.
    modem.send(b"\r\n+CRE").await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let engine = session.engine();
    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT+CSQ");
        let status = engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap();
        (status, cmd)
    });
    assert_eq!(modem.read_request().await, "AT+CSQ");
    modem.send(b"G: 1\r\n").await;
    modem.send(b"AT+CSQ\r\r\n+CSQ: 20,0\r\n\r\nOK\r\n").await;

    let (status, cmd) = task.await.unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(cmd.info_lines(), vec!["+CSQ: 20,0"]);
    assert!(!cmd.response().contains("+CREG"));

    let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.text(), "+CREG: 1");
    let metrics = session.metrics();
    assert_eq!(metrics.desync_discards, 0);
    assert_eq!(metrics.urcs_dispatched, 1);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_requests_are_never_written() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let mut cmd = Command::new("AT\r\nATD123;");
    let err = assert_err!(engine.execute(&mut cmd, Duration::from_secs(1)).await);
    assert!(matches!(
        err,
        EngineError::InvalidRequest(RequestError::ControlByte { byte: b'\r', .. })
    ));

    let mut cmd = Command::new("AT+BTSPPSEND").with_payload(b"a\x1Ab".to_vec());
    let err = assert_err!(engine.execute(&mut cmd, Duration::from_secs(1)).await);
    assert!(matches!(
        err,
        EngineError::InvalidRequest(RequestError::TerminatorInPayload { offset: 1 })
    ));

    assert!(modem.is_quiet(Duration::from_millis(50)).await);
    assert_eq!(session.metrics().commands_issued, 0);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn closed_transport_fails_pending_and_future_commands() {
    let (session, mut modem) = start_session(fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT");
        let pending = engine.execute(&mut cmd, Duration::from_secs(5)).await;
        let mut cmd = Command::new("AT");
        let later = engine.execute(&mut cmd, Duration::from_secs(5)).await;
        (pending, later)
    });
    assert_eq!(modem.read_request().await, "AT");
    drop(modem);

    let (pending, later) = task.await.unwrap();
    assert!(matches!(pending, Err(EngineError::Closed)));
    assert!(matches!(later, Err(EngineError::Closed)));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn session_runs_over_a_send_only_transport() {
    let (engine_side, mut modem) = tokio::io::duplex(1024);
    let stream = UnsyncStream {
        inner: engine_side,
        _unsync: PhantomData,
    };
    let session = ModemSession::start(stream, fast_settings());
    let engine = session.engine();

    let task = tokio::spawn(async move {
        let mut cmd = Command::new("AT");
        engine.execute(&mut cmd, Duration::from_secs(2)).await.unwrap()
    });

    let mut request = [0u8; 3];
    modem.read_exact(&mut request).await.unwrap();
    assert_eq!(&request, b"AT\r");
    modem.write_all(b"AT\r\r\nOK\r\n").await.unwrap();

    assert_eq!(task.await.unwrap(), Status::Ok);
    session.shutdown().await.unwrap();
}
