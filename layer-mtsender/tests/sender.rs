//! End-to-end behaviour of `Sender` against an in-memory server.

use std::io;
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use layer_crypto::AuthKey;
use layer_mtsender::{
    Callbacks, Cipher, CipherError, Config, Endpoint, FrameReader, FrameWriter, InvocationError,
    Message, ProtocolError, Sender, SessionEvent, Transport, Update, event_channel,
    pack_plaintext, unpack_plaintext,
};
use layer_tl::mtproto::{
    BadMsgNotification, BadServerSalt, ContainedMessage, MsgContainer, MsgsAck, Ping, Pong,
    RpcError, RpcResult,
};
use layer_tl::{Deserializable, RemoteCall, Serializable};
use tokio::sync::mpsc;

// ─── In-memory transport ──────────────────────────────────────────────────────

struct MemoryTransport {
    conns: mpsc::UnboundedSender<ServerConn>,
}

struct Server {
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

fn memory_transport() -> (MemoryTransport, Server) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryTransport { conns: tx }, Server { conns: rx })
}

impl Server {
    async fn accept(&mut self) -> ServerConn {
        self.conns.recv().await.expect("transport was dropped")
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

struct MemoryWriter {
    tx:   mpsc::UnboundedSender<Vec<u8>>,
    fail: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn open(&self, _endpoint: &Endpoint) -> io::Result<(MemoryReader, MemoryWriter)> {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let fail = Arc::new(AtomicBool::new(false));
        let conn = ServerConn {
            to_client,
            from_client,
            fail: Arc::clone(&fail),
            session_id: 0,
            counter: 0,
        };
        self.conns
            .send(conn)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "server is gone"))?;
        Ok((MemoryReader { rx: client_rx }, MemoryWriter { tx: client_tx, fail }))
    }
}

impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "server closed"))
    }
}

impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused"));
        }
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "server closed"))
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Frames are the plaintext layout itself.
struct PlainCipher;

impl Cipher for PlainCipher {
    fn encrypt(&self, _: &AuthKey, session_id: i64, salt: i64, message: &Message) -> Result<Vec<u8>, CipherError> {
        Ok(pack_plaintext(salt, session_id, message))
    }

    fn decrypt(&self, _: &AuthKey, session_id: i64, frame: &[u8]) -> Result<Message, CipherError> {
        unpack_plaintext(frame, session_id)
    }
}

/// The server end of one connection.
struct ServerConn {
    to_client:   mpsc::UnboundedSender<Vec<u8>>,
    from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    fail:        Arc<AtomicBool>,
    session_id:  i64,
    counter:     i64,
}

/// A client frame as the server sees it.
struct Received {
    salt:    i64,
    message: Message,
}

impl ServerConn {
    fn for_session(mut self, session_id: i64) -> Self {
        self.session_id = session_id;
        self
    }

    async fn recv(&mut self) -> Received {
        let frame = self.from_client.recv().await.expect("client closed");
        let salt = i64::from_le_bytes(frame[..8].try_into().unwrap());
        let session_id = i64::from_le_bytes(frame[8..16].try_into().unwrap());
        assert_eq!(session_id, self.session_id, "frame for the wrong session");
        let message = unpack_plaintext(&frame, session_id).unwrap();
        Received { salt, message }
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_client.try_recv().ok()
    }

    fn next_id(&mut self) -> i64 {
        self.counter += 1;
        (now_secs() << 32) | (self.counter * 4 + 1)
    }

    /// Send `body` as a content-related message; returns its id.
    fn push(&mut self, body: Vec<u8>) -> i64 {
        let id = self.next_id();
        self.push_with_id(id, body);
        id
    }

    fn push_with_id(&mut self, id: i64, body: Vec<u8>) {
        let frame = pack_plaintext(0, self.session_id, &Message::new(id, 1, body));
        self.to_client.send(frame).unwrap();
    }

    fn push_raw(&self, frame: Vec<u8>) {
        self.to_client.send(frame).unwrap();
    }

    fn result(&mut self, req_msg_id: i64, result: Vec<u8>) -> i64 {
        self.push(RpcResult { req_msg_id, result }.to_bytes())
    }

    fn update(&mut self, payload: u32) -> i64 {
        let mut body = 0x74ae4240u32.to_le_bytes().to_vec();
        body.extend(payload.to_le_bytes());
        self.push(body)
    }

    fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// `echo#0badcafe value:int = int`
#[derive(Clone, Debug)]
struct Echo(u32);

impl Serializable for Echo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        0x0bad_cafe_u32.serialize(buf);
        self.0.serialize(buf);
    }
}

impl RemoteCall for Echo {
    type Return = u32;
}

fn auth_key() -> AuthKey {
    AuthKey::from_bytes([7u8; 256])
}

fn config() -> Config {
    Config { cipher: Arc::new(PlainCipher), ..Default::default() }
}

async fn connect_with(config: Config) -> (Sender<MemoryTransport>, Server, ServerConn) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (transport, mut server) = memory_transport();
    let endpoint = Endpoint::new(2, "memory");
    let sender = Sender::connect(transport, endpoint, auth_key(), 0x1111, config).await.unwrap();
    let conn = server.accept().await.for_session(sender.session_id());
    (sender, server, conn)
}

async fn connect() -> (Sender<MemoryTransport>, Server, ServerConn) {
    connect_with(config()).await
}

fn spawn_echo(
    sender: &Sender<MemoryTransport>,
    value: u32,
) -> tokio::task::JoinHandle<Result<u32, InvocationError>> {
    let sender = sender.clone();
    tokio::spawn(async move { sender.invoke(&Echo(value)).await })
}

fn echo_body(value: u32) -> Vec<u8> {
    Echo(value).to_bytes()
}

/// Id of the request in `message`, which may carry acks alongside it.
fn request_id(message: &Message) -> i64 {
    match MsgContainer::from_bytes(&message.body) {
        Ok(container) => container.messages.last().unwrap().msg_id,
        Err(_) => message.msg_id,
    }
}

// ─── Request / result ─────────────────────────────────────────────────────────

#[tokio::test]
async fn result_completes_the_caller() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 7);

    let req = conn.recv().await;
    assert_eq!(req.salt, 0x1111);
    assert_eq!(req.message.seq_no, 1);
    assert_eq!(req.message.msg_id % 4, 0);
    assert_eq!(req.message.body, echo_body(7));

    conn.result(req.message.msg_id, 42u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 42);
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test]
async fn rpc_error_reaches_only_its_caller() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    let req = conn.recv().await;

    let err = RpcError { error_code: 420, error_message: "FLOOD_WAIT_30".into() };
    conn.result(req.message.msg_id, err.to_bytes());

    match call.await.unwrap() {
        Err(InvocationError::Rpc(e)) => {
            assert_eq!((e.code, e.name.as_str(), e.value), (420, "FLOOD_WAIT", Some(30)));
            assert!(e.is("FLOOD_*"));
        }
        other => panic!("unexpected {other:?}"),
    }

    // the session is still usable
    let call = spawn_echo(&sender, 2);
    let req = conn.recv().await;
    assert_eq!(req.message.seq_no, 3);
    conn.result(req.message.msg_id, 2u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 2);
}

// ─── Acknowledgments ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pending_acks_ride_along_in_a_container() {
    let (sender, _server, mut conn) = connect().await;

    let call = spawn_echo(&sender, 1);
    let first = conn.recv().await;
    let result_id = conn.result(first.message.msg_id, 1u32.to_le_bytes().to_vec());
    call.await.unwrap().unwrap();

    let call = spawn_echo(&sender, 2);
    let outer = conn.recv().await.message;
    let container = MsgContainer::from_bytes(&outer.body).unwrap();
    assert_eq!(container.messages.len(), 2);
    assert_eq!(outer.seq_no % 2, 0);

    let ack = &container.messages[0];
    let request = &container.messages[1];
    assert_eq!(MsgsAck::from_bytes(&ack.body).unwrap().msg_ids, vec![result_id]);
    assert_eq!(ack.seq_no % 2, 0);
    assert_eq!(request.body, echo_body(2));
    assert_eq!(request.seq_no, 3);
    assert!(ack.msg_id < request.msg_id && request.msg_id < outer.msg_id);

    conn.result(request.msg_id, 2u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn full_ack_buffer_is_flushed_at_once() {
    let (_sender, _server, mut conn) = connect().await;
    let ids: Vec<i64> = (0..15).map(|n| conn.update(n)).collect();

    let flush = conn.recv().await.message;
    assert_eq!(flush.seq_no % 2, 0);
    assert_eq!(MsgsAck::from_bytes(&flush.body).unwrap().msg_ids, ids);
    assert!(conn.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn ack_timer_flushes_a_lone_id() {
    let (_sender, _server, mut conn) = connect().await;
    let id = conn.update(1);

    let started = tokio::time::Instant::now();
    let flush = conn.recv().await.message;
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(MsgsAck::from_bytes(&flush.body).unwrap().msg_ids, vec![id]);
}

#[tokio::test(start_paused = true)]
async fn piggyback_disarms_the_pending_timer() {
    let (sender, _server, mut conn) = connect().await;
    let update_id = conn.update(1);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let call = spawn_echo(&sender, 5);
    let outer = conn.recv().await.message;
    let container = MsgContainer::from_bytes(&outer.body).unwrap();
    assert_eq!(MsgsAck::from_bytes(&container.messages[0].body).unwrap().msg_ids, vec![update_id]);
    let result_id = conn.result(container.messages[1].msg_id, 5u32.to_le_bytes().to_vec());
    call.await.unwrap().unwrap();

    // only the result's own ack is flushed later, exactly once
    let flush = conn.recv().await.message;
    assert_eq!(MsgsAck::from_bytes(&flush.body).unwrap().msg_ids, vec![result_id]);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(conn.try_recv().is_none());
}

// ─── Inbound dispatch ─────────────────────────────────────────────────────────

#[tokio::test]
async fn container_with_a_later_inner_id_is_rejected() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    let req = conn.recv().await;

    let outer_id = conn.next_id();
    let container = MsgContainer {
        messages: vec![ContainedMessage {
            msg_id: outer_id + 4,
            seq_no: 1,
            body:   RpcResult { req_msg_id: req.message.msg_id, result: vec![1, 0, 0, 0] }.to_bytes(),
        }],
    };
    conn.push_with_id(outer_id, container.to_bytes());

    match call.await.unwrap() {
        Err(InvocationError::Protocol(ProtocolError::ContainerOrder { container_id, .. })) => {
            assert_eq!(container_id, outer_id)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(sender.invoke(&Echo(2)).await, Err(InvocationError::Io(_))));
}

#[tokio::test]
async fn container_contents_are_dispatched_in_order() {
    let (sender, _server, mut conn) = connect().await;
    let a = spawn_echo(&sender, 1);
    let first = conn.recv().await.message.msg_id;
    let b = spawn_echo(&sender, 2);
    let second = conn.recv().await.message.msg_id;

    let inner_a = conn.next_id();
    let inner_b = conn.next_id();
    let outer = conn.next_id();
    let container = MsgContainer {
        messages: vec![
            ContainedMessage {
                msg_id: inner_a,
                seq_no: 1,
                body:   RpcResult { req_msg_id: first, result: 10u32.to_le_bytes().to_vec() }.to_bytes(),
            },
            ContainedMessage {
                msg_id: inner_b,
                seq_no: 3,
                body:   RpcResult { req_msg_id: second, result: 20u32.to_le_bytes().to_vec() }.to_bytes(),
            },
        ],
    };
    conn.push_with_id(outer, container.to_bytes());

    assert_eq!(a.await.unwrap().unwrap(), 10);
    assert_eq!(b.await.unwrap().unwrap(), 20);
}

#[tokio::test]
async fn bare_rpc_error_ends_the_session() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    conn.recv().await;

    conn.push(RpcError { error_code: 500, error_message: "INTERNAL".into() }.to_bytes());
    assert!(matches!(
        call.await.unwrap(),
        Err(InvocationError::Protocol(ProtocolError::BareRpcError(_)))
    ));
}

#[tokio::test]
async fn unknown_payload_ends_the_session() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    conn.recv().await;

    conn.push(0x1234_5678u32.to_le_bytes().to_vec());
    assert!(matches!(
        call.await.unwrap(),
        Err(InvocationError::Protocol(ProtocolError::UnknownConstructor(0x1234_5678)))
    ));
}

#[tokio::test]
async fn transport_error_code_fails_the_sole_caller() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    conn.recv().await;

    conn.push_raw((-404i32).to_le_bytes().to_vec());
    assert!(matches!(call.await.unwrap(), Err(InvocationError::Transport(-404))));

    let call = spawn_echo(&sender, 2);
    let req = conn.recv().await;
    conn.result(req.message.msg_id, 2u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn transport_error_code_fails_every_caller_when_ambiguous() {
    let (sender, _server, mut conn) = connect().await;
    let a = spawn_echo(&sender, 1);
    conn.recv().await;
    let b = spawn_echo(&sender, 2);
    conn.recv().await;

    conn.push_raw((-429i32).to_le_bytes().to_vec());
    assert!(matches!(a.await.unwrap(), Err(InvocationError::Transport(-429))));
    assert!(matches!(b.await.unwrap(), Err(InvocationError::Transport(-429))));
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test]
async fn updates_reach_the_application_and_are_acked() {
    let (callbacks, mut events) = event_channel();
    let (sender, _server, mut conn) = connect_with(Config { callbacks, ..config() }).await;

    let id = conn.update(99);
    match events.next().await {
        Some(SessionEvent::Update(u)) => {
            assert_eq!(u.constructor_id, 0x74ae4240);
            assert_eq!(u.decode::<UpdatesProbe>().unwrap().0, 99);
        }
        other => panic!("unexpected {other:?}"),
    }

    sender.close().await;
    let flush = conn.recv().await.message;
    assert_eq!(MsgsAck::from_bytes(&flush.body).unwrap().msg_ids, vec![id]);
}

/// Reads the payload written by `ServerConn::update`.
struct UpdatesProbe(u32);

impl Deserializable for UpdatesProbe {
    fn deserialize(buf: layer_tl::deserialize::Buffer) -> layer_tl::deserialize::Result<Self> {
        buf.expect_id(0x74ae4240)?;
        Ok(Self(u32::deserialize(buf)?))
    }
}

/// Parks every update handler on a shared barrier, then reports the payload.
struct GatedHandler {
    gate: Arc<Barrier>,
    done: mpsc::UnboundedSender<u32>,
}

impl Callbacks for GatedHandler {
    fn on_update(&self, update: Update) {
        self.gate.wait();
        let _ = self.done.send(update.decode::<UpdatesProbe>().map_or(0, |u| u.0));
    }
}

#[tokio::test]
async fn blocked_update_handler_does_not_delay_results() {
    let gate = Arc::new(Barrier::new(2));
    let (done, mut handled) = mpsc::unbounded_channel();
    let callbacks = Arc::new(GatedHandler { gate: Arc::clone(&gate), done });
    let (sender, _server, mut conn) = connect_with(Config { callbacks, ..config() }).await;

    let call = spawn_echo(&sender, 7);
    let req = conn.recv().await.message;
    conn.update(1);
    conn.result(req.msg_id, 7u32.to_le_bytes().to_vec());

    // the handler is still parked while the result comes through
    let result = tokio::time::timeout(Duration::from_secs(5), call).await;
    assert_eq!(result.expect("result was held up by the update handler").unwrap().unwrap(), 7);

    tokio::task::spawn_blocking(move || gate.wait()).await.unwrap();
    assert_eq!(handled.recv().await, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_handlers_run_in_parallel() {
    let gate = Arc::new(Barrier::new(4));
    let (done, mut handled) = mpsc::unbounded_channel();
    let callbacks = Arc::new(GatedHandler { gate, done });
    let (_sender, _server, mut conn) =
        connect_with(Config { callbacks, update_workers: 4, ..config() }).await;

    for n in 0..4 {
        conn.update(n);
    }
    // the barrier opens only with four handlers inside it at once
    let mut seen = Vec::new();
    for _ in 0..4 {
        let n = tokio::time::timeout(Duration::from_secs(10), handled.recv()).await;
        seen.push(n.expect("handlers ran one at a time").unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn ping_is_answered_by_pong() {
    let (sender, _server, mut conn) = connect().await;
    let ping = tokio::spawn({
        let sender = sender.clone();
        async move { sender.ping().await }
    });

    let req = conn.recv().await.message;
    assert_eq!(req.seq_no % 2, 0);
    let ping_id = Ping::from_bytes(&req.body).unwrap().ping_id;
    conn.push(Pong { msg_id: req.msg_id, ping_id }.to_bytes());

    assert_eq!(ping.await.unwrap().unwrap().ping_id, ping_id);
}

// ─── Recovery ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bad_salt_resends_the_same_message() {
    let (callbacks, mut events) = event_channel();
    let (sender, _server, mut conn) = connect_with(Config { callbacks, ..config() }).await;
    let call = spawn_echo(&sender, 3);
    let original = conn.recv().await;

    conn.push(
        BadServerSalt {
            bad_msg_id:      original.message.msg_id,
            bad_msg_seqno:   original.message.seq_no,
            error_code:      48,
            new_server_salt: 0x2222,
        }
        .to_bytes(),
    );

    let resent = conn.recv().await;
    assert_eq!(resent.salt, 0x2222);
    assert_eq!(resent.message, original.message);
    assert_eq!(sender.salt(), 0x2222);
    assert_eq!(events.next().await, Some(SessionEvent::SaltChanged(0x2222)));

    conn.result(original.message.msg_id, 3u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 3);
}

#[tokio::test]
async fn msg_id_too_low_relocates_the_caller() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 4);
    let original = conn.recv().await.message;

    // the server clock is well ahead of ours
    let server_id = ((now_secs() + 1000) << 32) | 1;
    conn.push_with_id(
        server_id,
        BadMsgNotification {
            bad_msg_id:    original.msg_id,
            bad_msg_seqno: original.seq_no,
            error_code:    BadMsgNotification::MSG_ID_TOO_LOW,
        }
        .to_bytes(),
    );

    let resent = conn.recv().await.message;
    assert!(resent.msg_id > original.msg_id);
    assert!((resent.msg_id >> 32) >= now_secs() + 999);
    assert_eq!(resent.seq_no, original.seq_no);
    assert_eq!(resent.body, original.body);

    conn.result(resent.msg_id, 4u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 4);

    // a straggling answer to the old id changes nothing
    conn.result(original.msg_id, 5u32.to_le_bytes().to_vec());
    let call = spawn_echo(&sender, 6);
    let next = conn.recv().await.message;
    assert!(next.msg_id > resent.msg_id);
    conn.result(request_id(&next), 6u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 6);
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test]
async fn seqno_parity_is_corrected() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 8);
    let original = conn.recv().await.message;

    conn.push(
        BadMsgNotification {
            bad_msg_id:    original.msg_id,
            bad_msg_seqno: original.seq_no,
            error_code:    BadMsgNotification::SEQNO_EXPECTED_EVEN,
        }
        .to_bytes(),
    );

    let resent = conn.recv().await.message;
    assert!(resent.msg_id > original.msg_id);
    assert_eq!(resent.seq_no, original.seq_no & !1);
    conn.result(resent.msg_id, 8u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 8);
}

fn bad_msg(bad: &Message, error_code: i32) -> Vec<u8> {
    BadMsgNotification { bad_msg_id: bad.msg_id, bad_msg_seqno: bad.seq_no, error_code }.to_bytes()
}

#[tokio::test]
async fn seqno_counter_moves_forward_and_back() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 12);
    let original = conn.recv().await.message;
    assert_eq!(original.seq_no, 1);

    // too low: the counter jumps from 1 to 17
    conn.push(bad_msg(&original, BadMsgNotification::SEQNO_TOO_LOW));
    let raised = conn.recv().await.message;
    assert!(raised.msg_id > original.msg_id);
    assert_eq!(raised.seq_no, 35);
    assert_eq!(raised.body, original.body);

    // too high: back from 18 to 10
    conn.push(bad_msg(&raised, BadMsgNotification::SEQNO_TOO_HIGH));
    let lowered = conn.recv().await.message;
    assert!(lowered.msg_id > raised.msg_id);
    assert_eq!(lowered.seq_no, 21);

    conn.result(lowered.msg_id, 12u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 12);
}

#[tokio::test]
async fn seqno_counter_never_goes_below_zero() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 13);
    let original = conn.recv().await.message;

    conn.push(bad_msg(&original, BadMsgNotification::SEQNO_TOO_HIGH));
    let resent = conn.recv().await.message;
    assert!(resent.msg_id > original.msg_id);
    assert_eq!(resent.seq_no, 1);

    conn.result(resent.msg_id, 13u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 13);
}

/// Completes one call so the next request travels with an ack, and returns
/// the container carrying that next request.
async fn request_in_container(
    sender: &Sender<MemoryTransport>,
    conn: &mut ServerConn,
    value: u32,
) -> (tokio::task::JoinHandle<Result<u32, InvocationError>>, Message) {
    let warmup = spawn_echo(sender, 0);
    let first = conn.recv().await.message;
    conn.result(first.msg_id, 0u32.to_le_bytes().to_vec());
    warmup.await.unwrap().unwrap();

    let call = spawn_echo(sender, value);
    let outer = conn.recv().await.message;
    assert_eq!(MsgContainer::from_bytes(&outer.body).unwrap().messages.len(), 2);
    (call, outer)
}

#[tokio::test]
async fn bad_salt_resends_a_whole_container() {
    let (sender, _server, mut conn) = connect().await;
    let (call, outer) = request_in_container(&sender, &mut conn, 14).await;
    let request = MsgContainer::from_bytes(&outer.body).unwrap().messages[1].clone();

    conn.push(
        BadServerSalt {
            bad_msg_id:      request.msg_id,
            bad_msg_seqno:   request.seq_no,
            error_code:      48,
            new_server_salt: 0x3333,
        }
        .to_bytes(),
    );

    let resent = conn.recv().await;
    assert_eq!(resent.salt, 0x3333);
    assert_eq!(resent.message, outer);

    conn.result(request.msg_id, 14u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 14);
}

#[tokio::test]
async fn msg_id_correction_renews_a_container_inside_out() {
    let (sender, _server, mut conn) = connect().await;
    let (call, outer) = request_in_container(&sender, &mut conn, 15).await;
    let before = MsgContainer::from_bytes(&outer.body).unwrap();

    let server_id = ((now_secs() + 1000) << 32) | 1;
    conn.push_with_id(server_id, bad_msg(&outer, BadMsgNotification::MSG_ID_TOO_LOW));

    let resent = conn.recv().await.message;
    let after = MsgContainer::from_bytes(&resent.body).unwrap();
    assert!(resent.msg_id > outer.msg_id);
    assert_eq!(after.messages.len(), 2);
    for (old, new) in before.messages.iter().zip(&after.messages) {
        assert!(new.msg_id > old.msg_id);
        assert!(new.msg_id < resent.msg_id);
        assert_eq!((new.seq_no, &new.body), (old.seq_no, &old.body));
    }
    assert!(after.messages[0].msg_id < after.messages[1].msg_id);

    conn.result(after.messages[1].msg_id, 15u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 15);
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test]
async fn unhandled_bad_msg_codes_resend_nothing() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 9);
    let original = conn.recv().await.message;

    conn.push(
        BadMsgNotification {
            bad_msg_id:    original.msg_id,
            bad_msg_seqno: original.seq_no,
            error_code:    BadMsgNotification::MSG_TOO_OLD,
        }
        .to_bytes(),
    );
    conn.result(original.msg_id, 9u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 9);
    assert!(conn.try_recv().is_none());
}

// ─── Failures and lifecycle ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn timeout_leaves_late_replies_harmless() {
    let (sender, _server, mut conn) = connect().await;
    let call = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.invoke_with_timeout(&Echo(1), Duration::from_secs(5)).await })
    };
    let req = conn.recv().await.message;

    assert!(matches!(call.await.unwrap(), Err(InvocationError::Timeout(d)) if d == Duration::from_secs(5)));

    conn.result(req.msg_id, 1u32.to_le_bytes().to_vec());
    let call = spawn_echo(&sender, 2);
    let next = conn.recv().await.message;
    conn.result(request_id(&next), 2u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 2);
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_reach_the_wire_in_id_order() {
    let (sender, _server, mut conn) = connect().await;
    let calls: Vec<_> = (0..20).map(|n| spawn_echo(&sender, n)).collect();

    let mut frames = Vec::new();
    for _ in 0..20 {
        frames.push(conn.recv().await.message);
    }
    for pair in frames.windows(2) {
        assert!(pair[0].msg_id < pair[1].msg_id, "{} sent after {}", pair[1].msg_id, pair[0].msg_id);
    }

    for frame in &frames {
        let value = u32::from_le_bytes(frame.body[4..8].try_into().unwrap());
        conn.result(frame.msg_id, value.to_le_bytes().to_vec());
    }
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), n as u32);
    }
}

#[tokio::test]
async fn failed_write_leaves_no_pending_entry() {
    let (sender, _server, conn) = connect().await;
    conn.fail_writes();

    assert!(matches!(sender.invoke(&Echo(1)).await, Err(InvocationError::Io(_))));
    assert_eq!(sender.pending_requests(), 0);
}

#[tokio::test]
async fn lost_connection_fails_pending_callers() {
    let (sender, _server, mut conn) = connect().await;
    let call = spawn_echo(&sender, 1);
    conn.recv().await;
    drop(conn);

    assert!(matches!(call.await.unwrap(), Err(InvocationError::Io(_))));
}

#[tokio::test]
async fn reset_starts_a_new_session() {
    let (sender, mut server, mut conn) = connect().await;
    let old_session = sender.session_id();
    let call = spawn_echo(&sender, 1);
    conn.recv().await;

    sender.reset_connection().await.unwrap();
    assert!(matches!(call.await.unwrap(), Err(InvocationError::Dropped)));
    assert_ne!(sender.session_id(), old_session);

    let mut conn = server.accept().await.for_session(sender.session_id());
    let call = spawn_echo(&sender, 2);
    let req = conn.recv().await.message;
    assert_eq!(req.seq_no, 1);
    conn.result(req.msg_id, 2u32.to_le_bytes().to_vec());
    assert_eq!(call.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn closed_session_refuses_requests() {
    let (sender, _server, _conn) = connect().await;
    sender.close().await;
    assert!(matches!(sender.invoke(&Echo(1)).await, Err(InvocationError::Io(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_invoke_from_a_plain_thread() {
    let (sender, _server, mut conn) = connect().await;
    let caller = {
        let sender = sender.clone();
        std::thread::spawn(move || sender.invoke_blocking(&Echo(11), Duration::from_secs(10)))
    };

    let req = conn.recv().await.message;
    conn.result(req.msg_id, 11u32.to_le_bytes().to_vec());

    let result = tokio::task::spawn_blocking(move || caller.join().unwrap()).await.unwrap();
    assert_eq!(result.unwrap(), 11);
}
