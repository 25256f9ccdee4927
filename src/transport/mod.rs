//! The transport core: identification exchange, the reader and writer
//! pumps, central packet dispatch and the session lifecycle.

mod codec;
mod id;
pub(crate) mod kex;
mod keys;

#[cfg(test)]
mod tests;

pub use kex::HostKeyVerifier;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, MutexGuard,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{mpsc, watch, Mutex},
};

use crate::{
    error::{DisconnectedBy, DisconnectedError},
    msg::{self, DisconnectReason},
    service::{Dispatcher, Service},
    Buffer, Config, Error, Result,
};
use codec::{Decoder, Encoder};
use kex::KeyExchanger;

/// Re-key after 1GiB of exchanged data as recommended per the RFC.
const REKEY_BYTES_THRESHOLD: usize = 0x40000000;

/// A trait alias for the byte stream under the transport.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Socket for T {}

/// Observable lifecycle states of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// A key exchange is running, the initial one for a fresh transport.
    Kex,

    /// Keys are in place, no service requested yet.
    KexDone,

    /// A `SERVICE_REQUEST` is in flight.
    ServiceRequest,

    /// The requested service is active and receives the traffic.
    Service,

    /// The transport failed; the cause is surfaced to every caller.
    Error,

    /// The transport was shut down deliberately.
    Stopped,
}

fn locked<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Everything the pumps, the exchanger and the user handles share.
pub(crate) struct Shared {
    pub config: Config,
    pub remote: String,
    pub peer_id: String,

    /// The lifecycle state, observed through the watch as a condition
    /// variable; terminal states are sticky.
    pub state: watch::Sender<State>,

    /// The write lock: whoever holds the encoder owns the outbound order.
    pub encoder: Arc<Mutex<Encoder>>,

    /// Bounded queue drained by the writer pump.
    pub outbound: mpsc::Sender<Vec<u8>>,

    pub exchanger: Mutex<KeyExchanger>,
    pub dispatcher: StdMutex<Dispatcher>,
    pub verifiers: StdMutex<Vec<Box<dyn HostKeyVerifier>>>,

    pub session_id: StdMutex<Option<Vec<u8>>>,
    pub fault: StdMutex<Option<Arc<Error>>>,
    pub authed: Arc<AtomicBool>,
    pub stopping: AtomicBool,
}

impl Shared {
    /// Move to `to` unless a terminal state was reached already.
    pub fn advance(&self, to: State) {
        self.state.send_if_modified(|state| {
            if *state == to || matches!(*state, State::Error | State::Stopped) {
                return false;
            }

            tracing::trace!("Transport state: {state:?} -> {to:?}");
            *state = to;

            true
        });
    }

    /// Encode under the held write lock and enqueue for the writer.
    pub async fn send_with(&self, encoder: &mut Encoder, payload: &[u8]) -> Result<u32> {
        if payload.is_empty() {
            return Err(Error::Protocol("refusing to send an empty payload"));
        }

        let (seq, bytes) = encoder.encode(payload)?;

        self.outbound
            .send(bytes)
            .await
            .map_err(|_| Error::Protocol("the writer is gone"))?;

        tracing::trace!("-~> #{seq}: ^{:#x} ({} bytes)", payload[0], payload.len());

        Ok(seq)
    }

    /// Walk the verifier chain in registration order.
    pub fn verify_host_key(&self, key: &ssh_key::PublicKey) -> bool {
        locked(&self.verifiers)
            .iter()
            .any(|verifier| verifier.verify(&self.remote, key))
    }

    /// Pin the session identifier to the first exchange hash.
    pub fn remember_session(&self, session_id: &[u8]) {
        locked(&self.session_id).get_or_insert_with(|| session_id.to_vec());
    }

    /// The stored terminal cause, ready to hand to a caller.
    fn cause(&self) -> Option<Error> {
        locked(&self.fault).as_ref().map(|cause| match cause.as_ref() {
            Error::Disconnected(err) => Error::Disconnected(err.clone()),
            _ => Error::Faulted(cause.clone()),
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Terminal teardown: record the cause, release the exchange, notify
    /// the peer when warranted, then flip to `terminal`. Idempotent.
    async fn shutdown(
        &self,
        cause: Arc<Error>,
        notice: Option<(DisconnectReason, String)>,
        terminal: State,
    ) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        locked(&self.fault).get_or_insert(cause.clone());

        // Drop the kex write-lock first so a disconnect can still go out
        self.exchanger.lock().await.abort(&cause);
        locked(&self.dispatcher).fail(&cause);

        if let Some((reason, description)) = notice {
            let mut payload = Buffer::with_message(msg::DISCONNECT);
            payload.put_u32(reason.code());
            payload.put_string(description.as_bytes());
            payload.put_string(b""); // language tag

            if let Ok(mut encoder) =
                tokio::time::timeout(self.config.timeout, self.encoder.lock()).await
            {
                let _ = self.send_with(&mut encoder, payload.as_slice()).await;
            }
        }

        // The writer drains what is queued once it observes the state
        self.advance(terminal);
    }

    /// Protocol-level failure: disconnect the peer with the matching
    /// reason code and surface the cause to every blocked caller.
    pub(crate) async fn fail(&self, error: Error) {
        tracing::warn!("Transport failure: {error}");

        let notice = error
            .disconnect_reason()
            .map(|reason| (reason, error.to_string()));

        self.shutdown(Arc::new(error), notice, State::Error).await;
    }
}

/// A client-side SSH transport over a [`Socket`].
///
/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Connect over an established byte stream: run the identification
    /// exchange, spawn the pumps and drive the initial key exchange to
    /// completion.
    ///
    /// `verifiers` seeds the host-key trust chain; a transport without at
    /// least one accepting verifier refuses every peer.
    pub async fn connect<S: Socket>(
        stream: S,
        remote: impl Into<String>,
        config: Config,
        verifiers: Vec<Box<dyn HostKeyVerifier>>,
    ) -> Result<Self> {
        let remote = remote.into();
        let mut stream = stream;

        let (v_c, v_s) =
            tokio::time::timeout(config.timeout, id::exchange(&mut stream, &config.software))
                .await??;

        let authed = Arc::new(AtomicBool::new(false));
        let (outbound, queue) = mpsc::channel(config.queue_depth);
        let decoder = Decoder::new(authed.clone());

        let shared = Arc::new(Shared {
            exchanger: Mutex::new(KeyExchanger::new(v_c, v_s.clone())),
            config,
            remote,
            peer_id: v_s,
            state: watch::Sender::new(State::Kex),
            encoder: Arc::new(Mutex::new(Encoder::new(authed.clone()))),
            outbound,
            dispatcher: Default::default(),
            verifiers: StdMutex::new(verifiers),
            session_id: Default::default(),
            fault: Default::default(),
            authed,
            stopping: AtomicBool::new(false),
        });

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(write_pump(shared.clone(), writer, queue));
        tokio::spawn(read_pump(shared.clone(), reader, decoder));

        let transport = Self { shared };
        transport.rekey().await?;

        Ok(transport)
    }

    /// Promote a local failure to a connection-level one: the transport is
    /// torn down and every caller observes the cause from now on.
    async fn promote(&self, error: Error) -> Error {
        match error {
            // Already propagated by the failure path
            error @ (Error::Faulted(_) | Error::Disconnected(_)) => error,
            error => {
                let notice = error
                    .disconnect_reason()
                    .map(|reason| (reason, error.to_string()));
                let cause = Arc::new(error);

                self.shared
                    .shutdown(cause.clone(), notice, State::Error)
                    .await;

                Error::Faulted(cause)
            }
        }
    }

    /// Append a verifier to the ordered host-key trust chain.
    pub fn add_host_key_verifier(&self, verifier: impl HostKeyVerifier + 'static) {
        locked(&self.shared.verifiers).push(Box::new(verifier));
    }

    /// Run a key exchange and wait for both directions to switch; a no-op
    /// join when one is already in flight.
    pub async fn rekey(&self) -> Result<()> {
        let started = {
            let mut exchanger = self.shared.exchanger.lock().await;
            exchanger.start(&self.shared).await
        };

        let outcome = match started {
            Ok(done) => done.wait(self.shared.config.timeout).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(error) => Err(self.promote(error).await),
        }
    }

    /// Encode and enqueue one packet, returning the sequence number used.
    ///
    /// Blocks while a key exchange holds the write lock, so no user packet
    /// ever straddles a rekey.
    pub async fn write_packet(&self, payload: Buffer) -> Result<u32> {
        let timeout = self.shared.config.timeout;

        let outcome = tokio::time::timeout(timeout, async {
            self.shared.ensure_alive()?;

            let mut encoder = self.shared.encoder.lock().await;
            self.shared.ensure_alive()?;

            let before = encoder.since_install();
            let seq = self.shared.send_with(&mut encoder, payload.as_slice()).await?;
            let crossed = before < REKEY_BYTES_THRESHOLD
                && encoder.since_install() >= REKEY_BYTES_THRESHOLD;
            drop(encoder);

            if crossed {
                let this = self.clone();
                tokio::spawn(async move {
                    let _ = this.rekey().await;
                });
            }

            Ok(seq)
        })
        .await;

        match outcome {
            Ok(Ok(seq)) => Ok(seq),
            Ok(Err(error)) => Err(error),
            // A wedged queue is a connection-level problem
            Err(elapsed) => Err(self.promote(elapsed.into()).await),
        }
    }

    /// Request `service` from the peer; on `SERVICE_ACCEPT` the service
    /// becomes the destination of every non-transport packet.
    pub async fn request_service(&self, service: Box<dyn Service>) -> Result<()> {
        if *self.shared.state.borrow() != State::KexDone {
            return Err(Error::Protocol(
                "a service can only be requested once key exchange is done",
            ));
        }

        let (name, accepted) = locked(&self.shared.dispatcher).begin(service)?;
        self.shared.advance(State::ServiceRequest);

        let mut request = Buffer::with_message(msg::SERVICE_REQUEST);
        request.put_string(name.as_bytes());
        self.write_packet(request).await?;

        match accepted.wait(self.shared.config.timeout).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.promote(error).await),
        }
    }

    /// Send `SSH_MSG_DISCONNECT` and shut the transport down. Idempotent.
    pub async fn disconnect(&self, reason: DisconnectReason, description: &str) {
        let cause = Error::Disconnected(DisconnectedError {
            by: DisconnectedBy::Us,
            reason,
            description: description.into(),
        });

        self.shared
            .shutdown(
                Arc::new(cause),
                Some((reason, description.to_string())),
                State::Stopped,
            )
            .await;
    }

    /// Whether the transport still moves packets.
    pub fn is_running(&self) -> bool {
        !matches!(*self.shared.state.borrow(), State::Error | State::Stopped)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    /// Block until the transport reaches `target`, or fail with the stored
    /// cause when it dies first.
    pub async fn await_state(&self, target: State) -> Result<()> {
        let mut rx = self.shared.state.subscribe();

        let reached = tokio::time::timeout(
            self.shared.config.timeout,
            rx.wait_for(|state| {
                *state == target || matches!(state, State::Error | State::Stopped)
            }),
        )
        .await?
        .map_err(|_| Error::Protocol("the state watch is gone"))?;

        let reached = *reached;
        if reached == target {
            Ok(())
        } else {
            Err(self
                .shared
                .cause()
                .unwrap_or(Error::Protocol("the transport stopped")))
        }
    }

    /// The session identifier, the exchange hash of the first kex.
    pub fn session_id(&self) -> Option<Vec<u8>> {
        locked(&self.shared.session_id).clone()
    }

    /// The peer's identification line.
    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    /// Mark user authentication as completed, enabling the delayed
    /// compression modes on both directions.
    pub fn set_authed(&self) {
        self.shared.authed.store(true, Ordering::SeqCst);
    }

    /// Whether user authentication was reported complete.
    pub fn authed_hint(&self) -> bool {
        self.shared.authed.load(Ordering::SeqCst)
    }
}

async fn read_pump<S: Socket>(shared: Arc<Shared>, mut reader: ReadHalf<S>, mut decoder: Decoder) {
    if let Err(error) = pump_packets(&shared, &mut reader, &mut decoder).await {
        if !shared.stopping.load(Ordering::SeqCst) {
            shared.fail(error).await;
        }
    }
}

async fn pump_packets<S: Socket>(
    shared: &Arc<Shared>,
    reader: &mut ReadHalf<S>,
    decoder: &mut Decoder,
) -> Result<()> {
    let mut state = shared.state.subscribe();
    let mut buf = vec![0u8; 32 * 1024];
    let mut packets = Vec::new();

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = state.wait_for(|state| matches!(state, State::Error | State::Stopped)) => {
                return Ok(());
            }
        };

        if read == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        let mut chunk = &buf[..read];
        while !chunk.is_empty() {
            let before = decoder.since_install();

            // The decoder stops at NEWKEYS so the switched keys apply to
            // whatever follows in the same chunk
            let consumed = decoder.feed(chunk, &mut packets)?;
            chunk = &chunk[consumed..];

            for (seq, payload) in packets.drain(..) {
                dispatch(shared, decoder, seq, payload).await?;
            }

            if before < REKEY_BYTES_THRESHOLD && decoder.since_install() >= REKEY_BYTES_THRESHOLD {
                let transport = Transport {
                    shared: shared.clone(),
                };
                tokio::spawn(async move {
                    let _ = transport.rekey().await;
                });
            }
        }
    }
}

async fn dispatch(
    shared: &Arc<Shared>,
    decoder: &mut Decoder,
    seq: u32,
    mut payload: Buffer,
) -> Result<()> {
    let message = payload.get_u8()?;
    tracing::trace!("<~- #{seq}: ^{message:#x} ({} bytes)", payload.as_slice().len());

    match message {
        msg::DISCONNECT => {
            let reason = DisconnectReason::from(payload.get_u32()?);
            let description = String::from_utf8_lossy(&payload.get_string()?).into_owned();

            tracing::warn!("Peer disconnected with `{reason:?}`: {description}");

            let cause = Error::Disconnected(DisconnectedError {
                by: DisconnectedBy::Them,
                reason,
                description,
            });
            shared.shutdown(Arc::new(cause), None, State::Stopped).await;

            Ok(())
        }
        msg::IGNORE => {
            let data = payload.get_string()?;
            tracing::debug!("Received an 'ignore' message with length {}", data.len());

            Ok(())
        }
        msg::UNIMPLEMENTED => {
            let rejected = payload.get_u32()?;
            tracing::debug!("Received an 'unimplemented' message about packet #{rejected}");

            Ok(())
        }
        msg::DEBUG => {
            let _always_display = payload.get_bool()?;
            let message = String::from_utf8_lossy(&payload.get_string()?).into_owned();
            tracing::debug!("Received a 'debug' message: {message}");

            Ok(())
        }
        msg::SERVICE_ACCEPT => {
            let name = payload.get_string()?;
            locked(&shared.dispatcher).accept(&name)?;
            shared.advance(State::Service);

            Ok(())
        }
        message if message == msg::KEXINIT || message == msg::NEWKEYS || msg::KEX_FOLLOWUP.contains(&message) => {
            let mut exchanger = shared.exchanger.lock().await;

            exchanger.handle(message, payload, decoder, shared).await
        }
        message => {
            if shared.exchanger.lock().await.engaged() {
                return Err(Error::Protocol("unexpected message during key exchange"));
            }

            if *shared.state.borrow() == State::ServiceRequest {
                return Err(Error::Protocol(
                    "unexpected message while awaiting SERVICE_ACCEPT",
                ));
            }

            // The active service keeps receiving traffic even while a
            // rekey is pending on our side
            {
                let mut dispatcher = locked(&shared.dispatcher);
                if dispatcher.is_active() {
                    return dispatcher.deliver(message, payload);
                }
            }

            // RFC 4253 § 11.4
            tracing::debug!("Answering message ^{message:#x} with 'unimplemented'");

            let mut reply = Buffer::with_message(msg::UNIMPLEMENTED);
            reply.put_u32(seq);

            match shared.encoder.try_lock() {
                Ok(mut encoder) => shared
                    .send_with(&mut encoder, reply.as_slice())
                    .await
                    .map(|_| ()),
                // A rekey holds the write lock, skip the courtesy reply
                Err(_) => Ok(()),
            }
        }
    }
}

async fn write_pump<S: Socket>(
    shared: Arc<Shared>,
    mut writer: WriteHalf<S>,
    mut queue: mpsc::Receiver<Vec<u8>>,
) {
    let mut state = shared.state.subscribe();

    let result: Result<()> = async {
        loop {
            let item = tokio::select! {
                biased;

                item = queue.recv() => item,
                _ = async {
                    loop {
                        if matches!(*state.borrow(), State::Error | State::Stopped) {
                            break;
                        }
                        if state.changed().await.is_err() {
                            break;
                        }
                    }
                } => {
                    // Flush what was queued before the teardown, then close
                    while let Ok(bytes) = queue.try_recv() {
                        writer.write_all(&bytes).await?;
                    }

                    None
                }
            };

            match item {
                Some(bytes) => {
                    writer.write_all(&bytes).await?;
                    writer.flush().await?;
                }
                None => break,
            }
        }

        writer.flush().await?;
        let _ = writer.shutdown().await;

        Ok(())
    }
    .await;

    if let Err(error) = result {
        if !shared.stopping.load(Ordering::SeqCst) {
            shared.fail(error).await;
        }
    }
}
