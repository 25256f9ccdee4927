//! The key exchanger: KEXINIT negotiation, the exchange itself and the
//! atomic switch to the derived keys on NEWKEYS.

use std::sync::Arc;

use rand::RngCore;
use tokio::sync::OwnedMutexGuard;

use super::{
    codec::{Decoder, Encoder},
    keys::Keys,
    Shared, State,
};
use crate::{
    algorithm::{
        self,
        kex::{Exchange, RunningKex},
        Cipher, Compress, Hmac, Kex, Key,
    },
    buffer::NameList,
    config::Algorithms,
    msg,
    sync::Event,
    Buffer, Error, Result,
};

/// Checks a server host key against local trust policy.
///
/// Verifiers run in registration order; the first one accepting wins, and
/// a key every verifier refuses tears the session down.
pub trait HostKeyVerifier: Send + Sync {
    /// Accept or refuse `key` for the peer at `remote`.
    fn verify(&self, remote: &str, key: &ssh_key::PublicKey) -> bool;
}

impl<F: Fn(&str, &ssh_key::PublicKey) -> bool + Send + Sync> HostKeyVerifier for F {
    fn verify(&self, remote: &str, key: &ssh_key::PublicKey) -> bool {
        self(remote, key)
    }
}

/// One side's KEXINIT: the cookie, the ten name-lists and the guess flag.
#[derive(Debug)]
pub(crate) struct Proposal {
    pub cookie: [u8; 16],
    pub kexs: NameList,
    pub keys: NameList,
    pub ciphers_client_to_server: NameList,
    pub ciphers_server_to_client: NameList,
    pub macs_client_to_server: NameList,
    pub macs_server_to_client: NameList,
    pub compressions_client_to_server: NameList,
    pub compressions_server_to_client: NameList,
    pub languages_client_to_server: NameList,
    pub languages_server_to_client: NameList,
    pub first_kex_packet_follows: bool,
}

impl Proposal {
    /// Build ours from the configured preference lists, cookie drawn from
    /// the CSPRNG.
    pub fn from_algorithms(algorithms: &Algorithms) -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let ciphers: NameList = algorithms.ciphers.iter().map(Cipher::as_ref).collect();
        let macs: NameList = algorithms.macs.iter().map(Hmac::as_ref).collect();
        let compressions: NameList = algorithms
            .compressions
            .iter()
            .map(Compress::as_ref)
            .collect();

        Self {
            cookie,
            kexs: algorithms.kexs.iter().map(Kex::as_ref).collect(),
            keys: algorithms.keys.iter().map(Key::as_str).collect(),
            ciphers_client_to_server: ciphers.clone(),
            ciphers_server_to_client: ciphers,
            macs_client_to_server: macs.clone(),
            macs_server_to_client: macs,
            compressions_client_to_server: compressions.clone(),
            compressions_server_to_client: compressions,
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: false,
        }
    }

    /// Parse a KEXINIT payload positioned right after the message byte.
    pub fn decode(payload: &mut Buffer) -> Result<Self> {
        let cookie = payload.get_bytes(16)?;

        let proposal = Self {
            cookie: cookie.try_into().expect("sixteen bytes were read"),
            kexs: payload.get_name_list()?,
            keys: payload.get_name_list()?,
            ciphers_client_to_server: payload.get_name_list()?,
            ciphers_server_to_client: payload.get_name_list()?,
            macs_client_to_server: payload.get_name_list()?,
            macs_server_to_client: payload.get_name_list()?,
            compressions_client_to_server: payload.get_name_list()?,
            compressions_server_to_client: payload.get_name_list()?,
            languages_client_to_server: payload.get_name_list()?,
            languages_server_to_client: payload.get_name_list()?,
            first_kex_packet_follows: payload.get_bool()?,
        };
        let _reserved = payload.get_u32()?;

        Ok(proposal)
    }

    /// Serialize, message byte included.
    pub fn encode(&self) -> Buffer {
        let mut buffer = Buffer::with_message(msg::KEXINIT);
        buffer.put_bytes(&self.cookie);
        buffer.put_name_list(&self.kexs);
        buffer.put_name_list(&self.keys);
        buffer.put_name_list(&self.ciphers_client_to_server);
        buffer.put_name_list(&self.ciphers_server_to_client);
        buffer.put_name_list(&self.macs_client_to_server);
        buffer.put_name_list(&self.macs_server_to_client);
        buffer.put_name_list(&self.compressions_client_to_server);
        buffer.put_name_list(&self.compressions_server_to_client);
        buffer.put_name_list(&self.languages_client_to_server);
        buffer.put_name_list(&self.languages_server_to_client);
        buffer.put_bool(self.first_kex_packet_follows);
        buffer.put_u32(0); // reserved

        buffer
    }
}

/// The chosen name for every negotiated slot.
#[derive(Debug)]
pub(crate) struct Negotiated {
    pub kex: Kex,
    pub key: Key,
    pub cipher_client_to_server: Cipher,
    pub cipher_server_to_client: Cipher,
    pub mac_client_to_server: Hmac,
    pub mac_server_to_client: Hmac,
    pub compression_client_to_server: Compress,
    pub compression_server_to_client: Compress,
}

impl Negotiated {
    /// First-match walk of the client's preferences against the server's
    /// lists; the language slots may stay unresolved.
    pub fn negotiate(client: &Proposal, server: &Proposal) -> Result<Self> {
        Ok(Self {
            kex: algorithm::negotiate(&client.kexs, &server.kexs, Error::NoCommonKex)?,
            key: algorithm::negotiate(&client.keys, &server.keys, Error::NoCommonKey)?,
            cipher_client_to_server: algorithm::negotiate(
                &client.ciphers_client_to_server,
                &server.ciphers_client_to_server,
                Error::NoCommonCipher,
            )?,
            cipher_server_to_client: algorithm::negotiate(
                &client.ciphers_server_to_client,
                &server.ciphers_server_to_client,
                Error::NoCommonCipher,
            )?,
            mac_client_to_server: algorithm::negotiate(
                &client.macs_client_to_server,
                &server.macs_client_to_server,
                Error::NoCommonHmac,
            )?,
            mac_server_to_client: algorithm::negotiate(
                &client.macs_server_to_client,
                &server.macs_server_to_client,
                Error::NoCommonHmac,
            )?,
            compression_client_to_server: algorithm::negotiate(
                &client.compressions_client_to_server,
                &server.compressions_client_to_server,
                Error::NoCommonCompression,
            )?,
            compression_server_to_client: algorithm::negotiate(
                &client.compressions_server_to_client,
                &server.compressions_server_to_client,
                Error::NoCommonCompression,
            )?,
        })
    }
}

/// Progress of the exchange, one hop per message of
/// [RFC 4253 § 7](https://datatracker.ietf.org/doc/html/rfc4253#section-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    SentKexinitAwaitPeer,
    AwaitFollowup,
    AwaitNewkeys,
}

/// Material derived for the inbound direction, parked until the peer's
/// NEWKEYS arrives.
struct PendingInbound {
    cipher: Cipher,
    hmac: Hmac,
    compress: Compress,
    keys: Keys,
}

/// Drives key exchanges, initial and rekeys alike, interleaved with the
/// regular packet flow.
///
/// While an exchange runs the transport's write lock is held here, so no
/// user packet can slip between KEXINIT and NEWKEYS on the outbound side.
pub(crate) struct KeyExchanger {
    stage: Stage,
    v_c: String,
    v_s: String,
    ours: Option<Proposal>,
    i_c: Vec<u8>,
    i_s: Vec<u8>,
    negotiated: Option<Negotiated>,
    running: Option<RunningKex>,
    discard_guessed: bool,
    pending: Option<PendingInbound>,
    session_id: Option<Vec<u8>>,
    resume: State,
    done: Arc<Event>,
    guard: Option<OwnedMutexGuard<Encoder>>,
}

impl KeyExchanger {
    pub fn new(v_c: String, v_s: String) -> Self {
        Self {
            stage: Stage::Idle,
            v_c,
            v_s,
            ours: None,
            i_c: Vec::new(),
            i_s: Vec::new(),
            negotiated: None,
            running: None,
            discard_guessed: false,
            pending: None,
            session_id: None,
            resume: State::KexDone,
            done: Arc::new(Event::new()),
            guard: None,
        }
    }

    /// Whether the peer has engaged in the exchange, which forbids any
    /// non-kex, non-transport message until NEWKEYS.
    pub fn engaged(&self) -> bool {
        matches!(self.stage, Stage::AwaitFollowup | Stage::AwaitNewkeys)
    }

    /// Kick off an exchange; a no-op returning the pending completion when
    /// one is already running.
    pub async fn start(&mut self, shared: &Shared) -> Result<Arc<Event>> {
        if self.stage == Stage::Idle {
            self.begin(shared).await?;
        }

        Ok(self.done.clone())
    }

    async fn begin(&mut self, shared: &Shared) -> Result<()> {
        tracing::debug!("Starting key-exchange procedure");

        // Park every writer for the whole exchange
        let mut guard = shared.encoder.clone().lock_owned().await;

        self.resume = match *shared.state.borrow() {
            State::Kex => State::KexDone,
            state => state,
        };
        shared.advance(State::Kex);

        let proposal = Proposal::from_algorithms(&shared.config.algorithms);
        let payload = proposal.encode();

        shared.send_with(&mut guard, payload.as_slice()).await?;

        self.i_c = payload.into_vec();
        self.ours = Some(proposal);
        self.done = Arc::new(Event::new());
        self.guard = Some(guard);
        self.stage = Stage::SentKexinitAwaitPeer;

        Ok(())
    }

    /// Drive the machine with one kex-class packet from the wire.
    pub async fn handle(
        &mut self,
        message: u8,
        payload: Buffer,
        decoder: &mut Decoder,
        shared: &Shared,
    ) -> Result<()> {
        match message {
            msg::KEXINIT => self.on_kexinit(payload, shared).await,
            msg::NEWKEYS => self.on_newkeys(decoder, shared),
            _ => self.on_followup(message, payload, shared).await,
        }
    }

    async fn on_kexinit(&mut self, payload: Buffer, shared: &Shared) -> Result<()> {
        if self.stage == Stage::Idle {
            // Peer-initiated rekey: answer with our own proposal first
            self.begin(shared).await?;
        }
        if self.stage != Stage::SentKexinitAwaitPeer {
            return Err(Error::Protocol("KEXINIT in the middle of an exchange"));
        }

        let mut body = payload.clone();
        let theirs = Proposal::decode(&mut body)?;
        let ours = self
            .ours
            .as_ref()
            .ok_or(Error::Protocol("no local proposal on record"))?;

        let negotiated = Negotiated::negotiate(ours, &theirs)?;
        tracing::debug!("Negotiated algorithms: {negotiated:?}");

        // A wrongly guessed first packet from the peer gets discarded
        self.discard_guessed = theirs.first_kex_packet_follows
            && theirs.kexs.names().first().map(String::as_str) != Some(negotiated.kex.as_ref());

        let (running, init) = negotiated.kex.start();
        let guard = self
            .guard
            .as_mut()
            .ok_or(Error::Protocol("exchange lost its write lock"))?;
        shared.send_with(guard, init.as_slice()).await?;

        self.i_s = payload.into_vec();
        self.negotiated = Some(negotiated);
        self.running = Some(running);
        self.stage = Stage::AwaitFollowup;

        Ok(())
    }

    async fn on_followup(&mut self, message: u8, mut payload: Buffer, shared: &Shared) -> Result<()> {
        if self.stage != Stage::AwaitFollowup {
            return Err(Error::Protocol("kex followup outside of an exchange"));
        }
        if std::mem::take(&mut self.discard_guessed) {
            tracing::debug!("Discarding the peer's wrongly guessed kex packet");

            return Ok(());
        }

        let exchange = Exchange {
            v_c: &self.v_c,
            v_s: &self.v_s,
            i_c: &self.i_c,
            i_s: &self.i_s,
        };

        let running = self
            .running
            .as_mut()
            .ok_or(Error::Protocol("no exchange in flight"))?;
        let Some(output) = running.next(message, &mut payload, &exchange)? else {
            return Ok(());
        };
        self.running = None;

        // Local trust policy, verifiers in registration order
        if !shared.verify_host_key(&output.host_key) {
            return Err(Error::HostKeyUnverified);
        }

        let session_id = self
            .session_id
            .get_or_insert_with(|| output.hash.clone())
            .clone();

        let negotiated = self
            .negotiated
            .as_ref()
            .ok_or(Error::Protocol("no negotiation on record"))?;

        let client_to_server = Keys::client_to_server(
            output.hash_alg,
            &output.secret,
            &output.hash,
            &session_id,
            &negotiated.cipher_client_to_server,
            &negotiated.mac_client_to_server,
        );
        let server_to_client = Keys::server_to_client(
            output.hash_alg,
            &output.secret,
            &output.hash,
            &session_id,
            &negotiated.cipher_server_to_client,
            &negotiated.mac_server_to_client,
        );

        // Every derived byte exists before NEWKEYS leaves; the outbound
        // direction switches the moment it is sent
        let guard = self
            .guard
            .as_mut()
            .ok_or(Error::Protocol("exchange lost its write lock"))?;
        shared
            .send_with(guard, Buffer::with_message(msg::NEWKEYS).as_slice())
            .await?;
        guard.install(
            negotiated.cipher_client_to_server,
            negotiated.mac_client_to_server,
            negotiated.compression_client_to_server,
            client_to_server,
        )?;

        self.pending = Some(PendingInbound {
            cipher: negotiated.cipher_server_to_client,
            hmac: negotiated.mac_server_to_client,
            compress: negotiated.compression_server_to_client,
            keys: server_to_client,
        });
        self.stage = Stage::AwaitNewkeys;

        Ok(())
    }

    fn on_newkeys(&mut self, decoder: &mut Decoder, shared: &Shared) -> Result<()> {
        if self.stage != Stage::AwaitNewkeys {
            return Err(Error::Protocol("NEWKEYS before the exchange completed"));
        }

        let pending = self
            .pending
            .take()
            .ok_or(Error::Protocol("no derived material on record"))?;
        decoder.install(pending.cipher, pending.hmac, pending.compress, pending.keys)?;

        if let Some(session_id) = &self.session_id {
            shared.remember_session(session_id);
        }

        // Both directions switched: release the writers and the waiters
        self.guard = None;
        self.ours = None;
        self.negotiated = None;
        self.stage = Stage::Idle;

        shared.advance(self.resume);
        self.done.fire();

        tracing::debug!("Key exchange done");

        Ok(())
    }

    /// Tear down any exchange in flight, failing its waiters.
    pub fn abort(&mut self, cause: &Arc<Error>) {
        self.guard = None;
        self.running = None;
        self.pending = None;
        self.stage = Stage::Idle;
        self.done.fail(cause.clone());
    }
}
