//! End-to-end scenarios against a scripted peer speaking the server side
//! of the protocol over an in-memory pipe.

use std::{
    sync::{
        atomic::AtomicBool,
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use num_bigint_dig::{BigUint, RandBigInt};
use signature::{SignatureEncoding, Signer};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::{
    codec::{Decoder, Encoder},
    kex::Proposal,
    keys::Keys,
    State, Transport,
};
use crate::{
    algorithm::{
        kex::{group::GROUP14, KexHash},
        Cipher, Compress, Hmac, Kex, Key,
    },
    buffer::NameList,
    msg::{self, DisconnectReason},
    Algorithms, Buffer, Config, Error, Result, Service,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

fn algorithms(kex: Kex, cipher: Cipher, mac: Hmac) -> Algorithms {
    Algorithms {
        kexs: vec![kex],
        keys: vec![Key::Ed25519],
        ciphers: vec![cipher],
        macs: vec![mac],
        compressions: vec![Compress::None],
    }
}

fn spawn_client(
    stream: DuplexStream,
    algorithms: Algorithms,
    accept_host_key: bool,
) -> tokio::task::JoinHandle<Result<Transport>> {
    tokio::spawn(async move {
        Transport::connect(
            stream,
            "peer.test:22",
            Config {
                algorithms,
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
            vec![Box::new(move |_: &str, _: &ssh_key::PublicKey| {
                accept_host_key
            })],
        )
        .await
    })
}

/// The scripted server: frames packets with the crate's own codec and
/// answers `diffie-hellman-group14-sha1` with an ed25519 host key.
struct Peer {
    stream: DuplexStream,
    encoder: Encoder,
    decoder: Decoder,
    inbound: Vec<(u32, Buffer)>,
    carry: Vec<u8>,
    v_c: String,
    v_s: String,
    i_c: Vec<u8>,
    i_s: Vec<u8>,
    session_id: Option<Vec<u8>>,
    host_key: ssh_key::PrivateKey,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        let authed = Arc::new(AtomicBool::new(false));

        Self {
            stream,
            encoder: Encoder::new(authed.clone()),
            decoder: Decoder::new(authed),
            inbound: Vec::new(),
            carry: Vec::new(),
            v_c: String::new(),
            v_s: "SSH-2.0-scripted_peer".into(),
            i_c: Vec::new(),
            i_s: Vec::new(),
            session_id: None,
            host_key: ssh_key::PrivateKey::random(
                &mut rand::thread_rng(),
                ssh_key::Algorithm::Ed25519,
            )
            .unwrap(),
        }
    }

    async fn identify(&mut self) {
        let mut line = Vec::new();
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        self.v_c = String::from_utf8(line).unwrap();
        assert!(self.v_c.starts_with("SSH-2.0-"));

        self.stream
            .write_all(format!("{}\r\n", self.v_s).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> (u32, Buffer) {
        loop {
            if !self.inbound.is_empty() {
                return self.inbound.remove(0);
            }

            if !self.carry.is_empty() {
                let data = std::mem::take(&mut self.carry);
                let consumed = self.decoder.feed(&data, &mut self.inbound).unwrap();
                self.carry = data[consumed..].to_vec();
                continue;
            }

            let mut buf = [0u8; 4096];
            let read = self.stream.read(&mut buf).await.unwrap();
            assert!(read > 0, "client closed the stream");
            self.carry.extend_from_slice(&buf[..read]);
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        let (_, bytes) = self.encoder.encode(payload).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    fn proposal(kexs: &[&str], keys: &[&str], ciphers: &[&str], macs: &[&str]) -> Proposal {
        let named = |names: &[&str]| names.iter().collect::<NameList>();

        Proposal {
            cookie: rand::random(),
            kexs: named(kexs),
            keys: named(keys),
            ciphers_client_to_server: named(ciphers),
            ciphers_server_to_client: named(ciphers),
            macs_client_to_server: named(macs),
            macs_server_to_client: named(macs),
            compressions_client_to_server: named(&["none"]),
            compressions_server_to_client: named(&["none"]),
            languages_client_to_server: Default::default(),
            languages_server_to_client: Default::default(),
            first_kex_packet_follows: false,
        }
    }

    /// Wait for the client's KEXINIT, then answer with ours.
    async fn exchange_kexinit(&mut self, kexs: &[&str], keys: &[&str], ciphers: &[&str], macs: &[&str]) {
        let (_, payload) = self.recv().await;
        assert_eq!(payload.as_slice()[0], msg::KEXINIT);
        self.i_c = payload.as_slice().to_vec();

        let ours = Self::proposal(kexs, keys, ciphers, macs).encode();
        self.i_s = ours.as_slice().to_vec();
        self.send(ours.as_slice()).await;
    }

    /// Initiate a rekey: send our KEXINIT first, then skip regular traffic
    /// until the client's own KEXINIT shows up. Returns the sequence
    /// numbers of the skipped packets.
    async fn initiate_kexinit(
        &mut self,
        kexs: &[&str],
        keys: &[&str],
        ciphers: &[&str],
        macs: &[&str],
    ) -> Vec<u32> {
        let ours = Self::proposal(kexs, keys, ciphers, macs).encode();
        self.i_s = ours.as_slice().to_vec();
        self.send(ours.as_slice()).await;

        let mut skipped = Vec::new();
        loop {
            let (seq, payload) = self.recv().await;
            if payload.as_slice()[0] == msg::KEXINIT {
                self.i_c = payload.as_slice().to_vec();
                return skipped;
            }
            skipped.push(seq);
        }
    }

    /// Answer the client's `KEXDH_INIT` for group14/sha-1, returning the
    /// exchange hash and shared secret.
    async fn dh_reply(&mut self) -> (Vec<u8>, BigUint) {
        let (_, mut payload) = self.recv().await;
        assert_eq!(payload.get_u8().unwrap(), msg::KEXDH_INIT);
        let e = BigUint::from_bytes_be(&payload.get_mpint().unwrap());

        let prime = GROUP14.prime();
        let y = rand::thread_rng().gen_biguint_range(&BigUint::from(2u8), &prime);
        let f = GROUP14.generator().modpow(&y, &prime);
        let secret = e.modpow(&y, &prime);

        let k_s = self.host_key.public_key().to_bytes().unwrap();

        let mut hashed = Buffer::new();
        hashed.put_string(self.v_c.as_bytes());
        hashed.put_string(self.v_s.as_bytes());
        hashed.put_string(&self.i_c);
        hashed.put_string(&self.i_s);
        hashed.put_string(&k_s);
        hashed.put_mpint(&e.to_bytes_be());
        hashed.put_mpint(&f.to_bytes_be());
        hashed.put_mpint(&secret.to_bytes_be());
        let hash = KexHash::Sha1.digest(hashed.as_slice());

        let signature: ssh_key::Signature = Signer::sign(&self.host_key, &hash);

        let mut reply = Buffer::with_message(msg::KEXDH_REPLY);
        reply.put_string(&k_s);
        reply.put_mpint(&f.to_bytes_be());
        reply.put_string(&signature.to_vec());
        self.send(reply.as_slice()).await;

        (hash, secret)
    }

    /// Trade NEWKEYS and switch both of our directions.
    async fn switch_keys(&mut self, hash: &[u8], secret: &BigUint, cipher: Cipher, mac: Hmac) {
        self.send(&[msg::NEWKEYS]).await;

        let (_, mut newkeys) = self.recv().await;
        assert_eq!(newkeys.get_u8().unwrap(), msg::NEWKEYS);

        let session_id = self
            .session_id
            .get_or_insert_with(|| hash.to_vec())
            .clone();
        let secret = secret.to_bytes_be();

        let client_to_server =
            Keys::client_to_server(KexHash::Sha1, &secret, hash, &session_id, &cipher, &mac);
        let server_to_client =
            Keys::server_to_client(KexHash::Sha1, &secret, hash, &session_id, &cipher, &mac);

        self.decoder
            .install(cipher, mac, Compress::None, client_to_server)
            .unwrap();
        self.encoder
            .install(cipher, mac, Compress::None, server_to_client)
            .unwrap();
    }

    async fn serve_kex(&mut self, cipher: Cipher, mac: Hmac) {
        let (hash, secret) = self.dh_reply().await;
        self.switch_keys(&hash, &secret, cipher, mac).await;
    }
}

const GROUP14_SHA1: &[&str] = &["diffie-hellman-group14-sha1"];
const ED25519: &[&str] = &["ssh-ed25519"];
const AES128_CTR: &[&str] = &["aes128-ctr"];
const HMAC_SHA1: &[&str] = &["hmac-sha1"];

async fn handshake() -> (Transport, Peer) {
    let (client_stream, server_stream) = tokio::io::duplex(0x8000);
    let mut peer = Peer::new(server_stream);

    let client = spawn_client(
        client_stream,
        algorithms(
            Kex::DiffieHellmanGroup14Sha1,
            Cipher::Aes128Ctr,
            Hmac::HmacSha1,
        ),
        true,
    );

    peer.identify().await;
    peer.exchange_kexinit(GROUP14_SHA1, ED25519, AES128_CTR, HMAC_SHA1)
        .await;
    peer.serve_kex(Cipher::Aes128Ctr, Hmac::HmacSha1).await;

    (client.await.unwrap().unwrap(), peer)
}

#[tokio::test]
async fn handshake_with_an_openssh_style_peer() {
    init_tracing();

    let (transport, _peer) = handshake().await;

    assert_eq!(transport.session_id().unwrap().len(), 20);
    assert!(transport.is_running());
    assert_eq!(transport.state(), State::KexDone);
    assert_eq!(transport.peer_id(), "SSH-2.0-scripted_peer");
}

#[tokio::test]
async fn negotiation_failure_disconnects_with_kex_failed() {
    init_tracing();

    let (client_stream, server_stream) = tokio::io::duplex(0x8000);
    let mut peer = Peer::new(server_stream);

    let client = spawn_client(
        client_stream,
        algorithms(Kex::Curve25519Sha256, Cipher::Aes128Ctr, Hmac::HmacSha1),
        true,
    );

    peer.identify().await;
    peer.exchange_kexinit(&["kexolite-prime"], ED25519, AES128_CTR, HMAC_SHA1)
        .await;

    let (_, mut payload) = peer.recv().await;
    assert_eq!(payload.get_u8().unwrap(), msg::DISCONNECT);
    assert_eq!(payload.get_u32().unwrap(), 3);

    let error = client.await.unwrap().unwrap_err();
    assert!(
        matches!(&error, Error::Faulted(cause) if matches!(cause.as_ref(), Error::NoCommonKex)),
        "unexpected error: {error}",
    );
}

#[tokio::test]
async fn rejected_host_key_disconnects_without_newkeys() {
    init_tracing();

    let (client_stream, server_stream) = tokio::io::duplex(0x8000);
    let mut peer = Peer::new(server_stream);

    let client = spawn_client(
        client_stream,
        algorithms(
            Kex::DiffieHellmanGroup14Sha1,
            Cipher::Aes128Ctr,
            Hmac::HmacSha1,
        ),
        false,
    );

    peer.identify().await;
    peer.exchange_kexinit(GROUP14_SHA1, ED25519, AES128_CTR, HMAC_SHA1)
        .await;
    peer.dh_reply().await;

    // The very next packet is the disconnect, no NEWKEYS precedes it
    let (_, mut payload) = peer.recv().await;
    assert_eq!(payload.get_u8().unwrap(), msg::DISCONNECT);
    assert_eq!(payload.get_u32().unwrap(), 9);

    let error = client.await.unwrap().unwrap_err();
    assert!(
        matches!(&error, Error::Faulted(cause) if matches!(cause.as_ref(), Error::HostKeyUnverified)),
        "unexpected error: {error}",
    );
}

#[tokio::test]
async fn rekey_mid_session_never_splits_user_packets() {
    init_tracing();

    let (transport, mut peer) = handshake().await;

    // Hammer the transport from a handful of concurrent writers
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let transport = transport.clone();
            tokio::spawn(async move {
                for _ in 0..8 {
                    let mut payload = Buffer::with_message(90);
                    payload.put_string(b"user traffic");
                    transport.write_packet(payload).await.unwrap();
                }
            })
        })
        .collect();

    // Peer-initiated rekey racing the writers: between the client's
    // KEXINIT and its NEWKEYS only kex messages may appear, which
    // `dh_reply` and `switch_keys` assert on
    let before = peer
        .initiate_kexinit(GROUP14_SHA1, ED25519, AES128_CTR, HMAC_SHA1)
        .await;
    peer.serve_kex(Cipher::Aes128Ctr, Hmac::HmacSha1).await;

    for writer in writers {
        writer.await.unwrap();
    }

    // Collect what is left after the rekey
    let mut after = Vec::new();
    while after.len() + before.len() < 32 {
        let (seq, payload) = peer.recv().await;
        assert_eq!(payload.as_slice()[0], 90);
        after.push(seq);
    }

    // Sequence numbers never reset across the rekey
    let all: Vec<u32> = before.iter().chain(after.iter()).copied().collect();
    assert!(all.windows(2).all(|pair| pair[0] < pair[1]));

    assert!(transport.is_running());
    assert_eq!(transport.state(), State::KexDone);
}

#[tokio::test]
async fn corrupted_ciphertext_ends_in_mac_error() {
    init_tracing();

    let (transport, mut peer) = handshake().await;

    let mut payload = Buffer::with_message(msg::IGNORE);
    payload.put_string(b"about to be mangled");
    let (_, mut bytes) = peer.encoder.encode(payload.as_slice()).unwrap();
    bytes[6] ^= 0x01;
    peer.stream.write_all(&bytes).await.unwrap();

    transport.await_state(State::Error).await.unwrap();
    assert!(!transport.is_running());

    // Every caller observes the stored cause from now on
    let error = transport.write_packet(Buffer::with_message(90)).await;
    assert!(
        matches!(&error, Err(Error::Faulted(cause)) if matches!(cause.as_ref(), Error::Integrity(_))),
        "unexpected error: {error:?}",
    );

    let (_, mut disconnect) = peer.recv().await;
    assert_eq!(disconnect.get_u8().unwrap(), msg::DISCONNECT);
    assert_eq!(disconnect.get_u32().unwrap(), 5);
}

struct Recorder {
    seen: Arc<StdMutex<Vec<u8>>>,
}

impl Service for Recorder {
    fn name(&self) -> &'static str {
        "ssh-userauth"
    }

    fn handle(&mut self, message: u8, _payload: Buffer) -> Result<()> {
        self.seen.lock().unwrap().push(message);

        Ok(())
    }
}

#[tokio::test]
async fn accepted_service_receives_the_traffic() {
    init_tracing();

    let (transport, mut peer) = handshake().await;

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let request = tokio::spawn({
        let transport = transport.clone();
        let service = Box::new(Recorder { seen: seen.clone() });
        async move { transport.request_service(service).await }
    });

    let (_, mut payload) = peer.recv().await;
    assert_eq!(payload.get_u8().unwrap(), msg::SERVICE_REQUEST);
    assert_eq!(payload.get_string().unwrap(), b"ssh-userauth");

    let mut accept = Buffer::with_message(msg::SERVICE_ACCEPT);
    accept.put_string(b"ssh-userauth");
    peer.send(accept.as_slice()).await;

    request.await.unwrap().unwrap();
    assert_eq!(transport.state(), State::Service);

    // Anything non-transport now lands in the service handler
    peer.send(&[60, 0, 0, 0, 0]).await;

    for _ in 0..100 {
        if seen.lock().unwrap().contains(&60) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("the service never saw the peer's message");
}

#[tokio::test]
async fn accepting_the_wrong_service_is_a_protocol_error() {
    init_tracing();

    let (transport, mut peer) = handshake().await;

    let request = tokio::spawn({
        let transport = transport.clone();
        let service = Box::new(Recorder {
            seen: Arc::new(StdMutex::new(Vec::new())),
        });
        async move { transport.request_service(service).await }
    });

    let (_, mut payload) = peer.recv().await;
    assert_eq!(payload.get_u8().unwrap(), msg::SERVICE_REQUEST);

    let mut accept = Buffer::with_message(msg::SERVICE_ACCEPT);
    accept.put_string(b"ssh-connection");
    peer.send(accept.as_slice()).await;

    assert!(request.await.unwrap().is_err());

    let (_, mut disconnect) = peer.recv().await;
    assert_eq!(disconnect.get_u8().unwrap(), msg::DISCONNECT);
    assert_eq!(disconnect.get_u32().unwrap(), 2);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    init_tracing();

    let (transport, mut peer) = handshake().await;

    transport
        .disconnect(DisconnectReason::ByApplication, "all done")
        .await;
    transport
        .disconnect(DisconnectReason::ByApplication, "all done, again")
        .await;

    assert_eq!(transport.state(), State::Stopped);
    assert!(!transport.is_running());

    // Exactly one DISCONNECT reaches the peer before the stream closes
    let (_, mut payload) = peer.recv().await;
    assert_eq!(payload.get_u8().unwrap(), msg::DISCONNECT);
    assert_eq!(payload.get_u32().unwrap(), 11);

    let mut trailing = [0u8; 1];
    assert_eq!(peer.stream.read(&mut trailing).await.unwrap(), 0);
}
