//! The TLS encrypt/decrypt bucket pair.
//!
//! Two buckets share one context. The encrypt bucket reads *plaintext*
//! from a request stream and yields *ciphertext* for the transport; the
//! decrypt bucket reads *ciphertext* from the transport and yields
//! *plaintext* to the consumer. One engine serves both directions, and it
//! sources/sinks ciphertext by re-entering the context's hooks:
//!
//! ```text
//! encrypt.read
//!   '- DataBuf fill -> encrypt loop
//!        |- 1. return pending ciphertext if any
//!        |- 2. read plaintext from the encrypt source stream
//!        |- 3. engine.write_plaintext
//!        |     |- underlying_read  (handshake records, from decrypt source)
//!        |     '- underlying_write (ciphertext, into the pending aggregate)
//!        |- 4. on failure, prepend the plaintext back for retry
//!        '- 5. drain pending ciphertext
//!
//! decrypt.read
//!   '- DataBuf fill -> engine.read_plaintext
//!        |- underlying_read  (ciphertext from the transport stream)
//!        '- underlying_write (handshake ciphertext, into pending)
//! ```
//!
//! The engine's callbacks run synchronously inside the calling `read`;
//! statuses they observe travel through `crypt_status`/`crypt_err` on the
//! context because the engine's return codes cannot carry them.

mod engine;
mod null;
#[cfg(feature = "tls")]
mod rustls_engine;

pub use engine::{
    CertPasswordCallback, CertPathCallback, CertView, ClientCertStore, ClientIdentity,
    CredentialCache, EngineError, EngineIo, HookError, MemoryCredentialCache,
    OcspResponderStatus, ServerCertCallback, TlsEngine, VerifyState, CERT_CACHE_KEY,
    CERT_PW_CACHE_KEY,
};
pub use null::NullEngine;
#[cfg(feature = "tls")]
pub use rustls_engine::RustlsEngine;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use log::{debug, trace};

use crate::aggregate::AggregateBucket;
use crate::alloc::BucketAlloc;
use crate::bucket::{Bucket, LineResult, PeekResult, ReadResult, ReadStatus};
use crate::config::PipelineConfig;
use crate::databuf::DataBuf;
use crate::error::BucketError;
use crate::simple::SimpleBucket;
use crate::NewlineSet;

const INIT_UNINITIALIZED: u32 = 0;
const INIT_BUSY: u32 = 1;
const INIT_DONE: u32 = 2;

static TLS_INIT: AtomicU32 = AtomicU32::new(INIT_UNINITIALIZED);

/// Run process-wide TLS library initialization exactly once.
///
/// Three-state latch: the first caller flips `UNINITIALIZED -> BUSY`, runs
/// `init`, then stores `DONE`. Losers spin with a bounded sleep until the
/// winner finishes, so no thread proceeds before the libraries are loaded.
pub fn init_tls_once(init: impl FnOnce()) {
    match TLS_INIT.compare_exchange(
        INIT_UNINITIALIZED,
        INIT_BUSY,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            init();
            TLS_INIT.store(INIT_DONE, Ordering::Release);
        }
        Err(mut seen) => {
            while seen != INIT_DONE {
                std::thread::sleep(std::time::Duration::from_millis(1));
                seen = TLS_INIT.load(Ordering::Acquire);
            }
        }
    }
}

/// Plaintext ranges pulled from the encrypt source per engine write.
const MAX_PLAINTEXT_VECS: usize = 64;

/// Stand-in ciphertext source while no decrypt stream is attached.
struct DetachedSource;

impl Bucket for DetachedSource {
    fn read(&mut self, _max: usize) -> ReadResult {
        Ok((Bytes::new(), ReadStatus::Again))
    }

    fn readline(&mut self, _acceptable: NewlineSet) -> LineResult {
        Ok((Bytes::new(), crate::NewlineFound::None, ReadStatus::Again))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        Ok((&[], ReadStatus::Ok))
    }
}

/// Bucket-independent state shared by the pair and re-entered by the
/// engine's hooks.
struct TlsCore {
    alloc: BucketAlloc,
    /// Active plaintext source, wrapped in an aggregate so rejected writes
    /// can be prepended for retry.
    encrypt_stream: Option<AggregateBucket>,
    /// Ciphertext the engine produced but the caller has not drained.
    encrypt_pending: AggregateBucket,
    /// Further logical streams queued behind the active one.
    stream_next: VecDeque<(u64, Box<dyn Bucket>)>,
    active_stream_id: u64,
    next_stream_id: u64,
    decrypt_stream: Option<Box<dyn Bucket>>,
    detached: DetachedSource,
    /// Status of the last underlying read or write.
    crypt_status: ReadStatus,
    crypt_err: Option<BucketError>,
    /// The engine needs inbound bytes before it can produce more outbound.
    want_read: bool,
    /// Error a verification callback raised, returned once and cleared.
    pending_err: Option<BucketError>,
    /// Permanent failure; every subsequent read returns it.
    fatal_err: Option<BucketError>,
    renegotiation: bool,
    reject_renegotiation: bool,
    verify: VerifyState,
    client_cert: ClientCertStore,
    config: Option<PipelineConfig>,
}

impl TlsCore {
    /// Borrow-split view handed to the engine for one call.
    fn io(&mut self) -> EngineIo<'_> {
        let source: &mut dyn Bucket = match &mut self.decrypt_stream {
            Some(stream) => stream.as_mut(),
            None => &mut self.detached,
        };
        EngineIo {
            source,
            pending: &mut self.encrypt_pending,
            alloc: &self.alloc,
            crypt_status: &mut self.crypt_status,
            crypt_err: &mut self.crypt_err,
            want_read: &mut self.want_read,
            pending_err: &mut self.pending_err,
            fatal_err: &mut self.fatal_err,
            reject_renegotiation: self.reject_renegotiation,
            renegotiation: &mut self.renegotiation,
            verify: &mut self.verify,
            client_cert: &mut self.client_cert,
        }
    }
}

/// Copy pending ciphertext into `buf`. Returns bytes copied and whether
/// more remains queued.
fn drain_pending(
    pending: &mut AggregateBucket,
    buf: &mut [u8],
) -> Result<(usize, bool), BucketError> {
    let mut at = 0;
    loop {
        if at == buf.len() {
            return Ok((at, !pending.is_empty()));
        }
        let (data, status) = pending.read(buf.len() - at)?;
        buf[at..at + data.len()].copy_from_slice(&data);
        at += data.len();
        if status != ReadStatus::Ok {
            return Ok((at, false));
        }
    }
}

/// The encrypt side's fill: plaintext in, ciphertext out.
fn encrypt_fill(
    engine: &mut dyn TlsEngine,
    core: &mut TlsCore,
    buf: &mut [u8],
) -> Result<(usize, ReadStatus), BucketError> {
    if let Some(err) = &core.fatal_err {
        return Err(err.clone());
    }
    trace!(target: "bucketline::tls", "encrypt: begin, buffer {}", buf.len());

    // Ciphertext already produced beats everything else.
    let (quick, _) = drain_pending(&mut core.encrypt_pending, buf)?;
    if quick > 0 {
        trace!(target: "bucketline::tls", "encrypt: {quick} bytes (quick read)");
        return Ok((quick, ReadStatus::Ok));
    }

    let mut budget = buf.len();
    let mut status = ReadStatus::Ok;
    while status == ReadStatus::Ok && budget > 0 {
        if core.want_read {
            // The engine is blocked on inbound bytes; nothing to push.
            status = match core.crypt_status {
                ReadStatus::Ok => ReadStatus::Again,
                other => other,
            };
            break;
        }

        let mut vecs = Vec::new();
        status = match &mut core.encrypt_stream {
            Some(stream) => stream.read_iovec(budget, MAX_PLAINTEXT_VECS, &mut vecs)?,
            None => ReadStatus::Eof,
        };
        if vecs.is_empty() {
            debug_assert!(status != ReadStatus::Ok, "empty iovec read with Ok status");
            continue;
        }

        let total: usize = vecs.iter().map(|v| v.len()).sum();
        let mut flat = core.alloc.scratch(total);
        for v in &vecs {
            flat.extend_from_slice(v);
        }
        budget = budget.saturating_sub(total);
        core.crypt_status = ReadStatus::Ok;
        core.crypt_err = None;

        let written = {
            let mut io = core.io();
            engine.write_plaintext(&mut io, &flat)
        };
        match written {
            Ok(accepted) => {
                trace!(target: "bucketline::tls", "encrypt: engine accepted {accepted} bytes");
                core.alloc.release(flat);
            }
            Err(err) => {
                // Put the unflushed plaintext back so the next attempt
                // retries the same bytes.
                let copy = flat.split().freeze();
                core.alloc.release(flat);
                if let Some(stream) = &mut core.encrypt_stream {
                    stream.prepend(Box::new(SimpleBucket::own(copy)));
                }
                status = match err {
                    EngineError::WantRead => {
                        core.want_read = true;
                        ReadStatus::WaitConn
                    }
                    EngineError::WantWrite => ReadStatus::WaitConn,
                    EngineError::Closed => ReadStatus::Eof,
                    EngineError::Syscall => {
                        if let Some(err) = core.crypt_err.take() {
                            return Err(err);
                        }
                        if let Some(err) = &core.fatal_err {
                            return Err(err.clone());
                        }
                        match core.crypt_status {
                            ReadStatus::Ok => ReadStatus::Again,
                            other => other,
                        }
                    }
                    EngineError::Fatal(detail) => {
                        if let Some(err) = core.pending_err.take() {
                            return Err(err);
                        }
                        let err = if engine.in_handshake() {
                            BucketError::SslSetupFailed
                        } else {
                            BucketError::SslCommFailed
                        };
                        debug!(target: "bucketline::tls", "encrypt: engine failure: {detail}");
                        core.fatal_err = Some(err.clone());
                        return Err(err);
                    }
                };
            }
        }
    }

    let (copied, more) = drain_pending(&mut core.encrypt_pending, buf)?;
    if more {
        status = ReadStatus::Ok;
    }
    trace!(target: "bucketline::tls", "encrypt: finished, {copied} bytes, {status:?}");
    Ok((copied, status))
}

/// The decrypt side's fill: one engine read, statuses mapped.
fn decrypt_fill(
    engine: &mut dyn TlsEngine,
    core: &mut TlsCore,
    buf: &mut [u8],
) -> Result<(usize, ReadStatus), BucketError> {
    if let Some(err) = &core.fatal_err {
        return Err(err.clone());
    }
    trace!(target: "bucketline::tls", "decrypt: begin, buffer {}", buf.len());

    core.want_read = false;
    core.crypt_status = ReadStatus::Ok;
    core.crypt_err = None;

    let result = {
        let mut io = core.io();
        engine.read_plaintext(&mut io, buf)
    };
    match result {
        Ok(n) if n > 0 => {
            trace!(target: "bucketline::tls", "decrypt: {n} bytes ({:?})", core.crypt_status);
            Ok((n, core.crypt_status))
        }
        Ok(_) => {
            // Engines signal clean closure via Closed, never a zero read.
            let err = BucketError::SslCommFailed;
            core.fatal_err = Some(err.clone());
            Err(err)
        }
        Err(EngineError::WantRead) | Err(EngineError::WantWrite) => Ok((0, ReadStatus::Again)),
        Err(EngineError::Closed) => {
            debug!(target: "bucketline::tls", "decrypt: peer shut down the session");
            Ok((0, ReadStatus::Eof))
        }
        Err(EngineError::Syscall) => {
            if let Some(err) = core.crypt_err.take() {
                return Err(err);
            }
            if let Some(err) = &core.fatal_err {
                return Err(err.clone());
            }
            let status = match core.crypt_status {
                ReadStatus::Ok => ReadStatus::Again,
                other => other,
            };
            Ok((0, status))
        }
        Err(EngineError::Fatal(detail)) => {
            if let Some(err) = core.pending_err.take() {
                return Err(err);
            }
            let err = if engine.in_handshake() {
                BucketError::SslSetupFailed
            } else {
                BucketError::SslCommFailed
            };
            debug!(target: "bucketline::tls", "decrypt: engine failure: {detail}");
            core.fatal_err = Some(err.clone());
            Err(err)
        }
    }
}

struct TlsInner {
    engine: Box<dyn TlsEngine>,
    core: TlsCore,
    encrypt_databuf: DataBuf,
    decrypt_databuf: DataBuf,
}

/// Shared handle to one TLS session. Create the decrypt bucket over the
/// transport stream and the encrypt bucket over each request stream; both
/// share this context, and the engine is freed when the last handle drops.
#[derive(Clone)]
pub struct TlsContext {
    inner: Rc<RefCell<TlsInner>>,
}

impl TlsContext {
    pub fn new(engine: Box<dyn TlsEngine>, alloc: BucketAlloc) -> TlsContext {
        TlsContext {
            inner: Rc::new(RefCell::new(TlsInner {
                engine,
                core: TlsCore {
                    alloc,
                    encrypt_stream: None,
                    encrypt_pending: AggregateBucket::new(),
                    stream_next: VecDeque::new(),
                    active_stream_id: 0,
                    next_stream_id: 1,
                    decrypt_stream: None,
                    detached: DetachedSource,
                    crypt_status: ReadStatus::Ok,
                    crypt_err: None,
                    want_read: false,
                    pending_err: None,
                    fatal_err: None,
                    renegotiation: false,
                    reject_renegotiation: false,
                    verify: VerifyState::default(),
                    client_cert: ClientCertStore::default(),
                    config: None,
                },
                encrypt_databuf: DataBuf::new(),
                decrypt_databuf: DataBuf::new(),
            })),
        }
    }

    /// Attach the ciphertext transport and get the plaintext-out bucket.
    /// The decrypt side can be attached once per context.
    pub fn decrypt(&self, mut stream: Box<dyn Bucket>) -> Result<TlsDecrypt, BucketError> {
        let mut inner = self.inner.borrow_mut();
        if inner.core.decrypt_stream.is_some() {
            return Err(BucketError::Engine("decrypt side already attached".into()));
        }
        if let Some(config) = &inner.core.config {
            stream.set_config(config);
        }
        inner.core.decrypt_stream = Some(stream);
        Ok(TlsDecrypt {
            ctx: Rc::clone(&self.inner),
            peeked: Vec::new(),
        })
    }

    /// Add a plaintext source and get the ciphertext-out bucket. While a
    /// source is already active the new one queues behind it; it becomes
    /// active when the active bucket is dropped, preserving message
    /// boundaries without blocking on message completion.
    pub fn encrypt(&self, stream: Box<dyn Bucket>) -> TlsEncrypt {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let id = inner.core.next_stream_id;
        inner.core.next_stream_id += 1;

        if inner.core.encrypt_stream.is_none() {
            let mut agg = AggregateBucket::new();
            agg.append(stream);
            if let Some(config) = &inner.core.config {
                agg.set_config(config);
            }
            inner.core.encrypt_stream = Some(agg);
            inner.core.active_stream_id = id;
        } else {
            inner.core.stream_next.push_back((id, stream));
        }
        TlsEncrypt {
            ctx: Rc::clone(&self.inner),
            stream_id: id,
            peeked: Vec::new(),
        }
    }

    /// Install the application callback consulted for failing peer certs
    /// and OCSP responses.
    pub fn set_server_cert_callback(&self, callback: ServerCertCallback) {
        self.inner.borrow_mut().core.verify.server_cert_callback = Some(callback);
    }

    /// Install the callback producing client-certificate paths.
    pub fn set_client_cert_provider(&self, callback: CertPathCallback) {
        self.inner.borrow_mut().core.client_cert.path_callback = Some(callback);
    }

    /// Install the callback producing client-certificate passwords.
    pub fn set_client_cert_password(&self, callback: CertPasswordCallback) {
        self.inner.borrow_mut().core.client_cert.password_callback = Some(callback);
    }

    /// Supply the cross-session credential cache (keys
    /// [`CERT_CACHE_KEY`] and [`CERT_PW_CACHE_KEY`]).
    pub fn set_credential_cache(&self, cache: Box<dyn CredentialCache>) {
        self.inner.borrow_mut().core.client_cert.cache = Some(cache);
    }

    /// The latched fatal error, if any.
    pub fn fatal_error(&self) -> Option<BucketError> {
        self.inner.borrow().core.fatal_err.clone()
    }
}

/// Ciphertext-out bucket: reads plaintext from its source stream and
/// yields engine output.
pub struct TlsEncrypt {
    ctx: Rc<RefCell<TlsInner>>,
    stream_id: u64,
    peeked: Vec<u8>,
}

impl Bucket for TlsEncrypt {
    fn read(&mut self, max: usize) -> ReadResult {
        let inner = &mut *self.ctx.borrow_mut();
        let TlsInner {
            engine,
            core,
            encrypt_databuf,
            ..
        } = inner;
        encrypt_databuf.read(max, |buf| encrypt_fill(engine.as_mut(), core, buf))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let inner = &mut *self.ctx.borrow_mut();
        let TlsInner {
            engine,
            core,
            encrypt_databuf,
            ..
        } = inner;
        encrypt_databuf.readline(acceptable, |buf| encrypt_fill(engine.as_mut(), core, buf))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        let status = {
            let inner = &mut *self.ctx.borrow_mut();
            let TlsInner {
                engine,
                core,
                encrypt_databuf,
                ..
            } = inner;
            let (data, status) =
                encrypt_databuf.peek(|buf| encrypt_fill(engine.as_mut(), core, buf))?;
            self.peeked.clear();
            self.peeked.extend_from_slice(data);
            status
        };
        Ok((&self.peeked, status))
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        set_shared_config(&self.ctx, config);
    }
}

impl Drop for TlsEncrypt {
    fn drop(&mut self) {
        let Ok(mut guard) = self.ctx.try_borrow_mut() else {
            return;
        };
        let inner = &mut *guard;
        if inner.core.active_stream_id == self.stream_id {
            // Destroy the active stream and its pending ciphertext, then
            // promote the next queued stream with a fresh pending queue.
            inner.core.encrypt_stream = None;
            inner.core.encrypt_pending = AggregateBucket::new();
            inner.core.crypt_status = ReadStatus::Ok;
            inner.core.crypt_err = None;
            inner.encrypt_databuf.reset();
            if let Some((id, stream)) = inner.core.stream_next.pop_front() {
                let mut agg = AggregateBucket::new();
                agg.append(stream);
                if let Some(config) = &inner.core.config {
                    agg.set_config(config);
                }
                inner.core.encrypt_stream = Some(agg);
                inner.core.active_stream_id = id;
            }
        } else {
            inner.core.stream_next.retain(|(id, _)| *id != self.stream_id);
        }
    }
}

/// Plaintext-out bucket: reads ciphertext from the transport and yields
/// engine output.
pub struct TlsDecrypt {
    ctx: Rc<RefCell<TlsInner>>,
    peeked: Vec<u8>,
}

impl Bucket for TlsDecrypt {
    fn read(&mut self, max: usize) -> ReadResult {
        let inner = &mut *self.ctx.borrow_mut();
        let TlsInner {
            engine,
            core,
            decrypt_databuf,
            ..
        } = inner;
        decrypt_databuf.read(max, |buf| decrypt_fill(engine.as_mut(), core, buf))
    }

    fn readline(&mut self, acceptable: NewlineSet) -> LineResult {
        let inner = &mut *self.ctx.borrow_mut();
        let TlsInner {
            engine,
            core,
            decrypt_databuf,
            ..
        } = inner;
        decrypt_databuf.readline(acceptable, |buf| decrypt_fill(engine.as_mut(), core, buf))
    }

    fn peek(&mut self) -> PeekResult<'_> {
        let status = {
            let inner = &mut *self.ctx.borrow_mut();
            let TlsInner {
                engine,
                core,
                decrypt_databuf,
                ..
            } = inner;
            let (data, status) =
                decrypt_databuf.peek(|buf| decrypt_fill(engine.as_mut(), core, buf))?;
            self.peeked.clear();
            self.peeked.extend_from_slice(data);
            status
        };
        Ok((&self.peeked, status))
    }

    fn set_config(&mut self, config: &PipelineConfig) {
        set_shared_config(&self.ctx, config);
    }
}

impl Drop for TlsDecrypt {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.ctx.try_borrow_mut() {
            guard.core.decrypt_stream = None;
            guard.decrypt_databuf.reset();
        }
    }
}

/// Store the config on the context, distribute it to both streams, and
/// arm renegotiation rejection when pipelining is on (a renegotiation
/// would disrupt request ordering).
fn set_shared_config(ctx: &Rc<RefCell<TlsInner>>, config: &PipelineConfig) {
    let mut guard = ctx.borrow_mut();
    let core = &mut guard.core;
    core.config = Some(config.clone());
    if let Some(stream) = &mut core.encrypt_stream {
        stream.set_config(config);
    }
    if let Some(stream) = &mut core.decrypt_stream {
        stream.set_config(config);
    }
    if config.pipelining_enabled() {
        core.reject_renegotiation = true;
    }
}
