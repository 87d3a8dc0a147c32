//! The seam between the bucket pair and a concrete TLS engine.
//!
//! An engine consumes and produces ciphertext exclusively through the
//! [`EngineIo`] hooks handed to it for the duration of one call. Rich
//! statuses cannot travel through the engine's return codes, so the hooks
//! smuggle them through the shared context (`crypt_status`, `crypt_err`,
//! `pending_err`) for the calling loop to recover.

use std::collections::HashMap;

use log::{debug, trace};

use crate::aggregate::AggregateBucket;
use crate::alloc::BucketAlloc;
use crate::bucket::{Bucket, ReadStatus};
use crate::error::{BucketError, CertFailures};
use crate::simple::SimpleBucket;

/// How an engine call ended when it did not produce data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine needs inbound ciphertext before it can continue.
    WantRead,
    /// The engine needs its outbound ciphertext drained first.
    WantWrite,
    /// The peer shut the session down cleanly.
    Closed,
    /// An I/O hook failed; the real status is in the shared context.
    Syscall,
    /// The engine itself failed.
    Fatal(String),
}

/// Result of an [`EngineIo`] hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookError {
    /// Nothing available right now; the engine should report `WantRead`
    /// (or `WantWrite`) and be retried later.
    Retry,
    /// The hook failed hard; the engine should report `Syscall` and let
    /// the caller recover the status from the context.
    Failed,
}

/// A TLS engine driven through BIO-style hooks.
///
/// Both calls may synchronously re-enter [`EngineIo::underlying_read`] and
/// [`EngineIo::underlying_write`]: TLS is bidirectional during a
/// handshake, so a plaintext write can require reading handshake records
/// from the transport and vice versa.
pub trait TlsEngine {
    /// Encrypt `data`, emitting ciphertext through `underlying_write`.
    /// Returns how many plaintext bytes were accepted.
    fn write_plaintext(&mut self, io: &mut EngineIo<'_>, data: &[u8]) -> Result<usize, EngineError>;

    /// Decrypt into `buf`, pulling ciphertext through `underlying_read`.
    /// Returns how many plaintext bytes were produced (never zero).
    fn read_plaintext(
        &mut self,
        io: &mut EngineIo<'_>,
        buf: &mut [u8],
    ) -> Result<usize, EngineError>;

    /// True while the handshake has not completed. Distinguishes
    /// `SslSetupFailed` from `SslCommFailed` when a failure latches.
    fn in_handshake(&self) -> bool;
}

/// An opaque view of a peer certificate offered to verification callbacks.
pub struct CertView<'a> {
    /// Position in the chain; 0 is the leaf.
    pub depth: usize,
    /// Subject common name, raw bytes.
    pub common_name: Option<&'a [u8]>,
    /// DNS subjectAltName entries, raw bytes.
    pub alt_names: &'a [Vec<u8>],
}

/// Reject certificates whose CN or subjectAltName embeds a NUL byte,
/// the classic spoof against C hostname comparisons.
pub fn validate_cert_hostname(cert: &CertView<'_>) -> Result<(), BucketError> {
    if let Some(cn) = cert.common_name {
        if cn.contains(&0) {
            return Err(BucketError::SslCertFailed);
        }
    }
    for name in cert.alt_names {
        if name.contains(&0) {
            return Err(BucketError::SslCertFailed);
        }
    }
    Ok(())
}

/// Outcome the OCSP responder reported for a stapled response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspResponderStatus {
    Successful,
    MalformedRequest,
    InternalError,
    SigRequired,
    Unauthorized,
    TryLater,
    Unknown,
}

/// Application callback consulted once per failing certificate (or OCSP
/// response, with no certificate view). `Ok` accepts despite the failures;
/// an error is latched and surfaced by the next decrypt read.
pub type ServerCertCallback =
    Box<dyn FnMut(CertFailures, Option<&CertView<'_>>) -> Result<(), BucketError>>;

/// Server-certificate verification state shared by the pair.
#[derive(Default)]
pub struct VerifyState {
    pub(crate) server_cert_callback: Option<ServerCertCallback>,
}

/// Externally supplied store for remembering client-cert credentials
/// across sessions.
pub trait CredentialCache {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: String);
}

/// Well-known cache key for the last client-cert path that worked.
pub const CERT_CACHE_KEY: &str = "serf:ssl:cert";
/// Well-known cache key for the matching certificate password.
pub const CERT_PW_CACHE_KEY: &str = "serf:ssl:certpw";

/// A `HashMap`-backed [`CredentialCache`].
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: HashMap<String, String>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        MemoryCredentialCache::default()
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_owned(), value);
    }
}

/// Credentials resolved for a client-certificate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub path: String,
    pub password: Option<String>,
}

/// Callback producing a candidate client-cert path, or `None` to give up.
pub type CertPathCallback = Box<dyn FnMut() -> Option<String>>;
/// Callback producing the password for a given cert path.
pub type CertPasswordCallback = Box<dyn FnMut(&str) -> Option<String>>;

/// Drives the client-certificate callback chain, preferring cached
/// credentials from a previous session.
#[derive(Default)]
pub struct ClientCertStore {
    pub(crate) path_callback: Option<CertPathCallback>,
    pub(crate) password_callback: Option<CertPasswordCallback>,
    pub(crate) cache: Option<Box<dyn CredentialCache>>,
    cached: Option<ClientIdentity>,
}

impl ClientCertStore {
    /// Resolve credentials: the in-context cache first, then the external
    /// cache under the well-known keys, then the callbacks. Successful
    /// callback answers are written back to both caches.
    pub fn obtain(&mut self) -> Option<ClientIdentity> {
        if let Some(identity) = &self.cached {
            return Some(identity.clone());
        }

        let cached_path = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(CERT_CACHE_KEY))
            .filter(|path| !path.is_empty());
        let from_cache = cached_path.is_some();
        let path = match cached_path {
            Some(path) => path,
            None => (self.path_callback.as_mut()?)()?,
        };

        let password = if from_cache {
            self.cache
                .as_ref()
                .and_then(|cache| cache.get(CERT_PW_CACHE_KEY))
                .filter(|password| !password.is_empty())
        } else {
            self.password_callback
                .as_mut()
                .and_then(|callback| callback(&path))
        };

        if !from_cache {
            if let Some(cache) = &mut self.cache {
                cache.put(CERT_CACHE_KEY, path.clone());
                if let Some(password) = &password {
                    cache.put(CERT_PW_CACHE_KEY, password.clone());
                }
            }
        }

        let identity = ClientIdentity { path, password };
        self.cached = Some(identity.clone());
        Some(identity)
    }

    /// Forget cached credentials so the next request re-prompts. Engines
    /// call this when cached credentials turned out not to match.
    pub fn invalidate(&mut self) {
        self.cached = None;
        if let Some(cache) = &mut self.cache {
            cache.put(CERT_CACHE_KEY, String::new());
            cache.put(CERT_PW_CACHE_KEY, String::new());
        }
    }
}

/// The borrow-split view of the shared TLS context handed to the engine
/// for the duration of one `write_plaintext`/`read_plaintext` call.
pub struct EngineIo<'a> {
    /// Ciphertext source: the decrypt side's underlying stream.
    pub(crate) source: &'a mut dyn Bucket,
    /// Ciphertext sink: the encrypt side's pending aggregate.
    pub(crate) pending: &'a mut AggregateBucket,
    pub(crate) alloc: &'a BucketAlloc,
    pub(crate) crypt_status: &'a mut ReadStatus,
    pub(crate) crypt_err: &'a mut Option<BucketError>,
    pub(crate) want_read: &'a mut bool,
    pub(crate) pending_err: &'a mut Option<BucketError>,
    pub(crate) fatal_err: &'a mut Option<BucketError>,
    pub(crate) reject_renegotiation: bool,
    pub(crate) renegotiation: &'a mut bool,
    pub(crate) verify: &'a mut VerifyState,
    pub(crate) client_cert: &'a mut ClientCertStore,
}

impl EngineIo<'_> {
    /// Pull ciphertext from the transport into `buf`.
    pub fn underlying_read(&mut self, buf: &mut [u8]) -> Result<usize, HookError> {
        if *self.renegotiation {
            return Err(HookError::Failed);
        }
        trace!(target: "bucketline::tls", "underlying read, up to {} bytes", buf.len());

        match self.source.read(buf.len()) {
            Err(err) => {
                *self.crypt_err = Some(err);
                Err(HookError::Failed)
            }
            Ok((data, status)) => {
                *self.crypt_status = status;
                *self.want_read = false;
                if data.is_empty() {
                    match status {
                        ReadStatus::Again | ReadStatus::WaitConn => Err(HookError::Retry),
                        // Eof (or an illegal empty-Ok): the engine sees a
                        // failed read and the caller recovers the status.
                        _ => Err(HookError::Failed),
                    }
                } else {
                    trace!(target: "bucketline::tls",
                           "underlying read produced {} bytes ({status:?})", data.len());
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
            }
        }
    }

    /// Queue ciphertext the engine produced onto the pending aggregate.
    pub fn underlying_write(&mut self, data: &[u8]) -> Result<usize, HookError> {
        if *self.renegotiation {
            return Err(HookError::Failed);
        }
        trace!(target: "bucketline::tls", "underlying write of {} bytes", data.len());
        *self.crypt_status = ReadStatus::Ok;
        self.pending
            .append(Box::new(SimpleBucket::copy(data, self.alloc)));
        Ok(data.len())
    }

    /// The peer asked to renegotiate. Under the no-mid-connection-
    /// renegotiation policy this latches a fatal error; subsequent hook
    /// calls fail, breaking the engine out of its loop.
    pub fn renegotiation_requested(&mut self) {
        if self.reject_renegotiation && !*self.renegotiation {
            debug!(target: "bucketline::tls", "renegotiation rejected by policy");
            *self.renegotiation = true;
            *self.fatal_err = Some(BucketError::SslNegotiateInProgress);
        }
    }

    /// Whether the renegotiation latch has tripped.
    pub fn renegotiation_latched(&self) -> bool {
        *self.renegotiation
    }

    /// Verify one peer certificate: fold in our hostname/NUL check,
    /// consult the application callback for the leaf or any failing cert,
    /// and latch `pending_err` when the cert stays rejected with no
    /// callback installed. Returns whether the cert is accepted.
    pub fn verify_server_cert(
        &mut self,
        engine_valid: bool,
        mut failures: CertFailures,
        cert: &CertView<'_>,
    ) -> bool {
        if validate_cert_hostname(cert).is_err() {
            failures |= CertFailures::INVALID_HOST;
        }

        let mut valid = engine_valid && failures.is_empty();
        match &mut self.verify.server_cert_callback {
            Some(callback) if cert.depth == 0 || !failures.is_empty() => {
                match callback(failures, Some(cert)) {
                    Ok(()) => valid = true,
                    Err(err) => {
                        valid = false;
                        *self.pending_err = Some(err);
                    }
                }
            }
            Some(_) => {}
            None => {
                if !valid {
                    *self.pending_err = Some(BucketError::SslCertFailed);
                }
            }
        }
        valid
    }

    /// Check a stapled OCSP response's responder status, with the same
    /// callback/latch pattern as certificate verification.
    pub fn ocsp_result(&mut self, status: OcspResponderStatus) -> bool {
        let mut failures = CertFailures::default();
        match status {
            OcspResponderStatus::Successful => {}
            OcspResponderStatus::MalformedRequest
            | OcspResponderStatus::InternalError
            | OcspResponderStatus::SigRequired
            | OcspResponderStatus::Unauthorized => {
                failures |= CertFailures::OCSP_RESPONDER_ERROR;
            }
            OcspResponderStatus::TryLater => {
                failures |= CertFailures::OCSP_RESPONDER_TRYLATER;
            }
            OcspResponderStatus::Unknown => {
                failures |= CertFailures::OCSP_RESPONDER_UNKNOWN_FAILURE;
            }
        }

        let mut valid = failures.is_empty();
        if !valid {
            match &mut self.verify.server_cert_callback {
                Some(callback) => match callback(failures, None) {
                    Ok(()) => valid = true,
                    Err(err) => *self.pending_err = Some(err),
                },
                None => *self.pending_err = Some(BucketError::SslCertFailed),
            }
        }
        valid
    }

    /// The peer requested a client certificate; drive the callback chain.
    pub fn client_cert(&mut self) -> Option<ClientIdentity> {
        debug!(target: "bucketline::tls", "peer requests a client certificate");
        self.client_cert.obtain()
    }

    /// Cached credentials failed; clear them so the next request asks the
    /// callbacks again.
    pub fn client_cert_mismatch(&mut self) {
        self.client_cert.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_in_names_is_rejected() {
        let cert = CertView {
            depth: 0,
            common_name: Some(b"example.com\0evil.test"),
            alt_names: &[],
        };
        assert_eq!(
            validate_cert_hostname(&cert).unwrap_err(),
            BucketError::SslCertFailed
        );

        let sans = vec![b"good.test".to_vec(), b"bad\0.test".to_vec()];
        let cert = CertView {
            depth: 0,
            common_name: Some(b"example.com"),
            alt_names: &sans,
        };
        assert!(validate_cert_hostname(&cert).is_err());

        let sans = vec![b"good.test".to_vec()];
        let cert = CertView {
            depth: 0,
            common_name: Some(b"example.com"),
            alt_names: &sans,
        };
        assert!(validate_cert_hostname(&cert).is_ok());
    }

    #[test]
    fn client_cert_chain_caches_success() {
        let mut store = ClientCertStore {
            path_callback: Some(Box::new(|| Some("/certs/me.p12".to_owned()))),
            password_callback: Some(Box::new(|_| Some("hunter2".to_owned()))),
            cache: Some(Box::new(MemoryCredentialCache::new())),
            cached: None,
        };

        let identity = store.obtain().unwrap();
        assert_eq!(identity.path, "/certs/me.p12");
        assert_eq!(identity.password.as_deref(), Some("hunter2"));

        let cache = store.cache.as_ref().unwrap();
        assert_eq!(
            cache.get(CERT_CACHE_KEY).as_deref(),
            Some("/certs/me.p12")
        );
        assert_eq!(cache.get(CERT_PW_CACHE_KEY).as_deref(), Some("hunter2"));
    }

    #[test]
    fn client_cert_prefers_external_cache() {
        let mut cache = MemoryCredentialCache::new();
        cache.put(CERT_CACHE_KEY, "/cached/cert.p12".to_owned());
        cache.put(CERT_PW_CACHE_KEY, "cachedpw".to_owned());

        let mut store = ClientCertStore {
            path_callback: Some(Box::new(|| panic!("callback must not run"))),
            password_callback: None,
            cache: Some(Box::new(cache)),
            cached: None,
        };

        let identity = store.obtain().unwrap();
        assert_eq!(identity.path, "/cached/cert.p12");
        assert_eq!(identity.password.as_deref(), Some("cachedpw"));
    }

    #[test]
    fn invalidate_falls_back_to_prompting() {
        let mut store = ClientCertStore {
            path_callback: Some(Box::new(|| Some("/fresh.p12".to_owned()))),
            password_callback: None,
            cache: Some(Box::new(MemoryCredentialCache::new())),
            cached: Some(ClientIdentity {
                path: "/stale.p12".to_owned(),
                password: None,
            }),
        };

        assert_eq!(store.obtain().unwrap().path, "/stale.p12");
        store.invalidate();
        assert_eq!(store.obtain().unwrap().path, "/fresh.p12");
    }

    #[test]
    fn no_path_callback_means_no_identity() {
        let mut store = ClientCertStore::default();
        assert!(store.obtain().is_none());
    }
}
