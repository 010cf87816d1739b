//! Detached execution of keygen and signing runs.
//!
//! Request handlers first [`Dispatcher::reserve`] a queue slot, then perform the handshake
//! (room allocation, init material) and hand the remaining rounds to the slot as a [`Job`].
//! Reserving up front means a saturated server turns requests away with
//! [`Error::Saturated`] before touching the signer. At most `max_concurrent_runs` jobs
//! execute at once; each is limited by `run_timeout` and cancelled on shutdown.
//!
//! The outcome of a run is never reported to the request that submitted it. Failures are
//! logged and dropped, callers re-probe share liveness to learn whether keygen completed.
use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError, OwnedPermit},
        watch, Semaphore,
    },
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    error::Error,
    scheme::{DerivationPath, Scheme},
    signer::{ParticipantId, RoomId, SignerError, Signers},
    store::{init_key, share_key, InitKey, SessionStore, ShareKey, ShareRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    pub parties: u16,
    pub threshold: u16,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            parties: 2,
            threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub max_concurrent_runs: usize,
    pub queue_depth: usize,
    pub run_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 64,
            queue_depth: 256,
            run_timeout: Duration::from_secs(120),
        }
    }
}

/// The detached half of a protocol run.
#[derive(Debug, Clone)]
pub enum Job {
    Keygen {
        user_id: String,
        scheme: Scheme,
        room_id: RoomId,
        client_participant_id: ParticipantId,
    },
    Sign {
        user_id: String,
        scheme: Scheme,
        room_id: RoomId,
        message: String,
        path: DerivationPath,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Keygen { .. } => "keygen",
            Job::Sign { .. } => "sign",
        }
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error("no init material stored under {0}")]
    InitMaterialMissing(InitKey),
    #[error("share for {0} disappeared before the run started")]
    ShareUnavailable(ShareKey),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

#[derive(Debug, Clone)]
struct Runner {
    signers: Signers,
    store: SessionStore,
    params: ProtocolParams,
}

impl Runner {
    async fn run(&self, job: &Job) -> Result<(), RunError> {
        match job {
            Job::Keygen {
                user_id,
                scheme,
                room_id,
                client_participant_id,
            } => {
                self.keygen(user_id, *scheme, room_id, client_participant_id)
                    .await
            }
            Job::Sign {
                user_id,
                scheme,
                room_id,
                message,
                path,
            } => self.sign(user_id, *scheme, room_id, message, path).await,
        }
    }

    async fn keygen(
        &self,
        user_id: &str,
        scheme: Scheme,
        room_id: &RoomId,
        client_participant_id: &ParticipantId,
    ) -> Result<(), RunError> {
        let key = init_key(user_id, scheme, room_id);
        let init = self
            .store
            .get_init(&key)
            .ok_or(RunError::InitMaterialMissing(key))?;

        let result = self
            .signers
            .get(scheme)
            .keygen(
                room_id,
                self.params.parties,
                self.params.threshold,
                &init.material,
                std::slice::from_ref(client_participant_id),
            )
            .await?;

        info!(
            pubkey = %result.pubkey,
            share = %result.secret_share.fingerprint(),
            "server keygen complete"
        );
        // overlapping keygens for the same user race here, last write wins
        self.store.put_share(ShareRecord::new(user_id, scheme, result));
        Ok(())
    }

    async fn sign(
        &self,
        user_id: &str,
        scheme: Scheme,
        room_id: &RoomId,
        message: &str,
        path: &DerivationPath,
    ) -> Result<(), RunError> {
        // the share may have expired since the request checked it
        let record = self
            .store
            .get_share(user_id, scheme)
            .ok_or_else(|| RunError::ShareUnavailable(share_key(user_id, scheme)))?;

        let signer = self.signers.get(scheme);
        let pubkey = signer.derive_pubkey(&record.share, path).await?;
        let message = scheme.format_message(message);
        let signature = signer.sign(room_id, &record.share, &message, path).await?;

        info!(
            %pubkey,
            %signature,
            %path,
            share_created = %record.created_at,
            "server sign complete"
        );
        Ok(())
    }
}

/// A reserved place in the run queue, see [`Dispatcher::reserve`].
#[derive(Debug)]
pub struct RunSlot {
    permit: OwnedPermit<Job>,
}

impl RunSlot {
    pub fn send(self, job: Job) {
        debug!(kind = job.kind(), "run queued");
        self.permit.send(job);
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    queue: mpsc::Sender<Job>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the dispatch loop. Must be called from within a tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        signers: Signers,
        store: SessionStore,
        params: ProtocolParams,
    ) -> Self {
        let (queue, jobs) = mpsc::channel(config.queue_depth.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let runner = Runner {
            signers,
            store,
            params,
        };
        let dispatch = tokio::spawn(dispatch_loop(jobs, runner, config, shutdown_rx));

        Self {
            queue,
            shutdown,
            tasks: Mutex::new(vec![dispatch]),
        }
    }

    /// Claim a place in the run queue without waiting. Fails fast when the queue is full.
    ///
    /// Dropping the slot unused frees the place again.
    pub fn reserve(&self) -> Result<RunSlot, Error> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }
        match self.queue.clone().try_reserve_owned() {
            Ok(permit) => Ok(RunSlot { permit }),
            Err(TrySendError::Full(_)) => {
                warn!("run queue full, rejecting");
                Err(Error::Saturated)
            }
            Err(TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Periodically purge expired entries from `store` until shutdown.
    pub fn spawn_sweeper(&self, store: SessionStore, interval: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let (shares, inits) = store.purge_expired();
                        if shares + inits > 0 {
                            debug!(
                                shares,
                                inits,
                                live_shares = store.share_count(),
                                "purged expired session entries"
                            );
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Cancel in-flight runs, stop accepting jobs, and wait for background tasks to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("background task failed: {}", e);
            }
        }
    }
}

async fn dispatch_loop(
    mut jobs: mpsc::Receiver<Job>,
    runner: Runner,
    config: DispatcherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
    let mut runs = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let span = match &job {
            Job::Keygen {
                user_id,
                scheme,
                room_id,
                ..
            }
            | Job::Sign {
                user_id,
                scheme,
                room_id,
                ..
            } => info_span!("protocol_run", kind = job.kind(), %user_id, %scheme, %room_id),
        };
        let runner = runner.clone();
        let mut cancel = shutdown.clone();
        let run_timeout = config.run_timeout;

        runs.spawn(
            async move {
                let _permit = permit;
                tokio::select! {
                    _ = cancel.changed() => warn!("run cancelled by shutdown"),
                    outcome = tokio::time::timeout(run_timeout, runner.run(&job)) => match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(error = %e, "protocol run failed"),
                        Err(_) => warn!(?run_timeout, "protocol run timed out, abandoning room"),
                    },
                }
            }
            .instrument(span),
        );

        while let Some(finished) = runs.try_join_next() {
            if let Err(e) = finished {
                error!("protocol run task failed: {}", e);
            }
        }
    }

    jobs.close();
    while let Some(finished) = runs.join_next().await {
        if let Err(e) = finished {
            error!("protocol run task failed: {}", e);
        }
    }
    debug!("dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::relay::RelaySigner;

    // never reached by the tests below, every run fails before calling out
    fn offline_signers() -> Signers {
        let relay = |scheme| {
            Arc::new(RelaySigner::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9",
                scheme,
                "key",
            ))
        };
        Signers::new(relay(Scheme::Ecdsa), relay(Scheme::Ed25519))
    }

    fn runner(store: SessionStore) -> Runner {
        Runner {
            signers: offline_signers(),
            store,
            params: ProtocolParams::default(),
        }
    }

    #[tokio::test]
    async fn keygen_without_init_material_fails() {
        let job = Job::Keygen {
            user_id: "u1".into(),
            scheme: Scheme::Ecdsa,
            room_id: RoomId::from("room-1"),
            client_participant_id: "peer".into(),
        };
        let store = SessionStore::default();
        let err = runner(store.clone()).run(&job).await.unwrap_err();

        match err {
            RunError::InitMaterialMissing(key) => {
                assert_eq!(key.to_string(), "UID:u1-SIGALG:ecdsa-ROOMID:room-1")
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(store.get_share("u1", Scheme::Ecdsa).is_none());
    }

    #[tokio::test]
    async fn sign_without_share_fails_before_signing() {
        let job = Job::Sign {
            user_id: "u1".into(),
            scheme: Scheme::Ed25519,
            room_id: RoomId::from("room-1"),
            message: "hello".into(),
            path: DerivationPath::default(),
        };
        let err = runner(SessionStore::default()).run(&job).await.unwrap_err();
        assert!(matches!(err, RunError::ShareUnavailable(_)));
    }

    #[tokio::test]
    async fn reserved_slots_count_against_queue_depth() {
        let config = DispatcherConfig {
            max_concurrent_runs: 1,
            queue_depth: 1,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::start(
            config,
            offline_signers(),
            SessionStore::default(),
            ProtocolParams::default(),
        );

        let slot = dispatcher.reserve().unwrap();
        assert!(matches!(dispatcher.reserve(), Err(Error::Saturated)));

        drop(slot);
        let slot = dispatcher.reserve().unwrap();
        drop(slot);

        dispatcher.shutdown().await;
        assert!(dispatcher.is_shut_down());
        assert!(matches!(dispatcher.reserve(), Err(Error::ShuttingDown)));
    }
}
