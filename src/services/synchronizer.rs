//! Client-side session synchronizer: owns the local view of one session and
//! drives its lifecycle from store snapshots and a local tick.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::StreamExt;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::PlayerEntity,
        session::{SessionFeedEvent, SessionRepository},
        storage::StorageError,
    },
    error::SessionError,
    identity::{IdentityProvider, UserProfile},
    state::{
        countdown::Countdown,
        session::{Session, SessionStatus},
        state_machine::{SessionEvent, SessionStateMachine, compute_transition},
    },
};

/// Timings and thresholds of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Length of a round once started.
    pub game_duration: Duration,
    /// Period of the local countdown tick.
    pub tick_interval: Duration,
    /// Players required before the host may start.
    pub min_players: usize,
    /// First delay before resubscribing after the feed dropped.
    pub resubscribe_initial_delay: Duration,
    /// Upper bound of the resubscription backoff.
    pub resubscribe_max_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            game_duration: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            min_players: 2,
            resubscribe_initial_delay: Duration::from_secs(1),
            resubscribe_max_delay: Duration::from_secs(10),
        }
    }
}

/// Read-only view of the attached session as last reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Last accepted snapshot.
    pub session: Session,
    /// Countdown while in progress with a known start time, zero once finished.
    pub time_remaining: Option<Duration>,
    /// The subscription dropped; the view may be outdated until it recovers.
    pub stale: bool,
}

/// Owner of the local session view.
///
/// Only the reconciliation task spawned on create/join writes the view; callers
/// read it through [`current_view`](Self::current_view) or
/// [`watch_view`](Self::watch_view).
pub struct SessionSynchronizer {
    repository: SessionRepository,
    identity: Arc<dyn IdentityProvider>,
    settings: SyncSettings,
    view: Arc<watch::Sender<Option<SessionView>>>,
    epoch: Arc<AtomicU64>,
    attachment: Mutex<Option<Attachment>>,
}

struct Attachment {
    session_id: String,
    epoch: u64,
    task: JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SessionSynchronizer {
    /// Synchronizer for the user of `identity`, not attached to any session.
    pub fn new(
        repository: SessionRepository,
        identity: Arc<dyn IdentityProvider>,
        settings: SyncSettings,
    ) -> Self {
        let (view, _rx) = watch::channel(None);
        Self {
            repository,
            identity,
            settings,
            view: Arc::new(view),
            epoch: Arc::new(AtomicU64::new(0)),
            attachment: Mutex::new(None),
        }
    }

    /// Timings in use.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Repository the synchronizer writes through.
    pub fn repository(&self) -> &SessionRepository {
        &self.repository
    }

    /// Create a session hosted by the signed-in user and attach to it.
    pub async fn create_session(&self, question_set_id: &str) -> Result<String, SessionError> {
        let user = self.require_user()?;
        let id = self
            .repository
            .create(&PlayerEntity::from(&user), question_set_id)
            .await?;
        info!(session_id = %id, host = %user.uid, "session created");

        self.attach(id.clone(), user.uid).await;
        Ok(id)
    }

    /// Join a waiting session whose host is still present, then attach to it.
    pub async fn join_session(&self, session_id: &str) -> Result<(), SessionError> {
        let user = self.require_user()?;
        let snapshot = self
            .repository
            .find(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))?;

        let status = SessionStatus::from(snapshot.session.status);
        if status != SessionStatus::Waiting {
            return Err(SessionError::NotJoinable { status });
        }
        if !snapshot.session.host_present() {
            return Err(SessionError::HostAbsent);
        }

        self.repository
            .add_player(session_id, &PlayerEntity::from(&user))
            .await?;
        info!(session_id = %session_id, uid = %user.uid, "joined session");

        self.attach(session_id.to_owned(), user.uid).await;
        Ok(())
    }

    /// Host intent: move the attached session to in-progress.
    pub async fn start_session(&self) -> Result<(), SessionError> {
        let (session_id, view) = self.require_view().await?;
        let user = self.require_user()?;
        let session = &view.session;

        if !session.is_host(&user.uid) {
            return Err(SessionError::Unauthorized(
                "only the host can start the session".into(),
            ));
        }
        compute_transition(session.status, SessionEvent::Start)?;
        if session.players.len() < self.settings.min_players {
            return Err(SessionError::NotEnoughPlayers {
                required: self.settings.min_players,
                actual: session.players.len(),
            });
        }

        let started = self
            .repository
            .start(&session_id, &user.uid, self.settings.min_players)
            .await?;
        info!(
            session_id = %session_id,
            players = started.session.players.len(),
            "session started"
        );
        Ok(())
    }

    /// Host intent: finish the attached session once its countdown elapsed.
    pub async fn finish_session(&self) -> Result<(), SessionError> {
        let (session_id, view) = self.require_view().await?;
        let user = self.require_user()?;
        let session = &view.session;

        if !session.is_host(&user.uid) {
            return Err(SessionError::Unauthorized(
                "only the host can finish the session".into(),
            ));
        }
        compute_transition(session.status, SessionEvent::Finish)?;

        let countdown = Countdown::new(self.settings.game_duration);
        let Some(start) = session.game_start_time else {
            return Err(SessionError::CountdownRunning {
                remaining: countdown.duration(),
            });
        };
        let remaining = countdown.remaining_at(start, SystemTime::now());
        if !remaining.is_zero() {
            return Err(SessionError::CountdownRunning { remaining });
        }

        self.repository.finish(&session_id).await?;
        info!(session_id = %session_id, "session finished");
        Ok(())
    }

    /// Add `delta` to the local player's score; returns the committed score.
    pub async fn adjust_score(&self, delta: i64) -> Result<i64, SessionError> {
        let session_id = self
            .session_id()
            .await
            .ok_or(SessionError::NoActiveSession)?;
        let user = self.require_user()?;

        let score = self
            .repository
            .adjust_score(&session_id, &user.uid, delta)
            .await?;
        debug!(session_id = %session_id, uid = %user.uid, delta, score, "score adjusted");
        Ok(score)
    }

    /// Detach from the current session. The session document is left as is.
    pub async fn leave(&self) {
        let mut attachment = self.attachment.lock().await;
        if let Some(previous) = self.detach(&mut attachment) {
            info!(session_id = %previous, "left session");
        }
    }

    /// Latest reconciled session, if attached.
    pub fn current_view(&self) -> Option<Session> {
        self.view.borrow().as_ref().map(|view| view.session.clone())
    }

    /// Latest view including countdown and staleness.
    pub fn view(&self) -> Option<SessionView> {
        self.view.borrow().clone()
    }

    /// Subscribe to view changes, `None` meaning detached.
    pub fn watch_view(&self) -> watch::Receiver<Option<SessionView>> {
        self.view.subscribe()
    }

    /// Id of the attached session while its reconciliation task is running.
    pub async fn session_id(&self) -> Option<String> {
        let attachment = self.attachment.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);
        attachment
            .as_ref()
            .filter(|attachment| attachment.epoch == epoch)
            .map(|attachment| attachment.session_id.clone())
    }

    fn require_user(&self) -> Result<UserProfile, SessionError> {
        self.identity
            .current_user()
            .ok_or_else(|| SessionError::Unauthorized("no signed-in user".into()))
    }

    async fn require_view(&self) -> Result<(String, SessionView), SessionError> {
        let session_id = self
            .session_id()
            .await
            .ok_or(SessionError::NoActiveSession)?;
        let view = self
            .view()
            .filter(|view| view.session.id == session_id)
            .ok_or(SessionError::NoActiveSession)?;
        Ok((session_id, view))
    }

    async fn attach(&self, session_id: String, uid: String) {
        let mut attachment = self.attachment.lock().await;
        self.detach(&mut attachment);

        let epoch = self.epoch.load(Ordering::SeqCst);
        let publisher = ViewPublisher {
            sender: self.view.clone(),
            epoch: self.epoch.clone(),
            owner: epoch,
        };
        let task = ReconcileTask {
            session_id: session_id.clone(),
            local_uid: uid,
            repository: self.repository.clone(),
            identity: self.identity.watch(),
            identity_open: true,
            settings: self.settings,
            countdown: Countdown::new(self.settings.game_duration),
            publisher,
            lifecycle: SessionStateMachine::new(),
            stale: false,
            finish_requested: false,
        };

        *attachment = Some(Attachment {
            session_id,
            epoch,
            task: tokio::spawn(task.run()),
        });
    }

    /// Stop the running task and clear the view. Returns the detached session id.
    fn detach(&self, attachment: &mut Option<Attachment>) -> Option<String> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = attachment.take().map(|attachment| attachment.session_id.clone());
        self.view.send_replace(None);
        previous
    }
}

/// Write access to the view for one attachment. Writes from a detached task are dropped.
struct ViewPublisher {
    sender: Arc<watch::Sender<Option<SessionView>>>,
    epoch: Arc<AtomicU64>,
    owner: u64,
}

impl ViewPublisher {
    fn publish(&self, view: SessionView) {
        self.sender.send_if_modified(|slot| {
            if self.epoch.load(Ordering::SeqCst) != self.owner || slot.as_ref() == Some(&view) {
                return false;
            }
            *slot = Some(view);
            true
        });
    }

    /// Clear the view and retire this attachment under the view lock.
    fn close(&self) {
        self.sender.send_if_modified(|slot| {
            let retired = self
                .epoch
                .compare_exchange(self.owner, self.owner + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if !retired {
                return false;
            }
            slot.take().is_some()
        });
    }
}

enum Flow {
    Continue,
    Teardown,
}

enum FeedExit {
    Teardown,
    Disconnected,
}

/// Single reconciliation loop of an attached session: store snapshots, local
/// ticks and identity changes are handled here and nowhere else.
struct ReconcileTask {
    session_id: String,
    local_uid: String,
    repository: SessionRepository,
    identity: watch::Receiver<Option<UserProfile>>,
    identity_open: bool,
    settings: SyncSettings,
    countdown: Countdown,
    publisher: ViewPublisher,
    lifecycle: SessionStateMachine,
    stale: bool,
    finish_requested: bool,
}

impl ReconcileTask {
    async fn run(mut self) {
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = self.settings.resubscribe_initial_delay;

        loop {
            match self.follow_feed(&mut ticker, &mut backoff).await {
                FeedExit::Teardown => {
                    self.publisher.close();
                    return;
                }
                FeedExit::Disconnected => {
                    self.stale = true;
                    self.publish_view();
                    warn!(
                        session_id = %self.session_id,
                        retry_in_ms = backoff.as_millis() as u64,
                        "session feed lost; resubscribing"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.resubscribe_max_delay);
                }
            }
        }
    }

    async fn follow_feed(
        &mut self,
        ticker: &mut tokio::time::Interval,
        backoff: &mut Duration,
    ) -> FeedExit {
        let mut feed = self.repository.subscribe(&self.session_id);
        loop {
            tokio::select! {
                event = feed.next() => match event {
                    Some(Ok(event)) => {
                        *backoff = self.settings.resubscribe_initial_delay;
                        if let Flow::Teardown = self.reconcile(event) {
                            return FeedExit::Teardown;
                        }
                    }
                    Some(Err(err @ StorageError::Decode { .. })) => {
                        warn!(session_id = %self.session_id, error = %err, "ignoring malformed snapshot");
                    }
                    Some(Err(err)) => {
                        warn!(session_id = %self.session_id, error = %err, "session feed failed");
                        return FeedExit::Disconnected;
                    }
                    None => return FeedExit::Disconnected,
                },
                _ = ticker.tick() => self.on_tick().await,
                changed = self.identity.changed(), if self.identity_open => {
                    if changed.is_err() {
                        self.identity_open = false;
                        continue;
                    }
                    if let Flow::Teardown = self.on_identity_change() {
                        return FeedExit::Teardown;
                    }
                }
            }
        }
    }

    fn reconcile(&mut self, event: SessionFeedEvent) -> Flow {
        let snapshot = match event {
            SessionFeedEvent::Snapshot(snapshot) => snapshot,
            SessionFeedEvent::Deleted => {
                info!(session_id = %self.session_id, "session document gone; leaving");
                return Flow::Teardown;
            }
        };

        let session = Session::from(snapshot);
        match self.lifecycle.observe(session) {
            Ok(Some(event)) => {
                debug!(session_id = %self.session_id, event = ?event, "lifecycle advanced");
            }
            Ok(None) => {}
            Err(anomaly) => {
                warn!(
                    session_id = %self.session_id,
                    error = %anomaly,
                    "ignoring out-of-order snapshot"
                );
                self.stale = false;
                self.publish_view();
                return Flow::Continue;
            }
        }
        self.stale = false;

        let abandoned = self
            .lifecycle
            .current()
            .filter(|session| !session.is_host(&self.local_uid) && !session.host_present());
        if let Some(session) = abandoned {
            info!(
                session_id = %self.session_id,
                host = %session.host_id,
                "host left the session; leaving"
            );
            return Flow::Teardown;
        }

        self.publish_view();
        Flow::Continue
    }

    async fn on_tick(&mut self) {
        if self.stale {
            return;
        }
        self.publish_view();

        let Some(session) = self.lifecycle.current() else {
            return;
        };
        if session.status != SessionStatus::InProgress
            || !session.is_host(&self.local_uid)
            || self.finish_requested
        {
            return;
        }
        let Some(start) = session.game_start_time else {
            return;
        };
        if !self.countdown.is_expired(start, SystemTime::now()) {
            return;
        }

        self.finish_requested = true;
        match self.repository.finish(&self.session_id).await {
            Ok(()) => info!(session_id = %self.session_id, "countdown elapsed; session finished"),
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "failed to finish session; retrying on next tick"
                );
                self.finish_requested = false;
            }
        }
    }

    fn on_identity_change(&mut self) -> Flow {
        let same_user = self
            .identity
            .borrow_and_update()
            .as_ref()
            .is_some_and(|user| user.uid == self.local_uid);
        if same_user {
            return Flow::Continue;
        }
        info!(session_id = %self.session_id, "signed out; leaving session");
        Flow::Teardown
    }

    fn publish_view(&self) {
        let Some(session) = self.lifecycle.current() else {
            return;
        };
        let time_remaining = match (session.status, session.game_start_time) {
            (SessionStatus::InProgress, Some(start)) => {
                Some(self.countdown.remaining_at(start, SystemTime::now()))
            }
            (SessionStatus::Finished, _) => Some(Duration::ZERO),
            _ => None,
        };
        self.publisher.publish(SessionView {
            session: session.clone(),
            time_remaining,
            stale: self.stale,
        });
    }
}
