//! Update state machine
//!
//! `Idle -> Checking -> {NoUpdate | UpdateAvailable} -> Downloading -> {Ready | Error} -> Installing`
//!
//! One [`UpdateManager`] owns the process's single [`UpdateSession`]. Only the
//! manager mutates it; callers observe it through [`UpdateManager::subscribe`]
//! and the snapshot accessors. Check, download and install run strictly one
//! after another: a check while another stage is in flight returns
//! [`CheckOutcome::Busy`] immediately, and a download or install is rejected
//! with [`UpdateError::InvalidState`].

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::build_client;
use crate::config::Config;
use crate::downloads::{DownloadOptions, Downloader};
use crate::errors::{Result, UpdateError};
use crate::fetcher::MetadataFetcher;
use crate::install::InstallLauncher;
use crate::models::ReleaseDescriptor;
use crate::version;

pub const CHANGELOG_UNAVAILABLE: &str = "Changelog is not available.";
pub const CHANGELOG_FAILED: &str = "Failed to load the changelog.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Checking,
    NoUpdate,
    UpdateAvailable,
    Downloading,
    Ready,
    Installing,
    /// Carries the human-readable reason
    Error(String),
}

impl UpdateState {
    fn is_busy(&self) -> bool {
        matches!(self, UpdateState::Checking | UpdateState::Downloading | UpdateState::Installing)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "idle"),
            UpdateState::Checking => write!(f, "checking for updates"),
            UpdateState::NoUpdate => write!(f, "up to date"),
            UpdateState::UpdateAvailable => write!(f, "update available"),
            UpdateState::Downloading => write!(f, "downloading"),
            UpdateState::Ready => write!(f, "ready to install"),
            UpdateState::Installing => write!(f, "installing"),
            UpdateState::Error(msg) => write!(f, "in error ({})", msg),
        }
    }
}

/// Notifications delivered to subscribers, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    CheckingChanged(bool),
    StatusChanged(UpdateState),
    /// Download progress in percent; never sent after the download's terminal status
    Progress(u8),
    /// Warnings and install failures that do not change the state
    Message(String),
}

/// Mutable state of the update workflow
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub state: UpdateState,
    /// Last successfully fetched descriptor; survives failed checks
    pub descriptor: Option<ReleaseDescriptor>,
    /// Whether `descriptor` is newer than the running build
    pub update_available: bool,
    pub artifact: Option<PathBuf>,
    pub last_error: Option<String>,
    pub changelog: Option<String>,
    /// An install is waiting on its confirmation prompt; the state is still `Ready`
    pub install_pending: bool,
}

impl UpdateSession {
    /// Whether a stage is in flight and no other may start
    pub fn is_busy(&self) -> bool {
        self.state.is_busy() || self.install_pending
    }
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self {
            state: UpdateState::Idle,
            descriptor: None,
            update_available: false,
            artifact: None,
            last_error: None,
            changelog: None,
            install_pending: false,
        }
    }
}

#[derive(Debug)]
pub enum CheckOutcome {
    UpdateAvailable(ReleaseDescriptor),
    NoUpdate,
    /// Another stage is in flight; nothing was requested
    Busy,
    /// The machine is now in `Error`
    Failed(UpdateError),
}

impl CheckOutcome {
    pub fn is_update_available(&self) -> bool {
        matches!(self, CheckOutcome::UpdateAvailable(_))
    }
}

pub struct UpdateManager {
    current_version: String,
    check_url: String,
    updates_dir: PathBuf,
    fetcher: MetadataFetcher,
    downloader: Downloader,
    installer: InstallLauncher,
    session: Mutex<UpdateSession>,
    checking: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<UpdateEvent>>>,
    /// Process-wide parent; once cancelled nothing runs any more
    shutdown: CancellationToken,
    /// Child of `shutdown` shared by the operations started since the last `cancel()`
    operations: Mutex<CancellationToken>,
}

impl UpdateManager {
    /// Manager for the running build at `current_version`, launching real processes
    pub fn new(current_version: impl Into<String>, config: &Config) -> Result<Self> {
        let client = build_client(config.timeout)?;
        let downloader = Downloader::new(
            client.clone(),
            DownloadOptions {
                product_name: config.product_name.clone(),
                progress_interval: config.progress_interval,
                strict_size: config.strict_size,
                stall_timeout: config.timeout,
            },
        );
        let shutdown = CancellationToken::new();

        Ok(Self {
            current_version: current_version.into(),
            check_url: config.check_url.clone(),
            updates_dir: config.updates_dir.clone(),
            fetcher: MetadataFetcher::new(client, config.timeout),
            downloader,
            installer: InstallLauncher::system().with_args(config.installer_args.clone()),
            session: Mutex::new(UpdateSession::default()),
            checking: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            operations: Mutex::new(shutdown.child_token()),
            shutdown,
        })
    }

    /// Replace the installer hand-off (process launch and exit)
    pub fn with_installer(mut self, installer: InstallLauncher) -> Self {
        self.installer = installer;
        self
    }

    /// Tie every operation to a caller-owned token, e.g. one cancelled on shutdown
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.operations = Mutex::new(token.child_token());
        self.shutdown = token;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> UpdateState {
        self.lock_session().state.clone()
    }

    pub fn session(&self) -> UpdateSession {
        self.lock_session().clone()
    }

    pub fn available_update(&self) -> Option<ReleaseDescriptor> {
        let session = self.lock_session();
        session.descriptor.clone().filter(|_| session.update_available)
    }

    /// Stop the in-flight network and disk work. Operations started
    /// afterwards run normally.
    pub fn cancel(&self) {
        let mut operations = self.lock_operations();
        operations.cancel();
        *operations = self.shutdown.child_token();
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Fetch the descriptor and compare it with the running build
    pub async fn check_for_updates(&self) -> CheckOutcome {
        let _guard = {
            let mut session = self.lock_session();
            if session.is_busy()
                || self
                    .checking
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                debug!(state = %session.state, "Check rejected, busy");
                return CheckOutcome::Busy;
            }
            self.emit(UpdateEvent::CheckingChanged(true));
            self.reset_if_error(&mut session);
            self.transition(&mut session, UpdateState::Checking);
            CheckingGuard { manager: self }
        };

        let cancel = self.operation_token();
        let fetched = self.fetcher.fetch(&self.check_url, &cancel).await;
        let compared = fetched.and_then(|d| {
            let newer = version::is_newer(&d.version, &self.current_version)?;
            Ok((d, newer))
        });

        let mut session = self.lock_session();
        match compared {
            Ok((descriptor, true)) => {
                info!(current = %self.current_version, latest = %descriptor.version, "Update available");
                if session.descriptor.as_ref().map(|d| &d.version) != Some(&descriptor.version) {
                    session.changelog = None;
                }
                session.descriptor = Some(descriptor.clone());
                session.update_available = true;
                session.artifact = None;
                self.transition(&mut session, UpdateState::UpdateAvailable);
                CheckOutcome::UpdateAvailable(descriptor)
            }
            Ok((descriptor, false)) => {
                info!(current = %self.current_version, latest = %descriptor.version, "No update available");
                session.descriptor = Some(descriptor);
                session.update_available = false;
                session.artifact = None;
                self.transition(&mut session, UpdateState::NoUpdate);
                CheckOutcome::NoUpdate
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                self.fail(&mut session, &e);
                CheckOutcome::Failed(e)
            }
        }
    }

    /// Changelog text for the known release, or a placeholder; never an error
    pub async fn download_changelog(&self) -> String {
        let url = {
            let session = self.lock_session();
            session
                .descriptor
                .as_ref()
                .and_then(|d| d.changelog_url())
                .map(String::from)
        };

        let Some(url) = url else {
            return CHANGELOG_UNAVAILABLE.to_string();
        };

        let cancel = self.operation_token();
        match self.fetcher.fetch_changelog(&url, &cancel).await {
            Ok(text) => {
                self.lock_session().changelog = Some(text.clone());
                text
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to load changelog");
                CHANGELOG_FAILED.to_string()
            }
        }
    }

    /// Download the available update; on success the machine is `Ready`
    pub async fn download_update(&self) -> Result<PathBuf> {
        let descriptor = {
            let mut session = self.lock_session();
            let descriptor = match &session.descriptor {
                Some(d) if session.update_available && !session.is_busy() => d.clone(),
                _ => {
                    return Err(UpdateError::InvalidState {
                        action: "download an update",
                        state: session.state.to_string(),
                    })
                }
            };
            self.reset_if_error(&mut session);
            session.artifact = None;
            self.transition(&mut session, UpdateState::Downloading);
            descriptor
        };

        let cancel = self.operation_token();
        let mut abort = AbortGuard { manager: self, armed: true };
        let mut on_progress = |pct: u8| self.emit(UpdateEvent::Progress(pct));

        let result = self
            .downloader
            .download(&descriptor, &self.updates_dir, &mut on_progress, &cancel)
            .await;
        abort.armed = false;

        let mut session = self.lock_session();
        match result {
            Ok(artifact) => {
                if let Some((expected, actual)) = artifact.size_mismatch {
                    self.emit(UpdateEvent::Message(format!(
                        "Downloaded file size ({} bytes) differs from the published size ({} bytes)",
                        actual, expected
                    )));
                }
                session.artifact = Some(artifact.path.clone());
                self.transition(&mut session, UpdateState::Ready);
                Ok(artifact.path)
            }
            Err(e) => {
                warn!(error = %e, "Update download failed");
                self.fail(&mut session, &e);
                Err(e)
            }
        }
    }

    /// Hand the downloaded installer to the OS.
    ///
    /// Only valid in `Ready`. From the moment it is accepted until it returns,
    /// the session counts as busy, so no check or download can overlap the
    /// confirmation prompt. `Ok(false)` when `confirm` declines. When the
    /// installer starts, the current process exits; this call then does not
    /// return. Elevation refusal and launch failures put the machine back to
    /// `Ready` so the caller can ask again.
    pub fn install_update(&self, confirm: &mut dyn FnMut() -> bool) -> Result<bool> {
        let (artifact, _pending) = {
            let mut session = self.lock_session();
            if session.state != UpdateState::Ready || session.install_pending {
                return Err(UpdateError::InvalidState {
                    action: "install the update",
                    state: if session.install_pending {
                        "an install is pending".to_string()
                    } else {
                        session.state.to_string()
                    },
                });
            }
            session.install_pending = true;
            (session.artifact.clone(), InstallGuard { manager: self })
        };

        let mut confirm_and_mark = || {
            let accepted = confirm();
            if accepted {
                let mut session = self.lock_session();
                self.transition(&mut session, UpdateState::Installing);
            }
            accepted
        };

        match self.installer.install(artifact.as_deref(), &mut confirm_and_mark) {
            Ok(launched) => Ok(launched),
            Err(e @ (UpdateError::NoArtifact | UpdateError::ArtifactMissing(_))) => {
                let mut session = self.lock_session();
                session.artifact = None;
                self.fail(&mut session, &e);
                Err(e)
            }
            Err(e) => {
                self.emit(UpdateEvent::Message(e.to_string()));
                let mut session = self.lock_session();
                session.last_error = Some(e.to_string());
                self.transition(&mut session, UpdateState::Ready);
                Err(e)
            }
        }
    }

    /// Token for an operation starting now
    fn operation_token(&self) -> CancellationToken {
        self.lock_operations().clone()
    }

    fn lock_session(&self) -> MutexGuard<'_, UpdateSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_operations(&self) -> MutexGuard<'_, CancellationToken> {
        self.operations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<UpdateEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: UpdateEvent) {
        self.lock_subscribers().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Callers hold the session lock, which keeps emission order equal to
    /// transition order.
    fn transition(&self, session: &mut UpdateSession, state: UpdateState) {
        if session.state == state {
            return;
        }
        debug!(from = %session.state, to = %state, "State transition");
        session.state = state.clone();
        self.emit(UpdateEvent::StatusChanged(state));
    }

    fn fail(&self, session: &mut UpdateSession, err: &UpdateError) {
        let message = err.to_string();
        session.last_error = Some(message.clone());
        self.transition(session, UpdateState::Error(message));
    }

    fn reset_if_error(&self, session: &mut UpdateSession) {
        if matches!(session.state, UpdateState::Error(_)) {
            self.transition(session, UpdateState::Idle);
        }
    }
}

impl fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateManager")
            .field("current_version", &self.current_version)
            .field("check_url", &self.check_url)
            .field("state", &self.state())
            .field("checking", &self.is_checking())
            .finish_non_exhaustive()
    }
}

/// Clears the checking flag however the check ends, including when the
/// future is dropped mid-request.
struct CheckingGuard<'a> {
    manager: &'a UpdateManager,
}

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        let mut session = self.manager.lock_session();
        if session.state == UpdateState::Checking {
            self.manager.fail(&mut session, &UpdateError::Cancelled);
        }
        self.manager.checking.store(false, Ordering::SeqCst);
        self.manager.emit(UpdateEvent::CheckingChanged(false));
    }
}

/// Leaves `Downloading` for `Error` if the download future is dropped
struct AbortGuard<'a> {
    manager: &'a UpdateManager,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.manager.lock_session();
        if session.state == UpdateState::Downloading {
            self.manager.fail(&mut session, &UpdateError::Cancelled);
        }
    }
}

/// Clears the pending-install mark however the install ends
struct InstallGuard<'a> {
    manager: &'a UpdateManager,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.manager.lock_session().install_pending = false;
    }
}
