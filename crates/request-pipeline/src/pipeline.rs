//! Request dispatch with single-flight session renewal.

use crate::renewal_fsm::{
    RenewalMachine, RenewalMachineInput, RenewalMachineState, RenewalPhase, RenewalPolicy,
};
use crate::request::join_url;
use crate::session::{RenewRequest, RenewResponse};
use crate::{ApiError, ApiRequest, ApiResponse, ApiResult, ErrorBody, RequestBody};
use client_config::Config;
use credential_store::{Credential, CredentialStore, SessionEndReason};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of one renewal, shared with every request waiting on it.
#[derive(Debug, Clone)]
enum RenewalOutcome {
    /// Replay with this access token.
    Renewed(String),
    Failed,
}

type OutcomeReceiver = watch::Receiver<Option<RenewalOutcome>>;

/// Renewal gate: the state machine and, while a renewal runs, the channel
/// its outcome is published on.
struct RenewalSlot {
    machine: RenewalMachine,
    waiter: Option<OutcomeReceiver>,
    /// Incremented for every renewal started.
    epoch: u64,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    login_path: String,
    refresh_path: String,
    request_timeout: Duration,
    policy: RenewalPolicy,
    credentials: Arc<CredentialStore>,
    renewal: Mutex<RenewalSlot>,
}

/// Sends API requests with the current credential and recovers from
/// expired access tokens.
///
/// Cloning is cheap; clones share the credential store and the renewal gate.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<Inner>,
}

impl RequestPipeline {
    /// Create a pipeline for the API described by `config`.
    pub fn new(config: &Config, credentials: Arc<CredentialStore>) -> ApiResult<Self> {
        let base_url = config.api_url()?.to_string();
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                login_path: config.login_path.clone(),
                refresh_path: config.refresh_path.clone(),
                request_timeout: config.request_timeout(),
                policy: RenewalPolicy::from(&config.renewal),
                credentials,
                renewal: Mutex::new(RenewalSlot {
                    machine: RenewalMachine::new(),
                    waiter: None,
                    epoch: 0,
                }),
            }),
        })
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    pub(crate) fn login_path(&self) -> &str {
        &self.inner.login_path
    }

    /// Current renewal state.
    pub fn renewal_phase(&self) -> RenewalPhase {
        RenewalPhase::from(self.inner.renewal.lock().machine.state())
    }

    /// Send a request.
    ///
    /// A 401 on an authenticated request triggers (or joins) a renewal and
    /// the request is replayed once with the renewed token. Any other
    /// non-2xx answer is returned as [`ApiError::Http`].
    pub async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let token = if request.authenticated {
            self.inner.credentials.access_token()
        } else {
            None
        };

        let response = self.dispatch(&request, token.as_deref()).await?;
        if response.status != 401 || !request.authenticated {
            return into_result(response);
        }

        let Some(sent_with) = token else {
            debug!(path = %request.path, "Unauthorized without a session");
            return Err(ApiError::AuthExpired);
        };

        let renewed = self.await_renewal(&sent_with).await?;
        debug!(method = %request.method, path = %request.path, "Replaying request after renewal");

        let replay = self.dispatch(&request, Some(&renewed)).await?;
        if replay.status == 401 {
            warn!(path = %request.path, "Renewed token was refused, ending session");
            if let Err(err) =
                self.end_session(SessionEndReason::Rejected, RenewalMachineInput::ReplayRejected)
            {
                warn!(error = %err, "Failed to clear persisted credentials");
            }
            return Err(ApiError::AuthExpired);
        }

        into_result(replay)
    }

    /// Get a usable access token after `stale` was refused.
    async fn await_renewal(&self, stale: &str) -> ApiResult<String> {
        let mut receiver = {
            let mut slot = self.inner.renewal.lock();

            match self.inner.credentials.access_token() {
                None => return Err(ApiError::AuthExpired),
                Some(current) if current != stale => {
                    debug!("Token already renewed by another request");
                    return Ok(current);
                }
                Some(_) => {}
            }

            match RenewalPhase::from(slot.machine.state()) {
                RenewalPhase::Failed => return Err(ApiError::AuthExpired),
                RenewalPhase::InFlight => match slot.waiter.clone() {
                    Some(receiver) => receiver,
                    None => return Err(ApiError::AuthExpired),
                },
                RenewalPhase::Idle => {
                    transition(&mut slot.machine, &RenewalMachineInput::Unauthorized);
                    let (sender, receiver) = watch::channel(None);
                    slot.waiter = Some(receiver.clone());
                    slot.epoch += 1;

                    let pipeline = self.clone();
                    let epoch = slot.epoch;
                    let refresh_token = self.inner.credentials.refresh_token();
                    tokio::spawn(async move {
                        let outcome = pipeline.run_renewal(epoch, refresh_token).await;
                        let _ = sender.send(Some(outcome));
                    });
                    receiver
                }
            }
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| ApiError::AuthExpired)?;

        match outcome {
            Some(RenewalOutcome::Renewed(token)) => Ok(token),
            _ => Err(ApiError::AuthExpired),
        }
    }

    /// Run one renewal and settle the gate. Runs detached from any caller.
    ///
    /// The gate lock is only taken for state checks and transitions; the
    /// credential store (and its listener) is called with it released.
    async fn run_renewal(&self, epoch: u64, refresh_token: Option<String>) -> RenewalOutcome {
        let Some(refresh_token) = refresh_token else {
            self.settle_renewal(epoch, &RenewalMachineInput::Rejected);
            return RenewalOutcome::Failed;
        };
        let result = self.renew_with_backoff(&refresh_token).await;

        if !self.renewal_is_current(epoch) {
            // A login or logout landed while the renewal was running.
            debug!("Discarding renewal result after session change");
            return self.current_outcome();
        }

        let renewed = result.and_then(|RenewResponse { access, refresh }| {
            self.inner
                .credentials
                .renew_session(&refresh_token, access, refresh)?
                .ok_or(ApiError::AuthExpired)
        });

        match renewed {
            Ok(credential) => {
                if !self.settle_renewal(epoch, &RenewalMachineInput::Renewed) {
                    return self.current_outcome();
                }
                info!("Session renewed");
                RenewalOutcome::Renewed(credential.access_token)
            }
            Err(err) => {
                warn!(error = %err, "Session renewal failed");
                if self.settle_renewal(epoch, &RenewalMachineInput::Rejected) {
                    if let Err(err) = self
                        .inner
                        .credentials
                        .clear_session(&refresh_token, SessionEndReason::RenewalFailed)
                    {
                        warn!(error = %err, "Failed to clear credentials after renewal failure");
                    }
                }
                RenewalOutcome::Failed
            }
        }
    }

    fn renewal_is_current(&self, epoch: u64) -> bool {
        let slot = self.inner.renewal.lock();
        slot.epoch == epoch && *slot.machine.state() == RenewalMachineState::InFlight
    }

    /// Apply the final transition of renewal `epoch` if it is still the one
    /// in flight.
    fn settle_renewal(&self, epoch: u64, input: &RenewalMachineInput) -> bool {
        let mut slot = self.inner.renewal.lock();
        if slot.epoch != epoch || *slot.machine.state() != RenewalMachineState::InFlight {
            return false;
        }
        slot.waiter = None;
        transition(&mut slot.machine, input);
        true
    }

    /// Outcome for waiters of a renewal that was overtaken by a session change.
    fn current_outcome(&self) -> RenewalOutcome {
        match self.inner.credentials.access_token() {
            Some(token) => RenewalOutcome::Renewed(token),
            None => RenewalOutcome::Failed,
        }
    }

    /// Call the renewal endpoint, retrying transient failures with backoff.
    async fn renew_with_backoff(&self, refresh_token: &str) -> ApiResult<RenewResponse> {
        let policy = &self.inner.policy;
        let mut last_error = None;

        for attempt in 0..policy.max_retries {
            match self.try_renew(refresh_token).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    last_error = Some(e);

                    if attempt + 1 < policy.max_retries {
                        let delay = policy.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries = policy.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Renewal failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Renewal failed with non-transient error");
                    return Err(e);
                }
            }
        }

        warn!(attempts = policy.max_retries, "Renewal failed after all attempts");
        Err(last_error.unwrap_or(ApiError::AuthExpired))
    }

    async fn try_renew(&self, refresh_token: &str) -> ApiResult<RenewResponse> {
        let body = serde_json::to_value(RenewRequest {
            refresh: refresh_token,
        })?;
        let request = ApiRequest::post(self.inner.refresh_path.clone())
            .json(body)
            .unauthenticated();

        let response = into_result(self.dispatch(&request, None).await?)?;
        response.json()
    }

    /// Move the gate and clear the session, e.g. on logout or a refused replay.
    pub(crate) fn end_session(
        &self,
        reason: SessionEndReason,
        input: RenewalMachineInput,
    ) -> ApiResult<bool> {
        {
            let mut slot = self.inner.renewal.lock();
            if transition(&mut slot.machine, &input).is_none() {
                transition(&mut slot.machine, &RenewalMachineInput::Cleared);
            }
        }
        Ok(self.inner.credentials.clear(reason)?)
    }

    /// Record a freshly established session.
    ///
    /// Bumps the renewal epoch so a renewal still running for the previous
    /// session settles nothing.
    pub(crate) fn establish(&self, credential: Credential) -> ApiResult<()> {
        {
            let mut slot = self.inner.renewal.lock();
            slot.epoch += 1;
            slot.waiter = None;
            transition(&mut slot.machine, &RenewalMachineInput::Established);
        }
        self.inner.credentials.set(credential)?;
        Ok(())
    }

    /// One network exchange, bounded by the request timeout.
    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> ApiResult<ApiResponse> {
        let url = join_url(&self.inner.base_url, &request.path);
        let mut builder = self.inner.http.request(request.method.clone(), &url);

        for (name, value) in request.outgoing_headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        let timeout = request.timeout.unwrap_or(self.inner.request_timeout);
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, ApiError>(ApiResponse { status, body })
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                debug!(method = %request.method, path = %request.path, "Request timed out");
                return Err(ApiError::Timeout(timeout));
            }
        };

        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            "Request completed"
        );
        Ok(response)
    }
}

fn into_result(response: ApiResponse) -> ApiResult<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Http {
            status: response.status,
            body: ErrorBody::new(response.body),
        })
    }
}

/// Apply `input`, returning the new phase, or `None` if the transition is
/// not defined for the current state.
fn transition(machine: &mut RenewalMachine, input: &RenewalMachineInput) -> Option<RenewalPhase> {
    let old_phase = RenewalPhase::from(machine.state());
    if machine.consume(input).is_err() {
        debug!(phase = ?old_phase, input = ?input, "Ignoring renewal input");
        return None;
    }

    let new_phase = RenewalPhase::from(machine.state());
    if old_phase != new_phase {
        debug!(old_phase = ?old_phase, new_phase = ?new_phase, "Renewal state transition");
    }
    Some(new_phase)
}
