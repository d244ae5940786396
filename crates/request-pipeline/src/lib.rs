//! Authenticated request pipeline for the dashboard REST API.
//!
//! Every call goes through [`RequestPipeline::send`], which attaches the
//! bearer token from the [`CredentialStore`](credential_store::CredentialStore),
//! intercepts `401` answers and renews the session at most once per renewal
//! window no matter how many requests were refused.

mod error;
mod pipeline;
mod renewal_fsm;
mod request;
mod session;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use pipeline::RequestPipeline;
pub use renewal_fsm::{
    RenewalMachine, RenewalMachineInput, RenewalMachineState, RenewalPhase, RenewalPolicy,
};
pub use request::{ApiRequest, ApiResponse, FormPart, Method, MultipartForm, RequestBody};
pub use session::SessionStatus;
