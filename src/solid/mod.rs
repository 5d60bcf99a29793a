//! Solid-OIDC authentication and Pod access
//!
//! Discovery and registration run against whichever identity provider the
//! user's WebID names. Every token request and resource request carries a
//! DPoP proof signed with the session's P-256 key.

pub mod auth;
pub mod callback;
pub mod dpop;
pub mod identity;
pub mod pod;
pub mod registration;
pub mod scheduler;

pub use self::{
    auth::{AuthState, AuthorizationRequest, SolidSession},
    callback::{extract_code, parse_callback, CallbackParams},
    dpop::DPoPKey,
    identity::WebIdProfile,
    pod::{ContainerOutcome, PodClient},
    registration::{ClientRegistration, PkcePair, ProviderConfig},
    scheduler::RefreshScheduler,
};
