//! OAuth client side
//!
//! Everything the signed-in app needs below the session controller:
//!
//! - Identity SDK abstraction (code client popup)
//! - Token acquisition (silent refresh via cookie, consent via code exchange)
//! - Persistence of the signed-in user and access token

mod client;
mod sdk;
mod storage;

pub use client::{
    Acquisition, AcquisitionFailure, AuthBackend, HttpAuthBackend, MISCONFIGURED_MESSAGE,
    TokenAcquisitionClient, TokenGrant,
};
pub use sdk::{CodeCallback, CodeResponse, DEFAULT_SCOPES, IdentitySdk, PromptMode, SdkConfig};
pub use storage::{
    DEFAULT_SAFETY_BUFFER, FileStore, IdentityStore, KeyValueStore, MemoryStore, SessionToken,
    TOKEN_EXPIRES_AT_KEY, TOKEN_KEY, TokenStore, USER_KEY,
};
