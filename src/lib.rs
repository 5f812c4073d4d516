#![warn(clippy::all)]
//! acme-issuer is a client for ACME (Automatic Certificate Management Environment)
//! certificate authorities, speaking the original `new-reg` / `new-authz` / `new-cert`
//! dialect of the protocol.
//!
//! It registers an account, proves ownership of any number of domains concurrently
//! and gets a certificate for them.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use acme_issuer::{AccountKey, Client, DirectoryUrl, Error, RegistrationResource, User};
//!
//! struct Me {
//!     key: Arc<AccountKey>,
//!     reg: Option<RegistrationResource>,
//! }
//!
//! impl User for Me {
//!     fn email(&self) -> &str {
//!         "foo@bar.com"
//!     }
//!     fn private_key(&self) -> Arc<AccountKey> {
//!         self.key.clone()
//!     }
//!     fn registration(&self) -> Option<&RegistrationResource> {
//!         self.reg.as_ref()
//!     }
//!     fn set_registration(&mut self, reg: RegistrationResource) {
//!         self.reg = Some(reg);
//!     }
//! }
//!
//! fn request_cert() -> Result<(), Error> {
//!
//! // The account key. Keep it (AccountKey::to_pem) to reuse the account.
//! let mut me = Me {
//!     key: Arc::new(AccountKey::generate_p256()?),
//!     reg: None,
//! };
//!
//! // Use DirectoryUrl::LetsEncryptStaging for dev/testing. Certificate
//! // keys are RSA 2048 and the http-01 responder listens on port 80.
//! let client = Client::new(DirectoryUrl::LetsEncrypt, &me, 2048, None)?;
//!
//! // Register the account (or find the existing one) and accept the terms.
//! client.register(&mut me)?;
//! client.agree_to_tos(&mut me)?;
//!
//! // Prove ownership of all domains and get a certificate bundled
//! // with its issuer.
//! let cert = client.obtain_certificate(&["example.com", "www.example.com"], true)?;
//!
//! println!("{}", cert.certificate);
//! Ok(())
//! }
//! ```
//!
//! ## Domain ownership
//!
//! Before issuing, the ACME API wants proof that you control every domain of the
//! certificate. This library answers `http-01` challenges: for the duration of a
//! challenge it serves the proof on
//!
//! ```text
//! http://<domain>/.well-known/acme-challenge/<token>
//! ```
//!
//! so the port (80 unless changed with `opt_port`) must reach this process. All domains
//! are authorized at the same time, each in its own thread. With a fixed port the
//! responders take turns on it.
//!
//! ## Rate limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API i not being
//! abused. It might be tempting to make the [`PollPolicy`] intervals really short, but
//! balance this against the real risk of having access cut off.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits/
//! [`PollPolicy`]: struct.PollPolicy.html
//!
//! ### Use staging for dev!
//!
//! Especially take care to use the Let`s Encrypt staging environment for development
//! where the rate limits are more relaxed.
//!
//! See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`DirectoryUrl::LetsEncryptStaging`]: enum.DirectoryUrl.html#variant.LetsEncryptStaging
//!
//! ## Implementation details
//!
//! Blocking I/O with [ureq](https://docs.rs/ureq/) for the API, and
//! [openssl](https://docs.rs/openssl/) for keys, JWS signatures and CSRs. The
//! `http-01` responder is a small [hyper](https://docs.rs/hyper/) server on a
//! thread of its own.
//!
#[macro_use]
extern crate log;

mod acc;
mod cert;
mod client;
mod dir;
mod error;
mod jwt;
mod poll;
mod req;
mod trans;
mod util;

pub mod api;
pub mod order;
pub mod solver;

#[cfg(test)]
mod test;

pub use crate::acc::{AccountKey, RegistrationResource, User};
pub use crate::cert::{create_csr, create_p256_key, create_p384_key, create_rsa_key};
pub use crate::client::{Client, ClientConfig};
pub use crate::dir::{Directory, DirectoryUrl};
pub use crate::error::{DomainError, Error, Result};
pub use crate::order::{reorder_authorizations, AuthorizationResource, CertificateResource};
pub use crate::poll::{Cancel, PollPolicy};
pub use crate::trans::Transport;
