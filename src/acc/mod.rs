//
use std::sync::Arc;

use crate::api::ApiRegistration;
use crate::dir::Directory;
use crate::req::HttpResponse;
use crate::trans::Transport;
use crate::{Error, Result};

mod akey;

pub use self::akey::AccountKey;

/// The owner of an ACME account.
///
/// The library never stores keys or registrations itself. Implement this
/// for whatever holds them (a config file, a database row, ...).
pub trait User {
    /// Contact email, sent as `mailto:<email>` on registration.
    fn email(&self) -> &str;
    /// The account key that signs every request.
    fn private_key(&self) -> Arc<AccountKey>;
    /// The current registration, if any.
    fn registration(&self) -> Option<&RegistrationResource>;
    /// Updated after registering and after agreeing to the terms of service.
    fn set_registration(&mut self, reg: RegistrationResource);
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationResource {
    /// The registration object as returned by the ACME API.
    pub body: ApiRegistration,
    /// Account url.
    pub uri: String,
    /// Where to request new authorizations (`Link rel="next"`).
    pub new_authz_url: String,
    /// Terms of service to agree to (`Link rel="terms-of-service"`).
    pub terms_of_service: Option<String>,
}

impl RegistrationResource {
    fn from_response(res: &HttpResponse, uri: &str, dir: &Directory) -> Result<Self> {
        let body: ApiRegistration = res.json()?;
        Ok(RegistrationResource {
            body,
            uri: uri.into(),
            new_authz_url: res
                .link("next")
                .unwrap_or_else(|| dir.new_authz_url().to_string()),
            terms_of_service: res.link("terms-of-service"),
        })
    }
}

/// Create the account, or look up the existing one when the key is
/// already registered.
pub(crate) fn register(trans: &Transport, dir: &Directory, email: &str) -> Result<RegistrationResource> {
    let new_reg = ApiRegistration {
        resource: Some("new-reg".into()),
        contact: vec![format!("mailto:{}", email)],
        ..Default::default()
    };

    debug!("Register account for {}", email);
    let res = trans.post(dir.new_reg_url(), &new_reg)?;

    match res.status() {
        201 => {
            let uri = res.expect_header("location").map_err(registration)?;
            debug!("Registered account: {}", uri);
            RegistrationResource::from_response(&res, &uri, dir)
        }
        409 => {
            let uri = res.expect_header("location").map_err(registration)?;
            debug!("Account already registered: {}", uri);
            fetch_registration(trans, dir, &uri)
        }
        _ => Err(registration(res.problem())),
    }
}

fn registration<E: std::fmt::Display>(e: E) -> Error {
    Error::Registration(e.to_string())
}

/// Current state of the account at `uri`.
pub(crate) fn fetch_registration(trans: &Transport, dir: &Directory, uri: &str) -> Result<RegistrationResource> {
    let reg = ApiRegistration {
        resource: Some("reg".into()),
        ..Default::default()
    };
    let res = trans.post(uri, &reg)?;
    if !res.is_success() {
        return Err(registration(res.problem()));
    }
    RegistrationResource::from_response(&res, uri, dir)
}

/// Agree to the terms of service linked from the registration.
pub(crate) fn agree_to_tos(
    trans: &Transport,
    dir: &Directory,
    current: &RegistrationResource,
) -> Result<RegistrationResource> {
    let tos = match &current.terms_of_service {
        Some(tos) => tos.clone(),
        None => return Err(Error::Registration("no terms of service to agree to".into())),
    };
    debug!("Agree to terms of service: {}", tos);
    let reg = ApiRegistration {
        resource: Some("reg".into()),
        agreement: Some(tos),
        ..Default::default()
    };
    let res = trans.post(&current.uri, &reg)?;
    if !res.is_success() {
        return Err(registration(res.problem()));
    }
    let mut updated = RegistrationResource::from_response(&res, &current.uri, dir)?;
    if updated.terms_of_service.is_none() {
        updated.terms_of_service = current.terms_of_service.clone();
    }
    Ok(updated)
}
