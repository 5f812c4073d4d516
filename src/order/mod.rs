//! Authorization and issuance.
//!
//! Getting a certificate is two steps:
//!
//! 1. Prove ownership of every domain. Each domain gets an
//!    [`AuthorizationResource`] that a solver takes to `valid`.
//! 2. Submit a CSR referencing those authorizations and wait for the
//!    [`CertificateResource`].
//!
//! [`AuthorizationResource`]: struct.AuthorizationResource.html
//! [`CertificateResource`]: struct.CertificateResource.html
use crate::api::{ApiNewCert, ApiRevocation};
use crate::cert::{der_to_pem, pem_to_der, valid_days_left};
use crate::dir::Directory;
use crate::poll::{poll_until, Cancel, Poll, PollPolicy};
use crate::req::HttpResponse;
use crate::trans::Transport;
use crate::util::base64url;
use crate::{Error, Result};

pub(crate) mod auth;

pub use self::auth::{reorder_authorizations, AuthorizationResource};

/// An issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateResource {
    /// The first domain of the certificate.
    pub domain: String,
    /// Where the certificate can be fetched again.
    pub cert_url: Option<String>,
    /// PEM encoded certificate. With bundling, the issuer follows the leaf.
    pub certificate: String,
    /// PEM encoded issuer certificate, when the ACME API linked one.
    pub issuer_certificate: Option<String>,
    /// PEM encoded private key of the certificate, when this library
    /// created it.
    pub private_key: Option<String>,
}

impl CertificateResource {
    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        valid_days_left(&self.certificate)
    }

    /// The leaf certificate as DER.
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        pem_to_der(&self.certificate)
    }
}

/// Request a certificate for `csr_der` from valid authorizations.
pub(crate) fn issue(
    trans: &Transport,
    dir: &Directory,
    authzs: &[AuthorizationResource],
    csr_der: &[u8],
    bundle: bool,
    poll: &PollPolicy,
) -> Result<CertificateResource> {
    let domain = match authzs.first() {
        Some(a) => a.domain.clone(),
        None => return Err(Error::Issuance("no authorizations".into())),
    };
    // every domain of the certificate, for error messages
    let names = authzs.iter().map(|a| a.domain.as_str()).collect::<Vec<_>>().join(", ");
    let new_cert_url = authzs
        .iter()
        .find_map(|a| a.new_cert_url.as_deref())
        .unwrap_or_else(|| dir.new_cert_url());

    let new_cert = ApiNewCert {
        resource: "new-cert".into(),
        csr: base64url(csr_der),
        authorizations: authzs.iter().map(|a| a.uri.clone()).collect(),
    };

    debug!("[{}] Request certificate", domain);
    let res = trans.post(new_cert_url, &new_cert)?;
    if !res.is_success() {
        return Err(Error::Issuance(format!("[{}] {}", names, res.problem())));
    }

    let cert_url = res.header("location").map(|l| l.to_string());

    let res = if res.status() == 201 && !res.body().is_empty() {
        res
    } else {
        let location = match &cert_url {
            Some(l) => l.clone(),
            None => {
                return Err(Error::Issuance(format!(
                    "[{}] certificate pending without a location",
                    names
                )))
            }
        };
        let what = format!("certificate for {}", domain);
        poll_until(poll, &Cancel::new(), &what, || poll_certificate(trans, &location, &names))?
    };

    let certificate = der_to_pem(res.body())?;

    // Only the bundle needs the issuer.
    let issuer_certificate = match res.link("up") {
        Some(up) => match fetch_issuer(trans, &up) {
            Ok(issuer) => Some(issuer),
            Err(e) if bundle => {
                return Err(Error::Issuance(format!("[{}] issuer certificate: {}", names, e)));
            }
            Err(e) => {
                warn!("[{}] Skip issuer certificate: {}", domain, e);
                None
            }
        },
        None => None,
    };

    let certificate = match (&issuer_certificate, bundle) {
        (Some(issuer), true) => format!("{}{}", certificate, issuer),
        _ => certificate,
    };

    debug!("[{}] Certificate issued", domain);
    Ok(CertificateResource {
        domain,
        cert_url,
        certificate,
        issuer_certificate,
        private_key: None,
    })
}

fn poll_certificate(trans: &Transport, location: &str, names: &str) -> Result<Poll<HttpResponse>> {
    let res = trans.get(location)?;
    match res.status() {
        200 if !res.body().is_empty() => Ok(Poll::Ready(res)),
        200 | 202 => Ok(Poll::Pending),
        s if s >= 500 => Err(Error::Api(res.problem())),
        _ => Err(Error::Issuance(format!("[{}] {}", names, res.problem()))),
    }
}

fn fetch_issuer(trans: &Transport, url: &str) -> Result<String> {
    debug!("Fetch issuer certificate {}", url);
    let res = trans.get(url)?;
    if !res.is_success() {
        return Err(Error::Api(res.problem()));
    }
    der_to_pem(res.body())
}

/// Revoke the first certificate in `cert_pem`.
pub(crate) fn revoke(trans: &Transport, dir: &Directory, cert_pem: &str) -> Result<()> {
    let revocation = ApiRevocation {
        resource: "revoke-cert".into(),
        certificate: base64url(&pem_to_der(cert_pem)?),
    };
    debug!("Revoke certificate");
    trans.call(dir.revoke_cert_url(), &revocation)?;
    Ok(())
}
