//
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread;

use crate::api::{ApiAuthz, ApiChallenge, ApiIdentifier, ApiNewAuthz};
use crate::error::DomainError;
use crate::poll::Cancel;
use crate::solver::Solver;
use crate::trans::Transport;
use crate::{Error, Result};

/// An authorization ([ownership proof]) for a domain name.
///
/// Every domain of a certificate needs a `valid` authorization before the
/// ACME API issues it.
///
/// [ownership proof]: ../index.html#domain-ownership
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationResource {
    /// The domain being authorized.
    pub domain: String,
    /// Authorization url.
    pub uri: String,
    /// Where to request the certificate (`Link rel="next"`), if the ACME
    /// API said so.
    pub new_cert_url: Option<String>,
    /// The authorization object. After a successful solve its status is
    /// `valid` and the solved challenge replaces the offered one.
    pub body: ApiAuthz,
}

/// Ask the ACME API for a new authorization of `domain`.
pub(crate) fn new_authorization(trans: &Transport, new_authz_url: &str, domain: &str) -> Result<AuthorizationResource> {
    let new_authz = ApiNewAuthz {
        resource: "new-authz".into(),
        identifier: ApiIdentifier::dns(domain),
    };
    debug!("[{}] Request authorization", domain);
    let res = trans.call(new_authz_url, &new_authz)?;
    let uri = res.expect_header("location")?;
    let body: ApiAuthz = res.json()?;
    Ok(AuthorizationResource {
        domain: domain.into(),
        uri,
        new_cert_url: res.link("next"),
        body,
    })
}

/// Put authorizations back in the order of `domains`.
///
/// Results may come in any order (they are correlated by domain name).
/// For each domain, in order, its result is appended. Results for domains
/// not in the list are dropped.
pub fn reorder_authorizations<S: AsRef<str>>(
    domains: &[S],
    results: Vec<AuthorizationResource>,
) -> Vec<AuthorizationResource> {
    let mut by_domain: HashMap<String, AuthorizationResource> =
        results.into_iter().map(|a| (a.domain.clone(), a)).collect();
    domains
        .iter()
        .filter_map(|d| by_domain.remove(d.as_ref()))
        .collect()
}

/// Drives the authorization of several domains at once.
pub(crate) struct Authorizer<'a> {
    pub transport: &'a Transport,
    pub new_authz_url: &'a str,
    pub solvers: &'a HashMap<String, Solver>,
    pub priority: &'a [String],
}

impl<'a> Authorizer<'a> {
    /// Authorize all `domains` concurrently, one thread per domain.
    ///
    /// All domains run to completion even if some fail; the failures are
    /// then reported together. The result is in the order of `domains`.
    pub fn authorize<S: AsRef<str> + Sync>(&self, domains: &[S], cancel: &Cancel) -> Result<Vec<AuthorizationResource>> {
        check_domains(domains)?;

        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            for domain in domains {
                let tx = tx.clone();
                s.spawn(move || {
                    let domain = domain.as_ref();
                    let res = self.authorize_domain(domain, cancel);
                    if let Err(e) = &res {
                        debug!("[{}] Authorization failed: {}", domain, e);
                    }
                    tx.send((domain.to_string(), res)).ok();
                });
            }
        });
        drop(tx);

        gather(domains, rx)
    }

    fn authorize_domain(&self, domain: &str, cancel: &Cancel) -> Result<AuthorizationResource> {
        cancel.check()?;
        let mut authz = new_authorization(self.transport, self.new_authz_url, domain)?;
        if authz.body.is_status_valid() {
            debug!("[{}] Already authorized", domain);
            return Ok(authz);
        }
        if !authz.body.is_status_pending() {
            return Err(Error::Challenge {
                domain: domain.into(),
                reason: format!("authorization is {}", authz.body.status.as_deref().unwrap_or("unknown")),
            });
        }

        let (solver, chall) = self.select(domain, &authz.body)?;
        let chall = chall.clone();

        cancel.check()?;
        debug!("[{}] Solve {}", domain, chall._type);
        let solved = solver.solve(domain, &chall, cancel)?;

        if let Some(c) = authz.body.challenges.iter_mut().find(|c| c.uri == chall.uri) {
            *c = solved;
        }
        authz.body.status = Some("valid".into());
        Ok(authz)
    }

    /// The highest priority registered solver with an offered challenge.
    ///
    /// The authorization must offer exactly one challenge of that type.
    fn select<'b>(&self, domain: &str, authz: &'b ApiAuthz) -> Result<(&'a Solver, &'b ApiChallenge)> {
        let picked = self.priority.iter().find_map(|tag| {
            let solver = self.solvers.get(tag)?;
            authz.challenge(tag)?;
            Some((tag, solver))
        });
        let (tag, solver) = match picked {
            Some(x) => x,
            None => {
                let offered: Vec<_> = authz.challenges.iter().map(|c| c._type.as_str()).collect();
                return Err(Error::Challenge {
                    domain: domain.into(),
                    reason: format!("no solver for offered challenges [{}]", offered.join(", ")),
                });
            }
        };
        match authz.challenges_of(tag).as_slice() {
            [chall] => Ok((solver, *chall)),
            offered => Err(Error::Challenge {
                domain: domain.into(),
                reason: format!("{} {} challenges offered", offered.len(), tag),
            }),
        }
    }
}

/// Collect per domain results into the outcome of a whole authorization.
///
/// Cancellation wins if any domain stopped on it. Otherwise failures are
/// reported together in the order of `domains`.
fn gather<S, I>(domains: &[S], results: I) -> Result<Vec<AuthorizationResource>>
where
    S: AsRef<str>,
    I: IntoIterator<Item = (String, Result<AuthorizationResource>)>,
{
    let mut solved = vec![];
    let mut failed = vec![];
    let mut cancelled = false;
    for (domain, res) in results {
        match res {
            Ok(authz) => solved.push(authz),
            Err(Error::Cancelled) => cancelled = true,
            Err(error) => failed.push(DomainError { domain, error }),
        }
    }

    if cancelled {
        return Err(Error::Cancelled);
    }
    if !failed.is_empty() {
        let index = |d: &str| domains.iter().position(|x| x.as_ref() == d);
        failed.sort_by_key(|e| index(&e.domain));
        return Err(Error::Authorization(failed));
    }

    Ok(reorder_authorizations(domains, solved))
}

/// Names are compared case insensitively, as DNS does.
fn check_domains<S: AsRef<str>>(domains: &[S]) -> Result<()> {
    if domains.is_empty() {
        return Err("no domains to authorize".into());
    }
    let mut seen = HashSet::new();
    for d in domains {
        if !seen.insert(d.as_ref().to_ascii_lowercase()) {
            return Err(format!("duplicate domain: {}", d.as_ref()).into());
        }
    }
    Ok(())
}
