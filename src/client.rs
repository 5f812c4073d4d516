//
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::acc::{self, AccountKey, RegistrationResource, User};
use crate::cert::{create_csr, create_rsa_key};
use crate::dir::{Directory, DirectoryUrl};
use crate::order::auth::Authorizer;
use crate::order::{self, AuthorizationResource, CertificateResource};
use crate::poll::{Cancel, PollPolicy};
use crate::solver::{Http01Solver, Solver, HTTP_01};
use crate::trans::{NonceSource, Transport};
use crate::{Error, Result};

/// Tunables of a [`Client`]. The defaults suit Let's Encrypt.
///
/// [`Client`]: struct.Client.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Port for the `http-01` responder. `None` is port 80.
    pub opt_port: Option<u16>,
    /// Polling of challenge status.
    pub challenge_poll: PollPolicy,
    /// Polling of a deferred certificate.
    pub issuance_poll: PollPolicy,
    /// Connect, read and write timeout of every HTTP request.
    pub timeout: Duration,
    /// Challenge types in order of preference. Types without a solver are
    /// ignored.
    pub solver_priority: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            opt_port: None,
            challenge_poll: PollPolicy::default(),
            issuance_poll: PollPolicy::default(),
            timeout: Duration::from_secs(30),
            solver_priority: vec![HTTP_01.to_string()],
        }
    }
}

/// A session with an ACME API on behalf of one account key.
///
/// Creating a client fetches the directory. Everything signed afterwards
/// goes through the client's single [`Transport`], which its solvers share.
///
/// [`Transport`]: struct.Transport.html
#[derive(Debug)]
pub struct Client {
    directory: Directory,
    transport: Arc<Transport>,
    key_bits: u32,
    solvers: HashMap<String, Solver>,
    config: ClientConfig,
}

impl Client {
    /// Connect to the directory at `url` for `user`'s account key.
    ///
    /// `key_bits` is the RSA size of certificate keys created by
    /// [`obtain_certificate`]. `opt_port` overrides the `http-01` port.
    ///
    /// [`obtain_certificate`]: #method.obtain_certificate
    pub fn new<U: User>(url: DirectoryUrl, user: &U, key_bits: u32, opt_port: Option<u16>) -> Result<Client> {
        let config = ClientConfig {
            opt_port,
            ..Default::default()
        };
        Client::with_config(url, user, key_bits, config)
    }

    pub fn with_config<U: User>(url: DirectoryUrl, user: &U, key_bits: u32, config: ClientConfig) -> Result<Client> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .timeout_write(config.timeout)
            .build();

        let mut directory = Directory::fetch(&agent, url.to_url())?;
        let initial = directory.take_initial_nonce();
        let nonce_source = NonceSource::new(agent.clone(), directory.url(), initial);
        let transport = Arc::new(Transport::new(agent, nonce_source, user.private_key()));

        let mut solvers = HashMap::new();
        let http01 = Http01Solver::new(transport.clone(), config.opt_port, config.challenge_poll);
        solvers.insert(HTTP_01.to_string(), Solver::Http01(http01));

        Ok(Client {
            directory,
            transport,
            key_bits,
            solvers,
            config,
        })
    }

    /// Register the user's account key, or look up its existing account.
    ///
    /// The registration is stored in the user.
    pub fn register<U: User>(&self, user: &mut U) -> Result<RegistrationResource> {
        let reg = acc::register(&self.transport, &self.directory, user.email())?;
        user.set_registration(reg.clone());
        Ok(reg)
    }

    /// Agree to the terms of service of the user's registration.
    pub fn agree_to_tos<U: User>(&self, user: &mut U) -> Result<RegistrationResource> {
        let current = match user.registration() {
            Some(reg) => reg.clone(),
            None => return Err(Error::Registration("not registered".into())),
        };
        let reg = acc::agree_to_tos(&self.transport, &self.directory, &current)?;
        user.set_registration(reg.clone());
        Ok(reg)
    }

    /// Prove ownership of all `domains`, concurrently.
    ///
    /// The authorizations are returned in the order of `domains`. If any
    /// domain fails, the error lists every failed domain.
    pub fn authorize<S: AsRef<str> + Sync>(&self, domains: &[S]) -> Result<Vec<AuthorizationResource>> {
        self.authorize_with_cancel(domains, &Cancel::new())
    }

    /// Like [`authorize`], giving up with [`Error::Cancelled`] once
    /// `cancel` fires.
    ///
    /// [`authorize`]: #method.authorize
    /// [`Error::Cancelled`]: enum.Error.html#variant.Cancelled
    pub fn authorize_with_cancel<S: AsRef<str> + Sync>(
        &self,
        domains: &[S],
        cancel: &Cancel,
    ) -> Result<Vec<AuthorizationResource>> {
        let authorizer = Authorizer {
            transport: &self.transport,
            new_authz_url: self.directory.new_authz_url(),
            solvers: &self.solvers,
            priority: &self.config.solver_priority,
        };
        authorizer.authorize(domains, cancel)
    }

    /// Request a certificate for a DER encoded CSR. With `bundle`, the
    /// issuer certificate is appended to the PEM.
    pub fn issue(
        &self,
        authzs: &[AuthorizationResource],
        csr_der: &[u8],
        bundle: bool,
    ) -> Result<CertificateResource> {
        order::issue(
            &self.transport,
            &self.directory,
            authzs,
            csr_der,
            bundle,
            &self.config.issuance_poll,
        )
    }

    /// Authorize `domains` and get a certificate for them with a new RSA
    /// key of `key_bits`.
    ///
    /// The first domain is the common name; all domains are subject
    /// alternative names in the given order.
    pub fn obtain_certificate<S: AsRef<str> + Sync>(&self, domains: &[S], bundle: bool) -> Result<CertificateResource> {
        let authzs = self.authorize(domains)?;

        let pkey = create_rsa_key(self.key_bits)?;
        let csr = create_csr(&pkey, domains)?;
        let mut cert = self.issue(&authzs, &csr.to_der()?, bundle)?;

        let pem = pkey.private_key_to_pem_pkcs8()?;
        cert.private_key = Some(String::from_utf8_lossy(&pem).into_owned());
        Ok(cert)
    }

    /// Revoke the (first) certificate of a PEM.
    pub fn revoke_certificate(&self, cert_pem: &str) -> Result<()> {
        order::revoke(&self.transport, &self.directory, cert_pem)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// The signing transport shared by all solvers.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// The account key.
    pub fn acme_key(&self) -> &Arc<AccountKey> {
        self.transport.acme_key()
    }

    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    pub fn opt_port(&self) -> Option<u16> {
        self.config.opt_port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Solvers by challenge type.
    pub fn solvers(&self) -> &HashMap<String, Solver> {
        &self.solvers
    }
}
