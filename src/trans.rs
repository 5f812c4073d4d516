use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::acc::AccountKey;
use crate::jwt::make_jws;
use crate::req::{req_get, req_head, req_post, HttpResponse};
use crate::{Error, Result};

/// JWS signing and nonce handling for requests to the API.
///
/// There is exactly one transport per [`Client`], shared by reference
/// with every solver. The account key is read only; the nonce is the only
/// mutable state and is guarded by the [`NonceSource`].
///
/// [`Client`]: ../struct.Client.html
#[derive(Debug)]
pub struct Transport {
    acme_key: Arc<AccountKey>,
    agent: ureq::Agent,
    nonce_source: NonceSource,
}

impl Transport {
    pub(crate) fn new(agent: ureq::Agent, nonce_source: NonceSource, acme_key: Arc<AccountKey>) -> Self {
        Transport {
            acme_key,
            agent,
            nonce_source,
        }
    }

    /// The key used in the transport.
    pub fn acme_key(&self) -> &Arc<AccountKey> {
        &self.acme_key
    }

    #[cfg(test)]
    pub(crate) fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    #[cfg(test)]
    pub(crate) fn nonce_source(&self) -> &NonceSource {
        &self.nonce_source
    }

    /// Build a signed envelope with the held nonce, or a freshly fetched one.
    pub(crate) fn sign<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<String> {
        let nonce = self.nonce_source.take()?;
        make_jws(url, nonce, &self.acme_key, payload)
    }

    /// Signed POST where error responses are returned as is, for the few
    /// calls that need to look at them (conflicts, issuance problems).
    pub(crate) fn post<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<HttpResponse> {
        // A signing failure or a rejected nonce is retried once with a fresh nonce.
        let mut retried = false;
        loop {
            let body = match self.sign(url, payload) {
                Ok(body) => body,
                Err(e) if !retried => {
                    debug!("Retrying on signing failure: {}", e);
                    retried = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!("Call endpoint {}", url);

            let response = req_post(&self.agent, url, &body)?;

            // Regardless of the request being a success or not, there might be
            // a nonce in the response.
            self.nonce_source.extract_nonce(&response);

            if !response.is_success() && !retried && response.problem().is_bad_nonce() {
                debug!("Retrying on bad nonce");
                retried = true;
                continue;
            }

            return Ok(response);
        }
    }

    /// Signed POST, turning error responses into [`Error::Api`].
    ///
    /// [`Error::Api`]: ../enum.Error.html#variant.Api
    pub(crate) fn call<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<HttpResponse> {
        Ok(self.post(url, payload)?.handle_errors()?)
    }

    /// Unsigned GET, used for polling. The response nonce is kept.
    pub(crate) fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = req_get(&self.agent, url)?;
        self.nonce_source.extract_nonce(&response);
        Ok(response)
    }
}

/// The single most recently seen nonce.
///
/// Taking the nonce clears it under the lock, so two requests can never
/// be signed with the same value.
#[derive(Debug)]
pub(crate) struct NonceSource {
    nonce_url: String,
    agent: ureq::Agent,
    nonce: Mutex<Option<String>>,
}

impl NonceSource {
    pub fn new(agent: ureq::Agent, nonce_url: &str, initial: Option<String>) -> Self {
        NonceSource {
            nonce_url: nonce_url.into(),
            agent,
            nonce: Mutex::new(initial),
        }
    }

    pub fn extract_nonce(&self, res: &HttpResponse) {
        if let Some(nonce) = res.header("replay-nonce") {
            trace!("Extract nonce");
            self.store(nonce.to_string());
        }
    }

    pub fn store(&self, nonce: String) {
        *self.nonce.lock().unwrap_or_else(PoisonError::into_inner) = Some(nonce);
    }

    /// Whether a nonce is held (no request needed for the next signature).
    #[cfg(test)]
    pub fn is_held(&self) -> bool {
        self.nonce.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn take(&self) -> Result<String> {
        {
            let mut held = self.nonce.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(nonce) = held.take() {
                trace!("Use previous nonce");
                return Ok(nonce);
            }
        }
        debug!("Request new nonce");
        let res = req_head(&self.agent, &self.nonce_url)
            .map_err(|e| Error::Signing(format!("no nonce available: {}", e)))?;
        res.header("replay-nonce")
            .map(|n| n.to_string())
            .ok_or_else(|| Error::Signing(format!("no Replay-Nonce from {}", self.nonce_url)))
    }
}
