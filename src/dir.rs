//
use crate::api::ApiDirectory;
use crate::req::req_get;
use crate::{Error, Result};

const LETSENCRYPT: &str = "https://acme-v01.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING: &str = "https://acme-staging.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory. Not appropriate for testing and dev.
    LetsEncrypt,
    /// The staging Let's Encrypt directory. Use for testing and dev. Doesn't issue
    /// "valid" certificates. The root signing certificate is not supposed
    /// to be in any trust chains.
    LetsEncryptStaging,
    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    pub(crate) fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING,
            DirectoryUrl::Other(s) => s,
        }
    }
}

/// The endpoints of an ACME API, fetched once per client.
#[derive(Debug, Clone)]
pub struct Directory {
    url: String,
    api_directory: ApiDirectory,
    initial_nonce: Option<String>,
}

impl Directory {
    /// Fetch the directory with a single unauthenticated GET.
    ///
    /// The nonce of the directory response is kept to sign the first request.
    pub(crate) fn fetch(agent: &ureq::Agent, url: &str) -> Result<Directory> {
        debug!("Fetch directory {}", url);
        let res = req_get(agent, url).map_err(|e| Error::Directory(format!("{}: {}", url, e)))?;
        let res = res
            .handle_errors()
            .map_err(|p| Error::Directory(format!("{}: {}", url, p)))?;
        let api_directory: ApiDirectory = serde_json::from_slice(res.body())
            .map_err(|e| Error::Directory(format!("{}: malformed directory: {}", url, e)))?;

        let endpoints = [
            ("new-authz", &api_directory.new_authz),
            ("new-reg", &api_directory.new_reg),
            ("new-cert", &api_directory.new_cert),
            ("revoke-cert", &api_directory.revoke_cert),
        ];
        if let Some((name, _)) = endpoints.iter().find(|(_, u)| u.is_empty()) {
            return Err(Error::Directory(format!("{}: missing {} url", url, name)));
        }

        Ok(Directory {
            url: url.into(),
            initial_nonce: res.header("replay-nonce").map(|n| n.to_string()),
            api_directory,
        })
    }

    /// The url the directory was fetched from. Also the nonce endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn new_authz_url(&self) -> &str {
        &self.api_directory.new_authz
    }

    pub fn new_reg_url(&self) -> &str {
        &self.api_directory.new_reg
    }

    pub fn new_cert_url(&self) -> &str {
        &self.api_directory.new_cert
    }

    pub fn revoke_cert_url(&self) -> &str {
        &self.api_directory.revoke_cert
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_directory(&self) -> &ApiDirectory {
        &self.api_directory
    }

    pub(crate) fn take_initial_nonce(&mut self) -> Option<String> {
        self.initial_nonce.take()
    }
}
