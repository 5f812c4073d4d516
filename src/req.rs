use serde::de::DeserializeOwned;
use std::io::Read;

use crate::api::ApiProblem;
use crate::util::find_link;
use crate::{Error, Result};

pub(crate) type ReqResult<T> = std::result::Result<T, ApiProblem>;

/// A fully read response.
///
/// Error statuses are responses too: they carry a nonce and sometimes a
/// `Location` (e.g. `409 Conflict` on registration), so they are only
/// turned into an [`ApiProblem`] by [`handle_errors`].
///
/// [`handle_errors`]: #method.handle_errors
#[derive(Debug, Clone)]
pub(crate) struct HttpResponse {
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn from_ureq(res: ureq::Response) -> Self {
        let status = res.status();
        let status_text = res.status_text().to_string();
        let mut headers = vec![];
        for name in res.headers_names() {
            for value in res.all(&name) {
                headers.push((name.to_ascii_lowercase(), value.to_string()));
            }
        }
        let mut body = vec![];
        // letsencrypt sometimes closes the TLS abruptly causing io error
        // even though we did capture the body.
        res.into_reader().read_to_end(&mut body).ok();
        HttpResponse {
            status,
            status_text,
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn expect_header(&self, name: &str) -> ReqResult<String> {
        self.header(name).map(|s| s.to_string()).ok_or_else(|| ApiProblem {
            _type: format!("Missing header: {}", name),
            detail: None,
            status: Some(self.status),
        })
    }

    /// Target of `Link: <...>;rel="<rel>"`.
    pub fn link(&self, rel: &str) -> Option<String> {
        let values = self
            .headers
            .iter()
            .filter(|(n, _)| n == "link")
            .map(|(_, v)| v.as_str());
        find_link(values, rel)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let res_body = self.text();
        debug!("{}", res_body);
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The problem document of an error response.
    pub fn problem(&self) -> ApiProblem {
        let content_type = self.header("content-type").unwrap_or("");
        if content_type.starts_with("application/problem+json") {
            // if we were sent a problem+json, deserialize it
            let body = self.text();
            let mut problem = serde_json::from_str(&body).unwrap_or_else(|e| ApiProblem {
                _type: "problemJsonFail".into(),
                detail: Some(format!(
                    "Failed to deserialize application/problem+json ({}) body: {}",
                    e, body
                )),
                status: None,
            });
            problem.status = problem.status.or(Some(self.status));
            problem
        } else {
            // some other problem
            let status = format!("{} {}", self.status, self.status_text);
            let detail = format!("{} body: {}", status, self.text());
            ApiProblem {
                _type: "httpReqError".into(),
                detail: Some(detail),
                status: Some(self.status),
            }
        }
    }

    pub fn handle_errors(self) -> ReqResult<Self> {
        // ok responses pass through
        if self.is_success() {
            return Ok(self);
        }
        Err(self.problem())
    }
}

fn read_response(rt: std::result::Result<ureq::Response, ureq::Error>) -> Result<HttpResponse> {
    match rt {
        Ok(res) => Ok(HttpResponse::from_ureq(res)),
        Err(ureq::Error::Status(_, res)) => Ok(HttpResponse::from_ureq(res)),
        Err(ureq::Error::Transport(t)) => Err(Error::Transport(t.to_string())),
    }
}

pub(crate) fn req_get(agent: &ureq::Agent, url: &str) -> Result<HttpResponse> {
    let req = agent.get(url);
    trace!("{:?}", req);
    read_response(req.call())
}

pub(crate) fn req_head(agent: &ureq::Agent, url: &str) -> Result<HttpResponse> {
    let req = agent.head(url);
    trace!("{:?}", req);
    read_response(req.call())
}

pub(crate) fn req_post(agent: &ureq::Agent, url: &str, body: &str) -> Result<HttpResponse> {
    let req = agent.post(url).set("content-type", "application/jose+json");
    trace!("{:?} {}", req, body);
    read_response(req.send_string(body))
}
