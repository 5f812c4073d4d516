//! A stub ACME API for the tests.
//!
//! Domains steer the outcome by prefix:
//!
//! * `valid.` is authorized from the start.
//! * `pending` never leaves pending.
//! * `invalid` fails validation.
//! * `flaky` answers the first challenge poll with a 500.
//! * `dnsonly.` is offered a `dns-01` challenge only.
//! * `deferred.` gets its certificate on the second poll, `slow.` never.
//! * `rejected.` is refused a certificate, `withdrawn.` is refused while
//!   polling for it.
//! * `noissuer.` links an issuer certificate that does not exist.
//! * `twice.` is offered two `http-01` challenges.
#![allow(clippy::trivial_regex)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Response, Server};
use lazy_static::lazy_static;
use openssl::sha::sha256;
use openssl::x509::X509Req;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;

use crate::acc::{AccountKey, RegistrationResource, User};
use crate::api::{ApiAuthz, ApiChallenge, ApiIdentifier, ApiProblem};
use crate::cert::test::self_signed;
use crate::dir::Directory;
use crate::jwt::Jwk;
use crate::trans::{NonceSource, Transport};
use crate::util::base64url;
use crate::Result;

lazy_static! {
    static ref RE_URL: regex::Regex = regex::Regex::new("<URL>").unwrap();
    static ref RE_DNS: regex::Regex = regex::Regex::new(r"DNS:([^,\s]+)").unwrap();
}

pub struct TestServer {
    pub url: String,
    pub dir_url: String,
    state: Arc<Mutex<Authority>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Requests made as `"<METHOD> <path>"`.
    pub fn count(&self, request: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.requests.iter().filter(|r| *r == request).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.requests.iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    /// Whether the http-01 challenge of `domain` was validated.
    pub fn challenge_valid(&self, domain: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .challenges
            .get(domain)
            .map(|cs| cs.iter().any(|c| c._type == "http-01" && c.is_status_valid()))
            .unwrap_or(false)
    }

    /// Subject alternative names of the last CSR, in order.
    pub fn last_csr_domains(&self) -> Vec<String> {
        self.state.lock().unwrap().last_csr_domains.clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

struct Account {
    id: u64,
    contact: Vec<String>,
    agreement: Option<String>,
    key: Value,
}

enum Delivery {
    Direct,
    Deferred,
    Never,
    Withdrawn,
}

struct IssuedCert {
    der: Vec<u8>,
    delivery: Delivery,
    polls: u32,
    issuer_path: &'static str,
}

struct Authority {
    url: String,
    issuer_der: Vec<u8>,
    next_nonce: u64,
    nonces: HashSet<String>,
    requests: Vec<String>,
    accounts: Vec<Account>,
    challenges: HashMap<String, Vec<ApiChallenge>>,
    challenge_polls: HashMap<String, u32>,
    certs: Vec<IssuedCert>,
    revoked: HashSet<Vec<u8>>,
    last_csr_domains: Vec<String>,
}

struct Signed {
    jwk: Value,
    payload: Value,
}

impl Authority {
    fn new_nonce(&mut self) -> String {
        self.next_nonce += 1;
        let nonce = base64url(format!("nonce-{}", self.next_nonce).as_bytes());
        self.nonces.insert(nonce.clone());
        nonce
    }

    fn reply(&mut self, status: u16, headers: &[(&str, String)], body: Vec<u8>) -> Response<Body> {
        let mut bld = Response::builder()
            .status(status)
            .header("Replay-Nonce", self.new_nonce());
        for (name, value) in headers {
            bld = bld.header(*name, value.as_str());
        }
        bld.body(Body::from(body)).unwrap()
    }

    fn json(&mut self, status: u16, headers: &[(&str, String)], body: &Value) -> Response<Body> {
        let mut headers = headers.to_vec();
        headers.push(("Content-Type", "application/json".into()));
        self.reply(status, &headers, body.to_string().into_bytes())
    }

    fn problem(&mut self, status: u16, _type: &str, detail: &str) -> Response<Body> {
        let problem = ApiProblem {
            _type: format!("urn:acme:error:{}", _type),
            detail: Some(detail.into()),
            status: None,
        };
        let body = serde_json::to_vec(&problem).unwrap();
        self.reply(
            status,
            &[("Content-Type", "application/problem+json".into())],
            body,
        )
    }

    fn link(&self, path: &str, rel: &str) -> (&'static str, String) {
        ("Link", format!("<{}{}>;rel=\"{}\"", self.url, path, rel))
    }

    /// Consume the nonce of a JWS request body.
    fn verify(&mut self, body: &[u8]) -> std::result::Result<Signed, Response<Body>> {
        let parsed = serde_json::from_slice::<Value>(body).ok().and_then(|jws| {
            let protected = decode(jws["protected"].as_str()?)?;
            let payload = decode(jws["payload"].as_str()?)?;
            jws["signature"].as_str()?;
            Some((protected, payload))
        });
        let (protected, payload) = match parsed {
            Some(x) => x,
            None => return Err(self.problem(400, "malformed", "Unable to read JWS")),
        };
        let nonce = protected["nonce"].as_str().unwrap_or("");
        if !self.nonces.remove(nonce) {
            return Err(self.problem(400, "badNonce", "JWS has invalid anti-replay nonce"));
        }
        Ok(Signed {
            jwk: protected["jwk"].clone(),
            payload,
        })
    }

    fn registration_body(&self, acc: &Account) -> Value {
        json!({
            "id": acc.id,
            "key": acc.key,
            "contact": acc.contact,
            "agreement": acc.agreement,
        })
    }

    fn registration_response(&mut self, status: u16, idx: usize) -> Response<Body> {
        let body = self.registration_body(&self.accounts[idx]);
        let headers = [
            ("Location", format!("{}/acme/reg/{}", self.url, self.accounts[idx].id)),
            self.link("/acme/new-authz", "next"),
            self.link("/terms", "terms-of-service"),
        ];
        self.json(status, &headers, &body)
    }

    fn new_reg(&mut self, signed: Signed) -> Response<Body> {
        let contact: Vec<String> = signed.payload["contact"]
            .as_array()
            .map(|a| a.iter().filter_map(|c| c.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default();
        if contact.iter().any(|c| c.contains("blocked")) {
            return self.problem(400, "invalidEmail", "Email domain is blocked");
        }
        if let Some(acc) = self.accounts.iter().find(|a| a.key == signed.jwk) {
            let location = format!("{}/acme/reg/{}", self.url, acc.id);
            return self.problem_with_location(location);
        }
        let id = self.accounts.len() as u64 + 1;
        self.accounts.push(Account {
            id,
            contact,
            agreement: None,
            key: signed.jwk,
        });
        self.registration_response(201, self.accounts.len() - 1)
    }

    fn problem_with_location(&mut self, location: String) -> Response<Body> {
        let body = json!({"type": "urn:acme:error:malformed", "detail": "Registration key is already in use"});
        self.reply(
            409,
            &[
                ("Location", location),
                ("Content-Type", "application/problem+json".into()),
            ],
            body.to_string().into_bytes(),
        )
    }

    fn update_reg(&mut self, id: &str, signed: Signed) -> Response<Body> {
        let idx = match self.accounts.iter().position(|a| a.id.to_string() == id) {
            Some(idx) if self.accounts[idx].key == signed.jwk => idx,
            _ => return self.problem(403, "unauthorized", "No such registration"),
        };
        if let Some(agreement) = signed.payload["agreement"].as_str() {
            self.accounts[idx].agreement = Some(agreement.to_string());
        }
        self.registration_response(202, idx)
    }

    fn new_authz(&mut self, signed: Signed) -> Response<Body> {
        let domain = match signed.payload["identifier"]["value"].as_str() {
            Some(d) => d.to_string(),
            None => return self.problem(400, "malformed", "No identifier"),
        };
        let valid = domain.starts_with("valid.");
        let status = if valid { "valid" } else { "pending" };
        let mut types = vec!["http-01", "dns-01"];
        if domain.starts_with("dnsonly.") {
            types.remove(0);
        } else if domain.starts_with("twice.") {
            types.insert(0, "http-01");
        }
        let challenges: Vec<ApiChallenge> = types
            .iter()
            .enumerate()
            .map(|(n, t)| ApiChallenge {
                _type: t.to_string(),
                status: status.into(),
                uri: format!("{}/acme/challenge/{}/{}", self.url, domain, n),
                token: base64url(&sha256(format!("{}{}", domain, t).as_bytes())),
                ..Default::default()
            })
            .collect();
        self.challenges.insert(domain.clone(), challenges.clone());
        let authz = ApiAuthz {
            identifier: ApiIdentifier::dns(&domain),
            status: Some(status.into()),
            expires: Some("2030-01-01T00:00:00Z".into()),
            challenges,
            combinations: Some(vec![vec![0], vec![1]]),
        };
        let headers = [
            ("Location", format!("{}/acme/authz/{}", self.url, domain)),
            self.link("/acme/new-cert", "next"),
        ];
        self.json(201, &headers, &serde_json::to_value(&authz).unwrap())
    }

    fn find_challenge(&self, rest: &str) -> Option<(String, usize)> {
        let (domain, n) = rest.rsplit_once('/')?;
        let n: usize = n.parse().ok()?;
        self.challenges.get(domain)?.get(n)?;
        Some((domain.to_string(), n))
    }

    fn post_challenge(&mut self, rest: &str, signed: Signed) -> Response<Body> {
        let (domain, n) = match self.find_challenge(rest) {
            Some(x) => x,
            None => return self.problem(404, "malformed", "No such challenge"),
        };
        let token = self.challenges[&domain][n].token.clone();
        let expected = thumbprint(&signed.jwk).map(|t| format!("{}.{}", token, t));
        let given = signed.payload["keyAuthorization"].as_str().map(|s| s.to_string());

        let chall = &mut self.challenges.get_mut(&domain).unwrap()[n];
        chall.key_authorization = given.clone();
        let reply = chall.clone();
        if given.is_none() || given != expected {
            chall.status = "invalid".into();
            chall.error = Some(ApiProblem {
                _type: "urn:acme:error:unauthorized".into(),
                detail: Some("Wrong key authorization".into()),
                status: Some(403),
            });
        } else if domain.starts_with("invalid") {
            chall.status = "invalid".into();
            chall.error = Some(ApiProblem {
                _type: "urn:acme:error:connection".into(),
                detail: Some(format!("Could not connect to {}", domain)),
                status: Some(400),
            });
        } else if !domain.starts_with("pending") {
            chall.status = "valid".into();
            chall.validated = Some("2020-01-01T00:00:00Z".into());
        }
        self.json(202, &[], &serde_json::to_value(&reply).unwrap())
    }

    fn get_challenge(&mut self, rest: &str) -> Response<Body> {
        let (domain, n) = match self.find_challenge(rest) {
            Some(x) => x,
            None => return self.problem(404, "malformed", "No such challenge"),
        };
        let polls = self.challenge_polls.entry(domain.clone()).or_insert(0);
        *polls += 1;
        if domain.starts_with("flaky") && *polls == 1 {
            return self.reply(500, &[], b"Internal Server Error".to_vec());
        }
        let chall = serde_json::to_value(&self.challenges[&domain][n]).unwrap();
        self.json(200, &[], &chall)
    }

    fn new_cert(&mut self, signed: Signed) -> Response<Body> {
        let csr = signed.payload["csr"]
            .as_str()
            .and_then(|c| URL_SAFE_NO_PAD.decode(c).ok())
            .and_then(|der| X509Req::from_der(&der).ok());
        let csr = match csr {
            Some(csr) => csr,
            None => return self.problem(400, "malformed", "Error parsing certificate request"),
        };
        let text = String::from_utf8_lossy(&csr.to_text().unwrap()).into_owned();
        let domains: Vec<String> = RE_DNS.captures_iter(&text).map(|c| c[1].to_string()).collect();
        self.last_csr_domains = domains.clone();
        let domain = domains.first().cloned().unwrap_or_default();

        if domain.starts_with("rejected.") {
            return self.problem(400, "rejectedIdentifier", "Policy forbids issuing for name");
        }

        let der = self_signed(&domain, 90).to_der().unwrap();
        let delivery = if domain.starts_with("deferred.") {
            Delivery::Deferred
        } else if domain.starts_with("slow.") {
            Delivery::Never
        } else if domain.starts_with("withdrawn.") {
            Delivery::Withdrawn
        } else {
            Delivery::Direct
        };
        let issuer_path = if domain.starts_with("noissuer.") {
            "/acme/issuer-cert/missing"
        } else {
            "/acme/issuer-cert"
        };
        let id = self.certs.len();
        let location = ("Location", format!("{}/acme/cert/{}", self.url, id));
        let up = self.link(issuer_path, "up");
        let body = match delivery {
            Delivery::Direct => der.clone(),
            _ => vec![],
        };
        self.certs.push(IssuedCert {
            der,
            delivery,
            polls: 0,
            issuer_path,
        });
        self.reply(201, &[location, up], body)
    }

    fn get_cert(&mut self, id: &str) -> Response<Body> {
        let cert = match id.parse::<usize>().ok().and_then(|id| self.certs.get_mut(id)) {
            Some(cert) => cert,
            None => return self.problem(404, "malformed", "No such certificate"),
        };
        cert.polls += 1;
        let ready = match cert.delivery {
            Delivery::Direct => true,
            Delivery::Deferred => cert.polls > 1,
            Delivery::Never => false,
            Delivery::Withdrawn => {
                return self.problem(403, "unauthorized", "Authorizations are no longer valid");
            }
        };
        if ready {
            let (der, issuer_path) = (cert.der.clone(), cert.issuer_path);
            let up = self.link(issuer_path, "up");
            self.reply(200, &[up], der)
        } else {
            self.reply(202, &[("Retry-After", "1".into())], vec![])
        }
    }

    fn revoke_cert(&mut self, signed: Signed) -> Response<Body> {
        let der = signed.payload["certificate"]
            .as_str()
            .and_then(|c| URL_SAFE_NO_PAD.decode(c).ok());
        let der = match der {
            Some(der) => der,
            None => return self.problem(400, "malformed", "No certificate"),
        };
        if !self.certs.iter().any(|c| c.der == der) {
            return self.problem(404, "malformed", "Unknown certificate");
        }
        if !self.revoked.insert(der) {
            return self.problem(409, "malformed", "Certificate already revoked");
        }
        self.reply(200, &[], vec![])
    }
}

fn decode(s: &str) -> Option<Value> {
    let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn thumbprint(jwk: &Value) -> Option<String> {
    let jwk: Jwk = serde_json::from_value(jwk.clone()).ok()?;
    let json = serde_json::to_string(&jwk).ok()?;
    Some(base64url(&sha256(json.as_bytes())))
}

fn get_directory(a: &mut Authority) -> Response<Body> {
    const BODY: &str = r#"{
    "new-authz": "<URL>/acme/new-authz",
    "new-cert": "<URL>/acme/new-cert",
    "new-reg": "<URL>/acme/new-reg",
    "revoke-cert": "<URL>/acme/revoke-cert"
    }"#;
    let body = RE_URL.replace_all(BODY, a.url.as_str()).to_string();
    a.reply(200, &[("Content-Type", "application/json".into())], body.into_bytes())
}

fn route_request(a: &mut Authority, method: &Method, path: &str, body: &[u8]) -> Response<Body> {
    a.requests.push(format!("{} {}", method, path));

    if method == Method::POST {
        let signed = match a.verify(body) {
            Ok(signed) => signed,
            Err(res) => return res,
        };
        return match path {
            "/acme/echo" => a.json(200, &[], &json!({})),
            "/acme/new-reg" => a.new_reg(signed),
            "/acme/new-authz" => a.new_authz(signed),
            "/acme/new-cert" => a.new_cert(signed),
            "/acme/revoke-cert" => a.revoke_cert(signed),
            _ => {
                if let Some(id) = path.strip_prefix("/acme/reg/") {
                    a.update_reg(id, signed)
                } else if let Some(rest) = path.strip_prefix("/acme/challenge/") {
                    a.post_challenge(rest, signed)
                } else {
                    a.problem(404, "malformed", "Not found")
                }
            }
        };
    }

    match (method, path) {
        (&Method::GET, "/directory") => get_directory(a),
        (&Method::HEAD, "/directory") => a.reply(200, &[], vec![]),
        (&Method::GET, "/broken-directory") => a.reply(200, &[], b"{\"new-authz\": ".to_vec()),
        (&Method::GET, "/acme/issuer-cert") => {
            let der = a.issuer_der.clone();
            a.reply(200, &[("Content-Type", "application/pkix-cert".into())], der)
        }
        (&Method::GET, p) if p.starts_with("/acme/challenge/") => {
            a.get_challenge(&p["/acme/challenge/".len()..])
        }
        (&Method::GET, p) if p.starts_with("/acme/cert/") => a.get_cert(&p["/acme/cert/".len()..]),
        (_, _) => a.reply(404, &[], vec![]),
    }
}

pub fn with_directory_server() -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
    tcp.set_nonblocking(true).unwrap();
    let port = tcp.local_addr().unwrap().port();

    let url = format!("http://127.0.0.1:{}", port);
    let dir_url = format!("{}/directory", url);

    let state = Arc::new(Mutex::new(Authority {
        url: url.clone(),
        issuer_der: self_signed("Stub Issuer", 365).to_der().unwrap(),
        next_nonce: 0,
        nonces: HashSet::new(),
        requests: vec![],
        accounts: vec![],
        challenges: HashMap::new(),
        challenge_polls: HashMap::new(),
        certs: vec![],
        revoked: HashSet::new(),
        last_csr_domains: vec![],
    }));

    let (tx, rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();

    let server_state = state.clone();
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let make_service = make_service_fn(move |_| {
                let state = server_state.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req: hyper::Request<Body>| {
                        let state = state.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = hyper::body::to_bytes(body).await.unwrap_or_default();
                            let mut a = state.lock().unwrap();
                            Ok::<_, Infallible>(route_request(&mut a, &parts.method, parts.uri.path(), &body))
                        }
                    }))
                }
            });
            let server = Server::from_tcp(tcp).unwrap().serve(make_service);
            ready_tx.send(()).ok();
            let graceful = server.with_graceful_shutdown(async {
                rx.await.ok();
            });
            if let Err(e) = graceful.await {
                eprintln!("server error: {}", e);
            }
        });
    });
    ready_rx.recv().unwrap();

    TestServer {
        url,
        dir_url,
        state,
        shutdown: Some(tx),
    }
}

/// A transport and directory against `server`, signing with a new P-256 key.
pub fn test_transport(server: &TestServer) -> Result<(Transport, Directory)> {
    let agent = ureq::AgentBuilder::new().build();
    let mut dir = Directory::fetch(&agent, &server.dir_url)?;
    let initial = dir.take_initial_nonce();
    let nonce = NonceSource::new(agent.clone(), dir.url(), initial);
    let key = Arc::new(AccountKey::generate_p256()?);
    Ok((Transport::new(agent, nonce, key), dir))
}

/// The nonce a JWS request body was signed with.
pub fn jws_nonce(body: &str) -> String {
    let jws: Value = serde_json::from_str(body).unwrap();
    let protected = decode(jws["protected"].as_str().unwrap()).unwrap();
    protected["nonce"].as_str().unwrap().to_string()
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    let tcp = TcpListener::bind("0.0.0.0:0").unwrap();
    tcp.local_addr().unwrap().port()
}

pub struct MockUser {
    email: String,
    key: Arc<AccountKey>,
    reg: Option<RegistrationResource>,
}

impl MockUser {
    pub fn new(email: &str) -> Self {
        MockUser {
            email: email.into(),
            key: Arc::new(AccountKey::generate_p256().unwrap()),
            reg: None,
        }
    }
}

impl User for MockUser {
    fn email(&self) -> &str {
        &self.email
    }
    fn private_key(&self) -> Arc<AccountKey> {
        self.key.clone()
    }
    fn registration(&self) -> Option<&RegistrationResource> {
        self.reg.as_ref()
    }
    fn set_registration(&mut self, reg: RegistrationResource) {
        self.reg = Some(reg);
    }
}

#[test]
pub fn test_make_directory() {
    let _ = env_logger::try_init();
    let server = with_directory_server();
    let res = ureq::get(&server.dir_url).call().unwrap();
    assert!(res.header("replay-nonce").is_some());
    let dir: Value = serde_json::from_str(&res.into_string().unwrap()).unwrap();
    assert_eq!(format!("{}/acme/new-reg", server.url), dir["new-reg"]);
}
