use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::oneshot;

use crate::api::{ApiChallenge, ApiChallengeResponse};
use crate::jwt::key_authorization;
use crate::poll::{poll_until, Cancel, Poll, PollPolicy};
use crate::trans::Transport;
use crate::{Error, Result};

use super::HTTP_01;

/// Port the ACME API connects to for `http-01`.
pub const DEFAULT_PORT: u16 = 80;

/// Where the proof for `token` is served.
pub fn challenge_path(token: &str) -> String {
    format!("/.well-known/acme-challenge/{}", token)
}

/// Proves domain control by serving the key authorization over plain HTTP.
///
/// A responder is started for the duration of each solve and torn down on
/// every exit path. With a fixed port, solves take turns on the port; with
/// port `0` each solve listens on its own ephemeral port (only useful when
/// something in front forwards to it).
#[derive(Debug)]
pub struct Http01Solver {
    transport: Arc<Transport>,
    port: u16,
    poll: PollPolicy,
    port_lock: Mutex<()>,
}

impl Http01Solver {
    pub(crate) fn new(transport: Arc<Transport>, opt_port: Option<u16>, poll: PollPolicy) -> Self {
        Http01Solver {
            transport,
            port: opt_port.unwrap_or(DEFAULT_PORT),
            poll,
            port_lock: Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// The port the responder listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn solve(&self, domain: &str, chall: &ApiChallenge, cancel: &Cancel) -> Result<ApiChallenge> {
        let key_auth = key_authorization(&chall.token, self.transport.acme_key())?;

        // held until the responder is dropped
        let _port_guard = if self.port != 0 {
            Some(self.port_lock.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        cancel.check()?;

        let responder = Http01Responder::start(self.port, &chall.token, &key_auth)?;
        debug!(
            "[{}] Serving {} on port {}",
            domain,
            challenge_path(&chall.token),
            responder.port()
        );

        let res = ApiChallengeResponse {
            resource: "challenge".into(),
            _type: HTTP_01.into(),
            key_authorization: key_auth.clone(),
        };
        let accepted: ApiChallenge = self.transport.call(&chall.uri, &res)?.json()?;
        if accepted.is_status_invalid() {
            return Err(challenge_failed(domain, &accepted));
        }

        let what = format!("challenge for {}", domain);
        let mut solved = poll_until(&self.poll, cancel, &what, || {
            let current: ApiChallenge = self.transport.get(&chall.uri)?.handle_errors()?.json()?;
            if current.is_status_valid() {
                Ok(Poll::Ready(current))
            } else if current.is_status_invalid() {
                Err(challenge_failed(domain, &current))
            } else {
                Ok(Poll::Pending)
            }
        })?;

        debug!("[{}] Challenge valid", domain);
        solved.key_authorization.get_or_insert(key_auth);
        Ok(solved)
    }
}

fn challenge_failed(domain: &str, chall: &ApiChallenge) -> Error {
    Error::Challenge {
        domain: domain.into(),
        reason: chall.failure_reason(),
    }
}

/// A running well-known responder. Dropping it stops the server and
/// releases the port.
pub(crate) struct Http01Responder {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Http01Responder {
    pub fn start(port: u16, token: &str, key_auth: &str) -> Result<Self> {
        let tcp = TcpListener::bind(("0.0.0.0", port))?;
        tcp.set_nonblocking(true)?;
        let port = tcp.local_addr()?.port();

        let path = challenge_path(token);
        let proof = key_auth.to_string();

        let (tx, rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name(format!("http-01:{}", port))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        ready_tx.send(Err(e.into())).ok();
                        return;
                    }
                };
                rt.block_on(async move {
                    let make_service = make_service_fn(move |_| {
                        let path = path.clone();
                        let proof = proof.clone();
                        async move {
                            Ok::<_, Infallible>(service_fn(move |req| {
                                let res = respond(&req, &path, &proof);
                                async move { Ok::<_, Infallible>(res) }
                            }))
                        }
                    });
                    let server = match Server::from_tcp(tcp) {
                        Ok(builder) => builder.serve(make_service),
                        Err(e) => {
                            ready_tx.send(Err(Error::Other(e.to_string()))).ok();
                            return;
                        }
                    };
                    ready_tx.send(Ok(())).ok();
                    let graceful = server.with_graceful_shutdown(async {
                        rx.await.ok();
                    });
                    if let Err(e) = graceful.await {
                        debug!("http-01 responder error: {}", e);
                    }
                });
            })?;

        let mut responder = Http01Responder {
            port,
            shutdown: Some(tx),
            handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(responder),
            Ok(Err(e)) => {
                responder.stop();
                Err(e)
            }
            Err(_) => {
                responder.stop();
                Err("http-01 responder failed to start".into())
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
        trace!("http-01 responder on port {} stopped", self.port);
    }
}

impl Drop for Http01Responder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn respond(req: &Request<Body>, path: &str, proof: &str) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    if req.method() == Method::GET && req.uri().path() == path {
        trace!("Serve proof {}", path);
        res.headers_mut()
            .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain"));
        *res.body_mut() = Body::from(proof.to_string());
    } else {
        *res.status_mut() = StatusCode::NOT_FOUND;
    }
    res
}
