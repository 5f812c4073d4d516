//! Challenge solvers.
//!
//! A [`Solver`] proves control of a domain for one challenge type. The
//! [`Client`] builds one solver per supported type when it is created, and
//! they all sign through the client's single transport.
//!
//! [`Client`]: ../struct.Client.html
use std::sync::Arc;

use crate::api::ApiChallenge;
use crate::poll::Cancel;
use crate::trans::Transport;
use crate::Result;

mod http01;

pub use self::http01::{challenge_path, Http01Solver, DEFAULT_PORT};

/// Challenge type served over plain HTTP.
pub const HTTP_01: &str = "http-01";

/// A challenge solver, one variant per supported challenge type.
#[derive(Debug)]
pub enum Solver {
    Http01(Http01Solver),
}

impl Solver {
    /// The challenge type tag this solver handles.
    pub fn challenge_type(&self) -> &'static str {
        match self {
            Solver::Http01(_) => HTTP_01,
        }
    }

    /// The transport the solver signs with.
    pub fn transport(&self) -> &Arc<Transport> {
        match self {
            Solver::Http01(s) => s.transport(),
        }
    }

    /// Answer `chall` and wait for the ACME API to validate it.
    pub(crate) fn solve(&self, domain: &str, chall: &ApiChallenge, cancel: &Cancel) -> Result<ApiChallenge> {
        match self {
            Solver::Http01(s) => s.solve(domain, chall, cancel),
        }
    }
}
