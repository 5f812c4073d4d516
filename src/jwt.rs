use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::acc::AccountKey;
use crate::util::base64url;
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct JwsProtected {
    alg: String,
    jwk: Jwk,
    nonce: String,
    url: String,
}

/// Public key as a JWK, holding only the members required for the
/// thumbprint so that serializing it directly is the thumbprint input.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) enum Jwk {
    Ec {
        crv: String,
        kty: String,
        x: String,
        y: String,
    },
    Rsa {
        e: String,
        kty: String,
        n: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

/// Sign `payload` into a flattened JWS. The nonce is consumed by this call.
pub(crate) fn make_jws<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AccountKey,
    payload: &T,
) -> Result<String> {
    let protected = JwsProtected {
        alg: key.alg().into(),
        jwk: key.jwk().map_err(signing)?,
        nonce,
        url: url.into(),
    };
    let protected = {
        let pro_json = serde_json::to_string(&protected)?;
        base64url(pro_json.as_bytes())
    };
    let payload = {
        let pay_json = serde_json::to_string(payload)?;
        base64url(pay_json.as_bytes())
    };

    let to_sign = format!("{}.{}", protected, payload);
    let signature = base64url(&key.sign(to_sign.as_bytes()).map_err(signing)?);

    let jws = Jws {
        protected,
        payload,
        signature,
    };

    Ok(serde_json::to_string(&jws)?)
}

fn signing(e: Error) -> Error {
    Error::Signing(e.to_string())
}

/// base64url SHA-256 over the JWK thumbprint JSON.
pub(crate) fn thumbprint(key: &AccountKey) -> Result<String> {
    let jwk_json = serde_json::to_string(&key.jwk()?)?;
    Ok(base64url(&sha256(jwk_json.as_bytes())))
}

/// The value published for a challenge: `<token>.<thumbprint>`.
pub(crate) fn key_authorization(token: &str, key: &AccountKey) -> Result<String> {
    Ok(format!("{}.{}", token, thumbprint(key)?))
}
