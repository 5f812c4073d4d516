//! Low level API JSON objects.
//!
//! Unstable and not to be used directly. Provided to aid debugging.
//!
//! The objects follow the ACME draft where every request payload names
//! the `resource` it acts on (`new-reg`, `new-authz`, `challenge`, ...).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiProblem {
    #[serde(rename = "type")]
    pub _type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ApiProblem {
    pub fn is_bad_nonce(&self) -> bool {
        self._type == "badNonce" || self._type.ends_with(":badNonce")
    }
}

impl ::std::fmt::Display for ApiProblem {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        if let Some(detail) = &self.detail {
            write!(f, "{}: {}", self._type, detail)
        } else {
            write!(f, "{}", self._type)
        }
    }
}

// {
//   "new-authz": "https://acme-staging.api.letsencrypt.org/acme/new-authz",
//   "new-cert": "https://acme-staging.api.letsencrypt.org/acme/new-cert",
//   "new-reg": "https://acme-staging.api.letsencrypt.org/acme/new-reg",
//   "revoke-cert": "https://acme-staging.api.letsencrypt.org/acme/revoke-cert"
// }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiDirectory {
    #[serde(rename = "new-authz")]
    pub new_authz: String,
    #[serde(rename = "new-reg")]
    pub new_reg: String,
    #[serde(rename = "new-cert")]
    pub new_cert: String,
    #[serde(rename = "revoke-cert")]
    pub revoke_cert: String,
}

// request:
//    { "resource": "new-reg", "contact": ["mailto:cert-admin@example.com"] }
//
// response:
//    {
//      "id": 7728515,
//      "key": { "kty": "RSA", "n": "...", "e": "AQAB" },
//      "contact": ["mailto:cert-admin@example.com"],
//      "agreement": "https://letsencrypt.org/documents/LE-SA-v1.1.1-August-1-2016.pdf",
//      "createdAt": "2016-01-01T00:00:00Z"
//    }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiRegistration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiIdentifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl ApiIdentifier {
    pub fn dns(value: &str) -> Self {
        ApiIdentifier {
            _type: "dns".into(),
            value: value.into(),
        }
    }
    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiNewAuthz {
    pub resource: String,
    pub identifier: ApiIdentifier,
}

// {
//   "identifier": { "type": "dns", "value": "example.org" },
//   "status": "pending",
//   "expires": "2016-01-09T08:26:43Z",
//   "challenges": [
//     {
//       "type": "http-01",
//       "status": "pending",
//       "uri": "https://example.com/acme/challenge/YTqpYUthlVfwBncUufE8/216789597",
//       "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
//     },
//     {
//       "type": "dns-01",
//       "status": "pending",
//       "uri": "https://example.com/acme/challenge/YTqpYUthlVfwBncUufE8/216789599",
//       "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
//     }
//   ],
//   "combinations": [[0], [1]]
// }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiAuthz {
    pub identifier: ApiIdentifier,
    pub status: Option<String>,
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<ApiChallenge>,
    pub combinations: Option<Vec<Vec<usize>>>,
}

impl ApiAuthz {
    pub fn is_status_pending(&self) -> bool {
        self.status.as_deref() == Some("pending")
    }
    pub fn is_status_valid(&self) -> bool {
        self.status.as_deref() == Some("valid")
    }
    pub fn is_status_invalid(&self) -> bool {
        self.status.as_deref() == Some("invalid")
    }
    pub fn is_status_expired(&self) -> bool {
        self.status.as_deref() == Some("expired")
    }
    pub fn is_status_revoked(&self) -> bool {
        self.status.as_deref() == Some("revoked")
    }
    /// First offered challenge of the given type.
    pub fn challenge(&self, _type: &str) -> Option<&ApiChallenge> {
        self.challenges.iter().find(|c| c._type == _type)
    }
    /// All offered challenges of the given type.
    pub fn challenges_of(&self, _type: &str) -> Vec<&ApiChallenge> {
        self.challenges.iter().filter(|c| c._type == _type).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiChallenge {
    #[serde(rename = "type")]
    pub _type: String,
    #[serde(default)]
    pub status: String,
    pub uri: String,
    pub token: String,
    #[serde(
        rename = "keyAuthorization",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_authorization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiProblem>,
}

impl ApiChallenge {
    pub fn is_status_pending(&self) -> bool {
        self.status == "pending"
    }
    pub fn is_status_processing(&self) -> bool {
        self.status == "processing"
    }
    pub fn is_status_valid(&self) -> bool {
        self.status == "valid"
    }
    pub fn is_status_invalid(&self) -> bool {
        self.status == "invalid"
    }
    /// The authority's reason for an invalid challenge.
    pub fn failure_reason(&self) -> String {
        match &self.error {
            Some(e) => format!("{}: {}", self.status, e),
            None => format!("{}: no error reported", self.status),
        }
    }
}

// { "resource": "challenge", "type": "http-01", "keyAuthorization": "<token>.<thumbprint>" }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiChallengeResponse {
    pub resource: String,
    #[serde(rename = "type")]
    pub _type: String,
    #[serde(rename = "keyAuthorization")]
    pub key_authorization: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiNewCert {
    pub resource: String,
    pub csr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRevocation {
    pub resource: String,
    pub certificate: String,
}
