use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::sha::{sha256, sha384};
use openssl::sign::Signer;

use crate::cert::{create_p256_key, create_p384_key, create_rsa_key, EC_GROUP_P256, EC_GROUP_P384};
use crate::jwt::Jwk;
use crate::util::base64url;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlg {
    Rs256,
    Es256,
    Es384,
}

/// The account's private key.
///
/// RSA keys sign with `RS256`, P-256 keys with `ES256` and P-384 keys with
/// `ES384`. Other key types are refused when the key is created.
pub struct AccountKey {
    private_key: PKey<Private>,
    alg: KeyAlg,
}

impl AccountKey {
    /// Wrap an existing openssl key.
    pub fn from_pkey(private_key: PKey<Private>) -> Result<Self> {
        let alg = match private_key.id() {
            Id::RSA => KeyAlg::Rs256,
            Id::EC => {
                let curve = private_key.ec_key()?.group().curve_name();
                match curve {
                    Some(Nid::X9_62_PRIME256V1) => KeyAlg::Es256,
                    Some(Nid::SECP384R1) => KeyAlg::Es384,
                    _ => return Err(format!("Unsupported account key curve: {:?}", curve).into()),
                }
            }
            id => return Err(format!("Unsupported account key type: {}", id.as_raw()).into()),
        };
        Ok(AccountKey { private_key, alg })
    }

    /// Read a PEM encoded private key.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pem(pem)
            .map_err(|e| format!("Error reading private key PEM: {}", e))?;
        Self::from_pkey(pkey)
    }

    /// A new RSA account key.
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        Self::from_pkey(create_rsa_key(bits)?)
    }

    /// A new P-256 account key.
    pub fn generate_p256() -> Result<Self> {
        Self::from_pkey(create_p256_key()?)
    }

    /// A new P-384 account key.
    pub fn generate_p384() -> Result<Self> {
        Self::from_pkey(create_p384_key()?)
    }

    /// The key as PKCS#8 PEM, for the caller to persist.
    pub fn to_pem(&self) -> Result<String> {
        let pem = self.private_key.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    /// JWS `alg` for this key.
    pub(crate) fn alg(&self) -> &'static str {
        match self.alg {
            KeyAlg::Rs256 => "RS256",
            KeyAlg::Es256 => "ES256",
            KeyAlg::Es384 => "ES384",
        }
    }

    /// Public part of the key.
    pub(crate) fn jwk(&self) -> Result<Jwk> {
        match self.alg {
            KeyAlg::Rs256 => {
                let rsa = self.private_key.rsa()?;
                Ok(Jwk::Rsa {
                    e: base64url(&rsa.e().to_vec()),
                    kty: "RSA".into(),
                    n: base64url(&rsa.n().to_vec()),
                })
            }
            KeyAlg::Es256 => self.ec_jwk(&*EC_GROUP_P256, "P-256", 32),
            KeyAlg::Es384 => self.ec_jwk(&*EC_GROUP_P384, "P-384", 48),
        }
    }

    fn ec_jwk(&self, group: &openssl::ec::EcGroup, crv: &str, size: i32) -> Result<Jwk> {
        let ec = self.private_key.ec_key()?;
        let mut ctx = openssl::bn::BigNumContext::new()?;
        let mut x = openssl::bn::BigNum::new()?;
        let mut y = openssl::bn::BigNum::new()?;
        ec.public_key()
            .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;
        Ok(Jwk::Ec {
            crv: crv.into(),
            kty: "EC".into(),
            x: base64url(&x.to_vec_padded(size)?),
            y: base64url(&y.to_vec_padded(size)?),
        })
    }

    /// Sign for a JWS. ECDSA signatures are the fixed size `r || s`
    /// concatenation, not DER.
    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let sig = match self.alg {
            KeyAlg::Rs256 => {
                let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)?;
                signer.update(data)?;
                signer.sign_to_vec()?
            }
            KeyAlg::Es256 => self.ecdsa(&sha256(data), 32)?,
            KeyAlg::Es384 => self.ecdsa(&sha384(data), 48)?,
        };
        Ok(sig)
    }

    fn ecdsa(&self, digest: &[u8], size: i32) -> Result<Vec<u8>> {
        let ec = self.private_key.ec_key()?;
        let sig = EcdsaSig::sign(digest, &ec)?;
        let mut v = sig.r().to_vec_padded(size)?;
        v.extend_from_slice(&sig.s().to_vec_padded(size)?);
        Ok(v)
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountKey({})", self.alg())
    }
}
