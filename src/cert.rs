use lazy_static::lazy_static;
use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{self, PKey};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder, X509};

use crate::Result;

lazy_static! {
    pub(crate) static ref EC_GROUP_P256: EcGroup = ec_group(Nid::X9_62_PRIME256V1);
    pub(crate) static ref EC_GROUP_P384: EcGroup = ec_group(Nid::SECP384R1);
}

fn ec_group(nid: Nid) -> EcGroup {
    // the named curves are compiled into openssl
    let mut g = EcGroup::from_curve_name(nid).expect("EcGroup");
    // this is required for openssl 1.0.x (but not 1.1.x)
    g.set_asn1_flag(Asn1Flag::NAMED_CURVE);
    g
}

/// Make an RSA private key (from which we can derive a public key).
///
/// This library does not check the number of bits used to create the key pair.
/// For Let's Encrypt, the bits must be between 2048 and 4096.
pub fn create_rsa_key(bits: u32) -> Result<PKey<pkey::Private>> {
    let pri_key_rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(pri_key_rsa)?)
}

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> Result<PKey<pkey::Private>> {
    let pri_key_ec = EcKey::generate(&*EC_GROUP_P256)?;
    Ok(PKey::from_ec_key(pri_key_ec)?)
}

/// Make a P-384 private key pair (from which we can derive a public key).
pub fn create_p384_key() -> Result<PKey<pkey::Private>> {
    let pri_key_ec = EcKey::generate(&*EC_GROUP_P384)?;
    Ok(PKey::from_ec_key(pri_key_ec)?)
}

/// Make a certificate signing request for `domains`.
///
/// The first domain is the common name. All domains, the first included,
/// become subject alternative names in the given order.
pub fn create_csr<S: AsRef<str>>(pkey: &PKey<pkey::Private>, domains: &[S]) -> Result<X509Req> {
    let primary = match domains.first() {
        Some(d) => d.as_ref(),
        None => return Err("CSR needs at least one domain".into()),
    };

    //
    // the csr builder
    let mut req_bld = X509ReqBuilder::new()?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, primary)?;
    req_bld.set_subject_name(&name.build())?;

    // set private/public key in builder
    req_bld.set_pubkey(pkey)?;

    // set all domains as alt names
    let mut stack = Stack::new()?;
    let ctx = req_bld.x509v3_context(None);
    let mut an = SubjectAlternativeName::new();
    for d in domains {
        an.dns(d.as_ref());
    }
    let ext = an.build(&ctx)?;
    stack.push(ext)?;
    req_bld.add_extensions(&stack)?;

    // sign it
    req_bld.sign(pkey, MessageDigest::sha256())?;

    // the csr
    Ok(req_bld.build())
}

pub(crate) fn der_to_pem(der: &[u8]) -> Result<String> {
    let x509 = X509::from_der(der)?;
    Ok(String::from_utf8_lossy(&x509.to_pem()?).into_owned())
}

/// DER of the first certificate in a PEM (the leaf of a bundle).
pub(crate) fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let x509 = X509::from_pem(pem.as_bytes())?;
    Ok(x509.to_der()?)
}

/// Whole days until the first certificate of the PEM expires.
///
/// Negative for an expired certificate.
pub(crate) fn valid_days_left(pem: &str) -> Result<i64> {
    // load as x509
    let x509 = X509::from_pem(pem.as_bytes())?;

    // convert asn1 time to Tm
    let not_after = format!("{}", x509.not_after());
    // Display trait produces this format, which is kinda dumb.
    // Apr 19 08:48:46 2019 GMT
    let expires = parse_date(&not_after)?;
    let dur = expires - time::now_utc();

    Ok(dur.num_days())
}

fn parse_date(s: &str) -> Result<time::Tm> {
    debug!("Parse date/time: {}", s);
    time::strptime(s, "%h %e %H:%M:%S %Y %Z").map_err(|e| format!("Bad date {:?}: {}", s, e).into())
}
