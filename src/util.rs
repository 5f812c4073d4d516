use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Find the target of a `Link` with the given relation. Each header value
/// may hold several comma separated links:
///
/// ```text
/// Link: <https://ca/acme/new-authz>;rel="next", <https://ca/tos.pdf>;rel="terms-of-service"
/// ```
pub(crate) fn find_link<'a, I>(values: I, rel: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .flat_map(|v| v.split(','))
        .find_map(|link| {
            let link = link.trim();
            let start = link.find('<')?;
            let end = link.find('>')?;
            if end < start {
                return None;
            }
            let target = &link[start + 1..end];
            let matches = link[end + 1..].split(';').any(|param| {
                let mut kv = param.trim().splitn(2, '=');
                let key = kv.next().unwrap_or("").trim();
                let value = kv.next().unwrap_or("").trim().trim_matches('"');
                key.eq_ignore_ascii_case("rel") && value == rel
            });
            if matches {
                Some(target.to_string())
            } else {
                None
            }
        })
}
