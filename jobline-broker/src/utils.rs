use std::borrow::Cow;

/// Redacts the userinfo part of a broker URL so it can be logged.
///
/// Only allocates when there is something to redact.
pub fn sanitize_url(raw: &str) -> Cow<'_, str> {
    let Some(scheme_end) = raw.find("://") else {
        return Cow::Borrowed("<redacted>");
    };
    let rest = &raw[scheme_end + 3..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    match authority.rfind('@') {
        Some(at) => {
            let scheme = &raw[..scheme_end + 3];
            let tail = &rest[at + 1..];
            let mut out = String::with_capacity(scheme.len() + 5 + tail.len());
            out.push_str(scheme);
            out.push_str("****@");
            out.push_str(tail);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(raw),
    }
}
