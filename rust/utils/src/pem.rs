//! Minimal handling of PEM certificate chains, as returned by the CA service.

const HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";
const FOOTER: &[u8] = b"-----END CERTIFICATE-----";

/// Splits a PEM certificate chain into its individual certificate blocks.
///
/// Anything between blocks (such as `subject=` annotations or blank lines) is skipped, and an
/// unterminated trailing block is dropped.
pub fn split_pem_certificates(pem: &[u8]) -> Vec<&[u8]> {
    let mut certs = Vec::new();
    let mut rest = pem;
    while let Some(start) = find(rest, HEADER) {
        let block = &rest[start..];
        let Some(end) = find(&block[HEADER.len()..], FOOTER) else {
            break;
        };
        let end = HEADER.len() + end + FOOTER.len();
        certs.push(&block[..end]);
        rest = &block[end..];
    }
    certs
}

/// Returns the last certificate of a chain, if the chain contains more than just the leaf.
///
/// Chains are ordered leaf first, so the last block is the certificate closest to the root.
pub fn chain_root(pem: &[u8]) -> Option<&[u8]> {
    let certs = split_pem_certificates(pem);
    match certs.as_slice() {
        [_, .., root] => Some(*root),
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
