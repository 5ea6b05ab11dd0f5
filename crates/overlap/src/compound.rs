//! Guards against treating a hyphenated compound as overlapping with its
//! own last segment (`self-centered` must not be "matched" by `centered`).

/// True if `a`/`b` are a hyphenated compound and the plain word that is
/// merely its last segment, where the compound's prefix is substantive
/// enough (at least 3 characters before the hyphen) that losing it would
/// be a real loss of meaning rather than a trivial truncation.
pub fn is_compound_mismatch(a: &str, b: &str) -> bool {
    one_sided_mismatch(a, b) || one_sided_mismatch(b, a)
}

fn one_sided_mismatch(compound: &str, plain: &str) -> bool {
    let Some(hyphen_at) = compound.rfind('-') else {
        return false;
    };
    let last_segment = &compound[hyphen_at + 1..];
    if !last_segment.eq_ignore_ascii_case(plain) {
        return false;
    }
    let prefix = &compound[..hyphen_at];
    prefix.len() >= 3
}
