use crate::util::canonicalize_whitespace;
use blake3::Hasher;

/// Fingerprint fields for a stable symbol ID.
///
/// The ID is a pure function of (language, package, kind, receiver, name,
/// canonicalized signature-or-body): the same symbol yields the same ID
/// across runs, and a signature change yields a new ID. Line numbers never
/// participate, so moving code does not re-identify it.
#[derive(Debug, Clone, Default)]
pub struct SymbolFingerprint<'a> {
    pub language: &'a str,
    pub package: &'a str,
    pub kind: &'a str,
    pub receiver: &'a str,
    pub name: &'a str,
    pub signature: &'a str,
    pub body: &'a str,
}

/// Build the stable symbol ID `<lang>/<pkg>:<kind>:<name>:<shortHash>` where
/// `shortHash` is the first 16 hex chars of a blake3 digest over the
/// pipe-joined fingerprint.
pub fn build_stable_id(fp: &SymbolFingerprint<'_>) -> String {
    let language = non_empty(fp.language.trim(), "unknown");
    let package = non_empty(fp.package.trim(), "_");
    let kind = non_empty(fp.kind.trim(), "symbol");
    let name = non_empty(fp.name.trim(), "_");

    let receiver = canonicalize_whitespace(fp.receiver);
    let mut signature = canonicalize_whitespace(fp.signature);
    if signature.is_empty() {
        signature = canonicalize_whitespace(fp.body);
    }

    let fingerprint = [
        language, package, kind, &receiver, name, &signature,
    ]
    .join("|");

    let mut hasher = Hasher::new();
    hasher.update(fingerprint.as_bytes());
    let digest = hasher.finalize();
    let short = &digest.to_hex()[..16];

    format!("{language}/{package}:{kind}:{name}:{short}")
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp<'a>(name: &'a str, signature: &'a str) -> SymbolFingerprint<'a> {
        SymbolFingerprint {
            language: "go",
            package: "store",
            kind: "function",
            receiver: "",
            name,
            signature,
            body: "",
        }
    }

    #[test]
    fn identical_fingerprints_yield_identical_ids() {
        let a = build_stable_id(&fp("Open", "func Open(path string) (*Store, error)"));
        let b = build_stable_id(&fp("Open", "func Open(path string) (*Store, error)"));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_change_yields_a_new_id() {
        let a = build_stable_id(&fp("Open", "func Open(path string) (*Store, error)"));
        let b = build_stable_id(&fp("Open", "func Open(path string, ro bool) (*Store, error)"));
        assert_ne!(a, b);
        // Prefix up to the short hash is shared.
        assert_eq!(a.rsplit_once(':').unwrap().0, b.rsplit_once(':').unwrap().0);
    }

    #[test]
    fn whitespace_is_canonicalized_before_hashing() {
        let a = build_stable_id(&fp("Open", "func Open(path string)  (*Store,  error)"));
        let b = build_stable_id(&fp("Open", "func Open(path string)\n\t(*Store, error)"));
        assert_eq!(a, b);
    }

    #[test]
    fn body_is_the_fallback_when_signature_is_empty() {
        let with_body = SymbolFingerprint {
            body: "const MaxHops = 2",
            ..fp("MaxHops", "")
        };
        let other_body = SymbolFingerprint {
            body: "const MaxHops = 3",
            ..fp("MaxHops", "")
        };
        assert_ne!(build_stable_id(&with_body), build_stable_id(&other_body));
    }

    #[test]
    fn id_format_has_sixteen_hex_chars() {
        let id = build_stable_id(&fp("Open", "func Open()"));
        assert!(id.starts_with("go/store:function:Open:"));
        let short = id.rsplit(':').next().unwrap();
        assert_eq!(short.len(), 16);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_fields_fall_back_to_placeholders() {
        let id = build_stable_id(&SymbolFingerprint::default());
        assert!(id.starts_with("unknown/_:symbol:_:"));
    }
}
