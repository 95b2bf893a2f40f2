//! Legacy domain and operation names, normalized before registry lookup.
//!
//! Legacy names exist only here: nothing past the resolver ever sees one.
//! `reopen` is deliberately absent from every table; it is its own
//! operation and is never rewritten to `restore`.

/// Legacy domain -> canonical domain.
const DOMAIN_ALIASES: &[(&str, &str)] = &[
    ("research", "memory"),
    ("system", "admin"),
    ("lifecycle", "pipeline"),
    ("validate", "check"),
    ("release", "pipeline"),
    ("skills", "tools"),
    ("issues", "tools"),
    ("providers", "tools"),
];

/// Resolve `(domain, operation)` to canonical names. Unknown domains pass
/// through untouched for the registry to reject with alternatives.
pub fn resolve(domain: &str, operation: &str) -> (String, String) {
    let canonical = DOMAIN_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == domain)
        .map(|(_, canonical)| *canonical);

    match (domain, canonical) {
        // Old flat domains whose operations moved under a prefix.
        ("lifecycle", Some(canonical)) => (canonical.into(), prefix("stage", operation)),
        ("release", Some(canonical)) => (canonical.into(), prefix("release", operation)),
        ("skills", Some(canonical)) => (canonical.into(), prefix("skill", operation)),
        ("issues", Some(canonical)) => (canonical.into(), prefix("issue", operation)),
        ("providers", Some(canonical)) => (canonical.into(), prefix("provider", operation)),
        // Plain renames keep the operation as-is.
        (_, Some(canonical)) => (canonical.into(), operation.into()),
        (_, None) => (domain.into(), operation.into()),
    }
}

fn prefix(group: &str, operation: &str) -> String {
    if operation.starts_with(&format!("{group}.")) {
        operation.to_string()
    } else {
        format!("{group}.{operation}")
    }
}
