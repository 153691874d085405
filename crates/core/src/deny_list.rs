//! The construction-time deny-list of spec.md #3.

use std::collections::HashSet;

/// Names that cause the parser to emit a `Warning` event and skip the
/// statement rather than attempt to lower it (e.g. `ScanChain`,
/// `Shift`). Built once at engine construction; not mutable at
/// runtime (spec.md #3: "a construction-time contract, not
/// runtime-mutable").
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    names: HashSet<String>,
}

impl DenyList {
    pub fn new() -> Self {
        DenyList {
            names: HashSet::new(),
        }
    }

    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DenyList {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_deny_list_denies_nothing() {
        let deny = DenyList::new();
        assert!(!deny.contains("ScanChain"));
    }

    #[test]
    fn configured_names_are_denied() {
        let deny = DenyList::with_names(["ScanChain", "Shift"]);
        assert!(deny.contains("ScanChain"));
        assert!(deny.contains("Shift"));
        assert!(!deny.contains("Call"));
    }
}
