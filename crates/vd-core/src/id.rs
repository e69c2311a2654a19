use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

/// Global string interner for graph identifiers; O(1) comparisons.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

macro_rules! interned_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Spur);

        impl $name {
            /// Intern a string, or return the existing handle if already interned.
            pub fn intern(s: &str) -> Self {
                $name(INTERNER.get_or_intern(s))
            }

            /// Resolve back to a string slice.
            pub fn as_str(&self) -> &str {
                INTERNER.resolve(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}", self.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        /// Ordered by text, not by interning order, so sorted output is stable
        /// across processes.
        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.as_str().cmp(other.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name::intern(&s))
            }
        }
    };
}

interned_id!(
    /// Identifier of a node in the graph. Internally a `Spur` index:
    /// 4 bytes, Copy, Eq, Hash in O(1).
    NodeId
);

interned_id!(
    /// Identifier of an edge. Either caller-supplied or `source->target`.
    EdgeId
);

impl EdgeId {
    /// The deterministic id for an edge created without an explicit id.
    pub fn between(source: NodeId, target: NodeId) -> Self {
        Self::intern(&format!("{}->{}", source.as_str(), target.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_roundtrip() {
        let a = NodeId::intern("api_server");
        let b = NodeId::intern("api_server");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "api_server");
    }

    #[test]
    fn edge_id_defaults_to_arrow_form() {
        let id = EdgeId::between(NodeId::intern("a"), NodeId::intern("b"));
        assert_eq!(id.as_str(), "a->b");
    }

    #[test]
    fn ordering_is_textual() {
        // Intern in reverse so interning order disagrees with text order.
        let z = NodeId::intern("zz_order");
        let a = NodeId::intern("aa_order");
        let mut ids = vec![z, a];
        ids.sort();
        assert_eq!(ids, vec![a, z]);
    }
}
