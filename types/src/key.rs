use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ObjectError;

/// Outcome of comparing two object keys.
///
/// Keys of different variants carry no ordering with respect to each other;
/// such comparisons yield [`KeyOrdering::Incomparable`] and callers must only
/// act on the decided variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrdering {
    Less,
    Equal,
    Greater,
    Incomparable,
}

impl KeyOrdering {
    pub fn is_decided(self) -> bool {
        !matches!(self, KeyOrdering::Incomparable)
    }
}

impl From<Ordering> for KeyOrdering {
    fn from(input: Ordering) -> Self {
        match input {
            Ordering::Less => KeyOrdering::Less,
            Ordering::Equal => KeyOrdering::Equal,
            Ordering::Greater => KeyOrdering::Greater,
        }
    }
}

/// Key attached to a stored object, minimally wrapping a locator URI.
///
/// The typed variants add an integer or long discriminant ordered ahead of
/// the locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKey {
    Basic { locator: Option<String> },
    Int { value: i32, locator: Option<String> },
    Long { value: i64, locator: Option<String> },
}

impl ObjectKey {
    pub fn basic(locator: impl Into<String>) -> Self {
        ObjectKey::Basic {
            locator: Some(locator.into()),
        }
    }

    pub fn int(value: i32, locator: impl Into<String>) -> Self {
        ObjectKey::Int {
            value,
            locator: Some(locator.into()),
        }
    }

    pub fn long(value: i64, locator: impl Into<String>) -> Self {
        ObjectKey::Long {
            value,
            locator: Some(locator.into()),
        }
    }

    pub fn locator(&self) -> Option<&str> {
        match self {
            ObjectKey::Basic { locator }
            | ObjectKey::Int { locator, .. }
            | ObjectKey::Long { locator, .. } => locator.as_deref(),
        }
    }

    /// Wire tag of the concrete key variant.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ObjectKey::Basic { .. } => "BasicKey",
            ObjectKey::Int { .. } => "IntKey",
            ObjectKey::Long { .. } => "LongKey",
        }
    }

    /// Compares against an optional other key.
    ///
    /// A missing argument or a variant mismatch is incomparable; otherwise
    /// basic keys order by locator and typed keys by their discriminant,
    /// falling back to the locator on equal values.
    pub fn compare(&self, other: Option<&ObjectKey>) -> KeyOrdering {
        let Some(other) = other else {
            return KeyOrdering::Incomparable;
        };
        match (self, other) {
            (ObjectKey::Basic { locator: a }, ObjectKey::Basic { locator: b }) => a.cmp(b).into(),
            (
                ObjectKey::Int {
                    value: a,
                    locator: la,
                },
                ObjectKey::Int {
                    value: b,
                    locator: lb,
                },
            ) => a.cmp(b).then_with(|| la.cmp(lb)).into(),
            (
                ObjectKey::Long {
                    value: a,
                    locator: la,
                },
                ObjectKey::Long {
                    value: b,
                    locator: lb,
                },
            ) => a.cmp(b).then_with(|| la.cmp(lb)).into(),
            _ => KeyOrdering::Incomparable,
        }
    }

    /// Collapses to the basic variant, preserving only the locator.
    pub fn collapse(&self) -> ObjectKey {
        ObjectKey::Basic {
            locator: self.locator().map(str::to_owned),
        }
    }

    /// Text form: the locator for basic keys; typed keys prepend the numeric
    /// value followed by a single space.
    pub fn to_text(&self) -> String {
        match self {
            ObjectKey::Basic { locator } => locator.clone().unwrap_or_default(),
            ObjectKey::Int { value, locator } => {
                format!("{value} {}", locator.as_deref().unwrap_or_default())
            }
            ObjectKey::Long { value, locator } => {
                format!("{value} {}", locator.as_deref().unwrap_or_default())
            }
        }
    }

    /// Parses the text form of the key variant named by `kind_tag`.
    pub fn parse(kind_tag: &str, text: &str) -> Result<ObjectKey, ObjectError> {
        fn optional_locator(text: &str) -> Option<String> {
            if text.is_empty() {
                None
            } else {
                Some(text.to_owned())
            }
        }
        match kind_tag {
            "BasicKey" => Ok(ObjectKey::Basic {
                locator: optional_locator(text),
            }),
            "IntKey" => {
                let (value, locator) = split_typed_key(text)?;
                Ok(ObjectKey::Int {
                    value: value.parse().map_err(|_| {
                        ObjectError::InvalidArgument(format!("bad integer key value {value:?}"))
                    })?,
                    locator: optional_locator(locator),
                })
            }
            "LongKey" => {
                let (value, locator) = split_typed_key(text)?;
                Ok(ObjectKey::Long {
                    value: value.parse().map_err(|_| {
                        ObjectError::InvalidArgument(format!("bad long key value {value:?}"))
                    })?,
                    locator: optional_locator(locator),
                })
            }
            other => Err(ObjectError::UnknownType(other.to_owned())),
        }
    }
}

fn split_typed_key(text: &str) -> Result<(&str, &str), ObjectError> {
    match text.split_once(' ') {
        Some((value, locator)) => Ok((value, locator)),
        // A typed key with no locator serializes as the bare value.
        None if !text.is_empty() => Ok((text, "")),
        None => Err(ObjectError::InvalidArgument(
            "empty typed key text".to_owned(),
        )),
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn basic_keys_order_by_locator() {
        let a = ObjectKey::basic("a/1");
        let b = ObjectKey::basic("b/1");
        assert_eq!(a.compare(Some(&b)), KeyOrdering::Less);
        assert_eq!(b.compare(Some(&a)), KeyOrdering::Greater);
        assert_eq!(a.compare(Some(&a)), KeyOrdering::Equal);
    }

    #[test]
    fn typed_keys_order_by_value_first() {
        let small = ObjectKey::int(3, "z");
        let large = ObjectKey::int(7, "a");
        assert_eq!(small.compare(Some(&large)), KeyOrdering::Less);
    }

    #[test]
    fn cross_variant_comparison_is_incomparable() {
        let basic = ObjectKey::basic("x");
        let int = ObjectKey::int(1, "x");
        let long = ObjectKey::long(1, "x");
        assert_eq!(basic.compare(Some(&int)), KeyOrdering::Incomparable);
        assert_eq!(int.compare(Some(&long)), KeyOrdering::Incomparable);
        assert_eq!(basic.compare(None), KeyOrdering::Incomparable);
        assert!(!basic.compare(Some(&int)).is_decided());
    }

    #[test]
    fn text_round_trip() {
        let cases = vec![
            ObjectKey::basic("u/17"),
            ObjectKey::Basic { locator: None },
            ObjectKey::int(-4, "u/17"),
            ObjectKey::long(1 << 40, "u/17"),
            ObjectKey::Int {
                value: 9,
                locator: None,
            },
        ];
        for key in cases {
            let parsed = ObjectKey::parse(key.kind_tag(), &key.to_text()).unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn collapse_keeps_only_the_locator() {
        let key = ObjectKey::long(42, "u/9");
        assert_eq!(key.collapse(), ObjectKey::basic("u/9"));
    }

    #[test]
    fn unknown_kind_tag_is_rejected() {
        assert_eq!(
            ObjectKey::parse("FloatKey", "1 x"),
            Err(ObjectError::UnknownType("FloatKey".to_owned()))
        );
    }
}
