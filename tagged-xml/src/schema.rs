// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declarative binding metadata.
//!
//! A [`TypeDescriptor`] is the complete, immutable description of how one
//! mapped type appears in a document: an ordered list of [`FieldBinding`]s,
//! each naming the attribute or element(s) it binds and the wrapper path
//! leading to them. Descriptors are plain `'static` tables; they are built
//! once (typically as `static` items by whatever layer generates or
//! hand-writes the per-type adapters) and shared freely across threads.

use std::fmt;

/// Describes how one mapped type binds to XML.
#[derive(Debug)]
pub struct TypeDescriptor {
    /// Name of the mapped Rust type, for diagnostics and reverse lookup.
    pub type_name: &'static str,

    /// Element tag used when a value of this type is the document root.
    pub tag: &'static str,

    /// Field bindings in declaration order.
    ///
    /// Declaration order is also emission order, so it fully determines the
    /// serialized layout.
    pub fields: &'static [FieldBinding],
}

/// One logical field of a [`TypeDescriptor`].
#[derive(Debug)]
pub struct FieldBinding {
    /// The bound attribute or element tag.
    ///
    /// Polymorphic bindings take their element tags from the map instead;
    /// for those this is only a label for diagnostics.
    pub name: &'static str,

    /// Wrapper tags entered, in order, before this field's own element(s)
    /// appear. Wrapper elements carry no binding of their own.
    pub path: &'static [&'static str],

    pub kind: BindingKind,
}

/// What a [`FieldBinding`] binds to.
#[derive(Copy, Clone, Debug)]
pub enum BindingKind {
    /// An attribute on the type's own start tag. Must not be path-scoped.
    Attribute,

    /// A child element containing only character data.
    Text,

    /// A child element with its own [`TypeDescriptor`], bound by tag name.
    Element,

    /// One child element whose concrete type is chosen by tag name.
    PolymorphicSingle(&'static PolymorphicMap),

    /// An ordered, possibly empty run of child elements, each resolved by
    /// tag name through the map. Document order is preserved.
    PolymorphicList(&'static PolymorphicMap),
}

impl BindingKind {
    pub(crate) fn map(&self) -> Option<&'static PolymorphicMap> {
        match *self {
            BindingKind::PolymorphicSingle(m) | BindingKind::PolymorphicList(m) => Some(m),
            _ => None,
        }
    }
}

/// Bijection between element tags and concrete types, scoped to one binding.
///
/// The same map may back several bindings, and a type may appear in several
/// maps; the map is never global to a type.
#[derive(Debug)]
pub struct PolymorphicMap {
    /// Label for diagnostics.
    pub name: &'static str,

    pub variants: &'static [VariantBinding],
}

/// One tag ↔ concrete type entry of a [`PolymorphicMap`].
#[derive(Copy, Clone, Debug)]
pub struct VariantBinding {
    pub tag: &'static str,
    pub type_name: &'static str,
}

impl PolymorphicMap {
    /// Forward direction: the variant an observed tag must materialize as.
    ///
    /// Maps are small static tables, so a scan beats hashing here.
    pub fn resolve(&self, tag: &str) -> Option<&VariantBinding> {
        self.variants.iter().find(|v| v.tag == tag)
    }

    /// Reverse direction: the tag to emit for a runtime value of the named
    /// type. `None` means the graph holds a type the schema cannot
    /// serialize; callers treat that as fatal.
    pub fn tag_for(&self, type_name: &str) -> Option<&'static str> {
        self.variants
            .iter()
            .find(|v| v.type_name == type_name)
            .map(|v| v.tag)
    }

    /// Checks that both directions of the map are actually bijective.
    pub fn validate(&self) -> Result<(), InvalidSchema> {
        for (i, v) in self.variants.iter().enumerate() {
            for w in &self.variants[i + 1..] {
                if v.tag == w.tag {
                    return Err(InvalidSchema(format!(
                        "map {}: tag <{}> is registered for both {} and {}",
                        self.name, v.tag, v.type_name, w.type_name
                    )));
                }
                if v.type_name == w.type_name {
                    return Err(InvalidSchema(format!(
                        "map {}: type {} is registered under both <{}> and <{}>",
                        self.name, v.type_name, v.tag, w.tag
                    )));
                }
            }
        }
        Ok(())
    }
}

impl TypeDescriptor {
    /// Checks the construction-time invariants of this descriptor: map
    /// bijectivity, no path-scoped attributes, and no two sibling bindings
    /// claiming the same tag at the same path position.
    pub fn validate(&self) -> Result<(), InvalidSchema> {
        for f in self.fields {
            if matches!(f.kind, BindingKind::Attribute) && !f.path.is_empty() {
                return Err(InvalidSchema(format!(
                    "{}: attribute {} cannot be path-scoped",
                    self.type_name, f.name
                )));
            }
            if let Some(map) = f.kind.map() {
                map.validate()?;
            }
        }
        for (i, f) in self.fields.iter().enumerate() {
            for g in &self.fields[i + 1..] {
                self.check_pair(f, g)?;
            }
        }
        Ok(())
    }

    fn check_pair(&self, f: &FieldBinding, g: &FieldBinding) -> Result<(), InvalidSchema> {
        let f_attr = matches!(f.kind, BindingKind::Attribute);
        let g_attr = matches!(g.kind, BindingKind::Attribute);
        if f_attr || g_attr {
            if f_attr && g_attr && f.name == g.name {
                return Err(InvalidSchema(format!(
                    "{}: duplicate attribute binding {}",
                    self.type_name, f.name
                )));
            }
            return Ok(());
        }
        if f.path == g.path {
            if let Some(tag) = claimed_tags(f).iter().find(|t| claimed_tags(g).contains(t)) {
                return Err(InvalidSchema(format!(
                    "{}: bindings {} and {} both claim element <{}>",
                    self.type_name, f.name, g.name, tag
                )));
            }
        }
        for (a, b) in [(f, g), (g, f)] {
            if b.path.len() > a.path.len()
                && b.path[..a.path.len()] == a.path[..]
                && claimed_tags(a).contains(&b.path[a.path.len()])
            {
                return Err(InvalidSchema(format!(
                    "{}: element <{}> of binding {} shadows a wrapper tag of binding {}",
                    self.type_name,
                    b.path[a.path.len()],
                    a.name,
                    b.name
                )));
            }
        }
        Ok(())
    }
}

fn claimed_tags(f: &FieldBinding) -> Vec<&'static str> {
    match f.kind {
        BindingKind::Attribute => Vec::new(),
        BindingKind::Text | BindingKind::Element => vec![f.name],
        BindingKind::PolymorphicSingle(m) | BindingKind::PolymorphicList(m) => {
            m.variants.iter().map(|v| v.tag).collect()
        }
    }
}

/// A descriptor table violates a construction-time invariant.
///
/// Always a programming error in the adapter layer, never a property of the
/// document being processed.
#[derive(Debug)]
pub struct InvalidSchema(String);

impl fmt::Display for InvalidSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InvalidSchema {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }

    fn leak_map(variants: Vec<VariantBinding>) -> PolymorphicMap {
        PolymorphicMap {
            name: "test",
            variants: Box::leak(variants.into_boxed_slice()),
        }
    }

    static ANIMALS: PolymorphicMap = PolymorphicMap {
        name: "animals",
        variants: &[
            VariantBinding {
                tag: "cat",
                type_name: "Cat",
            },
            VariantBinding {
                tag: "dog",
                type_name: "Dog",
            },
        ],
    };

    #[test]
    fn resolve_both_directions() {
        assert_eq!(ANIMALS.resolve("cat").unwrap().type_name, "Cat");
        assert!(ANIMALS.resolve("ferret").is_none());
        assert_eq!(ANIMALS.tag_for("Dog"), Some("dog"));
        assert_eq!(ANIMALS.tag_for("Ferret"), None);
    }

    #[test]
    fn duplicate_tag_rejected() {
        let map = leak_map(vec![
            VariantBinding {
                tag: "cat",
                type_name: "Cat",
            },
            VariantBinding {
                tag: "cat",
                type_name: "Lion",
            },
        ]);
        map.validate().unwrap_err();
    }

    #[test]
    fn duplicate_type_rejected() {
        let map = leak_map(vec![
            VariantBinding {
                tag: "cat",
                type_name: "Cat",
            },
            VariantBinding {
                tag: "lion",
                type_name: "Cat",
            },
        ]);
        map.validate().unwrap_err();
    }

    #[test]
    fn path_scoped_attribute_rejected() {
        let desc = TypeDescriptor {
            type_name: "Zoo",
            tag: "zoo",
            fields: &[FieldBinding {
                name: "id",
                path: &["meta"],
                kind: BindingKind::Attribute,
            }],
        };
        desc.validate().unwrap_err();
    }

    #[test]
    fn sibling_tag_collision_rejected() {
        static FIELDS: &[FieldBinding] = &[
            FieldBinding {
                name: "cat",
                path: &[],
                kind: BindingKind::Text,
            },
            FieldBinding {
                name: "pets",
                path: &[],
                kind: BindingKind::PolymorphicList(&ANIMALS),
            },
        ];
        let desc = TypeDescriptor {
            type_name: "Zoo",
            tag: "zoo",
            fields: FIELDS,
        };
        desc.validate().unwrap_err();
    }

    #[test]
    fn wrapper_shadowing_rejected() {
        // A bound element tag that doubles as a sibling's wrapper segment
        // would make dispatch ambiguous.
        static FIELDS: &[FieldBinding] = &[
            FieldBinding {
                name: "pen",
                path: &[],
                kind: BindingKind::Element,
            },
            FieldBinding {
                name: "pets",
                path: &["pen"],
                kind: BindingKind::PolymorphicList(&ANIMALS),
            },
        ];
        let desc = TypeDescriptor {
            type_name: "Zoo",
            tag: "zoo",
            fields: FIELDS,
        };
        desc.validate().unwrap_err();
    }

    #[test]
    fn disjoint_paths_accepted() {
        static FIELDS: &[FieldBinding] = &[
            FieldBinding {
                name: "pets",
                path: &["pens", "indoor"],
                kind: BindingKind::PolymorphicList(&ANIMALS),
            },
            FieldBinding {
                name: "strays",
                path: &["pens", "outdoor"],
                kind: BindingKind::PolymorphicList(&ANIMALS),
            },
            FieldBinding {
                name: "keeper",
                path: &["pens"],
                kind: BindingKind::Element,
            },
        ];
        let desc = TypeDescriptor {
            type_name: "Zoo",
            tag: "zoo",
            fields: FIELDS,
        };
        desc.validate().unwrap();
    }

    proptest! {
        /// Any map whose tags are pairwise distinct validates; duplicating
        /// one tag must always be caught.
        #[test]
        fn map_tag_uniqueness(tags in prop::collection::hash_set("[a-z]{1,8}", 1..8)) {
            let variants: Vec<VariantBinding> = tags
                .iter()
                .enumerate()
                .map(|(i, t)| VariantBinding {
                    tag: leak(t.clone()),
                    type_name: leak(format!("Type{}", i)),
                })
                .collect();
            let map = leak_map(variants.clone());
            prop_assert!(map.validate().is_ok());

            let mut dup = variants;
            dup.push(VariantBinding {
                tag: dup[0].tag,
                type_name: "Duplicate",
            });
            let dup_map = leak_map(dup);
            prop_assert!(dup_map.validate().is_err());
        }
    }
}
