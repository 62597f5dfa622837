// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-valued polymorphic fields behind wrapper paths, with variant
//! content carried in attributes.

use tagged_xml::de::{
    self, read_fields, Accumulator, Deserialize, ElementReader, FieldSink, ReadOptions, Slot,
    SlotConflictPolicy, UnknownElementPolicy, VisitorError,
};
use tagged_xml::schema::{
    BindingKind, FieldBinding, PolymorphicMap, TypeDescriptor, VariantBinding,
};
use tagged_xml::ser::{
    self, ElementBuilder, ElementWriter, FieldEmitter, Serialize, SerializeRoot, VariantValue,
};
use tagged_xml::BoxedStdError;

const DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

static BOOK_MAP: PolymorphicMap = PolymorphicMap {
    name: "books",
    variants: &[
        VariantBinding {
            tag: "roman",
            type_name: "Roman",
        },
        VariantBinding {
            tag: "shortStory",
            type_name: "ShortStory",
        },
    ],
};

/// `Roman` and `ShortStory` carry their title in a `name` attribute.
macro_rules! titled_book {
    ( $t:ident, $desc:ident, $tag:literal ) => {
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        struct $t {
            name: String,
        }

        static $desc: TypeDescriptor = TypeDescriptor {
            type_name: stringify!($t),
            tag: $tag,
            fields: &[FieldBinding {
                name: "name",
                path: &[],
                kind: BindingKind::Attribute,
            }],
        };

        impl Deserialize for $t {
            fn deserialize(element: ElementReader<'_>) -> Result<Self, VisitorError> {
                #[derive(Default)]
                struct Builder {
                    name: Slot<String>,
                }
                impl FieldSink for Builder {
                    fn attribute(
                        &mut self,
                        field: usize,
                        value: String,
                    ) -> Result<(), BoxedStdError> {
                        match field {
                            0 => self.name.set(value),
                            _ => unreachable!("binding #{}", field),
                        }
                        Ok(())
                    }
                }
                let mut builder = Builder::default();
                read_fields(element, &$desc, &mut builder)?;
                Ok($t {
                    name: builder
                        .name
                        .take()
                        .ok_or_else(|| VisitorError::missing_attribute("name"))?,
                })
            }
        }

        impl Serialize for $t {
            fn write_attributes(&self, element: &mut ElementBuilder) -> Result<(), ser::Error> {
                element.attribute("name", self.name.clone())
            }
        }
    };
}

titled_book!(Roman, ROMAN, "roman");
titled_book!(ShortStory, SHORT_STORY, "shortStory");

#[derive(Clone, Debug, Eq, PartialEq)]
enum Book {
    Roman(Roman),
    ShortStory(ShortStory),
}

impl Book {
    fn read(tag: &'static str, child: ElementReader<'_>) -> Result<Self, VisitorError> {
        match tag {
            "roman" => Ok(Book::Roman(Roman::deserialize(child)?)),
            "shortStory" => Ok(Book::ShortStory(ShortStory::deserialize(child)?)),
            _ => unreachable!("tag <{}> is not in the book map", tag),
        }
    }

    fn roman(name: &str) -> Book {
        Book::Roman(Roman {
            name: name.to_owned(),
        })
    }

    fn short_story(name: &str) -> Book {
        Book::ShortStory(ShortStory {
            name: name.to_owned(),
        })
    }
}

impl Serialize for Book {
    fn write_attributes(&self, element: &mut ElementBuilder) -> Result<(), ser::Error> {
        match self {
            Book::Roman(v) => v.write_attributes(element),
            Book::ShortStory(v) => v.write_attributes(element),
        }
    }

    fn write_children(&self, element: &mut ElementWriter) -> Result<(), ser::Error> {
        match self {
            Book::Roman(v) => v.write_children(element),
            Book::ShortStory(v) => v.write_children(element),
        }
    }
}

impl VariantValue for Book {
    fn type_name(&self) -> &'static str {
        match self {
            Book::Roman(_) => "Roman",
            Book::ShortStory(_) => "ShortStory",
        }
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
struct BookStore {
    book: Option<Book>,
    books: Vec<Book>,
}

static BOOK_STORE: TypeDescriptor = TypeDescriptor {
    type_name: "BookStore",
    tag: "bookStore",
    fields: &[
        FieldBinding {
            name: "book",
            path: &["specialBook"],
            kind: BindingKind::PolymorphicSingle(&BOOK_MAP),
        },
        FieldBinding {
            name: "books",
            path: &["otherBooks"],
            kind: BindingKind::PolymorphicList(&BOOK_MAP),
        },
    ],
};
const BS_BOOK: usize = 0;
const BS_BOOKS: usize = 1;

#[derive(Default)]
struct BookStoreBuilder {
    book: Slot<Book>,
    books: Accumulator<Book>,
}

impl FieldSink for BookStoreBuilder {
    fn variant(
        &mut self,
        field: usize,
        tag: &'static str,
        child: ElementReader<'_>,
    ) -> Result<(), VisitorError> {
        match field {
            BS_BOOK => self.book.set(Book::read(tag, child)?),
            BS_BOOKS => self.books.append(Book::read(tag, child)?),
            _ => unreachable!("book store binding #{}", field),
        }
        Ok(())
    }
}

impl Deserialize for BookStore {
    fn deserialize(element: ElementReader<'_>) -> Result<Self, VisitorError> {
        let mut builder = BookStoreBuilder::default();
        read_fields(element, &BOOK_STORE, &mut builder)?;
        Ok(BookStore {
            book: builder.book.take(),
            books: builder.books.finish(),
        })
    }
}

impl Serialize for BookStore {
    fn write_children(&self, element: &mut ElementWriter) -> Result<(), ser::Error> {
        let mut fields = FieldEmitter::new(element);
        fields.single(
            &BOOK_STORE.fields[BS_BOOK],
            self.book.as_ref().map(|b| b as &dyn VariantValue),
        )?;
        fields.list(
            &BOOK_STORE.fields[BS_BOOKS],
            self.books.iter().map(|b| b as &dyn VariantValue),
        )?;
        fields.finish()
    }
}

impl SerializeRoot for BookStore {
    fn root(&self) -> &'static str {
        BOOK_STORE.tag
    }
}

static STORE: &str = "<bookStore>\
    <specialBook><roman name=\"Roman 1\"/></specialBook>\
    <otherBooks>\
    <shortStory name=\"ShortStory 1\"/>\
    <roman name=\"Roman 2\"/>\
    </otherBooks></bookStore>";

#[test]
fn polymorphic_element() {
    init();
    let store: BookStore = de::from_str(STORE).unwrap();
    assert_eq!(store.book, Some(Book::roman("Roman 1")));
    assert_eq!(
        store.books,
        vec![Book::short_story("ShortStory 1"), Book::roman("Roman 2")]
    );

    let out = ser::serialize(&store).to_string().unwrap();
    log::info!("serialized: {:?}", out);
    assert_eq!(out, format!("{}{}", DECL, STORE));

    let store2: BookStore = de::from_str(&out).unwrap();
    assert_eq!(store, store2);
}

#[test]
fn empty_collection() {
    init();
    // Both spellings of an empty wrapper parse to the same empty sequence,
    // and write back self-closing.
    for doc in [
        "<bookStore><specialBook><roman name=\"Roman 1\"/></specialBook><otherBooks/></bookStore>",
        "<bookStore><specialBook><roman name=\"Roman 1\"/></specialBook><otherBooks></otherBooks></bookStore>",
    ] {
        let store: BookStore = de::from_str(doc).unwrap();
        assert_eq!(store.book, Some(Book::roman("Roman 1")));
        assert!(store.books.is_empty());

        let out = ser::serialize(&store).to_string().unwrap();
        assert_eq!(
            out,
            format!(
                "{}<bookStore><specialBook><roman name=\"Roman 1\"/></specialBook>\
                 <otherBooks/></bookStore>",
                DECL
            )
        );
        let store2: BookStore = de::from_str(&out).unwrap();
        assert_eq!(store, store2);
    }
}

#[test]
fn empty_store() {
    init();
    let store: BookStore = de::from_str("<bookStore/>").unwrap();
    assert_eq!(store, BookStore::default());

    let out = ser::serialize(&store).to_string().unwrap();
    assert_eq!(
        out,
        format!(
            "{}<bookStore><specialBook/><otherBooks/></bookStore>",
            DECL
        )
    );
    let store2: BookStore = de::from_str(&out).unwrap();
    assert_eq!(store, store2);
}

#[test]
fn second_special_book() {
    init();
    let doc = "<bookStore><specialBook>\
        <roman name=\"A\"/>\
        <shortStory name=\"B\"/>\
        </specialBook></bookStore>";
    let e = de::from_str::<BookStore>(doc).unwrap_err();
    assert!(
        e.to_string().contains("Duplicate element <shortStory>"),
        "{}",
        e
    );

    let options = ReadOptions {
        slot_conflicts: SlotConflictPolicy::Overwrite,
        ..ReadOptions::default()
    };
    let store: BookStore = de::from_str_with(doc, options).unwrap();
    assert_eq!(store.book, Some(Book::short_story("B")));
}

#[test]
fn missing_variant_attribute() {
    init();
    let doc = "<bookStore><specialBook><roman/></specialBook></bookStore>";
    let e = de::from_str::<BookStore>(doc).unwrap_err();
    assert!(e.to_string().contains("attribute name"), "{}", e);
}

#[test]
fn unresolved_variant_tag() {
    init();
    let doc = "<bookStore><otherBooks>\
        <pamphlet name=\"P\"/>\
        <roman name=\"R\"/>\
        </otherBooks></bookStore>";

    let options = ReadOptions {
        unknown_elements: UnknownElementPolicy::Lenient,
        ..ReadOptions::default()
    };
    let store: BookStore = de::from_str_with(doc, options).unwrap();
    assert_eq!(store.books, vec![Book::roman("R")]);

    let e = de::from_str::<BookStore>(doc).unwrap_err();
    assert!(e.to_string().contains("<pamphlet>"), "{}", e);
}
