// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialization from Rust types to XML.

use std::io::Write;

use xml::writer::XmlEvent;

use crate::schema::{BindingKind, FieldBinding, PolymorphicMap};

/// An error while serializing.
///
/// Serialization failures are either I/O problems or configuration errors
/// (an object graph the declared schema cannot represent); neither is
/// recoverable mid-document, so this stays a simple cloneable message.
#[derive(Clone, Debug)]
pub struct Error(pub String);

impl Error {
    pub fn duplicate_attribute(name: &str, old: &str, new: &str) -> Error {
        Error(format!(
            "Attribute {:?} already has value {:?}, so can't set value {:?}",
            name, old, new
        ))
    }

    /// The graph holds a runtime type the map has no tag for; the graph is
    /// not representable by the declared schema.
    pub fn type_not_in_map(map: &str, type_name: &str) -> Error {
        Error(format!(
            "Map {} has no tag registered for runtime type {}",
            map, type_name
        ))
    }

    pub fn binding_mismatch(binding: &str, expected: &str) -> Error {
        Error(format!(
            "Binding {} is not a {} binding",
            binding, expected
        ))
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}

struct WrappedWriter<W: std::io::Write> {
    inner: xml::writer::EventWriter<W>,

    /// When `Some`, all future writes and the overall operation should fail with this error.
    poison: Option<Error>,
}

/// A type-erased version of [`WrappedWriter`], to avoid monomorphization bloat.
trait ErasedEventWriter {
    /// Writes the event, poisoning the writer on failure.
    fn write(&mut self, event: XmlEvent) -> Result<(), Error>;

    /// Explicitly poison the writer.
    fn poison(&mut self, error: Error);
}

impl<W: Write> ErasedEventWriter for WrappedWriter<W> {
    fn write(&mut self, event: XmlEvent) -> Result<(), Error> {
        if let Some(ref poison) = self.poison {
            return Err(poison.clone());
        }
        if let Err(e) = self.inner.write(event) {
            let wrapped = Error(e.to_string());
            self.poison = Some(wrapped.clone());
            return Err(wrapped);
        }
        Ok(())
    }

    fn poison(&mut self, error: Error) {
        self.poison.get_or_insert(error);
    }
}

/// Builds the start tag for an element: name and attributes.
///
/// The element's parent always constructs it with its name. The type
/// serializing the element may add attributes, then start the element and
/// convert it to an [`ElementWriter`] to add child elements and text.
pub struct ElementBuilder<'a>(Option<ElementBuilderInner<'a>>);

struct ElementBuilderInner<'a> {
    name: &'a str,
    attributes: Vec<(&'a str, String)>,
    writer: &'a mut dyn ErasedEventWriter,
}

impl<'a> ElementBuilder<'a> {
    /// Adds the given attribute.
    ///
    /// Attribute order in the output is call order.
    pub fn attribute(&mut self, name: &'a str, value: String) -> Result<(), Error> {
        let inner = self.0.as_mut().unwrap();
        if let Some((_, old)) = inner.attributes.iter().find(|(n, _)| *n == name) {
            return Err(Error::duplicate_attribute(name, old, &value));
        }
        inner.attributes.push((name, value));
        Ok(())
    }

    /// Writes the start event, returning a writer that must be used to finish
    /// the element.
    ///
    /// If `finish` is not called on the returned [`ElementWriter`] before it
    /// is dropped, serialization will fail.
    #[must_use = "must call finish on the returned writer to complete the document"]
    pub fn start(mut self) -> Result<ElementWriter<'a>, Error> {
        let inner = self.0.take().unwrap();
        let mut event = XmlEvent::start_element(inner.name);
        for (name, value) in &inner.attributes {
            event = event.attr(*name, value);
        }
        inner.writer.write(event.into())?;
        Ok(ElementWriter(Some(ElementWriterInner {
            writer: inner.writer,
        })))
    }
}

impl<'a> Drop for ElementBuilder<'a> {
    fn drop(&mut self) {
        if let Some(inner) = self.0.as_mut() {
            inner
                .writer
                .poison(Error("ElementBuilder dropped before start".to_owned()));
        }
    }
}

/// Builds the body (element and text node children) of an element.
pub struct ElementWriter<'a>(Option<ElementWriterInner<'a>>);

struct ElementWriterInner<'a> {
    writer: &'a mut dyn ErasedEventWriter,
}

impl<'a> ElementWriter<'a> {
    /// Returns an [`ElementBuilder`] for a child element.
    ///
    /// If `start` is not called on the returned [`ElementBuilder`] before it
    /// is dropped, serialization will fail.
    #[must_use = "must call start on the returned element to complete the document"]
    pub fn element<'b>(&'b mut self, name: &'b str) -> ElementBuilder<'b>
    where
        'a: 'b,
    {
        let inner = self.0.as_mut().unwrap();
        ElementBuilder(Some(ElementBuilderInner {
            name,
            attributes: Vec::default(),
            writer: &mut *inner.writer,
        }))
    }

    pub fn text(&mut self, text: &str) -> Result<(), Error> {
        self.0
            .as_mut()
            .unwrap()
            .writer
            .write(XmlEvent::Characters(text))
    }

    pub fn finish(mut self) -> Result<(), Error> {
        self.0
            .take()
            .unwrap()
            .writer
            .write(XmlEvent::EndElement { name: None })
    }

    fn start_raw(&mut self, name: &str) -> Result<(), Error> {
        self.0
            .as_mut()
            .unwrap()
            .writer
            .write(XmlEvent::start_element(name).into())
    }

    fn end_raw(&mut self) -> Result<(), Error> {
        self.0
            .as_mut()
            .unwrap()
            .writer
            .write(XmlEvent::EndElement { name: None })
    }

    fn poison(&mut self, error: Error) {
        if let Some(inner) = self.0.as_mut() {
            inner.writer.poison(error);
        }
    }
}

impl<'a> Drop for ElementWriter<'a> {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            inner
                .writer
                .poison(Error("ElementWriter dropped before finish".to_owned()));
        }
    }
}

/// Writes an element's contents: attributes and element/text node children.
///
/// The element name itself is chosen by the parent or, in the case of the
/// root, via [`SerializeRoot`] or [`serialize_with_name`].
///
/// `tagged-xml` always calls `write_attributes` then `write_children` exactly
/// once each (or bails on error). Implementations are the per-type adapters
/// an external generation layer would produce; `write_children` typically
/// drives a [`FieldEmitter`] over the type's descriptor, in declaration
/// order.
#[allow(unused_variables)]
pub trait Serialize {
    fn write_attributes(&self, element: &mut ElementBuilder) -> Result<(), Error> {
        Ok(())
    }
    fn write_children(&self, element: &mut ElementWriter) -> Result<(), Error> {
        Ok(())
    }
}

/// Writes an element, including its name and contents.
///
/// Implemented by root types; the name typically comes from the type's
/// descriptor.
pub trait SerializeRoot: Serialize {
    fn root(&self) -> &'static str;
}

/// A value governed by a [`PolymorphicMap`].
///
/// `type_name` reports the registered name of the value's *runtime* type
/// (an exhaustive match over the closed set of variants), which the emitter
/// feeds through the map's reverse direction to choose the tag.
pub trait VariantValue: Serialize {
    fn type_name(&self) -> &'static str;
}

/// Converts to text for use in an attribute or text-only element.
///
/// This matches the XML Schema concept of a "simple type".
pub trait ToText {
    fn to_text(&self) -> Result<String, Error>;
}

macro_rules! text_from_display {
    ( $t:ident ) => {
        impl ToText for $t {
            fn to_text(&self) -> Result<String, Error> {
                Ok(std::string::ToString::to_string(self))
            }
        }
    };
}

text_from_display!(bool);
text_from_display!(i8);
text_from_display!(u8);
text_from_display!(i16);
text_from_display!(u16);
text_from_display!(i32);
text_from_display!(u32);
text_from_display!(i64);
text_from_display!(u64);
text_from_display!(f32);
text_from_display!(f64);

impl ToText for &str {
    fn to_text(&self) -> Result<String, Error> {
        Ok((*self).to_owned())
    }
}

impl ToText for String {
    fn to_text(&self) -> Result<String, Error> {
        Ok((*self).clone())
    }
}

impl<T: ToText> Serialize for T {
    fn write_children(&self, writer: &mut ElementWriter) -> Result<(), Error> {
        writer.text(&self.to_text()?)
    }
}

/// Writes one named element: start tag, attributes, children, end tag.
fn write_value<T: Serialize + ?Sized>(
    parent: &mut ElementWriter,
    name: &str,
    value: &T,
) -> Result<(), Error> {
    let mut builder = parent.element(name);
    value.write_attributes(&mut builder)?;
    let mut writer = builder.start()?;
    value.write_children(&mut writer)?;
    writer.finish()
}

/// The write-side driver for one scope's bindings.
///
/// Call the method matching each binding's kind, in declaration order, then
/// [`FieldEmitter::finish`]. The emitter owns the wrapper elements declared
/// in the bindings' paths: it opens them on the way to a field's content,
/// keeps them open while consecutive fields share a path prefix, and closes
/// them when the path diverges or the scope ends. A declared wrapper is
/// entered even when the field has no content, so an empty collection still
/// leaves its (self-closing) wrapper in the output.
pub struct FieldEmitter<'w, 'a> {
    writer: &'a mut ElementWriter<'w>,
    open: Vec<&'static str>,
}

impl<'w, 'a> FieldEmitter<'w, 'a> {
    pub fn new(writer: &'a mut ElementWriter<'w>) -> Self {
        Self {
            writer,
            open: Vec::new(),
        }
    }

    fn enter(&mut self, path: &'static [&'static str]) -> Result<(), Error> {
        let common = self
            .open
            .iter()
            .zip(path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        while self.open.len() > common {
            self.open.pop();
            self.writer.end_raw()?;
        }
        for &seg in &path[common..] {
            self.writer.start_raw(seg)?;
            self.open.push(seg);
        }
        Ok(())
    }

    fn map_of(
        binding: &'static FieldBinding,
        list: bool,
    ) -> Result<&'static PolymorphicMap, Error> {
        match (binding.kind, list) {
            (BindingKind::PolymorphicSingle(m), false) => Ok(m),
            (BindingKind::PolymorphicList(m), true) => Ok(m),
            (_, false) => Err(Error::binding_mismatch(binding.name, "polymorphic single")),
            (_, true) => Err(Error::binding_mismatch(binding.name, "polymorphic list")),
        }
    }

    fn write_variant(&mut self, map: &'static PolymorphicMap, value: &dyn VariantValue) -> Result<(), Error> {
        let type_name = value.type_name();
        let tag = map
            .tag_for(type_name)
            .ok_or_else(|| Error::type_not_in_map(map.name, type_name))?;
        write_value(self.writer, tag, value)
    }

    /// Emits a text binding.
    pub fn text(&mut self, binding: &'static FieldBinding, value: &dyn ToText) -> Result<(), Error> {
        if !matches!(binding.kind, BindingKind::Text) {
            return Err(Error::binding_mismatch(binding.name, "text"));
        }
        self.enter(binding.path)?;
        let mut writer = self.writer.element(binding.name).start()?;
        writer.text(&value.to_text()?)?;
        writer.finish()
    }

    /// Emits an optional text binding; an absent value still enters the
    /// declared wrappers.
    pub fn opt_text(
        &mut self,
        binding: &'static FieldBinding,
        value: Option<&dyn ToText>,
    ) -> Result<(), Error> {
        if !matches!(binding.kind, BindingKind::Text) {
            return Err(Error::binding_mismatch(binding.name, "text"));
        }
        self.enter(binding.path)?;
        if let Some(value) = value {
            let mut writer = self.writer.element(binding.name).start()?;
            writer.text(&value.to_text()?)?;
            writer.finish()?;
        }
        Ok(())
    }

    /// Emits an element binding, recursing into the value's own bindings.
    pub fn element(
        &mut self,
        binding: &'static FieldBinding,
        value: &dyn Serialize,
    ) -> Result<(), Error> {
        if !matches!(binding.kind, BindingKind::Element) {
            return Err(Error::binding_mismatch(binding.name, "element"));
        }
        self.enter(binding.path)?;
        write_value(self.writer, binding.name, value)
    }

    /// Emits an optional element binding; an absent value still enters the
    /// declared wrappers.
    pub fn opt_element(
        &mut self,
        binding: &'static FieldBinding,
        value: Option<&dyn Serialize>,
    ) -> Result<(), Error> {
        if !matches!(binding.kind, BindingKind::Element) {
            return Err(Error::binding_mismatch(binding.name, "element"));
        }
        self.enter(binding.path)?;
        if let Some(value) = value {
            write_value(self.writer, binding.name, value)?;
        }
        Ok(())
    }

    /// Emits a single polymorphic binding, tagged per the value's runtime
    /// type. An absent value still enters the declared wrappers.
    pub fn single(
        &mut self,
        binding: &'static FieldBinding,
        value: Option<&dyn VariantValue>,
    ) -> Result<(), Error> {
        let map = Self::map_of(binding, false)?;
        self.enter(binding.path)?;
        if let Some(value) = value {
            self.write_variant(map, value)?;
        }
        Ok(())
    }

    /// Emits a polymorphic collection binding in sequence order, one child
    /// element per member, each tagged per its own runtime type. An empty
    /// sequence still enters the declared wrappers.
    pub fn list<'i>(
        &mut self,
        binding: &'static FieldBinding,
        items: impl IntoIterator<Item = &'i dyn VariantValue>,
    ) -> Result<(), Error> {
        let map = Self::map_of(binding, true)?;
        self.enter(binding.path)?;
        for value in items {
            self.write_variant(map, value)?;
        }
        Ok(())
    }

    /// Closes any wrappers still open. Must be called; dropping an emitter
    /// with open wrappers poisons the document.
    pub fn finish(mut self) -> Result<(), Error> {
        while self.open.pop().is_some() {
            self.writer.end_raw()?;
        }
        Ok(())
    }
}

impl<'w, 'a> Drop for FieldEmitter<'w, 'a> {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            self.writer
                .poison(Error("FieldEmitter dropped with open wrapper elements".to_owned()));
        }
    }
}

/// Serializer for element name and content; returned by [`serialize`] or [`serialize_with_name`].
#[derive(Copy, Clone)]
pub struct Serializer<'a> {
    element: &'a dyn Serialize,
    name: &'a str,
    perform_indent: bool,
}

impl<'a> Serializer<'a> {
    /// Sets if the output should be indented; defaults to false.
    #[inline]
    pub fn perform_indent(self, perform_indent: bool) -> Self {
        Self {
            perform_indent,
            ..self
        }
    }

    /// Serializes to any `Write` impl.
    pub fn to<W: Write>(self, writer: W) -> Result<(), Error> {
        let mut writer = WrappedWriter {
            inner: xml::writer::EventWriter::new_with_config(
                writer,
                xml::writer::EmitterConfig {
                    perform_indent: self.perform_indent,
                    pad_self_closing: false,
                    ..Default::default()
                },
            ),
            poison: None,
        };
        let mut builder = ElementBuilder(Some(ElementBuilderInner {
            name: self.name,
            attributes: Vec::default(),
            writer: &mut writer,
        }));
        self.element.write_attributes(&mut builder)?;
        let mut writer = builder.start()?;
        self.element.write_children(&mut writer)?;
        writer.finish()
    }

    /// Serializes to a `String`.
    pub fn to_string(self) -> Result<String, Error> {
        let mut out = Vec::new();
        self.to(&mut out)?;
        Ok(String::from_utf8(out).expect("xml-rs produced invalid UTF-8"))
    }
}

/// Serializes the given element with its default name.
///
/// This requires the supplied value implement [`SerializeRoot`]. If it does
/// not, see [`serialize_with_name`] instead.
#[inline]
pub fn serialize<R: SerializeRoot>(root: &R) -> Serializer {
    Serializer {
        element: root,
        name: root.root(),
        perform_indent: false,
    }
}

/// Serializes the given element with the chosen name.
///
/// Unlike [`serialize`], this doesn't require the supplied value implement
/// [`SerializeRoot`]. It can be used with any [`Serialize`] implementation,
/// including any [`ToText`] implementation.
#[inline]
pub fn serialize_with_name<'a>(element: &'a dyn Serialize, name: &'a str) -> Serializer<'a> {
    Serializer {
        element,
        name,
        perform_indent: false,
    }
}
