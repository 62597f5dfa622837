// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deserialization from XML to Rust types.

use std::sync::Arc;

use log::trace;
use xml::{
    common::{Position, TextPosition},
    reader::XmlEvent,
};

use crate::schema::{BindingKind, TypeDescriptor};

pub mod slot;

pub use slot::{Accumulator, Slot};

/// Policy for tags (and attributes) no binding resolves.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnknownElementPolicy {
    /// Consume and discard the offending subtree, then continue with its
    /// siblings. Skips are entirely local and never surface to the caller.
    Lenient,

    /// Fail the whole parse.
    Strict,
}

/// Policy for a second element arriving at an already-filled single-valued
/// binding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotConflictPolicy {
    /// Fail the whole parse.
    Fail,

    /// Deliver the later value; the sink keeps the last one.
    Overwrite,
}

/// Read-side configuration, carried by the reader and visible to dispatch.
#[derive(Copy, Clone, Debug)]
pub struct ReadOptions {
    pub unknown_elements: UnknownElementPolicy,
    pub slot_conflicts: SlotConflictPolicy,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            unknown_elements: UnknownElementPolicy::Strict,
            slot_conflicts: SlotConflictPolicy::Fail,
        }
    }
}

/// A single element in the XML stack; see [`Error::stack`].
#[derive(Clone, Debug)]
pub struct StackElement {
    /// The full name of the element as it appeared in the document.
    pub name: xml::name::OwnedName,

    /// The position of this element's `StartElement` event within the underlying document.
    pub pos: TextPosition,
}

/// An error returned by a [`Deserialize`] impl or friends to `tagged-xml`.
///
/// This error is essentially an instruction to propagate an existing [`Error`]
/// (which includes context information) or wrap a user-supplied
/// [`crate::BoxedStdError`] with context.
#[derive(Debug)]
pub enum VisitorError {
    Propagate(Error),
    Wrap(crate::BoxedStdError),
}

impl VisitorError {
    pub fn missing_element(expected: &str) -> Self {
        Self::Wrap(Box::new(SimpleError(format!(
            "Missing expected element <{}>",
            expected
        ))))
    }

    pub fn missing_attribute(expected: &str) -> Self {
        Self::Wrap(Box::new(SimpleError(format!(
            "Missing expected attribute {}",
            expected
        ))))
    }

    /// A single-valued binding received a second candidate element.
    pub fn duplicate_element(tag: &str) -> Self {
        Self::Wrap(Box::new(SimpleError(format!(
            "Duplicate element <{}> for single-valued binding",
            tag
        ))))
    }

    /// No binding at the current scope resolves the observed tag.
    pub fn unresolved_tag(tag: &str) -> Self {
        Self::Wrap(Box::new(SimpleError(format!(
            "No binding resolves element <{}>",
            tag
        ))))
    }

    pub fn unresolved_attribute(name: &str) -> Self {
        Self::Wrap(Box::new(SimpleError(format!(
            "No binding resolves attribute {}",
            name
        ))))
    }

    fn wrap(self, stack: &[StackElement], pos: TextPosition) -> Error {
        match self {
            VisitorError::Propagate(e) => e,
            VisitorError::Wrap(e) => Error::deserializer(stack, pos, e),
        }
    }
}

impl From<Error> for VisitorError {
    fn from(e: Error) -> Self {
        VisitorError::Propagate(e)
    }
}

/// A simple `Error` impl for use by internal deserializers.
#[derive(Debug)]
struct SimpleError(String);

impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for SimpleError {}

/// An error encountered while deserializing.
///
/// This type's `Display` impl will show the error encountered and the XML
/// element stack, printing the qname and line:column of each element. E.g.:
///
/// ```text
/// No binding resolves element <contractor> @ 3:17
///
/// XML element stack:
///    3: <contractor> @ 3:17
///    2: <persons> @ 2:13
///    1: <department> @ 2:9
///    0: <company> @ 1:1
/// ```
///
/// Cloning an `Error` is cheap.
#[derive(Clone, Debug)]
pub struct Error(Arc<ErrorInner>);

impl Error {
    /// Returns the stack of XML elements as of when this error occurred.
    ///
    /// `stack()[0]` is the root; `stack().last()` is the current element.
    pub fn stack(&self) -> &[StackElement] {
        &self.0.stack
    }

    fn xml(stack: &[StackElement], e: xml::reader::Error) -> Self {
        let pos = e.position();
        Error(Arc::new(ErrorInner {
            kind: ErrorKind::Xml(e),
            stack: stack.to_vec(),
            pos,
        }))
    }

    fn msg(stack: &[StackElement], pos: TextPosition, msg: String) -> Self {
        Error(Arc::new(ErrorInner {
            kind: ErrorKind::Msg(msg),
            stack: stack.to_vec(),
            pos,
        }))
    }

    fn deserializer(stack: &[StackElement], pos: TextPosition, e: crate::BoxedStdError) -> Self {
        Error(Arc::new(ErrorInner {
            kind: ErrorKind::Deserializer(e),
            stack: stack.to_vec(),
            pos,
        }))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = &*self.0;
        write!(f, "{} @ {}", &inner.kind, &inner.pos)?;
        if !inner.stack.is_empty() {
            write!(f, "\n\nXML element stack:\n")?;
            for (i, element) in inner.stack.iter().enumerate().rev() {
                writeln!(
                    f,
                    "{:4}: <{}> @ {}",
                    i,
                    element.name.borrow().repr_display(),
                    &element.pos
                )?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.kind.source()
    }
}

/// Information about an error, which should be enclosed in an `Arc` to make cloning cheap.
#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    stack: Vec<StackElement>,
    pos: TextPosition,
}

#[derive(Debug)]
enum ErrorKind {
    /// An error produced by `xml-rs`, including I/O errors and syntax errors.
    Xml(xml::reader::Error),

    /// An error returned by a deserializer.
    Deserializer(crate::BoxedStdError),

    Msg(String),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Xml(e) => e.msg().fmt(f),
            ErrorKind::Deserializer(e) => e.fmt(f),
            ErrorKind::Msg(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            // xml::reader::Error doesn't implement source so skip over it when
            // there's an underlying error.
            ErrorKind::Xml(e) => match e.kind() {
                xml::reader::ErrorKind::Syntax(_) => Some(e),
                xml::reader::ErrorKind::Io(io) => Some(io),
                xml::reader::ErrorKind::Utf8(utf) => Some(utf),
                xml::reader::ErrorKind::UnexpectedEof => Some(e),
            },
            ErrorKind::Deserializer(e) => Some(e.as_ref()),
            ErrorKind::Msg(_) => None,
        }
    }
}

/// Reads and returns the root element of the given XML document.
///
/// Note this does no validation of the name of the root element; the caller
/// chose the target type and with it the expected document shape.
pub fn read<R: std::io::Read, D: Deserialize>(source: R) -> Result<D, Error> {
    read_with(source, ReadOptions::default())
}

/// [`read`] with explicit [`ReadOptions`].
pub fn read_with<R: std::io::Read, D: Deserialize>(
    source: R,
    options: ReadOptions,
) -> Result<D, Error> {
    let mut reader = Reader::new(source, options);
    let v = D::deserialize(reader.root()?).map_err(|e| e.wrap(reader.stack(), reader.pos()))?;
    reader.end()?;
    Ok(v)
}

/// Returns the root element of the given XML document enclosed in a string.
///
/// This is simply `read(source.as_bytes())`; it's common enough to merit a
/// convenience method.
#[inline]
pub fn from_str<D: Deserialize>(source: &str) -> Result<D, Error> {
    read(source.as_bytes())
}

/// [`from_str`] with explicit [`ReadOptions`].
#[inline]
pub fn from_str_with<D: Deserialize>(source: &str, options: ReadOptions) -> Result<D, Error> {
    read_with(source.as_bytes(), options)
}

/// Reads XML and tracks the current depth.
struct Reader<R: std::io::Read> {
    inner: xml::reader::EventReader<R>,
    options: ReadOptions,

    // Invariant: `0 <= depth <= stack.len()`.
    // `depth` and `stack` grow simultaneously. `depth` shrinks first as
    // `ErasedReader::next` returns an `EndElement`, then `stack` follows in
    // `ErasedReader::return_to_depth`. This allows errors thrown while
    // processing an `EndElement` to return the full stack.
    depth: usize,
    stack: Vec<StackElement>,
}

impl<R: std::io::Read> Reader<R> {
    fn new(source: R, options: ReadOptions) -> Self {
        Self {
            inner: xml::reader::EventReader::new(source),
            options,
            stack: Vec::new(),
            depth: 0,
        }
    }

    /// Returns an [`ElementReader`] for the root element.
    ///
    /// Call only once.
    fn root(&mut self) -> Result<ElementReader<'_>, Error> {
        match self.inner.next().map_err(|e| Error::xml(&[], e))? {
            XmlEvent::StartDocument { .. } => {}
            o => {
                return Err(Error::msg(
                    &[],
                    self.inner.position(),
                    format!("expected StartDocument, got {:#?}", o),
                ))
            }
        }
        let options = self.options;
        match self.next()? {
            (Event::StartElement { attributes }, _pos) => Ok(ElementReader {
                reader: self,
                attributes,
                stack_pos: 0,
                options,
            }),
            (o, pos) => Err(Error::msg(
                &[],
                pos,
                format!("expected StartElement, got {:#?}", o),
            )),
        }
    }

    /// Ensures the document ends properly after a successful `root`.
    fn end(mut self) -> Result<(), Error> {
        // Like other readers, `root` is not obligated to consume the entire element.
        self.return_to_depth(0)?;

        // Find the `EndDocument`.
        loop {
            match self.inner.next().map_err(|e| Error::xml(&[], e))? {
                XmlEvent::EndDocument => return Ok(()),
                XmlEvent::ProcessingInstruction { .. } | XmlEvent::Comment { .. } => {}
                o => {
                    return Err(Error::msg(
                        &[],
                        self.inner.position(),
                        format!("expected EndDocument, got {:#?}", o),
                    ))
                }
            }
        }
    }

    fn pos(&self) -> TextPosition {
        self.inner.position()
    }
}

/// An event returned by [`ErasedReader::next`].
#[derive(Debug)]
enum Event {
    /// The start of an element.
    ///
    /// Use [`ErasedReader::stack`] to get its name. Not supplying it here
    /// saves an allocation without fighting the borrow checker.
    StartElement {
        attributes: Vec<xml::attribute::OwnedAttribute>,
    },

    /// The end of an element.
    ///
    /// The name is still on [`ErasedReader::stack`] until `return_to_depth`.
    EndElement,

    /// Characters, whether from `XmlEvent::CData` or `XmlEvent::Characters`.
    Characters(String),
}

/// Internal type-erased version of [`Reader`] for use by [`ElementReader`].
///
/// The type erasure reduces monomorphization bloat: there can be only one
/// implementation of `ElementReader` even if there are many supported
/// `std::io::Read` stream types.
trait ErasedReader {
    /// Returns the next element, updating the internal depth.
    ///
    /// On `StartElement`, appends the element to the stack. Does **not** do
    /// the reverse on `EndElement`. That is deferred until `return_to_depth`.
    /// This means that if a deserializer (which calls into `ErasedReader`
    /// indirectly, through `ElementReader`) returns a `VisitorError::Wrap`
    /// while examining the end element, the element in question is included
    /// in the produced `Error`'s stack. Notably, missing element/attribute
    /// errors happen between these calls.
    fn next(&mut self) -> Result<(Event, TextPosition), Error>;

    /// Returns to the given stack depth.
    ///
    /// This has two important responsibilities:
    /// 1.  Skips elements until depth reaches the target. If an `ElementReader`
    ///     is dropped without being processed, all of its elements are
    ///     consumed in this manner.
    /// 2.  Trims the last-ended element from the stack, as noted in `next` doc.
    fn return_to_depth(&mut self, depth: usize) -> Result<(), Error>;

    /// Returns the current stack.
    ///
    /// Initially empty, pushed on start element, popped on `return_to_depth`.
    fn stack(&self) -> &[StackElement];
}

impl<R: std::io::Read> ErasedReader for Reader<R> {
    fn next(&mut self) -> Result<(Event, TextPosition), Error> {
        // On entry, the stack should not have any excess items; any previous EndElements
        // should have been followed by return_to_depth.
        debug_assert_eq!(self.stack.len(), self.depth);

        loop {
            match self.inner.next() {
                Ok(XmlEvent::StartElement { name, attributes, .. }) => {
                    let pos = self.inner.position();

                    trace!("Starting {}, new depth {}", &name, self.depth + 1);
                    self.stack.push(StackElement { name, pos });
                    self.depth += 1;
                    return Ok((Event::StartElement { attributes }, pos));
                }
                Ok(XmlEvent::EndElement { name }) => {
                    trace!("Ending {}, new depth {}", &name, self.depth - 1);
                    let pos = self.inner.position();
                    self.depth -= 1;
                    debug_assert_eq!(&self.stack[self.depth].name, &name);
                    return Ok((Event::EndElement, pos));
                }
                Ok(XmlEvent::Characters(str)) | Ok(XmlEvent::CData(str)) => {
                    let pos = self.inner.position();
                    return Ok((Event::Characters(str), pos));
                }
                Ok(XmlEvent::Comment(_))
                | Ok(XmlEvent::Whitespace(_))
                | Ok(XmlEvent::ProcessingInstruction { .. })
                | Ok(XmlEvent::StartDocument { .. })
                | Ok(XmlEvent::EndDocument) => continue,
                Err(e) => return Err(Error::xml(&self.stack[..], e)),
            }
        }
    }

    fn return_to_depth(&mut self, depth: usize) -> Result<(), Error> {
        debug_assert!(
            self.depth >= depth,
            "cur depth {} < requested {}",
            self.depth,
            depth
        );
        while self.depth > depth {
            self.next()?;
            self.stack.truncate(self.depth);
        }
        self.stack.truncate(self.depth);
        Ok(())
    }

    fn stack(&self) -> &[StackElement] {
        &self.stack
    }
}

/// Reader for a particular element and its children (attributes, elements, and
/// text).
///
/// Typical flow:
///
/// 1.  Construction: `ElementReader` is constructed within the `tagged-xml`
///     library and is passed to a [`Deserialize`] impl by [`read`] (the root)
///     or to a [`FieldSink`] impl when reading the parent.
/// 2.  Identification: [`ElementReader::name`] returns the tag of the element.
/// 3.  Optional reading: see [`ElementReader::read_to`] and
///     [`ElementReader::read_string`].
///
/// If an element reader is dropped before `read_to` or `read_string` is
/// called, its parent will skip over all of its events before proceeding,
/// so the deserialization stream never gets out of sync.
pub struct ElementReader<'a> {
    reader: &'a mut dyn ErasedReader,
    attributes: Vec<xml::attribute::OwnedAttribute>,
    stack_pos: usize,
    options: ReadOptions,
}

impl<'a> ElementReader<'a> {
    /// Returns the local tag name of this element.
    #[inline]
    pub fn name(&self) -> &str {
        &self.reader.stack()[self.stack_pos].name.local_name
    }

    /// Returns the depth of this element within the XML document; the root is depth 1.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack_pos + 1
    }

    /// Returns the options the enclosing read call was started with.
    #[inline]
    pub fn options(&self) -> ReadOptions {
        self.options
    }

    /// Reads all attributes and elements to `visitor`.
    ///
    /// Always returns the `VisitorError::Propagate` form. Callers are expected
    /// to return `VisitorError`, and so `read_to` returning this type avoids
    /// them having to append `.map_err(VisitorError::Propagate)` to every call.
    pub fn read_to(mut self, visitor: &mut dyn ElementVisitor) -> Result<TextPosition, VisitorError> {
        let stack = self.reader.stack();
        let element_pos = stack[self.stack_pos].pos;
        for attr in self.attributes.drain(..) {
            visitor
                .attribute(&attr.name.local_name, attr.value)
                .map_err(|e| e.wrap(stack, element_pos))?;
        }
        loop {
            debug_assert_eq!(self.stack_pos, self.reader.stack().len() - 1);
            match self.reader.next()? {
                (Event::StartElement { attributes }, pos) => {
                    let child = ElementReader {
                        reader: &mut *self.reader,
                        attributes,
                        stack_pos: self.stack_pos + 1,
                        options: self.options,
                    };
                    if let Err(e) = visitor.element(child) {
                        let stack = self.reader.stack();
                        return Err(e.wrap(stack, pos))?;
                    }

                    // `visitor` is not obligated to use `child`. If it
                    // simply ignores it without returning error, skip events
                    // until we return to our proper depth.
                    self.reader
                        .return_to_depth(self.stack_pos + 1)
                        .map_err(VisitorError::Propagate)?;
                }
                (Event::EndElement, pos) => return Ok(pos),
                (Event::Characters(str), pos) => {
                    visitor.characters(str, pos).map_err(|e| {
                        let stack = self.reader.stack();
                        Error::deserializer(stack, pos, e)
                    })?;
                }
            }
        }
    }

    /// Reads the character data of this element into a string (or empty).
    ///
    /// Returns an error if there are any child elements.
    pub fn read_string(self) -> Result<String, VisitorError> {
        let mut out = String::new();
        loop {
            debug_assert_eq!(self.stack_pos, self.reader.stack().len() - 1);
            match self.reader.next().map_err(VisitorError::Propagate)? {
                (Event::StartElement { .. }, pos) => {
                    let stack = self.reader.stack();
                    let child = stack.last().unwrap();
                    return Err(VisitorError::Propagate(Error::msg(
                        stack,
                        pos,
                        format!("Unexpected element {} in string", &child.name),
                    )));
                }
                (Event::EndElement, _pos) => break,
                (Event::Characters(str), _pos) => {
                    if out.is_empty() {
                        out = str;
                    } else {
                        out.push_str(&str);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// The visitor drained by [`ElementReader::read_to`].
///
/// Visitor errors returned by `element` do not need context appended; the
/// caller will add the stack and position of the offending element.
pub trait ElementVisitor {
    /// Processes a given attribute of this element's start tag.
    #[allow(unused_variables)]
    fn attribute(&mut self, name: &str, value: String) -> Result<(), VisitorError> {
        Ok(())
    }

    /// Processes a child element.
    ///
    /// Returning `Ok(Some(child))` declines the element; the reader then
    /// skips the child's whole subtree before continuing.
    fn element<'a>(
        &mut self,
        child: ElementReader<'a>,
    ) -> Result<Option<ElementReader<'a>>, VisitorError> {
        Ok(Some(child))
    }

    /// Processes character data found directly within this element.
    #[allow(unused_variables)]
    fn characters(&mut self, s: String, pos: TextPosition) -> Result<(), crate::BoxedStdError> {
        Ok(())
    }
}

/// Deserializes the *content* of an element into a new value.
///
/// Content is defined as the element's attributes and child element/text
/// nodes. Implementations are the per-type adapters an external generation
/// layer would produce: typically a scratch builder of [`Slot`]/
/// [`Accumulator`] fields implementing [`FieldSink`], driven by
/// [`read_fields`] against the type's [`TypeDescriptor`], then finalized into
/// the immutable value once the element's closing tag has been reached.
///
/// Note that while `deserialize` *can* retrieve the name of the element via
/// `element.name()`, it typically *should not*. Checking the name is the
/// parent's responsibility for non-root elements.
pub trait Deserialize: Sized {
    fn deserialize(element: ElementReader<'_>) -> Result<Self, VisitorError>;
}

/// Typed receiver for the values [`read_fields`] routes out of a scope.
///
/// `field` is always an index into the descriptor's `fields` table, so a
/// sink is a `match` per callback. The default bodies fail loudly: a
/// callback the dispatcher invokes but the sink does not expect means the
/// descriptor and the sink disagree about the type's shape.
pub trait FieldSink {
    /// Value of the attribute binding `field`.
    fn attribute(&mut self, field: usize, value: String) -> Result<(), crate::BoxedStdError> {
        let _ = value;
        Err(unhandled_binding("attribute", field))
    }

    /// Collected character data of the text binding `field`.
    fn text(&mut self, field: usize, value: String) -> Result<(), crate::BoxedStdError> {
        let _ = value;
        Err(unhandled_binding("text", field))
    }

    /// Child element for the element binding `field`; recurse via `child`.
    fn element(&mut self, field: usize, child: ElementReader<'_>) -> Result<(), VisitorError> {
        let _ = child;
        Err(VisitorError::Wrap(unhandled_binding("element", field)))
    }

    /// Child element for the polymorphic binding `field`, resolved to the
    /// map variant registered under `tag`; recurse via `child`.
    fn variant(
        &mut self,
        field: usize,
        tag: &'static str,
        child: ElementReader<'_>,
    ) -> Result<(), VisitorError> {
        let _ = (tag, child);
        Err(VisitorError::Wrap(unhandled_binding("variant", field)))
    }
}

fn unhandled_binding(kind: &str, field: usize) -> crate::BoxedStdError {
    Box::new(SimpleError(format!(
        "No sink accepts the {} binding #{}",
        kind, field
    )))
}

/// Reads one scope's attributes and children per its descriptor.
///
/// This is the read-side driver: it lets the wrapper paths declared in
/// `desc` route each observed tag (entering wrapper elements transparently),
/// resolves polymorphic tags through the binding's map, collects text
/// bindings, and hands everything else to `sink`. Unresolved tags and
/// single-slot conflicts follow the policies the read call was started with.
pub fn read_fields(
    element: ElementReader<'_>,
    desc: &'static TypeDescriptor,
    sink: &mut dyn FieldSink,
) -> Result<(), VisitorError> {
    #[cfg(debug_assertions)]
    if let Err(e) = desc.validate() {
        panic!("invalid descriptor for {}: {}", desc.type_name, e);
    }
    let options = element.options();
    let mut seen = vec![false; desc.fields.len()].into_boxed_slice();
    let mut dispatcher = FieldDispatcher {
        desc,
        options,
        sink,
        seen: &mut seen,
        prefix: Vec::new(),
    };
    element.read_to(&mut dispatcher)?;
    Ok(())
}

/// One scope of descriptor-driven dispatch.
///
/// `prefix` holds the wrapper tags consumed so far; a fresh dispatcher with
/// an extended prefix is used for each wrapper element entered, sharing the
/// sink and the per-binding occupancy table with its parent.
struct FieldDispatcher<'a> {
    desc: &'static TypeDescriptor,
    options: ReadOptions,
    sink: &'a mut dyn FieldSink,
    seen: &'a mut [bool],
    prefix: Vec<&'static str>,
}

enum Route {
    Named,
    Variant(&'static str),
}

impl<'a> FieldDispatcher<'a> {
    fn in_scope(&self, f: &crate::schema::FieldBinding) -> bool {
        f.path.len() >= self.prefix.len() && f.path[..self.prefix.len()] == self.prefix[..]
    }

    fn wrapper_segment(&self, tag: &str) -> Option<&'static str> {
        let depth = self.prefix.len();
        self.desc.fields.iter().find_map(|f| {
            if self.in_scope(f) && f.path.len() > depth && f.path[depth] == tag {
                Some(f.path[depth])
            } else {
                None
            }
        })
    }

    fn claim(&mut self, field: usize, single: bool, tag: &str) -> Result<(), VisitorError> {
        if single && self.seen[field] {
            match self.options.slot_conflicts {
                SlotConflictPolicy::Fail => return Err(VisitorError::duplicate_element(tag)),
                SlotConflictPolicy::Overwrite => {
                    trace!("overwriting single-valued binding via <{}>", tag);
                }
            }
        }
        self.seen[field] = true;
        Ok(())
    }
}

impl<'a> ElementVisitor for FieldDispatcher<'a> {
    fn attribute(&mut self, name: &str, value: String) -> Result<(), VisitorError> {
        if self.prefix.is_empty() {
            for (i, f) in self.desc.fields.iter().enumerate() {
                if matches!(f.kind, BindingKind::Attribute) && f.name == name {
                    self.claim(i, true, name)?;
                    return self.sink.attribute(i, value).map_err(VisitorError::Wrap);
                }
            }
        }
        match self.options.unknown_elements {
            UnknownElementPolicy::Lenient => {
                trace!("dropping unresolved attribute {}", name);
                Ok(())
            }
            UnknownElementPolicy::Strict => Err(VisitorError::unresolved_attribute(name)),
        }
    }

    fn element<'r>(
        &mut self,
        child: ElementReader<'r>,
    ) -> Result<Option<ElementReader<'r>>, VisitorError> {
        let tag = child.name().to_owned();
        let depth = self.prefix.len();

        // Bindings anchored at this path position.
        let mut matched = None;
        for (i, f) in self.desc.fields.iter().enumerate() {
            if !self.in_scope(f) || f.path.len() != depth {
                continue;
            }
            match f.kind {
                BindingKind::Text | BindingKind::Element if f.name == tag => {
                    matched = Some((i, Route::Named));
                    break;
                }
                BindingKind::PolymorphicSingle(map) | BindingKind::PolymorphicList(map) => {
                    if let Some(v) = map.resolve(&tag) {
                        matched = Some((i, Route::Variant(v.tag)));
                        break;
                    }
                }
                _ => {}
            }
        }
        if let Some((i, route)) = matched {
            let f = &self.desc.fields[i];
            let single = !matches!(f.kind, BindingKind::PolymorphicList(_));
            self.claim(i, single, &tag)?;
            match route {
                Route::Named => match f.kind {
                    BindingKind::Text => {
                        let text = child.read_string()?;
                        self.sink.text(i, text).map_err(VisitorError::Wrap)?;
                    }
                    _ => self.sink.element(i, child)?,
                },
                Route::Variant(vtag) => {
                    trace!("resolved <{}> for binding {}", vtag, f.name);
                    self.sink.variant(i, vtag, child)?;
                }
            }
            return Ok(None);
        }

        // A wrapper segment? Read the child with an extended prefix, same
        // sink and occupancy table.
        if let Some(seg) = self.wrapper_segment(&tag) {
            trace!("entering wrapper <{}>", seg);
            let mut prefix = self.prefix.clone();
            prefix.push(seg);
            let mut nested = FieldDispatcher {
                desc: self.desc,
                options: self.options,
                sink: &mut *self.sink,
                seen: &mut *self.seen,
                prefix,
            };
            child.read_to(&mut nested)?;
            return Ok(None);
        }

        match self.options.unknown_elements {
            UnknownElementPolicy::Lenient => {
                trace!("skipping unresolved element <{}>", tag);
                Ok(Some(child))
            }
            UnknownElementPolicy::Strict => Err(VisitorError::unresolved_tag(&tag)),
        }
    }

    fn characters(&mut self, s: String, _pos: TextPosition) -> Result<(), crate::BoxedStdError> {
        if s.bytes().all(|b| matches!(b, 0x09 | 0x0A | 0x0D | 0x20)) {
            return Ok(());
        }
        match self.options.unknown_elements {
            UnknownElementPolicy::Lenient => Ok(()),
            UnknownElementPolicy::Strict => Err(Box::new(SimpleError(format!(
                "Unexpected character data {:?}",
                s
            )))),
        }
    }
}

/// Deserializes text data, whether character nodes or attribute values.
///
/// This matches the XML schema concept of "simple type".
pub trait ParseText: Sized {
    /// Parses the given text, which has *not* passed through whitespace
    /// normalization.
    fn parse(text: String) -> Result<Self, crate::BoxedStdError>;
}

impl ParseText for bool {
    fn parse(text: String) -> Result<Self, crate::BoxedStdError> {
        // https://www.w3.org/TR/xmlschema11-2/#boolean: "booleanRep ::= 'true' | 'false' | '1' | '0'
        match text.trim_matches(&['\x09', '\x0A', '\x0D', '\x20'][..]) {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(Box::new(SimpleError(format!("invalid bool {:?}", &text)))),
        }
    }
}

macro_rules! text_for_num {
    ( $t:ident ) => {
        impl ParseText for $t {
            fn parse(text: String) -> Result<Self, crate::BoxedStdError> {
                let text = text.trim_matches(&['\x09', '\x0A', '\x0D', '\x20'][..]);
                <$t as std::str::FromStr>::from_str(text).map_err(|e| Box::new(e).into())
            }
        }
    };
}

text_for_num!(i8);
text_for_num!(u8);
text_for_num!(i16);
text_for_num!(u16);
text_for_num!(i32);
text_for_num!(u32);
text_for_num!(i64);
text_for_num!(u64);
text_for_num!(f32);
text_for_num!(f64);

impl ParseText for String {
    fn parse(text: String) -> Result<Self, crate::BoxedStdError> {
        Ok(text)
    }
}

impl<T: ParseText> Deserialize for T {
    fn deserialize(element: ElementReader<'_>) -> Result<Self, VisitorError> {
        let str = element.read_string()?;
        T::parse(str).map_err(VisitorError::Wrap)
    }
}
