//! Reading and writing tagged trees, the compressed self-describing format the host server keeps its save data in.
//!
//! A file is a gzip stream holding a single named tag: one tag id byte, a (conventionally empty) name, then the
//! payload of the root value. Every payload is big-endian; strings are a `u16` byte length followed by
//! [modified UTF-8](mutf8); arrays and lists carry an `i32` element count. Compounds are a sequence of
//! `(id, name, payload)` triples closed by a zero byte.
//!
//! The harness only ever loads a whole tree, edits a couple of fields and writes the whole tree back, so the API is
//! value based: [`decode`] and [`encode`] for streams, [`read_file`] and [`write_file`] for `level.dat` style files.
//!
//! # Examples
//!
//! ```
//! use mch::nbt::{self, Compound, List, Tag};
//!
//! let mut root = Compound::new();
//! root.insert("LevelName", Tag::String("world".to_string()));
//! root.insert("Enabled", Tag::List(List::strings(["vanilla"])));
//!
//! let mut bytes = Vec::new();
//! nbt::encode(&Tag::Compound(root.clone()), &mut bytes).unwrap();
//! assert_eq!(nbt::decode(bytes.as_slice()).unwrap(), Tag::Compound(root));
//! ```

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use thiserror::Error;

pub mod mutf8;

/// Deepest nesting of lists and compounds accepted when decoding.
pub const MAX_DEPTH: usize = 512;

/// Errors produced while reading or writing a tagged tree.
///
/// Everything except [`Error::Io`] means the tree itself is malformed.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A tag id byte outside the known range.
    #[error("malformed tree: unknown tag id {0}")]
    UnknownTag(u8),
    /// A list element whose tag differs from the list's declared element tag.
    #[error("malformed tree: list of {expected:?} cannot hold {found:?}")]
    ListTagMismatch {
        /// Declared element tag.
        expected: TagId,
        /// Tag of the offending element.
        found: TagId,
    },
    /// An array, list or string length that is negative or does not fit its prefix.
    #[error("malformed tree: invalid length {0}")]
    InvalidLength(i64),
    /// String bytes that are not valid modified UTF-8.
    #[error("malformed tree: invalid string data")]
    InvalidString,
    /// An end tag where a value was required.
    #[error("malformed tree: unexpected end tag")]
    UnexpectedEnd,
    /// Nesting deeper than [`MAX_DEPTH`].
    #[error("malformed tree: nesting deeper than 512 levels")]
    TooDeep,
    /// The root of a file is not a compound.
    #[error("malformed tree: root is {0:?}, expected a compound")]
    RootNotCompound(TagId),
}

impl Error {
    /// Whether this error describes a malformed tree rather than an i/o failure.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Error::Io(_))
    }
}

/// Tag id bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagId {
    /// Closes a compound; also the element tag of an empty list.
    End = 0,
    /// Signed 8-bit integer.
    Byte = 1,
    /// Signed 16-bit integer.
    Short = 2,
    /// Signed 32-bit integer.
    Int = 3,
    /// Signed 64-bit integer.
    Long = 4,
    /// 32-bit float.
    Float = 5,
    /// 64-bit float.
    Double = 6,
    /// Length-prefixed bytes.
    ByteArray = 7,
    /// Length-prefixed modified UTF-8.
    String = 8,
    /// Element tag, length, then unnamed values.
    List = 9,
    /// Named values up to an end tag.
    Compound = 10,
    /// Length-prefixed 32-bit integers.
    IntArray = 11,
    /// Length-prefixed 64-bit integers.
    LongArray = 12,
}

impl TryFrom<u8> for TagId {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0 => TagId::End,
            1 => TagId::Byte,
            2 => TagId::Short,
            3 => TagId::Int,
            4 => TagId::Long,
            5 => TagId::Float,
            6 => TagId::Double,
            7 => TagId::ByteArray,
            8 => TagId::String,
            9 => TagId::List,
            10 => TagId::Compound,
            11 => TagId::IntArray,
            12 => TagId::LongArray,
            _ => return Err(Error::UnknownTag(byte)),
        })
    }
}

/// A single value in a tagged tree. Each variant mirrors the [`TagId`] of the same name.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    /// See [`TagId::Byte`].
    Byte(i8),
    /// See [`TagId::Short`].
    Short(i16),
    /// See [`TagId::Int`].
    Int(i32),
    /// See [`TagId::Long`].
    Long(i64),
    /// See [`TagId::Float`].
    Float(f32),
    /// See [`TagId::Double`].
    Double(f64),
    /// See [`TagId::ByteArray`].
    ByteArray(Vec<u8>),
    /// See [`TagId::String`].
    String(String),
    /// See [`TagId::List`].
    List(List),
    /// See [`TagId::Compound`].
    Compound(Compound),
    /// See [`TagId::IntArray`].
    IntArray(Vec<i32>),
    /// See [`TagId::LongArray`].
    LongArray(Vec<i64>),
}

impl Tag {
    /// The id byte written before this value.
    #[must_use]
    pub fn id(&self) -> TagId {
        match self {
            Tag::Byte(_) => TagId::Byte,
            Tag::Short(_) => TagId::Short,
            Tag::Int(_) => TagId::Int,
            Tag::Long(_) => TagId::Long,
            Tag::Float(_) => TagId::Float,
            Tag::Double(_) => TagId::Double,
            Tag::ByteArray(_) => TagId::ByteArray,
            Tag::String(_) => TagId::String,
            Tag::List(_) => TagId::List,
            Tag::Compound(_) => TagId::Compound,
            Tag::IntArray(_) => TagId::IntArray,
            Tag::LongArray(_) => TagId::LongArray,
        }
    }

    /// The string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(value) => Some(value),
            _ => None,
        }
    }

    /// The list, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Tag::List(list) => Some(list),
            _ => None,
        }
    }

    /// The compound, if this is a compound.
    #[must_use]
    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    /// Mutable access to the compound, if this is a compound.
    pub fn as_compound_mut(&mut self) -> Option<&mut Compound> {
        match self {
            Tag::Compound(compound) => Some(compound),
            _ => None,
        }
    }
}

/// A homogeneous list. The element tag is bound by the first element and checked for every later one.
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    element: TagId,
    items: Vec<Tag>,
}

impl List {
    /// An empty list. Empty lists are written with the end tag as their element tag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            element: TagId::End,
            items: Vec::new(),
        }
    }

    /// Builds a list, failing if the items do not all share one tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListTagMismatch`] for the first item whose tag differs from the first item's.
    pub fn from_items(items: Vec<Tag>) -> Result<Self, Error> {
        let mut list = Self::new();
        for item in items {
            list.push(item)?;
        }
        Ok(list)
    }

    /// A list of strings.
    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<Tag> = values.into_iter().map(|s| Tag::String(s.into())).collect();
        Self {
            element: if items.is_empty() {
                TagId::End
            } else {
                TagId::String
            },
            items,
        }
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListTagMismatch`] if the item's tag differs from the list's element tag.
    pub fn push(&mut self, item: Tag) -> Result<(), Error> {
        if self.items.is_empty() {
            self.element = item.id();
        } else if item.id() != self.element {
            return Err(Error::ListTagMismatch {
                expected: self.element,
                found: item.id(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// The declared element tag.
    #[must_use]
    pub fn element(&self) -> TagId {
        self.element
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.items.iter()
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

/// A named map of values.
///
/// Lookups ignore order, but entries keep the order they were read or inserted in so that an untouched tree is
/// written back byte for byte.
#[derive(Clone, Debug, Default)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    /// An empty compound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, tag)| tag)
    }

    /// Mutable access to the value stored under `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tag> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, tag)| tag)
    }

    /// Inserts a value, replacing an existing entry in place or appending a new one.
    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) -> Option<Tag> {
        let name = name.into();
        match self.get_mut(&name) {
            Some(slot) => Some(std::mem::replace(slot, tag)),
            None => {
                self.entries.push((name, tag));
                None
            }
        }
    }

    /// Removes and returns the value stored under `name`.
    pub fn remove(&mut self, name: &str) -> Option<Tag> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns the compound stored under `name`, inserting an empty one if there is none.
    ///
    /// Returns `None` if `name` holds something other than a compound.
    pub fn compound_entry(&mut self, name: &str) -> Option<&mut Compound> {
        if self.get(name).is_none() {
            self.insert(name, Tag::Compound(Compound::new()));
        }
        self.get_mut(name).and_then(Tag::as_compound_mut)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order they were read or inserted.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.entries.iter().map(|(name, tag)| (name.as_str(), tag))
    }
}

impl PartialEq for Compound {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, tag)| other.get(name).is_some_and(|o| o == tag))
    }
}

/// Decodes a gzip-compressed tagged tree, returning its root value.
///
/// # Errors
///
/// Fails on i/o errors and on any malformed tree.
pub fn decode<R: Read>(reader: R) -> Result<Tag, Error> {
    let mut reader = BufReader::new(GzDecoder::new(reader));
    let id = TagId::try_from(read_u8(&mut reader)?)?;
    if id == TagId::End {
        return Err(Error::UnexpectedEnd);
    }
    read_string(&mut reader)?;
    read_payload(&mut reader, id, 0)
}

/// Encodes `tag` as a gzip-compressed tagged tree with an empty root name.
///
/// # Errors
///
/// Fails on i/o errors, on inconsistent lists and on lengths that do not fit their prefix.
pub fn encode<W: Write>(tag: &Tag, writer: W) -> Result<(), Error> {
    let mut writer = BufWriter::new(GzEncoder::new(writer, Compression::default()));
    writer.write_all(&[tag.id() as u8])?;
    write_string(&mut writer, "")?;
    write_payload(&mut writer, tag)?;
    writer
        .into_inner()
        .map_err(io::IntoInnerError::into_error)?
        .finish()?;
    Ok(())
}

/// Reads a tagged-tree file whose root must be a compound.
///
/// # Errors
///
/// Fails if the file cannot be read, is malformed, or its root is not a compound.
pub fn read_file(path: &Path) -> Result<Compound, Error> {
    match decode(File::open(path)?)? {
        Tag::Compound(root) => Ok(root),
        other => Err(Error::RootNotCompound(other.id())),
    }
}

/// Writes `root` to a tagged-tree file, replacing it.
///
/// # Errors
///
/// Fails if the file cannot be written or the tree cannot be encoded.
pub fn write_file(path: &Path, root: &Compound) -> Result<(), Error> {
    let mut bytes = Vec::new();
    encode(&Tag::Compound(root.clone()), &mut bytes)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_array<const N: usize>(reader: &mut impl Read) -> io::Result<[u8; N]> {
    let mut buf = [0; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    Ok(read_array::<1>(reader)?[0])
}

fn read_len(reader: &mut impl Read) -> Result<usize, Error> {
    let len = i32::from_be_bytes(read_array(reader)?);
    usize::try_from(len).map_err(|_| Error::InvalidLength(i64::from(len)))
}

fn read_string(reader: &mut impl Read) -> Result<String, Error> {
    let len = u16::from_be_bytes(read_array(reader)?);
    let mut bytes = vec![0; usize::from(len)];
    reader.read_exact(&mut bytes)?;
    mutf8::decode(&bytes).ok_or(Error::InvalidString)
}

fn read_vec<T>(
    reader: &mut impl Read,
    mut read: impl FnMut(&mut dyn Read) -> Result<T, Error>,
) -> Result<Vec<T>, Error> {
    let len = read_len(reader)?;
    // Lengths come from untrusted input; grow as elements actually arrive.
    let mut values = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        values.push(read(reader)?);
    }
    Ok(values)
}

fn read_payload(reader: &mut impl Read, id: TagId, depth: usize) -> Result<Tag, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep);
    }
    Ok(match id {
        TagId::End => return Err(Error::UnexpectedEnd),
        TagId::Byte => Tag::Byte(i8::from_be_bytes(read_array(reader)?)),
        TagId::Short => Tag::Short(i16::from_be_bytes(read_array(reader)?)),
        TagId::Int => Tag::Int(i32::from_be_bytes(read_array(reader)?)),
        TagId::Long => Tag::Long(i64::from_be_bytes(read_array(reader)?)),
        TagId::Float => Tag::Float(f32::from_be_bytes(read_array(reader)?)),
        TagId::Double => Tag::Double(f64::from_be_bytes(read_array(reader)?)),
        TagId::ByteArray => {
            let len = read_len(reader)?;
            let mut bytes = Vec::new();
            reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
            if bytes.len() != len {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            Tag::ByteArray(bytes)
        }
        TagId::String => Tag::String(read_string(reader)?),
        TagId::List => {
            let element = TagId::try_from(read_u8(reader)?)?;
            let items = read_vec(reader, |r| read_payload(&mut &mut *r, element, depth + 1))?;
            if element == TagId::End && !items.is_empty() {
                return Err(Error::UnexpectedEnd);
            }
            Tag::List(List { element, items })
        }
        TagId::Compound => {
            let mut compound = Compound::new();
            loop {
                let id = TagId::try_from(read_u8(reader)?)?;
                if id == TagId::End {
                    break;
                }
                let name = read_string(reader)?;
                let tag = read_payload(reader, id, depth + 1)?;
                compound.insert(name, tag);
            }
            Tag::Compound(compound)
        }
        TagId::IntArray => Tag::IntArray(read_vec(reader, |r| {
            Ok(i32::from_be_bytes(read_array(&mut &mut *r)?))
        })?),
        TagId::LongArray => Tag::LongArray(read_vec(reader, |r| {
            Ok(i64::from_be_bytes(read_array(&mut &mut *r)?))
        })?),
    })
}

fn write_len(writer: &mut impl Write, len: usize) -> Result<(), Error> {
    let len = i32::try_from(len).map_err(|_| Error::InvalidLength(i64::MAX))?;
    writer.write_all(&len.to_be_bytes())?;
    Ok(())
}

fn write_string(writer: &mut impl Write, value: &str) -> Result<(), Error> {
    let bytes = mutf8::encode(value);
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::InvalidLength(i64::try_from(bytes.len()).unwrap_or(i64::MAX)))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

fn write_payload(writer: &mut impl Write, tag: &Tag) -> Result<(), Error> {
    match tag {
        Tag::Byte(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::Short(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::Int(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::Long(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::Float(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::Double(value) => writer.write_all(&value.to_be_bytes())?,
        Tag::ByteArray(values) => {
            write_len(writer, values.len())?;
            writer.write_all(values)?;
        }
        Tag::String(value) => write_string(writer, value)?,
        Tag::List(list) => {
            writer.write_all(&[list.element as u8])?;
            write_len(writer, list.items.len())?;
            for item in &list.items {
                if item.id() != list.element {
                    return Err(Error::ListTagMismatch {
                        expected: list.element,
                        found: item.id(),
                    });
                }
                write_payload(writer, item)?;
            }
        }
        Tag::Compound(compound) => {
            for (name, tag) in compound.iter() {
                writer.write_all(&[tag.id() as u8])?;
                write_string(writer, name)?;
                write_payload(writer, tag)?;
            }
            writer.write_all(&[TagId::End as u8])?;
        }
        Tag::IntArray(values) => {
            write_len(writer, values.len())?;
            for value in values {
                writer.write_all(&value.to_be_bytes())?;
            }
        }
        Tag::LongArray(values) => {
            write_len(writer, values.len())?;
            for value in values {
                writer.write_all(&value.to_be_bytes())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tag: &Tag) -> Tag {
        let mut bytes = Vec::new();
        encode(tag, &mut bytes).unwrap();
        decode(bytes.as_slice()).unwrap()
    }

    fn gzip(raw: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    }

    fn sample() -> Compound {
        let mut inner = Compound::new();
        inner.insert("name", Tag::String("vanilla".to_string()));
        inner.insert("weight", Tag::Double(0.25));

        let mut root = Compound::new();
        root.insert("Byte", Tag::Byte(-3));
        root.insert("Short", Tag::Short(-300));
        root.insert("Int", Tag::Int(19_133));
        root.insert("Long", Tag::Long(-1_234_567_890_123));
        root.insert("Float", Tag::Float(1.5));
        root.insert("Bytes", Tag::ByteArray(vec![0, 1, 255]));
        root.insert("Ints", Tag::IntArray(vec![i32::MIN, 0, i32::MAX]));
        root.insert("Longs", Tag::LongArray(vec![]));
        root.insert(
            "Packs",
            Tag::List(List::from_items(vec![Tag::Compound(inner)]).unwrap()),
        );
        root
    }

    #[test]
    fn nested_compound_of_list_of_compound_survives() {
        let root = Tag::Compound(sample());
        assert_eq!(roundtrip(&root), root);
    }

    #[test]
    fn empty_compound_and_single_element_list_survive() {
        let empty = Tag::Compound(Compound::new());
        assert_eq!(roundtrip(&empty), empty);

        let single = Tag::List(List::strings(["only"]));
        assert_eq!(roundtrip(&single), single);
    }

    #[test]
    fn empty_list_is_written_with_end_element() {
        let mut root = Compound::new();
        root.insert("Disabled", Tag::List(List::strings(Vec::<String>::new())));
        let decoded = roundtrip(&Tag::Compound(root));
        let list = decoded
            .as_compound()
            .and_then(|c| c.get("Disabled"))
            .and_then(Tag::as_list)
            .unwrap();
        assert!(list.is_empty());
        assert_eq!(list.element(), TagId::End);
    }

    #[test]
    fn re_encoding_is_byte_identical() {
        let mut first = Vec::new();
        encode(&Tag::Compound(sample()), &mut first).unwrap();
        let decoded = decode(first.as_slice()).unwrap();
        let mut second = Vec::new();
        encode(&decoded, &mut second).unwrap();

        let mut raw_first = Vec::new();
        GzDecoder::new(first.as_slice())
            .read_to_end(&mut raw_first)
            .unwrap();
        let mut raw_second = Vec::new();
        GzDecoder::new(second.as_slice())
            .read_to_end(&mut raw_second)
            .unwrap();
        assert_eq!(raw_first, raw_second);
    }

    #[test]
    fn outer_wrapper_has_empty_name() {
        let mut bytes = Vec::new();
        encode(&Tag::Compound(Compound::new()), &mut bytes).unwrap();
        let mut raw = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw, [10, 0, 0, 0]);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = decode(gzip(&[10, 0, 0, 42, 0, 1, b'x']).as_slice()).unwrap_err();
        assert!(matches!(err, Error::UnknownTag(42)));
        assert!(err.is_malformed());
    }

    #[test]
    fn negative_length_is_malformed() {
        let err = decode(gzip(&[11, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]).as_slice()).unwrap_err();
        assert!(matches!(err, Error::InvalidLength(-1)));
    }

    #[test]
    fn mixed_list_is_rejected() {
        let err = List::from_items(vec![Tag::Int(1), Tag::String("two".to_string())]).unwrap_err();
        assert!(matches!(
            err,
            Error::ListTagMismatch {
                expected: TagId::Int,
                found: TagId::String
            }
        ));
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        let err = decode(gzip(&[10, 0, 0, 3, 0, 1, b'x', 0]).as_slice()).unwrap_err();
        assert!(!err.is_malformed());
    }

    #[test]
    fn compound_equality_ignores_order() {
        let mut a = Compound::new();
        a.insert("x", Tag::Int(1));
        a.insert("y", Tag::Int(2));
        let mut b = Compound::new();
        b.insert("y", Tag::Int(2));
        b.insert("x", Tag::Int(1));
        assert_eq!(a, b);
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut compound = sample();
        compound.insert("Int", Tag::Int(7));
        assert_eq!(compound.iter().nth(2), Some(("Int", &Tag::Int(7))));
    }
}
