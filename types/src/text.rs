//! Line-oriented text round-trip for local objects.
//!
//! An object serializes as an optional `#objectKey` comment, any number of
//! `#filter` comments, then the data lines its type defines. Construction
//! goes through a registry mapping the wire type tag to a reader function,
//! replacing the source's reflective constructor lookup.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::errors::ObjectError;
use crate::filter::PrecomputedFilter;
use crate::key::ObjectKey;
use crate::meta::{
    AGGREGATE_META_OBJECT_TAG, Aggregation, AggregateMetaObject, META_OBJECT_TAG, MetaObject,
    PARAMETRIC_META_OBJECT_TAG, ParametricMetaObject,
};
use crate::object::LocalObject;
use crate::vector::{FLOAT_VECTOR_TAG, FloatVector};

/// Reads the data lines of one object. The first non-comment line has
/// already been consumed and is passed in; anything further is pulled from
/// the stream.
pub type DataReader =
    fn(&str, &mut dyn BufRead, &TypeRegistry) -> Result<Box<dyn LocalObject>, ObjectError>;

/// Registry of wire type tags to reader functions.
pub struct TypeRegistry {
    readers: HashMap<String, DataReader>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Registry holding the built-in object types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FLOAT_VECTOR_TAG, read_float_vector);
        registry.register(META_OBJECT_TAG, read_meta_object);
        registry.register(AGGREGATE_META_OBJECT_TAG, read_aggregate_meta_object);
        registry.register(PARAMETRIC_META_OBJECT_TAG, read_parametric_meta_object);
        registry
    }

    pub fn register(&mut self, tag: &str, reader: DataReader) {
        self.readers.insert(tag.to_owned(), reader);
    }

    pub fn reader(&self, tag: &str) -> Result<DataReader, ObjectError> {
        self.readers
            .get(tag)
            .copied()
            .ok_or_else(|| ObjectError::UnknownType(tag.to_owned()))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared registry with the built-in types.
pub static DEFAULT_REGISTRY: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::with_defaults);

/// Writes the full text form: key comment, filter comments, data lines.
///
/// Filters without a text form (the pivot map) are skipped; their cached
/// pivots have no stable representation outside the running process.
pub fn write_object(
    object: &dyn LocalObject,
    writer: &mut dyn Write,
) -> Result<(), ObjectError> {
    if let Some(key) = object.header().key() {
        writeln!(writer, "#objectKey {} {}", key.kind_tag(), key.to_text())?;
    }
    for filter in object.header().filters().iter() {
        match filter.to_text() {
            Ok(text) => writeln!(writer, "#filter {} {}", filter.type_tag(), text)?,
            Err(ObjectError::TextUnsupported(tag)) => {
                tracing::debug!("skipping non-textual filter {tag} while writing object");
            }
            Err(other) => return Err(other),
        }
    }
    object.write_data(writer)
}

/// Reads one object of the given type, parsing leading comment lines into
/// its key and filter chain. Returns `Ok(None)` on a clean end of stream.
pub fn read_object(
    reader: &mut dyn BufRead,
    tag: &str,
    registry: &TypeRegistry,
) -> Result<Option<Box<dyn LocalObject>>, ObjectError> {
    let mut key: Option<ObjectKey> = None;
    let mut filters: Vec<PrecomputedFilter> = Vec::new();

    loop {
        let Some(line) = next_line(reader)? else {
            return if key.is_none() && filters.is_empty() {
                Ok(None)
            } else {
                Err(ObjectError::UnexpectedEnd(
                    "object data after comment lines",
                ))
            };
        };
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            match comment.split_once(' ') {
                Some(("objectKey", rest)) => {
                    let (kind_tag, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    key = Some(ObjectKey::parse(kind_tag, text)?);
                }
                Some(("filter", rest)) => {
                    let (type_tag, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    filters.push(PrecomputedFilter::parse(type_tag, text)?);
                }
                _ => {
                    return Err(ObjectError::InvalidArgument(format!(
                        "unknown comment tag in {line:?}"
                    )));
                }
            }
            continue;
        }

        let mut object = registry.reader(tag)?(&line, reader, registry)?;
        if key.is_some() {
            object.header_mut().set_key(key);
        }
        for filter in filters {
            object.header_mut().filters_mut().attach(filter, true);
        }
        return Ok(Some(object));
    }
}

fn next_line(reader: &mut dyn BufRead) -> Result<Option<String>, ObjectError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn require_line(reader: &mut dyn BufRead, context: &'static str) -> Result<String, ObjectError> {
    next_line(reader)?.ok_or(ObjectError::UnexpectedEnd(context))
}

fn read_float_vector(
    first_line: &str,
    _reader: &mut dyn BufRead,
    _registry: &TypeRegistry,
) -> Result<Box<dyn LocalObject>, ObjectError> {
    Ok(Box::new(FloatVector::parse_data_line(first_line)?))
}

/// Header line: `<locator-or-empty>;<name1>;<Class1>;…` — an odd field
/// count means the first field is the locator.
fn parse_meta_header(line: &str) -> Result<(Option<String>, Vec<(String, String)>), ObjectError> {
    let fields: Vec<&str> = line.split(';').collect();
    let (locator, pairs) = if fields.len() % 2 == 1 {
        let locator = fields[0];
        (
            if locator.is_empty() {
                None
            } else {
                Some(locator.to_owned())
            },
            &fields[1..],
        )
    } else {
        (None, &fields[..])
    };
    let declared = pairs
        .chunks(2)
        .map(|pair| {
            if pair.len() != 2 || pair[0].is_empty() || pair[1].is_empty() {
                return Err(ObjectError::InvalidArgument(format!(
                    "malformed meta-object header {line:?}"
                )));
            }
            Ok((pair[0].to_owned(), pair[1].to_owned()))
        })
        .collect::<Result<Vec<_>, ObjectError>>()?;
    Ok((locator, declared))
}

fn read_meta_parts(
    first_line: &str,
    reader: &mut dyn BufRead,
    registry: &TypeRegistry,
) -> Result<MetaObject, ObjectError> {
    let (locator, declared) = parse_meta_header(first_line)?;
    let mut objects: Vec<(String, Box<dyn LocalObject>)> = Vec::with_capacity(declared.len());
    for (name, sub_tag) in declared {
        let line = require_line(reader, "meta-object descriptor")?;
        let object = registry.reader(&sub_tag)?(&line, reader, registry)?;
        objects.push((name, object));
    }
    Ok(MetaObject::new(locator.map(ObjectKey::basic), objects))
}

fn read_meta_object(
    first_line: &str,
    reader: &mut dyn BufRead,
    registry: &TypeRegistry,
) -> Result<Box<dyn LocalObject>, ObjectError> {
    Ok(Box::new(read_meta_parts(first_line, reader, registry)?))
}

fn read_aggregate_meta_object(
    first_line: &str,
    reader: &mut dyn BufRead,
    registry: &TypeRegistry,
) -> Result<Box<dyn LocalObject>, ObjectError> {
    let aggregation: Aggregation = first_line.trim().parse().map_err(|_| {
        ObjectError::InvalidArgument(format!("bad aggregation name {first_line:?}"))
    })?;
    let header = require_line(reader, "aggregate meta-object header")?;
    let meta = read_meta_parts(&header, reader, registry)?;
    Ok(Box::new(AggregateMetaObject::new(meta, aggregation)))
}

fn read_parametric_meta_object(
    first_line: &str,
    reader: &mut dyn BufRead,
    registry: &TypeRegistry,
) -> Result<Box<dyn LocalObject>, ObjectError> {
    let parameters: BTreeMap<String, serde_json::Value> = serde_json::from_str(first_line)
        .map_err(|e| ObjectError::InvalidArgument(format!("bad parameter map: {e}")))?;
    let header = require_line(reader, "parametric meta-object header")?;
    let meta = read_meta_parts(&header, reader, registry)?;
    Ok(Box::new(ParametricMetaObject::new(meta, parameters)))
}

/// Restartable stream of objects read from a text file.
pub struct TextObjectStream {
    path: PathBuf,
    tag: String,
    reader: BufReader<File>,
}

impl TextObjectStream {
    pub fn open(path: impl AsRef<Path>, tag: impl Into<String>) -> Result<Self, ObjectError> {
        let path = path.as_ref().to_path_buf();
        let reader = BufReader::new(File::open(&path)?);
        Ok(Self {
            path,
            tag: tag.into(),
            reader,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Next object from the stream, or `None` at end of file.
    pub fn next_object(
        &mut self,
        registry: &TypeRegistry,
    ) -> Result<Option<Box<dyn LocalObject>>, ObjectError> {
        read_object(&mut self.reader, &self.tag, registry)
    }

    /// Reopens the file so the next read starts from the first object.
    pub fn reset(&mut self) -> Result<(), ObjectError> {
        self.reader = BufReader::new(File::open(&self.path)?);
        Ok(())
    }
}
