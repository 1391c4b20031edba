//! Generic by-name attribute access over arena objects.
//!
//! The code generator describes each object type as an [`ObjectLayout`]: a
//! small ordered list of field names with a slot offset and a value kind.
//! Objects carry their layout id in a header word, so a lookup needs nothing
//! but the object ref and the attribute name. There is no inheritance and no
//! method resolution: a name either matches a field exactly or the lookup
//! fails with [`ObjectError::AttributeNotFound`].

use std::sync::{Arc, RwLock};

use ember_contracts::{LAYOUT_DESC_MAGIC, LAYOUT_DESC_VERSION};
use ember_value::{Arena, ArenaError, ArenaRef, Value, ValueKind, WORD_BYTES};

pub type LayoutId = u32;

/// Byte size of the object header (the layout id word).
pub const HEADER_BYTES: u32 = WORD_BYTES as u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: Box<[u8]>,
    /// Byte offset from the object base; word aligned and past the header.
    pub offset: u32,
    pub kind: ValueKind,
}

impl FieldSpec {
    pub fn new(name: impl AsRef<[u8]>, offset: u32, kind: ValueKind) -> Self {
        FieldSpec {
            name: name.as_ref().into(),
            offset,
            kind,
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    name: String,
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("duplicate field `{0}`")]
    DuplicateField(String),
    #[error("field `{field}` offset {offset} is not word aligned")]
    Misaligned { field: String, offset: u32 },
    #[error("field `{field}` overlaps the object header")]
    HeaderOverlap { field: String },
    #[error("field `{field}` offset {offset} is past the addressable object size")]
    OffsetTooLarge { field: String, offset: u32 },
    #[error("fields `{first}` and `{second}` share a slot")]
    SlotOverlap { first: String, second: String },
    #[error("unknown value kind tag {0}")]
    UnknownKind(u32),
    #[error("bad layout descriptor: {0}")]
    BadDescriptor(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("a {0} value is not an object")]
    NotAnObject(ValueKind),
    #[error("unknown layout id {0}")]
    UnknownLayout(u64),
    #[error("`{layout}` object has no attribute `{name}`")]
    AttributeNotFound { layout: String, name: String },
    #[error("field `{field}` holds {expected} values, got {found}")]
    KindMismatch {
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error(transparent)]
    Arena(#[from] ArenaError),
}

impl ObjectLayout {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self, LayoutError> {
        let mut by_offset: Vec<&FieldSpec> = Vec::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|g| g.name == f.name) {
                return Err(LayoutError::DuplicateField(f.name_lossy()));
            }
            if f.offset % HEADER_BYTES != 0 {
                return Err(LayoutError::Misaligned {
                    field: f.name_lossy(),
                    offset: f.offset,
                });
            }
            if f.offset < HEADER_BYTES {
                return Err(LayoutError::HeaderOverlap {
                    field: f.name_lossy(),
                });
            }
            // The slot's end must still fit the arena's u32 addressing.
            if f.offset > u32::MAX - HEADER_BYTES {
                return Err(LayoutError::OffsetTooLarge {
                    field: f.name_lossy(),
                    offset: f.offset,
                });
            }
            by_offset.push(f);
        }
        by_offset.sort_by_key(|f| f.offset);
        for pair in by_offset.windows(2) {
            if pair[0].offset == pair[1].offset {
                return Err(LayoutError::SlotOverlap {
                    first: pair[0].name_lossy(),
                    second: pair[1].name_lossy(),
                });
            }
        }
        Ok(ObjectLayout {
            name: name.into(),
            fields,
        })
    }

    /// Lays `fields` out in declaration order, one slot each.
    pub fn packed(
        name: impl Into<String>,
        fields: &[(&str, ValueKind)],
    ) -> Result<Self, LayoutError> {
        let specs = fields
            .iter()
            .enumerate()
            .map(|(i, (n, k))| FieldSpec::new(n, HEADER_BYTES * (i as u32 + 1), *k))
            .collect();
        ObjectLayout::new(name, specs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &[u8]) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Total object size in bytes, header included.
    pub fn size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.offset as usize + HEADER_BYTES as usize)
            .max()
            .unwrap_or(HEADER_BYTES as usize)
    }
}

/// Append-only table of layouts. Ids start at 1; 0 marks "no layout".
#[derive(Debug, Default)]
pub struct LayoutRegistry {
    layouts: RwLock<Vec<Arc<ObjectLayout>>>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, layout: ObjectLayout) -> LayoutId {
        let mut table = self.layouts.write().unwrap_or_else(|e| e.into_inner());
        table.push(Arc::new(layout));
        table.len() as LayoutId
    }

    pub fn get(&self, id: LayoutId) -> Option<Arc<ObjectLayout>> {
        let idx = (id as usize).checked_sub(1)?;
        let table = self.layouts.read().unwrap_or_else(|e| e.into_inner());
        table.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.layouts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn alloc_object(
    arena: &Arena,
    registry: &LayoutRegistry,
    id: LayoutId,
) -> Result<Value, ObjectError> {
    let layout = registry
        .get(id)
        .ok_or(ObjectError::UnknownLayout(id as u64))?;
    let r = arena.alloc(layout.size())?;
    arena.store_word(r, 0, id as u64)?;
    Ok(Value::Ref(r))
}

pub fn layout_of(
    arena: &Arena,
    registry: &LayoutRegistry,
    obj: Value,
) -> Result<(ArenaRef, Arc<ObjectLayout>), ObjectError> {
    let r = obj.as_ref().ok_or(ObjectError::NotAnObject(obj.kind()))?;
    let header = arena.load_word(r, 0)?;
    let layout = LayoutId::try_from(header)
        .ok()
        .and_then(|id| registry.get(id))
        .ok_or(ObjectError::UnknownLayout(header))?;
    Ok((r, layout))
}

fn not_found(layout: &ObjectLayout, name: &[u8]) -> ObjectError {
    ObjectError::AttributeNotFound {
        layout: layout.name.clone(),
        name: String::from_utf8_lossy(name).into_owned(),
    }
}

pub fn get_attr_generic(
    arena: &Arena,
    registry: &LayoutRegistry,
    obj: Value,
    name: &[u8],
) -> Result<Value, ObjectError> {
    let (r, layout) = layout_of(arena, registry, obj)?;
    let field = layout.field(name).ok_or_else(|| not_found(&layout, name))?;
    let word = arena.load_word(r, field.offset as usize)?;
    Ok(Value::from_word(field.kind, word, arena.generation()))
}

pub fn set_attr_generic(
    arena: &Arena,
    registry: &LayoutRegistry,
    obj: Value,
    name: &[u8],
    value: Value,
) -> Result<(), ObjectError> {
    let (r, layout) = layout_of(arena, registry, obj)?;
    let field = layout.field(name).ok_or_else(|| not_found(&layout, name))?;
    // A ref slot may be cleared back to None.
    let clears_ref = field.kind == ValueKind::Ref && value.is_none();
    if value.kind() != field.kind && !clears_ref {
        return Err(ObjectError::KindMismatch {
            field: field.name_lossy(),
            expected: field.kind,
            found: value.kind(),
        });
    }
    // Slots keep only offset and length; the target must be live now.
    if let Value::Ref(target) = value {
        arena.validate(target)?;
    }
    arena.store_word(r, field.offset as usize, value.to_word())?;
    Ok(())
}

fn read_u32_le(b: &[u8], off: usize) -> Option<u32> {
    let slice = b.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_chunk<'a>(b: &'a [u8], off: &mut usize) -> Result<&'a [u8], LayoutError> {
    let len = read_u32_le(b, *off).ok_or(LayoutError::BadDescriptor("truncated length"))? as usize;
    *off += 4;
    let end = off
        .checked_add(len)
        .ok_or(LayoutError::BadDescriptor("length overflow"))?;
    let chunk = b
        .get(*off..end)
        .ok_or(LayoutError::BadDescriptor("truncated name"))?;
    *off = end;
    Ok(chunk)
}

/// Parses an `EMLY` v1 layout descriptor produced by the code generator.
pub fn parse_layout_desc_v1(desc: &[u8]) -> Result<ObjectLayout, LayoutError> {
    if desc.len() < 12 || &desc[0..4] != LAYOUT_DESC_MAGIC {
        return Err(LayoutError::BadDescriptor("bad magic"));
    }
    let ver = read_u32_le(desc, 4).ok_or(LayoutError::BadDescriptor("truncated header"))?;
    if ver != LAYOUT_DESC_VERSION {
        return Err(LayoutError::BadDescriptor("unsupported version"));
    }
    let mut off = 8usize;
    let name = read_chunk(desc, &mut off)?;
    let name = std::str::from_utf8(name)
        .map_err(|_| LayoutError::BadDescriptor("layout name is not utf-8"))?
        .to_string();
    let count = read_u32_le(desc, off).ok_or(LayoutError::BadDescriptor("truncated count"))?;
    off += 4;

    let mut fields = Vec::new();
    for _ in 0..count {
        let field_name = read_chunk(desc, &mut off)?;
        let offset =
            read_u32_le(desc, off).ok_or(LayoutError::BadDescriptor("truncated field"))?;
        let tag = read_u32_le(desc, off + 4).ok_or(LayoutError::BadDescriptor("truncated field"))?;
        off += 8;
        let kind = ValueKind::from_tag(tag).ok_or(LayoutError::UnknownKind(tag))?;
        fields.push(FieldSpec::new(field_name, offset, kind));
    }
    if off != desc.len() {
        return Err(LayoutError::BadDescriptor("trailing bytes"));
    }
    ObjectLayout::new(name, fields)
}

pub fn encode_layout_desc_v1(layout: &ObjectLayout) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(LAYOUT_DESC_MAGIC);
    out.extend_from_slice(&LAYOUT_DESC_VERSION.to_le_bytes());
    out.extend_from_slice(&(layout.name.len() as u32).to_le_bytes());
    out.extend_from_slice(layout.name.as_bytes());
    out.extend_from_slice(&(layout.fields.len() as u32).to_le_bytes());
    for f in &layout.fields {
        out.extend_from_slice(&(f.name.len() as u32).to_le_bytes());
        out.extend_from_slice(&f.name);
        out.extend_from_slice(&f.offset.to_le_bytes());
        out.extend_from_slice(&f.kind.tag().to_le_bytes());
    }
    out
}
