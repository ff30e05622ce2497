use std::fmt::Debug;
use thiserror::Error;

/// Symbolic identifier of a field stored inside a [`crate::ParameterBlock`].
///
/// Each field occupies `width()` consecutive values of the block.
pub trait BlockField: Copy + Ord + Debug + Send + Sync + 'static {
    /// Number of consecutive scalars the field occupies.
    fn width(self) -> usize;
    /// Human readable name used in error messages.
    fn name(self) -> &'static str;
}

/// Errors raised when a parameter block does not satisfy a layout contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The block storage was never filled.
    #[error("parameter block is not initialized")]
    EmptyBlock,
    #[error("parameter block has length {got}, expected {expected}")]
    WrongLength { expected: usize, got: usize },
    #[error("field {0} has no registered offset")]
    MissingField(&'static str),
    #[error("field {field} at offset {offset} (width {width}) exceeds block length {len}")]
    OutOfRange {
        field: &'static str,
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("fields {first} and {second} overlap")]
    Overlap {
        first: &'static str,
        second: &'static str,
    },
    #[error("field {0} is declared twice")]
    DuplicateField(&'static str),
    #[error("field {field} is at offset {got}, expected {expected}")]
    OffsetMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    /// Pairwise exchange only works for scalar fields.
    #[error("field {field} has width {width}, pairwise exchange needs width 1")]
    WidthMismatch { field: &'static str, width: usize },
    /// An unregistered field is expected at `offset`, but a registered one sits there.
    #[error("slot {offset} is reserved for unregistered field {field}")]
    SlotTaken { field: &'static str, offset: usize },
}

/// One entry of a layout: where a field starts inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec<F: BlockField> {
    pub field: F,
    pub offset: usize,
}

impl<F: BlockField> FieldSpec<F> {
    pub const fn new(field: F, offset: usize) -> Self {
        Self { field, offset }
    }

    /// Half-open index range covered by the field.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.field.width()
    }
}

/// Fixed association list `{field, offset, width}` describing a block layout.
///
/// Layouts are constants of a projection model variant. They are declared as
/// `'static` tables and checked once with [`BlockLayout::validate`].
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout<F: BlockField> {
    fields: &'static [FieldSpec<F>],
    len: usize,
}

impl<F: BlockField> BlockLayout<F> {
    pub const fn new(fields: &'static [FieldSpec<F>], len: usize) -> Self {
        Self { fields, len }
    }

    /// Declared total number of scalars in the block.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Field entries in declaration order.
    pub fn fields(&self) -> &'static [FieldSpec<F>] {
        self.fields
    }

    pub fn spec(&self, field: F) -> Option<&'static FieldSpec<F>> {
        self.fields.iter().find(|s| s.field == field)
    }

    pub fn offset(&self, field: F) -> Option<usize> {
        self.spec(field).map(|s| s.offset)
    }

    /// Checks that fields are unique, in range and pairwise disjoint.
    pub fn validate(&self) -> Result<(), LayoutError> {
        for (i, spec) in self.fields.iter().enumerate() {
            let range = spec.range();
            if range.end > self.len {
                return Err(LayoutError::OutOfRange {
                    field: spec.field.name(),
                    offset: spec.offset,
                    width: spec.field.width(),
                    len: self.len,
                });
            }
            for other in &self.fields[i + 1..] {
                if other.field == spec.field {
                    return Err(LayoutError::DuplicateField(spec.field.name()));
                }
                let other_range = other.range();
                if range.start < other_range.end && other_range.start < range.end {
                    return Err(LayoutError::Overlap {
                        first: spec.field.name(),
                        second: other.field.name(),
                    });
                }
            }
        }
        Ok(())
    }
}
