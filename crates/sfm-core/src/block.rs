use crate::layout::{BlockField, BlockLayout, LayoutError};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat ordered sequence of scalars plus a symbolic offset table.
///
/// The values are what an optimizer sees; the offset table is what projection
/// models use to locate a field. The table is established by
/// [`ParameterBlock::apply_layout`] and repaired by pairwise
/// [`ParameterBlock::exchange`] or a bulk [`ParameterBlock::replace_values`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBlock<F: BlockField> {
    values: Vec<f64>,
    offsets: BTreeMap<F, usize>,
}

impl<F: BlockField> Default for ParameterBlock<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: BlockField> ParameterBlock<F> {
    /// Empty block: no storage and no offsets.
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            offsets: BTreeMap::new(),
        }
    }

    /// Block with storage but no registered offsets.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            values,
            offsets: BTreeMap::new(),
        }
    }

    /// Block whose offsets follow `layout`.
    pub fn with_layout(values: Vec<f64>, layout: &BlockLayout<F>) -> Result<Self, LayoutError> {
        let mut block = Self::from_values(values);
        block.apply_layout(layout)?;
        Ok(block)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn offset(&self, field: F) -> Option<usize> {
        self.offsets.get(&field).copied()
    }

    /// Registered `(field, offset)` pairs ordered by field.
    pub fn offsets(&self) -> impl Iterator<Item = (F, usize)> + '_ {
        self.offsets.iter().map(|(f, o)| (*f, *o))
    }

    /// Registers an offset without touching the values.
    pub fn set_offset(&mut self, field: F, offset: usize) {
        self.offsets.insert(field, offset);
    }

    /// Values of `field` read through the current offset table.
    pub fn value(&self, field: F) -> Result<&[f64], LayoutError> {
        let range = self.field_range(field)?;
        Ok(&self.values[range])
    }

    pub fn value_mut(&mut self, field: F) -> Result<&mut [f64], LayoutError> {
        let range = self.field_range(field)?;
        Ok(&mut self.values[range])
    }

    fn field_range(&self, field: F) -> Result<std::ops::Range<usize>, LayoutError> {
        let offset = self
            .offset(field)
            .ok_or(LayoutError::MissingField(field.name()))?;
        let width = field.width();
        if offset + width > self.values.len() {
            return Err(LayoutError::OutOfRange {
                field: field.name(),
                offset,
                width,
                len: self.values.len(),
            });
        }
        Ok(offset..offset + width)
    }

    fn ensure_len(&self, expected: usize) -> Result<(), LayoutError> {
        if self.values.is_empty() {
            return Err(LayoutError::EmptyBlock);
        }
        if self.values.len() != expected {
            return Err(LayoutError::WrongLength {
                expected,
                got: self.values.len(),
            });
        }
        Ok(())
    }

    /// Overwrites the offset table with the offsets declared by `layout`.
    ///
    /// The values are left untouched; the caller asserts they already follow
    /// the layout's order.
    pub fn apply_layout(&mut self, layout: &BlockLayout<F>) -> Result<(), LayoutError> {
        self.ensure_len(layout.len())?;
        self.offsets.clear();
        for spec in layout.fields() {
            self.offsets.insert(spec.field, spec.offset);
        }
        Ok(())
    }

    /// Checks that length and every offset agree with `layout`.
    pub fn check_layout(&self, layout: &BlockLayout<F>) -> Result<(), LayoutError> {
        self.ensure_len(layout.len())?;
        for spec in layout.fields() {
            let got = self
                .offset(spec.field)
                .ok_or(LayoutError::MissingField(spec.field.name()))?;
            if got != spec.offset {
                return Err(LayoutError::OffsetMismatch {
                    field: spec.field.name(),
                    expected: spec.offset,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Moves the scalar `field` to position `target`.
    ///
    /// Whatever field occupied `target` takes over the old position of
    /// `field`, so the table never maps two fields onto the same scalar.
    pub fn exchange(&mut self, field: F, target: usize) -> Result<(), LayoutError> {
        if field.width() != 1 {
            return Err(LayoutError::WidthMismatch {
                field: field.name(),
                width: field.width(),
            });
        }
        let src = self.field_range(field)?.start;
        if target >= self.values.len() {
            return Err(LayoutError::OutOfRange {
                field: field.name(),
                offset: target,
                width: 1,
                len: self.values.len(),
            });
        }
        if src == target {
            return Ok(());
        }

        let occupant = self
            .offsets
            .iter()
            .find(|(f, o)| **f != field && **o <= target && target < **o + f.width())
            .map(|(f, _)| *f);
        if let Some(other) = occupant {
            if other.width() != 1 {
                return Err(LayoutError::WidthMismatch {
                    field: other.name(),
                    width: other.width(),
                });
            }
            self.offsets.insert(other, src);
        }

        trace!("exchange {} {} -> {}", field.name(), src, target);
        self.values.swap(src, target);
        self.offsets.insert(field, target);
        Ok(())
    }

    /// Checks that every registered field lies inside the storage and that no
    /// two registered fields share a scalar.
    pub fn check_disjoint(&self) -> Result<(), LayoutError> {
        let mut ranges = Vec::with_capacity(self.offsets.len());
        for &field in self.offsets.keys() {
            ranges.push((field, self.field_range(field)?));
        }
        for (i, (first, a)) in ranges.iter().enumerate() {
            for (second, b) in &ranges[i + 1..] {
                if a.start < b.end && b.start < a.end {
                    return Err(LayoutError::Overlap {
                        first: first.name(),
                        second: second.name(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Replaces the whole storage in one step; the length must not change.
    pub fn replace_values(&mut self, values: Vec<f64>) -> Result<(), LayoutError> {
        self.ensure_len(values.len())?;
        self.values = values;
        Ok(())
    }
}
