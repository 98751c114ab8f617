use std::collections::BTreeMap;

use regex::Regex;

use crate::data::hit::CellId;
use crate::error::{CoreError, Result};

/// A named bit range inside a cell identifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitField {
    pub name: String,
    pub offset: u32,
    pub width: u32,
    pub signed: bool,
}

impl BitField {
    /// Bits covered by this field, in place
    #[inline]
    pub fn mask(&self) -> u64 {
        let low = if self.width >= 64 { u64::MAX } else { (1u64 << self.width) - 1 };
        low << self.offset
    }

    /// Smallest and largest value the field can hold
    pub fn range(&self) -> (i128, i128) {
        if self.signed {
            (-(1i128 << (self.width - 1)), (1i128 << (self.width - 1)) - 1)
        } else {
            (0, (1i128 << self.width) - 1)
        }
    }

    #[inline]
    pub fn value(&self, cell_id: CellId) -> i64 {
        let raw = (cell_id & self.mask()) >> self.offset;
        if self.signed && self.width < 64 && raw & (1u64 << (self.width - 1)) != 0 {
            (raw as i128 - (1i128 << self.width)) as i64
        } else {
            raw as i64
        }
    }

    /// Return `cell_id` with this field replaced by `value`
    pub fn set(&self, cell_id: CellId, value: i64) -> Result<CellId> {
        let (lo, hi) = self.range();
        if (value as i128) < lo || (value as i128) > hi {
            return Err(CoreError::InvalidCellId {
                cell_id,
                reason: format!("value {} out of range [{}, {}] for field '{}'", value, lo, hi, self.name),
            });
        }
        let bits = ((value as u64) << self.offset) & self.mask();
        Ok((cell_id & !self.mask()) | bits)
    }
}

/// Bit-field coder for cell identifiers, parsed from descriptors such as
/// `system:8,layer:4,x:32:-16,y:-16`. Each entry is `name:width` or
/// `name:offset:width`; a negative width marks a signed field and an omitted
/// offset continues right after the previous field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdSpec {
    descriptor: String,
    fields: Vec<BitField>,
    used_bits: u64,
}

impl IdSpec {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let re = Regex::new(r"^\s*(\w+)\s*:\s*(?:(\d+)\s*:\s*)?(-?\d+)\s*$")
            .map_err(|e| CoreError::Descriptor(e.to_string()))?;

        let mut fields: Vec<BitField> = Vec::new();
        let mut used_bits = 0u64;
        let mut next_offset = 0u32;

        for entry in descriptor.split(',').filter(|s| !s.trim().is_empty()) {
            let caps = re
                .captures(entry)
                .ok_or_else(|| CoreError::Descriptor(format!("malformed field '{}' in '{}'", entry.trim(), descriptor)))?;

            let name = caps[1].to_string();
            let offset = match caps.get(2) {
                Some(m) => m.as_str().parse::<u32>().map_err(|e| CoreError::Descriptor(e.to_string()))?,
                None => next_offset,
            };
            let signed_width = caps[3].parse::<i32>().map_err(|e| CoreError::Descriptor(e.to_string()))?;
            let width = signed_width.unsigned_abs();

            if width == 0 || offset.saturating_add(width) > 64 {
                return Err(CoreError::Descriptor(format!(
                    "field '{}' with offset {} and width {} does not fit into 64 bits", name, offset, width
                )));
            }
            if fields.iter().any(|f| f.name == name) {
                return Err(CoreError::Descriptor(format!("duplicate field '{}'", name)));
            }

            let field = BitField { name, offset, width, signed: signed_width < 0 };
            if used_bits & field.mask() != 0 {
                return Err(CoreError::Descriptor(format!("field '{}' overlaps another field", field.name)));
            }
            used_bits |= field.mask();
            next_offset = offset + width;
            fields.push(field);
        }

        if fields.is_empty() {
            return Err(CoreError::Descriptor(format!("no fields in '{}'", descriptor)));
        }

        Ok(IdSpec { descriptor: descriptor.to_string(), fields, used_bits })
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&BitField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| CoreError::UnknownField(name.to_string()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Reject identifiers with bits set outside every field
    pub fn validate(&self, cell_id: CellId) -> Result<()> {
        let stray = cell_id & !self.used_bits;
        if stray != 0 {
            return Err(CoreError::InvalidCellId {
                cell_id,
                reason: format!("bits {:#x} are not covered by '{}'", stray, self.descriptor),
            });
        }
        Ok(())
    }

    pub fn get(&self, cell_id: CellId, name: &str) -> Result<i64> {
        Ok(self.field(name)?.value(cell_id))
    }

    pub fn set(&self, cell_id: CellId, name: &str, value: i64) -> Result<CellId> {
        self.field(name)?.set(cell_id, value)
    }

    pub fn decode(&self, cell_id: CellId) -> Result<BTreeMap<String, i64>> {
        self.validate(cell_id)?;
        Ok(self.fields.iter().map(|f| (f.name.clone(), f.value(cell_id))).collect())
    }

    /// Build an identifier from `(field, value)` pairs; missing fields are zero
    pub fn encode(&self, values: &[(&str, i64)]) -> Result<CellId> {
        values.iter().try_fold(0u64, |id, (name, value)| self.set(id, name, *value))
    }

    /// Union of the bit masks of the named fields
    pub fn mask_of<S: AsRef<str>>(&self, names: &[S]) -> Result<u64> {
        names.iter().try_fold(0u64, |mask, name| -> Result<u64> {
            Ok(mask | self.field(name.as_ref())?.mask())
        })
    }
}
