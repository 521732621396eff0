//! # Field/Variable Model
//!
//! A [`Variable`] is a named, typed window onto part of a message. Its
//! [`VariableSpec`] fixes the encoding, byte order and width rules at script
//! load time; its value bytes are overwritten by every exchange.
//!
//! Variables live in a [`Session`], indexed by [`VarId`] handles resolved once
//! through a [`SymbolTable`], so the polling loop never looks names up.

pub mod codec;
pub mod session;

pub use session::{Session, SymbolTable, VarId};

use crate::error::MeterLinkError;
use serde::Deserialize;

/// Byte order of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Big,
    Little,
    /// Whatever the device family's calculation strategy declares.
    #[default]
    Device,
}

impl Endian {
    /// Replace `Device` with the concrete order of the device family.
    pub fn resolve(self, device: Endian) -> Endian {
        match (self, device) {
            (Endian::Device, Endian::Little) => Endian::Little,
            (Endian::Device, _) => Endian::Big,
            (order, _) => order,
        }
    }
}

/// Padding used by fixed-width text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    #[default]
    Space,
    Null,
    /// Text must fill the field exactly.
    None,
}

impl Padding {
    pub fn byte(self) -> Option<u8> {
        match self {
            Padding::Space => Some(b' '),
            Padding::Null => Some(0),
            Padding::None => None,
        }
    }
}

/// How the bytes of a variable are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Opaque bytes.
    #[default]
    Bytes,
    /// Unsigned integer, 1..=8 bytes.
    Uint,
    /// Two's complement integer, 1..=8 bytes.
    Int,
    /// Signed integer scaled by `10^-decimals`.
    Fixed { decimals: u8 },
    /// ASCII text.
    Text {
        #[serde(default)]
        padding: Padding,
    },
    /// Computed at send time, verified at receive time.
    Checksum,
}

impl Encoding {
    fn is_numeric(self) -> bool {
        matches!(self, Encoding::Uint | Encoding::Int | Encoding::Fixed { .. })
    }
}

/// Load-time description of a variable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    /// Initial (and for fixed variables, permanent) width in bytes.
    #[serde(default)]
    pub width: usize,
    /// Present for resizable variables: the largest width `resize` accepts.
    #[serde(default)]
    pub max_width: Option<usize>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub endian: Endian,
}

impl VariableSpec {
    pub fn new(name: &str, width: usize, encoding: Encoding) -> Self {
        VariableSpec {
            name: name.to_string(),
            width,
            max_width: None,
            encoding,
            endian: Endian::Device,
        }
    }

    pub fn resizable(mut self, max_width: usize) -> Self {
        self.max_width = Some(max_width);
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn is_resizable(&self) -> bool {
        self.max_width.is_some()
    }

    /// Reject specs whose width can never agree with their encoding.
    pub fn validate(&self) -> Result<(), MeterLinkError> {
        if self.name.is_empty() {
            return Err(MeterLinkError::ScriptError("variable with empty name".into()));
        }
        if let Some(max) = self.max_width {
            if self.width > max {
                return Err(MeterLinkError::variable(
                    &self.name,
                    format!("initial width {} exceeds max width {max}", self.width),
                ));
            }
        }
        let widest = self.max_width.unwrap_or(self.width);
        if self.encoding.is_numeric() && (widest == 0 || widest > codec::MAX_INT_WIDTH) {
            return Err(MeterLinkError::variable(
                &self.name,
                format!("numeric width must be 1..=8, got {widest}"),
            ));
        }
        if self.encoding == Encoding::Checksum && self.width == 0 {
            return Err(MeterLinkError::variable(&self.name, "checksum width is zero"));
        }
        Ok(())
    }
}

/// Current value of a variable plus where it sat in the last message.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    spec: VariableSpec,
    order: Endian,
    value: Vec<u8>,
    offset: Option<usize>,
}

impl Variable {
    /// New zero-filled variable; `device_order` resolves `Endian::Device`.
    pub fn new(spec: VariableSpec, device_order: Endian) -> Self {
        let order = spec.endian.resolve(device_order);
        let value = vec![0; spec.width];
        Variable {
            spec,
            order,
            value,
            offset: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &VariableSpec {
        &self.spec
    }

    pub fn encoding(&self) -> Encoding {
        self.spec.encoding
    }

    /// Concrete byte order used by the numeric accessors.
    pub fn byte_order(&self) -> Endian {
        self.order
    }

    pub fn width(&self) -> usize {
        self.value.len()
    }

    /// Offset within the last message this variable was marshalled into or read from.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: Option<usize>) {
        self.offset = offset;
    }

    /// Change the width of a resizable variable; new bytes are zero.
    pub fn resize(&mut self, width: usize) -> Result<(), MeterLinkError> {
        match self.spec.max_width {
            Some(max) if width <= max => {
                self.value.resize(width, 0);
                Ok(())
            }
            Some(max) => Err(MeterLinkError::variable(
                &self.spec.name,
                format!("resize to {width} exceeds max width {max}"),
            )),
            None if width == self.value.len() => Ok(()),
            None => Err(MeterLinkError::variable(
                &self.spec.name,
                format!("fixed width {} cannot be resized to {width}", self.value.len()),
            )),
        }
    }

    /// Restore the initial zero-filled value.
    pub fn clear(&mut self) {
        self.value = vec![0; self.spec.width];
        self.offset = None;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.value
    }

    pub fn get_bytes(&self) -> Vec<u8> {
        self.value.clone()
    }

    /// Overwrite the raw bytes; resizable variables adopt the new length.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), MeterLinkError> {
        if bytes.len() != self.value.len() {
            self.resize(bytes.len())?;
        }
        self.value.copy_from_slice(bytes);
        Ok(())
    }

    fn mismatch(&self, accessor: &str) -> MeterLinkError {
        MeterLinkError::variable(
            &self.spec.name,
            format!(
                "{accessor} does not apply to {:?} of width {}",
                self.spec.encoding,
                self.value.len()
            ),
        )
    }

    fn ensure(&self, ok: bool, accessor: &str) -> Result<(), MeterLinkError> {
        if ok {
            Ok(())
        } else {
            Err(self.mismatch(accessor))
        }
    }

    fn int_width_ok(&self) -> bool {
        (1..=codec::MAX_INT_WIDTH).contains(&self.value.len())
    }

    pub fn get_byte(&self) -> Result<u8, MeterLinkError> {
        self.ensure(
            self.value.len() == 1
                && matches!(
                    self.spec.encoding,
                    Encoding::Bytes | Encoding::Uint | Encoding::Checksum
                ),
            "get_byte",
        )?;
        Ok(self.value[0])
    }

    pub fn get_uint(&self) -> Result<u64, MeterLinkError> {
        self.ensure(
            self.int_width_ok() && matches!(self.spec.encoding, Encoding::Uint | Encoding::Checksum),
            "get_uint",
        )?;
        Ok(codec::decode_uint(&self.value, self.order))
    }

    pub fn get_u16(&self) -> Result<u16, MeterLinkError> {
        self.ensure(self.value.len() <= 2, "get_u16")?;
        Ok(self.get_uint()? as u16)
    }

    pub fn get_u32(&self) -> Result<u32, MeterLinkError> {
        self.ensure(self.value.len() <= 4, "get_u32")?;
        Ok(self.get_uint()? as u32)
    }

    pub fn get_int(&self) -> Result<i64, MeterLinkError> {
        self.ensure(
            self.int_width_ok() && self.spec.encoding == Encoding::Int,
            "get_int",
        )?;
        Ok(codec::decode_int(&self.value, self.order))
    }

    pub fn get_i16(&self) -> Result<i16, MeterLinkError> {
        self.ensure(self.value.len() <= 2, "get_i16")?;
        Ok(self.get_int()? as i16)
    }

    pub fn get_i32(&self) -> Result<i32, MeterLinkError> {
        self.ensure(self.value.len() <= 4, "get_i32")?;
        Ok(self.get_int()? as i32)
    }

    pub fn get_fixed(&self) -> Result<f64, MeterLinkError> {
        match self.spec.encoding {
            Encoding::Fixed { decimals } if self.int_width_ok() => {
                Ok(codec::decode_fixed(&self.value, self.order, decimals))
            }
            _ => Err(self.mismatch("get_fixed")),
        }
    }

    pub fn get_string(&self) -> Result<String, MeterLinkError> {
        match self.spec.encoding {
            Encoding::Text { padding } => codec::decode_text(&self.value, padding)
                .ok_or_else(|| MeterLinkError::variable(&self.spec.name, "text is not ASCII")),
            _ => Err(self.mismatch("get_string")),
        }
    }

    pub fn set_uint(&mut self, value: u64) -> Result<(), MeterLinkError> {
        self.ensure(
            self.int_width_ok() && matches!(self.spec.encoding, Encoding::Uint | Encoding::Checksum),
            "set_uint",
        )?;
        let bytes = codec::encode_uint(value, self.value.len(), self.order).ok_or_else(|| {
            MeterLinkError::variable(&self.spec.name, format!("{value} does not fit"))
        })?;
        self.value = bytes;
        Ok(())
    }

    pub fn set_int(&mut self, value: i64) -> Result<(), MeterLinkError> {
        self.ensure(
            self.int_width_ok() && self.spec.encoding == Encoding::Int,
            "set_int",
        )?;
        let bytes = codec::encode_int(value, self.value.len(), self.order).ok_or_else(|| {
            MeterLinkError::variable(&self.spec.name, format!("{value} does not fit"))
        })?;
        self.value = bytes;
        Ok(())
    }

    pub fn set_fixed(&mut self, value: f64) -> Result<(), MeterLinkError> {
        let decimals = match self.spec.encoding {
            Encoding::Fixed { decimals } if self.int_width_ok() => decimals,
            _ => return Err(self.mismatch("set_fixed")),
        };
        let bytes = codec::encode_fixed(value, self.value.len(), self.order, decimals)
            .ok_or_else(|| {
                MeterLinkError::variable(&self.spec.name, format!("{value} does not fit"))
            })?;
        self.value = bytes;
        Ok(())
    }

    /// Store ASCII text. Fixed variables pad to their width; resizable ones
    /// take the text's length.
    pub fn set_string(&mut self, text: &str) -> Result<(), MeterLinkError> {
        let padding = match self.spec.encoding {
            Encoding::Text { padding } => padding,
            _ => return Err(self.mismatch("set_string")),
        };
        if self.spec.is_resizable() {
            self.resize(text.len())?;
        }
        let bytes = codec::encode_text(text, self.value.len(), padding).ok_or_else(|| {
            MeterLinkError::variable(
                &self.spec.name,
                format!("{text:?} does not fit {} ASCII bytes", self.value.len()),
            )
        })?;
        self.value = bytes;
        Ok(())
    }
}
