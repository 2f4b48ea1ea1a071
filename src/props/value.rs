//! Typed property values.
//!
//! Values carried in property maps, filter arguments and capabilities.
//! Text parsing follows the argument syntax used in filter descriptions:
//!
//! ```text
//! bool      yes | true | 1 | no | false | 0
//! uint      42 | 0x2A | name   (enum index when an enum list is given)
//! fraction  30000/1001 | 25-1 | 25
//! vec2i     1920x1080
//! data      0x00ff10
//! lists     a,b,c
//! ```

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;

/// A rational number with an unsigned denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    /// Numerator.
    pub num: i32,
    /// Denominator.
    pub den: u32,
}

impl Fraction {
    /// Create a new fraction.
    pub const fn new(num: i32, den: u32) -> Self {
        Self { num, den }
    }

    /// Compare by cross-multiplication (`1/2 == 2/4`).
    pub fn same_ratio(&self, other: &Fraction) -> bool {
        (self.num as i64) * (other.den as i64) == (other.num as i64) * (self.den as i64)
    }
}

/// A 64-bit rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction64 {
    /// Numerator.
    pub num: i64,
    /// Denominator.
    pub den: u64,
}

impl Fraction64 {
    /// Create a new fraction.
    pub const fn new(num: i64, den: u64) -> Self {
        Self { num, den }
    }

    /// Compare by cross-multiplication.
    pub fn same_ratio(&self, other: &Fraction64) -> bool {
        (self.num as i128) * (other.den as i128) == (other.num as i128) * (self.den as i128)
    }
}

/// Integer 2D vector (typically `width x height`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vec2i {
    /// X component.
    pub x: i32,
    /// Y component.
    pub y: i32,
}

/// Floating point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
}

/// Integer 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vec3i {
    /// X component.
    pub x: i32,
    /// Y component.
    pub y: i32,
    /// Z component.
    pub z: i32,
}

/// Integer 4D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vec4i {
    /// X component.
    pub x: i32,
    /// Y component.
    pub y: i32,
    /// Z component.
    pub z: i32,
    /// W component.
    pub w: i32,
}

/// The type of a property value, used to drive text parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// Boolean.
    Bool,
    /// Signed 32-bit integer.
    Sint,
    /// Unsigned 32-bit integer.
    Uint,
    /// Signed 64-bit integer.
    LSint,
    /// Unsigned 64-bit integer.
    LUint,
    /// 32-bit fraction.
    Fraction,
    /// 64-bit fraction.
    Fraction64,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Integer 2D vector.
    Vec2i,
    /// Float 2D vector.
    Vec2,
    /// Integer 3D vector.
    Vec3i,
    /// Integer 4D vector.
    Vec4i,
    /// UTF-8 string.
    String,
    /// Opaque binary data.
    Data,
    /// List of strings.
    StringList,
    /// List of unsigned integers.
    UintList,
    /// List of signed integers.
    SintList,
}

impl PropertyType {
    /// Human readable type name.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::Bool => "boolean",
            PropertyType::Sint => "int",
            PropertyType::Uint => "unsigned int",
            PropertyType::LSint => "long int",
            PropertyType::LUint => "unsigned long int",
            PropertyType::Fraction => "fraction",
            PropertyType::Fraction64 => "64-bit fraction",
            PropertyType::Float => "float",
            PropertyType::Double => "number",
            PropertyType::Vec2i => "vec2d int",
            PropertyType::Vec2 => "vec2d float",
            PropertyType::Vec3i => "vec3d int",
            PropertyType::Vec4i => "vec4d int",
            PropertyType::String => "string",
            PropertyType::Data => "data",
            PropertyType::StringList => "string list",
            PropertyType::UintList => "unsigned int list",
            PropertyType::SintList => "int list",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Sint(i32),
    /// Unsigned 32-bit integer.
    Uint(u32),
    /// Signed 64-bit integer.
    LSint(i64),
    /// Unsigned 64-bit integer.
    LUint(u64),
    /// 32-bit fraction.
    Fraction(Fraction),
    /// 64-bit fraction.
    Fraction64(Fraction64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// Integer 2D vector.
    Vec2i(Vec2i),
    /// Float 2D vector.
    Vec2(Vec2),
    /// Integer 3D vector.
    Vec3i(Vec3i),
    /// Integer 4D vector.
    Vec4i(Vec4i),
    /// UTF-8 string.
    String(String),
    /// Opaque binary data, shared without copy.
    Data(Bytes),
    /// List of strings.
    StringList(Vec<String>),
    /// List of unsigned integers.
    UintList(Vec<u32>),
    /// List of signed integers.
    SintList(Vec<i32>),
}

impl PropertyValue {
    /// The type of this value.
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Sint(_) => PropertyType::Sint,
            PropertyValue::Uint(_) => PropertyType::Uint,
            PropertyValue::LSint(_) => PropertyType::LSint,
            PropertyValue::LUint(_) => PropertyType::LUint,
            PropertyValue::Fraction(_) => PropertyType::Fraction,
            PropertyValue::Fraction64(_) => PropertyType::Fraction64,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::Vec2i(_) => PropertyType::Vec2i,
            PropertyValue::Vec2(_) => PropertyType::Vec2,
            PropertyValue::Vec3i(_) => PropertyType::Vec3i,
            PropertyValue::Vec4i(_) => PropertyType::Vec4i,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Data(_) => PropertyType::Data,
            PropertyValue::StringList(_) => PropertyType::StringList,
            PropertyValue::UintList(_) => PropertyType::UintList,
            PropertyValue::SintList(_) => PropertyType::SintList,
        }
    }

    /// Parse a value of the given type from its textual form.
    ///
    /// `enum_values` is a `|` separated list; when present for an unsigned
    /// integer, the text is matched against it and the value is its index.
    pub fn parse(ty: PropertyType, text: &str, enum_values: Option<&str>) -> Result<Self> {
        let text = text.trim();
        let bad = |what: &str| Error::invalid_argument(text, format!("expected {what}"));

        let value = match ty {
            PropertyType::Bool => match text {
                "" | "yes" | "true" | "1" => PropertyValue::Bool(true),
                "no" | "false" | "0" => PropertyValue::Bool(false),
                _ => return Err(bad("a boolean")),
            },
            PropertyType::Sint => PropertyValue::Sint(text.parse().map_err(|_| bad("an int"))?),
            PropertyType::Uint => {
                if let Some(list) = enum_values.filter(|l| l.contains('|')) {
                    let index = list
                        .split('|')
                        .position(|v| v.trim() == text)
                        .ok_or_else(|| bad(&format!("one of {list}")))?;
                    PropertyValue::Uint(index as u32)
                } else {
                    PropertyValue::Uint(parse_u64(text).and_then(|v| u32::try_from(v).ok()).ok_or_else(|| bad("an unsigned int"))?)
                }
            }
            PropertyType::LSint => PropertyValue::LSint(text.parse().map_err(|_| bad("a long int"))?),
            PropertyType::LUint => PropertyValue::LUint(parse_u64(text).ok_or_else(|| bad("an unsigned long int"))?),
            PropertyType::Fraction => {
                let (num, den): (i64, u64) = parse_ratio(text).ok_or_else(|| bad("a fraction"))?;
                let num = i32::try_from(num).map_err(|_| bad("a fraction"))?;
                let den = u32::try_from(den).map_err(|_| bad("a fraction"))?;
                PropertyValue::Fraction(Fraction::new(num, den))
            }
            PropertyType::Fraction64 => {
                let (num, den) = parse_ratio(text).ok_or_else(|| bad("a fraction"))?;
                PropertyValue::Fraction64(Fraction64::new(num, den))
            }
            PropertyType::Float => PropertyValue::Float(text.parse().map_err(|_| bad("a float"))?),
            PropertyType::Double => PropertyValue::Double(text.parse().map_err(|_| bad("a number"))?),
            PropertyType::Vec2i => {
                let v = parse_components::<i32>(text, 2).ok_or_else(|| bad("WxH"))?;
                PropertyValue::Vec2i(Vec2i { x: v[0], y: v[1] })
            }
            PropertyType::Vec2 => {
                let v = parse_components::<f64>(text, 2).ok_or_else(|| bad("XxY"))?;
                PropertyValue::Vec2(Vec2 { x: v[0], y: v[1] })
            }
            PropertyType::Vec3i => {
                let v = parse_components::<i32>(text, 3).ok_or_else(|| bad("XxYxZ"))?;
                PropertyValue::Vec3i(Vec3i { x: v[0], y: v[1], z: v[2] })
            }
            PropertyType::Vec4i => {
                let v = parse_components::<i32>(text, 4).ok_or_else(|| bad("XxYxZxW"))?;
                PropertyValue::Vec4i(Vec4i { x: v[0], y: v[1], z: v[2], w: v[3] })
            }
            PropertyType::String => PropertyValue::String(text.to_string()),
            PropertyType::Data => PropertyValue::Data(parse_hex(text).ok_or_else(|| bad("hex data"))?),
            PropertyType::StringList => PropertyValue::StringList(split_list(text).map(str::to_string).collect()),
            PropertyType::UintList => PropertyValue::UintList(
                split_list(text)
                    .map(|s| parse_u64(s).and_then(|v| u32::try_from(v).ok()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| bad("a list of unsigned ints"))?,
            ),
            PropertyType::SintList => PropertyValue::SintList(
                split_list(text)
                    .map(|s| s.parse().ok())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| bad("a list of ints"))?,
            ),
        };
        Ok(value)
    }

    /// Capability-style comparison.
    ///
    /// `self` is the observed value, `pattern` the declared one. Strings in
    /// `pattern` may be `*` (anything) or `a|b|c` alternatives. Fractions
    /// compare by ratio. Values of different types never match.
    pub fn matches(&self, pattern: &PropertyValue) -> bool {
        match (self, pattern) {
            (PropertyValue::String(value), PropertyValue::String(pat)) => {
                if pat == "*" {
                    true
                } else if pat.contains('|') {
                    pat.split('|').any(|alt| alt == value)
                } else {
                    value == pat
                }
            }
            (PropertyValue::Fraction(a), PropertyValue::Fraction(b)) => a.same_ratio(b),
            (PropertyValue::Fraction64(a), PropertyValue::Fraction64(b)) => a.same_ratio(b),
            (a, b) => a == b,
        }
    }

    /// Get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as an unsigned 32-bit integer.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Uint(v) => Some(*v),
            PropertyValue::Sint(v) => u32::try_from(*v).ok(),
            PropertyValue::LUint(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as a signed 64-bit integer, widening smaller integer types.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Sint(v) => Some(*v as i64),
            PropertyValue::Uint(v) => Some(*v as i64),
            PropertyValue::LSint(v) => Some(*v),
            PropertyValue::LUint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as an unsigned 64-bit integer, widening smaller integer types.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::LUint(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Get as a double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v as f64),
            PropertyValue::Double(v) => Some(*v),
            PropertyValue::Fraction(f) if f.den != 0 => Some(f.num as f64 / f.den as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Get as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as a fraction.
    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            PropertyValue::Fraction(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as binary data.
    pub fn as_data(&self) -> Option<&Bytes> {
        match self {
            PropertyValue::Data(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            PropertyValue::Sint(v) => write!(f, "{v}"),
            PropertyValue::Uint(v) => write!(f, "{v}"),
            PropertyValue::LSint(v) => write!(f, "{v}"),
            PropertyValue::LUint(v) => write!(f, "{v}"),
            PropertyValue::Fraction(v) => write!(f, "{}/{}", v.num, v.den),
            PropertyValue::Fraction64(v) => write!(f, "{}/{}", v.num, v.den),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Vec2i(v) => write!(f, "{}x{}", v.x, v.y),
            PropertyValue::Vec2(v) => write!(f, "{}x{}", v.x, v.y),
            PropertyValue::Vec3i(v) => write!(f, "{}x{}x{}", v.x, v.y, v.z),
            PropertyValue::Vec4i(v) => write!(f, "{}x{}x{}x{}", v.x, v.y, v.z, v.w),
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Data(d) => write!(f, "{} bytes", d.len()),
            PropertyValue::StringList(l) => f.write_str(&l.join(",")),
            PropertyValue::UintList(l) => write_list(f, l),
            PropertyValue::SintList(l) => write_list(f, l),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Sint(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Uint(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::LSint(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::LUint(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<Fraction> for PropertyValue {
    fn from(v: Fraction) -> Self {
        PropertyValue::Fraction(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<Bytes> for PropertyValue {
    fn from(v: Bytes) -> Self {
        PropertyValue::Data(v)
    }
}

fn parse_u64(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_ratio<N, D>(text: &str) -> Option<(N, D)>
where
    N: std::str::FromStr,
    D: std::str::FromStr + From<u8>,
{
    if text.is_empty() {
        return None;
    }
    // A leading '-' is a sign, not the `n-d` separator.
    let split = text
        .find('/')
        .or_else(|| text.char_indices().skip(1).find(|(_, c)| *c == '-').map(|(i, _)| i));
    match split {
        Some(pos) => Some((text[..pos].parse().ok()?, text[pos + 1..].parse().ok()?)),
        None => Some((text.parse().ok()?, D::from(1u8))),
    }
}

fn parse_components<T: std::str::FromStr>(text: &str, count: usize) -> Option<Vec<T>> {
    let parts: Vec<T> = text
        .split('x')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    (parts.len() == count).then_some(parts)
}

fn parse_hex(text: &str) -> Option<Bytes> {
    let hex = text.strip_prefix("0x").unwrap_or(text);
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()
        .map(Bytes::from)
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}
