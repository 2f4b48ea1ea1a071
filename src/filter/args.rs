//! Filter argument strings.
//!
//! Arguments follow the filter name in a description and are separated by
//! `:`:
//!
//! ```text
//! reframer:rt=on:FID=1:SID=src1,src2:url=http://host:8080/a:b
//! ```
//!
//! # Syntax
//!
//! - `name=value` pairs separated by `:`
//! - `://` starts a URL: its `host:port` authority is not split
//! - `X:\` and `X:/` drive letters are not split
//! - a bare boolean name means `true`
//! - `FID` sets the filter id, `SID` the `,` separated accepted source ids

use super::register::{ArgDescriptor, FilterRegister};
use crate::error::{Error, Result};
use crate::props::{PropertyType, PropertyValue};
use tracing::warn;
use winnow::Parser;
use winnow::ascii::digit1;
use winnow::combinator::{alt, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{none_of, one_of, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// Reserved name of the filter id argument.
pub const FID: &str = "FID";
/// Reserved name of the source ids argument.
pub const SID: &str = "SID";

/// Parsed arguments of a filter instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    values: Vec<(String, PropertyValue)>,
    meta: Vec<(String, String)>,
    fid: Option<String>,
    source_ids: Vec<String>,
    raw: String,
}

impl FilterArgs {
    /// Parse an argument string against a register's declarations.
    ///
    /// Declared defaults are applied first. A value that does not parse is
    /// an [`Error::InvalidArgument`]; a value outside the declared range or
    /// enumeration is logged and the default is kept.
    pub fn parse(register: &FilterRegister, text: &str) -> Result<Self> {
        let mut args = FilterArgs {
            raw: text.to_string(),
            ..Default::default()
        };
        for desc in register.args() {
            if let Some(default) = &desc.default {
                match PropertyValue::parse(desc.ty, default, desc.enum_values()) {
                    Ok(value) => args.set(&desc.name, value),
                    Err(e) => warn!(filter = %register.name(), arg = %desc.name, error = %e, "bad default value"),
                }
            }
        }

        for item in split_args(text)? {
            let (name, value) = match item.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value)),
                None => (item.trim(), None),
            };
            if name.is_empty() {
                warn!(filter = %register.name(), arg = %item, "argument without a name ignored");
                continue;
            }
            match name {
                FID => args.fid = value.map(str::to_string),
                SID => {
                    args.source_ids = value
                        .unwrap_or_default()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => match register.arg(name) {
                    Some(desc) => args.bind(register, desc, value)?,
                    None if register.allows_meta_args() => {
                        args.meta.push((name.to_string(), value.unwrap_or_default().to_string()));
                    }
                    None => warn!(filter = %register.name(), arg = %name, "unknown argument ignored"),
                },
            }
        }
        Ok(args)
    }

    fn bind(&mut self, register: &FilterRegister, desc: &ArgDescriptor, value: Option<&str>) -> Result<()> {
        let text = match value {
            Some(text) => text,
            None if desc.ty == PropertyType::Bool => "true",
            None => return Err(Error::invalid_argument(&desc.name, "missing value")),
        };
        let parsed = match PropertyValue::parse(desc.ty, text, desc.enum_values()) {
            Ok(parsed) => parsed,
            Err(_) if desc.enum_values().is_some() => {
                warn!(filter = %register.name(), arg = %desc.name, value = %text, "value not in enumeration, using default");
                return Ok(());
            }
            Err(_) => {
                return Err(Error::invalid_argument(
                    &desc.name,
                    format!("'{text}' is not a valid {}", desc.ty),
                ));
            }
        };
        if !in_range(desc, &parsed) {
            warn!(filter = %register.name(), arg = %desc.name, value = %text, "value out of range, using default");
            return Ok(());
        }
        self.set(&desc.name, parsed);
        Ok(())
    }

    /// Value of a declared argument.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Boolean argument.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// Unsigned argument.
    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name)?.as_u32()
    }

    /// String argument.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    /// Meta argument kept verbatim.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// All meta arguments.
    pub fn meta_args(&self) -> &[(String, String)] {
        &self.meta
    }

    /// Filter id set with `FID`.
    pub fn fid(&self) -> Option<&str> {
        self.fid.as_deref()
    }

    /// Source ids set with `SID`.
    pub fn source_ids(&self) -> &[String] {
        &self.source_ids
    }

    /// The argument string as given.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub(crate) fn set(&mut self, name: &str, value: PropertyValue) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.values.push((name.to_string(), value)),
        }
    }
}

/// Parse a new value of a declared argument; unlike [`FilterArgs::parse`]
/// an out of range value is an error.
pub(crate) fn parse_value(desc: &ArgDescriptor, text: &str) -> Result<PropertyValue> {
    let value = PropertyValue::parse(desc.ty, text, desc.enum_values())
        .map_err(|_| Error::invalid_argument(&desc.name, format!("'{text}' is not a valid {}", desc.ty)))?;
    if !in_range(desc, &value) {
        return Err(Error::invalid_argument(&desc.name, format!("'{text}' is out of range")));
    }
    Ok(value)
}

fn in_range(desc: &ArgDescriptor, value: &PropertyValue) -> bool {
    let Some((min, max)) = desc.range() else {
        return true;
    };
    let Some(v) = value.as_f64() else {
        return true;
    };
    min.is_none_or(|min| v >= min) && max.is_none_or(|max| v <= max)
}

/// Split `regname[:args]` into the register name and the argument string.
pub(crate) fn split_description(description: &str) -> (&str, &str) {
    match description.split_once(':') {
        Some((name, args)) => (name.trim(), args),
        None => (description.trim(), ""),
    }
}

/// Split an argument string on `:` separators.
pub fn split_args(text: &str) -> Result<Vec<&str>> {
    let items: Vec<&str> = arg_list
        .parse(text)
        .map_err(|e| Error::Parse(format!("bad argument string '{text}': {e}")))?;
    Ok(items.into_iter().filter(|s| !s.trim().is_empty()).collect())
}

fn arg_list<'a>(input: &mut &'a str) -> WResult<Vec<&'a str>> {
    separated(0.., arg_text, ':').parse_next(input)
}

/// One argument: everything up to the next separator.
fn arg_text<'a>(input: &mut &'a str) -> WResult<&'a str> {
    repeat::<_, _, (), _, _>(0.., alt((url_authority, drive_separator, none_of(':').void())))
        .take()
        .parse_next(input)
}

/// `://` followed by `host[:port]`.
fn url_authority(input: &mut &str) -> WResult<()> {
    (
        "://",
        take_while(0.., |c: char| c != '/' && c != ':'),
        opt((':', digit1)),
    )
        .void()
        .parse_next(input)
}

/// `:\` or `:/` after a drive letter.
fn drive_separator(input: &mut &str) -> WResult<()> {
    (':', one_of(['\\', '/'])).void().parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterContext, ProcessStatus};

    struct Nop;

    impl Filter for Nop {
        fn process(&mut self, _ctx: &mut FilterContext<'_>) -> Result<ProcessStatus> {
            Ok(ProcessStatus::Eos)
        }
    }

    fn register() -> FilterRegister {
        FilterRegister::new("test", |_| Ok(Box::new(Nop)))
            .with_arg(ArgDescriptor::new("count", PropertyType::Uint).with_default("10").with_range("1-100"))
            .with_arg(ArgDescriptor::new("rt", PropertyType::Bool).with_default("false"))
            .with_arg(ArgDescriptor::new("mode", PropertyType::Uint).with_default("fast").with_enum("fast|slow"))
            .with_arg(ArgDescriptor::new("url", PropertyType::String))
    }

    #[test]
    fn test_defaults_applied() {
        let args = FilterArgs::parse(&register(), "").unwrap();
        assert_eq!(args.get_u32("count"), Some(10));
        assert_eq!(args.get_bool("rt"), Some(false));
        assert_eq!(args.get_u32("mode"), Some(0));
        assert_eq!(args.get("url"), None);
    }

    #[test]
    fn test_values_override_defaults() {
        let args = FilterArgs::parse(&register(), "count=42:rt:mode=slow").unwrap();
        assert_eq!(args.get_u32("count"), Some(42));
        assert_eq!(args.get_bool("rt"), Some(true));
        assert_eq!(args.get_u32("mode"), Some(1));
    }

    #[test]
    fn test_out_of_range_keeps_default() {
        let args = FilterArgs::parse(&register(), "count=500:mode=medium").unwrap();
        assert_eq!(args.get_u32("count"), Some(10));
        assert_eq!(args.get_u32("mode"), Some(0));
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let err = FilterArgs::parse(&register(), "count=many").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { ref name, .. } if name == "count"));
    }

    #[test]
    fn test_fid_and_sid() {
        let args = FilterArgs::parse(&register(), "FID=dec1:SID=src1,src2").unwrap();
        assert_eq!(args.fid(), Some("dec1"));
        assert_eq!(args.source_ids(), ["src1".to_string(), "src2".to_string()]);
    }

    #[test]
    fn test_urls_and_drive_letters_not_split() {
        assert_eq!(
            split_args("url=http://host:8080/a:count=3").unwrap(),
            vec!["url=http://host:8080/a", "count=3"]
        );
        assert_eq!(
            split_args("url=C:\\media\\in.mp4:rt").unwrap(),
            vec!["url=C:\\media\\in.mp4", "rt"]
        );
        let args = FilterArgs::parse(&register(), "url=https://example.com/x.mp4:count=3").unwrap();
        assert_eq!(args.get_str("url"), Some("https://example.com/x.mp4"));
        assert_eq!(args.get_u32("count"), Some(3));
    }

    #[test]
    fn test_meta_args() {
        let reg = register().accepts_meta_args();
        let args = FilterArgs::parse(&reg, "foo=bar:count=2").unwrap();
        assert_eq!(args.meta("foo"), Some("bar"));

        let args = FilterArgs::parse(&register(), "foo=bar").unwrap();
        assert_eq!(args.meta("foo"), None);
    }

    #[test]
    fn test_split_description() {
        assert_eq!(split_description("enc:rate=3"), ("enc", "rate=3"));
        assert_eq!(split_description("sink"), ("sink", ""));
    }
}
