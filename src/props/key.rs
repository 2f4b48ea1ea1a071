//! Property keys: built-in four character codes or free-form names.

use super::codes;
use std::borrow::Cow;
use std::fmt;

/// Key of a property entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Built-in property code.
    Code(u32),
    /// User defined property name.
    Name(Cow<'static, str>),
}

impl PropertyKey {
    /// Resolve a textual name, mapping built-in names to their code.
    pub fn from_name(name: &str) -> Self {
        match codes::by_name(name) {
            Some(builtin) => PropertyKey::Code(builtin.code),
            None => PropertyKey::Name(Cow::Owned(name.to_string())),
        }
    }

    /// Name used in logs and dumps.
    pub fn display_name(&self) -> String {
        match self {
            PropertyKey::Code(code) => codes::name_of(*code)
                .map(str::to_string)
                .unwrap_or_else(|| codes::fourcc_to_string(*code)),
            PropertyKey::Name(name) => name.to_string(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl From<u32> for PropertyKey {
    fn from(code: u32) -> Self {
        PropertyKey::Code(code)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::from_name(name)
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        match codes::by_name(&name) {
            Some(builtin) => PropertyKey::Code(builtin.code),
            None => PropertyKey::Name(Cow::Owned(name)),
        }
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(key: &PropertyKey) -> Self {
        key.clone()
    }
}
