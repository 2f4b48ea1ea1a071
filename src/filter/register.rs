//! Filter registers: the static description of a filter type.

use super::args::FilterArgs;
use super::traits::Filter;
use crate::caps::CapBundle;
use crate::error::Result;
use crate::props::PropertyType;
use std::fmt;
use std::sync::Arc;

/// Builds the private state of a new instance from its parsed arguments.
pub type FilterConstructor = Arc<dyn Fn(&FilterArgs) -> Result<Box<dyn Filter>> + Send + Sync>;

/// Declaration of one filter argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDescriptor {
    /// Argument name.
    pub name: String,
    /// Value type.
    pub ty: PropertyType,
    /// Default value, in argument syntax.
    pub default: Option<String>,
    /// `min-max` range for numbers, or `a|b|c` names for enumerations.
    pub min_max_enum: Option<String>,
    /// Human readable description.
    pub description: String,
    /// Can be changed while the filter runs.
    pub updatable: bool,
}

impl ArgDescriptor {
    /// Declare an argument.
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            min_max_enum: None,
            description: String::new(),
            updatable: false,
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set a `min-max` range.
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.min_max_enum = Some(range.into());
        self
    }

    /// Set enumeration names, `|` separated; values are the name indexes.
    pub fn with_enum(mut self, names: impl Into<String>) -> Self {
        self.min_max_enum = Some(names.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Allow updates at run time.
    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub(crate) fn enum_values(&self) -> Option<&str> {
        self.min_max_enum.as_deref().filter(|s| s.contains('|'))
    }

    pub(crate) fn range(&self) -> Option<(Option<f64>, Option<f64>)> {
        let bounds = self.min_max_enum.as_deref().filter(|s| !s.contains('|'))?;
        // the separator is the first '-' that is not a sign
        let split = bounds.char_indices().skip(1).find(|(_, c)| *c == '-')?.0;
        let (min, max) = (&bounds[..split], &bounds[split + 1..]);
        let bound = |s: &str| match s.trim() {
            "" | "I" | "-I" => None,
            s => s.parse::<f64>().ok(),
        };
        Some((bound(min), bound(max)))
    }
}

/// Description of a filter type.
///
/// ```rust,ignore
/// let reg = FilterRegister::new("rescale", |args| Ok(Box::new(Rescale::new(args))))
///     .with_description("Video rescaler")
///     .with_arg(ArgDescriptor::new("size", PropertyType::Vec2i).with_default("1280x720"))
///     .with_caps(CapBundle::new().input(CODEC_ID, "raw").output(CODEC_ID, "raw"));
/// session.register(reg);
/// ```
#[derive(Clone)]
pub struct FilterRegister {
    name: String,
    description: String,
    args: Vec<ArgDescriptor>,
    caps: Vec<CapBundle>,
    explicit_only: bool,
    max_extra_pids: u32,
    clonable: bool,
    requires_full_block: bool,
    accepts_meta_args: bool,
    priority: u32,
    constructor: FilterConstructor,
}

impl FilterRegister {
    /// Create a register with a constructor.
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&FilterArgs) -> Result<Box<dyn Filter>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            args: Vec::new(),
            caps: Vec::new(),
            explicit_only: false,
            max_extra_pids: 0,
            clonable: false,
            requires_full_block: false,
            accepts_meta_args: false,
            priority: 0,
            constructor: Arc::new(constructor),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare an argument.
    pub fn with_arg(mut self, arg: ArgDescriptor) -> Self {
        self.args.push(arg);
        self
    }

    /// Add a capability bundle.
    pub fn with_caps(mut self, bundle: CapBundle) -> Self {
        self.caps.push(bundle);
        self
    }

    /// Never insert this filter automatically in a chain.
    pub fn explicit_only(mut self) -> Self {
        self.explicit_only = true;
        self
    }

    /// Accept `n` input pids beyond the first one.
    pub fn with_max_extra_pids(mut self, n: u32) -> Self {
        self.max_extra_pids = n;
        self
    }

    /// Clone the filter when a pid arrives and its inputs are full.
    pub fn clonable(mut self) -> Self {
        self.clonable = true;
        self
    }

    /// Fragments are reassembled before reaching this filter.
    pub fn requires_full_block(mut self) -> Self {
        self.requires_full_block = true;
        self
    }

    /// Keep unknown arguments as meta arguments instead of warning.
    pub fn accepts_meta_args(mut self) -> Self {
        self.accepts_meta_args = true;
        self
    }

    /// Priority among equivalent chains; lower wins.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Register name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared arguments.
    pub fn args(&self) -> &[ArgDescriptor] {
        &self.args
    }

    /// Look up a declared argument.
    pub fn arg(&self, name: &str) -> Option<&ArgDescriptor> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Capability bundles.
    pub fn caps(&self) -> &[CapBundle] {
        &self.caps
    }

    /// Whether the register must be loaded explicitly.
    pub fn is_explicit_only(&self) -> bool {
        self.explicit_only
    }

    /// Input pids accepted beyond the first.
    pub fn max_extra_pids(&self) -> u32 {
        self.max_extra_pids
    }

    /// Whether the filter is cloned when its inputs are full.
    pub fn is_clonable(&self) -> bool {
        self.clonable
    }

    /// Whether inputs are reassembled into full blocks.
    pub fn needs_full_block(&self) -> bool {
        self.requires_full_block
    }

    /// Whether unknown arguments are kept.
    pub fn allows_meta_args(&self) -> bool {
        self.accepts_meta_args
    }

    /// Priority.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Whether the filter can take input pids: it has input caps, or no caps at all.
    pub fn accepts_inputs(&self) -> bool {
        self.caps.is_empty() || self.declares_inputs()
    }

    /// Whether some bundle declares input capabilities.
    pub fn declares_inputs(&self) -> bool {
        self.caps.iter().any(CapBundle::has_inputs)
    }

    /// Whether some bundle declares output capabilities.
    pub fn declares_outputs(&self) -> bool {
        self.caps.iter().any(CapBundle::has_outputs)
    }

    pub(crate) fn instantiate(&self, args: &FilterArgs) -> Result<Box<dyn Filter>> {
        (self.constructor)(args)
    }
}

impl fmt::Debug for FilterRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegister")
            .field("name", &self.name)
            .field("args", &self.args.len())
            .field("caps", &self.caps.len())
            .field("explicit_only", &self.explicit_only)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_parsing() {
        let arg = ArgDescriptor::new("q", PropertyType::Sint).with_range("-10-10");
        assert_eq!(arg.range(), Some((Some(-10.0), Some(10.0))));

        let arg = ArgDescriptor::new("q", PropertyType::Uint).with_range("1-I");
        assert_eq!(arg.range(), Some((Some(1.0), None)));

        let arg = ArgDescriptor::new("mode", PropertyType::Uint).with_enum("fast|slow");
        assert_eq!(arg.range(), None);
        assert_eq!(arg.enum_values(), Some("fast|slow"));
    }
}
