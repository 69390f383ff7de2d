use std::{collections::HashSet, fmt, sync::Arc};

use crate::{
    errors::DiError,
    inject::Inject,
    key::Key,
    output::{Output, OutputValue},
    param::{Param, ParamValue},
    types::{DynError, Injectable, Instance, SharedError, TypeInfo},
};

/// Type-erased constructor body
///
/// May run on a worker thread, so it only ever sees its already built arguments.
pub type ConstructorFn = Arc<dyn Fn(Arguments) -> Result<Outputs, DynError> + Send + Sync>;

/// A function together with the description of what it needs and what it provides
///
/// Functions returning `Result<T, E>` are turned into constructors automatically,
/// see [crate::IntoConstructor]. Use [Constructor::builder] for constructors with
/// several outputs, parameter objects or flattened groups.
#[derive(Clone)]
pub struct Constructor {
    name: String,
    params: Vec<Param>,
    outputs: Vec<Output>,
    func: ConstructorFn,
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Constructor {
    pub fn builder(name: impl Into<String>) -> ConstructorBuilder {
        ConstructorBuilder {
            name: name.into(),
            params: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        name: impl Into<String>,
        params: Vec<Param>,
        outputs: Vec<Output>,
        func: impl Fn(Arguments) -> Result<Outputs, DynError> + Send + Sync + 'static,
    ) -> Self {
        Constructor {
            name: name.into(),
            params,
            outputs,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub(crate) fn func(&self) -> ConstructorFn {
        self.func.clone()
    }

    pub fn input_keys(&self) -> Vec<Key> {
        self.params.iter().flat_map(Param::keys).collect()
    }

    pub fn output_keys(&self) -> Vec<Key> {
        self.outputs.iter().flat_map(Output::keys).collect()
    }

    /// Checks the descriptors before anything is registered
    pub(crate) fn validate(&self) -> Result<(), DiError> {
        let invalid = |reason: String| DiError::InvalidConstructor {
            constructor: self.name.clone(),
            reason,
        };

        let keys = self.output_keys();
        if keys.is_empty() {
            return Err(invalid("must provide at least one value".to_string()));
        }

        let reserved = reserved_types();
        let types = self
            .params
            .iter()
            .flat_map(Param::type_infos)
            .chain(self.outputs.iter().flat_map(Output::type_infos));
        for info in types {
            if reserved.contains(&info) {
                return Err(invalid(format!(
                    "'{info}' cannot be used as a parameter or an output"
                )));
            }
        }

        check_group_shapes(&self.params, &self.outputs).map_err(invalid)?;

        let mut seen = HashSet::new();
        for key in keys.into_iter().filter(|key| !key.is_group()) {
            if !seen.insert(key.clone()) {
                return Err(invalid(format!("provides {key} more than once")));
            }
        }
        Ok(())
    }
}

/// Types that describe the graph itself and can never be injected or provided
fn reserved_types() -> [TypeInfo; 5] {
    [
        TypeInfo::of::<DiError>(),
        TypeInfo::of::<DynError>(),
        TypeInfo::of::<SharedError>(),
        TypeInfo::of::<Arguments>(),
        TypeInfo::of::<Outputs>(),
    ]
}

fn check_group_shapes(params: &[Param], outputs: &[Output]) -> Result<(), String> {
    for param in params {
        match param {
            Param::Single { key, .. } if key.is_group() => {
                return Err(format!("{key} is a group and must be requested as one"));
            }
            Param::Group { key, .. } if !key.is_group() => {
                return Err(format!("{key} is requested as a group but has no group name"));
            }
            Param::Object { fields, .. } => check_group_shapes(fields, &[])?,
            _ => {}
        }
    }
    for output in outputs {
        match output {
            Output::Single { key } if key.is_group() => {
                return Err(format!("{key} is a group and must be provided as one"));
            }
            Output::Group { key, .. } if !key.is_group() => {
                return Err(format!("{key} is provided as a group but has no group name"));
            }
            Output::Object { fields, .. } => check_group_shapes(&[], fields)?,
            _ => {}
        }
    }
    Ok(())
}

/// Builds a [Constructor] from explicit descriptors
pub struct ConstructorBuilder {
    name: String,
    params: Vec<Param>,
    outputs: Vec<Output>,
}

impl ConstructorBuilder {
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// `func` receives one argument per declared parameter and must return one value per
    /// declared output, in declaration order
    pub fn build(
        self,
        func: impl Fn(Arguments) -> Result<Outputs, DynError> + Send + Sync + 'static,
    ) -> Constructor {
        Constructor::from_parts(self.name, self.params, self.outputs, func)
    }
}

/// Built arguments, handed out in parameter order
#[derive(Debug)]
pub struct Arguments {
    values: std::vec::IntoIter<ParamValue>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<ParamValue>) -> Self {
        Arguments {
            values: values.into_iter(),
        }
    }

    /// Arguments of a parameter object
    pub fn from_object(value: ParamValue) -> Result<Self, DiError> {
        match value {
            ParamValue::Object(fields) => Ok(Arguments::new(fields)),
            other => Err(DiError::Internal(format!(
                "expected the fields of a parameter object, got {other:?}"
            ))),
        }
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    pub fn next_value(&mut self) -> Result<ParamValue, DiError> {
        self.values
            .next()
            .ok_or_else(|| DiError::Internal("more arguments taken than declared".to_string()))
    }

    pub fn take<I: Inject>(&mut self) -> Result<I, DiError> {
        I::extract(self.next_value()?)
    }
}

/// Values returned by a constructor, in output order
#[derive(Debug, Default)]
pub struct Outputs(Vec<OutputValue>);

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value for a single or group output
    pub fn with<T: Injectable>(mut self, value: T) -> Self {
        self.0.push(OutputValue::Single(Instance::new(value)));
        self
    }

    /// Every element of a flattened group output
    pub fn with_many<T: Injectable>(mut self, values: impl IntoIterator<Item = T>) -> Self {
        self.0.push(OutputValue::Many(
            values.into_iter().map(Instance::new).collect(),
        ));
        self
    }

    /// The fields of an object output
    pub fn with_object(mut self, fields: Outputs) -> Self {
        self.0.push(OutputValue::Object(fields.0));
        self
    }

    pub(crate) fn into_values(self) -> Vec<OutputValue> {
        self.0
    }
}

/// Registration options of [crate::Scope::provide_with]
#[derive(Debug, Clone, Default)]
pub struct ProvideOptions {
    name: Option<String>,
    group: Option<String>,
    export: bool,
}

impl ProvideOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the value under a name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add the value to a group instead
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Register the constructor in the parent scope, making its outputs visible to siblings
    pub fn export(mut self) -> Self {
        self.export = true;
        self
    }

    pub fn is_export(&self) -> bool {
        self.export
    }

    pub(crate) fn has_key_options(&self) -> bool {
        self.name.is_some() || self.group.is_some()
    }

    /// Output of a function returning a `T`
    pub(crate) fn output_for<T: 'static>(&self) -> Result<Output, DiError> {
        let key = Key::new(
            TypeInfo::of::<T>(),
            self.name.as_deref(),
            self.group.as_deref(),
        )?;
        Ok(if key.is_group() {
            Output::group(key)
        } else {
            Output::Single { key }
        })
    }
}

/// Describes a registered constructor or decorator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvideInfo {
    pub id: usize,
    pub inputs: Vec<Key>,
    pub outputs: Vec<Key>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: Arguments) -> Result<Outputs, DynError> {
        Ok(Outputs::new())
    }

    #[test]
    fn constructor_without_outputs_is_invalid() {
        let ctor = Constructor::builder("empty").param(Param::single::<u32>()).build(noop);
        let err = ctor.validate().unwrap_err();
        assert!(err.to_string().contains("at least one value"), "{err}");
    }

    #[test]
    fn reserved_types_are_rejected() {
        let ctor = Constructor::builder("needs_outputs")
            .param(Param::single::<Outputs>())
            .output(Output::single::<u32>())
            .build(noop);
        assert!(matches!(ctor.validate(), Err(DiError::InvalidConstructor { .. })));

        let ctor = Constructor::builder("returns_error")
            .output(Output::single::<DiError>())
            .build(noop);
        assert!(ctor.validate().is_err());
    }

    #[test]
    fn duplicate_outputs_are_rejected_unless_grouped() {
        let ctor = Constructor::builder("twice")
            .output(Output::single::<u32>())
            .output(Output::object::<()>(vec![Output::single::<u32>()]))
            .build(noop);
        assert!(ctor.validate().is_err());

        let group = Key::group::<u32>("numbers").unwrap();
        let ctor = Constructor::builder("grouped")
            .output(Output::group(group.clone()))
            .output(Output::flattened(group))
            .build(noop);
        assert!(ctor.validate().is_ok());
    }

    #[test]
    fn group_shapes_must_match_keys() {
        let ctor = Constructor::builder("mismatch")
            .output(Output::group(Key::of::<u32>()))
            .build(noop);
        assert!(ctor.validate().is_err());
    }

    #[test]
    fn options_pick_the_output_key() {
        let output = ProvideOptions::new().name("port").output_for::<u16>().unwrap();
        assert_eq!(output, Output::named::<u16>("port"));

        let output = ProvideOptions::new().group("ports").output_for::<u16>().unwrap();
        assert!(matches!(output, Output::Group { flatten: false, .. }));

        let err = ProvideOptions::new()
            .name("a")
            .group("b")
            .output_for::<u16>()
            .unwrap_err();
        assert!(matches!(err, DiError::InvalidKey { .. }));
    }

    #[test]
    fn arguments_are_taken_in_order() {
        let mut args = Arguments::new(vec![
            ParamValue::Single(Some(Instance::new(7u32))),
            ParamValue::Single(None),
        ]);
        let first: Arc<u32> = args.take().unwrap();
        let second: Option<Arc<String>> = args.take().unwrap();
        assert_eq!(*first, 7);
        assert!(second.is_none());
        assert_eq!(args.remaining(), 0);
        assert!(args.take::<Arc<u32>>().is_err());
    }
}
