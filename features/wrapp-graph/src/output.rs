//! What constructors and decorators return, and how results are checked before they are stored.

use crate::{
    key::Key,
    types::{Instance, TypeInfo},
};

/// Classification of a value returned by a constructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Single { key: Key },
    /// A value added to a group, or with `flatten` every element of a returned list
    Group { key: Key, flatten: bool },
    /// A struct whose fields are outputs themselves
    Object {
        type_info: TypeInfo,
        fields: Vec<Output>,
    },
}

impl Output {
    pub fn single<T: 'static + ?Sized>() -> Self {
        Output::Single { key: Key::of::<T>() }
    }

    pub fn named<T: 'static + ?Sized>(name: &str) -> Self {
        Output::Single {
            key: Key::named::<T>(name),
        }
    }

    /// Key must be a group key
    pub fn group(key: Key) -> Self {
        Output::Group {
            key,
            flatten: false,
        }
    }

    pub fn flattened(key: Key) -> Self {
        Output::Group { key, flatten: true }
    }

    pub fn object<T: 'static + ?Sized>(fields: Vec<Output>) -> Self {
        Output::Object {
            type_info: TypeInfo::of::<T>(),
            fields,
        }
    }

    /// All keys this output provides
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<Key>) {
        match self {
            Output::Single { key } | Output::Group { key, .. } => keys.push(key.clone()),
            Output::Object { fields, .. } => fields.iter().for_each(|f| f.collect_keys(keys)),
        }
    }

    pub(crate) fn type_infos(&self) -> Vec<TypeInfo> {
        match self {
            Output::Single { key } | Output::Group { key, .. } => vec![key.type_info()],
            Output::Object { type_info, fields } => std::iter::once(*type_info)
                .chain(fields.iter().flat_map(Output::type_infos))
                .collect(),
        }
    }
}

/// A value returned by a constructor, shaped like its [Output]
#[derive(Debug, Clone)]
pub enum OutputValue {
    Single(Instance),
    Many(Vec<Instance>),
    Object(Vec<OutputValue>),
}

/// A checked output, ready to be stored
#[derive(Debug)]
pub(crate) enum Staged {
    Value(Key, Instance),
    GroupItems(Key, Vec<Instance>),
}

/// Matches returned values against the declared outputs
///
/// Nothing is stored unless every value matches, so a failed check never leaves half a result
/// behind.
pub(crate) fn stage(outputs: &[Output], values: Vec<OutputValue>) -> Result<Vec<Staged>, String> {
    let mut staged = Vec::new();
    stage_into(outputs, values, &mut staged)?;
    Ok(staged)
}

fn stage_into(
    outputs: &[Output],
    values: Vec<OutputValue>,
    staged: &mut Vec<Staged>,
) -> Result<(), String> {
    if outputs.len() != values.len() {
        return Err(format!(
            "declared {} outputs but returned {} values",
            outputs.len(),
            values.len()
        ));
    }

    for (output, value) in outputs.iter().zip(values) {
        match (output, value) {
            (Output::Single { key }, OutputValue::Single(instance)) => {
                check_type(key, &instance)?;
                staged.push(Staged::Value(key.clone(), instance));
            }
            (
                Output::Group {
                    key,
                    flatten: false,
                },
                OutputValue::Single(instance),
            ) => {
                check_type(key, &instance)?;
                staged.push(Staged::GroupItems(key.clone(), vec![instance]));
            }
            (Output::Group { key, flatten: true }, OutputValue::Many(instances)) => {
                for instance in &instances {
                    check_type(key, instance)?;
                }
                staged.push(Staged::GroupItems(key.clone(), instances));
            }
            (Output::Object { fields, .. }, OutputValue::Object(values)) => {
                stage_into(fields, values, staged)?;
            }
            (output, value) => {
                return Err(format!("returned {value:?} where {output:?} was declared"));
            }
        }
    }
    Ok(())
}

fn check_type(key: &Key, instance: &Instance) -> Result<(), String> {
    if instance.info == key.type_info() {
        Ok(())
    } else {
        Err(format!(
            "returned a '{}' for {key}",
            instance.info.type_name
        ))
    }
}

/// Values committed instead of calling constructors in dry-run mode
pub(crate) fn placeholders(outputs: &[Output]) -> Vec<OutputValue> {
    outputs
        .iter()
        .map(|output| match output {
            Output::Single { key }
            | Output::Group {
                key,
                flatten: false,
            } => OutputValue::Single(Instance::placeholder(key.type_info())),
            Output::Group { key, flatten: true } => {
                OutputValue::Many(vec![Instance::placeholder(key.type_info())])
            }
            Output::Object { fields, .. } => OutputValue::Object(placeholders(fields)),
        })
        .collect()
}
