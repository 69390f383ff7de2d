//! Typed parameters and the adapters turning plain functions into constructors.

use std::{any::type_name, fmt, marker::PhantomData, ops::Deref, sync::Arc};

use crate::{
    constructor::{Arguments, Constructor, Outputs, ProvideOptions},
    errors::DiError,
    key::Key,
    param::{Param, ParamValue},
    types::{DynError, Injectable, Instance},
};

/// A type which can be requested as a function parameter
///
/// Implemented for `Arc<T>`, `Option<I>`, [Named] and [Group]. Implement it for a struct to
/// use it as a parameter object, see [Param::Object] and [Arguments::from_object].
pub trait Inject: Sized + Send + 'static {
    /// Describes the parameter
    fn param() -> Result<Param, DiError>;

    /// Converts a built value back into the typed parameter
    fn extract(value: ParamValue) -> Result<Self, DiError>;
}

fn downcast<T: Injectable>(instance: &Instance) -> Result<Arc<T>, DiError> {
    instance
        .downcast::<T>()
        .map_err(|actual_type| DiError::DowncastFailed {
            required_type: type_name::<T>(),
            actual_type,
        })
}

fn unexpected<I>(value: ParamValue) -> DiError {
    DiError::Internal(format!(
        "'{}' cannot be extracted from {value:?}",
        type_name::<I>()
    ))
}

impl<T: Injectable> Inject for Arc<T> {
    fn param() -> Result<Param, DiError> {
        Ok(Param::single::<T>())
    }

    fn extract(value: ParamValue) -> Result<Self, DiError> {
        match value {
            ParamValue::Single(Some(instance)) => downcast(&instance),
            other => Err(unexpected::<Self>(other)),
        }
    }
}

impl<I: Inject> Inject for Option<I> {
    fn param() -> Result<Param, DiError> {
        Ok(I::param()?.optional())
    }

    fn extract(value: ParamValue) -> Result<Self, DiError> {
        match value {
            // Nothing could provide the value
            ParamValue::Single(None) => Ok(None),
            other => I::extract(other).map(Some),
        }
    }
}

/// Name of a [Named] parameter
pub trait Tag: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Group of a [Group] parameter
pub trait GroupTag: Send + Sync + 'static {
    const NAME: &'static str;
    /// Soft groups never trigger constructors
    const SOFT: bool = false;
}

/// Declares a [Tag] for use with [Named]
///
/// ```
/// wrapp_graph::name_tag!(pub Primary = "primary");
/// ```
#[macro_export]
macro_rules! name_tag {
    ($vis:vis $tag:ident = $name:literal) => {
        $vis struct $tag;
        impl $crate::Tag for $tag {
            const NAME: &'static str = $name;
        }
    };
}

/// Declares a [GroupTag] for use with [Group], optionally soft
///
/// ```
/// wrapp_graph::group_tag!(pub Handlers = "handlers");
/// wrapp_graph::group_tag!(pub SeenHandlers = "handlers", soft);
/// ```
#[macro_export]
macro_rules! group_tag {
    ($vis:vis $tag:ident = $name:literal) => {
        $vis struct $tag;
        impl $crate::GroupTag for $tag {
            const NAME: &'static str = $name;
        }
    };
    ($vis:vis $tag:ident = $name:literal, soft) => {
        $vis struct $tag;
        impl $crate::GroupTag for $tag {
            const NAME: &'static str = $name;
            const SOFT: bool = true;
        }
    };
}

/// A value provided under the name of `N`
pub struct Named<T, N> {
    value: Arc<T>,
    _tag: PhantomData<fn() -> N>,
}

impl<T, N> Named<T, N> {
    pub fn into_inner(self) -> Arc<T> {
        self.value
    }
}

impl<T, N> Deref for Named<T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug, N: Tag> fmt::Debug for Named<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Named<{}>", N::NAME))
            .field(&self.value)
            .finish()
    }
}

impl<T: Injectable, N: Tag> Inject for Named<T, N> {
    fn param() -> Result<Param, DiError> {
        Ok(Param::named::<T>(N::NAME))
    }

    fn extract(value: ParamValue) -> Result<Self, DiError> {
        match value {
            ParamValue::Single(Some(instance)) => Ok(Named {
                value: downcast(&instance)?,
                _tag: PhantomData,
            }),
            other => Err(unexpected::<Self>(other)),
        }
    }
}

/// Every value of the group `G`, in no particular order
pub struct Group<T, G> {
    values: Vec<Arc<T>>,
    _tag: PhantomData<fn() -> G>,
}

impl<T, G> Group<T, G> {
    pub fn into_inner(self) -> Vec<Arc<T>> {
        self.values
    }
}

impl<T, G> Deref for Group<T, G> {
    type Target = [Arc<T>];

    fn deref(&self) -> &[Arc<T>] {
        &self.values
    }
}

impl<T: fmt::Debug, G: GroupTag> fmt::Debug for Group<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Group<{}>", G::NAME))
            .field(&self.values)
            .finish()
    }
}

impl<T: Injectable, G: GroupTag> Inject for Group<T, G> {
    fn param() -> Result<Param, DiError> {
        let param = Param::Group {
            key: Key::group::<T>(G::NAME)?,
            soft: G::SOFT,
        };
        Ok(param)
    }

    fn extract(value: ParamValue) -> Result<Self, DiError> {
        match value {
            ParamValue::Group(instances) => Ok(Group {
                values: instances.iter().map(downcast).collect::<Result<_, _>>()?,
                _tag: PhantomData,
            }),
            other => Err(unexpected::<Self>(other)),
        }
    }
}

/// Anything which can be registered as a constructor or decorator
///
/// `Marker` only disambiguates the implementations for functions of different arity.
pub trait IntoConstructor<Marker> {
    fn into_constructor(self, options: &ProvideOptions) -> Result<Constructor, DiError>;
}

impl IntoConstructor<Constructor> for Constructor {
    fn into_constructor(self, options: &ProvideOptions) -> Result<Constructor, DiError> {
        if options.has_key_options() {
            return Err(DiError::InvalidConstructor {
                constructor: self.name().to_string(),
                reason: "name and group options only apply to function constructors, declare them on the outputs instead".to_string(),
            });
        }
        Ok(self)
    }
}

/// A function whose parameters can be built by a scope
pub trait Invocable<Marker> {
    type Output;

    fn params() -> Result<Vec<Param>, DiError>;

    fn invoke(self, args: Arguments) -> Result<Self::Output, DiError>;
}

macro_rules! impl_function_adapters {
    ($($arg:ident),*) => {
        impl<Func, Out, E, $($arg,)*> IntoConstructor<fn($($arg,)*) -> Result<Out, E>> for Func
        where
            Func: Fn($($arg),*) -> Result<Out, E> + Send + Sync + 'static,
            Out: Injectable,
            E: Into<DynError> + 'static,
            $($arg: Inject,)*
        {
            #[allow(non_snake_case, unused_mut)]
            fn into_constructor(self, options: &ProvideOptions) -> Result<Constructor, DiError> {
                let params: Vec<Param> = vec![$($arg::param()?,)*];
                let output = options.output_for::<Out>()?;
                Ok(Constructor::from_parts(
                    type_name::<Func>(),
                    params,
                    vec![output],
                    move |mut _args: Arguments| {
                        $(let $arg = _args.take::<$arg>()?;)*
                        let value = (self)($($arg),*).map_err(Into::into)?;
                        Ok(Outputs::new().with(value))
                    },
                ))
            }
        }

        impl<Func, Ret, $($arg,)*> Invocable<fn($($arg,)*) -> Ret> for Func
        where
            Func: FnOnce($($arg),*) -> Ret,
            $($arg: Inject,)*
        {
            type Output = Ret;

            fn params() -> Result<Vec<Param>, DiError> {
                Ok(vec![$($arg::param()?,)*])
            }

            #[allow(non_snake_case, unused_mut)]
            fn invoke(self, mut _args: Arguments) -> Result<Ret, DiError> {
                $(let $arg = _args.take::<$arg>()?;)*
                Ok((self)($($arg),*))
            }
        }
    };
}

impl_function_adapters!();
impl_function_adapters!(A1);
impl_function_adapters!(A1, A2);
impl_function_adapters!(A1, A2, A3);
impl_function_adapters!(A1, A2, A3, A4);
impl_function_adapters!(A1, A2, A3, A4, A5);
impl_function_adapters!(A1, A2, A3, A4, A5, A6);
impl_function_adapters!(A1, A2, A3, A4, A5, A6, A7);
impl_function_adapters!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    crate::name_tag!(Primary = "primary");
    crate::group_tag!(Numbers = "numbers");
    crate::group_tag!(SeenNumbers = "numbers", soft);

    #[test]
    fn params_describe_the_requested_keys() {
        assert_eq!(
            <Option<Arc<u32>>>::param().unwrap(),
            Param::single::<u32>().optional()
        );
        assert_eq!(
            <Named<String, Primary>>::param().unwrap(),
            Param::named::<String>("primary")
        );
        assert_eq!(
            <Group<u8, SeenNumbers>>::param().unwrap(),
            Param::group::<u8>("numbers").unwrap().soft()
        );
    }

    #[test]
    fn function_becomes_constructor() {
        let to_len = |text: Arc<String>, extra: Option<Arc<u8>>| {
            Ok::<_, Infallible>(text.len() + extra.map_or(0, |x| *x as usize))
        };
        let ctor = to_len.into_constructor(&ProvideOptions::new()).unwrap();
        assert_eq!(ctor.input_keys(), vec![Key::of::<String>(), Key::of::<u8>()]);
        assert_eq!(ctor.output_keys(), vec![Key::of::<usize>()]);

        let outputs = (ctor.func())(Arguments::new(vec![
            ParamValue::Single(Some(Instance::new("four".to_string()))),
            ParamValue::Single(None),
        ]))
        .unwrap();
        match outputs.into_values().as_slice() {
            [crate::output::OutputValue::Single(instance)] => {
                assert_eq!(*instance.downcast::<usize>().unwrap(), 4)
            }
            other => panic!("unexpected outputs {other:?}"),
        }
    }

    #[test]
    fn group_extracts_every_value() {
        let group = <Group<u8, Numbers>>::extract(ParamValue::Group(vec![
            Instance::new(1u8),
            Instance::new(2u8),
        ]))
        .unwrap();
        let mut values: Vec<u8> = group.iter().map(|v| **v).collect();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn wrong_type_fails_to_downcast() {
        let err = <Arc<u32>>::extract(ParamValue::Single(Some(Instance::new(1u64)))).unwrap_err();
        assert!(matches!(err, DiError::DowncastFailed { .. }));
    }

    #[test]
    fn explicit_constructor_rejects_key_options() {
        let ctor = Constructor::builder("explicit")
            .output(crate::Output::single::<u32>())
            .build(|_| Ok(Outputs::new().with(1u32)));
        let err = ctor
            .into_constructor(&ProvideOptions::new().name("x"))
            .unwrap_err();
        assert!(matches!(err, DiError::InvalidConstructor { .. }));
    }
}
