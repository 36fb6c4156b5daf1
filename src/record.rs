//! Host record types and their column mapping.
//!
//! A [`Record`] describes its members once, as a static table of [`Field`]s
//! with plain function pointers for reading and writing. Projection of query
//! rows into records resolves columns against that table once per
//! `(record type, column names)` pair and caches the resulting plan for the
//! life of the process.
//!
//! Records are normally declared with [`record!`](crate::record!):
//!
//! ```ignore
//! kuzu_bridge::record! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Person {
//!         pub name: String,
//!         #[alias("Age")]
//!         pub age_years: i64,
//!     }
//! }
//! ```

use std::any::TypeId;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use rustc_hash::FxHasher;
use tracing::debug;

use crate::error::Result;
use crate::value::convert::{ConversionError, Param};
use crate::value::Value;

/// One member of a [`Record`].
pub struct Field<R> {
    /// Rust member name.
    pub name: &'static str,
    /// Explicit column/parameter name; when set, the member is matched by it
    /// instead of `name`.
    pub alias: Option<&'static str>,
    /// Reads the member as a parameter.
    pub read: fn(&R) -> std::result::Result<Param, ConversionError>,
    /// Writes a decoded value into the member.
    pub write: fn(&mut R, Value) -> std::result::Result<(), ConversionError>,
}

impl<R> Field<R> {
    /// Name used for matching: the alias when present, else the member name.
    pub fn key(&self) -> &'static str {
        self.alias.unwrap_or(self.name)
    }
}

/// A host type rows can be projected into and parameters can be bound from.
///
/// Members without a matching column keep their [`Default`] value.
pub trait Record: Default + 'static {
    /// Member table, in declaration order.
    fn fields() -> &'static [Field<Self>];
}

/// Index of the member matching `target`: exact key match first, then an
/// ASCII case-insensitive one.
pub(crate) fn match_field<R>(fields: &[Field<R>], target: &str) -> Option<usize> {
    fields
        .iter()
        .position(|field| field.key() == target)
        .or_else(|| {
            fields
                .iter()
                .position(|field| field.key().eq_ignore_ascii_case(target))
        })
}

/// Per-column destination member, `None` for ignored columns.
pub(crate) type MappingPlan = Arc<[Option<usize>]>;

type PlanKey = (TypeId, Box<[String]>);
type PlanCache = DashMap<PlanKey, MappingPlan, BuildHasherDefault<FxHasher>>;

fn plan_cache() -> &'static PlanCache {
    static CACHE: OnceLock<PlanCache> = OnceLock::new();
    CACHE.get_or_init(PlanCache::default)
}

/// Mapping plan for projecting rows with `columns` into `R`, built on first use.
pub(crate) fn plan_for<R: Record>(columns: &[String]) -> MappingPlan {
    let key: PlanKey = (TypeId::of::<R>(), columns.to_vec().into_boxed_slice());
    if let Some(plan) = plan_cache().get(&key) {
        return Arc::clone(plan.value());
    }
    let fields = R::fields();
    let plan: MappingPlan = columns
        .iter()
        .map(|column| match_field(fields, column))
        .collect();
    debug!(
        record = std::any::type_name::<R>(),
        columns = columns.len(),
        mapped = plan.iter().filter(|slot| slot.is_some()).count(),
        "record.mapping.populate"
    );
    // Concurrent builders compute identical plans; whichever lands first wins.
    Arc::clone(plan_cache().entry(key).or_insert(plan).value())
}

/// Number of cached mapping plans.
pub fn cached_plans() -> usize {
    plan_cache().len()
}

/// Builds an `R` from one row of values laid out as the plan's columns.
pub(crate) fn project<R: Record>(plan: &[Option<usize>], columns: &[String], row: Vec<Value>) -> Result<R> {
    let fields = R::fields();
    let mut record = R::default();
    for ((slot, column), value) in plan.iter().zip(columns).zip(row) {
        if let Some(index) = slot {
            (fields[*index].write)(&mut record, value)
                .map_err(|err| err.into_error(format!("column '{column}'")))?;
        }
    }
    Ok(record)
}

/// Renders a record as a STRUCT value, members keyed by alias or name.
pub fn to_struct<R: Record>(record: &R) -> std::result::Result<Value, ConversionError> {
    R::fields()
        .iter()
        .map(|field| Ok((field.key().to_string(), (field.read)(record)?.into_value())))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Value::Struct)
}

/// Builds a record from a STRUCT value using the same matching rules as row
/// projection. Unknown fields are ignored.
pub fn from_struct<R: Record>(value: Value) -> std::result::Result<R, ConversionError> {
    let Value::Struct(entries) = value else {
        return Err(ConversionError::TypeMismatch {
            expected: "STRUCT".into(),
            found: match value {
                Value::Null(_) => "NULL".into(),
                other => other.type_name().into_owned(),
            },
        });
    };
    let fields = R::fields();
    let mut record = R::default();
    for (name, field_value) in entries {
        if let Some(index) = match_field(fields, &name) {
            (fields[index].write)(&mut record, field_value)?;
        }
    }
    Ok(record)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __record_alias {
    () => {
        ::core::option::Option::None
    };
    ([alias($alias:literal)] $($rest:tt)*) => {
        ::core::option::Option::Some($alias)
    };
    ([$($other:tt)*] $($rest:tt)*) => {
        $crate::__record_alias!($($rest)*)
    };
}

/// Emits the struct of a `record!`, stripping `#[alias(..)]` from its fields
/// and keeping every other field attribute.
#[doc(hidden)]
#[macro_export]
macro_rules! __record_struct {
    ([$($head:tt)*] [$($done:tt)*] []) => {
        $($head)* { $($done)* }
    };
    (
        $head:tt [$($done:tt)*]
        [{ [[alias $($alias:tt)*] $($attrs:tt)*] [$($kept:tt)*] $($decl:tt)* } $($rest:tt)*]
    ) => {
        $crate::__record_struct! {
            $head [$($done)*] [{ [$($attrs)*] [$($kept)*] $($decl)* } $($rest)*]
        }
    };
    (
        $head:tt [$($done:tt)*]
        [{ [[$($attr:tt)*] $($attrs:tt)*] [$($kept:tt)*] $($decl:tt)* } $($rest:tt)*]
    ) => {
        $crate::__record_struct! {
            $head [$($done)*] [{ [$($attrs)*] [$($kept)* #[$($attr)*]] $($decl)* } $($rest)*]
        }
    };
    (
        $head:tt [$($done:tt)*]
        [{ [] [$($kept:tt)*] $($decl:tt)* } $($rest:tt)*]
    ) => {
        $crate::__record_struct! {
            $head [$($done)* $($kept)* $($decl)*,] [$($rest)*]
        }
    };
}

/// Declares a struct and implements [`Record`], `IntoParam` and `FromValue`
/// for it.
///
/// Every member type must implement `Clone`, `IntoParam` and `FromValue`; the
/// struct must implement `Default`. Members may carry `#[alias("Column")]`
/// next to doc comments and other attributes. A record bound as a parameter
/// becomes a STRUCT, but record auto-binding rejects record-typed members.
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$($fattr:tt)*])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $crate::__record_struct! {
            [$(#[$meta])* $vis struct $name]
            []
            [$({ [$([$($fattr)*])*] [] $fvis $field : $ty })*]
        }

        impl $crate::record::Record for $name {
            fn fields() -> &'static [$crate::record::Field<Self>] {
                static FIELDS: &[$crate::record::Field<$name>] = &[
                    $(
                        $crate::record::Field {
                            name: ::core::stringify!($field),
                            alias: $crate::__record_alias!($([$($fattr)*])*),
                            read: {
                                fn read(
                                    record: &$name,
                                ) -> ::core::result::Result<$crate::Param, $crate::ConversionError> {
                                    $crate::IntoParam::into_param(
                                        ::core::clone::Clone::clone(&record.$field),
                                    )
                                }
                                read
                            },
                            write: {
                                fn write(
                                    record: &mut $name,
                                    value: $crate::Value,
                                ) -> ::core::result::Result<(), $crate::ConversionError> {
                                    record.$field = <$ty as $crate::FromValue>::from_value(value)?;
                                    ::core::result::Result::Ok(())
                                }
                                write
                            },
                        }
                    ),*
                ];
                FIELDS
            }
        }

        impl $crate::IntoParam for $name {
            fn into_param(self) -> ::core::result::Result<$crate::Param, $crate::ConversionError> {
                ::core::result::Result::Ok($crate::Param::Nested {
                    type_name: ::core::stringify!($name),
                    value: $crate::record::to_struct(&self)?,
                })
            }
        }

        impl $crate::FromValue for $name {
            fn from_value(
                value: $crate::Value,
            ) -> ::core::result::Result<Self, $crate::ConversionError> {
                $crate::record::from_struct(value)
            }
        }
    };
}
