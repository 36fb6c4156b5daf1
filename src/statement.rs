#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, Lineage, Pin};
use crate::record::{self, Record};
use crate::sys::{ByteBuf, ByteView, NativeApi, RawHandle};
use crate::value::codec::encode_with_context;
use crate::value::convert::{coerce, IntoParam, Param};
use crate::value::{LogicalTypeId, Value};

/// A parameter declared by a compiled statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamInfo {
    /// Name without the `$` sigil.
    pub name: String,
    /// Raw declared type tag.
    pub type_tag: u32,
}

impl ParamInfo {
    /// Declared type, if known to this crate.
    pub fn logical_type(&self) -> Option<LogicalTypeId> {
        LogicalTypeId::from_raw(self.type_tag)
    }
}

/// A compiled, parameterized query.
///
/// Bindings are by exact (case-sensitive) name and the last bind wins.
/// Executing does not clear bindings.
pub struct PreparedStatement {
    api: &'static NativeApi,
    handle: Handle,
    text: String,
    params: Vec<ParamInfo>,
    bound: FxHashMap<String, Value>,
    _not_sync: PhantomData<Cell<()>>,
}

impl PreparedStatement {
    pub(crate) fn adopt(
        api: &'static NativeApi,
        connection: &Lineage,
        raw: RawHandle,
        text: &str,
    ) -> Result<PreparedStatement> {
        let handle = Handle::adopt(
            HandleKind::Statement,
            Some(connection),
            api.statement_destroy,
            raw,
            "Prepare",
        )?;
        let pin = handle.pin()?;
        // SAFETY: pinned statement.
        if !unsafe { (api.statement_is_success)(pin.as_ptr()) } {
            // SAFETY: pinned statement; the buffer is ours.
            let message = api.take_message(unsafe { (api.statement_error_message)(pin.as_ptr()) });
            return Err(Error::PrepareFailed { message });
        }
        let params = read_params(api, &pin)?;
        drop(pin);
        Ok(PreparedStatement {
            api,
            handle,
            text: text.to_string(),
            params,
            bound: FxHashMap::default(),
            _not_sync: PhantomData,
        })
    }

    /// Query text the statement was compiled from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Declared parameters in engine order.
    pub fn parameters(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Last value bound to `name`, after coercion to the declared type.
    pub fn bound_value(&self, name: &str) -> Option<&Value> {
        self.bound.get(name)
    }

    fn param(&self, name: &str) -> Result<&ParamInfo> {
        self.params
            .iter()
            .find(|param| param.name == name)
            .ok_or_else(|| Error::UnknownParameter {
                name: name.to_string(),
            })
    }

    /// Binds `value` to the parameter `name`.
    ///
    /// The value is converted to the declared type when that is lossless;
    /// otherwise this fails with [`Error::TypeMismatch`] (or
    /// [`Error::Overflow`]) before anything reaches the engine.
    pub fn bind<V: IntoParam>(&mut self, name: &str, value: V) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("PreparedStatement::bind", "parameter name is empty"));
        }
        let context = || format!("parameter '{name}'");
        let declared = self.param(name)?.type_tag;
        let value = value
            .into_param()
            .map_err(|err| err.into_error(context()))?
            .into_value();
        self.bind_value(name, declared, value)
    }

    fn bind_value(&mut self, name: &str, declared: u32, value: Value) -> Result<()> {
        let context = format!("parameter '{name}'");
        let value = match LogicalTypeId::from_raw(declared) {
            Some(ty) => coerce(value, ty).map_err(|err| err.into_error(context.as_str()))?,
            None => value,
        };
        let native = encode_with_context(self.api, &value, &context)?;
        let stmt_pin = self.handle.pin()?;
        let value_pin = native.pin()?;
        // SAFETY: both handles are pinned; the engine copies the value.
        let state = unsafe {
            (self.api.statement_bind_value)(
                stmt_pin.as_ptr(),
                ByteView::new(name.as_bytes()),
                value_pin.as_ptr(),
            )
        };
        drop(value_pin);
        drop(stmt_pin);
        if !state.is_success() {
            return Err(Error::native("Bind", self.api.last_error()));
        }
        debug!(param = name, ty = %value.type_name(), "statement.bind");
        self.bound.insert(name.to_string(), value);
        Ok(())
    }

    /// Binds every record member whose name (or alias) matches a declared
    /// parameter, ignoring ASCII case. Returns how many were bound.
    ///
    /// Fails with [`Error::UnsupportedBindType`] before binding anything if a
    /// matched member is itself a record.
    pub fn bind_record<R: Record>(&mut self, item: &R) -> Result<usize> {
        let fields = R::fields();
        let mut pending = Vec::new();
        for param in &self.params {
            let Some(index) = record::match_field(fields, &param.name) else {
                continue;
            };
            let field = &fields[index];
            let context = || format!("parameter '{}'", param.name);
            match (field.read)(item).map_err(|err| err.into_error(context()))? {
                Param::Value(value) => pending.push((param.name.clone(), param.type_tag, value)),
                Param::Nested { type_name, .. } => {
                    return Err(Error::UnsupportedBindType {
                        name: param.name.clone(),
                        type_name,
                    })
                }
            }
        }
        let bound = pending.len();
        for (name, declared, value) in pending {
            self.bind_value(&name, declared, value)?;
        }
        Ok(bound)
    }

    /// Releases the statement. Returns false when already released.
    pub fn close(&self) -> bool {
        self.handle.release()
    }

    /// Whether [`PreparedStatement::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.handle.is_released()
    }

    pub(crate) fn belongs_to(&self, connection: &Lineage) -> bool {
        self.handle.is_child_of(connection)
    }

    pub(crate) fn pin(&self) -> Result<Pin> {
        self.handle.pin()
    }
}

fn read_params(api: &'static NativeApi, pin: &Pin) -> Result<Vec<ParamInfo>> {
    // SAFETY: pinned statement.
    let count = unsafe { (api.statement_param_count)(pin.as_ptr()) };
    let mut params = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut buf = ByteBuf::empty();
        // SAFETY: pinned statement; the buffer is ours on success.
        let state = unsafe { (api.statement_param_name)(pin.as_ptr(), index, &mut buf) };
        if !state.is_success() {
            return Err(Error::native("Prepare", api.last_error()));
        }
        let name = String::from_utf8(api.take_bytes(buf)).map_err(|_| {
            Error::native("Prepare", format!("parameter {index} has a non UTF-8 name"))
        })?;
        let mut type_tag = 0u32;
        // SAFETY: pinned statement; the name view outlives the call.
        let state = unsafe {
            (api.statement_param_type)(pin.as_ptr(), ByteView::new(name.as_bytes()), &mut type_tag)
        };
        if !state.is_success() {
            return Err(Error::native("Prepare", api.last_error()));
        }
        params.push(ParamInfo { name, type_tag });
    }
    Ok(params)
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("text", &self.text)
            .field("params", &self.params)
            .field("handle", &self.handle)
            .finish()
    }
}
